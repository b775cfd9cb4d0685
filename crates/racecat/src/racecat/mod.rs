pub mod app;
pub mod config;
pub mod connection;
pub mod dial;
pub mod error;
pub mod logging;
pub mod net;
pub mod race;
pub mod relay;
pub mod session;
pub mod shutdown;

pub use app::RunOptions;
pub use error::RaceError;

pub fn run(opts: RunOptions) -> anyhow::Result<()> {
    app::run(opts)
}
