use std::{path::PathBuf, time::Duration};

use anyhow::Context;

use crate::racecat::{
    config, logging,
    dial::Target,
    session::{Session, SessionOptions},
    shutdown,
};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config_path: Option<PathBuf>,
    pub port: String,
    pub hosts: Vec<String>,
    pub dial_timeout: Option<Duration>,
    pub log_level: Option<String>,
}

pub fn run(opts: RunOptions) -> anyhow::Result<()> {
    let resolved = config::resolve_config_path(opts.config_path.clone())?;

    let mut cfg = match &resolved {
        Some(r) => config::load_config(&r.path)
            .with_context(|| format!("load config: {}", r.path.display()))?,
        None => config::Config::default(),
    };
    apply_overrides(&mut cfg, &opts);

    let logrt = logging::init(&cfg.logging)?;
    let _logrt_guard = logrt; // keep alive

    if let Some(r) = &resolved {
        tracing::debug!(path = %r.path.display(), source = %r.source, "config: loaded");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("runtime: build")?;

    let res = rt.block_on(serve(&cfg, &opts));

    // A relay loop may still sit in a blocking stdin read; don't let it hold the process.
    rt.shutdown_timeout(cfg.shutdown_grace);

    res
}

fn apply_overrides(cfg: &mut config::Config, opts: &RunOptions) {
    if let Some(t) = opts.dial_timeout.filter(|t| !t.is_zero()) {
        cfg.dial_timeout = t;
    }
    if let Some(level) = opts.log_level.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
        cfg.logging.level = level.to_string();
    }
}

async fn serve(cfg: &config::Config, opts: &RunOptions) -> anyhow::Result<()> {
    let targets = Target::from_hosts(&opts.port, &opts.hosts);

    tracing::info!(
        port = %opts.port,
        hosts = ?opts.hosts,
        dial_timeout = %humantime::format_duration(cfg.dial_timeout),
        buffer_size = cfg.buffer_size,
        close_on_peer_eof = cfg.close_on_peer_eof,
        "racecat: starting"
    );

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown: signal");
        let _ = shutdown_tx.send(true);
        // Keep the sender alive so receivers never mistake a drop for "never cancelled".
        std::future::pending::<()>().await;
    });

    let mut session = Session::new(SessionOptions::from(cfg));
    let summary = session
        .run(
            targets,
            tokio::io::stdin(),
            tokio::io::stdout(),
            shutdown_rx,
        )
        .await?;

    tracing::debug!(
        target_addr = %summary.target,
        peer = ?summary.peer,
        reason = ?summary.reason,
        sent = summary.totals.sent,
        received = summary.totals.received,
        "racecat: done"
    );
    Ok(())
}

async fn shutdown_signal() {
    // Ctrl-C works cross-platform.
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
