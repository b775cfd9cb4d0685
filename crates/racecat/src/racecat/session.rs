use std::{fmt, net::SocketAddr, time::Duration};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::racecat::{
    config::Config,
    connection::{Connection, RelayTotals},
    dial::{Dialer, Target},
    error::RaceError,
    race,
    shutdown::{self, ShutdownRx},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Racing,
    Relaying,
    Closing,
    Done,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Racing => "racing",
            SessionState::Relaying => "relaying",
            SessionState::Closing => "closing",
            SessionState::Done => "done",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Cancelled,
    PeerClosed,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub dialer: Dialer,
    pub buffer_size: usize,
    pub close_on_peer_eof: bool,
    /// How long to wait for the relay loops to report after closing.
    pub drain_timeout: Duration,
}

impl From<&Config> for SessionOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            dialer: Dialer::new(cfg.dial_timeout).with_nodelay(cfg.nodelay),
            buffer_size: cfg.buffer_size,
            close_on_peer_eof: cfg.close_on_peer_eof,
            drain_timeout: cfg.shutdown_grace,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub target: Target,
    pub peer: Option<SocketAddr>,
    pub reason: CloseReason,
    pub totals: RelayTotals,
}

/// Drives one run: race the targets, relay through the winner, close on cancellation.
#[derive(Debug)]
pub struct Session {
    opts: SessionOptions,
    state: SessionState,
}

impl Session {
    pub fn new(opts: SessionOptions) -> Self {
        Self {
            opts,
            state: SessionState::Idle,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        tracing::debug!(from = %self.state, to = %next, "session: state");
        self.state = next;
    }

    pub async fn run<R, W>(
        &mut self,
        targets: Vec<Target>,
        local_in: R,
        local_out: W,
        mut shutdown: ShutdownRx,
    ) -> Result<SessionSummary, RaceError>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.transition(SessionState::Racing);

        let buffer_size = self.opts.buffer_size;
        let on_win = move |target: &Target, stream: tokio::net::TcpStream| {
            eprintln!("Connected to {}", target.host);
            tracing::info!(
                target_addr = %target,
                peer = ?stream.peer_addr().ok(),
                "session: connected"
            );
            Connection::attach(target.clone(), stream, local_in, local_out, buffer_size)
        };

        let res = race::race(&targets, &self.opts.dialer, shutdown.clone(), on_win).await;
        let mut conn = match res {
            Ok(conn) => conn,
            Err(err) => {
                self.transition(SessionState::Done);
                return Err(err);
            }
        };
        self.transition(SessionState::Relaying);

        let close_on_peer_eof = self.opts.close_on_peer_eof;
        let reason = tokio::select! {
            _ = shutdown::triggered(&mut shutdown) => CloseReason::Cancelled,
            _ = conn.inbound_finished(), if close_on_peer_eof => CloseReason::PeerClosed,
        };

        self.transition(SessionState::Closing);
        let target = conn.target().clone();
        let peer = conn.peer_addr();
        let totals = conn.shutdown(self.opts.drain_timeout).await;
        tracing::info!(
            target_addr = %target,
            reason = ?reason,
            sent = totals.sent,
            received = totals.received,
            "session: closed"
        );
        self.transition(SessionState::Done);

        Ok(SessionSummary {
            target,
            peer,
            reason,
            totals,
        })
    }
}
