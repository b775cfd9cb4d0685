use std::{net::SocketAddr, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::watch,
};

use crate::racecat::{dial::Target, relay};

/// The winning connection of a race, already wired into a relay.
///
/// Closing stops both relay loops, which drops their socket halves. `close` is
/// idempotent and dropping the connection closes it too.
#[derive(Debug)]
pub struct Connection {
    target: Target,
    peer: Option<SocketAddr>,
    closer: watch::Sender<bool>,
    relay: relay::RelayHandle,
    // Byte count of the remote -> local loop once `inbound_finished` has reaped it.
    inbound_total: Option<u64>,
}

/// Bytes moved by each direction of a finished relay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayTotals {
    pub sent: u64,
    pub received: u64,
}

impl Connection {
    pub fn attach<R, W>(
        target: Target,
        stream: TcpStream,
        local_in: R,
        local_out: W,
        buffer_size: usize,
    ) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let peer = stream.peer_addr().ok();
        let (closer, closed) = watch::channel(false);
        let relay = relay::spawn(stream, local_in, local_out, buffer_size, closed);
        Self {
            target,
            peer,
            closer,
            relay,
            inbound_total: None,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Returns `true` only for the call that actually closed the connection.
    pub fn close(&self) -> bool {
        !self.closer.send_replace(true)
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        *self.closer.borrow()
    }

    /// Resolves once the remote -> local loop has stopped (peer closed, read error or close).
    ///
    /// Cancel-safe; resolves immediately on every call after the first completion.
    pub async fn inbound_finished(&mut self) {
        if let Some(h) = self.relay.inbound.as_mut() {
            self.inbound_total = Some(h.await.unwrap_or_default());
            self.relay.inbound = None;
        }
    }

    /// Close and wait up to `grace` for both loops to report their byte counts.
    pub async fn shutdown(mut self, grace: Duration) -> RelayTotals {
        self.close();
        let mut totals = RelayTotals {
            sent: 0,
            received: self.inbound_total.unwrap_or_default(),
        };
        let outbound = self.relay.outbound.take();
        let inbound = self.relay.inbound.take();
        let join = async {
            if let Some(h) = outbound {
                totals.sent = h.await.unwrap_or_default();
            }
            if let Some(h) = inbound {
                totals.received = h.await.unwrap_or_default();
            }
        };
        if tokio::time::timeout(grace, join).await.is_err() {
            tracing::debug!(target_addr = %self.target, "relay: loops still running after close");
        }
        totals
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}
