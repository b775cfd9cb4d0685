use std::{fmt, time::Duration};

use tokio::{net::TcpStream, time};

use crate::racecat::{
    config,
    error::DialError,
    net,
    shutdown::{self, ShutdownRx},
};

/// One candidate destination. All targets of a race share the same port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub port: String,
}

impl Target {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    pub fn from_hosts<S: AsRef<str>>(port: &str, hosts: &[S]) -> Vec<Target> {
        hosts
            .iter()
            .map(|h| Target::new(h.as_ref().trim(), port.trim()))
            .collect()
    }

    pub fn addr(&self) -> String {
        net::join_host_port(&self.host, &self.port)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr())
    }
}

#[derive(Debug, Clone)]
pub struct Dialer {
    timeout: Duration,
    nodelay: bool,
}

impl Default for Dialer {
    fn default() -> Self {
        Self::new(config::DEFAULT_DIAL_TIMEOUT)
    }
}

impl Dialer {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            nodelay: true,
        }
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Make a single connection attempt to `target`.
    ///
    /// The attempt is bounded by the dialer timeout and aborted as soon as `shutdown`
    /// fires. Every resolved address of the host is tried in turn within that bound.
    /// On success the stream is handed to the caller untouched apart from `TCP_NODELAY`.
    pub async fn dial(
        &self,
        target: &Target,
        mut shutdown: ShutdownRx,
    ) -> Result<TcpStream, DialError> {
        let host = net::unbracket_host(&target.host);
        if host.is_empty() {
            return Err(DialError::InvalidTarget(target.addr(), "empty host"));
        }
        let Some(port) = net::parse_port(&target.port) else {
            return Err(DialError::InvalidTarget(target.addr(), "invalid port"));
        };

        if shutdown::is_triggered(&shutdown) {
            return Err(DialError::Cancelled);
        }

        let connect = time::timeout(self.timeout, TcpStream::connect((&*host, port)));
        let stream = tokio::select! {
            res = connect => match res {
                Ok(res) => res?,
                Err(_) => return Err(DialError::Timeout(self.timeout)),
            },
            _ = shutdown::triggered(&mut shutdown) => return Err(DialError::Cancelled),
        };

        if self.nodelay {
            if let Err(err) = stream.set_nodelay(true) {
                tracing::debug!(target_addr = %target, err = %err, "dial: set_nodelay failed");
            }
        }

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;
    use crate::racecat::shutdown;

    #[test]
    fn targets_share_port() {
        let ts = Target::from_hosts("9999", &["10.255.255.1", " 127.0.0.1 ", "::1"][..]);
        assert_eq!(ts.len(), 3);
        assert_eq!(ts[1], Target::new("127.0.0.1", "9999"));
        assert_eq!(ts[2].to_string(), "[::1]:9999");
    }

    #[tokio::test]
    async fn dial_connects_to_listener() {
        let ln = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = ln.local_addr().unwrap().port().to_string();
        let (_tx, rx) = shutdown::channel();

        let stream = Dialer::new(Duration::from_secs(2))
            .dial(&Target::new("127.0.0.1", port), rx)
            .await
            .expect("dial");
        assert_eq!(stream.peer_addr().unwrap(), ln.local_addr().unwrap());
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn dial_refused_is_io_error() {
        // Grab a free port, then close the listener so nothing accepts on it.
        let port = {
            let ln = TcpListener::bind("127.0.0.1:0").await.unwrap();
            ln.local_addr().unwrap().port().to_string()
        };
        let (_tx, rx) = shutdown::channel();

        let err = Dialer::new(Duration::from_secs(2))
            .dial(&Target::new("127.0.0.1", port), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, DialError::Io(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn dial_rejects_invalid_targets() {
        let (_tx, rx) = shutdown::channel();
        let d = Dialer::default();

        let err = d.dial(&Target::new("", "80"), rx.clone()).await.unwrap_err();
        assert!(matches!(err, DialError::InvalidTarget(_, "empty host")));

        let err = d
            .dial(&Target::new("127.0.0.1", "http"), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, DialError::InvalidTarget(_, "invalid port")));
    }

    #[tokio::test]
    async fn dial_already_cancelled() {
        let ln = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = ln.local_addr().unwrap().port().to_string();
        let (tx, rx) = shutdown::channel();
        tx.send(true).unwrap();

        let err = Dialer::default()
            .dial(&Target::new("127.0.0.1", port), rx)
            .await
            .unwrap_err();
        assert!(matches!(err, DialError::Cancelled));
    }

    #[tokio::test]
    async fn dial_unroutable_times_out_or_fails_fast() {
        let (_tx, rx) = shutdown::channel();
        let start = std::time::Instant::now();
        let res = Dialer::new(Duration::from_millis(200))
            .dial(&Target::new("10.255.255.1", "9999"), rx)
            .await;

        // Blackholed on most networks; some sandboxes reject immediately instead.
        assert!(res.is_err());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    // Linux drops SYNs once a listener's accept queue is full, so the connect hangs
    // until the dialer's own bound fires.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn dial_times_out_against_full_backlog() {
        let sock = tokio::net::TcpSocket::new_v4().unwrap();
        sock.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let ln = sock.listen(1).unwrap();
        let addr = ln.local_addr().unwrap();

        // Never accepted; these fill the queue.
        let mut fillers = Vec::new();
        for _ in 0..8 {
            if let Ok(Ok(s)) =
                tokio::time::timeout(Duration::from_millis(100), TcpStream::connect(addr)).await
            {
                fillers.push(s);
            }
        }
        assert!(!fillers.is_empty());

        let (_tx, rx) = shutdown::channel();
        let err = Dialer::new(Duration::from_millis(200))
            .dial(&Target::new("127.0.0.1", addr.port().to_string()), rx)
            .await
            .unwrap_err();
        assert!(
            matches!(err, DialError::Timeout(t) if t == Duration::from_millis(200)),
            "got {err:?}"
        );
        assert_eq!(err.to_string(), "dial timeout after 200ms");
    }

    #[tokio::test]
    async fn dial_cancelled_in_flight() {
        let (tx, rx) = shutdown::channel();
        let task = tokio::spawn(async move {
            Dialer::new(Duration::from_secs(30))
                .dial(&Target::new("10.255.255.1", "9999"), rx)
                .await
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = tx.send(true);

        let res = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("dial returned after cancel")
            .unwrap();
        assert!(res.is_err());
    }
}
