use std::io;

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
};

use crate::racecat::{
    config,
    shutdown::{self, ShutdownRx},
};

/// The two copy loops of one relay. Each task yields the number of bytes it moved.
#[derive(Debug)]
pub struct RelayHandle {
    pub outbound: Option<JoinHandle<u64>>,
    pub inbound: Option<JoinHandle<u64>>,
}

/// Start pumping bytes between `stream` and the local streams.
///
/// `local_in` feeds the remote peer and the remote peer feeds `local_out`. The loops are
/// independent: end-of-stream or an I/O error stops only the loop that saw it. Both loops
/// stop once `closed` fires, which releases their halves of the socket.
pub fn spawn<R, W>(
    stream: TcpStream,
    mut local_in: R,
    mut local_out: W,
    buffer_size: usize,
    closed: ShutdownRx,
) -> RelayHandle
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let buffer_size = buffer_size.clamp(1, config::MAX_BUFFER_SIZE);
    let (mut remote_rd, mut remote_wr) = stream.into_split();

    let outbound = {
        let mut closed = closed.clone();
        tokio::spawn(async move {
            let mut moved = 0u64;
            let close_requested = tokio::select! {
                res = pump(&mut local_in, &mut remote_wr, buffer_size, &mut moved) => {
                    if let Err(err) = res {
                        tracing::debug!(err = %err, "relay: local -> remote ended with error");
                    }
                    false
                }
                _ = shutdown::triggered(&mut closed) => true,
            };
            if close_requested {
                let _ = remote_wr.shutdown().await;
            } else {
                // Local EOF is not forwarded: the peer sees no FIN until the connection is
                // closed, when the read half goes too.
                remote_wr.forget();
            }
            tracing::debug!(bytes = moved, "relay: local -> remote done");
            moved
        })
    };

    let inbound = {
        let mut closed = closed;
        tokio::spawn(async move {
            let mut moved = 0u64;
            tokio::select! {
                res = pump(&mut remote_rd, &mut local_out, buffer_size, &mut moved) => {
                    if let Err(err) = res {
                        tracing::debug!(err = %err, "relay: remote -> local ended with error");
                    }
                }
                _ = shutdown::triggered(&mut closed) => {}
            }
            let _ = local_out.shutdown().await;
            tracing::debug!(bytes = moved, "relay: remote -> local done");
            moved
        })
    };

    RelayHandle {
        outbound: Some(outbound),
        inbound: Some(inbound),
    }
}

async fn pump<R, W>(
    src: &mut R,
    dst: &mut W,
    buffer_size: usize,
    moved: &mut u64,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; buffer_size];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        dst.write_all(&buf[..n]).await?;
        dst.flush().await?;
        *moved += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{TcpListener, TcpStream},
        time::timeout,
    };

    use super::*;
    use crate::racecat::shutdown;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let ln = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(ln.local_addr().unwrap()).await.unwrap();
        let (server, _) = ln.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn bytes_flow_both_ways_in_order() {
        let (client, mut peer) = socket_pair().await;
        let (mut user_in, local_in) = tokio::io::duplex(64);
        let (local_out, mut user_out) = tokio::io::duplex(64);
        let (_close_tx, close_rx) = shutdown::channel();

        let _relay = spawn(client, local_in, local_out, 512, close_rx);

        user_in.write_all(b"ping\n").await.unwrap();
        let mut got = [0u8; 5];
        timeout(Duration::from_secs(2), peer.read_exact(&mut got))
            .await
            .expect("peer read")
            .unwrap();
        assert_eq!(&got, b"ping\n");

        peer.write_all(b"pong\nmore\n").await.unwrap();
        let mut got = [0u8; 10];
        timeout(Duration::from_secs(2), user_out.read_exact(&mut got))
            .await
            .expect("local read")
            .unwrap();
        assert_eq!(&got, b"pong\nmore\n");
    }

    #[tokio::test]
    async fn small_buffer_preserves_order() {
        let (client, mut peer) = socket_pair().await;
        let (mut user_in, local_in) = tokio::io::duplex(4096);
        let (local_out, _user_out) = tokio::io::duplex(64);
        let (_close_tx, close_rx) = shutdown::channel();

        let _relay = spawn(client, local_in, local_out, 3, close_rx);

        let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
        user_in.write_all(&payload).await.unwrap();

        let mut got = vec![0u8; payload.len()];
        timeout(Duration::from_secs(2), peer.read_exact(&mut got))
            .await
            .expect("peer read")
            .unwrap();
        assert_eq!(got, payload);
    }

    #[tokio::test]
    async fn local_eof_leaves_remote_stream_open() {
        let (client, mut peer) = socket_pair().await;
        let (user_in, local_in) = tokio::io::duplex(64);
        let (local_out, mut user_out) = tokio::io::duplex(64);
        let (close_tx, close_rx) = shutdown::channel();

        let mut relay = spawn(client, local_in, local_out, 512, close_rx);

        drop(user_in);
        let moved = timeout(Duration::from_secs(2), relay.outbound.take().unwrap())
            .await
            .expect("outbound finished")
            .unwrap();
        assert_eq!(moved, 0);

        // No FIN reaches the peer while the connection is still open.
        let mut buf = [0u8; 1];
        assert!(
            timeout(Duration::from_millis(300), peer.read(&mut buf))
                .await
                .is_err(),
            "peer saw end-of-stream after local EOF"
        );

        peer.write_all(b"still here").await.unwrap();
        let mut got = [0u8; 10];
        timeout(Duration::from_secs(2), user_out.read_exact(&mut got))
            .await
            .expect("local read")
            .unwrap();
        assert_eq!(&got, b"still here");

        close_tx.send(true).unwrap();
        timeout(Duration::from_secs(2), relay.inbound.take().unwrap())
            .await
            .expect("inbound stopped")
            .unwrap();
        let n = timeout(Duration::from_secs(2), peer.read(&mut buf))
            .await
            .expect("peer sees close")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn close_signal_stops_both_loops() {
        let (client, mut peer) = socket_pair().await;
        let (_user_in, local_in) = tokio::io::duplex(64);
        let (local_out, _user_out) = tokio::io::duplex(64);
        let (close_tx, close_rx) = shutdown::channel();

        let mut relay = spawn(client, local_in, local_out, 512, close_rx);
        close_tx.send(true).unwrap();

        for h in [relay.outbound.take().unwrap(), relay.inbound.take().unwrap()] {
            timeout(Duration::from_secs(2), h)
                .await
                .expect("loop stopped")
                .unwrap();
        }

        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(2), peer.read(&mut buf))
            .await
            .expect("peer sees close")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn peer_close_ends_inbound() {
        let (client, peer) = socket_pair().await;
        let (_user_in, local_in) = tokio::io::duplex(64);
        let (local_out, mut user_out) = tokio::io::duplex(64);
        let (_close_tx, close_rx) = shutdown::channel();

        let mut relay = spawn(client, local_in, local_out, 512, close_rx);
        drop(peer);

        timeout(Duration::from_secs(2), relay.inbound.take().unwrap())
            .await
            .expect("inbound finished")
            .unwrap();

        // local_out was shut down, so the local reader sees EOF.
        let mut buf = Vec::new();
        user_out.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }
}
