//! Relay: one outbound listener glued to one upstream service.
//!
//! The accept loop admission-checks every client against the [`IpStore`]
//! before a single byte can reach the upstream; admitted clients get a
//! dedicated session task that forwards bytes in both directions until
//! either side closes, an I/O error occurs, or the session sits idle for
//! [`IDLE_TIMEOUT`]. Authorization is checked only at admission — a later
//! expiry or overwrite never terminates an established session.
//!
//! There is no cap on concurrent sessions; a flood of admitted clients
//! spawns one task each. Known operational limitation.

use crate::store::IpStore;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Static route configuration: one outbound listening port forwarded to
/// exactly one upstream address and port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayRoute {
    pub outbound_port: u16,
    pub upstream_addr: Ipv4Addr,
    pub upstream_port: u16,
}

/// Total-inactivity limit for a session; sessions idle longer are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Read buffer size for the session glue loop.
const BUFFER_SIZE: usize = 64 * 1024;

pub struct Relay {
    route: RelayRoute,
    store: Arc<IpStore>,
}

impl Relay {
    pub fn new(route: RelayRoute, store: Arc<IpStore>) -> Self {
        Self { route, store }
    }

    /// Bind the outbound listener. Kept separate from [`Relay::run`] so the
    /// caller observes bind failures (fatal at startup) before the accept
    /// loop detaches. The listener is bound with `SO_REUSEADDR`, so a
    /// restart reclaims the port immediately.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(("0.0.0.0", self.route.outbound_port)).await?;
        info!(
            outbound_port = self.route.outbound_port,
            upstream = %self.upstream(),
            "relay listening"
        );
        Ok(listener)
    }

    /// Accept loop: admission-check each client and glue admitted ones to a
    /// fresh upstream connection. Runs until the process exits.
    pub async fn run(self, listener: TcpListener) {
        let upstream_addr = self.upstream();
        loop {
            let (client, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(
                        outbound_port = self.route.outbound_port,
                        error = %e,
                        "accept failed"
                    );
                    continue;
                }
            };

            let IpAddr::V4(client_ip) = peer.ip() else {
                info!(peer = %peer, "rejecting non-IPv4 client");
                continue;
            };
            if !self.store.check(client_ip) {
                // Dropping the socket closes it before any upstream traffic.
                info!(
                    client = %client_ip,
                    outbound_port = self.route.outbound_port,
                    "unauthorized client rejected"
                );
                continue;
            }

            let upstream = match TcpStream::connect(upstream_addr).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        client = %client_ip,
                        upstream = %upstream_addr,
                        error = %e,
                        "upstream connect failed, dropping client"
                    );
                    continue;
                }
            };

            debug!(client = %client_ip, upstream = %upstream_addr, "session started");
            tokio::spawn(async move {
                match glue(client, upstream, IDLE_TIMEOUT).await {
                    Ok(()) => debug!(client = %client_ip, "session ended"),
                    Err(e) => debug!(client = %client_ip, error = %e, "session ended"),
                }
            });
        }
    }

    fn upstream(&self) -> SocketAddr {
        SocketAddr::V4(SocketAddrV4::new(
            self.route.upstream_addr,
            self.route.upstream_port,
        ))
    }
}

/// Bidirectional glue loop: whenever either socket becomes readable, move
/// one chunk to the other side, flushing it in full. Ends on end-of-stream
/// or error from either side, or once `idle` elapses with no readiness.
/// Dropping the streams on return closes both connections.
async fn glue(client: TcpStream, upstream: TcpStream, idle: Duration) -> io::Result<()> {
    let mut buf = vec![0u8; BUFFER_SIZE];
    loop {
        // The idle sleep is constructed fresh on every iteration; a single
        // countdown reused across waits would shrink toward zero.
        tokio::select! {
            r = client.readable() => {
                r?;
                if !pump(&client, &upstream, &mut buf).await? {
                    return Ok(());
                }
            }
            r = upstream.readable() => {
                r?;
                if !pump(&upstream, &client, &mut buf).await? {
                    return Ok(());
                }
            }
            _ = tokio::time::sleep(idle) => {
                debug!("session idle timeout");
                return Ok(());
            }
        }
    }
}

/// Move one chunk from `from` to `to`. Returns `Ok(false)` once `from`
/// reaches end of stream. A spuriously-ready socket is not an error.
async fn pump(from: &TcpStream, to: &TcpStream, buf: &mut [u8]) -> io::Result<bool> {
    let n = match from.try_read(buf) {
        Ok(0) => return Ok(false),
        Ok(n) => n,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
        Err(e) => return Err(e),
    };
    write_all(to, &buf[..n]).await?;
    Ok(true)
}

/// Write the whole chunk, waiting for writability and retrying until the
/// OS has accepted every byte.
async fn write_all(stream: &TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        stream.writable().await?;
        match stream.try_write(data) {
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    const LOCALHOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

    fn temp_store(name: &str) -> Arc<IpStore> {
        let dir = std::env::temp_dir().join("ipgate-relay-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        Arc::new(IpStore::open(path).unwrap())
    }

    /// Bind an upstream listener and a relay routed at it, both on
    /// ephemeral ports; returns the relay's listening address plus the
    /// upstream listener.
    async fn start_relay(store: Arc<IpStore>) -> (SocketAddr, TcpListener) {
        let upstream = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let route = RelayRoute {
            outbound_port: 0,
            upstream_addr: LOCALHOST,
            upstream_port: upstream.local_addr().unwrap().port(),
        };
        let relay = Relay::new(route, store);
        let listener = relay.bind().await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(relay.run(listener));
        (SocketAddr::V4(SocketAddrV4::new(LOCALHOST, port)), upstream)
    }

    #[tokio::test]
    async fn ping_pong_end_to_end() {
        let store = temp_store("ping-pong");
        store.add(LOCALHOST, None).unwrap();
        let (relay_addr, upstream) = start_relay(store).await;

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        client.write_all(b"PING").await.unwrap();

        let (mut service, _) = upstream.accept().await.unwrap();
        let mut req = [0u8; 4];
        service.read_exact(&mut req).await.unwrap();
        assert_eq!(&req, b"PING");
        service.write_all(b"PONG").await.unwrap();

        let mut resp = [0u8; 4];
        client.read_exact(&mut resp).await.unwrap();
        assert_eq!(&resp, b"PONG");
    }

    #[tokio::test]
    async fn unauthorized_client_gets_nothing() {
        let store = temp_store("unauthorized");
        let (relay_addr, upstream) = start_relay(store).await;

        let mut client = TcpStream::connect(relay_addr).await.unwrap();
        let _ = client.write_all(b"sneaky").await;

        // The connection must close without a byte ever reaching upstream.
        let mut resp = [0u8; 1];
        match timeout(Duration::from_secs(2), client.read(&mut resp)).await {
            Ok(Ok(0)) | Ok(Err(_)) => {}
            other => panic!("expected closed connection, got {other:?}"),
        }
        assert!(
            timeout(Duration::from_millis(200), upstream.accept())
                .await
                .is_err(),
            "upstream saw a connection from an unauthorized client"
        );
    }

    #[tokio::test]
    async fn bulk_transfer_preserves_bytes_both_ways() {
        let store = temp_store("bulk");
        store.add(LOCALHOST, None).unwrap();
        let (relay_addr, upstream) = start_relay(store).await;

        // Upstream echoes everything back.
        tokio::spawn(async move {
            let (mut service, _) = upstream.accept().await.unwrap();
            let (mut rd, mut wr) = service.split();
            let _ = tokio::io::copy(&mut rd, &mut wr).await;
        });

        let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();
        let mut client = TcpStream::connect(relay_addr).await.unwrap();

        let expected = payload.clone();
        let (mut crd, mut cwr) = client.split();
        let write = async {
            cwr.write_all(&payload).await.unwrap();
        };
        let read = async {
            let mut echoed = vec![0u8; expected.len()];
            crd.read_exact(&mut echoed).await.unwrap();
            echoed
        };
        let ((), echoed) = tokio::join!(write, read);
        assert_eq!(echoed, expected);
    }

    /// Connect a socket pair through an ephemeral listener; the accepted
    /// peer is kept open but silent.
    async fn silent_pair(listener: &TcpListener) -> (TcpStream, TcpStream) {
        let connected = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (accepted, _) = listener.accept().await.unwrap();
        (connected, accepted)
    }

    #[tokio::test]
    async fn idle_session_terminates() {
        // Drive the glue loop directly with a short idle limit and two
        // peers that stay open but never send; it must end promptly
        // without spinning.
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let (side1, _peer1) = silent_pair(&listener).await;
        let (side2, _peer2) = silent_pair(&listener).await;

        let result = timeout(
            Duration::from_secs(2),
            glue(side1, side2, Duration::from_millis(100)),
        )
        .await;
        assert!(result.is_ok(), "glue loop did not honor the idle deadline");
    }
}
