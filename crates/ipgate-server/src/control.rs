//! Control-plane server: accepts command connections and mutates the
//! whitelist store.
//!
//! Each accepted control connection is serviced on its own task — safe
//! because the [`IpStore`] is internally synchronized — and is read as a
//! stream of `[tag][fixed payload]` commands (see [`ipgate_core::proto`]).
//! A short, zero, or failed read ends that session only; the accept loop
//! keeps running for the life of the process.

use crate::store::{unix_now, IpStore};
use ipgate_core::proto::{Authenticate, AUTHENTICATE_PAYLOAD_LEN, TAG_AUTHENTICATE};
use std::io;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub struct ControlServer {
    port: u16,
    store: Arc<IpStore>,
}

impl ControlServer {
    pub fn new(port: u16, store: Arc<IpStore>) -> Self {
        Self { port, store }
    }

    /// Bind the control listener. A failure here is fatal to the process.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        let listener = TcpListener::bind(("0.0.0.0", self.port)).await?;
        info!(port = self.port, "control server listening");
        Ok(listener)
    }

    /// Accept loop; never returns during normal operation.
    pub async fn run(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(peer = %peer, "control connection accepted");
                    let store = Arc::clone(&self.store);
                    tokio::spawn(async move {
                        match serve(stream, store).await {
                            Ok(()) => debug!(peer = %peer, "control session closed"),
                            Err(e) => {
                                debug!(peer = %peer, error = %e, "control session ended")
                            }
                        }
                    });
                }
                Err(e) => warn!(error = %e, "control accept failed"),
            }
        }
    }
}

/// Service one control connection until the peer closes it or a read
/// fails. A clean close is only recognized at a command boundary; an EOF
/// mid-payload is a short read and surfaces as an error.
async fn serve(mut stream: TcpStream, store: Arc<IpStore>) -> io::Result<()> {
    let mut tag = [0u8; 1];
    let mut payload = [0u8; AUTHENTICATE_PAYLOAD_LEN];
    loop {
        if stream.read(&mut tag).await? == 0 {
            return Ok(());
        }
        match tag[0] {
            TAG_AUTHENTICATE => {
                stream.read_exact(&mut payload).await?;
                let Ok(cmd) = Authenticate::decode(&payload) else {
                    continue;
                };
                let expires_at = unix_now() + i64::from(cmd.seconds);
                info!(ip = %cmd.ip, seconds = cmd.seconds, "whitelisting address");
                if let Err(e) = store.add(cmd.ip, Some(expires_at)) {
                    // In-memory state stays authoritative; keep serving.
                    warn!(ip = %cmd.ip, error = %e, "whitelist entry not persisted");
                }
            }
            other => {
                // No length framing: there is no payload to skip, the next
                // byte is read as a new tag.
                debug!(tag = other, "unrecognized control command tag");
            }
        }
    }
}
