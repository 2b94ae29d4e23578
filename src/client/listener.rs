//! TCP listener that accepts game-client connections (§4.5, CA port 6667).
//!
//! Grounded on `md::listener::run_md_listener`: bind once, accept forever,
//! spawn one task per connection. Each connection owns a `Framed` socket
//! half for reads and an `mpsc` outbox the agent's handlers push encoded
//! `ClientMessage`s onto for writes, so a synchronous fan-out never blocks
//! on this connection's own socket.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use otp_proto::client_wire::ClientMessage;
use otp_proto::FrameCodec;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, warn};

use super::{ClientAgent, Outcome};

/// Bind `addr` and accept game-client connections forever.
pub async fn run_ca_listener(addr: SocketAddr, agent: Arc<ClientAgent>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Client Agent listening");
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let agent = Arc::clone(&agent);
                tokio::spawn(async move {
                    run_connection(stream, peer_addr, agent).await;
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept game-client connection");
            }
        }
    }
}

#[instrument(skip(stream, agent), fields(%peer_addr))]
async fn run_connection(stream: TcpStream, peer_addr: SocketAddr, agent: Arc<ClientAgent>) {
    let mut framed = Framed::new(stream, FrameCodec::default());
    let (outbox_tx, mut outbox_rx) = tokio::sync::mpsc::channel::<Bytes>(256);
    let (conn_id, _session) = agent.register(outbox_tx);
    info!(conn_id, "client connected");

    loop {
        tokio::select! {
            outgoing = outbox_rx.recv() => {
                let Some(frame) = outgoing else {
                    break;
                };
                if framed.send(frame).await.is_err() {
                    break;
                }
            }
            incoming = framed.next() => {
                let Some(incoming) = incoming else {
                    break;
                };
                let bytes = match incoming {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(conn_id, error = %e, "malformed frame from client");
                        break;
                    }
                };
                let msg = match ClientMessage::decode(bytes) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(conn_id, error = %e, "unreadable client message, disconnecting (code 200)");
                        break;
                    }
                };
                match agent.handle_message(conn_id, msg).await {
                    Ok(Outcome::Continue) => {}
                    Ok(Outcome::Close) => break,
                    Err(err) => {
                        if let Some(code) = err.disconnect_code() {
                            debug!(conn_id, error = %err, code, "disconnecting client");
                            let eject = ClientMessage::Eject {
                                disconnect_code: code,
                                reason: err.to_string(),
                            };
                            let _ = framed.send(eject.encode()).await;
                            break;
                        } else {
                            warn!(conn_id, error = %err, "dropping client message");
                        }
                    }
                }
            }
        }
    }

    agent.deregister(conn_id).await;
    info!(conn_id, "client disconnected");
}
