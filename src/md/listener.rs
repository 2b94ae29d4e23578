//! TCP listener that accepts Message Director bus peers.
//!
//! Grounded on the teacher's `network::Gateway`: bind once, accept
//! forever, spawn one task per connection. Each peer's socket is framed
//! with the same length-prefixed codec the client wire uses; the frame
//! payload is a [`BusFrame`] rather than a client message.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use otp_proto::bus::BusFrame;
use otp_proto::FrameCodec;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{error, info, instrument, warn};

use super::MessageDirector;

/// Bind `addr` and accept Message Director peers forever.
pub async fn run_md_listener(addr: SocketAddr, md: Arc<MessageDirector>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Message Director listening");
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let md = Arc::clone(&md);
                tokio::spawn(async move {
                    if let Err(e) = run_peer(stream, peer_addr, md.clone()).await {
                        error!(%peer_addr, error = %e, "bus peer connection error");
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "failed to accept bus peer connection");
            }
        }
    }
}

#[instrument(skip(stream, md), fields(%peer_addr))]
async fn run_peer(
    stream: TcpStream,
    peer_addr: SocketAddr,
    md: Arc<MessageDirector>,
) -> std::io::Result<()> {
    let mut framed = Framed::new(stream, FrameCodec::default());
    let (peer_id, mut outbox) = md.add_peer();
    info!(peer_id, "bus peer connected");

    loop {
        tokio::select! {
            outgoing = outbox.recv() => {
                let Some(frame) = outgoing else {
                    break;
                };
                if framed.send(frame.encode()).await.is_err() {
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
                        warn!(peer_id, error = %e, "malformed frame from bus peer");
                        break;
                    }
                };
                let frame = match BusFrame::decode(bytes) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(peer_id, error = %e, "malformed bus frame");
                        break;
                    }
                };
                match frame {
                    BusFrame::Control(control) => md.handle_control(peer_id, control),
                    BusFrame::Data(msg) => md.route(msg, Some(peer_id)).await,
                }
            }
        }
    }

    md.remove_peer(peer_id).await;
    info!(peer_id, "bus peer disconnected");
    Ok(())
}
