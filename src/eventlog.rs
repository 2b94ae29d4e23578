//! Writer side of the event-log UDP protocol (spec §6, SPEC_FULL.md §7).
//!
//! The daemon consuming these datagrams is out of scope; this module only
//! has to produce well-formed ones and hand them to a socket, the same
//! narrow "writer side only" boundary the teacher draws around S2S sync
//! for servers this build does not implement.

use std::net::SocketAddr;

use otp_proto::eventlog::{EventBody, EventDatagram};
use otp_proto::Channel;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// A `UdpSocket` wrapper that serialises [`EventDatagram`]s and fires them
/// at a fixed destination, logging (but not failing the caller on) send
/// errors.
pub struct UdpEventLogger {
    socket: UdpSocket,
    destination: SocketAddr,
    server_type: u16,
}

impl UdpEventLogger {
    /// Bind an ephemeral local socket and target `destination`.
    pub async fn connect(destination: SocketAddr, server_type: u16) -> std::io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            destination,
            server_type,
        })
    }

    async fn send(&self, channel: Channel, body: EventBody) {
        let datagram = EventDatagram {
            server_type: self.server_type,
            channel,
            body,
        };
        debug!(line = %datagram.to_log_line(), "event-log");
        if let Err(err) = self.socket.send_to(&datagram.encode(), self.destination).await {
            warn!(error = %err, "failed to write event-log datagram");
        }
    }

    pub async fn server_event(&self, channel: Channel, event: &str, who: &str, description: &str) {
        self.send(
            channel,
            EventBody::ServerEvent {
                event: event.to_string(),
                who: who.to_string(),
                description: description.to_string(),
            },
        )
        .await;
    }

    pub async fn status(&self, channel: Channel, who: &str, av_count: u32, obj_count: u32) {
        self.send(
            channel,
            EventBody::Status {
                who: who.to_string(),
                av_count,
                obj_count,
            },
        )
        .await;
    }

    pub async fn status_v2(
        &self,
        channel: Channel,
        who: &str,
        av_count: u32,
        obj_count: u32,
        ping_channel: Channel,
    ) {
        self.send(
            channel,
            EventBody::StatusV2 {
                who: who.to_string(),
                av_count,
                obj_count,
                ping_channel,
            },
        )
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_event_reaches_a_loopback_listener() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let logger = UdpEventLogger::connect(addr, 1).await.unwrap();

        logger.server_event(20_100_000, "generate", "stateserver", "doId=10000001").await;

        let mut buf = [0u8; 256];
        let (n, _) = listener.recv_from(&mut buf).await.unwrap();
        let decoded = EventDatagram::decode(bytes::Bytes::copy_from_slice(&buf[..n])).unwrap();
        assert_eq!(decoded.channel, 20_100_000);
    }
}
