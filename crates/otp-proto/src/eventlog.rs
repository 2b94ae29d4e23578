//! Event-log UDP datagram format (spec §6).
//!
//! `uint16 length, uint16 messageType, uint16 serverType, uint32 channel`,
//! then a variant body keyed by `messageType`. The daemon that consumes
//! these datagrams is out of scope (spec §1); this module only has to
//! produce well-formed ones.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::ids::Channel;

pub const MSG_TYPE_SERVER_EVENT: u16 = 1;
pub const MSG_TYPE_STATUS: u16 = 2;
pub const MSG_TYPE_STATUS_V2: u16 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    /// `(event, who, description)`, possibly reassembled across datagrams
    /// when the declared `length` exceeds what a single datagram carried.
    ServerEvent {
        event: String,
        who: String,
        description: String,
    },
    Status { who: String, av_count: u32, obj_count: u32 },
    StatusV2 {
        who: String,
        av_count: u32,
        obj_count: u32,
        ping_channel: Channel,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventDatagram {
    pub server_type: u16,
    pub channel: Channel,
    pub body: EventBody,
}

fn put_string(out: &mut BytesMut, s: &str) {
    out.put_u16_le(s.len() as u16);
    out.put_slice(s.as_bytes());
}

fn take_string(buf: &mut Bytes) -> Result<String, WireError> {
    if buf.len() < 2 {
        return Err(WireError::Truncated {
            expected: 2,
            got: buf.len(),
        });
    }
    let len = buf.get_u16_le() as usize;
    if buf.len() < len {
        return Err(WireError::Truncated {
            expected: len,
            got: buf.len(),
        });
    }
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
}

impl EventDatagram {
    /// Emit a pipe-delimited textual line, the format the writer logs one
    /// of per logical event.
    pub fn to_log_line(&self) -> String {
        match &self.body {
            EventBody::ServerEvent {
                event,
                who,
                description,
            } => format!(
                "{}|{}|{}|{}|{}",
                self.server_type, self.channel, event, who, description
            ),
            EventBody::Status {
                who,
                av_count,
                obj_count,
            } => format!(
                "{}|{}|status|{}|{}|{}",
                self.server_type, self.channel, who, av_count, obj_count
            ),
            EventBody::StatusV2 {
                who,
                av_count,
                obj_count,
                ping_channel,
            } => format!(
                "{}|{}|status2|{}|{}|{}|{}",
                self.server_type, self.channel, who, av_count, obj_count, ping_channel
            ),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut body = BytesMut::new();
        let msg_type = match &self.body {
            EventBody::ServerEvent { .. } => MSG_TYPE_SERVER_EVENT,
            EventBody::Status { .. } => MSG_TYPE_STATUS,
            EventBody::StatusV2 { .. } => MSG_TYPE_STATUS_V2,
        };
        body.put_u16_le(msg_type);
        body.put_u16_le(self.server_type);
        body.put_u32_le(self.channel);
        match &self.body {
            EventBody::ServerEvent {
                event,
                who,
                description,
            } => {
                put_string(&mut body, event);
                put_string(&mut body, who);
                put_string(&mut body, description);
            }
            EventBody::Status {
                who,
                av_count,
                obj_count,
            } => {
                put_string(&mut body, who);
                body.put_u32_le(*av_count);
                body.put_u32_le(*obj_count);
            }
            EventBody::StatusV2 {
                who,
                av_count,
                obj_count,
                ping_channel,
            } => {
                put_string(&mut body, who);
                body.put_u32_le(*av_count);
                body.put_u32_le(*obj_count);
                body.put_u64_le(*ping_channel);
            }
        }

        let mut out = BytesMut::with_capacity(2 + body.len());
        out.put_u16_le(body.len() as u16);
        out.put_slice(&body);
        out.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, WireError> {
        if buf.len() < 2 {
            return Err(WireError::Truncated {
                expected: 2,
                got: buf.len(),
            });
        }
        let declared_len = buf.get_u16_le() as usize;
        if buf.len() < declared_len {
            return Err(WireError::Truncated {
                expected: declared_len,
                got: buf.len(),
            });
        }
        if buf.len() < 8 {
            return Err(WireError::Truncated {
                expected: 8,
                got: buf.len(),
            });
        }
        let msg_type = buf.get_u16_le();
        let server_type = buf.get_u16_le();
        let channel = buf.get_u32_le() as Channel;

        let body = match msg_type {
            MSG_TYPE_SERVER_EVENT => EventBody::ServerEvent {
                event: take_string(&mut buf)?,
                who: take_string(&mut buf)?,
                description: take_string(&mut buf)?,
            },
            MSG_TYPE_STATUS => {
                let who = take_string(&mut buf)?;
                let av_count = buf.get_u32_le();
                let obj_count = buf.get_u32_le();
                EventBody::Status {
                    who,
                    av_count,
                    obj_count,
                }
            }
            MSG_TYPE_STATUS_V2 => {
                let who = take_string(&mut buf)?;
                let av_count = buf.get_u32_le();
                let obj_count = buf.get_u32_le();
                let ping_channel = buf.get_u64_le();
                EventBody::StatusV2 {
                    who,
                    av_count,
                    obj_count,
                    ping_channel,
                }
            }
            other => return Err(WireError::UnknownMessageCode(other)),
        };

        Ok(EventDatagram {
            server_type,
            channel,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_round_trips() {
        let dg = EventDatagram {
            server_type: 1,
            channel: 20_100_000,
            body: EventBody::ServerEvent {
                event: "generate".into(),
                who: "stateserver".into(),
                description: "doId=10000001".into(),
            },
        };
        let encoded = dg.encode();
        let decoded = EventDatagram::decode(encoded).unwrap();
        assert_eq!(dg, decoded);
    }

    #[test]
    fn status_v2_round_trips() {
        let dg = EventDatagram {
            server_type: 2,
            channel: 4003,
            body: EventBody::StatusV2 {
                who: "dbss".into(),
                av_count: 3,
                obj_count: 9,
                ping_channel: 4681,
            },
        };
        let decoded = EventDatagram::decode(dg.encode()).unwrap();
        assert_eq!(dg, decoded);
    }
}
