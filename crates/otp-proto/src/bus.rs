//! Message Director wire format (spec §4.1).
//!
//! Every framed datagram a bus peer sends is either a control message
//! (subscription management) or a data message (addressed, routed
//! payload). Spec §4.1 fixes the data message's field layout but not how
//! a peer distinguishes a control message from a data message on the
//! wire; this port resolves that open question with a one-byte kind tag
//! ahead of both (`0 = control, 1 = data`), recorded in DESIGN.md.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::ids::Channel;

const KIND_CONTROL: u8 = 0;
const KIND_DATA: u8 = 1;

const CONTROL_SET_CHANNEL: u8 = 1;
const CONTROL_REMOVE_CHANNEL: u8 = 2;
const CONTROL_ADD_POST_REMOVE: u8 = 3;
const CONTROL_CLEAR_POST_REMOVE: u8 = 4;

/// `numChannels:uint8, channels:uint64[], sender:uint64, code:uint16, payload:bytes`
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub channels: Vec<Channel>,
    pub sender: Channel,
    pub code: u16,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    SetChannel(Channel),
    RemoveChannel(Channel),
    /// Queue `message` to be dispatched, as if sent by this peer, when it
    /// disconnects.
    AddPostRemove(DataMessage),
    ClearPostRemove,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusFrame {
    Control(ControlMessage),
    Data(DataMessage),
}

impl DataMessage {
    fn encode_into(&self, out: &mut BytesMut) {
        out.put_u8(self.channels.len() as u8);
        for ch in &self.channels {
            out.put_u64_le(*ch);
        }
        out.put_u64_le(self.sender);
        out.put_u16_le(self.code);
        out.put_slice(&self.payload);
    }

    fn decode_from(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.is_empty() {
            return Err(WireError::Truncated {
                expected: 1,
                got: 0,
            });
        }
        let num_channels = buf.get_u8() as usize;
        let needed = num_channels * 8 + 8 + 2;
        if buf.len() < needed {
            return Err(WireError::Truncated {
                expected: needed,
                got: buf.len(),
            });
        }
        let mut channels = Vec::with_capacity(num_channels);
        for _ in 0..num_channels {
            channels.push(buf.get_u64_le());
        }
        let sender = buf.get_u64_le();
        let code = buf.get_u16_le();
        let payload = buf.split_to(buf.len());
        Ok(DataMessage {
            channels,
            sender,
            code,
            payload,
        })
    }
}

impl BusFrame {
    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            BusFrame::Control(ControlMessage::SetChannel(ch)) => {
                out.put_u8(KIND_CONTROL);
                out.put_u8(CONTROL_SET_CHANNEL);
                out.put_u64_le(*ch);
            }
            BusFrame::Control(ControlMessage::RemoveChannel(ch)) => {
                out.put_u8(KIND_CONTROL);
                out.put_u8(CONTROL_REMOVE_CHANNEL);
                out.put_u64_le(*ch);
            }
            BusFrame::Control(ControlMessage::AddPostRemove(msg)) => {
                out.put_u8(KIND_CONTROL);
                out.put_u8(CONTROL_ADD_POST_REMOVE);
                msg.encode_into(&mut out);
            }
            BusFrame::Control(ControlMessage::ClearPostRemove) => {
                out.put_u8(KIND_CONTROL);
                out.put_u8(CONTROL_CLEAR_POST_REMOVE);
            }
            BusFrame::Data(msg) => {
                out.put_u8(KIND_DATA);
                msg.encode_into(&mut out);
            }
        }
        out.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, WireError> {
        if buf.is_empty() {
            return Err(WireError::Truncated {
                expected: 1,
                got: 0,
            });
        }
        let kind = buf.get_u8();
        match kind {
            KIND_CONTROL => {
                if buf.is_empty() {
                    return Err(WireError::Truncated {
                        expected: 1,
                        got: 0,
                    });
                }
                let control_code = buf.get_u8();
                Ok(BusFrame::Control(match control_code {
                    CONTROL_SET_CHANNEL => {
                        ControlMessage::SetChannel(take_channel(&mut buf)?)
                    }
                    CONTROL_REMOVE_CHANNEL => {
                        ControlMessage::RemoveChannel(take_channel(&mut buf)?)
                    }
                    CONTROL_ADD_POST_REMOVE => {
                        ControlMessage::AddPostRemove(DataMessage::decode_from(&mut buf)?)
                    }
                    CONTROL_CLEAR_POST_REMOVE => ControlMessage::ClearPostRemove,
                    other => return Err(WireError::UnknownMessageCode(other as u16)),
                }))
            }
            KIND_DATA => Ok(BusFrame::Data(DataMessage::decode_from(&mut buf)?)),
            other => Err(WireError::UnknownMessageCode(other as u16)),
        }
    }
}

fn take_channel(buf: &mut Bytes) -> Result<Channel, WireError> {
    if buf.len() < 8 {
        return Err(WireError::Truncated {
            expected: 8,
            got: buf.len(),
        });
    }
    Ok(buf.get_u64_le())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_message_round_trips() {
        let msg = DataMessage {
            channels: vec![20_100_000, 4003],
            sender: 10_000_001,
            code: 42,
            payload: Bytes::from_static(b"abc"),
        };
        let frame = BusFrame::Data(msg.clone());
        let decoded = BusFrame::decode(frame.encode()).unwrap();
        assert_eq!(decoded, BusFrame::Data(msg));
    }

    #[test]
    fn control_set_channel_round_trips() {
        let frame = BusFrame::Control(ControlMessage::SetChannel(4003));
        let decoded = BusFrame::decode(frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn control_add_post_remove_round_trips() {
        let inner = DataMessage {
            channels: vec![1],
            sender: 2,
            code: 3,
            payload: Bytes::new(),
        };
        let frame = BusFrame::Control(ControlMessage::AddPostRemove(inner));
        let decoded = BusFrame::decode(frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }
}
