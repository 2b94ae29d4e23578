//! Bus payload shapes for the four State Server operations (§4.2), carried
//! as a `DataMessage` addressed to [`otp_proto::ids::STATESERVER_CHANNEL`].
//!
//! These are internal-only (never seen by a game client), so they live
//! next to the State Server rather than in `otp-proto`: nothing outside
//! this process needs to decode them today, and a future multi-process
//! split can lift this module up unchanged.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use otp_proto::{DoId, Value, WireError, ZoneId};

use otp_proto::codes::{
    STATESERVER_OBJECT_DELETE_RAM, STATESERVER_OBJECT_GENERATE_WITH_REQUIRED_OTHER,
    STATESERVER_OBJECT_SET_ZONE, STATESERVER_OBJECT_UPDATE_FIELD,
};

#[derive(Debug, Clone, PartialEq)]
pub enum StateServerMessage {
    GenerateWithRequiredOther {
        parent_id: DoId,
        zone_id: ZoneId,
        class_id: u16,
        do_id: DoId,
        fields: Vec<(u16, Value)>,
    },
    DeleteRam {
        do_id: DoId,
    },
    SetZone {
        do_id: DoId,
        parent_id: DoId,
        zone_id: ZoneId,
    },
    UpdateField {
        do_id: DoId,
        field_id: u16,
        args: Vec<Value>,
    },
}

impl StateServerMessage {
    pub fn code(&self) -> u16 {
        match self {
            StateServerMessage::GenerateWithRequiredOther { .. } => {
                STATESERVER_OBJECT_GENERATE_WITH_REQUIRED_OTHER
            }
            StateServerMessage::DeleteRam { .. } => STATESERVER_OBJECT_DELETE_RAM,
            StateServerMessage::SetZone { .. } => STATESERVER_OBJECT_SET_ZONE,
            StateServerMessage::UpdateField { .. } => STATESERVER_OBJECT_UPDATE_FIELD,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        match self {
            StateServerMessage::GenerateWithRequiredOther {
                parent_id,
                zone_id,
                class_id,
                do_id,
                fields,
            } => {
                out.put_u32_le(*parent_id);
                out.put_u32_le(*zone_id);
                out.put_u16_le(*class_id);
                out.put_u32_le(*do_id);
                out.put_u16_le(fields.len() as u16);
                for (id, value) in fields {
                    out.put_u16_le(*id);
                    value.encode(&mut out);
                }
            }
            StateServerMessage::DeleteRam { do_id } => out.put_u32_le(*do_id),
            StateServerMessage::SetZone {
                do_id,
                parent_id,
                zone_id,
            } => {
                out.put_u32_le(*do_id);
                out.put_u32_le(*parent_id);
                out.put_u32_le(*zone_id);
            }
            StateServerMessage::UpdateField {
                do_id,
                field_id,
                args,
            } => {
                out.put_u32_le(*do_id);
                out.put_u16_le(*field_id);
                out.put_u16_le(args.len() as u16);
                for arg in args {
                    arg.encode(&mut out);
                }
            }
        }
        out.freeze()
    }

    pub fn decode(code: u16, mut buf: Bytes) -> Result<Self, WireError> {
        Ok(match code {
            STATESERVER_OBJECT_GENERATE_WITH_REQUIRED_OTHER => {
                require(&buf, 16)?;
                let parent_id = buf.get_u32_le();
                let zone_id = buf.get_u32_le();
                let class_id = buf.get_u16_le();
                let do_id = buf.get_u32_le();
                let count = buf.get_u16_le() as usize;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    require(&buf, 2)?;
                    let id = buf.get_u16_le();
                    fields.push((id, Value::decode(&mut buf)?));
                }
                StateServerMessage::GenerateWithRequiredOther {
                    parent_id,
                    zone_id,
                    class_id,
                    do_id,
                    fields,
                }
            }
            STATESERVER_OBJECT_DELETE_RAM => {
                require(&buf, 4)?;
                StateServerMessage::DeleteRam {
                    do_id: buf.get_u32_le(),
                }
            }
            STATESERVER_OBJECT_SET_ZONE => {
                require(&buf, 12)?;
                let do_id = buf.get_u32_le();
                let parent_id = buf.get_u32_le();
                let zone_id = buf.get_u32_le();
                StateServerMessage::SetZone {
                    do_id,
                    parent_id,
                    zone_id,
                }
            }
            STATESERVER_OBJECT_UPDATE_FIELD => {
                require(&buf, 8)?;
                let do_id = buf.get_u32_le();
                let field_id = buf.get_u16_le();
                let count = buf.get_u16_le() as usize;
                let mut args = Vec::with_capacity(count);
                for _ in 0..count {
                    args.push(Value::decode(&mut buf)?);
                }
                StateServerMessage::UpdateField {
                    do_id,
                    field_id,
                    args,
                }
            }
            other => return Err(WireError::UnknownMessageCode(other)),
        })
    }
}

fn require(buf: &Bytes, n: usize) -> Result<(), WireError> {
    if buf.len() < n {
        Err(WireError::Truncated {
            expected: n,
            got: buf.len(),
        })
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_round_trips() {
        let msg = StateServerMessage::GenerateWithRequiredOther {
            parent_id: 2000,
            zone_id: 2100,
            class_id: 2,
            do_id: 10_000_001,
            fields: vec![(1, Value::Str("Mickey".into()))],
        };
        let decoded = StateServerMessage::decode(msg.code(), msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn update_field_round_trips() {
        let msg = StateServerMessage::UpdateField {
            do_id: 10_000_001,
            field_id: 8,
            args: vec![Value::Str("Hi!".into())],
        };
        let decoded = StateServerMessage::decode(msg.code(), msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }
}
