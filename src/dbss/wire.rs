//! Bus payload shapes for the Database Server's seven RPCs (§4.4), carried
//! as a `DataMessage` addressed to [`otp_proto::ids::DBSERVER_CHANNEL`].
//!
//! Requests and their `_RESP` replies share one enum: both directions are
//! plain bus payloads distinguished only by `code`, same as the rest of the
//! internal vocabulary in `otp_proto::codes`. `SET_STORED_VALUES` has no
//! reply variant: the wire has no `_RESP` code for it (§4.4 "fire and
//! forget"), matching `otp_proto::codes`'s asymmetry there.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use otp_proto::{DoId, Value, WireError};

use otp_proto::codes::{
    DBSERVER_CREATE_STORED_OBJECT, DBSERVER_CREATE_STORED_OBJECT_RESP, DBSERVER_GET_ESTATE,
    DBSERVER_GET_ESTATE_RESP, DBSERVER_GET_STORED_VALUES, DBSERVER_GET_STORED_VALUES_RESP,
    DBSERVER_MAKE_FRIENDS, DBSERVER_MAKE_FRIENDS_RESP, DBSERVER_REQUEST_SECRET,
    DBSERVER_REQUEST_SECRET_RESP, DBSERVER_SET_STORED_VALUES, DBSERVER_SUBMIT_SECRET,
    DBSERVER_SUBMIT_SECRET_RESP,
};

#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseServerMessage {
    CreateStoredObject {
        context: u32,
        dclass_id: u16,
        fields: Vec<(u16, Value)>,
    },
    CreateStoredObjectResp {
        context: u32,
        do_id: DoId,
    },
    GetStoredValues {
        context: u32,
        do_id: DoId,
        field_ids: Vec<u16>,
    },
    GetStoredValuesResp {
        context: u32,
        do_id: DoId,
        success: bool,
        /// `None` for a requested field the object does not have set.
        fields: Vec<(u16, Option<Value>)>,
    },
    SetStoredValues {
        do_id: DoId,
        fields: Vec<(u16, Value)>,
    },
    GetEstate {
        context: u32,
        avatar_id: DoId,
    },
    GetEstateResp {
        context: u32,
        estate_do_id: DoId,
        house_ids: [DoId; 6],
        avatar_ids: [DoId; 6],
        pet_ids: [DoId; 6],
    },
    MakeFriends {
        context: u32,
        avatar_a: DoId,
        avatar_b: DoId,
        flags: u32,
    },
    MakeFriendsResp {
        context: u32,
        success: bool,
    },
    RequestSecret {
        context: u32,
        avatar_id: DoId,
    },
    RequestSecretResp {
        context: u32,
        response_code: u8,
        code: String,
    },
    SubmitSecret {
        context: u32,
        requester_id: DoId,
        code: String,
    },
    SubmitSecretResp {
        context: u32,
        response_code: u8,
    },
}

impl DatabaseServerMessage {
    pub fn code(&self) -> u16 {
        use DatabaseServerMessage::*;
        match self {
            CreateStoredObject { .. } => DBSERVER_CREATE_STORED_OBJECT,
            CreateStoredObjectResp { .. } => DBSERVER_CREATE_STORED_OBJECT_RESP,
            GetStoredValues { .. } => DBSERVER_GET_STORED_VALUES,
            GetStoredValuesResp { .. } => DBSERVER_GET_STORED_VALUES_RESP,
            SetStoredValues { .. } => DBSERVER_SET_STORED_VALUES,
            GetEstate { .. } => DBSERVER_GET_ESTATE,
            GetEstateResp { .. } => DBSERVER_GET_ESTATE_RESP,
            MakeFriends { .. } => DBSERVER_MAKE_FRIENDS,
            MakeFriendsResp { .. } => DBSERVER_MAKE_FRIENDS_RESP,
            RequestSecret { .. } => DBSERVER_REQUEST_SECRET,
            RequestSecretResp { .. } => DBSERVER_REQUEST_SECRET_RESP,
            SubmitSecret { .. } => DBSERVER_SUBMIT_SECRET,
            SubmitSecretResp { .. } => DBSERVER_SUBMIT_SECRET_RESP,
        }
    }

    pub fn encode(&self) -> Bytes {
        use DatabaseServerMessage::*;
        let mut out = BytesMut::new();
        match self {
            CreateStoredObject {
                context,
                dclass_id,
                fields,
            } => {
                out.put_u32_le(*context);
                out.put_u16_le(*dclass_id);
                out.put_u16_le(fields.len() as u16);
                for (id, value) in fields {
                    out.put_u16_le(*id);
                    value.encode(&mut out);
                }
            }
            CreateStoredObjectResp { context, do_id } => {
                out.put_u32_le(*context);
                out.put_u32_le(*do_id);
            }
            GetStoredValues {
                context,
                do_id,
                field_ids,
            } => {
                out.put_u32_le(*context);
                out.put_u32_le(*do_id);
                out.put_u16_le(field_ids.len() as u16);
                for id in field_ids {
                    out.put_u16_le(*id);
                }
            }
            GetStoredValuesResp {
                context,
                do_id,
                success,
                fields,
            } => {
                out.put_u32_le(*context);
                out.put_u32_le(*do_id);
                out.put_u8(*success as u8);
                out.put_u16_le(fields.len() as u16);
                for (id, value) in fields {
                    out.put_u16_le(*id);
                    match value {
                        Some(v) => {
                            out.put_u8(1);
                            v.encode(&mut out);
                        }
                        None => out.put_u8(0),
                    }
                }
            }
            SetStoredValues { do_id, fields } => {
                out.put_u32_le(*do_id);
                out.put_u16_le(fields.len() as u16);
                for (id, value) in fields {
                    out.put_u16_le(*id);
                    value.encode(&mut out);
                }
            }
            GetEstate { context, avatar_id } => {
                out.put_u32_le(*context);
                out.put_u32_le(*avatar_id);
            }
            GetEstateResp {
                context,
                estate_do_id,
                house_ids,
                avatar_ids,
                pet_ids,
            } => {
                out.put_u32_le(*context);
                out.put_u32_le(*estate_do_id);
                for id in house_ids {
                    out.put_u32_le(*id);
                }
                for id in avatar_ids {
                    out.put_u32_le(*id);
                }
                for id in pet_ids {
                    out.put_u32_le(*id);
                }
            }
            MakeFriends {
                context,
                avatar_a,
                avatar_b,
                flags,
            } => {
                out.put_u32_le(*context);
                out.put_u32_le(*avatar_a);
                out.put_u32_le(*avatar_b);
                out.put_u32_le(*flags);
            }
            MakeFriendsResp { context, success } => {
                out.put_u32_le(*context);
                out.put_u8(*success as u8);
            }
            RequestSecret { context, avatar_id } => {
                out.put_u32_le(*context);
                out.put_u32_le(*avatar_id);
            }
            RequestSecretResp {
                context,
                response_code,
                code,
            } => {
                out.put_u32_le(*context);
                out.put_u8(*response_code);
                put_string(&mut out, code);
            }
            SubmitSecret {
                context,
                requester_id,
                code,
            } => {
                out.put_u32_le(*context);
                out.put_u32_le(*requester_id);
                put_string(&mut out, code);
            }
            SubmitSecretResp {
                context,
                response_code,
            } => {
                out.put_u32_le(*context);
                out.put_u8(*response_code);
            }
        }
        out.freeze()
    }

    pub fn decode(code: u16, mut buf: Bytes) -> Result<Self, WireError> {
        Ok(match code {
            DBSERVER_CREATE_STORED_OBJECT => {
                require(&buf, 8)?;
                let context = buf.get_u32_le();
                let dclass_id = buf.get_u16_le();
                let count = buf.get_u16_le() as usize;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    require(&buf, 2)?;
                    let id = buf.get_u16_le();
                    fields.push((id, Value::decode(&mut buf)?));
                }
                DatabaseServerMessage::CreateStoredObject {
                    context,
                    dclass_id,
                    fields,
                }
            }
            DBSERVER_CREATE_STORED_OBJECT_RESP => {
                require(&buf, 8)?;
                DatabaseServerMessage::CreateStoredObjectResp {
                    context: buf.get_u32_le(),
                    do_id: buf.get_u32_le(),
                }
            }
            DBSERVER_GET_STORED_VALUES => {
                require(&buf, 10)?;
                let context = buf.get_u32_le();
                let do_id = buf.get_u32_le();
                let count = buf.get_u16_le() as usize;
                let mut field_ids = Vec::with_capacity(count);
                for _ in 0..count {
                    require(&buf, 2)?;
                    field_ids.push(buf.get_u16_le());
                }
                DatabaseServerMessage::GetStoredValues {
                    context,
                    do_id,
                    field_ids,
                }
            }
            DBSERVER_GET_STORED_VALUES_RESP => {
                require(&buf, 11)?;
                let context = buf.get_u32_le();
                let do_id = buf.get_u32_le();
                let success = buf.get_u8() != 0;
                let count = buf.get_u16_le() as usize;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    require(&buf, 3)?;
                    let id = buf.get_u16_le();
                    let present = buf.get_u8() != 0;
                    let value = if present { Some(Value::decode(&mut buf)?) } else { None };
                    fields.push((id, value));
                }
                DatabaseServerMessage::GetStoredValuesResp {
                    context,
                    do_id,
                    success,
                    fields,
                }
            }
            DBSERVER_SET_STORED_VALUES => {
                require(&buf, 6)?;
                let do_id = buf.get_u32_le();
                let count = buf.get_u16_le() as usize;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    require(&buf, 2)?;
                    let id = buf.get_u16_le();
                    fields.push((id, Value::decode(&mut buf)?));
                }
                DatabaseServerMessage::SetStoredValues { do_id, fields }
            }
            DBSERVER_GET_ESTATE => {
                require(&buf, 8)?;
                DatabaseServerMessage::GetEstate {
                    context: buf.get_u32_le(),
                    avatar_id: buf.get_u32_le(),
                }
            }
            DBSERVER_GET_ESTATE_RESP => {
                require(&buf, 8 + 4 * 18)?;
                let context = buf.get_u32_le();
                let estate_do_id = buf.get_u32_le();
                let mut house_ids = [0u32; 6];
                for slot in &mut house_ids {
                    *slot = buf.get_u32_le();
                }
                let mut avatar_ids = [0u32; 6];
                for slot in &mut avatar_ids {
                    *slot = buf.get_u32_le();
                }
                let mut pet_ids = [0u32; 6];
                for slot in &mut pet_ids {
                    *slot = buf.get_u32_le();
                }
                DatabaseServerMessage::GetEstateResp {
                    context,
                    estate_do_id,
                    house_ids,
                    avatar_ids,
                    pet_ids,
                }
            }
            DBSERVER_MAKE_FRIENDS => {
                require(&buf, 16)?;
                DatabaseServerMessage::MakeFriends {
                    context: buf.get_u32_le(),
                    avatar_a: buf.get_u32_le(),
                    avatar_b: buf.get_u32_le(),
                    flags: buf.get_u32_le(),
                }
            }
            DBSERVER_MAKE_FRIENDS_RESP => {
                require(&buf, 5)?;
                DatabaseServerMessage::MakeFriendsResp {
                    context: buf.get_u32_le(),
                    success: buf.get_u8() != 0,
                }
            }
            DBSERVER_REQUEST_SECRET => {
                require(&buf, 8)?;
                DatabaseServerMessage::RequestSecret {
                    context: buf.get_u32_le(),
                    avatar_id: buf.get_u32_le(),
                }
            }
            DBSERVER_REQUEST_SECRET_RESP => {
                require(&buf, 5)?;
                let context = buf.get_u32_le();
                let response_code = buf.get_u8();
                let code = take_string(&mut buf)?;
                DatabaseServerMessage::RequestSecretResp {
                    context,
                    response_code,
                    code,
                }
            }
            DBSERVER_SUBMIT_SECRET => {
                require(&buf, 8)?;
                let context = buf.get_u32_le();
                let requester_id = buf.get_u32_le();
                let code = take_string(&mut buf)?;
                DatabaseServerMessage::SubmitSecret {
                    context,
                    requester_id,
                    code,
                }
            }
            DBSERVER_SUBMIT_SECRET_RESP => {
                require(&buf, 5)?;
                DatabaseServerMessage::SubmitSecretResp {
                    context: buf.get_u32_le(),
                    response_code: buf.get_u8(),
                }
            }
            other => return Err(WireError::UnknownMessageCode(other)),
        })
    }
}

fn put_string(out: &mut BytesMut, s: &str) {
    out.put_u16_le(s.len() as u16);
    out.extend_from_slice(s.as_bytes());
}

fn take_string(buf: &mut Bytes) -> Result<String, WireError> {
    require(buf, 2)?;
    let len = buf.get_u16_le() as usize;
    require(buf, len)?;
    let bytes = buf.split_to(len);
    String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
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
    fn create_stored_object_round_trips() {
        let msg = DatabaseServerMessage::CreateStoredObject {
            context: 7,
            dclass_id: 2,
            fields: vec![(1, Value::Str("Mickey".into()))],
        };
        assert_eq!(DatabaseServerMessage::decode(msg.code(), msg.encode()).unwrap(), msg);
    }

    #[test]
    fn get_stored_values_resp_round_trips_with_missing_field() {
        let msg = DatabaseServerMessage::GetStoredValuesResp {
            context: 1,
            do_id: 10_000_001,
            success: true,
            fields: vec![(1, Some(Value::Str("Mickey".into()))), (2, None)],
        };
        assert_eq!(DatabaseServerMessage::decode(msg.code(), msg.encode()).unwrap(), msg);
    }

    #[test]
    fn get_estate_resp_round_trips() {
        let msg = DatabaseServerMessage::GetEstateResp {
            context: 3,
            estate_do_id: 10_000_010,
            house_ids: [10_000_011, 10_000_012, 0, 0, 0, 0],
            avatar_ids: [10_000_001, 0, 0, 0, 0, 0],
            pet_ids: [0, 0, 0, 0, 0, 0],
        };
        assert_eq!(DatabaseServerMessage::decode(msg.code(), msg.encode()).unwrap(), msg);
    }

    #[test]
    fn request_secret_resp_round_trips() {
        let msg = DatabaseServerMessage::RequestSecretResp {
            context: 4,
            response_code: 1,
            code: "abc def".into(),
        };
        assert_eq!(DatabaseServerMessage::decode(msg.code(), msg.encode()).unwrap(), msg);
    }

    #[test]
    fn submit_secret_round_trips() {
        let msg = DatabaseServerMessage::SubmitSecret {
            context: 5,
            requester_id: 10_000_002,
            code: "abc def".into(),
        };
        assert_eq!(DatabaseServerMessage::decode(msg.code(), msg.encode()).unwrap(), msg);
    }
}
