//! Client-facing wire protocol (spec §6).
//!
//! Framed the same way as the bus (`FrameCodec`): a `uint16` message code
//! followed by a code-specific payload. Strings are `uint16`-length-prefixed
//! UTF-8, matching the event-log datagram's string encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::WireError;
use crate::ids::{Channel, DoId, ZoneId};
use crate::value::Value;

pub const CLIENT_HEARTBEAT: u16 = 1;
pub const CLIENT_LOGIN_2: u16 = 2;
pub const CLIENT_LOGIN_TOONTOWN: u16 = 3;
pub const CLIENT_LOGIN_RESP: u16 = 4;
pub const CLIENT_DISCONNECT: u16 = 5;
pub const CLIENT_EJECT: u16 = 6;
pub const CLIENT_GET_AVATARS: u16 = 7;
pub const CLIENT_GET_AVATARS_RESP: u16 = 8;
pub const CLIENT_CREATE_AVATAR: u16 = 9;
pub const CLIENT_CREATE_AVATAR_RESP: u16 = 10;
pub const CLIENT_SET_NAME_PATTERN: u16 = 11;
pub const CLIENT_SET_NAME_PATTERN_ANSWER: u16 = 12;
pub const CLIENT_SET_WISHNAME: u16 = 13;
pub const CLIENT_SET_WISHNAME_RESP: u16 = 14;
pub const CLIENT_DELETE_AVATAR: u16 = 15;
pub const CLIENT_DELETE_AVATAR_RESP: u16 = 16;
pub const CLIENT_SET_AVATAR: u16 = 17;
pub const CLIENT_ADD_INTEREST: u16 = 18;
pub const CLIENT_REMOVE_INTEREST: u16 = 19;
pub const CLIENT_OBJECT_UPDATE_FIELD: u16 = 20;
pub const CLIENT_OBJECT_LOCATION: u16 = 21;
pub const CLIENT_GET_FRIEND_LIST: u16 = 22;
pub const CLIENT_GET_FRIEND_LIST_RESP: u16 = 23;
pub const CLIENT_GET_FRIEND_LIST_EXTENDED: u16 = 24;
pub const CLIENT_GET_FRIEND_LIST_EXTENDED_RESP: u16 = 25;
pub const CLIENT_GET_AVATAR_DETAILS: u16 = 26;
pub const CLIENT_GET_AVATAR_DETAILS_RESP: u16 = 27;
pub const CLIENT_GET_PET_DETAILS: u16 = 28;
pub const CLIENT_GET_PET_DETAILS_RESP: u16 = 29;
pub const CLIENT_REMOVE_FRIEND: u16 = 30;
pub const CLIENT_FRIEND_ONLINE: u16 = 31;
pub const CLIENT_FRIEND_OFFLINE: u16 = 32;
/// Object creation/removal the client didn't ask for, delivered because it
/// fell into an interest zone the client already has open.
pub const CLIENT_OBJECT_GENERATE: u16 = 33;
pub const CLIENT_OBJECT_DISABLE: u16 = 34;
/// Acknowledges `CLIENT_ADD_INTEREST`/`CLIENT_REMOVE_INTEREST` once the
/// interest cache rebuild and any resulting object generates have gone out.
pub const CLIENT_DONE_INTEREST_RESP: u16 = 35;

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

/// One slot in the account's avatar list (spec §3 `CLIENT_GET_AVATARS`).
#[derive(Debug, Clone, PartialEq)]
pub struct PotentialAvatar {
    pub avatar_id: DoId,
    pub name: String,
    pub dna_string: Bytes,
    pub index: u8,
}

/// One entry in a friend list answer.
#[derive(Debug, Clone, PartialEq)]
pub struct FriendEntry {
    pub avatar_id: DoId,
    /// Only populated by the `_EXTENDED` variant (spec §9 resolves the
    /// ambiguous `CLIENT_GET_FRIEND_LIST` source behavior in favor of this
    /// richer, always-authoritative branch).
    pub name: Option<String>,
    pub dna_string: Option<Bytes>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Heartbeat,
    Login2 {
        play_token: String,
        version: String,
        hash: u32,
        token_type: u32,
        validate_download: String,
        want_magic_words: String,
    },
    LoginToontown {
        play_token: String,
        server_version: String,
        hash: u32,
        token_type: i32,
        want_magic_words: String,
    },
    /// A single merged shape for both `CLIENT_LOGIN_2` and
    /// `CLIENT_LOGIN_TOONTOWN` responses (spec §4.3 "exactly two response
    /// shapes exist, selected by request code"): the two original shapes
    /// are a strict subset/superset of each other, so this port unions
    /// their fields rather than keeping two wire codes (DESIGN.md).
    LoginResp {
        return_code: i32,
        resp_string: String,
        account_name: String,
        user_name: String,
        paid: bool,
        open_chat_enabled: bool,
        seconds: u32,
        useconds: u32,
        minutes_remaining: u32,
        account_days: u32,
        last_login: String,
    },
    Disconnect,
    /// Server-initiated: drop the connection with a reason code (spec §7).
    Eject { disconnect_code: u16, reason: String },
    GetAvatars,
    GetAvatarsResp { avatars: Vec<PotentialAvatar> },
    CreateAvatar { dna_string: Bytes, index: u8 },
    CreateAvatarResp { return_code: i32, avatar_id: DoId },
    SetNamePattern { avatar_id: DoId, pattern: [u16; 4] },
    SetNamePatternAnswer { avatar_id: DoId, approved: bool },
    SetWishname { avatar_id: DoId, wishname: String },
    SetWishnameResp { return_code: i32, wishname: String },
    DeleteAvatar { avatar_id: DoId },
    DeleteAvatarResp { return_code: i32 },
    SetAvatar { avatar_id: DoId },
    /// One zone per call rather than spec's variable-length zone array: a
    /// handle's zone set is built up by repeated `AddInterest` calls that
    /// share the same `interest_id` (see `client::interest`).
    AddInterest { interest_id: u16, context: u32, parent_id: DoId, zone_id: ZoneId },
    RemoveInterest { interest_id: u16, context: u32 },
    DoneInterestResp { interest_id: u16, context: u32 },
    ObjectUpdateField { do_id: DoId, field_id: u16, args: Vec<Value> },
    ObjectLocation { do_id: DoId, parent_id: DoId, zone_id: ZoneId },
    GetFriendList,
    GetFriendListResp { friends: Vec<FriendEntry> },
    GetFriendListExtended,
    GetFriendListExtendedResp { friends: Vec<FriendEntry> },
    GetAvatarDetails { avatar_id: DoId },
    GetAvatarDetailsResp { avatar_id: DoId, fields: Vec<(u16, Value)> },
    GetPetDetails { pet_id: DoId },
    GetPetDetailsResp { pet_id: DoId, fields: Vec<(u16, Value)> },
    RemoveFriend { avatar_id: DoId },
    FriendOnline { avatar_id: DoId },
    FriendOffline { avatar_id: DoId },
    ObjectGenerate { do_id: DoId, parent_id: DoId, zone_id: ZoneId, class_id: u16, fields: Vec<(u16, Value)> },
    ObjectDisable { do_id: DoId },
}

impl ClientMessage {
    pub fn code(&self) -> u16 {
        match self {
            ClientMessage::Heartbeat => CLIENT_HEARTBEAT,
            ClientMessage::Login2 { .. } => CLIENT_LOGIN_2,
            ClientMessage::LoginToontown { .. } => CLIENT_LOGIN_TOONTOWN,
            ClientMessage::LoginResp { .. } => CLIENT_LOGIN_RESP,
            ClientMessage::Disconnect => CLIENT_DISCONNECT,
            ClientMessage::Eject { .. } => CLIENT_EJECT,
            ClientMessage::GetAvatars => CLIENT_GET_AVATARS,
            ClientMessage::GetAvatarsResp { .. } => CLIENT_GET_AVATARS_RESP,
            ClientMessage::CreateAvatar { .. } => CLIENT_CREATE_AVATAR,
            ClientMessage::CreateAvatarResp { .. } => CLIENT_CREATE_AVATAR_RESP,
            ClientMessage::SetNamePattern { .. } => CLIENT_SET_NAME_PATTERN,
            ClientMessage::SetNamePatternAnswer { .. } => CLIENT_SET_NAME_PATTERN_ANSWER,
            ClientMessage::SetWishname { .. } => CLIENT_SET_WISHNAME,
            ClientMessage::SetWishnameResp { .. } => CLIENT_SET_WISHNAME_RESP,
            ClientMessage::DeleteAvatar { .. } => CLIENT_DELETE_AVATAR,
            ClientMessage::DeleteAvatarResp { .. } => CLIENT_DELETE_AVATAR_RESP,
            ClientMessage::SetAvatar { .. } => CLIENT_SET_AVATAR,
            ClientMessage::AddInterest { .. } => CLIENT_ADD_INTEREST,
            ClientMessage::RemoveInterest { .. } => CLIENT_REMOVE_INTEREST,
            ClientMessage::DoneInterestResp { .. } => CLIENT_DONE_INTEREST_RESP,
            ClientMessage::ObjectUpdateField { .. } => CLIENT_OBJECT_UPDATE_FIELD,
            ClientMessage::ObjectLocation { .. } => CLIENT_OBJECT_LOCATION,
            ClientMessage::GetFriendList => CLIENT_GET_FRIEND_LIST,
            ClientMessage::GetFriendListResp { .. } => CLIENT_GET_FRIEND_LIST_RESP,
            ClientMessage::GetFriendListExtended => CLIENT_GET_FRIEND_LIST_EXTENDED,
            ClientMessage::GetFriendListExtendedResp { .. } => CLIENT_GET_FRIEND_LIST_EXTENDED_RESP,
            ClientMessage::GetAvatarDetails { .. } => CLIENT_GET_AVATAR_DETAILS,
            ClientMessage::GetAvatarDetailsResp { .. } => CLIENT_GET_AVATAR_DETAILS_RESP,
            ClientMessage::GetPetDetails { .. } => CLIENT_GET_PET_DETAILS,
            ClientMessage::GetPetDetailsResp { .. } => CLIENT_GET_PET_DETAILS_RESP,
            ClientMessage::RemoveFriend { .. } => CLIENT_REMOVE_FRIEND,
            ClientMessage::FriendOnline { .. } => CLIENT_FRIEND_ONLINE,
            ClientMessage::FriendOffline { .. } => CLIENT_FRIEND_OFFLINE,
            ClientMessage::ObjectGenerate { .. } => CLIENT_OBJECT_GENERATE,
            ClientMessage::ObjectDisable { .. } => CLIENT_OBJECT_DISABLE,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut out = BytesMut::new();
        out.put_u16_le(self.code());
        match self {
            ClientMessage::Heartbeat
            | ClientMessage::Disconnect
            | ClientMessage::GetAvatars
            | ClientMessage::GetFriendList
            | ClientMessage::GetFriendListExtended => {}
            ClientMessage::Login2 {
                play_token,
                version,
                hash,
                token_type,
                validate_download,
                want_magic_words,
            } => {
                put_string(&mut out, play_token);
                put_string(&mut out, version);
                out.put_u32_le(*hash);
                out.put_u32_le(*token_type);
                put_string(&mut out, validate_download);
                put_string(&mut out, want_magic_words);
            }
            ClientMessage::LoginToontown {
                play_token,
                server_version,
                hash,
                token_type,
                want_magic_words,
            } => {
                put_string(&mut out, play_token);
                put_string(&mut out, server_version);
                out.put_u32_le(*hash);
                out.put_i32_le(*token_type);
                put_string(&mut out, want_magic_words);
            }
            ClientMessage::LoginResp {
                return_code,
                resp_string,
                account_name,
                user_name,
                paid,
                open_chat_enabled,
                seconds,
                useconds,
                minutes_remaining,
                account_days,
                last_login,
            } => {
                out.put_i32_le(*return_code);
                put_string(&mut out, resp_string);
                put_string(&mut out, account_name);
                put_string(&mut out, user_name);
                out.put_u8(*paid as u8);
                out.put_u8(*open_chat_enabled as u8);
                out.put_u32_le(*seconds);
                out.put_u32_le(*useconds);
                out.put_u32_le(*minutes_remaining);
                out.put_u32_le(*account_days);
                put_string(&mut out, last_login);
            }
            ClientMessage::Eject {
                disconnect_code,
                reason,
            } => {
                out.put_u16_le(*disconnect_code);
                put_string(&mut out, reason);
            }
            ClientMessage::GetAvatarsResp { avatars } => {
                out.put_u16_le(avatars.len() as u16);
                for av in avatars {
                    out.put_u32_le(av.avatar_id);
                    put_string(&mut out, &av.name);
                    out.put_u32_le(av.dna_string.len() as u32);
                    out.put_slice(&av.dna_string);
                    out.put_u8(av.index);
                }
            }
            ClientMessage::CreateAvatar { dna_string, index } => {
                out.put_u32_le(dna_string.len() as u32);
                out.put_slice(dna_string);
                out.put_u8(*index);
            }
            ClientMessage::CreateAvatarResp {
                return_code,
                avatar_id,
            } => {
                out.put_i32_le(*return_code);
                out.put_u32_le(*avatar_id);
            }
            ClientMessage::SetNamePattern { avatar_id, pattern } => {
                out.put_u32_le(*avatar_id);
                for idx in pattern {
                    out.put_u16_le(*idx);
                }
            }
            ClientMessage::SetNamePatternAnswer { avatar_id, approved } => {
                out.put_u32_le(*avatar_id);
                out.put_u8(*approved as u8);
            }
            ClientMessage::SetWishname { avatar_id, wishname } => {
                out.put_u32_le(*avatar_id);
                put_string(&mut out, wishname);
            }
            ClientMessage::SetWishnameResp {
                return_code,
                wishname,
            } => {
                out.put_i32_le(*return_code);
                put_string(&mut out, wishname);
            }
            ClientMessage::DeleteAvatar { avatar_id } => out.put_u32_le(*avatar_id),
            ClientMessage::DeleteAvatarResp { return_code } => out.put_i32_le(*return_code),
            ClientMessage::SetAvatar { avatar_id } => out.put_u32_le(*avatar_id),
            ClientMessage::AddInterest {
                interest_id,
                context,
                parent_id,
                zone_id,
            } => {
                out.put_u16_le(*interest_id);
                out.put_u32_le(*context);
                out.put_u32_le(*parent_id);
                out.put_u32_le(*zone_id);
            }
            ClientMessage::RemoveInterest { interest_id, context } => {
                out.put_u16_le(*interest_id);
                out.put_u32_le(*context);
            }
            ClientMessage::DoneInterestResp { interest_id, context } => {
                out.put_u16_le(*interest_id);
                out.put_u32_le(*context);
            }
            ClientMessage::ObjectUpdateField {
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
            ClientMessage::ObjectLocation {
                do_id,
                parent_id,
                zone_id,
            } => {
                out.put_u32_le(*do_id);
                out.put_u32_le(*parent_id);
                out.put_u32_le(*zone_id);
            }
            ClientMessage::GetFriendListResp { friends }
            | ClientMessage::GetFriendListExtendedResp { friends } => {
                out.put_u16_le(friends.len() as u16);
                for f in friends {
                    out.put_u32_le(f.avatar_id);
                    let has_detail = f.name.is_some();
                    out.put_u8(has_detail as u8);
                    if has_detail {
                        put_string(&mut out, f.name.as_deref().unwrap_or(""));
                        let dna = f.dna_string.clone().unwrap_or_default();
                        out.put_u32_le(dna.len() as u32);
                        out.put_slice(&dna);
                    }
                }
            }
            ClientMessage::GetAvatarDetails { avatar_id } => out.put_u32_le(*avatar_id),
            ClientMessage::GetAvatarDetailsResp { avatar_id, fields }
            | ClientMessage::GetPetDetailsResp {
                pet_id: avatar_id,
                fields,
            } => {
                out.put_u32_le(*avatar_id);
                out.put_u16_le(fields.len() as u16);
                for (field_id, value) in fields {
                    out.put_u16_le(*field_id);
                    value.encode(&mut out);
                }
            }
            ClientMessage::GetPetDetails { pet_id } => out.put_u32_le(*pet_id),
            ClientMessage::RemoveFriend { avatar_id } => out.put_u32_le(*avatar_id),
            ClientMessage::FriendOnline { avatar_id } | ClientMessage::FriendOffline { avatar_id } => {
                out.put_u32_le(*avatar_id)
            }
            ClientMessage::ObjectGenerate {
                do_id,
                parent_id,
                zone_id,
                class_id,
                fields,
            } => {
                out.put_u32_le(*do_id);
                out.put_u32_le(*parent_id);
                out.put_u32_le(*zone_id);
                out.put_u16_le(*class_id);
                out.put_u16_le(fields.len() as u16);
                for (field_id, value) in fields {
                    out.put_u16_le(*field_id);
                    value.encode(&mut out);
                }
            }
            ClientMessage::ObjectDisable { do_id } => out.put_u32_le(*do_id),
        }
        out.freeze()
    }

    pub fn decode(mut buf: Bytes) -> Result<Self, WireError> {
        require(&buf, 2)?;
        let code = buf.get_u16_le();
        Ok(match code {
            CLIENT_HEARTBEAT => ClientMessage::Heartbeat,
            CLIENT_DISCONNECT => ClientMessage::Disconnect,
            CLIENT_GET_AVATARS => ClientMessage::GetAvatars,
            CLIENT_GET_FRIEND_LIST => ClientMessage::GetFriendList,
            CLIENT_GET_FRIEND_LIST_EXTENDED => ClientMessage::GetFriendListExtended,
            CLIENT_LOGIN_2 => {
                // string playToken, string version, uint32 hash,
                // uint32 tokenType, string validateDownload, string
                // wantMagicWords (spec.md §6) — every field must be read in
                // order or every later offset is wrong.
                let play_token = take_string(&mut buf)?;
                let version = take_string(&mut buf)?;
                require(&buf, 8)?;
                let hash = buf.get_u32_le();
                let token_type = buf.get_u32_le();
                let validate_download = take_string(&mut buf)?;
                let want_magic_words = take_string(&mut buf)?;
                ClientMessage::Login2 {
                    play_token,
                    version,
                    hash,
                    token_type,
                    validate_download,
                    want_magic_words,
                }
            }
            CLIENT_LOGIN_TOONTOWN => {
                // string playToken, string version, uint32 hash,
                // int32 tokenType, string wantMagicWords (spec.md §6).
                let play_token = take_string(&mut buf)?;
                let server_version = take_string(&mut buf)?;
                require(&buf, 8)?;
                let hash = buf.get_u32_le();
                let token_type = buf.get_i32_le();
                let want_magic_words = take_string(&mut buf)?;
                ClientMessage::LoginToontown {
                    play_token,
                    server_version,
                    hash,
                    token_type,
                    want_magic_words,
                }
            }
            CLIENT_LOGIN_RESP => {
                require(&buf, 4)?;
                let return_code = buf.get_i32_le();
                let resp_string = take_string(&mut buf)?;
                let account_name = take_string(&mut buf)?;
                let user_name = take_string(&mut buf)?;
                require(&buf, 18)?;
                let paid = buf.get_u8() != 0;
                let open_chat_enabled = buf.get_u8() != 0;
                let seconds = buf.get_u32_le();
                let useconds = buf.get_u32_le();
                let minutes_remaining = buf.get_u32_le();
                let account_days = buf.get_u32_le();
                let last_login = take_string(&mut buf)?;
                ClientMessage::LoginResp {
                    return_code,
                    resp_string,
                    account_name,
                    user_name,
                    paid,
                    open_chat_enabled,
                    seconds,
                    useconds,
                    minutes_remaining,
                    account_days,
                    last_login,
                }
            }
            CLIENT_EJECT => {
                require(&buf, 2)?;
                let disconnect_code = buf.get_u16_le();
                let reason = take_string(&mut buf)?;
                ClientMessage::Eject {
                    disconnect_code,
                    reason,
                }
            }
            CLIENT_GET_AVATARS_RESP => {
                require(&buf, 2)?;
                let count = buf.get_u16_le() as usize;
                let mut avatars = Vec::with_capacity(count);
                for _ in 0..count {
                    require(&buf, 4)?;
                    let avatar_id = buf.get_u32_le();
                    let name = take_string(&mut buf)?;
                    require(&buf, 4)?;
                    let dna_len = buf.get_u32_le() as usize;
                    require(&buf, dna_len + 1)?;
                    let dna_string = buf.split_to(dna_len);
                    let index = buf.get_u8();
                    avatars.push(PotentialAvatar {
                        avatar_id,
                        name,
                        dna_string,
                        index,
                    });
                }
                ClientMessage::GetAvatarsResp { avatars }
            }
            CLIENT_CREATE_AVATAR => {
                require(&buf, 4)?;
                let dna_len = buf.get_u32_le() as usize;
                require(&buf, dna_len + 1)?;
                let dna_string = buf.split_to(dna_len);
                let index = buf.get_u8();
                ClientMessage::CreateAvatar { dna_string, index }
            }
            CLIENT_CREATE_AVATAR_RESP => {
                require(&buf, 8)?;
                let return_code = buf.get_i32_le();
                let avatar_id = buf.get_u32_le();
                ClientMessage::CreateAvatarResp {
                    return_code,
                    avatar_id,
                }
            }
            CLIENT_SET_NAME_PATTERN => {
                require(&buf, 4 + 8)?;
                let avatar_id = buf.get_u32_le();
                let mut pattern = [0u16; 4];
                for slot in &mut pattern {
                    *slot = buf.get_u16_le();
                }
                ClientMessage::SetNamePattern { avatar_id, pattern }
            }
            CLIENT_SET_NAME_PATTERN_ANSWER => {
                require(&buf, 5)?;
                let avatar_id = buf.get_u32_le();
                let approved = buf.get_u8() != 0;
                ClientMessage::SetNamePatternAnswer { avatar_id, approved }
            }
            CLIENT_SET_WISHNAME => {
                require(&buf, 4)?;
                let avatar_id = buf.get_u32_le();
                let wishname = take_string(&mut buf)?;
                ClientMessage::SetWishname { avatar_id, wishname }
            }
            CLIENT_SET_WISHNAME_RESP => {
                require(&buf, 4)?;
                let return_code = buf.get_i32_le();
                let wishname = take_string(&mut buf)?;
                ClientMessage::SetWishnameResp {
                    return_code,
                    wishname,
                }
            }
            CLIENT_DELETE_AVATAR => {
                require(&buf, 4)?;
                ClientMessage::DeleteAvatar {
                    avatar_id: buf.get_u32_le(),
                }
            }
            CLIENT_DELETE_AVATAR_RESP => {
                require(&buf, 4)?;
                ClientMessage::DeleteAvatarResp {
                    return_code: buf.get_i32_le(),
                }
            }
            CLIENT_SET_AVATAR => {
                require(&buf, 4)?;
                ClientMessage::SetAvatar {
                    avatar_id: buf.get_u32_le(),
                }
            }
            CLIENT_ADD_INTEREST => {
                require(&buf, 14)?;
                let interest_id = buf.get_u16_le();
                let context = buf.get_u32_le();
                let parent_id = buf.get_u32_le();
                let zone_id = buf.get_u32_le();
                ClientMessage::AddInterest {
                    interest_id,
                    context,
                    parent_id,
                    zone_id,
                }
            }
            CLIENT_REMOVE_INTEREST => {
                require(&buf, 6)?;
                let interest_id = buf.get_u16_le();
                let context = buf.get_u32_le();
                ClientMessage::RemoveInterest { interest_id, context }
            }
            CLIENT_DONE_INTEREST_RESP => {
                require(&buf, 6)?;
                let interest_id = buf.get_u16_le();
                let context = buf.get_u32_le();
                ClientMessage::DoneInterestResp { interest_id, context }
            }
            CLIENT_OBJECT_UPDATE_FIELD => {
                require(&buf, 8)?;
                let do_id = buf.get_u32_le();
                let field_id = buf.get_u16_le();
                let num_args = buf.get_u16_le() as usize;
                let mut args = Vec::with_capacity(num_args);
                for _ in 0..num_args {
                    args.push(Value::decode(&mut buf)?);
                }
                ClientMessage::ObjectUpdateField {
                    do_id,
                    field_id,
                    args,
                }
            }
            CLIENT_OBJECT_LOCATION => {
                require(&buf, 12)?;
                let do_id = buf.get_u32_le();
                let parent_id = buf.get_u32_le();
                let zone_id = buf.get_u32_le();
                ClientMessage::ObjectLocation {
                    do_id,
                    parent_id,
                    zone_id,
                }
            }
            CLIENT_GET_FRIEND_LIST_RESP | CLIENT_GET_FRIEND_LIST_EXTENDED_RESP => {
                require(&buf, 2)?;
                let count = buf.get_u16_le() as usize;
                let mut friends = Vec::with_capacity(count);
                for _ in 0..count {
                    require(&buf, 5)?;
                    let avatar_id = buf.get_u32_le();
                    let has_detail = buf.get_u8() != 0;
                    let (name, dna_string) = if has_detail {
                        let name = take_string(&mut buf)?;
                        require(&buf, 4)?;
                        let dna_len = buf.get_u32_le() as usize;
                        require(&buf, dna_len)?;
                        (Some(name), Some(buf.split_to(dna_len)))
                    } else {
                        (None, None)
                    };
                    friends.push(FriendEntry {
                        avatar_id,
                        name,
                        dna_string,
                    });
                }
                if code == CLIENT_GET_FRIEND_LIST_RESP {
                    ClientMessage::GetFriendListResp { friends }
                } else {
                    ClientMessage::GetFriendListExtendedResp { friends }
                }
            }
            CLIENT_GET_AVATAR_DETAILS => {
                require(&buf, 4)?;
                ClientMessage::GetAvatarDetails {
                    avatar_id: buf.get_u32_le(),
                }
            }
            CLIENT_GET_AVATAR_DETAILS_RESP | CLIENT_GET_PET_DETAILS_RESP => {
                require(&buf, 6)?;
                let avatar_id = buf.get_u32_le();
                let count = buf.get_u16_le() as usize;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    require(&buf, 2)?;
                    let field_id = buf.get_u16_le();
                    fields.push((field_id, Value::decode(&mut buf)?));
                }
                if code == CLIENT_GET_AVATAR_DETAILS_RESP {
                    ClientMessage::GetAvatarDetailsResp { avatar_id, fields }
                } else {
                    ClientMessage::GetPetDetailsResp {
                        pet_id: avatar_id,
                        fields,
                    }
                }
            }
            CLIENT_GET_PET_DETAILS => {
                require(&buf, 4)?;
                ClientMessage::GetPetDetails {
                    pet_id: buf.get_u32_le(),
                }
            }
            CLIENT_REMOVE_FRIEND => {
                require(&buf, 4)?;
                ClientMessage::RemoveFriend {
                    avatar_id: buf.get_u32_le(),
                }
            }
            CLIENT_FRIEND_ONLINE => {
                require(&buf, 4)?;
                ClientMessage::FriendOnline {
                    avatar_id: buf.get_u32_le(),
                }
            }
            CLIENT_FRIEND_OFFLINE => {
                require(&buf, 4)?;
                ClientMessage::FriendOffline {
                    avatar_id: buf.get_u32_le(),
                }
            }
            CLIENT_OBJECT_GENERATE => {
                require(&buf, 14)?;
                let do_id = buf.get_u32_le();
                let parent_id = buf.get_u32_le();
                let zone_id = buf.get_u32_le();
                let class_id = buf.get_u16_le();
                let count = buf.get_u16_le() as usize;
                let mut fields = Vec::with_capacity(count);
                for _ in 0..count {
                    require(&buf, 2)?;
                    let field_id = buf.get_u16_le();
                    fields.push((field_id, Value::decode(&mut buf)?));
                }
                ClientMessage::ObjectGenerate {
                    do_id,
                    parent_id,
                    zone_id,
                    class_id,
                    fields,
                }
            }
            CLIENT_OBJECT_DISABLE => {
                require(&buf, 4)?;
                ClientMessage::ObjectDisable {
                    do_id: buf.get_u32_le(),
                }
            }
            other => return Err(WireError::UnknownMessageCode(other)),
        })
    }
}

/// Server-assigned puppet channel the Client Agent routes a logged-in
/// client's outbound field updates through (spec §3, §4.3).
pub fn client_sender_channel(do_id: DoId) -> Channel {
    crate::ids::puppet_channel(do_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_round_trips() {
        let msg = ClientMessage::Heartbeat;
        assert_eq!(ClientMessage::decode(msg.encode()).unwrap(), msg);
    }

    #[test]
    fn login_2_round_trips() {
        let msg = ClientMessage::Login2 {
            play_token: "abc".into(),
            version: "6.37".into(),
            hash: 0xdead_beef,
            token_type: 0,
            validate_download: "".into(),
            want_magic_words: "".into(),
        };
        assert_eq!(ClientMessage::decode(msg.encode()).unwrap(), msg);
    }

    #[test]
    fn login_2_field_order_matches_the_documented_wire_layout() {
        // Hand-built frame in spec.md §6 order: playToken, version, hash,
        // tokenType, validateDownload, wantMagicWords. If decode ever
        // reorders fields this misreads `hash` as `tokenType` (or similar)
        // and the asserts below catch it.
        let mut raw = BytesMut::new();
        put_string(&mut raw, "tok");
        put_string(&mut raw, "6.37");
        raw.put_u32_le(0x1234_5678);
        raw.put_u32_le(7);
        put_string(&mut raw, "dl");
        put_string(&mut raw, "magic");
        let mut frame = BytesMut::new();
        frame.put_u16_le(CLIENT_LOGIN_2);
        frame.extend_from_slice(&raw);

        let ClientMessage::Login2 {
            play_token,
            version,
            hash,
            token_type,
            validate_download,
            want_magic_words,
        } = ClientMessage::decode(frame.freeze()).unwrap()
        else {
            panic!("expected Login2");
        };
        assert_eq!(play_token, "tok");
        assert_eq!(version, "6.37");
        assert_eq!(hash, 0x1234_5678);
        assert_eq!(token_type, 7);
        assert_eq!(validate_download, "dl");
        assert_eq!(want_magic_words, "magic");
    }

    #[test]
    fn login_toontown_round_trips() {
        let msg = ClientMessage::LoginToontown {
            play_token: "abc".into(),
            server_version: "ttr-1".into(),
            hash: 0xcafe_babe,
            token_type: -1,
            want_magic_words: "".into(),
        };
        assert_eq!(ClientMessage::decode(msg.encode()).unwrap(), msg);
    }

    #[test]
    fn login_resp_round_trips() {
        let msg = ClientMessage::LoginResp {
            return_code: 0,
            resp_string: "All Ok".into(),
            account_name: "1234".into(),
            user_name: "laff-o-tron".into(),
            paid: true,
            open_chat_enabled: false,
            seconds: 1_700_000_000,
            useconds: 0,
            minutes_remaining: 3_600_000,
            account_days: 42,
            last_login: "2026-07-20 00:00:00".into(),
        };
        assert_eq!(ClientMessage::decode(msg.encode()).unwrap(), msg);
    }

    #[test]
    fn get_avatars_resp_round_trips() {
        let msg = ClientMessage::GetAvatarsResp {
            avatars: vec![PotentialAvatar {
                avatar_id: 10_000_001,
                name: "Flippy".into(),
                dna_string: Bytes::from_static(b"\x01\x02"),
                index: 0,
            }],
        };
        assert_eq!(ClientMessage::decode(msg.encode()).unwrap(), msg);
    }

    #[test]
    fn add_interest_round_trips() {
        let msg = ClientMessage::AddInterest {
            interest_id: 7,
            context: 42,
            parent_id: 2000,
            zone_id: 2100,
        };
        assert_eq!(ClientMessage::decode(msg.encode()).unwrap(), msg);
    }

    #[test]
    fn done_interest_resp_round_trips() {
        let msg = ClientMessage::DoneInterestResp {
            interest_id: 7,
            context: 42,
        };
        assert_eq!(ClientMessage::decode(msg.encode()).unwrap(), msg);
    }

    #[test]
    fn object_update_field_round_trips_with_args() {
        let msg = ClientMessage::ObjectUpdateField {
            do_id: 10_000_001,
            field_id: 8,
            args: vec![Value::Str("Hi!".into())],
        };
        assert_eq!(ClientMessage::decode(msg.encode()).unwrap(), msg);
    }

    #[test]
    fn friend_list_extended_round_trips() {
        let msg = ClientMessage::GetFriendListExtendedResp {
            friends: vec![FriendEntry {
                avatar_id: 10_000_002,
                name: Some("Goofy".into()),
                dna_string: Some(Bytes::from_static(b"\x00")),
            }],
        };
        assert_eq!(ClientMessage::decode(msg.encode()).unwrap(), msg);
    }

    #[test]
    fn unknown_code_errors() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(0xffff);
        assert!(ClientMessage::decode(buf.freeze()).is_err());
    }
}
