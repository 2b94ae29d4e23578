//! Internal bus message codes.
//!
//! The MD does not interpret a [`crate::bus::DataMessage`]'s `code` field;
//! it only routes by channel. These constants are the vocabulary the State
//! Server, Database Server, and Client Agent use to interpret each other's
//! payloads once a message reaches them.

/// State Server: bring an object into existence on the calling channel's
/// parent/zone, with both required and optional-but-specified fields set.
pub const STATESERVER_OBJECT_GENERATE_WITH_REQUIRED_OTHER: u16 = 2001;
/// State Server: remove an object from the in-memory registry without
/// persisting anything (a RAM delete, as opposed to a DB delete).
pub const STATESERVER_OBJECT_DELETE_RAM: u16 = 2002;
/// State Server: move an object to a new `(parentId, zoneId)`.
pub const STATESERVER_OBJECT_SET_ZONE: u16 = 2003;
/// State Server: apply a single field update, broadcasting per the field's
/// flags.
pub const STATESERVER_OBJECT_UPDATE_FIELD: u16 = 2004;
/// State Server: fetch the current value of a required field without
/// mutating anything (used by the Client Agent to answer detail queries).
pub const STATESERVER_OBJECT_GET_FIELD: u16 = 2005;
/// State Server → caller: answer to [`STATESERVER_OBJECT_GET_FIELD`].
pub const STATESERVER_OBJECT_GET_FIELD_RESP: u16 = 2006;

/// Database Server: allocate a doId and create a stored object with the
/// given class and initial field values.
pub const DBSERVER_CREATE_STORED_OBJECT: u16 = 3001;
/// Database Server → caller: answer to [`DBSERVER_CREATE_STORED_OBJECT`].
pub const DBSERVER_CREATE_STORED_OBJECT_RESP: u16 = 3002;
/// Database Server: fetch a set of field values for a doId.
pub const DBSERVER_GET_STORED_VALUES: u16 = 3003;
/// Database Server → caller: answer to [`DBSERVER_GET_STORED_VALUES`].
pub const DBSERVER_GET_STORED_VALUES_RESP: u16 = 3004;
/// Database Server: persist a set of field values for a doId.
pub const DBSERVER_SET_STORED_VALUES: u16 = 3005;
/// Database Server: fetch or create the estate object for an account.
pub const DBSERVER_GET_ESTATE: u16 = 3006;
/// Database Server → caller: answer to [`DBSERVER_GET_ESTATE`].
pub const DBSERVER_GET_ESTATE_RESP: u16 = 3007;
/// Database Server: record a mutual friendship between two avatars.
pub const DBSERVER_MAKE_FRIENDS: u16 = 3008;
/// Database Server → caller: answer to [`DBSERVER_MAKE_FRIENDS`].
pub const DBSERVER_MAKE_FRIENDS_RESP: u16 = 3009;
/// Database Server: mint a new secret (friend) code for an avatar.
pub const DBSERVER_REQUEST_SECRET: u16 = 3010;
/// Database Server → caller: answer to [`DBSERVER_REQUEST_SECRET`].
pub const DBSERVER_REQUEST_SECRET_RESP: u16 = 3011;
/// Database Server: redeem a secret code, consuming it on success.
pub const DBSERVER_SUBMIT_SECRET: u16 = 3012;
/// Database Server → caller: answer to [`DBSERVER_SUBMIT_SECRET`].
pub const DBSERVER_SUBMIT_SECRET_RESP: u16 = 3013;

/// Client Agent: the State Server is telling a puppeted object's owning
/// client that a new object entered its interest set.
pub const CLIENTAGENT_OBJECT_GENERATE: u16 = 4001;
/// Client Agent: the State Server is telling a puppeted object's owning
/// client that an object left its interest set.
pub const CLIENTAGENT_OBJECT_DELETE: u16 = 4002;
