//! Wire formats and identifier types shared by every OTP server component.
//!
//! This crate has no runtime of its own; `otpd` links it for framing,
//! message encoding, and the DC/DNA/token-parser/event-log interfaces the
//! core assumes external collaborators provide.

pub mod bus;
pub mod client_wire;
pub mod codes;
pub mod dclass;
pub mod dna;
pub mod error;
pub mod eventlog;
pub mod frame;
pub mod ids;
pub mod token;
pub mod value;

pub use error::WireError;
pub use frame::FrameCodec;
pub use ids::{Channel, DoId, UuId, ZoneId};
pub use value::Value;
