//! Length-prefixed datagram framing shared by the MD bus and the client
//! wire protocol.
//!
//! Every OTP datagram — whether an MD control/data message or a client
//! message — is a little-endian `uint16` byte count followed by that many
//! payload bytes (spec §4.1, §6). This is implemented once as a
//! `tokio_util::codec` pair, the way the teacher implements `IrcCodec` over
//! `Framed<TcpStream, _>`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::WireError;

/// Datagrams larger than this are refused rather than buffered forever.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// A `Decoder`/`Encoder` for the shared 2-byte-length-prefixed framing.
///
/// Operates on raw `Bytes` payloads; callers layer their own message
/// structure (bus message, client message) on top by decoding the payload
/// returned here.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = WireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>, WireError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let len = u16::from_le_bytes([src[0], src[1]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge {
                len,
                max: MAX_FRAME_LEN,
            });
        }
        if src.len() < 2 + len {
            src.reserve(2 + len - src.len());
            return Ok(None);
        }
        src.advance(2);
        Ok(Some(src.split_to(len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = WireError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), WireError> {
        if item.len() > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge {
                len: item.len(),
                max: MAX_FRAME_LEN,
            });
        }
        dst.reserve(2 + item.len());
        dst.put_u16_le(item.len() as u16);
        dst.put_slice(&item);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(Bytes::from_static(b"hello"), &mut buf)
            .unwrap();
        assert_eq!(&buf[..2], &5u16.to_le_bytes());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(&decoded[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_more_bytes_on_partial_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u16_le(10);
        buf.put_slice(b"abc");
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn rejects_oversized_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.put_u16_le(u16::MAX);
        buf.put_slice(&vec![0u8; 10]);
        // len claims 65535 bytes but payload is short: should wait, not error,
        // since 65535 <= MAX_FRAME_LEN.
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
