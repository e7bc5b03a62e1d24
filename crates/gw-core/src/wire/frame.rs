//! Binary frame codec (§4.1).
//!
//! ```text
//! 0      4   5   6        8   9          12            16                  24
//! +------+---+---+--------+---+----------+-------------+-------------------+
//! |MAGIC |VER|TYP| METHOD |FLG| RESERVED | PAYLOAD LEN  |    REQUEST ID     |
//! +------+---+---+--------+---+----------+-------------+-------------------+
//! "MCPW"   u8  u8    u16    u8   3 bytes       u32 (BE)         u64 (BE)
//! ```
//!
//! followed by `PAYLOAD LEN` bytes of payload (gzip-compressed when flag bit
//! 0 is set). JSON frames carry the same logical fields as a text envelope
//! (see `wire::envelope`) and never go through this codec.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::envelope::EnvelopeKind;
use crate::error::{GatewayError, GatewayResult};

pub const MAGIC: [u8; 4] = *b"MCPW";
pub const VERSION: u8 = 1;
pub const HEADER_LEN: usize = 24;
pub const MAX_PAYLOAD_LEN: u32 = i32::MAX as u32;

/// Frames at or above this size should be compressed when the session
/// negotiated compression.
pub const COMPRESS_THRESHOLD: usize = 1024;

pub const FLAG_COMPRESSED: u8 = 0b0000_0001;
pub const FLAG_ENCRYPTED: u8 = 0b0000_0010;

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryFrame {
    pub frame_type: EnvelopeKind,
    pub method: u16,
    pub compressed: bool,
    pub encrypted: bool,
    pub request_id: u64,
    pub payload: Bytes,
}

fn frame_type_code(kind: EnvelopeKind) -> u8 {
    match kind {
        EnvelopeKind::Request => 1,
        EnvelopeKind::Response => 2,
        EnvelopeKind::Notification => 3,
        EnvelopeKind::Error => 4,
        EnvelopeKind::Ping => 5,
        EnvelopeKind::Pong => 6,
        EnvelopeKind::Close => 7,
    }
}

fn frame_type_from_code(code: u8) -> GatewayResult<EnvelopeKind> {
    match code {
        1 => Ok(EnvelopeKind::Request),
        2 => Ok(EnvelopeKind::Response),
        3 => Ok(EnvelopeKind::Notification),
        4 => Ok(EnvelopeKind::Error),
        5 => Ok(EnvelopeKind::Ping),
        6 => Ok(EnvelopeKind::Pong),
        7 => Ok(EnvelopeKind::Close),
        other => Err(GatewayError::malformed(format!("unknown frame type {other}"))),
    }
}

impl BinaryFrame {
    /// Encode the frame, gzip-compressing the payload when it meets
    /// `COMPRESS_THRESHOLD` and the caller has negotiated compression.
    pub fn encode(&self, negotiated_compression: bool) -> GatewayResult<Bytes> {
        let want_compress = negotiated_compression && self.payload.len() >= COMPRESS_THRESHOLD;
        let payload = if want_compress {
            gzip(&self.payload)?
        } else {
            self.payload.clone()
        };

        if payload.len() as u64 > MAX_PAYLOAD_LEN as u64 {
            return Err(GatewayError::context_too_large(format!(
                "payload {} exceeds {MAX_PAYLOAD_LEN} bytes; use chunk notifications",
                payload.len()
            )));
        }

        let mut flags = 0u8;
        if want_compress {
            flags |= FLAG_COMPRESSED;
        }
        if self.encrypted {
            flags |= FLAG_ENCRYPTED;
        }

        let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len());
        buf.put_slice(&MAGIC);
        buf.put_u8(VERSION);
        buf.put_u8(frame_type_code(self.frame_type));
        buf.put_u16(self.method);
        buf.put_u8(flags);
        buf.put_slice(&[0u8; 3]);
        buf.put_u32(payload.len() as u32);
        buf.put_u64(self.request_id);
        buf.put_slice(&payload);
        Ok(buf.freeze())
    }

    /// Decode a frame from a buffer that contains exactly one frame (the
    /// session's reader is responsible for splitting the socket byte stream
    /// into frame-sized chunks using the length prefix).
    pub fn decode(mut buf: Bytes) -> GatewayResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(GatewayError::malformed("frame shorter than header"));
        }

        let magic = buf.split_to(4);
        if magic.as_ref() != MAGIC {
            return Err(GatewayError::malformed("bad magic"));
        }

        let version = buf.get_u8();
        if version != VERSION {
            return Err(GatewayError::malformed(format!("unknown version {version}")));
        }

        let frame_type = frame_type_from_code(buf.get_u8())?;
        let method = buf.get_u16();
        let flags = buf.get_u8();
        buf.advance(3); // reserved
        let payload_len = buf.get_u32();
        let request_id = buf.get_u64();

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(GatewayError::malformed("declared payload length too large"));
        }
        if (payload_len as usize) > buf.len() {
            return Err(GatewayError::malformed("declared length exceeds buffer"));
        }

        let compressed = flags & FLAG_COMPRESSED != 0;
        let encrypted = flags & FLAG_ENCRYPTED != 0;
        let raw = buf.split_to(payload_len as usize);

        let payload = if compressed {
            gunzip(&raw)?
        } else {
            raw
        };

        Ok(BinaryFrame {
            frame_type,
            method,
            compressed,
            encrypted,
            request_id,
            payload,
        })
    }
}

fn gzip(data: &[u8]) -> GatewayResult<Bytes> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(data)
        .map_err(|e| GatewayError::internal(format!("gzip encode: {e}")))?;
    let out = enc
        .finish()
        .map_err(|e| GatewayError::internal(format!("gzip finish: {e}")))?;
    Ok(Bytes::from(out))
}

fn gunzip(data: &[u8]) -> GatewayResult<Bytes> {
    let mut dec = GzDecoder::new(data);
    let mut out = Vec::new();
    dec.read_to_end(&mut out)
        .map_err(|_| GatewayError::malformed("compression bit set without valid gzip member"))?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload: &[u8]) -> BinaryFrame {
        BinaryFrame {
            frame_type: EnvelopeKind::Request,
            method: 18,
            compressed: false,
            encrypted: false,
            request_id: 42,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[test]
    fn round_trip_small_uncompressed() {
        let frame = sample(b"{\"hello\":\"world\"}");
        let encoded = frame.encode(false).unwrap();
        let decoded = BinaryFrame::decode(encoded).unwrap();
        assert_eq!(decoded.frame_type, frame.frame_type);
        assert_eq!(decoded.method, frame.method);
        assert_eq!(decoded.request_id, frame.request_id);
        assert_eq!(decoded.payload, frame.payload);
        assert!(!decoded.compressed);
    }

    #[test]
    fn round_trip_compressed_above_threshold() {
        let payload = vec![b'a'; COMPRESS_THRESHOLD + 500];
        let frame = sample(&payload);
        let encoded = frame.encode(true).unwrap();
        assert!(encoded.len() < HEADER_LEN + payload.len());
        let decoded = BinaryFrame::decode(encoded).unwrap();
        assert!(decoded.compressed);
        assert_eq!(decoded.payload.as_ref(), payload.as_slice());
    }

    #[test]
    fn below_threshold_is_never_compressed_even_if_negotiated() {
        let frame = sample(b"small");
        let encoded = frame.encode(true).unwrap();
        let decoded = BinaryFrame::decode(encoded).unwrap();
        assert!(!decoded.compressed);
    }

    #[test]
    fn bad_magic_is_malformed() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(b"XXXX");
        bytes.put_bytes(0, HEADER_LEN - 4);
        let err = BinaryFrame::decode(bytes.freeze()).unwrap_err();
        assert_eq!(err.kind(), "Malformed");
    }

    #[test]
    fn unknown_version_is_malformed() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(&MAGIC);
        bytes.put_u8(99);
        bytes.put_bytes(0, HEADER_LEN - 5);
        let err = BinaryFrame::decode(bytes.freeze()).unwrap_err();
        assert_eq!(err.kind(), "Malformed");
    }

    #[test]
    fn declared_length_exceeding_buffer_is_malformed() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(&MAGIC);
        bytes.put_u8(VERSION);
        bytes.put_u8(1);
        bytes.put_u16(1);
        bytes.put_u8(0);
        bytes.put_slice(&[0u8; 3]);
        bytes.put_u32(1_000_000);
        bytes.put_u64(1);
        let err = BinaryFrame::decode(bytes.freeze()).unwrap_err();
        assert_eq!(err.kind(), "Malformed");
    }

    #[test]
    fn compression_bit_without_gzip_member_is_malformed() {
        let mut bytes = BytesMut::new();
        bytes.put_slice(&MAGIC);
        bytes.put_u8(VERSION);
        bytes.put_u8(1);
        bytes.put_u16(1);
        bytes.put_u8(FLAG_COMPRESSED);
        bytes.put_slice(&[0u8; 3]);
        let garbage = b"not gzip data";
        bytes.put_u32(garbage.len() as u32);
        bytes.put_u64(1);
        bytes.put_slice(garbage);
        let err = BinaryFrame::decode(bytes.freeze()).unwrap_err();
        assert_eq!(err.kind(), "Malformed");
    }
}
