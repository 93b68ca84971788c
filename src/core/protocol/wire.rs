// src/core/protocol/wire.rs

//! Outer framing and the flat request/reply grammar for storage-node
//! connections (client and peer-node traffic alike). The coordinator, load
//! balancer, and admin console speak their own much simpler line-oriented
//! text protocols and don't use this module.
//!
//! Every message on a storage-node socket is a `u32` big-endian length
//! prefix followed by exactly that many payload bytes.
//! `tokio_util::codec::LengthDelimitedCodec`
//! already speaks this framing natively (its default length field is a
//! 4-byte big-endian `u32`), so we reuse it instead of hand-rolling the
//! length accounting the way `original_source`'s
//! `kvs_group_server.cc::read_from_group_server` does byte-by-byte.
//!
//! On top of that framing, a request payload is a 4-byte ASCII command tag,
//! optionally followed by a single `\b` and then tag-specific argument
//! fields (themselves `\b`-delimited, except where a field's length is
//! pre-announced so it may contain arbitrary bytes — see `CPUT`). A reply
//! payload begins with `+OK` or `-ER`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::LengthDelimitedCodec;

use crate::core::errors::KvError;

/// `\b` is the field separator used throughout the wire grammar, matching
/// `original_source/backend_server/include/tablet.h`'s `DELIM` constant.
pub const DELIM: u8 = b'\x08';

/// Builds the length-delimited framing codec shared by every role. Kept as a
/// function (not a `const`/`static`) since `LengthDelimitedCodec` carries no
/// state worth sharing across connections.
pub fn framed_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::new()
}

/// A decoded, but not yet semantically parsed, request frame: a 4-byte
/// command tag plus whatever argument bytes followed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub tag: [u8; 4],
    pub body: Bytes,
}

impl Request {
    pub fn new(tag: &[u8; 4], body: Bytes) -> Self {
        Request { tag: *tag, body }
    }

    pub fn tag_str(&self) -> &str {
        std::str::from_utf8(&self.tag).unwrap_or("????")
    }

    /// Parses a raw payload (as produced by the length-delimited codec) into
    /// a `Request`. Returns `MalformedRequest` if the payload is shorter
    /// than the 4-byte tag, or if there are trailing bytes without the
    /// required `\b` separator.
    pub fn decode(mut payload: Bytes) -> Result<Self, KvError> {
        if payload.len() < 4 {
            return Err(KvError::MalformedRequest("frame shorter than command tag".into()));
        }
        let mut tag = [0u8; 4];
        tag.copy_from_slice(&payload[..4]);
        payload.advance(4);
        if payload.is_empty() {
            return Ok(Request { tag, body: Bytes::new() });
        }
        if payload[0] != DELIM {
            return Err(KvError::MalformedRequest("missing field separator after command tag".into()));
        }
        payload.advance(1);
        Ok(Request { tag, body: payload })
    }

    /// Serializes this request back into a payload ready for the
    /// length-delimited codec to frame.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(5 + self.body.len());
        buf.put_slice(&self.tag);
        if !self.body.is_empty() {
            buf.put_u8(DELIM);
            buf.put_slice(&self.body);
        }
        buf.freeze()
    }

    /// Splits `body` into exactly `n` `\b`-delimited fields. The final field
    /// is everything remaining after the `n - 1`th separator, so it alone
    /// may contain further `\b` bytes (used for raw values). `n == 0`
    /// requires an empty body.
    pub fn fields(&self, n: usize) -> Result<Vec<Bytes>, KvError> {
        if n == 0 {
            return if self.body.is_empty() {
                Ok(Vec::new())
            } else {
                Err(KvError::MalformedRequest(format!(
                    "{} takes no arguments",
                    self.tag_str()
                )))
            };
        }
        let mut out = Vec::with_capacity(n);
        let mut rest = self.body.clone();
        for _ in 0..n - 1 {
            let idx = rest
                .iter()
                .position(|&b| b == DELIM)
                .ok_or_else(|| KvError::MalformedRequest(format!("{} missing field", self.tag_str())))?;
            out.push(rest.split_to(idx));
            rest.advance(1);
        }
        out.push(rest);
        Ok(out)
    }

    /// The `CPUT` argument shape: `row \b col \b <u32 len_v1> v1 v2`, where
    /// `v1`'s length is announced so it (and the trailing `v2`, which runs
    /// to the end of the frame) may contain arbitrary bytes including `\b`.
    pub fn cput_fields(&self) -> Result<(Bytes, Bytes, Bytes, Bytes), KvError> {
        let mut rest = self.body.clone();
        let row_end = rest
            .iter()
            .position(|&b| b == DELIM)
            .ok_or_else(|| KvError::MalformedRequest(format!("{} missing field", self.tag_str())))?;
        let row = rest.split_to(row_end);
        rest.advance(1);
        let col_end = rest
            .iter()
            .position(|&b| b == DELIM)
            .ok_or_else(|| KvError::MalformedRequest(format!("{} missing field", self.tag_str())))?;
        let col = rest.split_to(col_end);
        rest.advance(1);
        if rest.len() < 4 {
            return Err(KvError::MalformedRequest("CPUT missing value-1 length".into()));
        }
        let len_v1 = rest.get_u32() as usize;
        if rest.len() < len_v1 {
            return Err(KvError::MalformedRequest("CPUT value-1 shorter than announced".into()));
        }
        let v1 = rest.split_to(len_v1);
        let v2 = rest;
        Ok((row, col, v1, v2))
    }
}

/// A decoded reply: success with command-specific payload bytes, or an
/// error reason string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Ok(Bytes),
    Err(String),
}

impl Reply {
    pub fn ok(data: impl Into<Bytes>) -> Self {
        Reply::Ok(data.into())
    }

    pub fn ok_empty() -> Self {
        Reply::Ok(Bytes::new())
    }

    pub fn err(e: &KvError) -> Self {
        Reply::Err(e.reason())
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Reply::Ok(data) => {
                let mut buf = BytesMut::with_capacity(3 + data.len());
                buf.put_slice(b"+OK");
                buf.put_slice(data);
                buf.freeze()
            }
            Reply::Err(reason) => {
                let mut buf = BytesMut::with_capacity(3 + reason.len());
                buf.put_slice(b"-ER");
                buf.put_slice(reason.as_bytes());
                buf.freeze()
            }
        }
    }

    pub fn decode(payload: Bytes) -> Result<Self, KvError> {
        if payload.len() < 3 {
            return Err(KvError::MalformedRequest("reply shorter than status prefix".into()));
        }
        match &payload[..3] {
            b"+OK" => Ok(Reply::Ok(payload.slice(3..))),
            b"-ER" => {
                let reason = String::from_utf8(payload.slice(3..).to_vec())?;
                Ok(Reply::Err(reason))
            }
            _ => Err(KvError::MalformedRequest("reply missing +OK/-ER prefix".into())),
        }
    }

    /// Collapses the reply back into a `Result`, for callers that issue a
    /// request and want the ordinary `?`-propagating shape rather than
    /// matching on `Reply` themselves. The `-ER` reason string is not parsed
    /// back into a `KvError` variant (that information is lossy once it's
    /// crossed the wire as text); it is carried as `KvError::WriteFailed`.
    pub fn into_result(self) -> Result<Bytes, KvError> {
        match self {
            Reply::Ok(data) => Ok(data),
            Reply::Err(reason) => Err(KvError::WriteFailed(reason)),
        }
    }
}
