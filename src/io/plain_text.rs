//! Plain Text codec (`spec.md` §4.3, content-format 0): a single-value
//! format used for single-resource reads and writes.

use crate::error::{ErrorKind, Status};
use crate::io::external::{BytesCursor, StringCursor};
use crate::value::{Chunk, ObjectLink, Value};
use core::fmt::Write as _;

/// Encodes one value as plain-text ASCII/UTF-8 into `out`, returning the
/// number of bytes written. Bytes values are base64-encoded per
/// `spec.md` §4.3; strings are copied verbatim. Large bytes/string values
/// that do not fit `out` in one call should go through
/// `PlainTextEncoder` instead of this one-shot helper.
pub fn encode_small(value: &Value<'_>, out: &mut [u8]) -> Result<usize, ErrorKind> {
    let mut buf: heapless::String<40> = heapless::String::new();
    match value {
        Value::Int(v) => write!(buf, "{v}").map_err(|_| ErrorKind::Logic)?,
        Value::Uint(v) => write!(buf, "{v}").map_err(|_| ErrorKind::Logic)?,
        Value::Time(v) => write!(buf, "{v}").map_err(|_| ErrorKind::Logic)?,
        Value::Double(v) => write!(buf, "{v}").map_err(|_| ErrorKind::Logic)?,
        Value::Bool(v) => buf.push(if *v { '1' } else { '0' }).map_err(|_| ErrorKind::Logic)?,
        Value::ObjectLink(ObjectLink {
            object_id,
            instance_id,
        }) => write!(buf, "{object_id}:{instance_id}").map_err(|_| ErrorKind::Logic)?,
        Value::Null => {}
        _ => return Err(ErrorKind::IoType),
    }
    if buf.len() > out.len() {
        return Err(ErrorKind::IoType);
    }
    out[..buf.len()].copy_from_slice(buf.as_bytes());
    Ok(buf.len())
}

/// Parses a complete plain-text buffer into the requested type. The
/// format carries no type tag (`spec.md` §4.9: the caller must already
/// know which type it wants for this path).
pub fn decode_as(buf: &[u8], want: DecodeTarget) -> Result<Value<'static>, ErrorKind> {
    let text = core::str::from_utf8(buf).map_err(|_| ErrorKind::FormatMismatch)?;
    match want {
        DecodeTarget::Int => text
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ErrorKind::FormatMismatch),
        DecodeTarget::Uint => text
            .parse::<u64>()
            .map(Value::Uint)
            .map_err(|_| ErrorKind::FormatMismatch),
        DecodeTarget::Double => text
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| ErrorKind::FormatMismatch),
        DecodeTarget::Time => text
            .parse::<i64>()
            .map(Value::Time)
            .map_err(|_| ErrorKind::FormatMismatch),
        DecodeTarget::Bool => match text {
            "0" => Ok(Value::Bool(false)),
            "1" => Ok(Value::Bool(true)),
            _ => Err(ErrorKind::FormatMismatch),
        },
        DecodeTarget::ObjectLink => {
            let (oid, iid) = text.split_once(':').ok_or(ErrorKind::FormatMismatch)?;
            let object_id = oid.parse::<u16>().map_err(|_| ErrorKind::FormatMismatch)?;
            let instance_id = iid.parse::<u16>().map_err(|_| ErrorKind::FormatMismatch)?;
            Ok(Value::ObjectLink(ObjectLink {
                object_id,
                instance_id,
            }))
        }
    }
}

/// Decodes a base64-encoded plain-text bytes value in place, returning
/// the decoded length.
pub fn decode_bytes_in_place(buf: &mut [u8]) -> Result<usize, ErrorKind> {
    crate::base64::decode_in_place(buf)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeTarget {
    Int,
    Uint,
    Double,
    Bool,
    ObjectLink,
    Time,
}

enum Body<'a> {
    None,
    Bytes {
        cursor: BytesCursor<'a>,
        enc: crate::base64::Base64Encoder,
        staged: heapless::Vec<u8, 8>,
        staged_off: usize,
    },
    Text(StringCursor<'a>),
}

/// Streaming plain-text encoder for values whose textual form may not
/// fit a single `get_payload` call (chunked strings, or bytes requiring
/// base64 expansion of a large external source).
pub struct PlainTextEncoder<'a> {
    header: heapless::Vec<u8, 40>,
    header_pos: usize,
    body: Body<'a>,
}

impl<'a> PlainTextEncoder<'a> {
    pub fn new() -> Self {
        PlainTextEncoder {
            header: heapless::Vec::new(),
            header_pos: 0,
            body: Body::None,
        }
    }

    /// Primes the encoder with one entry. Must only be called when the
    /// previous entry (if any) has fully drained, or returns `logic`.
    pub fn new_entry(&mut self, value: Value<'a>) -> Result<(), ErrorKind> {
        if self.header_pos < self.header.len() || !matches!(self.body, Body::None) {
            return Err(ErrorKind::Logic);
        }
        self.header.clear();
        self.header_pos = 0;
        match value {
            Value::String(chunk) => {
                self.body = Body::Text(StringCursor::from_chunk(chunk));
            }
            Value::ExternalString(src) => {
                self.body = Body::Text(StringCursor::from_source(src));
            }
            Value::Bytes(chunk) => {
                self.body = Body::Bytes {
                    cursor: BytesCursor::from_chunk(chunk),
                    enc: crate::base64::Base64Encoder::new(),
                    staged: heapless::Vec::new(),
                    staged_off: 0,
                };
            }
            Value::ExternalBytes(src) => {
                self.body = Body::Bytes {
                    cursor: BytesCursor::from_source(src),
                    enc: crate::base64::Base64Encoder::new(),
                    staged: heapless::Vec::new(),
                    staged_off: 0,
                };
            }
            other => {
                let mut tmp = [0u8; 40];
                let written = encode_small(&other, &mut tmp)?;
                self.header
                    .extend_from_slice(&tmp[..written])
                    .map_err(|_| ErrorKind::Logic)?;
            }
        }
        Ok(())
    }

    /// Copies as much of the current entry's text as fits in `out`.
    pub fn get_payload(&mut self, out: &mut [u8]) -> Result<(usize, Status), ErrorKind> {
        if self.header_pos < self.header.len() {
            let remaining = &self.header[self.header_pos..];
            let n = remaining.len().min(out.len());
            out[..n].copy_from_slice(&remaining[..n]);
            self.header_pos += n;
            if self.header_pos == self.header.len() {
                return Ok((n, Status::Done));
            }
            return Ok((n, Status::NeedNextCall));
        }
        match &mut self.body {
            Body::None => Ok((0, Status::Done)),
            Body::Text(cursor) => {
                let (n, last) = cursor.pull(out)?;
                if last {
                    self.body = Body::None;
                    Ok((n, Status::Done))
                } else {
                    Ok((n, Status::NeedNextCall))
                }
            }
            Body::Bytes {
                cursor,
                enc,
                staged,
                staged_off,
            } => {
                let mut written = 0;
                loop {
                    if *staged_off < staged.len() {
                        let remaining = &staged[*staged_off..];
                        let n = remaining.len().min(out.len() - written);
                        out[written..written + n].copy_from_slice(&remaining[..n]);
                        *staged_off += n;
                        written += n;
                        if written == out.len() {
                            return Ok((written, Status::NeedNextCall));
                        }
                        continue;
                    }
                    if enc.is_done() {
                        self.body = Body::None;
                        return Ok((written, Status::Done));
                    }
                    let mut raw = [0u8; 48];
                    let (raw_n, raw_last) = cursor.pull(&mut raw)?;
                    staged.clear();
                    *staged_off = 0;
                    let mut b64 = [0u8; 64];
                    let (_, b64_n) = enc
                        .encode(&raw[..raw_n], &mut b64)
                        .map_err(|_| ErrorKind::Logic)?;
                    if raw_last {
                        let tail_n = enc.finish(&mut b64[b64_n..]).map_err(|_| ErrorKind::Logic)?;
                        staged
                            .extend_from_slice(&b64[..b64_n + tail_n])
                            .map_err(|_| ErrorKind::Logic)?;
                    } else {
                        staged
                            .extend_from_slice(&b64[..b64_n])
                            .map_err(|_| ErrorKind::Logic)?;
                    }
                }
            }
        }
    }
}

impl<'a> Default for PlainTextEncoder<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_int_and_uint() {
        let mut out = [0u8; 16];
        let n = encode_small(&Value::Int(-42), &mut out).unwrap();
        assert_eq!(&out[..n], b"-42");
        let n = encode_small(&Value::Uint(42), &mut out).unwrap();
        assert_eq!(&out[..n], b"42");
    }

    #[test]
    fn encodes_bool_and_object_link() {
        let mut out = [0u8; 16];
        let n = encode_small(&Value::Bool(true), &mut out).unwrap();
        assert_eq!(&out[..n], b"1");
        let n = encode_small(
            &Value::ObjectLink(ObjectLink {
                object_id: 3,
                instance_id: 0,
            }),
            &mut out,
        )
        .unwrap();
        assert_eq!(&out[..n], b"3:0");
    }

    #[test]
    fn decode_round_trips_int() {
        let v = decode_as(b"-42", DecodeTarget::Int).unwrap();
        assert!(matches!(v, Value::Int(-42)));
    }

    #[test]
    fn decode_rejects_bad_bool() {
        assert!(decode_as(b"2", DecodeTarget::Bool).is_err());
    }

    #[test]
    fn streaming_encoder_emits_small_scalar_in_one_call() {
        let mut enc = PlainTextEncoder::new();
        enc.new_entry(Value::Int(7)).unwrap();
        let mut out = [0u8; 8];
        let (n, status) = enc.get_payload(&mut out).unwrap();
        assert_eq!(&out[..n], b"7");
        assert_eq!(status, Status::Done);
    }

    #[test]
    fn streaming_encoder_base64_encodes_bytes_across_small_buffer() {
        let data = b"hello world";
        let chunk = Chunk::new(&data[..], 0, data.len());
        let mut enc = PlainTextEncoder::new();
        enc.new_entry(Value::Bytes(chunk)).unwrap();
        let mut collected: heapless::Vec<u8, 64> = heapless::Vec::new();
        loop {
            let mut out = [0u8; 3];
            let (n, status) = enc.get_payload(&mut out).unwrap();
            collected.extend_from_slice(&out[..n]).unwrap();
            if status == Status::Done {
                break;
            }
        }
        let mut buf = collected.clone();
        let len = decode_bytes_in_place(&mut buf).unwrap();
        assert_eq!(&buf[..len], data);
    }
}
