//! CBOR low-level reader/writer (`spec.md` §4.4) plus the simple
//! single-value CBOR codec (content-format 60).
//!
//! The reader is hand-rolled rather than built on `minicbor`'s decoder:
//! the contract requires a peek that can report "want more bytes"
//! *without consuming*, including mid-header, which a generic CBOR
//! crate's all-at-once decode doesn't expose in the right shape. Header
//! encoding (array/map/bytes/text/tag) is hand-rolled for the same
//! reason, symmetric with the reader. Scalar value encoding (the plain
//! CBOR content-format and SenML/hierarchical leaf values) goes through
//! `minicbor::encode::Encoder` for flat, definite-length CBOR encoding.

use crate::error::{CodecResult, ErrorKind, Status};
use crate::value::{ObjectLink, Value};
use minicbor::encode::Write as MiniWrite;

/// One decoded CBOR item, or a structural marker (`Break`, `*IndefStart`).
/// Byte/text strings of known length are returned in full (with arbitrarily
/// large buffers this is the common case); the indefinite-length form is
/// surfaced as a start marker followed by a sequence of definite chunks and
/// a final `Break`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Item<'a> {
    Uint(u64),
    Int(i64),
    Bytes(&'a [u8]),
    Text(&'a str),
    BytesIndefiniteStart,
    TextIndefiniteStart,
    ArrayHeader(Option<u64>),
    MapHeader(Option<u64>),
    Tag(u64),
    Bool(bool),
    Null,
    Undefined,
    Float(f64),
    Break,
}

struct Header {
    major: u8,
    info: u8,
    arg: u64,
    consumed: usize,
}

fn peek_header(buf: &[u8]) -> Result<Option<Header>, ErrorKind> {
    if buf.is_empty() {
        return Ok(None);
    }
    let b0 = buf[0];
    let major = b0 >> 5;
    let info = b0 & 0x1F;
    let (extra, consumed) = match info {
        0..=23 => (info as u64, 1),
        24 => {
            if buf.len() < 2 {
                return Ok(None);
            }
            (buf[1] as u64, 2)
        }
        25 => {
            if buf.len() < 3 {
                return Ok(None);
            }
            (u16::from_be_bytes([buf[1], buf[2]]) as u64, 3)
        }
        26 => {
            if buf.len() < 5 {
                return Ok(None);
            }
            (u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as u64, 5)
        }
        27 => {
            if buf.len() < 9 {
                return Ok(None);
            }
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[1..9]);
            (u64::from_be_bytes(b), 9)
        }
        28..=30 => return Err(ErrorKind::FormatMismatch),
        31 => (0, 1),
        _ => unreachable!(),
    };
    Ok(Some(Header {
        major,
        info,
        arg: extra,
        consumed,
    }))
}

fn f16_to_f64(bits: u16) -> f64 {
    let sign = (bits >> 15) & 1;
    let exp = (bits >> 10) & 0x1F;
    let frac = bits & 0x3FF;
    let value = if exp == 0 {
        (frac as f64) * 2f64.powi(-24)
    } else if exp == 0x1F {
        if frac == 0 {
            f64::INFINITY
        } else {
            f64::NAN
        }
    } else {
        (1.0 + (frac as f64) / 1024.0) * 2f64.powi(exp as i32 - 15)
    };
    if sign == 1 {
        -value
    } else {
        value
    }
}

/// Attempts to decode exactly one item from the front of `buf`. Returns
/// `Ok(None)` when `buf` does not yet hold enough bytes to tell (the
/// caller must feed more input and retry from the same offset); `buf`
/// itself is never mutated by a `None` result.
pub fn decode_item<'a>(buf: &'a [u8]) -> Result<Option<(Item<'a>, usize)>, ErrorKind> {
    let header = match peek_header(buf)? {
        Some(h) => h,
        None => return Ok(None),
    };
    match header.major {
        0 => Ok(Some((Item::Uint(header.arg), header.consumed))),
        1 => {
            if header.arg > i64::MAX as u64 {
                return Err(ErrorKind::FormatMismatch);
            }
            Ok(Some((Item::Int(-1 - header.arg as i64), header.consumed)))
        }
        2 | 3 => {
            if header.info == 31 {
                let item = if header.major == 2 {
                    Item::BytesIndefiniteStart
                } else {
                    Item::TextIndefiniteStart
                };
                return Ok(Some((item, header.consumed)));
            }
            let len = header.arg as usize;
            let total = header.consumed + len;
            if buf.len() < total {
                return Ok(None);
            }
            let raw = &buf[header.consumed..total];
            if header.major == 2 {
                Ok(Some((Item::Bytes(raw), total)))
            } else {
                let text = core::str::from_utf8(raw).map_err(|_| ErrorKind::FormatMismatch)?;
                Ok(Some((Item::Text(text), total)))
            }
        }
        4 => {
            let count = if header.info == 31 { None } else { Some(header.arg) };
            Ok(Some((Item::ArrayHeader(count), header.consumed)))
        }
        5 => {
            let count = if header.info == 31 { None } else { Some(header.arg) };
            Ok(Some((Item::MapHeader(count), header.consumed)))
        }
        6 => Ok(Some((Item::Tag(header.arg), header.consumed))),
        7 => match header.info {
            20 => Ok(Some((Item::Bool(false), header.consumed))),
            21 => Ok(Some((Item::Bool(true), header.consumed))),
            22 => Ok(Some((Item::Null, header.consumed))),
            23 => Ok(Some((Item::Undefined, header.consumed))),
            25 => Ok(Some((
                Item::Float(f16_to_f64(header.arg as u16)),
                header.consumed,
            ))),
            26 => Ok(Some((
                Item::Float(f32::from_bits(header.arg as u32) as f64),
                header.consumed,
            ))),
            27 => Ok(Some((
                Item::Float(f64::from_bits(header.arg)),
                header.consumed,
            ))),
            31 => Ok(Some((Item::Break, header.consumed))),
            _ => Err(ErrorKind::FormatMismatch),
        },
        _ => unreachable!("major type is 3 bits"),
    }
}

/// Converts a decimal fraction tag-4 payload `[exponent, mantissa]` to a
/// double, per `spec.md` §4.4. Used by `decode_scalar`'s `Item::Tag(4)` arm.
pub fn decimal_fraction_to_f64(exponent: i64, mantissa: i64) -> f64 {
    (mantissa as f64) * 10f64.powi(exponent as i32)
}

/// Writes a definite-length major-type header (array/map/bytes/text/tag)
/// into `out`, hand-rolled symmetrically with `peek_header`/`decode_item`
/// above. Returns the number of bytes written.
fn write_header(major: u8, arg: u64, out: &mut heapless::Vec<u8, 16>) -> Result<(), ErrorKind> {
    out.clear();
    let push = |out: &mut heapless::Vec<u8, 16>, b: u8| out.push(b).map_err(|_| ErrorKind::Logic);
    if arg < 24 {
        push(out, (major << 5) | arg as u8)?;
    } else if arg <= u8::MAX as u64 {
        push(out, (major << 5) | 24)?;
        push(out, arg as u8)?;
    } else if arg <= u16::MAX as u64 {
        push(out, (major << 5) | 25)?;
        for b in (arg as u16).to_be_bytes() {
            push(out, b)?;
        }
    } else if arg <= u32::MAX as u64 {
        push(out, (major << 5) | 26)?;
        for b in (arg as u32).to_be_bytes() {
            push(out, b)?;
        }
    } else {
        push(out, (major << 5) | 27)?;
        for b in arg.to_be_bytes() {
            push(out, b)?;
        }
    }
    Ok(())
}

/// Definite-length array header (major type 4).
pub fn write_array_header(n: u64, out: &mut heapless::Vec<u8, 16>) -> Result<(), ErrorKind> {
    write_header(4, n, out)
}

/// Definite-length map header (major type 5), `n` counts pairs.
pub fn write_map_header(n: u64, out: &mut heapless::Vec<u8, 16>) -> Result<(), ErrorKind> {
    write_header(5, n, out)
}

/// Definite-length byte string header (major type 2); payload bytes
/// follow separately via a `BytesCursor`.
pub fn write_bytes_header(len: u64, out: &mut heapless::Vec<u8, 16>) -> Result<(), ErrorKind> {
    write_header(2, len, out)
}

/// Definite-length text string header (major type 3).
pub fn write_text_header(len: u64, out: &mut heapless::Vec<u8, 16>) -> Result<(), ErrorKind> {
    write_header(3, len, out)
}

/// Tag header (major type 6).
pub fn write_tag(tag: u64, out: &mut heapless::Vec<u8, 16>) -> Result<(), ErrorKind> {
    write_header(6, tag, out)
}

/// The indefinite-length start markers and the terminating break, per
/// `spec.md` §4.4/§4.7 ("both [definite and indefinite map forms] are
/// allowed").
pub const BYTES_INDEFINITE_START: u8 = 0x5F;
pub const TEXT_INDEFINITE_START: u8 = 0x7F;
pub const ARRAY_INDEFINITE_START: u8 = 0x9F;
pub const MAP_INDEFINITE_START: u8 = 0xBF;
pub const BREAK: u8 = 0xFF;

struct Sink<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> MiniWrite for Sink<'a> {
    type Error = ErrorKind;

    fn write_all(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        if self.pos + bytes.len() > self.buf.len() {
            return Err(ErrorKind::Logic);
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }
}

/// Encodes a standalone CBOR value into `out` in one shot (used for
/// scalars small enough that streaming isn't worth the state machine:
/// int/uint/double/bool/null/object-link/time). Bytes and strings are
/// handled by the caller via `encode_header` + the shared external-data
/// cursors, since their payload may not fit in one call.
pub fn encode_scalar(value: &Value<'_>, out: &mut [u8]) -> Result<usize, ErrorKind> {
    // Time is tagged (tag(1), epoch seconds) and that tag prefix has no
    // `minicbor::Encoder` counterpart here, so it's written by hand rather
    // than through the shared `Sink`/`Encoder` pair below.
    if let Value::Time(v) = value {
        let mut tag_buf: heapless::Vec<u8, 16> = heapless::Vec::new();
        write_tag(1, &mut tag_buf)?;
        let (int_major, int_arg) = if *v < 0 {
            (1u8, (-1 - *v) as u64)
        } else {
            (0u8, *v as u64)
        };
        let mut int_buf: heapless::Vec<u8, 16> = heapless::Vec::new();
        write_header(int_major, int_arg, &mut int_buf)?;
        let total = tag_buf.len() + int_buf.len();
        if total > out.len() {
            return Err(ErrorKind::Logic);
        }
        out[..tag_buf.len()].copy_from_slice(&tag_buf);
        out[tag_buf.len()..total].copy_from_slice(&int_buf);
        return Ok(total);
    }

    let mut sink = Sink { buf: out, pos: 0 };
    let mut enc = minicbor::Encoder::new(&mut sink);
    match value {
        Value::Null => enc.null().map_err(|_| ErrorKind::Logic)?,
        Value::Int(v) => enc.i64(*v).map_err(|_| ErrorKind::Logic)?,
        Value::Uint(v) => enc.u64(*v).map_err(|_| ErrorKind::Logic)?,
        Value::Double(v) => enc.f64(*v).map_err(|_| ErrorKind::Logic)?,
        Value::Bool(v) => enc.bool(*v).map_err(|_| ErrorKind::Logic)?,
        Value::ObjectLink(ObjectLink {
            object_id,
            instance_id,
        }) => enc
            .array(2)
            .and_then(|e| e.u32(*object_id as u32))
            .and_then(|e| e.u32(*instance_id as u32))
            .map_err(|_| ErrorKind::Logic)?,
        _ => return Err(ErrorKind::IoType),
    };
    Ok(sink.pos)
}

/// Decodes one standalone scalar value from a fully-buffered slice,
/// given the permitted type mask resolved by the caller. Bytes/text are
/// not handled here (they need chunked delivery); callers should inspect
/// the raw `Item` directly via `decode_item` for those.
pub fn decode_scalar(buf: &[u8]) -> Result<Option<(Value<'static>, usize)>, ErrorKind> {
    let (item, n) = match decode_item(buf)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let value = match item {
        Item::Uint(v) => Value::Uint(v),
        Item::Int(v) => Value::Int(v),
        Item::Bool(v) => Value::Bool(v),
        Item::Float(v) => Value::Double(v),
        Item::Null => Value::Null,
        Item::ArrayHeader(Some(2)) => {
            let rest = &buf[n..];
            let (oid, n1) = match decode_item(rest)? {
                Some((Item::Uint(v), n)) => (v as u16, n),
                Some((_, _)) => return Err(ErrorKind::FormatMismatch),
                None => return Ok(None),
            };
            let rest2 = &rest[n1..];
            let (iid, n2) = match decode_item(rest2)? {
                Some((Item::Uint(v), n)) => (v as u16, n),
                Some((_, _)) => return Err(ErrorKind::FormatMismatch),
                None => return Ok(None),
            };
            return Ok(Some((
                Value::ObjectLink(ObjectLink {
                    object_id: oid,
                    instance_id: iid,
                }),
                n + n1 + n2,
            )));
        }
        Item::Tag(1) => {
            let rest = &buf[n..];
            let (epoch, n1) = match decode_item(rest)? {
                Some((Item::Uint(v), n1)) => (v as i64, n1),
                Some((Item::Int(v), n1)) => (v, n1),
                Some((_, _)) => return Err(ErrorKind::FormatMismatch),
                None => return Ok(None),
            };
            return Ok(Some((Value::Time(epoch), n + n1)));
        }
        Item::Tag(4) => {
            let rest = &buf[n..];
            let n1 = match decode_item(rest)? {
                Some((Item::ArrayHeader(Some(2)), n1)) => n1,
                Some((_, _)) => return Err(ErrorKind::FormatMismatch),
                None => return Ok(None),
            };
            let rest2 = &rest[n1..];
            let (exponent, n2) = match decode_item(rest2)? {
                Some((Item::Int(v), n2)) => (v, n2),
                Some((Item::Uint(v), n2)) => (v as i64, n2),
                Some((_, _)) => return Err(ErrorKind::FormatMismatch),
                None => return Ok(None),
            };
            let rest3 = &rest2[n2..];
            let (mantissa, n3) = match decode_item(rest3)? {
                Some((Item::Int(v), n3)) => (v, n3),
                Some((Item::Uint(v), n3)) => (v as i64, n3),
                Some((_, _)) => return Err(ErrorKind::FormatMismatch),
                None => return Ok(None),
            };
            let double = decimal_fraction_to_f64(exponent, mantissa);
            return Ok(Some((Value::Double(double), n + n1 + n2 + n3)));
        }
        Item::Tag(_) => return Err(ErrorKind::FormatMismatch),
        _ => return Err(ErrorKind::FormatMismatch),
    };
    Ok(Some((value, n)))
}

/// Status-carrying wrapper matching the rest of the codec layer's
/// `CodecResult` convention, for callers that want to drive this module
/// through the same `Result<Status, ErrorKind>` surface as the others.
pub fn eof_or_more(done: bool) -> CodecResult {
    if done {
        Ok(Status::Done)
    } else {
        Ok(Status::NeedNextCall)
    }
}

/// Resolves a decoded path fragment `(object-link like [oid, iid])` used
/// by hierarchical/SenML decoders when an object-link leaf value arrives.
pub fn object_link_from_ids(oid: u64, iid: u64) -> Result<ObjectLink, ErrorKind> {
    if oid > u16::MAX as u64 || iid > u16::MAX as u64 {
        return Err(ErrorKind::FormatMismatch);
    }
    Ok(ObjectLink {
        object_id: oid as u16,
        instance_id: iid as u16,
    })
}

/// A minimal helper used by the hierarchical/SenML codecs to validate
/// IDs decoded off the wire against `UriPath`'s legality rule.
pub fn path_id_from_u64(id: u64) -> Result<u16, ErrorKind> {
    if id >= crate::path::ID_INVALID as u64 {
        return Err(ErrorKind::FormatMismatch);
    }
    Ok(id as u16)
}

/// Streaming single-value CBOR encoder (content-format 60): one scalar,
/// bytes chunk, or string chunk per `new_entry`, mirroring `OpaqueEncoder`
/// and `PlainTextEncoder`'s header-then-body shape.
pub struct CborEncoder<'a> {
    header: heapless::Vec<u8, 16>,
    header_pos: usize,
    body: CborBody<'a>,
}

enum CborBody<'a> {
    None,
    Bytes(crate::io::external::BytesCursor<'a>),
    Text(crate::io::external::StringCursor<'a>),
}

impl<'a> CborEncoder<'a> {
    pub fn new() -> Self {
        CborEncoder {
            header: heapless::Vec::new(),
            header_pos: 0,
            body: CborBody::None,
        }
    }

    pub fn new_entry(&mut self, value: Value<'a>) -> Result<(), ErrorKind> {
        if self.header_pos < self.header.len() || !matches!(self.body, CborBody::None) {
            return Err(ErrorKind::Logic);
        }
        self.header.clear();
        self.header_pos = 0;
        match value {
            Value::Bytes(chunk) => {
                if chunk.full_length_hint == 0 {
                    return Err(ErrorKind::InputArg);
                }
                write_bytes_header(chunk.full_length_hint as u64, &mut self.header)?;
                self.body = CborBody::Bytes(crate::io::external::BytesCursor::from_chunk(chunk));
            }
            Value::ExternalBytes(src) => {
                self.body = CborBody::Bytes(crate::io::external::BytesCursor::from_source(src));
                self.header.push(BYTES_INDEFINITE_START).map_err(|_| ErrorKind::Logic)?;
            }
            Value::String(chunk) => {
                if chunk.full_length_hint == 0 {
                    return Err(ErrorKind::InputArg);
                }
                write_text_header(chunk.full_length_hint as u64, &mut self.header)?;
                self.body = CborBody::Text(crate::io::external::StringCursor::from_chunk(chunk));
            }
            Value::ExternalString(src) => {
                self.body = CborBody::Text(crate::io::external::StringCursor::from_source(src));
                self.header.push(TEXT_INDEFINITE_START).map_err(|_| ErrorKind::Logic)?;
            }
            other => {
                let mut tmp = [0u8; 16];
                let n = encode_scalar(&other, &mut tmp)?;
                self.header.extend_from_slice(&tmp[..n]).map_err(|_| ErrorKind::Logic)?;
            }
        }
        Ok(())
    }

    pub fn get_payload(&mut self, out: &mut [u8]) -> Result<(usize, Status), ErrorKind> {
        if self.header_pos < self.header.len() {
            let remaining = &self.header[self.header_pos..];
            let n = remaining.len().min(out.len());
            out[..n].copy_from_slice(&remaining[..n]);
            self.header_pos += n;
            if self.header_pos == self.header.len() && matches!(self.body, CborBody::None) {
                return Ok((n, Status::Done));
            }
            return Ok((n, Status::NeedNextCall));
        }
        match &mut self.body {
            CborBody::None => Ok((0, Status::Done)),
            CborBody::Bytes(cursor) => {
                let (n, last) = cursor.pull(out)?;
                if last {
                    self.body = CborBody::None;
                    Ok((n, Status::Done))
                } else {
                    Ok((n, Status::NeedNextCall))
                }
            }
            CborBody::Text(cursor) => {
                let (n, last) = cursor.pull(out)?;
                if last {
                    self.body = CborBody::None;
                    Ok((n, Status::Done))
                } else {
                    Ok((n, Status::NeedNextCall))
                }
            }
        }
    }
}

impl<'a> Default for CborEncoder<'a> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes a single-value CBOR payload (content-format 60). Bytes/text
/// values must be definite-length (the common case for a one-shot
/// payload); indefinite chunked single values are rejected, since the
/// single-value format has no onward path/array context to hang further
/// chunks off of.
pub fn decode(buf: &[u8]) -> Result<Option<Value<'_>>, ErrorKind> {
    let (item, n) = match decode_item(buf)? {
        Some(v) => v,
        None => return Ok(None),
    };
    match item {
        Item::Bytes(b) => Ok(Some(Value::Bytes(crate::value::Chunk::new(b, 0, b.len())))),
        Item::Text(s) => Ok(Some(Value::String(crate::value::Chunk::new(s, 0, s.len())))),
        Item::ArrayHeader(Some(2)) => match decode_scalar(buf)? {
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        },
        _ => {
            let _ = n;
            match decode_scalar(buf)? {
                Some((value, _)) => Ok(Some(value)),
                None => Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_small_uint() {
        let (item, n) = decode_item(&[0x05]).unwrap().unwrap();
        assert_eq!(item, Item::Uint(5));
        assert_eq!(n, 1);
    }

    #[test]
    fn decode_negative_int() {
        // -10 encodes as major 1, arg 9
        let (item, n) = decode_item(&[0x29]).unwrap().unwrap();
        assert_eq!(item, Item::Int(-10));
        assert_eq!(n, 1);
    }

    #[test]
    fn decode_reports_need_more_mid_header() {
        // info=25 (2-byte arg) but only the first arg byte present
        assert_eq!(decode_item(&[0x19, 0x01]).unwrap(), None);
    }

    #[test]
    fn decode_reports_need_more_mid_string_payload() {
        // text string header says length 5, only 2 bytes available
        assert_eq!(decode_item(b"\x65he").unwrap(), None);
    }

    #[test]
    fn decode_text_string() {
        let (item, n) = decode_item(b"\x64text").unwrap().unwrap();
        assert_eq!(item, Item::Text("text"));
        assert_eq!(n, 5);
    }

    #[test]
    fn decode_indefinite_bytes_start_and_break() {
        let (item, n) = decode_item(&[0x5F]).unwrap().unwrap();
        assert_eq!(item, Item::BytesIndefiniteStart);
        assert_eq!(n, 1);
        let (item, _) = decode_item(&[0xFF]).unwrap().unwrap();
        assert_eq!(item, Item::Break);
    }

    #[test]
    fn decimal_fraction_conversion() {
        // [-2, 42] -> 0.42
        let v = decimal_fraction_to_f64(-2, 42);
        assert!((v - 0.42).abs() < 1e-9);
    }

    #[test]
    fn encode_decode_uint_scalar_round_trips() {
        let mut out = [0u8; 16];
        let n = encode_scalar(&Value::Uint(42), &mut out).unwrap();
        assert_eq!(&out[..n], &[0x18, 0x2A]);
        let (value, consumed) = decode_scalar(&out[..n]).unwrap().unwrap();
        assert_eq!(consumed, n);
        match value {
            Value::Uint(42) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decode_tag4_decimal_fraction() {
        // tag(4), [-1, 45] -> 45 * 10^-1 = 4.5
        let bytes = [0xC4, 0x82, 0x20, 0x18, 0x2D];
        let (value, n) = decode_scalar(&bytes).unwrap().unwrap();
        assert_eq!(n, bytes.len());
        match value {
            Value::Double(v) => assert!((v - 4.5).abs() < 1e-9),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn time_scalar_round_trips_through_tag1() {
        let mut out = [0u8; 16];
        let n = encode_scalar(&Value::Time(1_700_000_000), &mut out).unwrap();
        assert_eq!(out[0] >> 5, 6); // tag major type
        let (value, consumed) = decode_scalar(&out[..n]).unwrap().unwrap();
        assert_eq!(consumed, n);
        match value {
            Value::Time(1_700_000_000) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn negative_time_scalar_round_trips() {
        let mut out = [0u8; 16];
        let n = encode_scalar(&Value::Time(-5), &mut out).unwrap();
        let (value, _) = decode_scalar(&out[..n]).unwrap().unwrap();
        match value {
            Value::Time(-5) => {}
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn object_link_round_trips() {
        let link = ObjectLink {
            object_id: 3,
            instance_id: 7,
        };
        let mut out = [0u8; 16];
        let n = encode_scalar(&Value::ObjectLink(link), &mut out).unwrap();
        let (value, _) = decode_scalar(&out[..n]).unwrap().unwrap();
        match value {
            Value::ObjectLink(l) => assert_eq!(l, link),
            other => panic!("unexpected {other:?}"),
        }
    }
}
