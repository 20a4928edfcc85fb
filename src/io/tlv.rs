//! TLV codec (`spec.md` §4.5, content-format 11542).
//!
//! Each entry is a type byte (identifier kind in bits 7–6, identifier
//! width in bit 5, length-of-length in bits 4–3, inline length in bits
//! 2–0 when length-of-length is 0) followed by the identifier and an
//! optional explicit length field, then the value bytes.
//!
//! The encoder follows the first strategy `spec.md` §4.5 sanctions for
//! the header back-patch problem: "(a) stage headers in a fixed small
//! stack and back-patch". Each open container frame accumulates its
//! children's encoded bytes in a bounded internal buffer; the frame's
//! header (which needs the total body length) is written only once the
//! frame closes, at which point the finished bytes fold into the parent
//! frame (or the root output queue). This bounds a single TLV object
//! instance's encoded size to `FRAME_BODY_CAP` bytes per nesting level —
//! ample for attribute-sized resources, not for streaming multi-kilobyte
//! blobs (use Opaque or CBOR for those).

use crate::error::{ErrorKind, Status};
use crate::path::UriPath;
use crate::value::{Chunk, ObjectLink, Value};

const FRAME_BODY_CAP: usize = 256;
const OUT_QUEUE_CAP: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TlvKind {
    Instance,
    ResourceInstance,
    MultiResource,
    Resource,
}

impl TlvKind {
    fn from_bits(bits: u8) -> TlvKind {
        match bits {
            0 => TlvKind::Instance,
            1 => TlvKind::ResourceInstance,
            2 => TlvKind::MultiResource,
            _ => TlvKind::Resource,
        }
    }

    fn bits(self) -> u8 {
        match self {
            TlvKind::Instance => 0,
            TlvKind::ResourceInstance => 1,
            TlvKind::MultiResource => 2,
            TlvKind::Resource => 3,
        }
    }

    fn is_container(self) -> bool {
        matches!(self, TlvKind::Instance | TlvKind::MultiResource)
    }
}

struct TlvHeader {
    kind: TlvKind,
    id: u16,
    length: usize,
    header_len: usize,
}

fn peek_tlv_header(buf: &[u8]) -> Result<Option<TlvHeader>, ErrorKind> {
    if buf.is_empty() {
        return Ok(None);
    }
    let b0 = buf[0];
    if b0 == 0xFF {
        return Err(ErrorKind::FormatMismatch);
    }
    let kind = TlvKind::from_bits((b0 >> 6) & 0b11);
    let id_len = if (b0 >> 5) & 1 == 1 { 2 } else { 1 };
    let len_type = (b0 >> 3) & 0b11;
    let mut pos = 1usize;
    if buf.len() < pos + id_len {
        return Ok(None);
    }
    let id = if id_len == 1 {
        buf[pos] as u16
    } else {
        u16::from_be_bytes([buf[pos], buf[pos + 1]])
    };
    pos += id_len;
    let length = if len_type == 0 {
        (b0 & 0b111) as usize
    } else {
        let n = len_type as usize;
        if buf.len() < pos + n {
            return Ok(None);
        }
        let mut v: usize = 0;
        for i in 0..n {
            v = (v << 8) | buf[pos + i] as usize;
        }
        pos += n;
        v
    };
    Ok(Some(TlvHeader {
        kind,
        id,
        length,
        header_len: pos,
    }))
}

fn write_tlv_header(
    kind: TlvKind,
    id: u16,
    length: usize,
    out: &mut heapless::Vec<u8, FRAME_BODY_CAP>,
) -> Result<(), ErrorKind> {
    let id_len_bit = if id > 0xFF { 1u8 } else { 0u8 };
    let len_type: u8 = if length < 8 {
        0
    } else if length <= 0xFF {
        1
    } else if length <= 0xFFFF {
        2
    } else {
        3
    };
    let b0 = (kind.bits() << 6)
        | (id_len_bit << 5)
        | (len_type << 3)
        | if len_type == 0 { length as u8 } else { 0 };
    out.push(b0).map_err(|_| ErrorKind::Logic)?;
    if id_len_bit == 1 {
        for b in id.to_be_bytes() {
            out.push(b).map_err(|_| ErrorKind::Logic)?;
        }
    } else {
        out.push(id as u8).map_err(|_| ErrorKind::Logic)?;
    }
    if len_type != 0 {
        let n = len_type as usize;
        let bytes = (length as u32).to_be_bytes();
        for &b in &bytes[4 - n..] {
            out.push(b).map_err(|_| ErrorKind::Logic)?;
        }
    }
    Ok(())
}

/// One decoded leaf or empty-container event.
#[derive(Debug, Clone, Copy)]
pub enum TlvEvent<'a> {
    /// An empty Instance or Multiple-Resource frame: `spec.md` §4.5 "zero
    /// length non-leaf frames (empty instance) yield a null value".
    Null(UriPath),
    /// A leaf carrying raw, type-undetermined bytes the caller must
    /// disambiguate via `interpret`.
    Leaf { path: UriPath, raw: &'a [u8] },
}

struct DecodeFrame {
    id: u16,
    declared_len: usize,
    consumed: usize,
}

/// Streaming TLV decoder. `next_entry` is idempotent: call it again with
/// a longer accumulated buffer (same start) after it returns `Ok(None)`.
pub struct TlvDecoder {
    base: UriPath,
    stack: heapless::Vec<DecodeFrame, 4>,
    offset: usize,
}

impl TlvDecoder {
    pub fn new(base: UriPath) -> Self {
        TlvDecoder {
            base,
            stack: heapless::Vec::new(),
            offset: 0,
        }
    }

    fn path_with(&self, id: u16) -> Result<UriPath, ErrorKind> {
        let mut p = self.base;
        for frame in &self.stack {
            p = p.push(frame.id).ok_or(ErrorKind::FormatMismatch)?;
        }
        p.push(id).ok_or(ErrorKind::FormatMismatch)
    }

    /// Attempts to decode the next leaf/null event from `buf` (the full
    /// accumulated payload since the start of the decode, not just the
    /// newly arrived chunk). `Ok(None)` means more input is needed.
    pub fn next_entry<'a>(&mut self, buf: &'a [u8]) -> Result<Option<TlvEvent<'a>>, ErrorKind> {
        loop {
            while let Some(top) = self.stack.last() {
                if top.consumed >= top.declared_len {
                    self.stack.pop();
                } else {
                    break;
                }
            }
            let remaining = &buf[self.offset..];
            let header = match peek_tlv_header(remaining)? {
                Some(h) => h,
                None => return Ok(None),
            };
            if header.kind.is_container() {
                if header.length == 0 {
                    self.offset += header.header_len;
                    if let Some(top) = self.stack.last_mut() {
                        top.consumed += header.header_len;
                    }
                    let path = self.path_with(header.id)?;
                    return Ok(Some(TlvEvent::Null(path)));
                }
                if self.stack.len() >= 4 {
                    return Err(ErrorKind::FormatMismatch);
                }
                if let Some(top) = self.stack.last_mut() {
                    top.consumed += header.header_len;
                }
                self.offset += header.header_len;
                self.stack
                    .push(DecodeFrame {
                        id: header.id,
                        declared_len: header.length,
                        consumed: 0,
                    })
                    .map_err(|_| ErrorKind::FormatMismatch)?;
                continue;
            }
            let total = header.header_len + header.length;
            if remaining.len() < total {
                return Ok(None);
            }
            self.offset += total;
            if let Some(top) = self.stack.last_mut() {
                top.consumed += total;
            }
            let path = self.path_with(header.id)?;
            let raw = &remaining[header.header_len..total];
            return Ok(Some(TlvEvent::Leaf { path, raw }));
        }
    }
}

/// Target type for leaf disambiguation, per `spec.md` §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeTarget {
    Int,
    Uint,
    Double,
    Bool,
    ObjectLink,
    Time,
    Bytes,
    String,
}

/// Interprets raw leaf bytes as the caller-chosen type.
pub fn interpret<'a>(raw: &'a [u8], target: DecodeTarget) -> Result<Value<'a>, ErrorKind> {
    match target {
        DecodeTarget::Bytes => Ok(Value::Bytes(Chunk::new(raw, 0, raw.len()))),
        DecodeTarget::String => {
            let s = core::str::from_utf8(raw).map_err(|_| ErrorKind::FormatMismatch)?;
            Ok(Value::String(Chunk::new(s, 0, s.len())))
        }
        DecodeTarget::Bool => {
            if raw.len() != 1 || raw[0] > 1 {
                return Err(ErrorKind::FormatMismatch);
            }
            Ok(Value::Bool(raw[0] == 1))
        }
        DecodeTarget::ObjectLink => {
            if raw.len() != 4 {
                return Err(ErrorKind::FormatMismatch);
            }
            Ok(Value::ObjectLink(ObjectLink {
                object_id: u16::from_be_bytes([raw[0], raw[1]]),
                instance_id: u16::from_be_bytes([raw[2], raw[3]]),
            }))
        }
        DecodeTarget::Double => match raw.len() {
            4 => {
                let mut b = [0u8; 4];
                b.copy_from_slice(raw);
                Ok(Value::Double(f32::from_be_bytes(b) as f64))
            }
            8 => {
                let mut b = [0u8; 8];
                b.copy_from_slice(raw);
                Ok(Value::Double(f64::from_be_bytes(b)))
            }
            _ => Err(ErrorKind::FormatMismatch),
        },
        DecodeTarget::Int | DecodeTarget::Uint | DecodeTarget::Time => {
            if !matches!(raw.len(), 1 | 2 | 4 | 8) {
                return Err(ErrorKind::FormatMismatch);
            }
            let mut v: i64 = if raw[0] & 0x80 != 0 && target != DecodeTarget::Uint {
                -1
            } else {
                0
            };
            for &b in raw {
                v = (v << 8) | b as i64;
            }
            match target {
                DecodeTarget::Int | DecodeTarget::Time => Ok(if target == DecodeTarget::Time {
                    Value::Time(v)
                } else {
                    Value::Int(v)
                }),
                DecodeTarget::Uint => {
                    let mut uv: u64 = 0;
                    for &b in raw {
                        uv = (uv << 8) | b as u64;
                    }
                    Ok(Value::Uint(uv))
                }
                _ => unreachable!(),
            }
        }
    }
}

struct FrameBuf {
    id: u16,
    kind: TlvKind,
    body: heapless::Vec<u8, FRAME_BODY_CAP>,
}

/// Streaming TLV encoder: entries must arrive in strictly ascending path
/// order within `base`, per `spec.md` §4.5.
pub struct TlvEncoder {
    base: UriPath,
    stack: heapless::Vec<FrameBuf, 4>,
    last_path: Option<UriPath>,
    out_queue: heapless::Vec<u8, OUT_QUEUE_CAP>,
    out_pos: usize,
    finished: bool,
}

impl TlvEncoder {
    pub fn new(base: UriPath) -> Self {
        TlvEncoder {
            base,
            stack: heapless::Vec::new(),
            last_path: None,
            out_queue: heapless::Vec::new(),
            out_pos: 0,
            finished: false,
        }
    }

    fn append_closed(&mut self, kind: TlvKind, id: u16, body: &[u8]) -> Result<(), ErrorKind> {
        match self.stack.last_mut() {
            Some(parent) => {
                write_tlv_header(kind, id, body.len(), &mut parent.body)?;
                parent
                    .body
                    .extend_from_slice(body)
                    .map_err(|_| ErrorKind::Logic)
            }
            None => {
                let mut header = heapless::Vec::<u8, FRAME_BODY_CAP>::new();
                write_tlv_header(kind, id, body.len(), &mut header)?;
                self.out_queue
                    .extend_from_slice(&header)
                    .map_err(|_| ErrorKind::Logic)?;
                self.out_queue
                    .extend_from_slice(body)
                    .map_err(|_| ErrorKind::Logic)
            }
        }
    }

    fn close_to_level(&mut self, keep: usize) -> Result<(), ErrorKind> {
        while self.stack.len() > keep {
            let frame = self.stack.pop().unwrap();
            self.append_closed(frame.kind, frame.id, &frame.body)?;
        }
        Ok(())
    }

    fn encode_value_bytes(value: &Value<'_>) -> Result<heapless::Vec<u8, FRAME_BODY_CAP>, ErrorKind> {
        let mut out = heapless::Vec::new();
        match value {
            Value::Int(v) | Value::Time(v) => {
                let bytes = v.to_be_bytes();
                let width = minimal_signed_width(*v);
                out.extend_from_slice(&bytes[8 - width..])
                    .map_err(|_| ErrorKind::Logic)?;
            }
            Value::Uint(v) => {
                let bytes = v.to_be_bytes();
                let width = minimal_unsigned_width(*v);
                out.extend_from_slice(&bytes[8 - width..])
                    .map_err(|_| ErrorKind::Logic)?;
            }
            Value::Bool(v) => out.push(if *v { 1 } else { 0 }).map_err(|_| ErrorKind::Logic)?,
            Value::Double(v) => out
                .extend_from_slice(&v.to_be_bytes())
                .map_err(|_| ErrorKind::Logic)?,
            Value::ObjectLink(ObjectLink {
                object_id,
                instance_id,
            }) => {
                out.extend_from_slice(&object_id.to_be_bytes())
                    .map_err(|_| ErrorKind::Logic)?;
                out.extend_from_slice(&instance_id.to_be_bytes())
                    .map_err(|_| ErrorKind::Logic)?;
            }
            Value::Bytes(chunk) => {
                if !chunk.is_last() && chunk.full_length_hint != 0 {
                    return Err(ErrorKind::InputArg);
                }
                out.extend_from_slice(chunk.data).map_err(|_| ErrorKind::Logic)?;
            }
            Value::String(chunk) => {
                if !chunk.is_last() && chunk.full_length_hint != 0 {
                    return Err(ErrorKind::InputArg);
                }
                out.extend_from_slice(chunk.data.as_bytes())
                    .map_err(|_| ErrorKind::Logic)?;
            }
            Value::Null => {}
            Value::ExternalBytes(_) | Value::ExternalString(_) => {
                return Err(ErrorKind::InputArg);
            }
        }
        Ok(out)
    }

    /// Adds one leaf entry. `path` must extend `base` (`spec.md` §4.1
    /// `outside_base`) and must be strictly greater than the previous
    /// entry's path.
    pub fn new_entry(&mut self, path: UriPath, value: Value<'_>) -> Result<(), ErrorKind> {
        if path.outside_base(&self.base) || path.length() <= self.base.length() {
            return Err(ErrorKind::InputArg);
        }
        if let Some(last) = self.last_path {
            if path <= last {
                return Err(ErrorKind::Logic);
            }
        }
        let mut divergence = 0usize;
        if let Some(last) = self.last_path {
            for i in 0..self.stack.len() {
                let level = self.base.length() + i;
                if last.id_at(level) == path.id_at(level) {
                    divergence = i + 1;
                } else {
                    break;
                }
            }
        }
        self.close_to_level(divergence)?;

        let leaf_level = path.length();
        for level in (self.base.length() + self.stack.len() + 1)..leaf_level {
            let id = path.id_at(level - 1).ok_or(ErrorKind::InputArg)?;
            let kind = match level - self.base.length() {
                1 => TlvKind::Instance,
                2 => TlvKind::MultiResource,
                _ => return Err(ErrorKind::InputArg),
            };
            self.stack
                .push(FrameBuf {
                    id,
                    kind,
                    body: heapless::Vec::new(),
                })
                .map_err(|_| ErrorKind::Logic)?;
        }

        let leaf_id = path.id_at(leaf_level - 1).ok_or(ErrorKind::InputArg)?;
        let leaf_kind = match leaf_level - self.base.length() {
            1 => TlvKind::Instance,
            2 => TlvKind::Resource,
            3 => TlvKind::ResourceInstance,
            _ => return Err(ErrorKind::InputArg),
        };
        if leaf_kind == TlvKind::Instance && !matches!(value, Value::Null) {
            return Err(ErrorKind::IoType);
        }
        let body = Self::encode_value_bytes(&value)?;
        self.append_closed(leaf_kind, leaf_id, &body)?;
        self.last_path = Some(path);
        Ok(())
    }

    /// Closes every still-open frame. Call once after the last
    /// `new_entry`, before draining the final `get_payload`s.
    pub fn finish(&mut self) -> Result<(), ErrorKind> {
        self.close_to_level(0)?;
        self.finished = true;
        Ok(())
    }

    pub fn get_payload(&mut self, out: &mut [u8]) -> Result<(usize, Status), ErrorKind> {
        let remaining = &self.out_queue[self.out_pos..];
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        self.out_pos += n;
        if self.out_pos == self.out_queue.len() {
            self.out_queue.clear();
            self.out_pos = 0;
            if self.finished && self.stack.is_empty() {
                return Ok((n, Status::Done));
            }
        }
        Ok((n, Status::NeedNextCall))
    }
}

fn minimal_signed_width(v: i64) -> usize {
    if v >= i8::MIN as i64 && v <= i8::MAX as i64 {
        1
    } else if v >= i16::MIN as i64 && v <= i16::MAX as i64 {
        2
    } else if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
        4
    } else {
        8
    }
}

fn minimal_unsigned_width(v: u64) -> usize {
    if v <= u8::MAX as u64 {
        1
    } else if v <= u16::MAX as u64 {
        2
    } else if v <= u32::MAX as u64 {
        4
    } else {
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_nested_instance_with_mixed_leaf_types() {
        // \x08\x04\x13\xC1\x05\x0A\xC8\x06\x0D "Hello, world!" under base
        // /3 yields /3/4/5=int(10) then /3/4/6=string(...).
        let mut payload: heapless::Vec<u8, 64> = heapless::Vec::new();
        payload
            .extend_from_slice(&[0x08, 0x04, 0x13, 0xC1, 0x05, 0x0A, 0xC8, 0x06, 0x0D])
            .unwrap();
        payload.extend_from_slice(b"Hello, world!").unwrap();

        let base = UriPath::object(3).unwrap();
        let mut dec = TlvDecoder::new(base);
        let e1 = dec.next_entry(&payload).unwrap().unwrap();
        match e1 {
            TlvEvent::Leaf { path, raw } => {
                assert_eq!(path, UriPath::resource(3, 4, 5).unwrap());
                match interpret(raw, DecodeTarget::Int).unwrap() {
                    Value::Int(v) => assert_eq!(v, 10),
                    other => panic!("expected int, got {other:?}"),
                }
            }
            _ => panic!("expected leaf"),
        }
        let e2 = dec.next_entry(&payload).unwrap().unwrap();
        match e2 {
            TlvEvent::Leaf { path, raw } => {
                assert_eq!(path, UriPath::resource(3, 4, 6).unwrap());
                match interpret(raw, DecodeTarget::String).unwrap() {
                    Value::String(c) => assert_eq!(c.data, "Hello, world!"),
                    _ => panic!("expected string"),
                }
            }
            _ => panic!("expected leaf"),
        }
        assert!(dec.next_entry(&payload).unwrap().is_none());
    }

    #[test]
    fn encoder_matches_reference_byte_sequence() {
        let base = UriPath::object(3).unwrap();
        let mut enc = TlvEncoder::new(base);
        enc.new_entry(UriPath::resource(3, 4, 5).unwrap(), Value::Int(10))
            .unwrap();
        enc.new_entry(
            UriPath::resource(3, 4, 6).unwrap(),
            Value::String(Chunk::new("Hello, world!", 0, 13)),
        )
        .unwrap();
        enc.finish().unwrap();
        let mut out: heapless::Vec<u8, 64> = heapless::Vec::new();
        loop {
            let mut buf = [0u8; 8];
            let (n, status) = enc.get_payload(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]).unwrap();
            if status == Status::Done {
                break;
            }
        }
        let mut expected: heapless::Vec<u8, 64> = heapless::Vec::new();
        expected
            .extend_from_slice(&[0x08, 0x04, 0x13, 0xC1, 0x05, 0x0A, 0xC8, 0x06, 0x0D])
            .unwrap();
        expected.extend_from_slice(b"Hello, world!").unwrap();
        assert_eq!(out.as_slice(), expected.as_slice());
    }

    #[test]
    fn encoder_rejects_out_of_order_ids() {
        let base = UriPath::object(3).unwrap();
        let mut enc = TlvEncoder::new(base);
        enc.new_entry(UriPath::resource(3, 4, 6).unwrap(), Value::Int(1))
            .unwrap();
        assert!(enc
            .new_entry(UriPath::resource(3, 4, 5).unwrap(), Value::Int(2))
            .is_err());
    }

    #[test]
    fn empty_instance_decodes_to_null() {
        let base = UriPath::object(3).unwrap();
        let mut dec = TlvDecoder::new(base);
        let buf = [0x00u8]; // kind=Instance, id_len=1byte(id=0), len_type=0,len=0
        match dec.next_entry(&buf).unwrap().unwrap() {
            TlvEvent::Null(path) => assert_eq!(path, UriPath::instance(3, 0).unwrap()),
            _ => panic!("expected null"),
        }
    }

    #[test]
    fn rejects_reserved_type_byte() {
        let base = UriPath::object(3).unwrap();
        let mut dec = TlvDecoder::new(base);
        assert!(dec.next_entry(&[0xFF]).is_err());
    }
}
