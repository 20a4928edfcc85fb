//! Hierarchical (LwM2M) CBOR codec (`spec.md` §4.7, content-format 11544):
//! a CBOR map nested by path id, keyed either by a single id or by an
//! array of remaining ids collapsing a single-child chain down to one
//! leaf key.
//!
//! The encoder never emits collapsed keys itself (collapsing is optional
//! per the format, not mandatory) but the decoder understands them from a
//! peer. Every nested map the encoder opens is indefinite-length, which
//! sidesteps needing to know a level's child count up front; an empty
//! map (definite `{}`, or an indefinite map whose first item is the
//! break) is reported as a `Null` entry at that path, matching the
//! "empty container" convention TLV uses for instances.
//!
//! Leaf byte/text values must have a known length (`Chunk::full_length_hint
//! != 0`); unlike SenML-CBOR, this codec does not support indefinite
//! chunked leaf values.

use crate::error::{ErrorKind, Status};
use crate::io::cbor::{self, decode_item, Item};
use crate::io::external::{BytesCursor, StringCursor};
use crate::path::UriPath;
use crate::value::{Chunk, ObjectLink, Value};

struct DecFrame {
    remaining: Option<u64>,
    done: u64,
}

pub enum HCborEvent<'b> {
    NeedMore,
    Eof,
    Null(UriPath),
    Leaf(UriPath, Value<'b>),
}

/// Streaming hierarchical-CBOR decoder.
pub struct HCborDecoder {
    base: UriPath,
    offset: usize,
    stack: heapless::Vec<DecFrame, 4>,
    path_ids: heapless::Vec<u16, 4>,
}

impl HCborDecoder {
    pub fn new(base: UriPath) -> Self {
        HCborDecoder {
            base,
            offset: 0,
            stack: heapless::Vec::new(),
            path_ids: heapless::Vec::new(),
        }
    }

    fn close_current_frame(&mut self) -> Result<Option<UriPath>, ErrorKind> {
        let depth = self.stack.len() - 1;
        let was_empty = depth > 0 && self.stack[depth].done == 0;
        let path = if was_empty {
            let mut p = self.base;
            for &id in self.path_ids.iter() {
                p = p.push(id).ok_or(ErrorKind::FormatMismatch)?;
            }
            Some(p)
        } else {
            None
        };
        self.stack.pop();
        if depth > 0 {
            self.path_ids.pop();
        }
        Ok(path)
    }

    pub fn next_entry<'b>(&mut self, buf: &'b [u8]) -> Result<HCborEvent<'b>, ErrorKind> {
        loop {
            if self.stack.is_empty() {
                let (item, n) = match decode_item(&buf[self.offset..])? {
                    Some(v) => v,
                    None => return Ok(HCborEvent::NeedMore),
                };
                let count = match item {
                    Item::MapHeader(c) => c,
                    _ => return Err(ErrorKind::FormatMismatch),
                };
                self.offset += n;
                self.stack
                    .push(DecFrame {
                        remaining: count,
                        done: 0,
                    })
                    .map_err(|_| ErrorKind::Logic)?;
                continue;
            }
            let depth = self.stack.len() - 1;
            if let Some(c) = self.stack[depth].remaining {
                if self.stack[depth].done >= c {
                    let null_path = self.close_current_frame()?;
                    if self.stack.is_empty() {
                        return Ok(HCborEvent::Eof);
                    }
                    if let Some(p) = null_path {
                        return Ok(HCborEvent::Null(p));
                    }
                    continue;
                }
            }
            let (key_item, kn) = match decode_item(&buf[self.offset..])? {
                Some(v) => v,
                None => return Ok(HCborEvent::NeedMore),
            };
            if matches!(key_item, Item::Break) {
                if self.stack[depth].remaining.is_some() {
                    return Err(ErrorKind::FormatMismatch);
                }
                self.offset += kn;
                let null_path = self.close_current_frame()?;
                if self.stack.is_empty() {
                    return Ok(HCborEvent::Eof);
                }
                if let Some(p) = null_path {
                    return Ok(HCborEvent::Null(p));
                }
                continue;
            }

            let mut ids: heapless::Vec<u16, 4> = heapless::Vec::new();
            let mut pos = self.offset + kn;
            match key_item {
                Item::Uint(id) => ids
                    .push(cbor::path_id_from_u64(id)?)
                    .map_err(|_| ErrorKind::Logic)?,
                Item::ArrayHeader(Some(c)) => {
                    for _ in 0..c {
                        let (idi, idn) = match decode_item(&buf[pos..])? {
                            Some(v) => v,
                            None => return Ok(HCborEvent::NeedMore),
                        };
                        match idi {
                            Item::Uint(id) => ids
                                .push(cbor::path_id_from_u64(id)?)
                                .map_err(|_| ErrorKind::Logic)?,
                            _ => return Err(ErrorKind::FormatMismatch),
                        }
                        pos += idn;
                    }
                }
                _ => return Err(ErrorKind::FormatMismatch),
            }
            if self.path_ids.len() + ids.len() > 4 {
                return Err(ErrorKind::FormatMismatch);
            }

            let (val_item, vn) = match decode_item(&buf[pos..])? {
                Some(v) => v,
                None => return Ok(HCborEvent::NeedMore),
            };

            if let Item::MapHeader(child_count) = val_item {
                if ids.len() != 1 {
                    return Err(ErrorKind::FormatMismatch);
                }
                self.stack[depth].done += 1;
                self.offset = pos + vn;
                self.path_ids
                    .push(ids[0])
                    .map_err(|_| ErrorKind::FormatMismatch)?;
                self.stack
                    .push(DecFrame {
                        remaining: child_count,
                        done: 0,
                    })
                    .map_err(|_| ErrorKind::Logic)?;
                continue;
            }

            let (value, leaf_end) = match val_item {
                Item::Uint(v) => (Value::Uint(v), pos + vn),
                Item::Int(v) => (Value::Int(v), pos + vn),
                Item::Bool(v) => (Value::Bool(v), pos + vn),
                Item::Float(v) => (Value::Double(v), pos + vn),
                Item::Null => (Value::Null, pos + vn),
                Item::Bytes(b) => (Value::Bytes(Chunk::new(b, 0, b.len())), pos + vn),
                Item::Text(s) => (Value::String(Chunk::new(s, 0, s.len())), pos + vn),
                Item::ArrayHeader(Some(2)) => {
                    let after_hdr = pos + vn;
                    let (oid_item, on) = match decode_item(&buf[after_hdr..])? {
                        Some(v) => v,
                        None => return Ok(HCborEvent::NeedMore),
                    };
                    let oid = match oid_item {
                        Item::Uint(x) => cbor::path_id_from_u64(x)?,
                        _ => return Err(ErrorKind::FormatMismatch),
                    };
                    let after_oid = after_hdr + on;
                    let (iid_item, inn) = match decode_item(&buf[after_oid..])? {
                        Some(v) => v,
                        None => return Ok(HCborEvent::NeedMore),
                    };
                    let iid = match iid_item {
                        Item::Uint(x) => cbor::path_id_from_u64(x)?,
                        _ => return Err(ErrorKind::FormatMismatch),
                    };
                    (
                        Value::ObjectLink(ObjectLink {
                            object_id: oid,
                            instance_id: iid,
                        }),
                        after_oid + inn,
                    )
                }
                _ => return Err(ErrorKind::FormatMismatch),
            };

            self.stack[depth].done += 1;
            self.offset = leaf_end;
            let mut path = self.base;
            for &id in self.path_ids.iter() {
                path = path.push(id).ok_or(ErrorKind::FormatMismatch)?;
            }
            for &id in ids.iter() {
                path = path.push(id).ok_or(ErrorKind::FormatMismatch)?;
            }
            return Ok(HCborEvent::Leaf(path, value));
        }
    }
}

enum Body<'a> {
    None,
    Bytes(BytesCursor<'a>),
    Text(StringCursor<'a>),
}

/// Streaming hierarchical-CBOR encoder. Always emits indefinite-length
/// maps at every nesting level, including the outer one.
pub struct HCborEncoder<'a> {
    base: UriPath,
    started: bool,
    finished: bool,
    closed: bool,
    open_ids: heapless::Vec<u16, 4>,
    last_path: Option<UriPath>,
    out_queue: heapless::Vec<u8, 256>,
    out_pos: usize,
    body: Body<'a>,
}

impl<'a> HCborEncoder<'a> {
    pub fn new(base: UriPath) -> Self {
        HCborEncoder {
            base,
            started: false,
            finished: false,
            closed: false,
            open_ids: heapless::Vec::new(),
            last_path: None,
            out_queue: heapless::Vec::new(),
            out_pos: 0,
            body: Body::None,
        }
    }

    fn push_id_key(&mut self, id: u16) -> Result<(), ErrorKind> {
        let mut tmp = [0u8; 16];
        let n = cbor::encode_scalar(&Value::Uint(id as u64), &mut tmp)?;
        self.out_queue
            .extend_from_slice(&tmp[..n])
            .map_err(|_| ErrorKind::Logic)
    }

    pub fn new_entry(&mut self, path: UriPath, value: Value<'a>) -> Result<(), ErrorKind> {
        if self.out_pos < self.out_queue.len() || !matches!(self.body, Body::None) {
            return Err(ErrorKind::Logic);
        }
        if path.outside_base(&self.base) || path.length() <= self.base.length() {
            return Err(ErrorKind::InputArg);
        }
        if let Some(last) = self.last_path {
            if path <= last {
                return Err(ErrorKind::Logic);
            }
        }

        if !self.started {
            self.out_queue
                .push(cbor::MAP_INDEFINITE_START)
                .map_err(|_| ErrorKind::Logic)?;
            self.started = true;
        }

        let mut rel: heapless::Vec<u16, 4> = heapless::Vec::new();
        for i in self.base.length()..path.length() {
            rel.push(path.id_at(i).unwrap()).map_err(|_| ErrorKind::Logic)?;
        }
        let parent = &rel[..rel.len() - 1];
        let leaf_id = rel[rel.len() - 1];

        let mut common = 0;
        while common < self.open_ids.len() && common < parent.len() && self.open_ids[common] == parent[common] {
            common += 1;
        }
        while self.open_ids.len() > common {
            self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
            self.open_ids.pop();
        }
        for &id in &parent[common..] {
            self.push_id_key(id)?;
            self.out_queue
                .push(cbor::MAP_INDEFINITE_START)
                .map_err(|_| ErrorKind::Logic)?;
            self.open_ids.push(id).map_err(|_| ErrorKind::Logic)?;
        }

        self.push_id_key(leaf_id)?;
        match value {
            Value::Null => {
                self.out_queue
                    .push(cbor::MAP_INDEFINITE_START)
                    .map_err(|_| ErrorKind::Logic)?;
                self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
            }
            Value::Int(_) | Value::Uint(_) | Value::Double(_) | Value::Bool(_) | Value::Time(_) | Value::ObjectLink(_) => {
                let mut tmp = [0u8; 16];
                let n = cbor::encode_scalar(&value, &mut tmp)?;
                self.out_queue
                    .extend_from_slice(&tmp[..n])
                    .map_err(|_| ErrorKind::Logic)?;
            }
            Value::Bytes(chunk) => {
                if chunk.full_length_hint == 0 {
                    return Err(ErrorKind::InputArg);
                }
                let mut hdr: heapless::Vec<u8, 16> = heapless::Vec::new();
                cbor::write_bytes_header(chunk.full_length_hint as u64, &mut hdr)?;
                self.out_queue.extend_from_slice(&hdr).map_err(|_| ErrorKind::Logic)?;
                self.body = Body::Bytes(BytesCursor::from_chunk(chunk));
            }
            Value::String(chunk) => {
                if chunk.full_length_hint == 0 {
                    return Err(ErrorKind::InputArg);
                }
                let mut hdr: heapless::Vec<u8, 16> = heapless::Vec::new();
                cbor::write_text_header(chunk.full_length_hint as u64, &mut hdr)?;
                self.out_queue.extend_from_slice(&hdr).map_err(|_| ErrorKind::Logic)?;
                self.body = Body::Text(StringCursor::from_chunk(chunk));
            }
            Value::ExternalBytes(_) | Value::ExternalString(_) => return Err(ErrorKind::InputArg),
        }
        self.last_path = Some(path);
        Ok(())
    }

    fn close_all_and_finish(&mut self) -> Result<(), ErrorKind> {
        while !self.open_ids.is_empty() {
            self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
            self.open_ids.pop();
        }
        self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
        self.closed = true;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), ErrorKind> {
        self.finished = true;
        if matches!(self.body, Body::None) {
            self.close_all_and_finish()?;
        }
        Ok(())
    }

    pub fn get_payload(&mut self, out: &mut [u8]) -> Result<(usize, Status), ErrorKind> {
        if self.out_pos < self.out_queue.len() {
            let remaining = &self.out_queue[self.out_pos..];
            let n = remaining.len().min(out.len());
            out[..n].copy_from_slice(&remaining[..n]);
            self.out_pos += n;
            if self.out_pos == self.out_queue.len() {
                self.out_queue.clear();
                self.out_pos = 0;
                if matches!(self.body, Body::None) && self.closed {
                    return Ok((n, Status::Done));
                }
            }
            return Ok((n, Status::NeedNextCall));
        }
        match &mut self.body {
            Body::None => {
                if self.closed {
                    Ok((0, Status::Done))
                } else {
                    Ok((0, Status::NeedNextCall))
                }
            }
            Body::Bytes(cursor) => {
                let (n, last) = cursor.pull(out)?;
                if last {
                    self.body = Body::None;
                    if self.finished {
                        self.close_all_and_finish()?;
                    }
                }
                Ok((n, Status::NeedNextCall))
            }
            Body::Text(cursor) => {
                let (n, last) = cursor.pull(out)?;
                if last {
                    self.body = Body::None;
                    if self.finished {
                        self.close_all_and_finish()?;
                    }
                }
                Ok((n, Status::NeedNextCall))
            }
        }
    }
}
