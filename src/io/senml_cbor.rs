//! SenML-CBOR codec (`spec.md` §4.6, content-format 112/322): a CBOR
//! array of maps, RFC 8428 key conventions plus the reserved `"vlo"`
//! object-link key.
//!
//! The decoder resolves `name`/`base-name` concatenation and `base-time`
//! stickiness the way the format requires, but — per the explicit
//! "decoder's discretion" licence for chunked delivery — always attaches
//! the resolved path to *every* chunk of an indefinite-length string/bytes
//! value, and requires `name`/`base-name` (if present at all) to appear
//! before the value key within that map. A chunked value followed by more
//! keys in the same map is not supported; real encoders always put the
//! value last.

use crate::error::ErrorKind;
use crate::io::cbor::{self, decode_item, Item};
use crate::io::external::{BytesCursor, StringCursor};
use crate::path::UriPath;
use crate::value::{Chunk, ObjectLink, TypeMask, Value};
use core::fmt::Write as _;

fn parse_path_str(s: &str) -> Result<UriPath, ErrorKind> {
    let s = s.strip_prefix('/').unwrap_or(s);
    if s.is_empty() {
        return Ok(UriPath::ROOT);
    }
    let mut ids: heapless::Vec<u16, 4> = heapless::Vec::new();
    for part in s.split('/') {
        let id: u32 = part.parse().map_err(|_| ErrorKind::FormatMismatch)?;
        if id >= crate::path::ID_INVALID as u32 {
            return Err(ErrorKind::FormatMismatch);
        }
        ids.push(id as u16).map_err(|_| ErrorKind::FormatMismatch)?;
    }
    UriPath::make(&ids).ok_or(ErrorKind::FormatMismatch)
}

fn item_to_f64(item: &Item<'_>) -> Result<f64, ErrorKind> {
    match item {
        Item::Uint(v) => Ok(*v as f64),
        Item::Int(v) => Ok(*v as f64),
        Item::Float(v) => Ok(*v),
        _ => Err(ErrorKind::FormatMismatch),
    }
}

#[derive(Debug, Clone, Copy)]
enum NumRaw {
    U(u64),
    I(i64),
    F(f64),
}

fn permitted_types(raw: &NumRaw) -> TypeMask {
    match raw {
        NumRaw::U(v) => {
            let mut m = TypeMask::UINT.union(TypeMask::DOUBLE);
            if *v <= i64::MAX as u64 {
                m = m.union(TypeMask::INT);
            }
            m
        }
        NumRaw::I(_) => TypeMask::INT.union(TypeMask::DOUBLE),
        NumRaw::F(v) => {
            let mut m = TypeMask::DOUBLE;
            if v.fract() == 0.0 {
                if *v >= i64::MIN as f64 && *v <= i64::MAX as f64 {
                    m = m.union(TypeMask::INT);
                }
                if *v >= 0.0 && *v <= u64::MAX as f64 {
                    m = m.union(TypeMask::UINT);
                }
            }
            m
        }
    }
}

/// Caller's chosen resolution for a `NumericDisambiguation` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericTarget {
    Int,
    Uint,
    Double,
}

enum SenmlKey {
    BaseTime,
    BaseName,
    Name,
    Value,
    StringValue,
    BoolValue,
    Time,
    DataValue,
    ObjectLink,
    Unknown,
}

fn classify_key(item: &Item<'_>) -> SenmlKey {
    match item {
        Item::Int(-2) => SenmlKey::BaseTime,
        Item::Int(-1) => SenmlKey::BaseName,
        Item::Uint(0) => SenmlKey::Name,
        Item::Uint(2) => SenmlKey::Value,
        Item::Uint(3) => SenmlKey::StringValue,
        Item::Uint(4) => SenmlKey::BoolValue,
        Item::Uint(6) => SenmlKey::Time,
        Item::Uint(8) => SenmlKey::DataValue,
        Item::Text("vlo") => SenmlKey::ObjectLink,
        _ => SenmlKey::Unknown,
    }
}

struct MapCommon<'b> {
    name_frag: Option<&'b str>,
    local_base_name: Option<&'b str>,
    local_base_time: Option<f64>,
}

enum MapOutcome<'b> {
    Null(MapCommon<'b>),
    Value(MapCommon<'b>, Value<'b>),
    Numeric(MapCommon<'b>, NumRaw),
    ChunkStart(MapCommon<'b>, bool),
}

fn parse_one_map<'b>(seg: &'b [u8]) -> Result<Option<(usize, MapOutcome<'b>)>, ErrorKind> {
    let mut pos = 0usize;
    let (hdr_item, n) = match decode_item(&seg[pos..])? {
        Some(v) => v,
        None => return Ok(None),
    };
    pos += n;
    let count = match hdr_item {
        Item::MapHeader(c) => c,
        _ => return Err(ErrorKind::FormatMismatch),
    };

    let mut name_frag: Option<&'b str> = None;
    let mut local_base_name: Option<&'b str> = None;
    let mut local_base_time: Option<f64> = None;
    let mut numeric: Option<NumRaw> = None;
    let mut bool_val: Option<bool> = None;
    let mut time_val: Option<i64> = None;
    let mut objlink: Option<(u16, u16)> = None;
    let mut bytes_val: Option<&'b [u8]> = None;
    let mut text_val: Option<&'b str> = None;
    let mut pairs_done: u64 = 0;

    loop {
        if let Some(c) = count {
            if pairs_done >= c {
                break;
            }
        }
        let (key_item, kn) = match decode_item(&seg[pos..])? {
            Some(v) => v,
            None => return Ok(None),
        };
        if matches!(key_item, Item::Break) {
            if count.is_some() {
                return Err(ErrorKind::FormatMismatch);
            }
            pos += kn;
            break;
        }
        pos += kn;
        match classify_key(&key_item) {
            SenmlKey::BaseTime => {
                let (v, vn) = match decode_item(&seg[pos..])? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                pos += vn;
                local_base_time = Some(item_to_f64(&v)?);
            }
            SenmlKey::BaseName => {
                let (v, vn) = match decode_item(&seg[pos..])? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                pos += vn;
                match v {
                    Item::Text(s) => {
                        if local_base_name.is_some() {
                            return Err(ErrorKind::FormatMismatch);
                        }
                        local_base_name = Some(s);
                    }
                    _ => return Err(ErrorKind::FormatMismatch),
                }
            }
            SenmlKey::Name => {
                let (v, vn) = match decode_item(&seg[pos..])? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                pos += vn;
                match v {
                    Item::Text(s) => {
                        if name_frag.is_some() {
                            return Err(ErrorKind::FormatMismatch);
                        }
                        name_frag = Some(s);
                    }
                    _ => return Err(ErrorKind::FormatMismatch),
                }
            }
            SenmlKey::Value => {
                let (v, vn) = match decode_item(&seg[pos..])? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                pos += vn;
                numeric = Some(match v {
                    Item::Uint(x) => NumRaw::U(x),
                    Item::Int(x) => NumRaw::I(x),
                    Item::Float(x) => NumRaw::F(x),
                    _ => return Err(ErrorKind::FormatMismatch),
                });
            }
            SenmlKey::StringValue => {
                let (v, vn) = match decode_item(&seg[pos..])? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                match v {
                    Item::Text(s) => {
                        pos += vn;
                        text_val = Some(s);
                    }
                    Item::TextIndefiniteStart => {
                        pos += vn;
                        return Ok(Some((
                            pos,
                            MapOutcome::ChunkStart(
                                MapCommon {
                                    name_frag,
                                    local_base_name,
                                    local_base_time,
                                },
                                false,
                            ),
                        )));
                    }
                    _ => return Err(ErrorKind::FormatMismatch),
                }
            }
            SenmlKey::BoolValue => {
                let (v, vn) = match decode_item(&seg[pos..])? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                pos += vn;
                match v {
                    Item::Bool(b) => bool_val = Some(b),
                    _ => return Err(ErrorKind::FormatMismatch),
                }
            }
            SenmlKey::Time => {
                let (v, vn) = match decode_item(&seg[pos..])? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                pos += vn;
                time_val = Some(match v {
                    Item::Uint(x) => x as i64,
                    Item::Int(x) => x,
                    _ => return Err(ErrorKind::FormatMismatch),
                });
            }
            SenmlKey::DataValue => {
                let (v, vn) = match decode_item(&seg[pos..])? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                match v {
                    Item::Bytes(b) => {
                        pos += vn;
                        bytes_val = Some(b);
                    }
                    Item::BytesIndefiniteStart => {
                        pos += vn;
                        return Ok(Some((
                            pos,
                            MapOutcome::ChunkStart(
                                MapCommon {
                                    name_frag,
                                    local_base_name,
                                    local_base_time,
                                },
                                true,
                            ),
                        )));
                    }
                    _ => return Err(ErrorKind::FormatMismatch),
                }
            }
            SenmlKey::ObjectLink => {
                let (v, vn) = match decode_item(&seg[pos..])? {
                    Some(v) => v,
                    None => return Ok(None),
                };
                pos += vn;
                match v {
                    Item::ArrayHeader(Some(2)) => {
                        let (oid_item, on) = match decode_item(&seg[pos..])? {
                            Some(v) => v,
                            None => return Ok(None),
                        };
                        pos += on;
                        let oid = match oid_item {
                            Item::Uint(x) => cbor::path_id_from_u64(x)?,
                            _ => return Err(ErrorKind::FormatMismatch),
                        };
                        let (iid_item, inn) = match decode_item(&seg[pos..])? {
                            Some(v) => v,
                            None => return Ok(None),
                        };
                        pos += inn;
                        let iid = match iid_item {
                            Item::Uint(x) => cbor::path_id_from_u64(x)?,
                            _ => return Err(ErrorKind::FormatMismatch),
                        };
                        objlink = Some((oid, iid));
                    }
                    _ => return Err(ErrorKind::FormatMismatch),
                }
            }
            SenmlKey::Unknown => return Err(ErrorKind::FormatMismatch),
        }
        pairs_done += 1;
    }

    let common = MapCommon {
        name_frag,
        local_base_name,
        local_base_time,
    };
    if let Some(raw) = numeric {
        return Ok(Some((pos, MapOutcome::Numeric(common, raw))));
    }
    if let Some(b) = bool_val {
        return Ok(Some((pos, MapOutcome::Value(common, Value::Bool(b)))));
    }
    if let Some(t) = time_val {
        return Ok(Some((pos, MapOutcome::Value(common, Value::Time(t)))));
    }
    if let Some((oid, iid)) = objlink {
        return Ok(Some((
            pos,
            MapOutcome::Value(
                common,
                Value::ObjectLink(ObjectLink {
                    object_id: oid,
                    instance_id: iid,
                }),
            ),
        )));
    }
    if let Some(b) = bytes_val {
        return Ok(Some((
            pos,
            MapOutcome::Value(common, Value::Bytes(Chunk::new(b, 0, b.len()))),
        )));
    }
    if let Some(s) = text_val {
        return Ok(Some((
            pos,
            MapOutcome::Value(common, Value::String(Chunk::new(s, 0, s.len()))),
        )));
    }
    Ok(Some((pos, MapOutcome::Null(common))))
}

struct PendingChunk {
    path: UriPath,
    is_bytes: bool,
    running_offset: usize,
}

/// One decoded entry, chunk, or control outcome.
#[derive(Debug)]
pub enum SenmlOutcome<'b> {
    NeedMore,
    Eof,
    Null(UriPath),
    NumericDisambiguation { path: UriPath, permitted: TypeMask },
    Value(UriPath, Value<'b>),
}

/// Streaming SenML-CBOR decoder. See the module doc for the chunked-value
/// ordering requirement.
pub struct SenmlDecoder {
    base: UriPath,
    offset: usize,
    array_count: Option<Option<u64>>,
    items_seen: u64,
    base_time: f64,
    base_name: heapless::String<64>,
    pending_numeric: Option<(UriPath, NumRaw)>,
    pending_chunk: Option<PendingChunk>,
}

impl SenmlDecoder {
    pub fn new(base: UriPath) -> Self {
        SenmlDecoder {
            base,
            offset: 0,
            array_count: None,
            items_seen: 0,
            base_time: 0.0,
            base_name: heapless::String::new(),
            pending_numeric: None,
            pending_chunk: None,
        }
    }

    /// `None` if the count isn't known yet (array header not parsed);
    /// `Some(Err(format-mismatch))` for an indefinite array.
    pub fn entry_count(&self) -> Option<Result<u64, ErrorKind>> {
        match self.array_count {
            None => None,
            Some(None) => Some(Err(ErrorKind::FormatMismatch)),
            Some(Some(n)) => Some(Ok(n)),
        }
    }

    fn resolve_path(&mut self, common: &MapCommon<'_>) -> Result<UriPath, ErrorKind> {
        if let Some(bt) = common.local_base_time {
            self.base_time = bt;
        }
        if let Some(bn) = common.local_base_name {
            self.base_name.clear();
            self.base_name
                .push_str(bn)
                .map_err(|_| ErrorKind::FormatMismatch)?;
        }
        let mut full: heapless::String<96> = heapless::String::new();
        full.push_str(&self.base_name)
            .map_err(|_| ErrorKind::FormatMismatch)?;
        if let Some(n) = common.name_frag {
            full.push_str(n).map_err(|_| ErrorKind::FormatMismatch)?;
        }
        if full.is_empty() {
            return Err(ErrorKind::FormatMismatch);
        }
        let path = parse_path_str(&full)?;
        if path.outside_base(&self.base) {
            return Err(ErrorKind::InputArg);
        }
        Ok(path)
    }

    fn drive_pending_chunk<'b>(&mut self, buf: &'b [u8]) -> Result<SenmlOutcome<'b>, ErrorKind> {
        let pc = self.pending_chunk.take().expect("pending_chunk checked by caller");
        match decode_item(&buf[self.offset..])? {
            None => {
                self.pending_chunk = Some(pc);
                Ok(SenmlOutcome::NeedMore)
            }
            Some((Item::Break, n)) => {
                self.offset += n;
                self.items_seen += 1;
                let hint = pc.running_offset;
                let value = if pc.is_bytes {
                    Value::Bytes(Chunk::new(&[][..], hint, hint))
                } else {
                    Value::String(Chunk::new("", hint, hint))
                };
                Ok(SenmlOutcome::Value(pc.path, value))
            }
            Some((Item::Bytes(b), n)) if pc.is_bytes => {
                self.offset += n;
                let offset = pc.running_offset;
                self.pending_chunk = Some(PendingChunk {
                    path: pc.path,
                    is_bytes: true,
                    running_offset: offset + b.len(),
                });
                Ok(SenmlOutcome::Value(pc.path, Value::Bytes(Chunk::new(b, offset, 0))))
            }
            Some((Item::Text(s), n)) if !pc.is_bytes => {
                self.offset += n;
                let offset = pc.running_offset;
                self.pending_chunk = Some(PendingChunk {
                    path: pc.path,
                    is_bytes: false,
                    running_offset: offset + s.len(),
                });
                Ok(SenmlOutcome::Value(pc.path, Value::String(Chunk::new(s, offset, 0))))
            }
            _ => Err(ErrorKind::FormatMismatch),
        }
    }

    pub fn next_entry<'b>(&mut self, buf: &'b [u8]) -> Result<SenmlOutcome<'b>, ErrorKind> {
        if self.pending_chunk.is_some() {
            return self.drive_pending_chunk(buf);
        }
        if self.array_count.is_none() {
            let (item, n) = match decode_item(&buf[self.offset..])? {
                Some(v) => v,
                None => return Ok(SenmlOutcome::NeedMore),
            };
            match item {
                Item::ArrayHeader(c) => {
                    self.array_count = Some(c);
                    self.offset += n;
                }
                _ => return Err(ErrorKind::FormatMismatch),
            }
        }
        match self.array_count {
            Some(Some(n)) => {
                if self.items_seen >= n {
                    return Ok(SenmlOutcome::Eof);
                }
            }
            Some(None) => match decode_item(&buf[self.offset..])? {
                None => return Ok(SenmlOutcome::NeedMore),
                Some((Item::Break, n)) => {
                    self.offset += n;
                    return Ok(SenmlOutcome::Eof);
                }
                Some(_) => {}
            },
            None => unreachable!("array header just parsed above"),
        }
        match parse_one_map(&buf[self.offset..])? {
            None => Ok(SenmlOutcome::NeedMore),
            Some((consumed, outcome)) => match outcome {
                MapOutcome::Null(common) => {
                    let path = self.resolve_path(&common)?;
                    self.offset += consumed;
                    self.items_seen += 1;
                    Ok(SenmlOutcome::Null(path))
                }
                MapOutcome::Value(common, value) => {
                    let path = self.resolve_path(&common)?;
                    self.offset += consumed;
                    self.items_seen += 1;
                    Ok(SenmlOutcome::Value(path, value))
                }
                MapOutcome::Numeric(common, raw) => {
                    let path = self.resolve_path(&common)?;
                    self.offset += consumed;
                    self.items_seen += 1;
                    let permitted = permitted_types(&raw);
                    self.pending_numeric = Some((path, raw));
                    Ok(SenmlOutcome::NumericDisambiguation { path, permitted })
                }
                MapOutcome::ChunkStart(common, is_bytes) => {
                    let path = self.resolve_path(&common)?;
                    self.offset += consumed;
                    self.pending_chunk = Some(PendingChunk {
                        path,
                        is_bytes,
                        running_offset: 0,
                    });
                    self.drive_pending_chunk(buf)
                }
            },
        }
    }

    /// Resolves a previously reported `NumericDisambiguation`.
    pub fn resolve_numeric(&mut self, target: NumericTarget) -> Result<Value<'static>, ErrorKind> {
        let (_, raw) = self.pending_numeric.take().ok_or(ErrorKind::Logic)?;
        match (target, raw) {
            (NumericTarget::Int, NumRaw::U(v)) => {
                if v > i64::MAX as u64 {
                    return Err(ErrorKind::FormatMismatch);
                }
                Ok(Value::Int(v as i64))
            }
            (NumericTarget::Int, NumRaw::I(v)) => Ok(Value::Int(v)),
            (NumericTarget::Int, NumRaw::F(v)) => {
                if v.fract() != 0.0 {
                    return Err(ErrorKind::FormatMismatch);
                }
                Ok(Value::Int(v as i64))
            }
            (NumericTarget::Uint, NumRaw::U(v)) => Ok(Value::Uint(v)),
            (NumericTarget::Uint, NumRaw::I(v)) => {
                if v < 0 {
                    return Err(ErrorKind::FormatMismatch);
                }
                Ok(Value::Uint(v as u64))
            }
            (NumericTarget::Uint, NumRaw::F(v)) => {
                if v.fract() != 0.0 || v < 0.0 {
                    return Err(ErrorKind::FormatMismatch);
                }
                Ok(Value::Uint(v as u64))
            }
            (NumericTarget::Double, NumRaw::U(v)) => Ok(Value::Double(v as f64)),
            (NumericTarget::Double, NumRaw::I(v)) => Ok(Value::Double(v as f64)),
            (NumericTarget::Double, NumRaw::F(v)) => Ok(Value::Double(v)),
        }
    }
}

fn path_to_string(path: UriPath) -> Result<heapless::String<64>, ErrorKind> {
    let mut s: heapless::String<64> = heapless::String::new();
    for i in 0..path.length() {
        write!(s, "/{}", path.id_at(i).unwrap()).map_err(|_| ErrorKind::Logic)?;
    }
    Ok(s)
}

enum Body<'a> {
    None,
    Bytes(BytesCursor<'a>),
    Text(StringCursor<'a>),
}

use crate::error::Status;

/// Streaming SenML-CBOR encoder. Emits an indefinite-length outer array
/// (so item counts need not be known ahead of time) of indefinite-length
/// maps; entries must arrive in ascending path order within `base`.
pub struct SenmlEncoder<'a> {
    base: UriPath,
    base_name_str: heapless::String<64>,
    base_name_sent: bool,
    started: bool,
    finished: bool,
    last_path: Option<UriPath>,
    out_queue: heapless::Vec<u8, 256>,
    out_pos: usize,
    body: Body<'a>,
}

impl<'a> SenmlEncoder<'a> {
    pub fn new(base: UriPath) -> Result<Self, ErrorKind> {
        Ok(SenmlEncoder {
            base_name_str: path_to_string(base)?,
            base,
            base_name_sent: false,
            started: false,
            finished: false,
            last_path: None,
            out_queue: heapless::Vec::new(),
            out_pos: 0,
            body: Body::None,
        })
    }

    fn push_text_key_value(&mut self, key: u8, s: &str) -> Result<(), ErrorKind> {
        self.out_queue.push(key).map_err(|_| ErrorKind::Logic)?;
        let mut hdr: heapless::Vec<u8, 16> = heapless::Vec::new();
        cbor::write_text_header(s.len() as u64, &mut hdr)?;
        self.out_queue
            .extend_from_slice(&hdr)
            .map_err(|_| ErrorKind::Logic)?;
        self.out_queue
            .extend_from_slice(s.as_bytes())
            .map_err(|_| ErrorKind::Logic)
    }

    pub fn new_entry(&mut self, path: UriPath, value: Value<'a>) -> Result<(), ErrorKind> {
        if self.out_pos < self.out_queue.len() || !matches!(self.body, Body::None) {
            return Err(ErrorKind::Logic);
        }
        if path.outside_base(&self.base) {
            return Err(ErrorKind::InputArg);
        }
        if let Some(last) = self.last_path {
            if path <= last {
                return Err(ErrorKind::Logic);
            }
        }

        if !self.started {
            self.out_queue.push(cbor::ARRAY_INDEFINITE_START).map_err(|_| ErrorKind::Logic)?;
            self.started = true;
        }
        self.out_queue.push(cbor::MAP_INDEFINITE_START).map_err(|_| ErrorKind::Logic)?;
        if !self.base_name_sent {
            let bn = self.base_name_str.clone();
            self.push_text_key_value(0x20, &bn)?;
            self.base_name_sent = true;
        }
        let mut suffix: heapless::String<32> = heapless::String::new();
        for i in self.base.length()..path.length() {
            write!(suffix, "/{}", path.id_at(i).unwrap()).map_err(|_| ErrorKind::Logic)?;
        }
        if !suffix.is_empty() {
            let s = suffix.clone();
            self.push_text_key_value(0x00, &s)?;
        }

        match value {
            Value::Null => {
                self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
            }
            Value::Int(_) | Value::Uint(_) | Value::Double(_) => {
                self.out_queue.push(0x02).map_err(|_| ErrorKind::Logic)?;
                let mut tmp = [0u8; 16];
                let n = cbor::encode_scalar(&value, &mut tmp)?;
                self.out_queue
                    .extend_from_slice(&tmp[..n])
                    .map_err(|_| ErrorKind::Logic)?;
                self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
            }
            Value::Bool(_) => {
                self.out_queue.push(0x04).map_err(|_| ErrorKind::Logic)?;
                let mut tmp = [0u8; 16];
                let n = cbor::encode_scalar(&value, &mut tmp)?;
                self.out_queue
                    .extend_from_slice(&tmp[..n])
                    .map_err(|_| ErrorKind::Logic)?;
                self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
            }
            Value::Time(_) => {
                self.out_queue.push(0x06).map_err(|_| ErrorKind::Logic)?;
                let mut tmp = [0u8; 16];
                let n = cbor::encode_scalar(&value, &mut tmp)?;
                self.out_queue
                    .extend_from_slice(&tmp[..n])
                    .map_err(|_| ErrorKind::Logic)?;
                self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
            }
            Value::ObjectLink(_) => {
                self.out_queue
                    .extend_from_slice(&[0x63, b'v', b'l', b'o'])
                    .map_err(|_| ErrorKind::Logic)?;
                let mut tmp = [0u8; 16];
                let n = cbor::encode_scalar(&value, &mut tmp)?;
                self.out_queue
                    .extend_from_slice(&tmp[..n])
                    .map_err(|_| ErrorKind::Logic)?;
                self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
            }
            Value::Bytes(chunk) => {
                if chunk.full_length_hint == 0 {
                    return Err(ErrorKind::InputArg);
                }
                self.out_queue.push(0x08).map_err(|_| ErrorKind::Logic)?;
                let mut hdr: heapless::Vec<u8, 16> = heapless::Vec::new();
                cbor::write_bytes_header(chunk.full_length_hint as u64, &mut hdr)?;
                self.out_queue.extend_from_slice(&hdr).map_err(|_| ErrorKind::Logic)?;
                self.body = Body::Bytes(BytesCursor::from_chunk(chunk));
            }
            Value::String(chunk) => {
                if chunk.full_length_hint == 0 {
                    return Err(ErrorKind::InputArg);
                }
                self.out_queue.push(0x03).map_err(|_| ErrorKind::Logic)?;
                let mut hdr: heapless::Vec<u8, 16> = heapless::Vec::new();
                cbor::write_text_header(chunk.full_length_hint as u64, &mut hdr)?;
                self.out_queue.extend_from_slice(&hdr).map_err(|_| ErrorKind::Logic)?;
                self.body = Body::Text(StringCursor::from_chunk(chunk));
            }
            Value::ExternalBytes(_) | Value::ExternalString(_) => {
                return Err(ErrorKind::InputArg);
            }
        }
        self.last_path = Some(path);
        Ok(())
    }

    pub fn finish(&mut self) -> Result<(), ErrorKind> {
        self.finished = true;
        if matches!(self.body, Body::None) {
            self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
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
                if matches!(self.body, Body::None) && self.finished {
                    return Ok((n, Status::Done));
                }
            }
            return Ok((n, Status::NeedNextCall));
        }
        match &mut self.body {
            Body::None => Ok((0, Status::Done)),
            Body::Bytes(cursor) => {
                let (n, last) = cursor.pull(out)?;
                if last {
                    self.body = Body::None;
                }
                self.finish_body_step(n, last)
            }
            Body::Text(cursor) => {
                let (n, last) = cursor.pull(out)?;
                if last {
                    self.body = Body::None;
                }
                self.finish_body_step(n, last)
            }
        }
    }

    fn finish_body_step(&mut self, n: usize, last: bool) -> Result<(usize, Status), ErrorKind> {
        if last {
            self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
            if self.finished {
                self.out_queue.push(cbor::BREAK).map_err(|_| ErrorKind::Logic)?;
            }
        }
        Ok((n, Status::NeedNextCall))
    }
}
