//! The typed leaf value union (`spec.md` §3) plus the external-data
//! callback glue (`spec.md` §2 "External-data callback glue",
//! `SPEC_FULL.md` §4.13).

/// A CoAP-facing `/OID:IID` object link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectLink {
    pub object_id: u16,
    pub instance_id: u16,
}

/// A chunk of a possibly-multi-call bytes or string value.
///
/// `full_length_hint == 0` means the total length is not yet known (the
/// encoder is streaming from an external source that has not finished).
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a, T: ?Sized> {
    pub data: &'a T,
    pub offset: usize,
    pub full_length_hint: usize,
}

impl<'a, T: ?Sized> Chunk<'a, T> {
    pub fn new(data: &'a T, offset: usize, full_length_hint: usize) -> Self {
        Chunk {
            data,
            offset,
            full_length_hint,
        }
    }
}

impl<'a> Chunk<'a, [u8]> {
    pub fn chunk_length(&self) -> usize {
        self.data.len()
    }

    /// `true` once `offset + chunk_length == full_length_hint` (and the
    /// hint is known).
    pub fn is_last(&self) -> bool {
        self.full_length_hint != 0 && self.offset + self.chunk_length() == self.full_length_hint
    }
}

impl<'a> Chunk<'a, str> {
    pub fn chunk_length(&self) -> usize {
        self.data.len()
    }

    pub fn is_last(&self) -> bool {
        self.full_length_hint != 0 && self.offset + self.chunk_length() == self.full_length_hint
    }
}

/// Status returned by an external-data source on each chunk request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStatus {
    /// This was the last chunk; `len` bytes were written.
    Last(usize),
    /// More chunks remain after this one; `len` bytes were written.
    More(usize),
}

/// A user-supplied source of streamed bytes, opened lazily on first read
/// and guaranteed to be closed on every exit path (success or error).
pub trait ExternalBytesSource {
    fn open(&mut self) -> Result<(), i32> {
        Ok(())
    }
    fn get_chunk(&mut self, buf: &mut [u8]) -> Result<ChunkStatus, i32>;
    fn close(&mut self) {}
}

/// As `ExternalBytesSource`, for string content (the stream is assumed to
/// yield valid UTF-8 split only at character boundaries).
pub trait ExternalStringSource {
    fn open(&mut self) -> Result<(), i32> {
        Ok(())
    }
    fn get_chunk(&mut self, buf: &mut [u8]) -> Result<ChunkStatus, i32>;
    fn close(&mut self) {}
}

/// A single typed leaf value, as carried between the data-model adapter
/// and the codecs.
///
/// `Bytes`/`String` carry an already-in-memory chunk (the common case: the
/// data-model adapter holds the whole value, possibly itself fed to the
/// encoder across several `get_payload` calls as buffer space allows).
/// `ExternalBytes`/`ExternalString` instead carry a borrowed source that is
/// pulled from lazily, one `get_chunk` call at a time, through the shared
/// cursor in `io::external`.
pub enum Value<'a> {
    Null,
    Int(i64),
    Uint(u64),
    Double(f64),
    Bool(bool),
    Bytes(Chunk<'a, [u8]>),
    String(Chunk<'a, str>),
    ObjectLink(ObjectLink),
    Time(i64),
    ExternalBytes(&'a mut dyn ExternalBytesSource),
    ExternalString(&'a mut dyn ExternalStringSource),
}

impl<'a> core::fmt::Debug for Value<'a> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Int(v) => f.debug_tuple("Int").field(v).finish(),
            Value::Uint(v) => f.debug_tuple("Uint").field(v).finish(),
            Value::Double(v) => f.debug_tuple("Double").field(v).finish(),
            Value::Bool(v) => f.debug_tuple("Bool").field(v).finish(),
            Value::Bytes(c) => f.debug_tuple("Bytes").field(&c.data.len()).finish(),
            Value::String(c) => f.debug_tuple("String").field(&c.data.len()).finish(),
            Value::ObjectLink(v) => f.debug_tuple("ObjectLink").field(v).finish(),
            Value::Time(v) => f.debug_tuple("Time").field(v).finish(),
            Value::ExternalBytes(_) => f.write_str("ExternalBytes(..)"),
            Value::ExternalString(_) => f.write_str("ExternalString(..)"),
        }
    }
}

/// Bitmask of data types a decoder caller is willing to accept for a
/// given leaf, and (after a successful parse) the single type that the
/// bytes actually resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMask(u16);

impl TypeMask {
    pub const NULL: TypeMask = TypeMask(1 << 0);
    pub const INT: TypeMask = TypeMask(1 << 1);
    pub const UINT: TypeMask = TypeMask(1 << 2);
    pub const DOUBLE: TypeMask = TypeMask(1 << 3);
    pub const BOOL: TypeMask = TypeMask(1 << 4);
    pub const BYTES: TypeMask = TypeMask(1 << 5);
    pub const STRING: TypeMask = TypeMask(1 << 6);
    pub const OBJECT_LINK: TypeMask = TypeMask(1 << 7);
    pub const TIME: TypeMask = TypeMask(1 << 8);

    pub const ANY: TypeMask = TypeMask(
        Self::NULL.0
            | Self::INT.0
            | Self::UINT.0
            | Self::DOUBLE.0
            | Self::BOOL.0
            | Self::BYTES.0
            | Self::STRING.0
            | Self::OBJECT_LINK.0
            | Self::TIME.0,
    );

    pub fn union(self, other: TypeMask) -> TypeMask {
        TypeMask(self.0 | other.0)
    }

    pub fn intersect(self, other: TypeMask) -> TypeMask {
        TypeMask(self.0 & other.0)
    }

    pub fn contains(self, other: TypeMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `Some(single)` if exactly one bit is set.
    pub fn single(self) -> Option<TypeMask> {
        if self.0 != 0 && (self.0 & (self.0 - 1)) == 0 {
            Some(self)
        } else {
            None
        }
    }
}

/// Presence-flagged notification/registration attribute bag
/// (`spec.md` §3 "Attribute set"). The Discover/Notify attributes
/// (`min_period` .. `epoch_max`) are rendered onto the wire by
/// `io::link_format`'s Discover entries; the Register/Bootstrap fields
/// below are carried instead as the Register request's CoAP Uri-Query
/// options (`exchange::RegisterParams`), since they describe the request
/// itself rather than a path entry in the response payload.
#[derive(Debug, Clone, Default)]
pub struct AttrSet {
    pub min_period: Option<u32>,
    pub max_period: Option<u32>,
    pub greater_than: Option<f64>,
    pub less_than: Option<f64>,
    pub step: Option<f64>,
    pub min_eval_period: Option<u32>,
    pub max_eval_period: Option<u32>,
    pub confirmable_notify: Option<bool>,
    pub edge: Option<bool>,
    pub epoch_min: Option<i64>,
    pub epoch_max: Option<i64>,
    pub endpoint: Option<heapless::String<32>>,
    pub lifetime: Option<u32>,
    pub binding: Option<heapless::String<8>>,
    pub sms_number: Option<heapless::String<16>>,
    pub queue_mode: Option<bool>,
    pub lwm2m_version: Option<(u8, u8)>,
}

impl AttrSet {
    pub fn is_empty(&self) -> bool {
        self.min_period.is_none()
            && self.max_period.is_none()
            && self.greater_than.is_none()
            && self.less_than.is_none()
            && self.step.is_none()
            && self.min_eval_period.is_none()
            && self.max_eval_period.is_none()
            && self.confirmable_notify.is_none()
            && self.edge.is_none()
            && self.epoch_min.is_none()
            && self.epoch_max.is_none()
            && self.endpoint.is_none()
            && self.lifetime.is_none()
            && self.binding.is_none()
            && self.sms_number.is_none()
            && self.queue_mode.is_none()
            && self.lwm2m_version.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_last_detection() {
        let data = b"hello";
        let c = Chunk::new(&data[..], 0, 5);
        assert!(c.is_last());
        let c2 = Chunk::new(&data[..3], 0, 5);
        assert!(!c2.is_last());
    }

    #[test]
    fn chunk_unknown_length_is_never_last() {
        let data = b"abc";
        let c = Chunk::new(&data[..], 0, 0);
        assert!(!c.is_last());
    }

    #[test]
    fn type_mask_single_detection() {
        assert!(TypeMask::INT.single().is_some());
        assert!(TypeMask::ANY.single().is_none());
        assert!(TypeMask::INT.union(TypeMask::UINT).single().is_none());
    }

    #[test]
    fn attr_set_default_is_empty() {
        assert!(AttrSet::default().is_empty());
        let mut a = AttrSet::default();
        a.min_period = Some(10);
        assert!(!a.is_empty());
    }
}
