//! Opaque codec (`spec.md` §4.3, content-format 42): raw bytes, no
//! base64 expansion, identical to Plain Text's bytes handling minus the
//! text transform.

use crate::error::{ErrorKind, Status};
use crate::io::external::BytesCursor;
use crate::value::Value;

pub struct OpaqueEncoder<'a> {
    cursor: Option<BytesCursor<'a>>,
}

impl<'a> OpaqueEncoder<'a> {
    pub fn new() -> Self {
        OpaqueEncoder { cursor: None }
    }

    pub fn new_entry(&mut self, value: Value<'a>) -> Result<(), ErrorKind> {
        if self.cursor.is_some() {
            return Err(ErrorKind::Logic);
        }
        self.cursor = Some(match value {
            Value::Bytes(chunk) => BytesCursor::from_chunk(chunk),
            Value::ExternalBytes(src) => BytesCursor::from_source(src),
            _ => return Err(ErrorKind::IoType),
        });
        Ok(())
    }

    pub fn get_payload(&mut self, out: &mut [u8]) -> Result<(usize, Status), ErrorKind> {
        match &mut self.cursor {
            None => Ok((0, Status::Done)),
            Some(cursor) => {
                let (n, last) = cursor.pull(out)?;
                if last {
                    self.cursor = None;
                    Ok((n, Status::Done))
                } else {
                    Ok((n, Status::NeedNextCall))
                }
            }
        }
    }
}

impl<'a> Default for OpaqueEncoder<'a> {
    fn default() -> Self {
        Self::new()
    }
}

/// Decodes an Opaque value: the raw input buffer *is* the value.
pub fn decode(buf: &[u8]) -> Value<'_> {
    Value::Bytes(crate::value::Chunk::new(buf, 0, buf.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Chunk;

    #[test]
    fn round_trips_bytes_across_small_buffer() {
        let data = b"\x01\x02\x03\x04\x05";
        let mut enc = OpaqueEncoder::new();
        enc.new_entry(Value::Bytes(Chunk::new(&data[..], 0, data.len())))
            .unwrap();
        let mut collected: heapless::Vec<u8, 16> = heapless::Vec::new();
        loop {
            let mut out = [0u8; 2];
            let (n, status) = enc.get_payload(&mut out).unwrap();
            collected.extend_from_slice(&out[..n]).unwrap();
            if status == Status::Done {
                break;
            }
        }
        assert_eq!(collected.as_slice(), data);
    }

    #[test]
    fn decode_wraps_whole_buffer() {
        let data = b"xyz";
        match decode(data) {
            Value::Bytes(chunk) => assert_eq!(chunk.data, data),
            _ => panic!("expected bytes"),
        }
    }

    #[test]
    fn new_entry_rejects_non_bytes() {
        let mut enc = OpaqueEncoder::new();
        assert!(enc.new_entry(Value::Int(1)).is_err());
    }
}
