//! External-data callback glue (`spec.md` §2 "External-data callback
//! glue", `SPEC_FULL.md` §4.13).
//!
//! Every codec that copies a bytes/string value's payload into the
//! caller's output buffer goes through one of the cursors here, whether
//! the value is already fully in memory (`Chunk`) or streamed lazily from
//! an `ExternalBytesSource`/`ExternalStringSource`. Centralising it means
//! the open/close lifecycle around the external callback is implemented
//! once, not once per format.

use crate::error::ErrorKind;
use crate::value::{Chunk, ChunkStatus, ExternalBytesSource, ExternalStringSource};

/// Drives one bytes-producing value to completion, memory-backed or
/// external. `pull` may be called any number of times with output slices
/// of any size; it reports how many bytes it wrote and whether that was
/// the final chunk of the value.
pub enum BytesCursor<'a> {
    Memory {
        chunk: Chunk<'a, [u8]>,
        consumed: usize,
    },
    External {
        source: &'a mut dyn ExternalBytesSource,
        opened: bool,
        done: bool,
    },
}

impl<'a> BytesCursor<'a> {
    pub fn from_chunk(chunk: Chunk<'a, [u8]>) -> Self {
        BytesCursor::Memory { chunk, consumed: 0 }
    }

    pub fn from_source(source: &'a mut dyn ExternalBytesSource) -> Self {
        BytesCursor::External {
            source,
            opened: false,
            done: false,
        }
    }

    /// Writes as much of the remaining value as fits in `out`. Returns
    /// `(written, is_last)`; `is_last` means the value is now fully
    /// drained, the cursor must not be pulled again.
    pub fn pull(&mut self, out: &mut [u8]) -> Result<(usize, bool), ErrorKind> {
        match self {
            BytesCursor::Memory { chunk, consumed } => {
                let remaining = &chunk.data[*consumed..];
                let n = remaining.len().min(out.len());
                out[..n].copy_from_slice(&remaining[..n]);
                *consumed += n;
                Ok((n, *consumed == chunk.data.len()))
            }
            BytesCursor::External {
                source,
                opened,
                done,
            } => {
                if *done {
                    return Ok((0, true));
                }
                if !*opened {
                    source.open().map_err(|_| ErrorKind::IoType)?;
                    *opened = true;
                }
                match source.get_chunk(out) {
                    Ok(ChunkStatus::Last(n)) => {
                        *done = true;
                        source.close();
                        Ok((n, true))
                    }
                    Ok(ChunkStatus::More(n)) => Ok((n, false)),
                    Err(_) => {
                        source.close();
                        Err(ErrorKind::IoType)
                    }
                }
            }
        }
    }
}

impl<'a> Drop for BytesCursor<'a> {
    fn drop(&mut self) {
        if let BytesCursor::External {
            source,
            opened,
            done,
        } = self
        {
            if *opened && !*done {
                source.close();
            }
        }
    }
}

/// As `BytesCursor`, for string content.
pub enum StringCursor<'a> {
    Memory {
        chunk: Chunk<'a, str>,
        consumed: usize,
    },
    External {
        source: &'a mut dyn ExternalStringSource,
        opened: bool,
        done: bool,
    },
}

impl<'a> StringCursor<'a> {
    pub fn from_chunk(chunk: Chunk<'a, str>) -> Self {
        StringCursor::Memory { chunk, consumed: 0 }
    }

    pub fn from_source(source: &'a mut dyn ExternalStringSource) -> Self {
        StringCursor::External {
            source,
            opened: false,
            done: false,
        }
    }

    pub fn pull(&mut self, out: &mut [u8]) -> Result<(usize, bool), ErrorKind> {
        match self {
            StringCursor::Memory { chunk, consumed } => {
                let remaining = &chunk.data.as_bytes()[*consumed..];
                let n = remaining.len().min(out.len());
                out[..n].copy_from_slice(&remaining[..n]);
                *consumed += n;
                Ok((n, *consumed == chunk.data.len()))
            }
            StringCursor::External {
                source,
                opened,
                done,
            } => {
                if *done {
                    return Ok((0, true));
                }
                if !*opened {
                    source.open().map_err(|_| ErrorKind::IoType)?;
                    *opened = true;
                }
                match source.get_chunk(out) {
                    Ok(ChunkStatus::Last(n)) => {
                        *done = true;
                        source.close();
                        Ok((n, true))
                    }
                    Ok(ChunkStatus::More(n)) => Ok((n, false)),
                    Err(_) => {
                        source.close();
                        Err(ErrorKind::IoType)
                    }
                }
            }
        }
    }
}

impl<'a> Drop for StringCursor<'a> {
    fn drop(&mut self) {
        if let StringCursor::External {
            source,
            opened,
            done,
        } = self
        {
            if *opened && !*done {
                source.close();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Countdown {
        remaining: &'static [u8],
    }

    impl ExternalBytesSource for Countdown {
        fn get_chunk(&mut self, buf: &mut [u8]) -> Result<ChunkStatus, i32> {
            let n = self.remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&self.remaining[..n]);
            self.remaining = &self.remaining[n..];
            if self.remaining.is_empty() {
                Ok(ChunkStatus::Last(n))
            } else {
                Ok(ChunkStatus::More(n))
            }
        }
    }

    #[test]
    fn memory_cursor_drains_in_pieces() {
        let data = b"hello world";
        let chunk = Chunk::new(&data[..], 0, data.len());
        let mut cur = BytesCursor::from_chunk(chunk);
        let mut out = [0u8; 4];
        let (n, last) = cur.pull(&mut out).unwrap();
        assert_eq!(&out[..n], b"hell");
        assert!(!last);
        let (n, last) = cur.pull(&mut out).unwrap();
        assert_eq!(&out[..n], b"o wo");
        assert!(!last);
        let (n, last) = cur.pull(&mut out).unwrap();
        assert_eq!(&out[..n], b"rld");
        assert!(last);
    }

    #[test]
    fn external_cursor_drains_to_completion() {
        let mut src = Countdown {
            remaining: b"stream-me",
        };
        let mut cur = BytesCursor::from_source(&mut src);
        let mut out = [0u8; 1024];
        let mut total = heapless::Vec::<u8, 32>::new();
        loop {
            let (n, last) = cur.pull(&mut out).unwrap();
            total.extend_from_slice(&out[..n]).unwrap();
            if last {
                break;
            }
        }
        assert_eq!(total.as_slice(), b"stream-me");
    }
}
