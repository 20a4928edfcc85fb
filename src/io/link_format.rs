//! Register / Discover / Bootstrap-Discover link-format encoders
//! (`spec.md` §4.8): ASCII payloads following
//! `<path>[;attr=val]*(,<path>[;attr=val]*)*`.
//!
//! All three share one streaming surface (`init`/`new_entry`/
//! `get_payload`) with the same out-queue-then-drain shape as the other
//! encoders; what differs is which attributes are legal per entry and
//! which object IDs Register silently excludes.

use crate::error::{ErrorKind, Status};
use crate::path::UriPath;
use crate::value::AttrSet;
use core::fmt::Write as _;

/// Security Object and OSCORE Object IDs Register must never advertise
/// (`spec.md` §4.8).
const SECURITY_OBJECT_ID: u16 = 0;
const OSCORE_OBJECT_ID: u16 = 21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFormatKind {
    Register,
    Discover { max_depth: u8 },
    BootstrapDiscover,
}

fn push_path(buf: &mut heapless::String<384>, path: UriPath) -> Result<(), ErrorKind> {
    if path.is_root() {
        buf.push_str("/").map_err(|_| ErrorKind::Logic)
    } else {
        for i in 0..path.length() {
            buf.push('/').map_err(|_| ErrorKind::Logic)?;
            write!(buf, "{}", path.id_at(i).unwrap()).map_err(|_| ErrorKind::Logic)?;
        }
        Ok(())
    }
}

fn push_version(buf: &mut heapless::String<384>, key: &str, ver: (u8, u8)) -> Result<(), ErrorKind> {
    write!(buf, ";{key}={}.{}", ver.0, ver.1).map_err(|_| ErrorKind::Logic)
}

fn push_attrs(buf: &mut heapless::String<384>, attrs: &AttrSet) -> Result<(), ErrorKind> {
    if let Some(v) = attrs.min_period {
        write!(buf, ";pmin={v}").map_err(|_| ErrorKind::Logic)?;
    }
    if let Some(v) = attrs.max_period {
        write!(buf, ";pmax={v}").map_err(|_| ErrorKind::Logic)?;
    }
    if let Some(v) = attrs.greater_than {
        write!(buf, ";gt={v}").map_err(|_| ErrorKind::Logic)?;
    }
    if let Some(v) = attrs.less_than {
        write!(buf, ";lt={v}").map_err(|_| ErrorKind::Logic)?;
    }
    if let Some(v) = attrs.step {
        write!(buf, ";st={v}").map_err(|_| ErrorKind::Logic)?;
    }
    if let Some(v) = attrs.min_eval_period {
        write!(buf, ";epmin={v}").map_err(|_| ErrorKind::Logic)?;
    }
    if let Some(v) = attrs.max_eval_period {
        write!(buf, ";epmax={v}").map_err(|_| ErrorKind::Logic)?;
    }
    if let Some(v) = attrs.confirmable_notify {
        write!(buf, ";con={}", if v { 1 } else { 0 }).map_err(|_| ErrorKind::Logic)?;
    }
    if let Some(v) = attrs.edge {
        write!(buf, ";edge={}", if v { 1 } else { 0 }).map_err(|_| ErrorKind::Logic)?;
    }
    Ok(())
}

/// Streaming link-format encoder.
pub struct LinkFormatEncoder {
    kind: LinkFormatKind,
    last_path: Option<UriPath>,
    started: bool,
    out_queue: heapless::Vec<u8, 512>,
    out_pos: usize,
}

impl LinkFormatEncoder {
    pub fn new(kind: LinkFormatKind) -> Self {
        LinkFormatEncoder {
            kind,
            last_path: None,
            started: false,
            out_queue: heapless::Vec::new(),
            out_pos: 0,
        }
    }

    /// Writes the Bootstrap-Discover `</>;lwm2m=X.Y` prefix. A no-op for
    /// the other two kinds. Must be called before any `new_entry`.
    pub fn init(&mut self, lwm2m_version: (u8, u8)) -> Result<(), ErrorKind> {
        if self.started {
            return Err(ErrorKind::Logic);
        }
        if let LinkFormatKind::BootstrapDiscover = self.kind {
            let mut buf: heapless::String<384> = heapless::String::new();
            buf.push_str("</>").map_err(|_| ErrorKind::Logic)?;
            push_version(&mut buf, "lwm2m", lwm2m_version)?;
            self.out_queue
                .extend_from_slice(buf.as_bytes())
                .map_err(|_| ErrorKind::Logic)?;
            self.started = true;
        }
        Ok(())
    }

    fn depth_of(&self, path: UriPath) -> u8 {
        path.length() as u8
    }

    /// Adds one path entry with optional object version, Discover-style
    /// attributes, and (for multi-instance resources) a `dim` count.
    /// Returns `Ok(true)` if the entry was written, `Ok(false)` if it was
    /// silently dropped (Register's Security/OSCORE exclusion) or exceeds
    /// Discover's configured depth (a `depth-warning`, non-fatal — the
    /// caller may skip it, as `spec.md` §4.8/§7 specify).
    pub fn new_entry(
        &mut self,
        path: UriPath,
        object_version: Option<(u8, u8)>,
        attrs: &AttrSet,
        dim: Option<u16>,
    ) -> Result<Status, ErrorKind> {
        if let Some(last) = self.last_path {
            if path <= last {
                return Err(ErrorKind::InputArg);
            }
        }

        if let LinkFormatKind::Register = self.kind {
            if let Some(oid) = path.object_id() {
                if oid == SECURITY_OBJECT_ID || oid == OSCORE_OBJECT_ID {
                    self.last_path = Some(path);
                    return Ok(Status::Done);
                }
            }
        }
        if let LinkFormatKind::Discover { max_depth } = self.kind {
            if self.depth_of(path) > max_depth {
                self.last_path = Some(path);
                return Ok(Status::DepthWarning);
            }
        }

        let mut buf: heapless::String<384> = heapless::String::new();
        if self.started {
            buf.push(',').map_err(|_| ErrorKind::Logic)?;
        }
        buf.push('<').map_err(|_| ErrorKind::Logic)?;
        push_path(&mut buf, path)?;
        buf.push('>').map_err(|_| ErrorKind::Logic)?;
        if let Some(ver) = object_version {
            push_version(&mut buf, "ver", ver)?;
        }
        if let LinkFormatKind::Discover { .. } = self.kind {
            push_attrs(&mut buf, attrs)?;
            if let Some(n) = dim {
                write!(buf, ";dim={n}").map_err(|_| ErrorKind::Logic)?;
            }
        }
        self.out_queue
            .extend_from_slice(buf.as_bytes())
            .map_err(|_| ErrorKind::Logic)?;
        self.started = true;
        self.last_path = Some(path);
        Ok(Status::Done)
    }

    pub fn get_payload(&mut self, out: &mut [u8]) -> Result<(usize, Status), ErrorKind> {
        let remaining = &self.out_queue[self.out_pos..];
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        self.out_pos += n;
        if self.out_pos == self.out_queue.len() {
            self.out_queue.clear();
            self.out_pos = 0;
            return Ok((n, Status::Done));
        }
        Ok((n, Status::NeedNextCall))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(enc: &mut LinkFormatEncoder) -> heapless::String<512> {
        let mut s: heapless::String<512> = heapless::String::new();
        loop {
            let mut buf = [0u8; 16];
            let (n, status) = enc.get_payload(&mut buf).unwrap();
            s.push_str(core::str::from_utf8(&buf[..n]).unwrap()).unwrap();
            if status == Status::Done {
                break;
            }
        }
        s
    }

    #[test]
    fn register_excludes_security_and_oscore_objects() {
        let mut enc = LinkFormatEncoder::new(LinkFormatKind::Register);
        enc.init((1, 1)).unwrap();
        enc.new_entry(UriPath::object(0).unwrap(), None, &AttrSet::default(), None)
            .unwrap();
        enc.new_entry(UriPath::object(3).unwrap(), Some((1, 0)), &AttrSet::default(), None)
            .unwrap();
        enc.new_entry(UriPath::object(21).unwrap(), None, &AttrSet::default(), None)
            .unwrap();
        let out = drain(&mut enc);
        assert_eq!(out.as_str(), "</3>;ver=1.0");
    }

    #[test]
    fn bootstrap_discover_has_version_prefix() {
        let mut enc = LinkFormatEncoder::new(LinkFormatKind::BootstrapDiscover);
        enc.init((1, 0)).unwrap();
        enc.new_entry(UriPath::object(1).unwrap(), None, &AttrSet::default(), None)
            .unwrap();
        let out = drain(&mut enc);
        assert_eq!(out.as_str(), "</>;lwm2m=1.0,</1>");
    }

    #[test]
    fn discover_emits_attrs_and_dim() {
        let mut enc = LinkFormatEncoder::new(LinkFormatKind::Discover { max_depth: 4 });
        enc.init((1, 1)).unwrap();
        let mut attrs = AttrSet::default();
        attrs.min_period = Some(10);
        attrs.max_period = Some(60);
        enc.new_entry(
            UriPath::resource(3, 0, 6).unwrap(),
            None,
            &attrs,
            Some(2),
        )
        .unwrap();
        let out = drain(&mut enc);
        assert_eq!(out.as_str(), "</3/0/6>;pmin=10;pmax=60;dim=2");
    }

    #[test]
    fn discover_depth_warning_is_non_fatal_and_skippable() {
        let mut enc = LinkFormatEncoder::new(LinkFormatKind::Discover { max_depth: 2 });
        enc.init((1, 1)).unwrap();
        let status = enc
            .new_entry(UriPath::resource(3, 0, 6).unwrap(), None, &AttrSet::default(), None)
            .unwrap();
        assert_eq!(status, Status::DepthWarning);
        let out = drain(&mut enc);
        assert!(out.is_empty());
    }

    #[test]
    fn out_of_order_entry_is_rejected() {
        let mut enc = LinkFormatEncoder::new(LinkFormatKind::Register);
        enc.init((1, 1)).unwrap();
        enc.new_entry(UriPath::object(5).unwrap(), None, &AttrSet::default(), None)
            .unwrap();
        assert!(enc
            .new_entry(UriPath::object(3).unwrap(), None, &AttrSet::default(), None)
            .is_err());
    }
}
