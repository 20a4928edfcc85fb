//! Output/input context dispatchers (`spec.md` §4.9): selects one
//! concrete codec based on operation kind, item count, and a caller- or
//! heuristically-chosen format, then presents one unified streaming
//! surface over it.
//!
//! Each codec module stays free-standing (used directly by tests and by
//! advanced callers who already know their format); `OutCtx`/`InCtx` are
//! the thin enum-dispatch layer the exchange engine drives.

pub mod cbor;
pub mod external;
pub mod link_format;
#[cfg(feature = "lwm2m-cbor")]
pub mod hierarchical_cbor;
#[cfg(feature = "opaque")]
pub mod opaque;
#[cfg(feature = "plain-text")]
pub mod plain_text;
#[cfg(feature = "senml-cbor")]
pub mod senml_cbor;
#[cfg(feature = "tlv")]
pub mod tlv;

use crate::error::{ErrorKind, Status};
use crate::log_macros::trace;
use crate::path::UriPath;
use crate::value::{TypeMask, Value};

/// Content formats this crate can speak, tagged with their CoAP
/// Content-Format numbers (`spec.md` §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Format {
    PlainText,
    Opaque,
    Cbor,
    SenmlCbor,
    SenmlEtchCbor,
    LinkFormat,
    Tlv,
    HierarchicalCbor,
}

impl Format {
    pub fn content_format_number(self) -> u16 {
        match self {
            Format::PlainText => 0,
            Format::LinkFormat => 40,
            Format::Opaque => 42,
            Format::Cbor => 60,
            Format::SenmlCbor => 112,
            Format::SenmlEtchCbor => 322,
            Format::Tlv => 11542,
            Format::HierarchicalCbor => 11544,
        }
    }

    pub fn from_content_format_number(n: u16) -> Option<Format> {
        Some(match n {
            0 => Format::PlainText,
            40 => Format::LinkFormat,
            42 => Format::Opaque,
            60 => Format::Cbor,
            112 => Format::SenmlCbor,
            322 => Format::SenmlEtchCbor,
            11542 => Format::Tlv,
            11544 => Format::HierarchicalCbor,
            _ => return None,
        })
    }

    /// Whether the Cargo feature gating this format is compiled in.
    pub fn is_enabled(self) -> bool {
        match self {
            Format::PlainText => cfg!(feature = "plain-text"),
            Format::Opaque => cfg!(feature = "opaque"),
            Format::Cbor => cfg!(feature = "cbor"),
            Format::SenmlCbor | Format::SenmlEtchCbor => cfg!(feature = "senml-cbor"),
            Format::Tlv => cfg!(feature = "tlv"),
            Format::HierarchicalCbor => cfg!(feature = "lwm2m-cbor"),
            Format::LinkFormat => true,
        }
    }
}

/// The management operation an encode/decode pass is serving, used by
/// `out_init`'s format-selection heuristic (`spec.md` §4.9) and by
/// `link_format` to decide which attributes apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Operation {
    Read,
    Write,
    Execute,
    Create,
    Delete,
    Discover,
    Observe,
    Send,
    Bootstrap,
    Register,
}

impl Operation {
    fn is_read_type(self) -> bool {
        matches!(self, Operation::Read | Operation::Observe)
    }
}

/// Caller-supplied format preference for `out_init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatHint {
    Unspecified,
    Explicit(Format),
}

/// Chooses the encoder format per `spec.md` §4.9: an unspecified hint on
/// a single-item read-type operation prefers the simple formats; every
/// other case prefers a complex (multi-entry) format. Falls through the
/// preference list to whichever candidate format is actually compiled
/// in, and fails `unsupported-format` only when none of them are.
pub fn select_output_format(
    op: Operation,
    item_count: usize,
    hint: FormatHint,
) -> Result<Format, ErrorKind> {
    match hint {
        FormatHint::Explicit(f) => {
            if f.is_enabled() {
                trace!("io: explicit format {:?} selected", f);
                Ok(f)
            } else {
                Err(ErrorKind::UnsupportedFormat)
            }
        }
        FormatHint::Unspecified => {
            let candidates: &[Format] = if item_count <= 1 && op.is_read_type() {
                &[Format::PlainText, Format::Cbor]
            } else {
                &[Format::SenmlCbor, Format::HierarchicalCbor, Format::Tlv]
            };
            let chosen = candidates
                .iter()
                .copied()
                .find(|f| f.is_enabled())
                .ok_or(ErrorKind::UnsupportedFormat)?;
            trace!("io: format {:?} selected for {:?} x{}", chosen, op, item_count);
            Ok(chosen)
        }
    }
}

/// Unified streaming encoder, dispatching to one concrete codec chosen
/// at `init` time. Formats whose feature is disabled simply have no
/// variant to construct, so `init` returns `unsupported-format` for them
/// via `select_output_format`/`Format::is_enabled`.
pub enum OutCtx<'a> {
    #[cfg(feature = "plain-text")]
    PlainText(plain_text::PlainTextEncoder<'a>),
    #[cfg(feature = "opaque")]
    Opaque(opaque::OpaqueEncoder<'a>),
    #[cfg(feature = "cbor")]
    Cbor(cbor::CborEncoder<'a>),
    #[cfg(feature = "senml-cbor")]
    SenmlCbor(senml_cbor::SenmlEncoder<'a>),
    #[cfg(feature = "lwm2m-cbor")]
    HierarchicalCbor(hierarchical_cbor::HCborEncoder<'a>),
    #[cfg(feature = "tlv")]
    Tlv(tlv::TlvEncoder),
}

impl<'a> OutCtx<'a> {
    pub fn init(
        format: Format,
        base: UriPath,
    ) -> Result<Self, ErrorKind> {
        if !format.is_enabled() {
            return Err(ErrorKind::UnsupportedFormat);
        }
        Ok(match format {
            #[cfg(feature = "plain-text")]
            Format::PlainText => OutCtx::PlainText(plain_text::PlainTextEncoder::new()),
            #[cfg(feature = "opaque")]
            Format::Opaque => OutCtx::Opaque(opaque::OpaqueEncoder::new()),
            #[cfg(feature = "cbor")]
            Format::Cbor => OutCtx::Cbor(cbor::CborEncoder::new()),
            #[cfg(feature = "senml-cbor")]
            Format::SenmlCbor | Format::SenmlEtchCbor => {
                OutCtx::SenmlCbor(senml_cbor::SenmlEncoder::new(base)?)
            }
            #[cfg(feature = "lwm2m-cbor")]
            Format::HierarchicalCbor => OutCtx::HierarchicalCbor(hierarchical_cbor::HCborEncoder::new(base)),
            #[cfg(feature = "tlv")]
            Format::Tlv => OutCtx::Tlv(tlv::TlvEncoder::new(base)),
            _ => return Err(ErrorKind::UnsupportedFormat),
        })
    }

    /// Adds one `(path, value)` entry. Single-value formats (Plain Text,
    /// Opaque, plain CBOR) ignore `path`; they only ever carry one entry
    /// per exchange, enforced by `item_count <= 1` at selection time.
    pub fn new_entry(&mut self, path: UriPath, value: Value<'a>) -> Result<(), ErrorKind> {
        match self {
            #[cfg(feature = "plain-text")]
            OutCtx::PlainText(enc) => enc.new_entry(value),
            #[cfg(feature = "opaque")]
            OutCtx::Opaque(enc) => enc.new_entry(value),
            #[cfg(feature = "cbor")]
            OutCtx::Cbor(enc) => enc.new_entry(value),
            #[cfg(feature = "senml-cbor")]
            OutCtx::SenmlCbor(enc) => enc.new_entry(path, value),
            #[cfg(feature = "lwm2m-cbor")]
            OutCtx::HierarchicalCbor(enc) => enc.new_entry(path, value),
            #[cfg(feature = "tlv")]
            OutCtx::Tlv(enc) => enc.new_entry(path, value),
        }
    }

    /// Signals no more entries will arrive. A no-op for the single-value
    /// formats, which complete as soon as their one entry drains.
    pub fn finish(&mut self) -> Result<(), ErrorKind> {
        match self {
            #[cfg(feature = "senml-cbor")]
            OutCtx::SenmlCbor(enc) => enc.finish(),
            #[cfg(feature = "lwm2m-cbor")]
            OutCtx::HierarchicalCbor(enc) => enc.finish(),
            #[cfg(feature = "tlv")]
            OutCtx::Tlv(enc) => enc.finish(),
            #[allow(unreachable_patterns)]
            _ => Ok(()),
        }
    }

    pub fn get_payload(&mut self, out: &mut [u8]) -> Result<(usize, Status), ErrorKind> {
        match self {
            #[cfg(feature = "plain-text")]
            OutCtx::PlainText(enc) => enc.get_payload(out),
            #[cfg(feature = "opaque")]
            OutCtx::Opaque(enc) => enc.get_payload(out),
            #[cfg(feature = "cbor")]
            OutCtx::Cbor(enc) => enc.get_payload(out),
            #[cfg(feature = "senml-cbor")]
            OutCtx::SenmlCbor(enc) => enc.get_payload(out),
            #[cfg(feature = "lwm2m-cbor")]
            OutCtx::HierarchicalCbor(enc) => enc.get_payload(out),
            #[cfg(feature = "tlv")]
            OutCtx::Tlv(enc) => enc.get_payload(out),
        }
    }
}

/// One decoded entry or control outcome from `InCtx::next_entry`, unifying
/// the per-format decoder events (`spec.md` §4.9 `in_init`).
pub enum InEvent<'b> {
    /// A fully-typed leaf value at `path`.
    Value(UriPath, Value<'b>),
    /// An empty Instance/Multi-Resource container.
    Null(UriPath),
    /// TLV leaf bytes whose concrete type the caller must resolve via
    /// `tlv::interpret`; TLV carries no inline type tag.
    RawLeaf(UriPath, &'b [u8]),
    /// A SenML-CBOR numeric leaf whose concrete type (among `permitted`)
    /// the caller must choose, then call `InCtx::resolve_numeric`.
    NumericDisambiguation(UriPath, TypeMask),
    /// `buf` does not yet hold a complete entry; call again once more
    /// bytes have arrived.
    NeedMore,
    /// No more entries; decoding of this payload is complete.
    Eof,
}

/// Unified streaming decoder, the mirror image of `OutCtx`: one concrete
/// codec chosen at `init` time, exposing a single `next_entry` surface.
/// Unlike `out_init`, format selection carries no heuristic here — the
/// caller always supplies the format explicitly, taken from the message's
/// Content-Format option.
pub enum InCtx {
    #[cfg(feature = "plain-text")]
    PlainText {
        base: UriPath,
        target: plain_text::DecodeTarget,
        done: bool,
    },
    #[cfg(feature = "opaque")]
    Opaque { base: UriPath, done: bool },
    #[cfg(feature = "cbor")]
    Cbor { base: UriPath, done: bool },
    #[cfg(feature = "senml-cbor")]
    SenmlCbor(senml_cbor::SenmlDecoder),
    #[cfg(feature = "lwm2m-cbor")]
    HierarchicalCbor(hierarchical_cbor::HCborDecoder),
    #[cfg(feature = "tlv")]
    Tlv(tlv::TlvDecoder),
}

impl InCtx {
    /// `plain_text_target` is only consulted for `Format::PlainText`
    /// (the format carries no type tag of its own); it is ignored for
    /// every other format.
    pub fn init(
        format: Format,
        base: UriPath,
        plain_text_target: Option<plain_text::DecodeTarget>,
    ) -> Result<Self, ErrorKind> {
        if !format.is_enabled() {
            return Err(ErrorKind::UnsupportedFormat);
        }
        Ok(match format {
            #[cfg(feature = "plain-text")]
            Format::PlainText => InCtx::PlainText {
                base,
                target: plain_text_target.ok_or(ErrorKind::InputArg)?,
                done: false,
            },
            #[cfg(feature = "opaque")]
            Format::Opaque => InCtx::Opaque { base, done: false },
            #[cfg(feature = "cbor")]
            Format::Cbor => InCtx::Cbor { base, done: false },
            #[cfg(feature = "senml-cbor")]
            Format::SenmlCbor | Format::SenmlEtchCbor => {
                InCtx::SenmlCbor(senml_cbor::SenmlDecoder::new(base))
            }
            #[cfg(feature = "lwm2m-cbor")]
            Format::HierarchicalCbor => {
                InCtx::HierarchicalCbor(hierarchical_cbor::HCborDecoder::new(base))
            }
            #[cfg(feature = "tlv")]
            Format::Tlv => InCtx::Tlv(tlv::TlvDecoder::new(base)),
            _ => return Err(ErrorKind::UnsupportedFormat),
        })
    }

    /// Advances decoding by one entry over the accumulated input held in
    /// `buf` so far (not just a newly arrived chunk, mirroring each
    /// underlying decoder's own `next_entry` contract).
    pub fn next_entry<'b>(&mut self, buf: &'b [u8]) -> Result<InEvent<'b>, ErrorKind> {
        match self {
            #[cfg(feature = "plain-text")]
            InCtx::PlainText { base, target, done } => {
                if *done {
                    return Ok(InEvent::Eof);
                }
                let value = plain_text::decode_as(buf, *target)?;
                *done = true;
                Ok(InEvent::Value(*base, value))
            }
            #[cfg(feature = "opaque")]
            InCtx::Opaque { base, done } => {
                if *done {
                    return Ok(InEvent::Eof);
                }
                *done = true;
                Ok(InEvent::Value(*base, opaque::decode(buf)))
            }
            #[cfg(feature = "cbor")]
            InCtx::Cbor { base, done } => {
                if *done {
                    return Ok(InEvent::Eof);
                }
                match cbor::decode(buf)? {
                    Some(value) => {
                        *done = true;
                        Ok(InEvent::Value(*base, value))
                    }
                    None => Ok(InEvent::NeedMore),
                }
            }
            #[cfg(feature = "senml-cbor")]
            InCtx::SenmlCbor(dec) => match dec.next_entry(buf)? {
                senml_cbor::SenmlOutcome::NeedMore => Ok(InEvent::NeedMore),
                senml_cbor::SenmlOutcome::Eof => Ok(InEvent::Eof),
                senml_cbor::SenmlOutcome::Null(p) => Ok(InEvent::Null(p)),
                senml_cbor::SenmlOutcome::NumericDisambiguation { path, permitted } => {
                    Ok(InEvent::NumericDisambiguation(path, permitted))
                }
                senml_cbor::SenmlOutcome::Value(p, v) => Ok(InEvent::Value(p, v)),
            },
            #[cfg(feature = "lwm2m-cbor")]
            InCtx::HierarchicalCbor(dec) => match dec.next_entry(buf)? {
                hierarchical_cbor::HCborEvent::NeedMore => Ok(InEvent::NeedMore),
                hierarchical_cbor::HCborEvent::Eof => Ok(InEvent::Eof),
                hierarchical_cbor::HCborEvent::Null(p) => Ok(InEvent::Null(p)),
                hierarchical_cbor::HCborEvent::Leaf(p, v) => Ok(InEvent::Value(p, v)),
            },
            #[cfg(feature = "tlv")]
            InCtx::Tlv(dec) => match dec.next_entry(buf)? {
                Some(tlv::TlvEvent::Null(p)) => Ok(InEvent::Null(p)),
                Some(tlv::TlvEvent::Leaf { path, raw }) => Ok(InEvent::RawLeaf(path, raw)),
                None => Ok(InEvent::NeedMore),
            },
        }
    }

    /// Resolves a pending `NumericDisambiguation` for the SenML-CBOR
    /// variant. Any other variant never produces that outcome, so calling
    /// this without one pending is a `logic` error.
    #[cfg(feature = "senml-cbor")]
    pub fn resolve_numeric(
        &mut self,
        target: senml_cbor::NumericTarget,
    ) -> Result<Value<'static>, ErrorKind> {
        match self {
            InCtx::SenmlCbor(dec) => dec.resolve_numeric(target),
            #[allow(unreachable_patterns)]
            _ => Err(ErrorKind::Logic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_plain_text_for_single_read() {
        let f = select_output_format(Operation::Read, 1, FormatHint::Unspecified).unwrap();
        assert_eq!(f, Format::PlainText);
    }

    #[test]
    fn selects_complex_format_for_multi_entry_write() {
        let f = select_output_format(Operation::Write, 3, FormatHint::Unspecified).unwrap();
        assert_eq!(f, Format::SenmlCbor);
    }

    #[test]
    fn explicit_hint_is_honoured() {
        let f = select_output_format(Operation::Read, 1, FormatHint::Explicit(Format::Tlv)).unwrap();
        assert_eq!(f, Format::Tlv);
    }

    #[test]
    fn content_format_numbers_round_trip() {
        for f in [
            Format::PlainText,
            Format::Opaque,
            Format::Cbor,
            Format::SenmlCbor,
            Format::SenmlEtchCbor,
            Format::LinkFormat,
            Format::Tlv,
            Format::HierarchicalCbor,
        ] {
            let n = f.content_format_number();
            assert_eq!(Format::from_content_format_number(n), Some(f));
        }
    }

    #[test]
    fn out_ctx_round_trips_single_cbor_value() {
        let mut ctx = OutCtx::init(Format::Cbor, UriPath::ROOT).unwrap();
        ctx.new_entry(UriPath::resource(3, 0, 1).unwrap(), Value::Uint(7))
            .unwrap();
        ctx.finish().unwrap();
        let mut out = [0u8; 8];
        let (n, status) = ctx.get_payload(&mut out).unwrap();
        assert_eq!(status, Status::Done);
        assert_eq!(&out[..n], &[0x07]);
    }

    #[test]
    fn in_ctx_decodes_single_cbor_value_then_eof() {
        let path = UriPath::resource(3, 0, 1).unwrap();
        let mut ctx = InCtx::init(Format::Cbor, path, None).unwrap();
        match ctx.next_entry(&[0x18, 0x2A]).unwrap() {
            InEvent::Value(p, Value::Uint(42)) => assert_eq!(p, path),
            _ => panic!("expected a decoded value"),
        }
        assert!(matches!(ctx.next_entry(&[]).unwrap(), InEvent::Eof));
    }

    #[test]
    fn in_ctx_plain_text_requires_a_decode_target() {
        let path = UriPath::resource(3, 0, 1).unwrap();
        assert!(InCtx::init(Format::PlainText, path, None).is_err());
        let mut ctx = InCtx::init(
            Format::PlainText,
            path,
            Some(plain_text::DecodeTarget::Int),
        )
        .unwrap();
        match ctx.next_entry(b"-7").unwrap() {
            InEvent::Value(p, Value::Int(-7)) => assert_eq!(p, path),
            _ => panic!("expected a decoded value"),
        }
    }
}
