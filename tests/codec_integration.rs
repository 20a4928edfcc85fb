//! Cross-codec integration checks that don't fit naturally as a single
//! module's unit test: an encoder/decoder round trip across a codec
//! boundary, and a Register link-format pass over a realistic object
//! list.
#![cfg(feature = "senml-cbor")]

use anj_core::io::link_format::{LinkFormatEncoder, LinkFormatKind};
use anj_core::io::senml_cbor::{SenmlDecoder, SenmlEncoder, SenmlOutcome};
use anj_core::path::UriPath;
use anj_core::value::{AttrSet, Value};

fn drain_link_format(enc: &mut LinkFormatEncoder) -> heapless::String<512> {
    let mut s: heapless::String<512> = heapless::String::new();
    loop {
        let mut buf = [0u8; 32];
        let (n, status) = enc.get_payload(&mut buf).unwrap();
        s.push_str(core::str::from_utf8(&buf[..n]).unwrap()).unwrap();
        if status == anj_core::error::Status::Done {
            break;
        }
    }
    s
}

/// A SenML-CBOR payload encoded from three resources across two
/// instances decodes back to the same paths and values.
#[test]
fn senml_encoder_output_round_trips_through_the_decoder() {
    let base = UriPath::object(3).unwrap();
    let mut enc = SenmlEncoder::new(base).unwrap();
    enc.new_entry(UriPath::resource(3, 0, 1).unwrap(), Value::Uint(7))
        .unwrap();
    enc.new_entry(UriPath::resource(3, 0, 9).unwrap(), Value::Int(-5))
        .unwrap();
    enc.new_entry(UriPath::resource(3, 1, 1).unwrap(), Value::Bool(true))
        .unwrap();
    enc.finish().unwrap();

    let mut bytes: heapless::Vec<u8, 128> = heapless::Vec::new();
    loop {
        let mut buf = [0u8; 16];
        let (n, status) = enc.get_payload(&mut buf).unwrap();
        bytes.extend_from_slice(&buf[..n]).unwrap();
        if status == anj_core::error::Status::Done {
            break;
        }
    }

    let mut dec = SenmlDecoder::new(UriPath::ROOT);
    let mut seen: heapless::Vec<(UriPath, i64), 8> = heapless::Vec::new();
    loop {
        match dec.next_entry(&bytes).unwrap() {
            SenmlOutcome::Value(path, Value::Uint(v)) => {
                seen.push((path, v as i64)).unwrap();
            }
            SenmlOutcome::Value(path, Value::Int(v)) => {
                seen.push((path, v)).unwrap();
            }
            SenmlOutcome::Value(path, Value::Bool(v)) => {
                seen.push((path, v as i64)).unwrap();
            }
            SenmlOutcome::Eof => break,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[0], (UriPath::resource(3, 0, 1).unwrap(), 7));
    assert_eq!(seen[1], (UriPath::resource(3, 0, 9).unwrap(), -5));
    assert_eq!(seen[2], (UriPath::resource(3, 1, 1).unwrap(), 1));
}

/// Register over a realistic object list excludes Security and OSCORE
/// while still numbering every other object's version correctly.
#[test]
fn register_payload_over_realistic_object_list() {
    let mut enc = LinkFormatEncoder::new(LinkFormatKind::Register);
    enc.init((1, 1)).unwrap();
    for (oid, ver) in [(0u16, None), (1, Some((1, 1))), (3, Some((1, 2))), (21, None), (5000, Some((1, 0)))] {
        enc.new_entry(UriPath::object(oid).unwrap(), ver, &AttrSet::default(), None)
            .unwrap();
    }
    let out = drain_link_format(&mut enc);
    assert_eq!(out.as_str(), "</1>;ver=1.1,</3>;ver=1.2,</5000>;ver=1.0");
}
