#![cfg_attr(not(feature = "std"), no_std)]
//! Payload codecs and request-exchange engine for an embedded
//! LwM2M-style device-management client.
//!
//! `value`/`path` hold the shared data model; `io` is the set of
//! content-format codecs (CBOR, SenML-CBOR, TLV, ...); `exchange` drives
//! a single CoAP request/response over those codecs. The CoAP transport
//! and the object/resource registry living above this crate are not its
//! concern.

pub mod base64;
pub mod error;
pub mod exchange;
pub mod io;
mod log_macros;
pub mod path;
pub mod value;

pub use error::{CodecResult, ErrorKind, ExchangeOutcome, Status};
pub use path::UriPath;
pub use value::Value;
