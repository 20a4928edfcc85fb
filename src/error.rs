//! Error taxonomy shared by every codec and the exchange state machine.
//!
//! Mirrors the split the original client makes between hard failures
//! (negative codes) and non-fatal "call me again" statuses (positive
//! codes): here that split is a `Result<Status, ErrorKind>` rather than a
//! signed integer, so callers can't accidentally treat a status as success
//! without matching it.

use core::fmt;

/// Hard failure conditions. None of these are recoverable by retrying the
/// same call with the same arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller violated a precondition (wrong path kind, ordering broken,
    /// malformed version string, ...).
    InputArg,
    /// Value type does not fit the selected format or operation.
    IoType,
    /// Input bytes are syntactically invalid or semantically inconsistent.
    FormatMismatch,
    /// Requested content format is not compiled in or not legal for this
    /// operation.
    UnsupportedFormat,
    /// The API was called in an order its contract does not permit.
    Logic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::InputArg => "invalid input argument",
            ErrorKind::IoType => "value type incompatible with format",
            ErrorKind::FormatMismatch => "malformed or inconsistent payload",
            ErrorKind::UnsupportedFormat => "content format not supported",
            ErrorKind::Logic => "API misuse",
        };
        f.write_str(s)
    }
}

/// Non-fatal statuses. Each one tells the caller exactly what to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation produced a partial result; call again with the same
    /// arguments plus an advanced buffer pointer.
    NeedNextCall,
    /// Decoder: supply more input via `feed_payload`.
    WantNextPayload,
    /// Decoder: the format does not carry type information for this leaf;
    /// caller must supply a concrete target type and retry.
    WantTypeDisambiguation,
    /// Discover entry lies outside the configured depth; caller may skip
    /// it.
    DepthWarning,
    /// Normal completion of a decoder stream.
    Eof,
    /// The call completed and produced a usable result with nothing left
    /// to report.
    Done,
}

/// Result type used throughout the codec layer: `Ok` carries a non-fatal
/// status (including successful completion via `Status::Done`), `Err`
/// carries a hard failure.
pub type CodecResult = Result<Status, ErrorKind>;

/// Outcome delivered to the exchange completion callback exactly once per
/// exchange (`spec.md` §7, §8 invariant 4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeOutcome {
    /// Exchange completed; `code` is the CoAP response code (2.xx on
    /// success, 4.xx/5.xx surfaced from the server).
    Response(u8),
    /// No response arrived within the retransmission budget.
    Timeout,
    /// `terminate()` was called before completion.
    Terminated,
    /// The server sent a Reset message.
    TerminatedByServer,
}

impl ExchangeOutcome {
    /// True for CoAP 2.xx response codes; mirrors the "result = 0 for
    /// 2.xx" rule in `spec.md` §7.
    pub fn is_success(&self) -> bool {
        matches!(self, ExchangeOutcome::Response(code) if (*code >> 5) == 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display_is_non_empty() {
        use core::fmt::Write;
        for kind in [
            ErrorKind::InputArg,
            ErrorKind::IoType,
            ErrorKind::FormatMismatch,
            ErrorKind::UnsupportedFormat,
            ErrorKind::Logic,
        ] {
            let mut buf: heapless::String<64> = heapless::String::new();
            write!(buf, "{kind}").unwrap();
            assert!(!buf.is_empty());
        }
    }

    #[test]
    fn success_code_classification() {
        assert!(ExchangeOutcome::Response(0x41).is_success()); // 2.01 Created
        assert!(!ExchangeOutcome::Response(0x84).is_success()); // 4.04 Not Found
        assert!(!ExchangeOutcome::Timeout.is_success());
    }
}
