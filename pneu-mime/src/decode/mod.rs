mod base64;
mod quoted_printable;

pub use base64::Base64Decoder;
pub use quoted_printable::QuotedPrintableDecoder;

#[derive(Debug, thiserror::Error)]
#[error("malformed {encoding} content")]
pub struct DecodeError {
    pub encoding: &'static str,
}

impl DecodeError {
    pub(crate) fn base64() -> Self {
        Self { encoding: "base64" }
    }

    pub(crate) fn quoted_printable() -> Self {
        Self {
            encoding: "quoted-printable",
        }
    }
}

/// Incremental transfer-encoding decoder: consumes arbitrary input
/// slices, appends decoded bytes to `out`, and carries any partial
/// quantum across calls so callers can feed reads of any size.
pub trait TransferDecoder: Send {
    fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<(), DecodeError>;

    /// Signal end of input; flushes carried state and rejects a payload
    /// cut mid-quantum.
    fn finish(&mut self, out: &mut Vec<u8>) -> Result<(), DecodeError>;
}
