pub mod charset;
pub mod decode;
pub mod fields;
pub mod headers;
pub mod part;
pub mod preview;
pub mod rfc2047;
pub mod walk;

mod classify;

pub use part::{BodyPart, EmailAddress, ParsedEmail};
pub use walk::{parse_message, ParseAbort};

#[derive(Debug, thiserror::Error)]
pub enum MimeError {
    #[error("invalid email: {0}")]
    InvalidEmail(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("blob store failure: {0}")]
    Blob(#[from] pneu_blob::BlobError),
}

/// Decode bytes as UTF-8, replacing each invalid byte with U+FFFD. One
/// replacement character per bad byte, unlike `from_utf8_lossy` which
/// covers a maximal invalid run with a single one.
pub fn lossy_utf8(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(s) => {
                out.push_str(s);
                return out;
            }
            Err(e) => {
                let (valid, after) = rest.split_at(e.valid_up_to());
                out.push_str(unsafe { std::str::from_utf8_unchecked(valid) });
                out.push('\u{FFFD}');
                rest = &after[1..];
            }
        }
    }
}
