use pneu_blob::BlobStream;
use tokio::io::AsyncReadExt;

use crate::lossy_utf8;

/// Canonical charset name: trimmed, lowercased, `""` meaning `us-ascii`,
/// with the common shorthand aliases mapped to their IANA names.
pub fn normalize_charset(name: &str) -> String {
    let folded = name.trim().trim_matches('"').to_ascii_lowercase();
    match folded.as_str() {
        "" => "us-ascii".to_string(),
        "utf8" => "utf-8".to_string(),
        "latin1" => "iso-8859-1".to_string(),
        "ascii" => "us-ascii".to_string(),
        _ => folded,
    }
}

fn decode_latin1(bytes: &[u8]) -> String {
    // ISO-8859-1 maps each byte to the same code point.
    bytes.iter().map(|&b| b as char).collect()
}

/// Decode a complete buffer under the fallback rules: UTF-8/ASCII are
/// validated and fall back to ISO-8859-1 when invalid; other IANA
/// charsets go through their decoder; unknown names pass the bytes
/// through. The flag reports any encoding problem encountered.
pub fn decode_text(bytes: &[u8], charset: &str) -> (String, bool) {
    match normalize_charset(charset).as_str() {
        "us-ascii" | "utf-8" => match std::str::from_utf8(bytes) {
            Ok(s) => (s.to_string(), false),
            Err(_) => (decode_latin1(bytes), true),
        },
        "iso-8859-1" => (decode_latin1(bytes), false),
        name => match encoding_rs::Encoding::for_label(name.as_bytes()) {
            Some(encoding) => {
                let (text, _, had_errors) = encoding.decode(bytes);
                (text.into_owned(), had_errors)
            }
            None => (lossy_utf8(bytes), true),
        },
    }
}

enum Mode {
    /// UTF-8 / ASCII: buffer, validate, fall back to ISO-8859-1.
    Validate,
    /// Anything encoding_rs knows: incremental decoding that carries an
    /// incomplete code unit across read boundaries.
    Incremental(encoding_rs::Decoder),
    /// Unknown charset: pass bytes through.
    Raw,
}

/// Charset-decoding wrapper over a blob stream. Reads are bounded by the
/// caller, so the `Validate` mode's buffer never outgrows the configured
/// body-value limit.
pub struct DecodeReader {
    src: BlobStream,
    mode: Mode,
    problem: bool,
}

const READ_CHUNK: usize = 8 * 1024;

impl DecodeReader {
    pub fn new(src: BlobStream, charset: &str) -> Self {
        let normalized = normalize_charset(charset);
        let mode = match normalized.as_str() {
            "us-ascii" | "utf-8" => Mode::Validate,
            name => match encoding_rs::Encoding::for_label(name.as_bytes()) {
                Some(encoding) => Mode::Incremental(encoding.new_decoder()),
                None => Mode::Raw,
            },
        };
        let problem = matches!(mode, Mode::Raw);
        Self { src, mode, problem }
    }

    pub fn encoding_problem(&self) -> bool {
        self.problem
    }

    /// Decode up to roughly `max` bytes of output; the second value tells
    /// whether the source still had data when the limit was reached.
    pub async fn read_to_limit(&mut self, max: usize) -> std::io::Result<(String, bool)> {
        match &mut self.mode {
            Mode::Validate => {
                let (raw, more) = read_bounded(&mut self.src, max).await?;
                match std::str::from_utf8(&raw) {
                    Ok(s) => Ok((s.to_string(), more)),
                    // A multi-byte sequence cut by the read limit is not a
                    // problem with the data, only with where we stopped.
                    Err(e) if more && e.error_len().is_none() => {
                        let valid = std::str::from_utf8(&raw[..e.valid_up_to()])
                            .unwrap_or_default()
                            .to_string();
                        Ok((valid, true))
                    }
                    Err(_) => {
                        self.problem = true;
                        Ok((decode_latin1(&raw), more))
                    }
                }
            }
            Mode::Incremental(decoder) => {
                let mut out = String::new();
                let mut chunk = [0u8; READ_CHUNK];
                loop {
                    let n = self.src.read(&mut chunk).await?;
                    let last = n == 0;
                    // decode_to_string writes into spare capacity only.
                    out.reserve(
                        decoder
                            .max_utf8_buffer_length(n)
                            .unwrap_or(n * 4)
                            .max(4),
                    );
                    let (_, _, had_errors) =
                        decoder.decode_to_string(&chunk[..n], &mut out, last);
                    if had_errors {
                        self.problem = true;
                    }
                    if last {
                        return Ok((out, false));
                    }
                    if out.len() > max {
                        return Ok((out, true));
                    }
                }
            }
            Mode::Raw => {
                let (raw, more) = read_bounded(&mut self.src, max).await?;
                Ok((lossy_utf8(&raw), more))
            }
        }
    }
}

/// Read up to `max + 1` bytes; the extra byte detects overflow without
/// draining the source.
async fn read_bounded(src: &mut BlobStream, max: usize) -> std::io::Result<(Vec<u8>, bool)> {
    let budget = max.saturating_add(1);
    let mut out = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    while out.len() < budget {
        let want = (budget - out.len()).min(READ_CHUNK);
        let n = src.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Ok((out, false));
        }
        out.extend_from_slice(&chunk[..n]);
    }
    let more = out.len() > max;
    out.truncate(max);
    Ok((out, more))
}
