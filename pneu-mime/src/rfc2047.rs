use crate::charset::decode_text;
use crate::decode::{Base64Decoder, QuotedPrintableDecoder, TransferDecoder};

/// Decode RFC 2047 encoded-words (`=?charset?B|Q?payload?=`) embedded in
/// a header value. Malformed candidates are left verbatim; whitespace
/// separating two adjacent encoded words is absorbed.
pub fn decode_encoded_words(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = String::with_capacity(input.len());
    let mut pos = 0;
    let mut after_word = false;

    while pos < bytes.len() {
        let Some(start) = find(bytes, pos, b"=?") else {
            out.push_str(&input[pos..]);
            break;
        };
        let gap = &input[pos..start];
        if !(after_word && gap.chars().all(char::is_whitespace)) {
            out.push_str(gap);
        }
        match parse_word(bytes, start) {
            Some((decoded, end)) => {
                out.push_str(&decoded);
                after_word = true;
                pos = end;
            }
            None => {
                out.push_str("=?");
                after_word = false;
                pos = start + 2;
            }
        }
    }
    out
}

fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|i| from + i)
}

/// Parse one encoded word starting at `start` (which points at `=?`);
/// returns the decoded text and the offset just past the closing `?=`.
fn parse_word(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let charset_start = start + 2;
    let charset_end = find(bytes, charset_start, b"?")?;
    // RFC 2231 language suffix ("utf-8*en") is ignored.
    let charset = std::str::from_utf8(&bytes[charset_start..charset_end]).ok()?;
    let charset = charset.split('*').next().unwrap_or(charset);

    let encoding = *bytes.get(charset_end + 1)?;
    if bytes.get(charset_end + 2) != Some(&b'?') {
        return None;
    }
    let payload_start = charset_end + 3;
    let payload_end = find(bytes, payload_start, b"?=")?;
    let payload = &bytes[payload_start..payload_end];

    let raw = match encoding {
        b'B' | b'b' => {
            let mut decoder = Base64Decoder::new();
            let mut buf = Vec::with_capacity(payload.len());
            decoder.decode(payload, &mut buf).ok()?;
            decoder.finish(&mut buf).ok()?;
            buf
        }
        b'Q' | b'q' => decode_q(payload)?,
        _ => return None,
    };

    let (text, _problem) = decode_text(&raw, charset);
    Some((text, payload_end + 2))
}

fn decode_q(payload: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len());
    let mut decoder = QuotedPrintableDecoder::new();
    let mut iter = payload.iter();
    while let Some(&ch) = iter.next() {
        match ch {
            // In Q encoding underscore stands for space and raw
            // whitespace is not allowed inside the payload.
            b'_' => out.push(b' '),
            b'=' => {
                let first = *iter.next()?;
                let second = *iter.next()?;
                let mut buf = Vec::with_capacity(1);
                decoder.decode(&[b'=', first, second], &mut buf).ok()?;
                out.extend_from_slice(&buf);
            }
            b' ' | b'\t' | b'\r' | b'\n' => return None,
            _ => out.push(ch),
        }
    }
    Some(out)
}
