use crate::charset::decode_text;
use crate::rfc2047::decode_encoded_words;

/// One header field as it appeared on the wire: original-case name, raw
/// value bytes (folding preserved, final line terminator stripped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    pub name: String,
    pub value: Vec<u8>,
}

/// Parse a complete header block (everything before the blank line) into
/// fields, preserving order and multiplicity. Lines without a colon that
/// are not continuations are skipped.
pub fn parse_header_block(block: &[u8]) -> Vec<RawHeader> {
    let mut headers: Vec<RawHeader> = Vec::new();
    for line in split_lines(block) {
        if line.is_empty() {
            break;
        }
        if line[0] == b' ' || line[0] == b'\t' {
            if let Some(last) = headers.last_mut() {
                last.value.extend_from_slice(b"\r\n");
                last.value.extend_from_slice(line);
            }
            continue;
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let name = String::from_utf8_lossy(&line[..colon]).trim().to_string();
        if name.is_empty() {
            continue;
        }
        headers.push(RawHeader {
            name,
            value: line[colon + 1..].to_vec(),
        });
    }
    headers
}

/// Lines without their terminators, accepting both CRLF and bare LF.
fn split_lines(block: &[u8]) -> impl Iterator<Item = &[u8]> {
    block.split(|&b| b == b'\n').map(|line| {
        if line.last() == Some(&b'\r') {
            &line[..line.len() - 1]
        } else {
            line
        }
    })
}

/// Last occurrence of `name`, case-insensitively.
pub fn last_header<'a>(headers: &'a [RawHeader], name: &str) -> Option<&'a RawHeader> {
    headers
        .iter()
        .rev()
        .find(|h| h.name.eq_ignore_ascii_case(name))
}

/// Every occurrence of `name` in declaration order.
pub fn headers_named<'a>(
    headers: &'a [RawHeader],
    name: &'a str,
) -> impl Iterator<Item = &'a RawHeader> {
    headers
        .iter()
        .filter(move |h| h.name.eq_ignore_ascii_case(name))
}

/// Replace every fold (line break plus following whitespace run) with a
/// single space and trim the ends.
pub fn unfold(value: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    let mut i = 0;
    while i < value.len() {
        match value[i] {
            b'\r' | b'\n' => {
                while i < value.len() && matches!(value[i], b'\r' | b'\n' | b' ' | b'\t') {
                    i += 1;
                }
                if !out.is_empty() && i < value.len() {
                    out.push(b' ');
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    while out.first().map_or(false, |b| b.is_ascii_whitespace()) {
        out.remove(0);
    }
    while out.last().map_or(false, |b| b.is_ascii_whitespace()) {
        out.pop();
    }
    out
}

/// Unfolded value as a lossy string, the usual input to field parsers.
pub fn unfolded_str(value: &[u8]) -> String {
    String::from_utf8_lossy(&unfold(value)).into_owned()
}

/// A parsed `Content-Type` (or `Content-Disposition`) value: lowercased
/// main token plus its parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MimeValue {
    pub token: String,
    params: Vec<(String, String)>,
}

impl MimeValue {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parse `token; key=value; key="value"` with quoted-string escapes,
/// RFC 2047 encoded-words in values and the single-segment and
/// multi-segment RFC 2231 extended forms (`key*`, `key*0`...).
pub fn parse_mime_value(value: &[u8]) -> MimeValue {
    let text = unfolded_str(value);
    let mut segments = split_params(&text);
    let token = segments
        .next()
        .map(|t| t.trim().to_ascii_lowercase())
        .unwrap_or_default();

    let mut params: Vec<(String, String)> = Vec::new();
    for segment in segments {
        let Some(eq) = segment.find('=') else { continue };
        let (raw_key, raw_val) = segment.split_at(eq);
        let raw_val = &raw_val[1..];
        let mut key = raw_key.trim().to_ascii_lowercase();
        let mut extended = false;
        // RFC 2231: `key*` is charset-extended, `key*0`/`key*1`... are
        // continuation segments appended in order.
        if let Some(star) = key.find('*') {
            extended = key.ends_with('*');
            key.truncate(star);
        }
        let decoded = if extended {
            decode_extended_value(raw_val.trim())
        } else {
            decode_encoded_words(&unquote(raw_val.trim()))
        };
        match params.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => existing.push_str(&decoded),
            None => params.push((key, decoded)),
        }
    }
    MimeValue { token, params }
}

/// Split on `;` outside of quoted strings.
fn split_params(text: &str) -> impl Iterator<Item = &str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quote = false;
    let mut escaped = false;
    for (i, ch) in text.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            ';' if !in_quote => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => (),
        }
    }
    parts.push(&text[start..]);
    parts.into_iter()
}

fn unquote(value: &str) -> String {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for ch in inner.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }
    out
}

/// RFC 2231 extended value: `charset'language'percent-encoded`.
fn decode_extended_value(value: &str) -> String {
    let mut fields = value.splitn(3, '\'');
    let (charset, encoded) = match (fields.next(), fields.next(), fields.next()) {
        (Some(cs), Some(_lang), Some(rest)) => (cs, rest),
        _ => ("", value),
    };
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut iter = encoded.bytes();
    while let Some(b) = iter.next() {
        if b == b'%' {
            let hi = iter.next().and_then(hex);
            let lo = iter.next().and_then(hex);
            match (hi, lo) {
                (Some(h), Some(l)) => bytes.push((h << 4) | l),
                _ => bytes.push(b'%'),
            }
        } else {
            bytes.push(b);
        }
    }
    decode_text(&bytes, charset).0
}

fn hex(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_block_with_folds() {
        let block = b"Subject: Hello\r\n world\r\nFrom: a@e.com\r\nFrom: b@e.com\r\n";
        let headers = parse_header_block(block);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].name, "Subject");
        assert_eq!(headers[0].value, b" Hello\r\n world".to_vec());
        assert_eq!(unfolded_str(&headers[0].value), "Hello world");
        assert_eq!(
            last_header(&headers, "from").unwrap().value,
            b" b@e.com".to_vec()
        );
        assert_eq!(headers_named(&headers, "From").count(), 2);
    }

    #[test]
    fn tolerates_bare_lf_and_junk_lines(){
        let headers = parse_header_block(b"A: 1\njunk line\nB: 2\n");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[1].name, "B");
    }

    #[test]
    fn parses_content_type_params() {
        let v = parse_mime_value(b" multipart/Mixed; boundary=\"b=42\"; charset=UTF-8");
        assert_eq!(v.token, "multipart/mixed");
        assert_eq!(v.param("boundary"), Some("b=42"));
        assert_eq!(v.param("charset"), Some("UTF-8"));
    }

    #[test]
    fn decodes_rfc2231_filename() {
        let v = parse_mime_value(
            b" application/pdf; filename*=iso-8859-1''facture%20caf%E9.pdf",
        );
        assert_eq!(v.param("filename"), Some("facture café.pdf"));

        let v = parse_mime_value(b" text/plain; name*0=\"part\"; name*1=\"two.txt\"");
        assert_eq!(v.param("name"), Some("parttwo.txt"));
    }

    #[test]
    fn decodes_encoded_word_in_param() {
        let v = parse_mime_value(b" image/png; name==?utf-8?Q?caf=C3=A9.png?=");
        assert_eq!(v.param("name"), Some("café.png"));
    }
}
