/// Target length of the stored preview, in characters.
pub const PREVIEW_LENGTH: usize = 256;

/// Condense decoded body text into a short extract: whitespace runs
/// collapse to single spaces, control characters drop out, and the
/// result is capped at `max_chars` characters.
pub fn extract_preview(text: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(max_chars.min(text.len()));
    let mut pending_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if ch.is_control() {
            continue;
        }
        if pending_space {
            if out.chars().count() + 1 >= max_chars {
                break;
            }
            out.push(' ');
            pending_space = false;
        }
        if out.chars().count() >= max_chars {
            break;
        }
        out.push(ch);
    }
    out
}

/// Strip tags and resolve the common entities, enough to preview an
/// HTML-only message. Not a sanitizer.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut chars = html.char_indices();
    while let Some((pos, ch)) = chars.next() {
        match ch {
            '<' => {
                if html[pos..].starts_with("<!--") {
                    if let Some(end) = html[pos..].find("-->") {
                        for _ in html[pos + 1..pos + end + 3].chars() {
                            chars.next();
                        }
                        continue;
                    }
                }
                for (_, c) in chars.by_ref() {
                    if c == '>' {
                        break;
                    }
                }
                out.push(' ');
            }
            '&' => {
                let rest = &html[pos..];
                let entity = [
                    ("&amp;", '&'),
                    ("&lt;", '<'),
                    ("&gt;", '>'),
                    ("&quot;", '"'),
                    ("&#39;", '\''),
                    ("&apos;", '\''),
                    ("&nbsp;", ' '),
                ]
                .iter()
                .find(|(name, _)| rest.starts_with(name));
                match entity {
                    Some((name, value)) => {
                        out.push(*value);
                        for _ in name.chars().skip(1) {
                            chars.next();
                        }
                    }
                    None => out.push('&'),
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_caps_length() {
        assert_eq!(extract_preview("Hello\r\n\r\n  world\t!", 256), "Hello world !");
        assert_eq!(extract_preview("abcdef", 3), "abc");
        assert_eq!(extract_preview("  lead", 256), "lead");
        assert_eq!(extract_preview("", 256), "");
    }

    #[test]
    fn drops_control_characters() {
        assert_eq!(extract_preview("a\u{0}b\u{7}c", 256), "abc");
    }

    #[test]
    fn strips_html() {
        assert_eq!(
            extract_preview(&html_to_text("<p>Hello <b>world</b> &amp; co</p>"), 256),
            "Hello world & co"
        );
        assert_eq!(
            html_to_text("a<!-- <b>ignored</b> -->b"),
            "ab"
        );
    }
}
