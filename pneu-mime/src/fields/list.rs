use crate::headers::unfolded_str;

/// Extract every `<...>`-bracketed token of an RFC 2369 list header, in
/// order. Anything outside the brackets (comments, commas) is ignored.
pub fn parse_url_list(value: &[u8]) -> Vec<String> {
    let text = unfolded_str(value);
    let mut urls = Vec::new();
    let mut rest = text.as_str();
    while let Some(open) = rest.find('<') {
        let Some(close) = rest[open + 1..].find('>') else {
            break;
        };
        let url = rest[open + 1..open + 1 + close].trim();
        if !url.is_empty() {
            urls.push(url.to_string());
        }
        rest = &rest[open + close + 2..];
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::parse_url_list;

    #[test]
    fn extracts_bracketed_tokens() {
        assert_eq!(
            parse_url_list(b"<mailto:leave@host>, (comment)\r\n <https://host/leave>"),
            vec!["mailto:leave@host", "https://host/leave"]
        );
        assert!(parse_url_list(b"no brackets here").is_empty());
    }
}
