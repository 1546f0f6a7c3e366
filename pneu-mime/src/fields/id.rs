use crate::headers::unfolded_str;

/// Parse a message-id list: whitespace-separated tokens with their angle
/// brackets stripped, empties dropped.
pub fn parse_msg_ids(value: &[u8]) -> Vec<String> {
    unfolded_str(value)
        .split_whitespace()
        .map(|tok| tok.trim_start_matches('<').trim_end_matches('>'))
        .filter(|tok| !tok.is_empty())
        .map(str::to_string)
        .collect()
}
