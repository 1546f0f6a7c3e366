use serde_json::{json, Value};
use unicode_normalization::UnicodeNormalization;

use pneu_mime::fields::address::{parse_address_list, AddressItem};
use pneu_mime::fields::date::parse_date;
use pneu_mime::fields::id::parse_msg_ids;
use pneu_mime::fields::list::parse_url_list;
use pneu_mime::headers::{headers_named, unfolded_str, RawHeader};
use pneu_mime::lossy_utf8;
use pneu_mime::rfc2047::decode_encoded_words;

use crate::error::MethodError;

/// The seven output forms of `header:Name[:asForm][:all]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderForm {
    Raw,
    Text,
    Addresses,
    GroupedAddresses,
    MessageIds,
    Date,
    URLs,
}

impl HeaderForm {
    fn parse(token: &str) -> Option<Self> {
        Some(match token {
            "asRaw" => HeaderForm::Raw,
            "asText" => HeaderForm::Text,
            "asAddresses" => HeaderForm::Addresses,
            "asGroupedAddresses" => HeaderForm::GroupedAddresses,
            "asMessageIds" => HeaderForm::MessageIds,
            "asDate" => HeaderForm::Date,
            "asURLs" => HeaderForm::URLs,
            _ => return None,
        })
    }

    fn suffix(&self) -> &'static str {
        match self {
            HeaderForm::Raw => "",
            HeaderForm::Text => ":asText",
            HeaderForm::Addresses => ":asAddresses",
            HeaderForm::GroupedAddresses => ":asGroupedAddresses",
            HeaderForm::MessageIds => ":asMessageIds",
            HeaderForm::Date => ":asDate",
            HeaderForm::URLs => ":asURLs",
        }
    }
}

const ADDRESS_HEADERS: &[&str] = &[
    "From",
    "Sender",
    "Reply-To",
    "To",
    "Cc",
    "Bcc",
    "Resent-From",
    "Resent-Sender",
    "Resent-Reply-To",
    "Resent-To",
    "Resent-Cc",
    "Resent-Bcc",
];

const MESSAGE_ID_HEADERS: &[&str] = &[
    "Message-ID",
    "In-Reply-To",
    "References",
    "Resent-Message-ID",
];

const DATE_HEADERS: &[&str] = &["Date", "Resent-Date"];

// The RFC 2369 set. List-Id is deliberately absent: it is not a URL
// header.
const URL_HEADERS: &[&str] = &[
    "List-Help",
    "List-Unsubscribe",
    "List-Subscribe",
    "List-Post",
    "List-Owner",
    "List-Archive",
];

fn in_set(set: &[&str], name: &str) -> bool {
    set.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// A parsed `header:Name[:asForm][:all]` property. The header name keeps
/// the caller's casing for the response key; matching is
/// case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderProperty {
    pub name: String,
    pub form: HeaderForm,
    pub all: bool,
}

impl HeaderProperty {
    /// Parse and validate a full property string (starting with
    /// `header:`).
    pub fn parse(property: &str) -> Result<Self, MethodError> {
        let rest = property
            .strip_prefix("header:")
            .ok_or_else(|| MethodError::invalid_arguments(format!(
                "not a header property: {}",
                property
            )))?;

        let mut fields = rest.split(':');
        let name = fields.next().unwrap_or_default().to_string();
        if name.is_empty() {
            return Err(MethodError::invalid_arguments(
                "header property with empty header name",
            ));
        }

        let mut form = HeaderForm::Raw;
        let mut all = false;
        match (fields.next(), fields.next(), fields.next()) {
            (None, _, _) => (),
            (Some("all"), None, _) => all = true,
            (Some(form_token), None, _) => {
                form = HeaderForm::parse(form_token).ok_or_else(|| {
                    MethodError::invalid_arguments(format!("unknown header form: {}", form_token))
                })?;
            }
            (Some(form_token), Some("all"), None) => {
                form = HeaderForm::parse(form_token).ok_or_else(|| {
                    MethodError::invalid_arguments(format!("unknown header form: {}", form_token))
                })?;
                all = true;
            }
            _ => {
                return Err(MethodError::invalid_arguments(format!(
                    "malformed header property: {}",
                    property
                )))
            }
        }

        let prop = Self { name, form, all };
        prop.validate()?;
        Ok(prop)
    }

    /// Form ↔ header compatibility.
    fn validate(&self) -> Result<(), MethodError> {
        let name = self.name.as_str();
        let ok = match self.form {
            HeaderForm::Raw => true,
            HeaderForm::Text => {
                !in_set(ADDRESS_HEADERS, name)
                    && !in_set(MESSAGE_ID_HEADERS, name)
                    && !in_set(DATE_HEADERS, name)
                    && !in_set(URL_HEADERS, name)
            }
            HeaderForm::Addresses | HeaderForm::GroupedAddresses => in_set(ADDRESS_HEADERS, name),
            HeaderForm::MessageIds => in_set(MESSAGE_ID_HEADERS, name),
            HeaderForm::Date => in_set(DATE_HEADERS, name),
            HeaderForm::URLs => in_set(URL_HEADERS, name),
        };
        if ok {
            Ok(())
        } else {
            Err(MethodError::invalid_arguments(format!(
                "form {} not allowed for header {}",
                self.form.suffix().trim_start_matches(':'),
                self.name
            )))
        }
    }

    /// The response key this property reports under.
    pub fn response_key(&self) -> String {
        format!(
            "header:{}{}{}",
            self.name,
            self.form.suffix(),
            if self.all { ":all" } else { "" }
        )
    }

    /// Apply the form against a parsed header block. Missing header:
    /// `null` without `:all`, `[]` with it; multiple occurrences without
    /// `:all` keep the last.
    pub fn apply(&self, headers: &[RawHeader]) -> Value {
        let matches: Vec<&RawHeader> = headers_named(headers, &self.name).collect();
        if self.all {
            Value::Array(matches.iter().map(|h| apply_form(self.form, &h.value)).collect())
        } else {
            match matches.last() {
                Some(h) => apply_form(self.form, &h.value),
                None => Value::Null,
            }
        }
    }
}

fn apply_form(form: HeaderForm, value: &[u8]) -> Value {
    match form {
        HeaderForm::Raw => Value::String(trim_end_ws(&lossy_utf8(value))),
        HeaderForm::Text => Value::String(text_form(value)),
        HeaderForm::Addresses => {
            let mailboxes: Vec<Value> = parse_address_list(value)
                .iter()
                .flat_map(|item| item.mailboxes().iter())
                .map(|mb| {
                    json!({
                        "name": mb.name.clone().unwrap_or_default(),
                        "email": mb.address.clone().unwrap_or_default(),
                    })
                })
                .collect();
            Value::Array(mailboxes)
        }
        HeaderForm::GroupedAddresses => {
            let groups: Vec<Value> = parse_address_list(value)
                .into_iter()
                .map(|item| match item {
                    AddressItem::Group(group) => json!({
                        "name": group.name,
                        "addresses": group
                            .mailboxes
                            .iter()
                            .map(|mb| json!({
                                "name": mb.name.clone().unwrap_or_default(),
                                "email": mb.address.clone().unwrap_or_default(),
                            }))
                            .collect::<Vec<_>>(),
                    }),
                    // Ungrouped source: a singleton group with no name.
                    AddressItem::Single(mb) => json!({
                        "name": Value::Null,
                        "addresses": [json!({
                            "name": mb.name.clone().unwrap_or_default(),
                            "email": mb.address.clone().unwrap_or_default(),
                        })],
                    }),
                })
                .collect();
            Value::Array(groups)
        }
        HeaderForm::MessageIds => {
            Value::Array(parse_msg_ids(value).into_iter().map(Value::String).collect())
        }
        HeaderForm::Date => match parse_date(value) {
            Some(date) => {
                Value::String(date.to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
            }
            None => Value::Null,
        },
        HeaderForm::URLs => {
            Value::Array(parse_url_list(value).into_iter().map(Value::String).collect())
        }
    }
}

/// asText: encoded-words decoded, unfolded, whitespace runs collapsed,
/// trimmed, NFC-normalized.
fn text_form(value: &[u8]) -> String {
    let decoded = decode_encoded_words(&unfolded_str(value));
    let mut collapsed = String::with_capacity(decoded.len());
    let mut pending_space = false;
    for ch in decoded.chars() {
        if ch == ' ' || ch == '\t' {
            pending_space = !collapsed.is_empty();
            continue;
        }
        if pending_space {
            collapsed.push(' ');
            pending_space = false;
        }
        collapsed.push(ch);
    }
    collapsed.nfc().collect()
}

fn trim_end_ws(s: &str) -> String {
    s.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pneu_mime::headers::parse_header_block;

    fn prop(s: &str) -> HeaderProperty {
        HeaderProperty::parse(s).unwrap()
    }

    #[test]
    fn grammar_accepts_the_documented_shapes() {
        assert_eq!(
            prop("header:Subject"),
            HeaderProperty {
                name: "Subject".into(),
                form: HeaderForm::Raw,
                all: false
            }
        );
        assert_eq!(prop("header:From:asAddresses").form, HeaderForm::Addresses);
        assert!(prop("header:X-Custom:all").all);
        let full = prop("header:References:asMessageIds:all");
        assert_eq!(full.form, HeaderForm::MessageIds);
        assert!(full.all);
    }

    #[test]
    fn grammar_rejects_malformed_properties() {
        assert!(HeaderProperty::parse("header:").is_err());
        assert!(HeaderProperty::parse("header:X:asBogus").is_err());
        assert!(HeaderProperty::parse("header:X:asText:extra").is_err());
        assert!(HeaderProperty::parse("header:X:asText:all:more").is_err());
        assert!(HeaderProperty::parse("subject").is_err());
    }

    #[test]
    fn form_header_compatibility() {
        assert!(HeaderProperty::parse("header:To:asAddresses").is_ok());
        assert!(HeaderProperty::parse("header:Resent-Cc:asGroupedAddresses").is_ok());
        assert!(HeaderProperty::parse("header:Subject:asAddresses").is_err());
        assert!(HeaderProperty::parse("header:Date:asDate").is_ok());
        assert!(HeaderProperty::parse("header:Subject:asDate").is_err());
        assert!(HeaderProperty::parse("header:List-Unsubscribe:asURLs").is_ok());
        assert!(HeaderProperty::parse("header:List-Id:asURLs").is_err());
        // Structured headers refuse asText, unstructured ones accept it.
        assert!(HeaderProperty::parse("header:From:asText").is_err());
        assert!(HeaderProperty::parse("header:List-Id:asText").is_ok());
        assert!(HeaderProperty::parse("header:X-Custom:asText").is_ok());
        // asRaw goes anywhere.
        assert!(HeaderProperty::parse("header:From").is_ok());
    }

    #[test]
    fn response_key_reconstruction() {
        assert_eq!(prop("header:Subject").response_key(), "header:Subject");
        assert_eq!(
            prop("header:FROM:asAddresses:all").response_key(),
            "header:FROM:asAddresses:all"
        );
        assert_eq!(
            prop("header:X-Custom:all").response_key(),
            "header:X-Custom:all"
        );
    }

    #[test]
    fn missing_header_null_or_empty_list() {
        let headers = parse_header_block(b"Subject: hi\r\n");
        assert_eq!(prop("header:X-Custom").apply(&headers), Value::Null);
        assert_eq!(
            prop("header:X-Custom:all").apply(&headers),
            Value::Array(vec![])
        );
    }

    #[test]
    fn last_occurrence_wins_without_all() {
        let headers = parse_header_block(b"Received: one\r\nReceived: two\r\n");
        assert_eq!(prop("header:Received").apply(&headers), json!(" two"));
        assert_eq!(
            prop("header:Received:all").apply(&headers),
            json!([" one", " two"])
        );
    }

    #[test]
    fn text_form_decodes_unfolds_and_normalizes() {
        let headers =
            parse_header_block(b"Subject: =?utf-8?Q?caf=C3=A9?=\r\n   au   lait\r\n");
        assert_eq!(
            prop("header:Subject:asText").apply(&headers),
            json!("café au lait")
        );
    }

    #[test]
    fn address_forms() {
        let headers =
            parse_header_block(b"To: Jane <jane@e.com>, Team: a@e.com, b@e.com;\r\n");
        assert_eq!(
            prop("header:To:asAddresses").apply(&headers),
            json!([
                {"name": "Jane", "email": "jane@e.com"},
                {"name": "", "email": "a@e.com"},
                {"name": "", "email": "b@e.com"},
            ])
        );
        assert_eq!(
            prop("header:To:asGroupedAddresses").apply(&headers),
            json!([
                {"name": null, "addresses": [{"name": "Jane", "email": "jane@e.com"}]},
                {"name": "Team", "addresses": [
                    {"name": "", "email": "a@e.com"},
                    {"name": "", "email": "b@e.com"},
                ]},
            ])
        );
    }

    #[test]
    fn message_id_date_and_url_forms() {
        let headers = parse_header_block(
            concat!(
                "References: <a@e.com> <b@e.com>\r\n",
                "Date: Sat, 20 Jan 2024 10:00:00 +0200\r\n",
                "List-Unsubscribe: <mailto:leave@e.com>, <https://e.com/leave>\r\n",
            )
            .as_bytes(),
        );
        assert_eq!(
            prop("header:References:asMessageIds").apply(&headers),
            json!(["a@e.com", "b@e.com"])
        );
        assert_eq!(
            prop("header:Date:asDate").apply(&headers),
            json!("2024-01-20T08:00:00Z")
        );
        assert_eq!(
            prop("header:List-Unsubscribe:asURLs").apply(&headers),
            json!(["mailto:leave@e.com", "https://e.com/leave"])
        );
    }

    #[test]
    fn text_form_is_idempotent() {
        for input in ["plain words", "café au lait", "a  b\tc"] {
            let once = text_form(input.as_bytes());
            let twice = text_form(once.as_bytes());
            assert_eq!(once, twice);
        }
    }
}
