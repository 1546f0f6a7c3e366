use crate::headers::unfolded_str;
use crate::rfc2047::decode_encoded_words;

/// One mailbox of an address list. Either part may be missing on
/// malformed input; callers decide how to surface that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mailbox {
    pub name: Option<String>,
    pub address: Option<String>,
}

/// An RFC 5322 group (`Team: a@e.com, b@e.com;`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxGroup {
    pub name: Option<String>,
    pub mailboxes: Vec<Mailbox>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressItem {
    Single(Mailbox),
    Group(MailboxGroup),
}

impl AddressItem {
    /// Mailboxes of this item, groups flattened.
    pub fn mailboxes(&self) -> &[Mailbox] {
        match self {
            AddressItem::Single(mb) => std::slice::from_ref(mb),
            AddressItem::Group(g) => &g.mailboxes,
        }
    }
}

/// Flatten an address list into bare mailboxes, groups expanded.
pub fn flatten(items: &[AddressItem]) -> Vec<Mailbox> {
    items
        .iter()
        .flat_map(|item| item.mailboxes().iter().cloned())
        .collect()
}

#[derive(Debug, PartialEq)]
enum Tok {
    Word(String),
    Quoted(String),
    Comment(String),
    Angle(String),
    Comma,
    Colon,
    Semicolon,
}

fn tokenize(text: &str) -> Vec<Tok> {
    let mut toks = Vec::new();
    let mut chars = text.chars().peekable();
    let mut word = String::new();

    macro_rules! flush_word {
        () => {
            if !word.is_empty() {
                toks.push(Tok::Word(std::mem::take(&mut word)));
            }
        };
    }

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                flush_word!();
                let mut quoted = String::new();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                quoted.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => quoted.push(c),
                    }
                }
                toks.push(Tok::Quoted(quoted));
            }
            '(' => {
                flush_word!();
                let mut comment = String::new();
                let mut depth = 1u32;
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                comment.push(escaped);
                            }
                        }
                        '(' => {
                            depth += 1;
                            comment.push(c);
                        }
                        ')' => {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                            comment.push(c);
                        }
                        _ => comment.push(c),
                    }
                }
                toks.push(Tok::Comment(comment.trim().to_string()));
            }
            '<' => {
                flush_word!();
                let mut inner = String::new();
                for c in chars.by_ref() {
                    if c == '>' {
                        break;
                    }
                    if !c.is_whitespace() {
                        inner.push(c);
                    }
                }
                // Obsolete route prefix (`<@relay:user@host>`).
                let addr = match inner.rfind(':') {
                    Some(pos) => inner[pos + 1..].to_string(),
                    None => inner,
                };
                toks.push(Tok::Angle(addr));
            }
            ',' => {
                flush_word!();
                toks.push(Tok::Comma);
            }
            ':' => {
                flush_word!();
                toks.push(Tok::Colon);
            }
            ';' => {
                flush_word!();
                toks.push(Tok::Semicolon);
            }
            c if c.is_whitespace() => flush_word!(),
            c => word.push(c),
        }
    }
    flush_word!();
    toks
}

#[derive(Default)]
struct Assembler {
    words: Vec<String>,
    angle: Option<String>,
    comment: Option<String>,
    group: Option<MailboxGroup>,
    items: Vec<AddressItem>,
}

impl Assembler {
    fn display_name(words: &[String]) -> Option<String> {
        if words.is_empty() {
            return None;
        }
        Some(decode_encoded_words(&words.join(" ")).trim().to_string())
            .filter(|name| !name.is_empty())
    }

    fn flush_mailbox(&mut self) {
        let mut words = std::mem::take(&mut self.words);
        let address = self.angle.take().or_else(|| {
            // No angle form: the last word that looks like an address
            // plays that role, anything else stays display text.
            words
                .iter()
                .rposition(|w| w.contains('@'))
                .map(|pos| words.remove(pos))
        });
        let name = Self::display_name(&words).or_else(|| self.comment.take());
        self.comment = None;

        if address.is_none() && name.is_none() {
            return;
        }
        let mailbox = Mailbox { name, address };
        match &mut self.group {
            Some(group) => group.mailboxes.push(mailbox),
            None => self.items.push(AddressItem::Single(mailbox)),
        }
    }

    fn open_group(&mut self) {
        // A colon inside a group is noise; the outer group wins.
        if self.group.is_some() {
            return;
        }
        let name = Self::display_name(&std::mem::take(&mut self.words));
        self.comment = None;
        self.group = Some(MailboxGroup {
            name,
            mailboxes: Vec::new(),
        });
    }

    fn close_group(&mut self) {
        self.flush_mailbox();
        if let Some(group) = self.group.take() {
            self.items.push(AddressItem::Group(group));
        }
    }

    fn finish(mut self) -> Vec<AddressItem> {
        self.flush_mailbox();
        if let Some(group) = self.group.take() {
            self.items.push(AddressItem::Group(group));
        }
        self.items
    }
}

/// Parse an RFC 5322 address list, preserving group structure. Empty or
/// unusable input yields an empty list.
pub fn parse_address_list(value: &[u8]) -> Vec<AddressItem> {
    let text = unfolded_str(value);
    let mut asm = Assembler::default();
    for tok in tokenize(&text) {
        match tok {
            Tok::Word(w) => asm.words.push(w),
            Tok::Quoted(q) => asm.words.push(q),
            Tok::Comment(c) => {
                if !c.is_empty() {
                    asm.comment = Some(c);
                }
            }
            Tok::Angle(a) => asm.angle = Some(a),
            Tok::Comma => asm.flush_mailbox(),
            Tok::Colon => asm.open_group(),
            Tok::Semicolon => asm.close_group(),
        }
    }
    asm.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(name: Option<&str>, address: Option<&str>) -> AddressItem {
        AddressItem::Single(Mailbox {
            name: name.map(str::to_string),
            address: address.map(str::to_string),
        })
    }

    #[test]
    fn bare_and_named_addresses() {
        assert_eq!(
            parse_address_list(b"a@e.com"),
            vec![single(None, Some("a@e.com"))]
        );
        assert_eq!(
            parse_address_list(b"Jane Doe <jane@e.com>, bob@e.com"),
            vec![
                single(Some("Jane Doe"), Some("jane@e.com")),
                single(None, Some("bob@e.com")),
            ]
        );
    }

    #[test]
    fn quoted_names_and_comments() {
        assert_eq!(
            parse_address_list(b"\"Doe, Jane\" <jane@e.com>"),
            vec![single(Some("Doe, Jane"), Some("jane@e.com"))]
        );
        assert_eq!(
            parse_address_list(b"jane@e.com (Jane)"),
            vec![single(Some("Jane"), Some("jane@e.com"))]
        );
    }

    #[test]
    fn encoded_word_names() {
        assert_eq!(
            parse_address_list(b"=?utf-8?Q?Ren=C3=A9?= <rene@e.com>"),
            vec![single(Some("René"), Some("rene@e.com"))]
        );
    }

    #[test]
    fn groups() {
        let items = parse_address_list(b"Team: a@e.com, Bob <b@e.com>;, c@e.com");
        assert_eq!(items.len(), 2);
        match &items[0] {
            AddressItem::Group(g) => {
                assert_eq!(g.name.as_deref(), Some("Team"));
                assert_eq!(g.mailboxes.len(), 2);
                assert_eq!(g.mailboxes[1].name.as_deref(), Some("Bob"));
            }
            other => panic!("expected group, got {:?}", other),
        }
        assert_eq!(items[1], single(None, Some("c@e.com")));
    }

    #[test]
    fn folded_list_and_empty_input() {
        assert_eq!(
            parse_address_list(b"a@e.com,\r\n b@e.com"),
            vec![single(None, Some("a@e.com")), single(None, Some("b@e.com"))]
        );
        assert!(parse_address_list(b"").is_empty());
        assert!(parse_address_list(b"   ").is_empty());
    }

    #[test]
    fn route_address() {
        assert_eq!(
            parse_address_list(b"<@relay.example:user@e.com>"),
            vec![single(None, Some("user@e.com"))]
        );
    }

    #[test]
    fn flatten_expands_groups() {
        let items = parse_address_list(b"Team: a@e.com, b@e.com;, c@e.com");
        let flat = flatten(&items);
        assert_eq!(flat.len(), 3);
        assert_eq!(flat[2].address.as_deref(), Some("c@e.com"));
    }
}
