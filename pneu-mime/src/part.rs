use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One mailbox of a JMAP address list. An absent display name serializes
/// as the empty string, per the address forms this engine emits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    pub name: String,
    pub email: String,
}

/// One node of the MIME tree. Leaves carry the blob holding their
/// decoded payload (or a range reference into the raw message when no
/// transfer decoding was needed); composites carry a range reference
/// spanning their children and no `partId`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyPart {
    #[serde(rename = "partId")]
    pub part_id: Option<String>,
    #[serde(rename = "type")]
    pub content_type: String,
    pub size: u64,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub charset: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub disposition: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub name: String,
    #[serde(rename = "blobId")]
    pub blob_id: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cid: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub language: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<String>,
    #[serde(rename = "subParts", skip_serializing_if = "Vec::is_empty", default)]
    pub sub_parts: Vec<BodyPart>,
}

impl BodyPart {
    pub fn is_multipart(&self) -> bool {
        self.content_type.starts_with("multipart/")
    }

    /// Depth-first search for a part by part id.
    pub fn find(&self, part_id: &str) -> Option<&BodyPart> {
        if self.part_id.as_deref() == Some(part_id) {
            return Some(self);
        }
        self.sub_parts.iter().find_map(|p| p.find(part_id))
    }

    /// Every leaf of the subtree, in depth-first declaration order.
    pub fn leaves(&self) -> Vec<&BodyPart> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a BodyPart>) {
        if self.is_multipart() {
            for p in &self.sub_parts {
                p.collect_leaves(out);
            }
        } else {
            out.push(self);
        }
    }
}

/// Everything the streaming parser derives from one raw message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedEmail {
    /// Octets of the raw message blob.
    pub size: u64,
    /// Octets from the start of the blob through the blank line that
    /// terminates the top-level header block, CRLF included.
    pub header_size: u64,

    pub subject: Option<String>,
    pub from: Vec<EmailAddress>,
    pub sender: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub reply_to: Vec<EmailAddress>,

    /// Bare message ids, angle brackets stripped.
    pub message_id: Vec<String>,
    pub in_reply_to: Vec<String>,
    pub references: Vec<String>,

    pub sent_at: Option<DateTime<Utc>>,

    pub body_structure: BodyPart,
    pub text_body: Vec<String>,
    pub html_body: Vec<String>,
    pub attachments: Vec<String>,
    pub has_attachment: bool,
    pub preview: String,

    /// Blob ids of every decoded leaf payload uploaded while parsing;
    /// the compensation set if the enclosing import fails.
    pub uploaded_part_blobs: Vec<String>,
}
