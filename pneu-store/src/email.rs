use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pneu_mime::{BodyPart, EmailAddress, ParsedEmail};

/// The canonical email record. Immutable once imported except for
/// `keywords`, `mailboxIds`, `deletedAt`, `summary` and `searchChunks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRecord {
    pub account_id: String,
    pub email_id: String,
    pub blob_id: String,
    pub thread_id: String,
    pub mailbox_ids: BTreeSet<String>,
    pub keywords: BTreeSet<String>,
    pub size: u64,
    pub header_size: u64,
    pub has_attachment: bool,
    pub preview: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub subject: Option<String>,
    pub from: Vec<EmailAddress>,
    pub sender: Vec<EmailAddress>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub reply_to: Vec<EmailAddress>,
    pub message_id: Vec<String>,
    pub in_reply_to: Vec<String>,
    pub references: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub body_structure: BodyPart,
    pub text_body: Vec<String>,
    pub html_body: Vec<String>,
    pub attachments: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub search_chunks: Option<i64>,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl EmailRecord {
    /// Assemble the record for a freshly parsed import.
    pub fn from_parsed(
        account_id: &str,
        email_id: &str,
        thread_id: &str,
        blob_id: &str,
        mailbox_ids: BTreeSet<String>,
        keywords: BTreeSet<String>,
        received_at: DateTime<Utc>,
        parsed: ParsedEmail,
    ) -> Self {
        Self {
            account_id: account_id.to_string(),
            email_id: email_id.to_string(),
            blob_id: blob_id.to_string(),
            thread_id: thread_id.to_string(),
            mailbox_ids,
            keywords,
            size: parsed.size,
            header_size: parsed.header_size,
            has_attachment: parsed.has_attachment,
            preview: parsed.preview,
            subject: parsed.subject,
            from: parsed.from,
            sender: parsed.sender,
            to: parsed.to,
            cc: parsed.cc,
            bcc: parsed.bcc,
            reply_to: parsed.reply_to,
            message_id: parsed.message_id,
            in_reply_to: parsed.in_reply_to,
            references: parsed.references,
            sent_at: parsed.sent_at,
            received_at,
            body_structure: parsed.body_structure,
            text_body: parsed.text_body,
            html_body: parsed.html_body,
            attachments: parsed.attachments,
            summary: None,
            search_chunks: None,
            version: 1,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// The `$seen` keyword decides whether a mailbox's unread counter
    /// moves on import.
    pub fn is_seen(&self) -> bool {
        self.keywords.contains("$seen")
    }

    /// Blob ids this record owns: the raw message plus every decoded
    /// leaf payload (range references point into the raw blob and carry
    /// no storage of their own).
    pub fn owned_blob_ids(&self) -> Vec<String> {
        let mut ids = vec![self.blob_id.clone()];
        collect_owned(&self.body_structure, &mut ids);
        ids
    }
}

fn collect_owned(part: &BodyPart, ids: &mut Vec<String>) {
    if part.sub_parts.is_empty() {
        if !part.blob_id.is_empty() && !pneu_blob::RangeRef::is_range_id(&part.blob_id) {
            ids.push(part.blob_id.clone());
        }
    } else {
        for p in &part.sub_parts {
            collect_owned(p, ids);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(blob_id: &str) -> BodyPart {
        BodyPart {
            part_id: Some("1".into()),
            content_type: "text/plain".into(),
            blob_id: blob_id.into(),
            ..BodyPart::default()
        }
    }

    #[test]
    fn owned_blobs_skip_ranges() {
        let mut record = EmailRecord::from_parsed(
            "alice",
            "e1",
            "e1",
            "raw",
            BTreeSet::from(["inbox".to_string()]),
            BTreeSet::new(),
            Utc::now(),
            ParsedEmail::default(),
        );
        record.body_structure = BodyPart {
            content_type: "multipart/mixed".into(),
            blob_id: "raw,120,512".into(),
            sub_parts: vec![leaf("raw,140,200"), leaf("p-abc123")],
            ..BodyPart::default()
        };
        assert_eq!(record.owned_blob_ids(), vec!["raw", "p-abc123"]);
    }

    #[test]
    fn seen_keyword() {
        let mut record = EmailRecord::from_parsed(
            "alice",
            "e1",
            "e1",
            "raw",
            BTreeSet::new(),
            BTreeSet::from(["$seen".to_string()]),
            Utc::now(),
            ParsedEmail::default(),
        );
        assert!(record.is_seen());
        record.keywords.clear();
        assert!(!record.is_seen());
    }
}
