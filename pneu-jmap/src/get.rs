use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::io::AsyncReadExt;

use pneu_blob::DynBlobStore;
use pneu_mime::charset::DecodeReader;
use pneu_mime::headers::{parse_header_block, RawHeader};
use pneu_mime::BodyPart;
use pneu_store::{EmailRecord, EmailRepo, ObjectType, StateTracker};

use crate::args::Args;
use crate::error::MethodError;
use crate::header_prop::HeaderProperty;
use crate::DEFAULT_MAX_BODY_VALUE_BYTES;

/// Body-part keys returned when the request does not name its own
/// `bodyProperties`.
pub const DEFAULT_BODY_PROPERTIES: &[&str] = &[
    "partId",
    "blobId",
    "size",
    "name",
    "type",
    "charset",
    "disposition",
    "cid",
    "language",
    "location",
];

const DEFAULT_PROPERTIES: &[&str] = &[
    "id",
    "blobId",
    "threadId",
    "mailboxIds",
    "keywords",
    "size",
    "receivedAt",
    "messageId",
    "inReplyTo",
    "references",
    "sender",
    "from",
    "to",
    "cc",
    "bcc",
    "replyTo",
    "subject",
    "sentAt",
    "hasAttachment",
    "preview",
    "bodyValues",
    "textBody",
    "htmlBody",
    "attachments",
];

const KNOWN_PROPERTIES: &[&str] = &[
    "id",
    "blobId",
    "threadId",
    "mailboxIds",
    "keywords",
    "size",
    "receivedAt",
    "messageId",
    "inReplyTo",
    "references",
    "sender",
    "from",
    "to",
    "cc",
    "bcc",
    "replyTo",
    "subject",
    "sentAt",
    "hasAttachment",
    "preview",
    "bodyValues",
    "textBody",
    "htmlBody",
    "attachments",
    "bodyStructure",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponse {
    pub account_id: String,
    /// Decimal string of the Email state counter.
    pub state: String,
    pub list: Vec<Value>,
    pub not_found: Vec<String>,
}

/// `Email/get`: filtered projection of email records, with on-demand
/// header parsing over a byte-ranged blob read and lazily materialized
/// body values.
pub struct EmailGet {
    repo: EmailRepo,
    tracker: StateTracker,
    blobs: DynBlobStore,
    max_body_value_bytes: usize,
    summary_overwrites_preview: bool,
}

struct GetPlan {
    properties: Option<Vec<String>>,
    header_props: Vec<HeaderProperty>,
    body_properties: Vec<String>,
    fetch_text: bool,
    fetch_html: bool,
    fetch_all: bool,
    max_body_bytes: usize,
}

impl EmailGet {
    pub fn new(repo: EmailRepo, tracker: StateTracker, blobs: DynBlobStore) -> Self {
        Self {
            repo,
            tracker,
            blobs,
            max_body_value_bytes: DEFAULT_MAX_BODY_VALUE_BYTES,
            summary_overwrites_preview: false,
        }
    }

    pub fn with_max_body_value_bytes(mut self, max: usize) -> Self {
        self.max_body_value_bytes = max;
        self
    }

    pub fn with_summary_overwrites_preview(mut self, enabled: bool) -> Self {
        self.summary_overwrites_preview = enabled;
        self
    }

    pub async fn handle(
        &self,
        caller_account: &str,
        args_value: &Value,
    ) -> Result<GetResponse, MethodError> {
        let args = Args::new(args_value)
            .ok_or_else(|| MethodError::invalid_arguments("arguments must be an object"))?;
        let account = args.str_or("accountId", caller_account).to_string();

        let ids = args
            .string_slice("ids")
            .ok_or_else(|| MethodError::invalid_arguments("ids must be an array of strings"))?;

        let properties = if args.has("properties") {
            Some(args.string_slice("properties").ok_or_else(|| {
                MethodError::invalid_arguments("properties must be an array of strings")
            })?)
        } else {
            None
        };

        let mut header_props = Vec::new();
        if let Some(props) = &properties {
            for prop in props {
                if prop.starts_with("header:") {
                    header_props.push(HeaderProperty::parse(prop)?);
                } else if !KNOWN_PROPERTIES.contains(&prop.as_str()) {
                    return Err(MethodError::invalid_arguments(format!(
                        "unknown property: {}",
                        prop
                    )));
                }
            }
        }

        let body_properties = match args.string_slice("bodyProperties") {
            Some(props) => props,
            None => DEFAULT_BODY_PROPERTIES.iter().map(|p| p.to_string()).collect(),
        };

        // Non-positive values read as "use the server maximum".
        let max_body_bytes = match args.opt_int("maxBodyValueBytes") {
            Some(v) if v > 0 => (v as usize).min(self.max_body_value_bytes),
            _ => self.max_body_value_bytes,
        };

        let plan = GetPlan {
            properties,
            header_props,
            body_properties,
            fetch_text: args.bool_or("fetchTextBodyValues", false),
            fetch_html: args.bool_or("fetchHTMLBodyValues", false),
            fetch_all: args.bool_or("fetchAllBodyValues", false),
            max_body_bytes,
        };

        let mut list = Vec::new();
        let mut not_found = Vec::new();
        for id in ids {
            match self.repo.get_email(&account, &id).await {
                Ok(Some(email)) if !email.is_deleted() => {
                    list.push(self.project(&account, &email, &plan).await?);
                }
                Ok(_) => not_found.push(id),
                Err(e) => return Err(MethodError::server_fail(e)),
            }
        }

        let state = self
            .tracker
            .current_state(&account, ObjectType::Email)
            .await
            .map_err(MethodError::server_fail)?;

        Ok(GetResponse {
            account_id: account,
            state: state.to_string(),
            list,
            not_found,
        })
    }

    async fn project(
        &self,
        account: &str,
        email: &EmailRecord,
        plan: &GetPlan,
    ) -> Result<Value, MethodError> {
        // One ranged read covers every header:* property of this email.
        let headers = if plan.header_props.is_empty() {
            None
        } else {
            Some(self.fetch_headers(account, email).await?)
        };

        let requested: Vec<&str> = match &plan.properties {
            Some(props) => props.iter().map(String::as_str).collect(),
            None => DEFAULT_PROPERTIES.to_vec(),
        };

        let mut out = Map::new();
        out.insert("id".to_string(), json!(email.email_id));
        for prop in requested {
            if prop == "id" {
                continue;
            }
            if prop.starts_with("header:") {
                continue;
            }
            let value = match prop {
                "bodyValues" => self.body_values(account, email, plan).await,
                other => self.simple_property(email, other, plan),
            };
            out.insert(prop.to_string(), value);
        }
        for header_prop in &plan.header_props {
            let block = headers.as_deref().unwrap_or(&[]);
            out.insert(header_prop.response_key(), header_prop.apply(block));
        }
        Ok(Value::Object(out))
    }

    fn simple_property(&self, email: &EmailRecord, prop: &str, plan: &GetPlan) -> Value {
        match prop {
            "blobId" => json!(email.blob_id),
            "threadId" => json!(email.thread_id),
            "mailboxIds" => {
                let map: Map<String, Value> = email
                    .mailbox_ids
                    .iter()
                    .map(|id| (id.clone(), Value::Bool(true)))
                    .collect();
                Value::Object(map)
            }
            // Always an object, even when no keyword is set.
            "keywords" => {
                let map: Map<String, Value> = email
                    .keywords
                    .iter()
                    .map(|kw| (kw.clone(), Value::Bool(true)))
                    .collect();
                Value::Object(map)
            }
            "size" => json!(email.size),
            "receivedAt" => json!(rfc3339(&email.received_at)),
            "sentAt" => email
                .sent_at
                .as_ref()
                .map(|d| json!(rfc3339(d)))
                .unwrap_or(Value::Null),
            "subject" => email
                .subject
                .as_ref()
                .map(|s| json!(s))
                .unwrap_or(Value::Null),
            "from" => json!(email.from),
            "to" => json!(email.to),
            "cc" => json!(email.cc),
            "replyTo" => json!(email.reply_to),
            // The RFC 8621 address-header asymmetry: these two are null
            // when empty, the four above are empty arrays.
            "sender" => nullable_list(&email.sender),
            "bcc" => nullable_list(&email.bcc),
            "messageId" => nullable_list(&email.message_id),
            "inReplyTo" => nullable_list(&email.in_reply_to),
            "references" => nullable_list(&email.references),
            "hasAttachment" => json!(email.has_attachment),
            "preview" => match (&email.summary, self.summary_overwrites_preview) {
                (Some(summary), true) => json!(summary),
                _ => json!(email.preview),
            },
            "bodyStructure" => project_part(&email.body_structure, &plan.body_properties),
            "textBody" => part_refs(email, &email.text_body, &plan.body_properties),
            "htmlBody" => part_refs(email, &email.html_body, &plan.body_properties),
            "attachments" => part_refs(email, &email.attachments, &plan.body_properties),
            _ => Value::Null,
        }
    }

    async fn fetch_headers(
        &self,
        account: &str,
        email: &EmailRecord,
    ) -> Result<Vec<RawHeader>, MethodError> {
        let range = format!("{},0,{}", email.blob_id, email.header_size);
        let mut stream = self
            .blobs
            .stream(account, &range)
            .await
            .map_err(MethodError::server_fail)?;
        let mut block = Vec::with_capacity(email.header_size as usize);
        stream
            .read_to_end(&mut block)
            .await
            .map_err(MethodError::server_fail)?;
        Ok(parse_header_block(&block))
    }

    async fn body_values(&self, account: &str, email: &EmailRecord, plan: &GetPlan) -> Value {
        let mut part_ids: Vec<&str> = Vec::new();
        if plan.fetch_text {
            part_ids.extend(email.text_body.iter().map(String::as_str));
        }
        if plan.fetch_html {
            if email.html_body.is_empty() {
                part_ids.extend(email.text_body.iter().map(String::as_str));
            } else {
                part_ids.extend(email.html_body.iter().map(String::as_str));
            }
        }
        if plan.fetch_all {
            for leaf in email.body_structure.leaves() {
                if leaf.content_type.starts_with("text/") {
                    if let Some(id) = leaf.part_id.as_deref() {
                        part_ids.push(id);
                    }
                }
            }
        }
        part_ids.dedup_by(|a, b| a == b);

        let mut values = Map::new();
        for part_id in part_ids {
            if values.contains_key(part_id) {
                continue;
            }
            let Some(part) = email.body_structure.find(part_id) else {
                continue;
            };
            values.insert(
                part_id.to_string(),
                self.one_body_value(account, part, plan.max_body_bytes).await,
            );
        }
        Value::Object(values)
    }

    /// A failed fetch or decode never fails the call; it reports as an
    /// encoding problem on that part.
    async fn one_body_value(&self, account: &str, part: &BodyPart, max: usize) -> Value {
        let stream = match self.blobs.stream(account, &part.blob_id).await {
            Ok(s) => s,
            Err(error) => {
                tracing::warn!(%error, blob_id = %part.blob_id, "body value fetch failed");
                return json!({"value": "", "isTruncated": false, "isEncodingProblem": true});
            }
        };
        let mut reader = DecodeReader::new(stream, &part.charset);
        match reader.read_to_limit(max).await {
            Ok((text, more)) => json!({
                "value": text,
                "isTruncated": more,
                "isEncodingProblem": reader.encoding_problem(),
            }),
            Err(error) => {
                tracing::warn!(%error, blob_id = %part.blob_id, "body value decode failed");
                json!({"value": "", "isTruncated": false, "isEncodingProblem": true})
            }
        }
    }
}

fn rfc3339(date: &chrono::DateTime<chrono::Utc>) -> String {
    date.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn nullable_list<T: Serialize>(list: &[T]) -> Value {
    if list.is_empty() {
        Value::Null
    } else {
        json!(list)
    }
}

/// Expand part-id references into property-filtered leaf objects; a
/// dangling reference degrades to `{partId}`.
fn part_refs(email: &EmailRecord, ids: &[String], body_properties: &[String]) -> Value {
    Value::Array(
        ids.iter()
            .map(|id| match email.body_structure.find(id) {
                Some(part) => project_part(part, body_properties),
                None => json!({ "partId": id }),
            })
            .collect(),
    )
}

fn project_part(part: &BodyPart, body_properties: &[String]) -> Value {
    let mut out = Map::new();
    for prop in body_properties {
        let value = match prop.as_str() {
            "partId" => part
                .part_id
                .as_ref()
                .map(|id| json!(id))
                .unwrap_or(Value::Null),
            "blobId" => json!(part.blob_id),
            "size" => json!(part.size),
            "name" => nullable_str(&part.name),
            "type" => json!(part.content_type),
            "charset" => nullable_str(&part.charset),
            "disposition" => nullable_str(&part.disposition),
            "cid" => part.cid.as_ref().map(|c| json!(c)).unwrap_or(Value::Null),
            "language" => nullable_list(&part.language),
            "location" => part
                .location
                .as_ref()
                .map(|l| json!(l))
                .unwrap_or(Value::Null),
            "subParts" => Value::Array(
                part.sub_parts
                    .iter()
                    .map(|p| project_part(p, body_properties))
                    .collect(),
            ),
            _ => continue,
        };
        out.insert(prop.clone(), value);
    }
    Value::Object(out)
}

fn nullable_str(s: &str) -> Value {
    if s.is_empty() {
        Value::Null
    } else {
        json!(s)
    }
}
