use std::collections::HashMap;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use pneu_blob::{BlobStream, DynBlobStore, RangeRef};

use crate::charset::{decode_text, normalize_charset};
use crate::classify::{classify, has_attachment, Classified};
use crate::decode::{Base64Decoder, QuotedPrintableDecoder, TransferDecoder};
use crate::fields::address::{flatten, parse_address_list};
use crate::fields::date::parse_date;
use crate::fields::id::parse_msg_ids;
use crate::headers::{last_header, parse_header_block, parse_mime_value, unfolded_str, RawHeader};
use crate::part::{BodyPart, EmailAddress, ParsedEmail};
use crate::preview::{extract_preview, html_to_text, PREVIEW_LENGTH};
use crate::rfc2047::decode_encoded_words;
use crate::MimeError;

/// Body lines are scanned in segments of at most this size; longer lines
/// are handled in slices, so a part with no line breaks at all still
/// parses in bounded memory.
const MAX_SEGMENT: usize = 8 * 1024;
const READ_BUF: usize = 32 * 1024;
const MAX_HEADER_BLOCK: usize = 1024 * 1024;
const MAX_DEPTH: usize = 32;
/// Decoded prefix retained per text leaf for preview extraction.
const PREVIEW_CAPTURE: usize = 2 * 1024;
const DUPLEX_BUF: usize = 64 * 1024;

/// A parse failure, carrying the decoded-part blobs that were already
/// uploaded so the caller can issue compensating deletes.
#[derive(Debug)]
pub struct ParseAbort {
    pub error: MimeError,
    pub uploaded_blobs: Vec<String>,
}

/// Walk one raw RFC 5322 message as a stream: build the body-part tree
/// with byte offsets into the raw blob, pipe base64/quoted-printable leaf
/// payloads through a streaming decoder into fresh blob uploads, and
/// derive the structured metadata of the email record. Memory stays
/// bounded by nesting depth and fixed buffers, never by message size.
pub async fn parse_message(
    blobs: DynBlobStore,
    account: &str,
    blob_id: &str,
    input: BlobStream,
) -> Result<ParsedEmail, ParseAbort> {
    tracing::trace!(account, blob_id, command = "parse_message");
    let mut walker = Walker {
        account: account.to_string(),
        root_blob_id: blob_id.to_string(),
        blobs,
        reader: ByteReader::new(input),
        pushback: None,
        next_leaf: 0,
        uploaded: Vec::new(),
        previews: HashMap::new(),
    };
    match walker.run().await {
        Ok(email) => Ok(email),
        Err(error) => Err(ParseAbort {
            error,
            uploaded_blobs: walker.uploaded,
        }),
    }
}

// ---- buffered segment reader ----

struct ByteReader {
    src: BlobStream,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    offset: u64,
    eof: bool,
}

impl ByteReader {
    fn new(src: BlobStream) -> Self {
        Self {
            src,
            buf: vec![0u8; READ_BUF],
            start: 0,
            end: 0,
            offset: 0,
            eof: false,
        }
    }

    /// Absolute offset of the next unconsumed byte.
    fn offset(&self) -> u64 {
        self.offset
    }

    fn consume(&mut self, n: usize) {
        self.start += n;
        self.offset += n as u64;
    }

    async fn fill(&mut self) -> std::io::Result<()> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        let n = self.src.read(&mut self.buf[self.end..]).await?;
        if n == 0 {
            self.eof = true;
        } else {
            self.end += n;
        }
        Ok(())
    }

    /// Next run of bytes up to and including a `\n`, capped at `max`.
    /// Empty only at end of stream.
    async fn read_line(&mut self, max: usize) -> std::io::Result<Vec<u8>> {
        loop {
            let avail = &self.buf[self.start..self.end];
            if let Some(i) = avail.iter().take(max).position(|&b| b == b'\n') {
                let out = avail[..=i].to_vec();
                self.consume(i + 1);
                return Ok(out);
            }
            if avail.len() >= max {
                let out = avail[..max].to_vec();
                self.consume(max);
                return Ok(out);
            }
            if self.eof {
                let out = avail.to_vec();
                self.consume(out.len());
                return Ok(out);
            }
            self.fill().await?;
        }
    }
}

#[derive(Debug)]
struct Segment {
    bytes: Vec<u8>,
    ends_line: bool,
    start: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanEnd {
    /// Hit a delimiter line of `boundaries[level]`; `close` for the
    /// `--boundary--` form.
    Boundary { level: usize, close: bool },
    Eof,
}

struct PartOutcome {
    part: BodyPart,
    end: ScanEnd,
    /// Where this part's content stopped, in the enclosing frame.
    content_end: u64,
}

// ---- the walker ----

struct Walker {
    account: String,
    root_blob_id: String,
    blobs: DynBlobStore,
    reader: ByteReader,
    pushback: Option<Segment>,
    next_leaf: u32,
    uploaded: Vec<String>,
    /// Decoded text prefix per leaf part id, for preview extraction.
    previews: HashMap<String, (Vec<u8>, String)>,
}

impl Walker {
    async fn run(&mut self) -> Result<ParsedEmail, MimeError> {
        let (top_headers, header_size) = self.read_top_headers().await?;
        let outcome = self
            .parse_part(top_headers.clone(), 0, Vec::new(), false)
            .await?;
        // Defensive drain so `size` always covers the whole blob.
        while self.take_segment().await?.is_some() {}
        let size = self.reader.offset();

        let body_structure = outcome.part;
        let classified = classify(&body_structure);
        let preview = self.build_preview(&classified);

        let h = &top_headers;
        Ok(ParsedEmail {
            size,
            header_size,
            subject: last_header(h, "Subject")
                .map(|v| decode_encoded_words(&unfolded_str(&v.value)).trim().to_string()),
            from: address_field(h, "From"),
            sender: address_field(h, "Sender"),
            to: address_field(h, "To"),
            cc: address_field(h, "Cc"),
            bcc: address_field(h, "Bcc"),
            reply_to: address_field(h, "Reply-To"),
            message_id: id_field(h, "Message-ID"),
            in_reply_to: id_field(h, "In-Reply-To"),
            references: id_field(h, "References"),
            sent_at: last_header(h, "Date").and_then(|v| parse_date(&v.value)),
            has_attachment: has_attachment(&body_structure),
            text_body: classified.text_body,
            html_body: classified.html_body,
            attachments: classified.attachments,
            body_structure,
            preview,
            uploaded_part_blobs: self.uploaded.clone(),
        })
    }

    /// Offset of the next segment to be served, honoring a pushed-back
    /// segment whose bytes the reader already consumed.
    fn current_offset(&self) -> u64 {
        match &self.pushback {
            Some(seg) => seg.start,
            None => self.reader.offset(),
        }
    }

    async fn take_segment(&mut self) -> Result<Option<Segment>, MimeError> {
        if let Some(seg) = self.pushback.take() {
            return Ok(Some(seg));
        }
        let start = self.reader.offset();
        let bytes = self.reader.read_line(MAX_SEGMENT).await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let ends_line = bytes.last() == Some(&b'\n');
        Ok(Some(Segment {
            bytes,
            ends_line,
            start,
        }))
    }

    /// Top-level header block; ends at the blank line or EOF. Returns the
    /// parsed fields and `headerSize` (blank line included).
    async fn read_top_headers(&mut self) -> Result<(Vec<RawHeader>, u64), MimeError> {
        let mut block = Vec::new();
        loop {
            let Some(seg) = self.take_segment().await? else {
                break;
            };
            if is_blank_line(&seg.bytes) {
                break;
            }
            if block.len() + seg.bytes.len() > MAX_HEADER_BLOCK {
                return Err(MimeError::InvalidEmail("header block too large".into()));
            }
            block.extend_from_slice(&seg.bytes);
        }
        Ok((parse_header_block(&block), self.reader.offset()))
    }

    /// Header block of a child part. A boundary line in header position
    /// (zero-content malformed part) is pushed back for the body scan.
    async fn read_part_headers(
        &mut self,
        boundaries: &[Vec<u8>],
    ) -> Result<Vec<RawHeader>, MimeError> {
        let mut block = Vec::new();
        loop {
            let Some(seg) = self.take_segment().await? else {
                return Err(MimeError::InvalidEmail("truncated part headers".into()));
            };
            if is_blank_line(&seg.bytes) {
                break;
            }
            if match_boundary(&seg.bytes, boundaries).is_some() {
                self.pushback = Some(seg);
                break;
            }
            if block.len() + seg.bytes.len() > MAX_HEADER_BLOCK {
                return Err(MimeError::InvalidEmail("part header block too large".into()));
            }
            block.extend_from_slice(&seg.bytes);
        }
        Ok(parse_header_block(&block))
    }

    /// Stream content into `sink` until a delimiter of `boundaries` (or
    /// EOF). The line break preceding a delimiter belongs to the
    /// delimiter, so it is withheld from the sink until the next segment
    /// proves itself to be content.
    async fn scan_content(
        &mut self,
        boundaries: &[Vec<u8>],
        sink: &mut PartSink,
    ) -> Result<(ScanEnd, u64), MimeError> {
        let mut held: Vec<u8> = Vec::new();
        let mut at_line_start = true;
        loop {
            let Some(seg) = self.take_segment().await? else {
                sink.write(&held).await?;
                return Ok((ScanEnd::Eof, self.reader.offset()));
            };
            if at_line_start {
                if let Some((level, close)) = match_boundary(&seg.bytes, boundaries) {
                    return Ok((
                        ScanEnd::Boundary { level, close },
                        seg.start - held.len() as u64,
                    ));
                }
            }
            sink.write(&held).await?;
            held.clear();
            let (content, term) = split_terminator(&seg.bytes, seg.ends_line);
            sink.write(content).await?;
            held.extend_from_slice(term);
            at_line_start = seg.ends_line;
        }
    }

    fn parse_part(
        &mut self,
        headers: Vec<RawHeader>,
        depth: usize,
        boundaries: Vec<Vec<u8>>,
        in_digest: bool,
    ) -> BoxFuture<'_, Result<PartOutcome, MimeError>> {
        async move {
            let meta = PartMeta::from_headers(&headers, in_digest);
            if meta.content_type.starts_with("multipart/") {
                self.parse_multipart(meta, depth, boundaries).await
            } else {
                self.parse_leaf(meta, &boundaries).await
            }
        }
        .boxed()
    }

    async fn parse_multipart(
        &mut self,
        meta: PartMeta,
        depth: usize,
        outer: Vec<Vec<u8>>,
    ) -> Result<PartOutcome, MimeError> {
        if depth >= MAX_DEPTH {
            return Err(MimeError::InvalidEmail("multipart nesting too deep".into()));
        }
        let boundary = meta
            .boundary
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| MimeError::InvalidEmail("multipart part without boundary".into()))?;

        let mut inner = outer.clone();
        inner.push(boundary);
        let own_level = inner.len() - 1;

        // Preamble is discarded.
        let mut discard = PartSink::Discard;
        let (preamble_end, _) = self.scan_content(&inner, &mut discard).await?;
        let mut closed = match preamble_end {
            ScanEnd::Boundary { level, close } if level == own_level => close,
            ScanEnd::Boundary { .. } => {
                return Err(MimeError::InvalidEmail("mismatched multipart boundary".into()))
            }
            ScanEnd::Eof => {
                return Err(MimeError::InvalidEmail("unterminated multipart content".into()))
            }
        };

        let range_start = self.current_offset();
        let mut range_end = range_start;
        let mut children = Vec::new();
        let mut propagated: Option<(ScanEnd, u64)> = None;
        let is_digest = meta.content_type == "multipart/digest";

        while !closed {
            let child_headers = self.read_part_headers(&inner).await?;
            let outcome = self
                .parse_part(child_headers, depth + 1, inner.clone(), is_digest)
                .await?;
            children.push(outcome.part);
            range_end = outcome.content_end;
            match outcome.end {
                ScanEnd::Boundary { level, close } if level == own_level => closed = close,
                other => {
                    // An ancestor's delimiter (or EOF) implicitly closes
                    // this multipart; hand the event up unchanged.
                    propagated = Some((other, outcome.content_end));
                    closed = true;
                }
            }
        }

        let (end, content_end) = match propagated {
            Some(ev) => ev,
            None => {
                // Epilogue is discarded too, up to the enclosing frame.
                let mut discard = PartSink::Discard;
                self.scan_content(&outer, &mut discard).await?
            }
        };

        let part = BodyPart {
            part_id: None,
            content_type: meta.content_type,
            size: range_end - range_start,
            blob_id: RangeRef::new(&self.root_blob_id, range_start, range_end).to_string(),
            charset: String::new(),
            disposition: meta.disposition,
            name: meta.name,
            cid: meta.cid,
            language: meta.language,
            location: meta.location,
            sub_parts: children,
        };
        Ok(PartOutcome {
            part,
            end,
            content_end,
        })
    }

    async fn parse_leaf(
        &mut self,
        meta: PartMeta,
        boundaries: &[Vec<u8>],
    ) -> Result<PartOutcome, MimeError> {
        self.next_leaf += 1;
        let part_id = self.next_leaf.to_string();
        let is_text = meta.content_type.starts_with("text/");
        let content_start = self.current_offset();

        let decoder: Option<Box<dyn TransferDecoder>> = match meta.encoding.as_str() {
            "base64" => Some(Box::new(Base64Decoder::new())),
            "quoted-printable" => Some(Box::new(QuotedPrintableDecoder::new())),
            // 7bit, 8bit, binary and anything unrecognized stay in place
            // as a range into the raw blob.
            _ => None,
        };

        let (blob_id, size, preview, end, content_end) = match decoder {
            None => {
                let mut sink = PartSink::Raw {
                    preview: Vec::new(),
                    capture: is_text,
                };
                let (end, content_end) = self.scan_content(boundaries, &mut sink).await?;
                let blob_id =
                    RangeRef::new(&self.root_blob_id, content_start, content_end).to_string();
                (
                    blob_id,
                    content_end - content_start,
                    sink.take_preview(),
                    end,
                    content_end,
                )
            }
            Some(decoder) => {
                let (writer, upload_reader) = tokio::io::duplex(DUPLEX_BUF);
                let blobs = self.blobs.clone();
                let account = self.account.clone();
                let upload_type = meta.content_type.clone();
                let handle = tokio::spawn(async move {
                    blobs
                        .upload(&account, &upload_type, Box::pin(upload_reader))
                        .await
                });

                let mut sink = PartSink::Decode {
                    decoder,
                    writer,
                    preview: Vec::new(),
                    capture: is_text,
                };
                let scanned = self.scan_content(boundaries, &mut sink).await;
                let finished = match &scanned {
                    Ok(_) => sink.finish().await,
                    Err(_) => Ok(()),
                };
                let preview = sink.take_preview();
                drop(sink);

                // Whatever happened, learn the upload's fate first: a
                // blob that made it out must be tracked for compensation.
                let upload = handle.await.map_err(|e| {
                    MimeError::Io(std::io::Error::new(std::io::ErrorKind::Other, e))
                })?;
                if let Ok(up) = &upload {
                    self.uploaded.push(up.blob_id.clone());
                }
                let (end, content_end) = scanned?;
                finished?;
                let up = upload?;
                (up.blob_id, up.size, preview, end, content_end)
            }
        };

        if is_text && !preview.is_empty() {
            self.previews
                .insert(part_id.clone(), (preview, meta.charset.clone()));
        }

        let part = BodyPart {
            part_id: Some(part_id),
            content_type: meta.content_type,
            size,
            charset: meta.charset,
            disposition: meta.disposition,
            name: meta.name,
            blob_id,
            cid: meta.cid,
            language: meta.language,
            location: meta.location,
            sub_parts: Vec::new(),
        };
        Ok(PartOutcome {
            part,
            end,
            content_end,
        })
    }

    fn build_preview(&self, classified: &Classified) -> String {
        for (ids, strip_html) in [(&classified.text_body, false), (&classified.html_body, true)] {
            if let Some((bytes, charset)) = ids.first().and_then(|id| self.previews.get(id)) {
                let (text, _) = decode_text(&trim_partial_utf8(bytes, charset), charset);
                let text = if strip_html { html_to_text(&text) } else { text };
                return extract_preview(&text, PREVIEW_LENGTH);
            }
        }
        String::new()
    }
}

/// The captured prefix may cut a multi-byte sequence; for UTF-8 charsets
/// drop the dangling tail instead of poisoning the whole decode.
fn trim_partial_utf8<'a>(bytes: &'a [u8], charset: &str) -> std::borrow::Cow<'a, [u8]> {
    if !matches!(normalize_charset(charset).as_str(), "utf-8" | "us-ascii") {
        return bytes.into();
    }
    match std::str::from_utf8(bytes) {
        Err(e) if e.error_len().is_none() => bytes[..e.valid_up_to()].to_vec().into(),
        _ => bytes.into(),
    }
}

// ---- per-part metadata ----

struct PartMeta {
    content_type: String,
    charset: String,
    boundary: Option<Vec<u8>>,
    encoding: String,
    disposition: String,
    name: String,
    cid: Option<String>,
    language: Vec<String>,
    location: Option<String>,
}

impl PartMeta {
    fn from_headers(headers: &[RawHeader], in_digest: bool) -> Self {
        let ct = last_header(headers, "Content-Type").map(|h| parse_mime_value(&h.value));
        let (content_type, charset, boundary, ct_name) = match ct {
            Some(v) if v.token.contains('/') => {
                let charset = v.param("charset").map(normalize_charset);
                let boundary = v.param("boundary").map(|b| b.as_bytes().to_vec());
                let name = v.param("name").map(str::to_string);
                (v.token, charset, boundary, name)
            }
            // Missing or malformed: RFC defaults.
            _ if in_digest => ("message/rfc822".to_string(), None, None, None),
            _ => ("text/plain".to_string(), None, None, None),
        };
        let charset = if content_type.starts_with("text/") {
            charset.unwrap_or_else(|| "us-ascii".to_string())
        } else {
            charset.unwrap_or_default()
        };

        let disposition_value =
            last_header(headers, "Content-Disposition").map(|h| parse_mime_value(&h.value));
        let (disposition, filename) = match &disposition_value {
            Some(v) => (
                v.token.clone(),
                v.param("filename").map(str::to_string),
            ),
            None => (String::new(), None),
        };

        let encoding = last_header(headers, "Content-Transfer-Encoding")
            .map(|h| unfolded_str(&h.value).trim().to_ascii_lowercase())
            .unwrap_or_default();

        let cid = last_header(headers, "Content-ID").map(|h| {
            unfolded_str(&h.value)
                .trim()
                .trim_start_matches('<')
                .trim_end_matches('>')
                .to_string()
        });
        let language = last_header(headers, "Content-Language")
            .map(|h| {
                unfolded_str(&h.value)
                    .split(',')
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let location =
            last_header(headers, "Content-Location").map(|h| unfolded_str(&h.value).trim().to_string());

        Self {
            content_type,
            charset,
            boundary,
            encoding,
            disposition,
            name: filename.or(ct_name).unwrap_or_default(),
            cid,
            language,
            location,
        }
    }
}

// ---- sinks ----

enum PartSink {
    Discard,
    Raw {
        preview: Vec<u8>,
        capture: bool,
    },
    Decode {
        decoder: Box<dyn TransferDecoder>,
        writer: tokio::io::DuplexStream,
        preview: Vec<u8>,
        capture: bool,
    },
}

impl PartSink {
    async fn write(&mut self, bytes: &[u8]) -> Result<(), MimeError> {
        if bytes.is_empty() {
            return Ok(());
        }
        match self {
            PartSink::Discard => Ok(()),
            PartSink::Raw { preview, capture } => {
                if *capture {
                    push_prefix(preview, bytes);
                }
                Ok(())
            }
            PartSink::Decode {
                decoder,
                writer,
                preview,
                capture,
            } => {
                let mut decoded = Vec::with_capacity(bytes.len());
                decoder
                    .decode(bytes, &mut decoded)
                    .map_err(|e| MimeError::InvalidEmail(e.to_string()))?;
                if *capture {
                    push_prefix(preview, &decoded);
                }
                writer.write_all(&decoded).await?;
                Ok(())
            }
        }
    }

    async fn finish(&mut self) -> Result<(), MimeError> {
        if let PartSink::Decode {
            decoder,
            writer,
            preview,
            capture,
        } = self
        {
            let mut decoded = Vec::new();
            decoder
                .finish(&mut decoded)
                .map_err(|e| MimeError::InvalidEmail(e.to_string()))?;
            if *capture {
                push_prefix(preview, &decoded);
            }
            writer.write_all(&decoded).await?;
            writer.shutdown().await.ok();
        }
        Ok(())
    }

    fn take_preview(&mut self) -> Vec<u8> {
        match self {
            PartSink::Raw { preview, .. } | PartSink::Decode { preview, .. } => {
                std::mem::take(preview)
            }
            PartSink::Discard => Vec::new(),
        }
    }
}

fn push_prefix(preview: &mut Vec<u8>, bytes: &[u8]) {
    let room = PREVIEW_CAPTURE.saturating_sub(preview.len());
    preview.extend_from_slice(&bytes[..bytes.len().min(room)]);
}

// ---- helpers ----

fn is_blank_line(bytes: &[u8]) -> bool {
    bytes == b"\r\n" || bytes == b"\n"
}

fn split_terminator(bytes: &[u8], ends_line: bool) -> (&[u8], &[u8]) {
    if !ends_line {
        return (bytes, b"");
    }
    if bytes.ends_with(b"\r\n") {
        bytes.split_at(bytes.len() - 2)
    } else {
        bytes.split_at(bytes.len() - 1)
    }
}

/// Check a line against the boundary stack, innermost first. Transport
/// padding after the delimiter is tolerated.
fn match_boundary(line: &[u8], boundaries: &[Vec<u8>]) -> Option<(usize, bool)> {
    let mut end = line.len();
    while end > 0 && line[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    let rest = line[..end].strip_prefix(b"--")?;
    for (level, boundary) in boundaries.iter().enumerate().rev() {
        if let Some(tail) = rest.strip_prefix(boundary.as_slice()) {
            if tail.is_empty() {
                return Some((level, false));
            }
            if tail == b"--" {
                return Some((level, true));
            }
        }
    }
    None
}

fn address_field(headers: &[RawHeader], name: &str) -> Vec<EmailAddress> {
    last_header(headers, name)
        .map(|h| {
            flatten(&parse_address_list(&h.value))
                .into_iter()
                .filter(|mb| mb.address.is_some() || mb.name.is_some())
                .map(|mb| EmailAddress {
                    name: mb.name.unwrap_or_default(),
                    email: mb.address.unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

fn id_field(headers: &[RawHeader], name: &str) -> Vec<String> {
    last_header(headers, name)
        .map(|h| parse_msg_ids(&h.value))
        .unwrap_or_default()
}
