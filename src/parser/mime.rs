//! MIME message parsing: body extraction, attachment listing, HTML-to-text conversion.
//!
//! Bodies and attachments go through the same `mail-parser` parse tree. Each
//! leaf keeps the byte range of its still-encoded content, so listing reports
//! encoded sizes and extraction can verify base64 against the raw bytes.

use std::borrow::Cow;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};

use crate::error::{MboxError, Result};
use crate::model::attachment::{Attachment, ExtractedAttachment};
use crate::parser::header::{decode_encoded_words, find_header_end};

/// Base64 engine that tolerates missing padding and stray trailing bits,
/// both common in real mail.
pub(crate) const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A leaf MIME entity located inside a raw record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimePart {
    /// Lowercase `type/subtype`.
    pub content_type: String,
    /// Lowercase disposition type (`attachment`, `inline`), if declared.
    pub disposition: Option<String>,
    pub filename: Option<String>,
    /// Lowercase Content-Transfer-Encoding, `7bit` when absent.
    pub encoding: String,
    pub charset: Option<String>,
    /// Start of the encoded content, relative to the record start.
    pub body_start: usize,
    /// End (exclusive) of the encoded content.
    pub body_end: usize,
}

impl MimePart {
    /// An attachment is any part with `Content-Disposition: attachment`, or a
    /// non-text, non-multipart part that carries a filename.
    pub fn is_attachment(&self) -> bool {
        if self.disposition.as_deref() == Some("attachment") {
            return true;
        }
        let main_type = self.content_type.split('/').next().unwrap_or("");
        main_type != "text" && main_type != "multipart" && self.filename.is_some()
    }
}

/// Walk the MIME tree of a raw record and return its leaf parts in document order.
pub fn walk_parts(raw: &[u8]) -> Vec<MimePart> {
    let base = skip_from_line(raw);
    match MessageParser::default().parse(&raw[base..]) {
        Some(msg) => leaf_parts(&msg)
            .into_iter()
            .map(|part| describe(part, base))
            .collect(),
        None => Vec::new(),
    }
}

/// Non-multipart parts of a parsed message, in document order.
///
/// Nested `message/rfc822` parts are leaves; their insides are not listed.
fn leaf_parts<'a, 'x>(msg: &'a Message<'x>) -> Vec<&'a MessagePart<'x>> {
    let mut leaves = Vec::new();
    let mut seen = vec![false; msg.parts.len()];
    let mut stack = vec![0usize];

    while let Some(id) = stack.pop() {
        let Some(part) = msg.parts.get(id) else {
            continue;
        };
        if std::mem::replace(&mut seen[id], true) {
            continue;
        }
        match &part.body {
            PartType::Multipart(children) => stack.extend(children.iter().rev()),
            _ => leaves.push(part),
        }
    }
    leaves
}

fn describe(part: &MessagePart<'_>, base: usize) -> MimePart {
    let content_type = part
        .content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .map(|t| t.to_ascii_lowercase())
        .filter(|t| t.contains('/'))
        .unwrap_or_else(|| "text/plain".to_string());

    let disposition = part
        .content_disposition()
        .map(|cd| cd.ctype().trim().to_ascii_lowercase())
        .filter(|d| !d.is_empty());

    let filename = part
        .attachment_name()
        .map(decode_encoded_words)
        .filter(|name| !name.trim().is_empty());

    let encoding = part
        .content_transfer_encoding()
        .map(|e| e.trim().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| "7bit".to_string());

    let charset = part
        .content_type()
        .and_then(|ct| ct.attribute("charset"))
        .map(String::from);

    let body_start = base + part.offset_body;
    MimePart {
        content_type,
        disposition,
        filename,
        encoding,
        charset,
        body_start,
        body_end: (base + part.offset_end).max(body_start),
    }
}

fn to_attachment(ordinal: usize, part: MimePart) -> Attachment {
    let length = (part.body_end - part.body_start) as u64;
    Attachment {
        ordinal,
        filename: part
            .filename
            .unwrap_or_else(|| format!("attachment_{ordinal}")),
        is_inline: part.disposition.as_deref() == Some("inline"),
        size: length,
        content_offset: part.body_start as u64,
        content_length: length,
        content_type: part.content_type,
        encoding: part.encoding,
    }
}

/// List the attachments of a raw record, without writing anything.
pub fn list_attachments(raw: &[u8]) -> Vec<Attachment> {
    walk_parts(raw)
        .into_iter()
        .filter(MimePart::is_attachment)
        .enumerate()
        .map(|(idx, part)| to_attachment(idx + 1, part))
        .collect()
}

/// Decode the attachment with the given 1-based ordinal.
///
/// `id` is only used for the out-of-range error.
pub fn extract_attachment(raw: &[u8], id: u64, ordinal: usize) -> Result<ExtractedAttachment> {
    let base = skip_from_line(raw);
    let parsed = MessageParser::default().parse(&raw[base..]);
    let attachments: Vec<(MimePart, &MessagePart<'_>)> = parsed
        .as_ref()
        .map(|msg| {
            leaf_parts(msg)
                .into_iter()
                .map(|part| (describe(part, base), part))
                .filter(|(info, _)| info.is_attachment())
                .collect()
        })
        .unwrap_or_default();

    let count = attachments.len();
    let (info, part) = ordinal
        .checked_sub(1)
        .and_then(|i| attachments.into_iter().nth(i))
        .ok_or(MboxError::AttachmentOrdinalOutOfRange { id, ordinal, count })?;

    let encoded = raw
        .get(info.body_start..info.body_end)
        .ok_or_else(|| MboxError::AttachmentDecodeError {
            ordinal,
            reason: "content range lies outside the message".into(),
        })?;
    let bytes = decode_transfer(encoded, &info.encoding, ordinal, part.contents())?;

    let attachment = to_attachment(ordinal, info);
    Ok(ExtractedAttachment {
        filename: attachment.filename,
        mime_type: attachment.content_type,
        bytes,
    })
}

/// Content bytes for a part with the given Content-Transfer-Encoding.
///
/// `decoded` is the parser's own rendering of the content. Base64 is decoded
/// again from the raw `body`, so a corrupt payload is reported instead of
/// silently truncated.
pub fn decode_transfer(
    body: &[u8],
    encoding: &str,
    ordinal: usize,
    decoded: &[u8],
) -> Result<Vec<u8>> {
    match encoding {
        "base64" => {
            let cleaned: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            BASE64_LENIENT
                .decode(&cleaned)
                .map_err(|e| MboxError::AttachmentDecodeError {
                    ordinal,
                    reason: format!("invalid base64: {e}"),
                })
        }
        "quoted-printable" | "7bit" | "8bit" | "binary" => Ok(decoded.to_vec()),
        other => Err(MboxError::AttachmentDecodeError {
            ordinal,
            reason: format!("unsupported transfer encoding '{other}'"),
        }),
    }
}

/// Extract readable body text from a raw record.
///
/// Prefers the first `text/plain` part that is not an attachment, then the
/// first `text/html` part rendered as text, then everything after the blank line.
pub fn extract_body_text(raw: &[u8]) -> String {
    let unescaped = unescape_from_lines(raw);
    let message_bytes = &unescaped[skip_from_line(&unescaped)..];

    if let Some(msg) = MessageParser::default().parse(message_bytes) {
        if let Some(text) = msg.text_part(0).and_then(|part| match &part.body {
            PartType::Text(text) => Some(text.to_string()),
            _ => None,
        }) {
            return text;
        }
        if let Some(text) = msg.html_part(0).and_then(|part| match &part.body {
            PartType::Html(html) => Some(html_to_text(html, 80)),
            _ => None,
        }) {
            return text;
        }
    }

    extract_body_fallback(message_bytes)
}

/// Reverse mboxrd quoting: a body line `>From ` (any number of `>`) loses one `>`.
pub fn unescape_from_lines(data: &[u8]) -> Cow<'_, [u8]> {
    if !data.windows(6).any(|w| w == b">From ") {
        return Cow::Borrowed(data);
    }

    let mut out = Vec::with_capacity(data.len());
    for line in data.split_inclusive(|&b| b == b'\n') {
        let quotes = line.iter().take_while(|&&b| b == b'>').count();
        if quotes > 0 && line[quotes..].starts_with(b"From ") {
            out.extend_from_slice(&line[1..]);
        } else {
            out.extend_from_slice(line);
        }
    }
    Cow::Owned(out)
}

/// Byte offset just past the `From ` separator line (and a leading BOM).
pub(crate) fn skip_from_line(data: &[u8]) -> usize {
    let start = if data.starts_with(&[0xEF, 0xBB, 0xBF]) {
        3
    } else {
        0
    };

    if data[start..].starts_with(b"From ") {
        if let Some(pos) = data[start..].iter().position(|&b| b == b'\n') {
            return start + pos + 1;
        }
        return data.len();
    }
    start
}

/// Fallback body extraction when `mail-parser` cannot parse the message.
fn extract_body_fallback(data: &[u8]) -> String {
    match find_header_end(data, 0, data.len()) {
        Some((_, body_start)) => String::from_utf8_lossy(&data[body_start..]).into_owned(),
        None => String::new(),
    }
}

/// Convert HTML to plain text.
///
/// - Preserves line breaks from `<br>`, `<p>`, `<div>`
/// - Converts `<li>` to a new line
/// - Removes scripts and styles
/// - Decodes common HTML entities
pub fn html_to_text(html: &str, _width: usize) -> String {
    let mut text = html.to_string();

    text = remove_tag_block(&text, "script");
    text = remove_tag_block(&text, "style");

    for tag in &["br", "BR", "br/", "br /"] {
        text = text.replace(&format!("<{tag}>"), "\n");
    }
    for tag in &["p", "div", "tr", "li", "h1", "h2", "h3", "h4", "h5", "h6"] {
        text = text.replace(&format!("<{tag}>"), "\n");
        text = text.replace(&format!("<{tag} "), "\n<");
        let upper = tag.to_uppercase();
        text = text.replace(&format!("<{upper}>"), "\n");
        text = text.replace(&format!("</{tag}>"), "\n");
        text = text.replace(&format!("</{upper}>"), "\n");
    }

    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }

    result = result.replace("&lt;", "<");
    result = result.replace("&gt;", ">");
    result = result.replace("&quot;", "\"");
    result = result.replace("&#39;", "'");
    result = result.replace("&apos;", "'");
    result = result.replace("&nbsp;", " ");
    result = result.replace("&#160;", " ");
    result = result.replace("&amp;", "&");

    // Collapse runs of blank lines
    let mut prev_was_blank = false;
    let mut cleaned = String::with_capacity(result.len());
    for line in result.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !prev_was_blank {
                cleaned.push('\n');
                prev_was_blank = true;
            }
        } else {
            cleaned.push_str(trimmed);
            cleaned.push('\n');
            prev_was_blank = false;
        }
    }

    cleaned.trim().to_string()
}

/// Remove an entire tag block (e.g. `<script>…</script>`), case-insensitively.
fn remove_tag_block(html: &str, tag: &str) -> String {
    let mut result = String::with_capacity(html.len());
    let mut remaining = html;
    let open = format!("<{tag}");
    let close = format!("</{tag}>");

    // ASCII lowercasing keeps byte offsets aligned with the original
    while let Some(start) = remaining.to_ascii_lowercase().find(&open) {
        result.push_str(&remaining[..start]);
        let after = &remaining[start..];
        match after.to_ascii_lowercase().find(&close) {
            Some(end) => remaining = &after[end + close.len()..],
            None => {
                remaining = "";
                break;
            }
        }
    }
    result.push_str(remaining);
    result
}
