//! RFC 5322 header parsing: folding, encoded-words (RFC 2047), addresses and dates.

use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::warn;

use crate::error::{MboxError, Result};
use crate::model::address::EmailAddress;
use crate::model::mail::ParsedHeaders;
use crate::parser::mime::{self, BASE64_LENIENT};
use crate::threading::resolver::normalize_id;

/// Build [`ParsedHeaders`] from the raw bytes of one MBOX record.
///
/// Never fails: a record without a header/body separator is logged and
/// returned with empty fields, and unparseable dates become `None`.
/// `offset` is the record's start offset, used for the surrogate message id.
pub fn parse_message(raw: &[u8], offset: u64) -> ParsedHeaders {
    let start = mime::skip_from_line(raw);
    let header_end = match split_header_block(raw, start, offset) {
        Ok((header_end, _body_start)) => header_end,
        Err(e) => {
            warn!(offset = offset, error = %e, "Indexing record with empty headers");
            return ParsedHeaders {
                message_id: surrogate_message_id(offset),
                ..Default::default()
            };
        }
    };

    let text = decode_header_bytes(&raw[start..header_end]);
    let headers = unfold_headers(&text);
    let mut parsed = headers_to_fields(&headers, offset);
    parsed.has_attachment = mime::walk_parts(raw).iter().any(mime::MimePart::is_attachment);
    parsed
}

/// Extract the indexed fields from an unfolded header list.
fn headers_to_fields(headers: &[(String, String)], offset: u64) -> ParsedHeaders {
    let date = get_header(headers, "date").and_then(|d| parse_date(&d));

    let from = get_header(headers, "from")
        .map(|v| parse_address_list(&v))
        .and_then(|list| list.into_iter().next())
        .unwrap_or_default();

    let to = parse_address_list(&get_header(headers, "to").unwrap_or_default());
    let cc = parse_address_list(&get_header(headers, "cc").unwrap_or_default());
    let bcc = parse_address_list(&get_header(headers, "bcc").unwrap_or_default());

    let subject = decode_encoded_words(&get_header(headers, "subject").unwrap_or_default());

    let message_id = get_header(headers, "message-id")
        .map(|s| extract_angle_bracket(&s))
        .filter(|s| !normalize_id(s).is_empty())
        .unwrap_or_else(|| surrogate_message_id(offset));

    let in_reply_to = get_header(headers, "in-reply-to")
        .map(|s| extract_angle_bracket(&s))
        .filter(|s| !s.is_empty());

    let references_raw = get_header(headers, "references").unwrap_or_default();
    let references = extract_all_angle_brackets(&references_raw);

    ParsedHeaders {
        message_id,
        from,
        to,
        cc,
        bcc,
        subject,
        date,
        in_reply_to,
        references,
        has_attachment: false,
    }
}

/// Deterministic stand-in for a missing `Message-ID`, derived from the
/// record's start offset so rebuilds of the same archive agree.
pub fn surrogate_message_id(offset: u64) -> String {
    format!("<surrogate.{offset:016x}@mboxquery.invalid>")
}

/// Find the blank line ending the header block that starts at `start`.
///
/// Returns `(header_end, body_start)`: `header_end` is the start of the blank
/// line and `body_start` the first byte after it.
pub fn split_header_block(raw: &[u8], start: usize, offset: u64) -> Result<(usize, usize)> {
    find_header_end(raw, start, raw.len()).ok_or_else(|| MboxError::MalformedRecord {
        offset,
        reason: "no blank line between headers and body".into(),
    })
}

/// Scan `data[start..end]` line by line for the first empty line (`\n` or `\r\n`).
pub(crate) fn find_header_end(data: &[u8], start: usize, end: usize) -> Option<(usize, usize)> {
    let mut pos = start;
    while pos < end {
        let line_end = match data[pos..end].iter().position(|&b| b == b'\n') {
            Some(i) => pos + i + 1,
            None => return None,
        };
        let line = &data[pos..line_end];
        if line == b"\n" || line == b"\r\n" {
            return Some((pos, line_end));
        }
        pos = line_end;
    }
    None
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub(crate) fn decode_header_bytes(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Unfold headers: join continuation lines (starting with space or tab) with the previous header.
///
/// Returns a list of `(lowercase_name, raw_value)` pairs.
pub(crate) fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_lowercase();
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name, value));
        }
        // Lines without a colon and not a continuation are silently skipped
    }

    result
}

/// Get the first value for a header name (case-insensitive).
pub(crate) fn get_header(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
}

/// Parse an address header, decoding encoded-words in display names only
/// after the list has been split.
pub fn parse_address_list(raw: &str) -> Vec<EmailAddress> {
    EmailAddress::parse_list(raw)
        .into_iter()
        .map(|mut addr| {
            if addr.display_name.contains("=?") {
                addr.display_name = decode_encoded_words(&addr.display_name);
            }
            addr
        })
        .collect()
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// If decoding fails for any token, the original text is preserved.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two encoded words is dropped (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];

        if let Some(decoded) = try_decode_one_word(after_start) {
            result.push_str(&decoded.text);
            remaining = &remaining[start + 2 + decoded.consumed..];
            last_was_encoded = true;
        } else {
            result.push_str("=?");
            remaining = after_start;
            last_was_encoded = false;
        }
    }

    result.push_str(remaining);
    result
}

struct DecodedWord {
    text: String,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

fn try_decode_one_word(s: &str) -> Option<DecodedWord> {
    // Format: charset?encoding?encoded_text?=
    let first_q = s.find('?')?;
    let charset = &s[..first_q];

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];

    if charset.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }

    let total_consumed = first_q + 1 + second_q + 1 + end + 2;

    let bytes = match encoding {
        "B" | "b" => BASE64_LENIENT.decode(encoded_text.trim()).ok()?,
        "Q" | "q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    // RFC 2231 language suffix: "UTF-8*en"
    let charset = charset.split('*').next().unwrap_or(charset);

    Some(DecodedWord {
        text: decode_charset(charset, &bytes),
        consumed: total_consumed,
    })
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                match hex_pair(bytes[i + 1], bytes[i + 2]) {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Decode two ASCII hex digits into a byte.
pub(crate) fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some((hi * 16 + lo) as u8)
}

/// Decode bytes using a named charset.
pub(crate) fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    let charset_lower = charset.trim().to_lowercase();
    match charset_lower.as_str() {
        "utf-8" | "utf8" | "us-ascii" | "ascii" => String::from_utf8_lossy(bytes).into_owned(),
        _ => {
            if let Some(encoding) = encoding_rs::Encoding::for_label(charset_lower.as_bytes()) {
                let (decoded, _, _) = encoding.decode(bytes);
                decoded.into_owned()
            } else {
                warn!(
                    charset = charset,
                    "Unknown charset, falling back to UTF-8 lossy"
                );
                String::from_utf8_lossy(bytes).into_owned()
            }
        }
    }
}

/// Extract content between `<` and `>` (for Message-ID, In-Reply-To).
fn extract_angle_bracket(s: &str) -> String {
    let trimmed = s.trim();
    if let Some(start) = trimmed.find('<') {
        if let Some(end) = trimmed[start..].find('>') {
            return trimmed[start..start + end + 1].to_string();
        }
    }
    trimmed.to_string()
}

/// Extract all `<…>` tokens from a string (for References header).
fn extract_all_angle_brackets(s: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut remaining = s;
    while let Some(start) = remaining.find('<') {
        if let Some(end) = remaining[start..].find('>') {
            result.push(remaining[start..start + end + 1].to_string());
            remaining = &remaining[start + end + 1..];
        } else {
            break;
        }
    }
    result
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, and many broken real-world variants.
/// Dates without a zone are read as UTC.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    // Drop trailing comments such as "(PST)" or "(UTC)"
    let without_comment = match date_str.find('(') {
        Some(pos) => &date_str[..pos],
        None => date_str,
    };
    let trimmed = without_comment.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Remove leading day-of-week: "Thu, " or "Thu "
    let no_dow = strip_day_of_week(trimmed);

    // IMAP-style: "16-JUL-2025 03:01:03" → normalize to "16 Jul 2025 03:01:03"
    let no_dow_normalized = normalize_imap_date(&no_dow);

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M %z",
        "%d %b %Y %H:%M:%S",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
    ];

    for candidate in [&no_dow, &no_dow_normalized] {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    // Replace named timezones with offsets and try again
    for candidate in [&no_dow, &no_dow_normalized] {
        let replaced = replace_named_tz(candidate);
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(&replaced, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
        }
    }

    if let Some(dt) = mail_parser_date(trimmed) {
        return Some(dt);
    }

    warn!(date = trimmed, "Could not parse date");
    None
}

/// Attempt to parse a date using `mail-parser`'s built-in parser.
fn mail_parser_date(input: &str) -> Option<DateTime<Utc>> {
    use mail_parser::MessageParser;

    // Wrap input in a minimal RFC 5322 message so mail-parser can parse it
    let fake_msg = format!("Date: {input}\n\n");
    let parsed = MessageParser::default().parse(fake_msg.as_bytes())?;
    let dt = parsed.date()?;
    if !dt.is_valid() {
        return None;
    }
    DateTime::parse_from_rfc3339(&dt.to_rfc3339())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Normalize IMAP-style dates: `"16-JUL-2025 03:01:03"` → `"16 Jul 2025 03:01:03"`.
fn normalize_imap_date(s: &str) -> String {
    if !s.contains('-') {
        return s.to_string();
    }

    let months = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];

    for month in &months {
        for variant in [month.to_uppercase(), month.to_lowercase(), month.to_string()] {
            let pattern = format!("-{variant}-");
            if s.contains(&pattern) {
                return s.replacen(&pattern, &format!(" {month} "), 1);
            }
        }
    }

    s.to_string()
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    let days = [
        "Mon,", "Tue,", "Wed,", "Thu,", "Fri,", "Sat,", "Sun,", "Mon ", "Tue ", "Wed ", "Thu ",
        "Fri ", "Sat ", "Sun ",
    ];
    for day in &days {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim().to_string();
        }
    }
    s.to_string()
}

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    let tzs = [
        ("CEST", "+0200"),
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("UT", "+0000"),
        ("CET", "+0100"),
        ("JST", "+0900"),
    ];
    let mut result = s.to_string();
    for (name, offset) in &tzs {
        if result.ends_with(name) {
            let pos = result.len() - name.len();
            result.replace_range(pos.., offset);
            return result;
        }
    }
    result
}
