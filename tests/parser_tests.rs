//! Integration tests for the MBOX scanner and header decoding.

use std::path::{Path, PathBuf};

use mboxquery::model::mail::ParsedHeaders;
use mboxquery::parser::header::{self, decode_encoded_words, parse_date};
use mboxquery::parser::mbox::MboxParser;
use mboxquery::parser::mime;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn parse_all(name: &str) -> Vec<ParsedHeaders> {
    let parser = MboxParser::new(fixture(name)).unwrap();
    parser
        .scan()
        .unwrap()
        .map(|m| {
            let m = m.unwrap();
            header::parse_message(&m.raw, m.record.start_offset)
        })
        .collect()
}

// ─── Record boundaries ──────────────────────────────────────────────

#[test]
fn test_scan_simple_mbox_count() {
    let parser = MboxParser::new(fixture("simple.mbox")).unwrap();
    let count = parser.scan().unwrap().count();
    assert_eq!(count, 5, "simple.mbox should contain exactly 5 messages");
}

#[test]
fn test_records_tile_the_archive() {
    let path = fixture("simple.mbox");
    let data = std::fs::read(&path).unwrap();
    let parser = MboxParser::new(&path).unwrap();

    let mut expected_offset = 0u64;
    for scanned in parser.scan().unwrap() {
        let scanned = scanned.unwrap();
        assert_eq!(scanned.record.start_offset, expected_offset);
        assert!(scanned.raw.starts_with(b"From "));
        assert_eq!(scanned.raw.len() as u64, scanned.record.length);
        let start = scanned.record.start_offset as usize;
        assert_eq!(
            &data[start..start + scanned.raw.len()],
            scanned.raw.as_slice()
        );
        expected_offset += scanned.record.length;
    }
    assert_eq!(expected_offset, data.len() as u64);
}

#[test]
fn test_read_message_at_matches_scan() {
    let path = fixture("threads.mbox");
    let parser = MboxParser::new(&path).unwrap();
    let third = parser.scan().unwrap().nth(2).unwrap().unwrap();

    let raw = MboxParser::read_message_at(&path, third.record.start_offset, third.record.length)
        .unwrap();
    assert_eq!(raw, third.raw);
}

#[test]
fn test_scan_empty_mbox() {
    let parser = MboxParser::new(fixture("empty.mbox")).unwrap();
    assert_eq!(parser.scan().unwrap().count(), 0);
}

// ─── Header fields ──────────────────────────────────────────────────

#[test]
fn test_first_message_fields() {
    let parsed = parse_all("simple.mbox");
    let first = &parsed[0];
    assert_eq!(first.subject, "Hello World");
    assert_eq!(first.from.address, "user1@example.com");
    assert_eq!(first.from.display_name, "User One");
    assert_eq!(first.message_id, "<msg001@example.com>");
    assert_eq!(first.to.len(), 1);
    assert_eq!(first.to[0].address, "user2@example.com");
}

#[test]
fn test_recipient_lists() {
    let parsed = parse_all("simple.mbox");
    let fifth = &parsed[4];
    let to: Vec<&str> = fifth.to.iter().map(|a| a.address.as_str()).collect();
    assert_eq!(to, vec!["user1@example.com", "user2@example.com"]);
    assert_eq!(fifth.cc.len(), 1);
    assert_eq!(fifth.cc[0].address, "boss@example.com");
    assert!(fifth.bcc.is_empty());
}

#[test]
fn test_encoded_words_in_from_and_subject() {
    let parsed = parse_all("simple.mbox");
    let third = &parsed[2];
    assert_eq!(third.from.display_name, "José García");
    assert_eq!(third.subject, "Café con leña");
}

#[test]
fn test_charset_decoding() {
    let parsed = parse_all("encoded_words.mbox");
    assert_eq!(parsed.len(), 3);

    assert_eq!(parsed[0].from.display_name, "François Dupont");
    assert_eq!(parsed[0].subject, "Résumé du projet");

    assert_eq!(parsed[1].from.display_name, "山田太郎");
    assert_eq!(parsed[1].subject, "お知らせ");

    // Raw 8-bit header bytes that are not UTF-8
    assert_eq!(parsed[2].from.display_name, "Jürgen Müller");
    assert_eq!(parsed[2].subject, "Preis 100 €");
}

#[test]
fn test_threading_headers() {
    let parsed = parse_all("simple.mbox");
    let second = &parsed[1];
    assert_eq!(second.subject, "Re: Hello World");
    assert_eq!(second.in_reply_to.as_deref(), Some("<msg001@example.com>"));
    assert_eq!(second.references, vec!["<msg001@example.com>".to_string()]);

    let threads = parse_all("threads.mbox");
    assert_eq!(
        threads[2].references,
        vec!["<m1@example.com>".to_string(), "<m2@example.com>".to_string()]
    );
    assert!(threads[2].in_reply_to.is_none());
}

#[test]
fn test_missing_date_is_none() {
    let parsed = parse_all("dates.mbox");
    assert!(parsed[0].date.is_some());
    assert!(parsed[2].date.is_none());
}

#[test]
fn test_attachment_flag() {
    let parsed = parse_all("attachments.mbox");
    let flags: Vec<bool> = parsed.iter().map(|p| p.has_attachment).collect();
    assert_eq!(flags, vec![true, true, false]);
}

// ─── Bodies ─────────────────────────────────────────────────────────

#[test]
fn test_from_escaping_in_body() {
    let path = fixture("simple.mbox");
    let fourth = MboxParser::new(&path)
        .unwrap()
        .scan()
        .unwrap()
        .nth(3)
        .unwrap()
        .unwrap();
    let text = mime::extract_body_text(&fourth.raw);
    assert!(
        text.contains("\nFrom the perspective"),
        "Body should contain the unescaped From line, got: '{text}'"
    );
    assert!(!text.contains(">From"));
}

#[test]
fn test_body_in_eight_bit_utf8() {
    let third = MboxParser::new(fixture("simple.mbox"))
        .unwrap()
        .scan()
        .unwrap()
        .nth(2)
        .unwrap()
        .unwrap();
    let text = mime::extract_body_text(&third.raw);
    assert!(text.contains("áéíóú"), "got: '{text}'");
}

// ─── Dates ──────────────────────────────────────────────────────────

#[test]
fn test_date_parsing_formats() {
    assert!(parse_date("Thu, 04 Jan 2024 10:00:00 +0000").is_some());
    assert!(parse_date("04 Jan 2024 10:00:00 +0000").is_some());
    assert!(parse_date("Thu, 04 Jan 2024 10:00:00 EST").is_some());
    assert!(parse_date("2024-01-04T10:00:00Z").is_some());
}

#[test]
fn test_date_offsets_normalize_to_utc() {
    let d = parse_date("Fri, 05 Jan 2024 09:30:00 -0500").unwrap();
    assert_eq!(d.to_rfc3339(), "2024-01-05T14:30:00+00:00");
}

// ─── Encoded-words ──────────────────────────────────────────────────

#[test]
fn test_decode_encoded_words_base64_utf8() {
    assert_eq!(
        decode_encoded_words("=?UTF-8?B?SG9sYSBtdW5kbw==?="),
        "Hola mundo"
    );
}

#[test]
fn test_decode_encoded_words_q_iso8859() {
    assert_eq!(decode_encoded_words("=?ISO-8859-1?Q?caf=E9?="), "café");
}

#[test]
fn test_decode_encoded_words_plain_passthrough() {
    assert_eq!(decode_encoded_words("Normal subject"), "Normal subject");
}
