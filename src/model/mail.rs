//! Parsed header sets and persisted index rows.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use super::address::EmailAddress;

/// Structured fields extracted from one message. Lives only during a build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedHeaders {
    /// The `Message-ID` header value, or a surrogate derived from the
    /// record offset when the header is missing.
    pub message_id: String,

    /// Sender (first `From:` header).
    pub from: EmailAddress,

    /// Primary recipients (`To:`).
    pub to: Vec<EmailAddress>,

    /// Carbon-copy recipients (`Cc:`).
    pub cc: Vec<EmailAddress>,

    /// Blind-copy recipients (`Bcc:`), rarely present outside sent mail.
    pub bcc: Vec<EmailAddress>,

    /// Decoded subject line (RFC 2047 encoded-words resolved).
    pub subject: String,

    /// Parsed `Date:` header. `None` when absent or unparseable.
    pub date: Option<DateTime<Utc>>,

    /// The `In-Reply-To` header value, if present.
    pub in_reply_to: Option<String>,

    /// Message-IDs from the `References` header, in header order.
    pub references: Vec<String>,

    /// Whether any MIME part is an attachment.
    pub has_attachment: bool,
}

/// Compact metadata for a single email message, stored in the binary index.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct IndexEntry {
    /// 1-based position of the message in scan order.
    pub id: u64,

    /// Byte offset of the message start inside the MBOX file
    /// (points to the `From ` separator line).
    pub offset: u64,

    /// Total byte length of the message (from `From ` to next separator or EOF).
    pub length: u64,

    /// Parsed date, `None` when unknown.
    pub date: Option<DateTime<Utc>>,

    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: String,
    pub message_id: String,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
    pub has_attachment: bool,

    /// Canonical id of the conversation this message belongs to.
    pub thread_id: String,
}

impl IndexEntry {
    /// Assemble an index row from parsed headers and scan position.
    pub fn from_headers(
        id: u64,
        offset: u64,
        length: u64,
        headers: ParsedHeaders,
        thread_id: String,
    ) -> Self {
        Self {
            id,
            offset,
            length,
            date: headers.date,
            from: headers.from,
            to: headers.to,
            cc: headers.cc,
            bcc: headers.bcc,
            subject: headers.subject,
            message_id: headers.message_id,
            in_reply_to: headers.in_reply_to,
            references: headers.references,
            has_attachment: headers.has_attachment,
            thread_id,
        }
    }

    /// All recipients: `To`, then `Cc`, then `Bcc`.
    pub fn recipients(&self) -> impl Iterator<Item = &EmailAddress> {
        self.to.iter().chain(self.cc.iter()).chain(self.bcc.iter())
    }
}

/// Order dates with unknown values after every known date.
pub fn cmp_dates(a: Option<&DateTime<Utc>>, b: Option<&DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Result ordering: newest first, unknown dates last, ties by ascending id.
pub fn cmp_newest_first(a: &IndexEntry, b: &IndexEntry) -> Ordering {
    let by_date = match (&a.date, &b.date) {
        (Some(da), Some(db)) => db.cmp(da),
        (x, y) => cmp_dates(x.as_ref(), y.as_ref()),
    };
    by_date.then(a.id.cmp(&b.id))
}

/// Conversation ordering: oldest first, unknown dates last, ties by ascending id.
pub fn cmp_oldest_first(a: &IndexEntry, b: &IndexEntry) -> Ordering {
    cmp_dates(a.date.as_ref(), b.date.as_ref()).then(a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(id: u64, date: Option<DateTime<Utc>>) -> IndexEntry {
        IndexEntry::from_headers(id, 0, 0, ParsedHeaders { date, ..Default::default() }, String::new())
    }

    #[test]
    fn test_newest_first_puts_unknown_last_and_breaks_ties_by_id() {
        let d1 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let d2 = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        let mut entries = vec![
            entry(1, None),
            entry(2, Some(d1)),
            entry(3, Some(d2)),
            entry(4, Some(d1)),
        ];
        entries.sort_by(cmp_newest_first);
        let ids: Vec<u64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
    }

    #[test]
    fn test_oldest_first_puts_unknown_last() {
        let d1 = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let mut entries = vec![entry(1, None), entry(2, Some(d1))];
        entries.sort_by(cmp_oldest_first);
        assert_eq!(entries[0].id, 2);
    }
}
