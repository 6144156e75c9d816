//! Fast in-memory filtering over the message index.
//!
//! Complexity: O(n) where n = number of messages. No archive access.

use crate::model::mail::IndexEntry;

use super::filter::FilterConfig;

/// Lowercased needles, computed once per query.
struct Needles {
    from: Option<String>,
    to: Option<String>,
    subject: Option<String>,
}

impl Needles {
    fn new(filter: &FilterConfig) -> Self {
        let lower = |s: &Option<String>| s.as_ref().map(|v| v.to_lowercase());
        Self {
            from: lower(&filter.from),
            to: lower(&filter.to),
            subject: lower(&filter.subject),
        }
    }
}

/// Filter the index and return matching entry indices, in index order.
///
/// Applies the attachment and date filters first (cheapest), then text.
pub fn search_metadata(entries: &[IndexEntry], filter: &FilterConfig) -> Vec<usize> {
    let needles = Needles::new(filter);
    entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry_matches(entry, filter, &needles))
        .map(|(i, _)| i)
        .collect()
}

/// Check whether a single entry passes every index-level filter.
fn entry_matches(entry: &IndexEntry, filter: &FilterConfig, needles: &Needles) -> bool {
    if let Some(want_att) = filter.has_attachment {
        if entry.has_attachment != want_att {
            return false;
        }
    }

    if filter.has_date_bounds() && !matches_date(entry, filter) {
        return false;
    }

    if let Some(ref needle) = needles.from {
        if !entry.from.matches(needle) {
            return false;
        }
    }

    if let Some(ref needle) = needles.to {
        if !entry.recipients().any(|a| a.matches(needle)) {
            return false;
        }
    }

    if let Some(ref needle) = needles.subject {
        if !entry.subject.to_lowercase().contains(needle.as_str()) {
            return false;
        }
    }

    true
}

/// `date_after` is inclusive, `date_before` exclusive. An unknown date never
/// satisfies a bound.
fn matches_date(entry: &IndexEntry, filter: &FilterConfig) -> bool {
    let Some(date) = entry.date else {
        return false;
    };
    if let Some(after) = filter.date_after {
        if date < after {
            return false;
        }
    }
    if let Some(before) = filter.date_before {
        if date >= before {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::address::EmailAddress;
    use crate::model::mail::ParsedHeaders;
    use chrono::{DateTime, TimeZone, Utc};

    fn day(s: &str) -> DateTime<Utc> {
        let d = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        Utc.from_utc_datetime(&d.and_hms_opt(0, 0, 0).unwrap())
    }

    fn make_entry(id: u64, from: &str, subject: &str, date: Option<&str>) -> IndexEntry {
        let headers = ParsedHeaders {
            from: EmailAddress::parse(from),
            to: EmailAddress::parse_list("Recipient <recipient@example.com>"),
            cc: EmailAddress::parse_list("Zoë Copy <copy@example.org>"),
            subject: subject.to_string(),
            date: date.map(|d| day(d) + chrono::Duration::hours(10)),
            message_id: format!("<msg-{id}@example.com>"),
            ..Default::default()
        };
        IndexEntry::from_headers(id, 0, 1000, headers, String::new())
    }

    #[test]
    fn test_subject_search_is_case_insensitive() {
        let entries = vec![
            make_entry(1, "alice@example.com", "Budget Report", Some("2024-01-15")),
            make_entry(2, "bob@example.com", "Meeting Notes", Some("2024-02-10")),
            make_entry(3, "alice@example.com", "Re: BUDGET report", Some("2024-01-20")),
        ];
        let filter = FilterConfig {
            subject: Some("budget".into()),
            ..Default::default()
        };
        assert_eq!(search_metadata(&entries, &filter), vec![0, 2]);
    }

    #[test]
    fn test_from_matches_display_name_or_address() {
        let entries = vec![
            make_entry(1, "Alice Smith <alice@example.com>", "Hello", None),
            make_entry(2, "bob@example.com", "World", None),
        ];
        let by_name = FilterConfig {
            from: Some("SMITH".into()),
            ..Default::default()
        };
        assert_eq!(search_metadata(&entries, &by_name), vec![0]);
        let by_addr = FilterConfig {
            from: Some("bob@".into()),
            ..Default::default()
        };
        assert_eq!(search_metadata(&entries, &by_addr), vec![1]);
    }

    #[test]
    fn test_to_covers_cc() {
        let entries = vec![make_entry(1, "a@x.com", "s", None)];
        let filter = FilterConfig {
            to: Some("zoë".into()),
            ..Default::default()
        };
        assert_eq!(search_metadata(&entries, &filter), vec![0]);
        let filter = FilterConfig {
            to: Some("nobody".into()),
            ..Default::default()
        };
        assert!(search_metadata(&entries, &filter).is_empty());
    }

    #[test]
    fn test_date_bounds_inclusive_exclusive() {
        let entries = vec![
            make_entry(1, "a@x.com", "Jan", Some("2023-01-01")),
            make_entry(2, "b@x.com", "Jun", Some("2023-06-01")),
            make_entry(3, "c@x.com", "Undated", None),
        ];

        let after = FilterConfig {
            date_after: Some(day("2023-02-01")),
            ..Default::default()
        };
        assert_eq!(search_metadata(&entries, &after), vec![1]);

        // Exactly on the lower bound is included
        let on_bound = FilterConfig {
            date_after: Some(day("2023-06-01") + chrono::Duration::hours(10)),
            ..Default::default()
        };
        assert_eq!(search_metadata(&entries, &on_bound), vec![1]);

        // Exactly on the upper bound is excluded
        let before = FilterConfig {
            date_before: Some(day("2023-06-01") + chrono::Duration::hours(10)),
            ..Default::default()
        };
        assert_eq!(search_metadata(&entries, &before), vec![0]);
    }

    #[test]
    fn test_no_filters_match_everything() {
        let entries = vec![
            make_entry(1, "a@x.com", "one", None),
            make_entry(2, "b@x.com", "two", Some("2024-01-01")),
        ];
        assert_eq!(
            search_metadata(&entries, &FilterConfig::default()),
            vec![0, 1]
        );
    }

    #[test]
    fn test_has_attachment_filter() {
        let mut entries = vec![
            make_entry(1, "a@x.com", "No att", None),
            make_entry(2, "b@x.com", "Has att", None),
        ];
        entries[1].has_attachment = true;

        let with = FilterConfig {
            has_attachment: Some(true),
            ..Default::default()
        };
        assert_eq!(search_metadata(&entries, &with), vec![1]);
        let without = FilterConfig {
            has_attachment: Some(false),
            ..Default::default()
        };
        assert_eq!(search_metadata(&entries, &without), vec![0]);
    }
}
