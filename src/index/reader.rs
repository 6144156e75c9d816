//! Summary statistics over a loaded index.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::model::mail::IndexEntry;

/// Return the date range (oldest, newest) across entries with a known date.
pub fn date_range(entries: &[IndexEntry]) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let mut dates = entries.iter().filter_map(|e| e.date);
    let first = dates.next()?;
    Some(dates.fold((first, first), |(min, max), d| (min.min(d), max.max(d))))
}

/// Count how many entries have attachments.
pub fn count_with_attachments(entries: &[IndexEntry]) -> usize {
    entries.iter().filter(|e| e.has_attachment).count()
}

/// Count entries whose date could not be parsed.
pub fn count_undated(entries: &[IndexEntry]) -> usize {
    entries.iter().filter(|e| e.date.is_none()).count()
}

/// Number of distinct threads.
pub fn thread_count(entries: &[IndexEntry]) -> usize {
    entries
        .iter()
        .map(|e| e.thread_id.as_str())
        .collect::<HashSet<_>>()
        .len()
}

/// Return the top N senders by message count.
///
/// Ties are broken alphabetically so the output is stable.
pub fn top_senders(entries: &[IndexEntry], n: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for entry in entries {
        let key = if entry.from.display_name.is_empty() {
            entry.from.address.clone()
        } else {
            entry.from.display()
        };
        *counts.entry(key).or_default() += 1;
    }
    let mut sorted: Vec<(String, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted.truncate(n);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::address::EmailAddress;
    use crate::model::mail::ParsedHeaders;
    use chrono::TimeZone;

    fn make_entry(id: u64, sender: &str, day: Option<u32>, thread: &str, att: bool) -> IndexEntry {
        let headers = ParsedHeaders {
            from: EmailAddress::parse(sender),
            date: day.map(|d| Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()),
            has_attachment: att,
            ..Default::default()
        };
        IndexEntry::from_headers(id, 0, 0, headers, thread.into())
    }

    #[test]
    fn test_stats() {
        let entries = vec![
            make_entry(1, "alice@x.com", Some(5), "t1", false),
            make_entry(2, "bob@x.com", None, "t1", true),
            make_entry(3, "alice@x.com", Some(2), "t2", false),
        ];
        let (oldest, newest) = date_range(&entries).unwrap();
        assert_eq!(oldest.format("%d").to_string(), "02");
        assert_eq!(newest.format("%d").to_string(), "05");
        assert_eq!(count_with_attachments(&entries), 1);
        assert_eq!(count_undated(&entries), 1);
        assert_eq!(thread_count(&entries), 2);
        assert_eq!(top_senders(&entries, 1), vec![("alice@x.com".to_string(), 2)]);
    }

    #[test]
    fn test_date_range_without_dates() {
        let entries = vec![make_entry(1, "a@x", None, "t", false)];
        assert!(date_range(&entries).is_none());
        assert!(date_range(&[]).is_none());
    }
}
