//! Query filters and parsing of date bounds given on the command line.

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde::Serialize;

use crate::error::{MboxError, Result};

/// Every filter the query engine understands. All set fields must match.
///
/// Text filters are case-insensitive substring tests over decoded values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterConfig {
    /// Sender display name or address.
    pub from: Option<String>,
    /// Any `To`, `Cc` or `Bcc` display name or address.
    pub to: Option<String>,
    pub subject: Option<String>,
    /// Decoded body text. Requires reading every candidate from the archive.
    pub body: Option<String>,
    /// Inclusive lower bound.
    pub date_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub date_before: Option<DateTime<Utc>>,
    pub has_attachment: Option<bool>,
    /// Maximum number of entries returned. `None` returns all.
    pub limit: Option<usize>,
    /// Only compute `total_count`.
    pub count_only: bool,
}

impl FilterConfig {
    /// Whether the body filter forces a second pass over the archive.
    pub fn needs_fulltext(&self) -> bool {
        self.body.is_some()
    }

    /// Whether any date bound is set.
    pub fn has_date_bounds(&self) -> bool {
        self.date_after.is_some() || self.date_before.is_some()
    }
}

/// Parse a date bound: `2024-01-15`, `2024-01`, `2024` (start of the period,
/// UTC midnight) or a full RFC 3339 timestamp.
pub fn parse_date_bound(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").ok())
        .or_else(|| {
            let year: i32 = value.parse().ok().filter(|_| value.len() == 4)?;
            NaiveDate::from_ymd_opt(year, 1, 1)
        })
        .ok_or_else(|| {
            MboxError::InvalidFilter(format!(
                "'{value}' is not a date (expected YYYY-MM-DD, YYYY-MM, YYYY or RFC 3339)"
            ))
        })?;

    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| MboxError::InvalidFilter(format!("'{value}' has no midnight")))?;
    Ok(Utc.from_utc_datetime(&midnight))
}
