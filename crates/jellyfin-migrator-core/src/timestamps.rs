//! Jellyfin date strings and on-disk file times.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use std::fs;
use std::io;
use std::path::Path;

/// Ticks are 100 ns.
const NANOS_PER_TICK: u32 = 100;
const TICKS_PER_SECOND: u32 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTimestamps {
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

/// Source of on-disk timestamps. Swappable so platform quirks stay in one place.
pub trait FileTimes: Send + Sync {
    fn read(&self, path: &Path) -> io::Result<FileTimestamps>;
}

/// Reads `std::fs::metadata`. Filesystems without a creation time report the
/// modification time for both.
pub struct DiskTimes;

impl FileTimes for DiskTimes {
    fn read(&self, path: &Path) -> io::Result<FileTimestamps> {
        let metadata = fs::metadata(path)?;
        let modified: DateTime<Utc> = metadata.modified()?.into();
        let created = metadata
            .created()
            .map(DateTime::<Utc>::from)
            .unwrap_or(modified);
        Ok(FileTimestamps { created, modified })
    }
}

/// Parse `YYYY-MM-DD HH:MM:SS[.fffffff]Z`. A `T` separator, missing zone suffix and
/// `+00:00` are accepted; digits beyond nanoseconds are ignored.
pub fn parse_jellyfin_date(value: &str) -> Result<DateTime<Utc>> {
    let invalid = || Error::InvalidDate(value.to_string());
    let trimmed = value.trim();
    let body = trimmed
        .strip_suffix('Z')
        .or_else(|| trimmed.strip_suffix("+00:00"))
        .unwrap_or(trimmed)
        .replacen('T', " ", 1);

    let (base, fraction) = match body.split_once('.') {
        Some((base, fraction)) => (base, fraction),
        None => (body.as_str(), ""),
    };
    let naive = NaiveDateTime::parse_from_str(base, "%Y-%m-%d %H:%M:%S").map_err(|_| invalid())?;

    let digits: String = fraction.chars().take(9).collect();
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let nanos = if digits.is_empty() {
        0
    } else {
        format!("{:0<9}", digits).parse::<i64>().map_err(|_| invalid())?
    };
    Ok(Utc.from_utc_datetime(&naive) + Duration::nanoseconds(nanos))
}

/// Format with 100 ns resolution; trailing zeros of the fraction are dropped.
pub fn format_jellyfin_date(value: &DateTime<Utc>) -> String {
    let ticks = value.nanosecond() % 1_000_000_000 / NANOS_PER_TICK;
    let base = value.format("%Y-%m-%d %H:%M:%S");
    if ticks == 0 {
        format!("{}Z", base)
    } else {
        let fraction = format!("{:07}", ticks % TICKS_PER_SECOND);
        format!("{}.{}Z", base, fraction.trim_end_matches('0'))
    }
}

/// Drop everything below one tick.
pub fn truncate_to_ticks(value: &DateTime<Utc>) -> DateTime<Utc> {
    let nanos = value.nanosecond() % 1_000_000_000;
    let rounded = nanos - nanos % NANOS_PER_TICK;
    value.with_nanosecond(rounded).unwrap_or(*value)
}

/// New value for a stored date, or `None` when it already denotes `actual`.
pub fn date_update(stored: Option<&str>, actual: &DateTime<Utc>) -> Option<String> {
    let actual = truncate_to_ticks(actual);
    match stored.map(parse_jellyfin_date) {
        Some(Ok(current)) if truncate_to_ticks(&current) == actual => None,
        _ => Some(format_jellyfin_date(&actual)),
    }
}
