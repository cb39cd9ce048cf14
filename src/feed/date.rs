//! Date normalization for feed timestamps.
//!
//! Feeds disagree on date syntax: RSS mostly emits RFC 1123 (`Wed, 01 Jan
//! 2024 12:00:00 GMT` or with a numeric offset), Atom emits RFC 3339. Formats
//! are tried in a fixed order and the first successful parse wins:
//!
//! 1. RFC 1123 with a numeric zone offset (`+0200`)
//! 2. RFC 1123 with a named zone (`GMT`, `EST`, ...)
//! 3. RFC 3339 / ISO 8601
//!
//! Every result is converted to UTC.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

/// RFC 1123 after the weekday prefix has been removed.
const RFC1123_NUMERIC_ZONE: &str = "%d %b %Y %H:%M:%S %z";
const RFC1123_WITHOUT_ZONE: &str = "%d %b %Y %H:%M:%S";

const HOUR: i32 = 3600;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateParseError {
    #[error("empty date string")]
    Empty,
    #[error("unrecognized date format: {0:?}")]
    Unrecognized(String),
}

/// Parses a feed date string into a UTC instant.
///
/// The weekday prefix of RFC 1123 dates is accepted but not checked against
/// the date; feeds in the wild routinely get it wrong.
///
/// # Errors
///
/// [`DateParseError::Empty`] for blank input, [`DateParseError::Unrecognized`]
/// when none of the three formats match.
///
/// # Examples
///
/// ```
/// use gator::feed::normalize_date;
///
/// let dt = normalize_date("Wed, 01 Jan 2024 12:00:00 GMT").unwrap();
/// assert_eq!(dt.to_rfc3339(), "2024-01-01T12:00:00+00:00");
/// ```
pub fn normalize_date(input: &str) -> Result<DateTime<Utc>, DateParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DateParseError::Empty);
    }

    parse_rfc1123_numeric(s)
        .or_else(|| parse_rfc1123_named(s))
        .or_else(|| parse_rfc3339(s))
        .ok_or_else(|| DateParseError::Unrecognized(s.to_string()))
}

fn parse_rfc1123_numeric(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(strip_weekday(s), RFC1123_NUMERIC_ZONE)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_rfc1123_named(s: &str) -> Option<DateTime<Utc>> {
    let (stamp, zone) = strip_weekday(s).rsplit_once(' ')?;
    let offset = FixedOffset::east_opt(named_zone_offset(zone)?)?;
    let naive = NaiveDateTime::parse_from_str(stamp.trim_end(), RFC1123_WITHOUT_ZONE).ok()?;
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Drops a leading `Wed, ` style day name.
fn strip_weekday(s: &str) -> &str {
    match s.split_once(',') {
        Some((day, rest)) if !day.is_empty() && day.chars().all(|c| c.is_ascii_alphabetic()) => {
            rest.trim_start()
        }
        _ => s,
    }
}

/// Offset in seconds east of UTC for an RFC 822 zone name.
///
/// Abbreviations outside the RFC 822 table carry no offset information and
/// are read as UTC.
fn named_zone_offset(zone: &str) -> Option<i32> {
    let offset = match zone.to_ascii_uppercase().as_str() {
        "GMT" | "UT" | "UTC" | "Z" => 0,
        "EST" => -5 * HOUR,
        "EDT" => -4 * HOUR,
        "CST" => -6 * HOUR,
        "CDT" => -5 * HOUR,
        "MST" => -7 * HOUR,
        "MDT" => -6 * HOUR,
        "PST" => -8 * HOUR,
        "PDT" => -7 * HOUR,
        other if (3..=5).contains(&other.len()) && other.bytes().all(|b| b.is_ascii_alphabetic()) => 0,
        _ => return None,
    };
    Some(offset)
}
