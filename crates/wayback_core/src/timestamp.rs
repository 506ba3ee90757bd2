use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};
use thiserror::Error;

const COMPACT_FORMAT: &str = "%Y%m%d%H%M%S";
/// Defaults for the fields a shortened compact timestamp leaves out.
const COMPACT_TEMPLATE: &str = "00000101000000";
const EPOCH_LOWER: u64 = 100_000_000;
const EPOCH_UPPER: u64 = 10_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("empty timestamp")]
    Empty,
    #[error("unrecognized timestamp format: {0:?}")]
    Unrecognized(String),
    #[error("timestamp {0:?} is not a valid date")]
    InvalidDate(String),
    #[error("timestamp {0:?} falls outside years 0000-9999")]
    OutOfRange(String),
}

/// How snapshot timestamps are rendered into file names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampFormat {
    /// Zero-padded `YYYYMMDDHHMMSS`.
    #[default]
    Compact,
    /// Seconds since the Unix epoch.
    Unix,
}

/// A UTC instant with second precision, compared and displayed in the
/// canonical 14-digit `YYYYMMDDHHMMSS` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(NaiveDateTime);

impl Timestamp {
    /// `00010101000000`, the open lower bound of a time range.
    pub fn earliest() -> Self {
        Self::from_parts(1, 1, 1, 0, 0, 0).unwrap_or(Self(NaiveDateTime::MIN))
    }

    /// `99991231235959`, the open upper bound of a time range.
    pub fn latest() -> Self {
        Self::from_parts(9999, 12, 31, 23, 59, 59).unwrap_or(Self(NaiveDateTime::MAX))
    }

    pub fn from_parts(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_opt(hour, min, sec))
            .map(Self)
    }

    pub fn from_unix(seconds: i64) -> Option<Self> {
        DateTime::from_timestamp(seconds, 0)
            .map(|dt| Self(dt.naive_utc()))
            .filter(|ts| ts.in_display_range())
    }

    /// Parses user input: compact digits (`YYYY` up to `YYYYMMDDHHMMSS`),
    /// ISO-8601 dates and datetimes, or Unix epoch seconds.
    ///
    /// A bare integer strictly between 10^8 and 10^13 whose length is not
    /// a compact length (4, 6, 8, 12 or 14 digits) is read as epoch seconds.
    pub fn parse(input: &str) -> Result<Self, TimestampError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TimestampError::Empty);
        }

        if trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return match trimmed.len() {
                4 | 6 | 8 | 12 | 14 => Self::parse_compact(trimmed),
                9..=13 => Self::parse_epoch(trimmed),
                _ => Err(TimestampError::Unrecognized(trimmed.to_string())),
            };
        }

        Self::parse_iso(trimmed)
    }

    /// Parses the digits-only form used by the archive index. Shorter
    /// values are padded to the start of the period they name.
    pub fn parse_compact(digits: &str) -> Result<Self, TimestampError> {
        if digits.is_empty()
            || digits.len() > COMPACT_TEMPLATE.len()
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(TimestampError::Unrecognized(digits.to_string()));
        }
        let padded = format!("{digits}{}", &COMPACT_TEMPLATE[digits.len()..]);
        NaiveDateTime::parse_from_str(&padded, COMPACT_FORMAT)
            .map(Self)
            .map_err(|_| TimestampError::InvalidDate(digits.to_string()))
    }

    fn parse_epoch(digits: &str) -> Result<Self, TimestampError> {
        let value: u64 = digits
            .parse()
            .map_err(|_| TimestampError::Unrecognized(digits.to_string()))?;
        if value <= EPOCH_LOWER || value >= EPOCH_UPPER {
            return Err(TimestampError::Unrecognized(digits.to_string()));
        }
        i64::try_from(value)
            .ok()
            .and_then(Self::from_unix)
            .ok_or_else(|| TimestampError::OutOfRange(digits.to_string()))
    }

    fn parse_iso(text: &str) -> Result<Self, TimestampError> {
        let parsed = DateTime::parse_from_rfc3339(text)
            .map(|dt| dt.naive_utc())
            .or_else(|_| NaiveDateTime::parse_from_str(text.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S"))
            .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S"))
            .or_else(|_| {
                NaiveDate::parse_from_str(text, "%Y-%m-%d").map(|date| date.and_time(NaiveTime::default()))
            })
            .map_err(|_| TimestampError::Unrecognized(text.to_string()))?;

        let ts = Self(parsed);
        if ts.in_display_range() {
            Ok(ts)
        } else {
            Err(TimestampError::OutOfRange(text.to_string()))
        }
    }

    pub fn unix_seconds(&self) -> i64 {
        self.0.and_utc().timestamp()
    }

    pub fn format(&self, format: TimestampFormat) -> String {
        match format {
            TimestampFormat::Compact => self.to_string(),
            TimestampFormat::Unix => self.unix_seconds().to_string(),
        }
    }

    fn in_display_range(&self) -> bool {
        use chrono::Datelike;
        (0..=9999).contains(&self.0.year())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(COMPACT_FORMAT))
    }
}

impl std::str::FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
