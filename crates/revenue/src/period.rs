//! Calendar-month period keys.

use core::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use revsync_core::{DomainError, DomainResult, ValueObject};

/// First day of a calendar month (UTC). The unit of revenue aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodKey(NaiveDate);

impl ValueObject for PeriodKey {}

impl PeriodKey {
    pub fn from_date(date: NaiveDate) -> Self {
        Self(date - Days::new(u64::from(date.day0())))
    }

    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self::from_date(at.date_naive())
    }

    /// Parse a `YYYY-MM` month key.
    pub fn parse_month(raw: &str) -> DomainResult<Self> {
        let trimmed = raw.trim();
        NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d")
            .map(Self)
            .map_err(|e| DomainError::invalid_date(format!("'{raw}' is not a YYYY-MM month: {e}")))
    }

    pub fn first_day(&self) -> NaiveDate {
        self.0
    }

    pub fn year(&self) -> i32 {
        self.0.year()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }
}

impl core::fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for PeriodKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_month(s)
    }
}

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
];

/// Map a raw invoice date to the month it belongs to.
///
/// Accepted inputs:
/// - `YYYY-MM-DD`
/// - RFC 3339 timestamps; the offset is applied before truncating, so
///   `2024-03-31T23:30:00-02:00` lands in April
/// - naive `YYYY-MM-DDTHH:MM:SS[.fff]` timestamps, read as UTC
///
/// Anything else is an `InvalidDate`. There is no fallback month.
pub fn derive_period(raw: &str) -> DomainResult<PeriodKey> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(DomainError::invalid_date("empty date"));
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(PeriodKey::from_date(date));
    }

    if let Ok(at) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(PeriodKey::from_datetime(at.with_timezone(&Utc)));
    }

    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| PeriodKey::from_datetime(naive.and_utc()))
        .ok_or_else(|| DomainError::invalid_date(format!("unrecognized date '{raw}'")))
}
