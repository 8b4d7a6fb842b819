//! Billing periods and the "one document per owner per month" index.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MIN_BILLING_YEAR: i32 = 2020;
pub const MAX_BILLING_YEAR: i32 = 2030;

/// Calendar month used as the billing granularity. Always rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, PeriodError> {
        if !(MIN_BILLING_YEAR..=MAX_BILLING_YEAR).contains(&year) {
            return Err(PeriodError::YearOutOfRange(year));
        }
        if !(1..=12).contains(&month) {
            return Err(PeriodError::MonthOutOfRange(month));
        }
        Ok(Self { year, month })
    }

    /// Parses `YYYY-MM`. A single-digit month (`2024-8`) is accepted and normalized.
    pub fn parse(raw: &str) -> Result<Self, PeriodError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PeriodError::Missing);
        }

        let (year, month) = raw
            .split_once('-')
            .ok_or_else(|| PeriodError::Format(raw.to_string()))?;
        if year.len() != 4 || month.is_empty() || month.len() > 2 {
            return Err(PeriodError::Format(raw.to_string()));
        }

        let year = year
            .parse::<i32>()
            .map_err(|_| PeriodError::NotNumeric(raw.to_string()))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| PeriodError::NotNumeric(raw.to_string()))?;

        Self::new(year, month)
    }

    pub const fn year(&self) -> i32 {
        self.year
    }

    pub const fn month(&self) -> u32 {
        self.month
    }

    /// Month containing `date`.
    pub fn containing(date: NaiveDate) -> Result<Self, PeriodError> {
        Self::new(date.year(), date.month())
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// Human readable label, e.g. `2024年8月`. The month is not zero padded.
    pub fn display_label(&self) -> String {
        format!("{}年{}月", self.year, self.month)
    }

    /// Compact form used inside document numbers, e.g. `202408`.
    pub fn compact(&self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for YearMonth {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    #[error("year_month is required")]
    Missing,
    #[error("year_month '{0}' must use the YYYY-MM format")]
    Format(String),
    #[error("year_month '{0}' must contain numeric year and month")]
    NotNumeric(String),
    #[error("year {0} is outside the supported range 2020-2030")]
    YearOutOfRange(i32),
    #[error("month {0} must be between 1 and 12")]
    MonthOutOfRange(u32),
}

/// Identity of a period-scoped document: the owning entity plus the billing month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeriodKey<O> {
    pub owner: O,
    pub year_month: YearMonth,
}

impl<O> PeriodKey<O> {
    pub fn new(owner: O, year_month: YearMonth) -> Self {
        Self { owner, year_month }
    }
}

/// Documents that may exist at most once per owner and month.
pub trait PeriodScoped {
    type Owner: Copy + Eq + Hash + fmt::Debug;
    type Id: Copy + Eq + fmt::Debug;

    fn period_key(&self) -> PeriodKey<Self::Owner>;
    fn document_id(&self) -> Self::Id;
}

/// Raised when a period key has already been claimed by another document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodConflict<O, I> {
    pub key: PeriodKey<O>,
    pub existing: I,
}

/// Keyed index enforcing the period-scoped singleton rule for one document type.
///
/// Callers must hold the same lock that guards the document table while claiming, so that the
/// check and the insert form one atomic step.
#[derive(Debug, Clone)]
pub struct PeriodIndex<O, I> {
    claims: HashMap<PeriodKey<O>, I>,
}

impl<O, I> Default for PeriodIndex<O, I> {
    fn default() -> Self {
        Self {
            claims: HashMap::new(),
        }
    }
}

impl<O, I> PeriodIndex<O, I>
where
    O: Copy + Eq + Hash,
    I: Copy,
{
    pub fn find(&self, key: &PeriodKey<O>) -> Option<I> {
        self.claims.get(key).copied()
    }

    /// Claims `key` for `id`, failing with the current holder when already taken.
    pub fn claim(&mut self, key: PeriodKey<O>, id: I) -> Result<(), PeriodConflict<O, I>> {
        if let Some(existing) = self.find(&key) {
            return Err(PeriodConflict { key, existing });
        }
        self.claims.insert(key, id);
        Ok(())
    }

    /// Claims the key of an already-built document.
    pub fn claim_document<D>(&mut self, document: &D) -> Result<(), PeriodConflict<O, I>>
    where
        D: PeriodScoped<Owner = O, Id = I>,
    {
        self.claim(document.period_key(), document.document_id())
    }

    pub fn release(&mut self, key: &PeriodKey<O>) -> Option<I> {
        self.claims.remove(key)
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}

/// Next sequence number for a `PREFIX{YYYYMM}-NNN` document number, based on the highest
/// existing number of the same month. Unparseable numbers are ignored.
pub fn next_sequence<'a>(
    prefix: &str,
    year_month: YearMonth,
    existing: impl IntoIterator<Item = &'a str>,
) -> u32 {
    let stem = format!("{prefix}{}-", year_month.compact());
    existing
        .into_iter()
        .filter_map(|number| number.strip_prefix(stem.as_str()))
        .filter_map(|seq| seq.parse::<u32>().ok())
        .max()
        .map_or(1, |last| last + 1)
}

pub fn format_document_number(prefix: &str, year_month: YearMonth, sequence: u32) -> String {
    format!("{prefix}{}-{sequence:03}", year_month.compact())
}
