//! Monthly persistence history
//!
//! Stored as `MM.yyyy-P` entries joined by commas, for example
//! `02.2024-91,03.2024-65`. Each month keeps the lowest persistence seen.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lowest persistence observed in one month
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryEntry {
    pub month: u32,
    pub year: i32,
    pub persistence: u8,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}.{}-{}", self.month, self.year, self.persistence)
    }
}

impl FromStr for HistoryEntry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || format!("malformed history entry {s:?}");
        let (period, persistence) = s.trim().split_once('-').ok_or_else(bad)?;
        let (month, year) = period.split_once('.').ok_or_else(bad)?;
        let month: u32 = month.parse().map_err(|_| bad())?;
        if !(1..=12).contains(&month) {
            return Err(bad());
        }
        Ok(Self {
            month,
            year: year.parse().map_err(|_| bad())?,
            persistence: persistence.parse().map_err(|_| bad())?,
        })
    }
}

/// All monthly entries of a document, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistenceHistory(Vec<HistoryEntry>);

impl PersistenceHistory {
    /// Empty history
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Record `persistence` for a month, keeping the minimum per month
    pub fn record(&mut self, month: u32, year: i32, persistence: u8) {
        match self
            .0
            .iter_mut()
            .find(|entry| entry.month == month && entry.year == year)
        {
            Some(entry) => entry.persistence = entry.persistence.min(persistence),
            None => self.0.push(HistoryEntry {
                month,
                year,
                persistence,
            }),
        }
    }

    /// Record `persistence` for the current UTC month
    pub fn record_now(&mut self, persistence: u8) {
        let now = Utc::now();
        self.record(now.month(), now.year(), persistence);
    }

    /// Drop all entries
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl fmt::Display for PersistenceHistory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}

impl FromStr for PersistenceHistory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl Serialize for PersistenceHistory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PersistenceHistory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
