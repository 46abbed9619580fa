//! Booking reference allocation.
//!
//! References look like `BK-2025-0042`: a fixed prefix, the UTC calendar year
//! of the commit, and a per-year sequence zero-padded to four digits. The
//! sequence continues from the most recently created booking of the year.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};

use super::EngineError;

pub const REFERENCE_PREFIX: &str = "BK";

/// The most recently created booking of a year, as far as the sequence cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatestIssued {
    pub reference: String,
    pub created_at: DateTime<Utc>,
}

pub fn format_reference(year: i32, sequence: u32) -> String {
    format!("{REFERENCE_PREFIX}-{year}-{sequence:04}")
}

/// Numeric suffix after the last `-`.
pub fn parse_sequence(reference: &str) -> Result<u32, EngineError> {
    reference
        .rsplit('-')
        .next()
        .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|suffix| suffix.parse::<u32>().ok())
        .ok_or_else(|| EngineError::CorruptReferenceSequence {
            reference: reference.to_string(),
        })
}

/// Reference following `latest` in `year`. The first booking of a year gets
/// sequence 1.
pub fn next_reference(latest: Option<&LatestIssued>, year: i32) -> Result<String, EngineError> {
    let next = match latest {
        None => 1,
        Some(issued) => parse_sequence(&issued.reference)?
            .checked_add(1)
            .ok_or_else(|| EngineError::CorruptReferenceSequence {
                reference: issued.reference.clone(),
            })?,
    };
    Ok(format_reference(year, next))
}

/// Per-year record of the last reference handed out.
///
/// Lives behind a single mutex in the engine; every allocation reads and
/// advances it while that mutex is held.
#[derive(Debug, Default)]
pub struct ReferenceLedger {
    latest: HashMap<i32, LatestIssued>,
}

impl ReferenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self, year: i32) -> Option<&LatestIssued> {
        self.latest.get(&year)
    }

    /// Note an issued reference. The entry for a year only moves forward in
    /// creation time; equal timestamps go to the later call.
    pub fn record(&mut self, reference: &str, created_at: DateTime<Utc>) {
        let year = created_at.year();
        if let Some(current) = self.latest.get(&year)
            && current.created_at > created_at
        {
            return;
        }
        self.latest.insert(
            year,
            LatestIssued {
                reference: reference.to_string(),
                created_at,
            },
        );
    }

    /// Next reference for the year of `now`, plus the creation timestamp the
    /// booking must carry. The timestamp is clamped so it never precedes the
    /// latest booking of the year, which keeps creation order and allocation
    /// order identical.
    pub fn allocate(&self, now: DateTime<Utc>) -> Result<(String, DateTime<Utc>), EngineError> {
        let year = now.year();
        let latest = self.latest.get(&year);
        let created_at = latest.map_or(now, |issued| issued.created_at.max(now));
        Ok((next_reference(latest, year)?, created_at))
    }

    pub fn years(&self) -> impl Iterator<Item = (i32, &LatestIssued)> {
        self.latest.iter().map(|(year, issued)| (*year, issued))
    }
}
