// File: ./src/codec/datetime.rs
//! Date-time and duration value encodings used inside records.
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

const DATE_FORMAT: &str = "%Y%m%d";
const UTC_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const FLOATING_FORMAT: &str = "%Y%m%dT%H%M%S";

// --- DATE TYPES ---

/// A due/start value: either a whole day or an exact instant.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DateType {
    AllDay(NaiveDate),
    Specific(DateTime<Utc>),
}

impl DateType {
    /// Decodes a wire value (`20250101`, `20250101T100000Z`, or floating
    /// `20250101T100000`, which is read as UTC).
    pub fn from_wire(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.len() == 8 {
            return NaiveDate::parse_from_str(value, DATE_FORMAT)
                .ok()
                .map(DateType::AllDay);
        }
        let parsed = if value.ends_with('Z') {
            NaiveDateTime::parse_from_str(value, UTC_FORMAT)
        } else {
            NaiveDateTime::parse_from_str(value, FLOATING_FORMAT)
        };
        parsed
            .ok()
            .map(|d| DateType::Specific(Utc.from_utc_datetime(&d)))
    }

    pub fn to_wire(&self) -> String {
        match self {
            DateType::AllDay(d) => d.format(DATE_FORMAT).to_string(),
            DateType::Specific(dt) => dt.format(UTC_FORMAT).to_string(),
        }
    }

    pub fn to_date_naive(&self) -> NaiveDate {
        match self {
            DateType::AllDay(d) => *d,
            DateType::Specific(dt) => dt.date_naive(),
        }
    }
}

impl PartialOrd for DateType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DateType {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.to_date_naive().cmp(&other.to_date_naive()) {
            Ordering::Equal => match (self, other) {
                // Same day: a specific time comes before the all-day deadline
                (DateType::Specific(t1), DateType::Specific(t2)) => t1.cmp(t2),
                (DateType::Specific(_), DateType::AllDay(_)) => Ordering::Less,
                (DateType::AllDay(_), DateType::Specific(_)) => Ordering::Greater,
                (DateType::AllDay(_), DateType::AllDay(_)) => Ordering::Equal,
            },
            ord => ord,
        }
    }
}

// --- DURATIONS ---

/// Formats minutes as an RFC 5545 duration (`PT45M`, `PT2H`, `P1D`).
pub fn format_duration(mins: u32) -> String {
    if mins > 0 && mins.is_multiple_of(24 * 60) {
        format!("P{}D", mins / (24 * 60))
    } else if mins > 0 && mins.is_multiple_of(60) {
        format!("PT{}H", mins / 60)
    } else {
        format!("PT{}M", mins)
    }
}

/// Parses a non-negative RFC 5545 duration into whole minutes.
/// Seconds are truncated. Returns `None` for negative or malformed input.
pub fn parse_duration(value: &str) -> Option<u32> {
    let value = value.trim();
    let value = value.strip_prefix('+').unwrap_or(value);
    let body = value.strip_prefix('P')?;
    if body.is_empty() {
        return None;
    }

    let mut seconds: u64 = 0;
    let mut digits = String::new();
    let mut in_time = false;
    let mut saw_unit = false;

    for c in body.chars() {
        match c {
            '0'..='9' => digits.push(c),
            'T' if !in_time && digits.is_empty() => in_time = true,
            'W' | 'D' | 'H' | 'M' | 'S' => {
                let n: u64 = digits.parse().ok()?;
                digits.clear();
                let unit = match (c, in_time) {
                    ('W', false) => 7 * 24 * 3600,
                    ('D', false) => 24 * 3600,
                    ('H', true) => 3600,
                    ('M', true) => 60,
                    ('S', true) => 1,
                    _ => return None,
                };
                seconds = seconds.checked_add(n.checked_mul(unit)?)?;
                saw_unit = true;
            }
            _ => return None,
        }
    }

    if !digits.is_empty() || !saw_unit {
        return None;
    }
    u32::try_from(seconds / 60).ok()
}
