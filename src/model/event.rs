//! Calendar events (VEVENT) and their expansion over a time range.
use crate::codec::{DateType, Record, RecordKind, escape_text, unescape_text};
use crate::error::ProviderError;
use crate::model::adapter::{STAMP_FORMAT, set_date, set_optional};
use crate::model::item::validate_required;
use crate::model::recurrence::{shift_date, strip_prefix};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use rrule::{RRuleSet, Tz};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Upper bound on instances produced for one recurring event per query.
const MAX_OCCURRENCES: u16 = 1000;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    pub calendar_name: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub status: Option<String>,

    pub start: DateType,
    /// Exclusive. Missing means one day for all-day events, an instant otherwise.
    pub end: Option<DateType>,
    pub rrule: Option<String>,

    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub etag: String,
}

fn instant(date: &DateType) -> DateTime<Utc> {
    match date {
        DateType::AllDay(d) => d.and_time(NaiveTime::MIN).and_utc(),
        DateType::Specific(dt) => *dt,
    }
}

fn rule_set(seed: DateTime<Utc>, rule: &str) -> Result<RRuleSet, rrule::RRuleError> {
    RRuleSet::from_str(&format!(
        "DTSTART:{}\nRRULE:{}",
        seed.format(STAMP_FORMAT),
        strip_prefix(rule).to_ascii_uppercase()
    ))
}

impl Event {
    pub fn starts_at(&self) -> DateTime<Utc> {
        instant(&self.start)
    }

    pub fn ends_at(&self) -> DateTime<Utc> {
        match (&self.end, &self.start) {
            (Some(end), _) => instant(end),
            (None, DateType::AllDay(_)) => self.starts_at() + Duration::days(1),
            (None, DateType::Specific(dt)) => *dt,
        }
    }

    /// Half-open overlap with `[from, to)`. Zero-length events count when
    /// their instant falls inside.
    pub fn overlaps(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        let (start, end) = (self.starts_at(), self.ends_at());
        if start == end {
            return start >= from && start < to;
        }
        start < to && end > from
    }

    /// Instances of this event inside `[from, to)`. A recurring event is
    /// expanded; every instance keeps the master's UID. A rule the expander
    /// cannot read leaves the master as the only instance.
    pub fn occurrences(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Event> {
        let Some(rule) = self.rrule.as_deref() else {
            return self.occurrences_of_master(from, to);
        };

        let seed = self.starts_at();
        let set = match rule_set(seed, rule) {
            Ok(set) => set,
            Err(e) => {
                log::warn!("Not expanding '{}' on event {}: {}", rule, self.uid, e);
                return self.occurrences_of_master(from, to);
            }
        };

        // Instances starting after `from - span` may still reach into the window.
        let span = self.ends_at() - seed;
        let window = set
            .after((from - span - Duration::seconds(1)).with_timezone(&Tz::UTC))
            .before(to.with_timezone(&Tz::UTC))
            .all(MAX_OCCURRENCES);
        if window.limited {
            log::debug!("Event {} has more than {} instances in range", self.uid, MAX_OCCURRENCES);
        }

        let mut instances = Vec::new();
        for start in window.dates.into_iter().map(|d| d.to_utc()) {
            if start >= to {
                break;
            }
            let shift = start - seed;
            let mut instance = self.clone();
            instance.start = shift_date(self.start, shift);
            instance.end = self.end.map(|d| shift_date(d, shift));
            if instance.overlaps(from, to) {
                instances.push(instance);
            }
        }
        instances
    }

    fn occurrences_of_master(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Event> {
        if self.overlaps(from, to) {
            vec![self.clone()]
        } else {
            Vec::new()
        }
    }

    /// Reads an event out of a VEVENT record. Records without a UID or a
    /// readable DTSTART yield None.
    pub fn from_record(record: &Record, calendar_name: &str) -> Option<Event> {
        if record.kind() != RecordKind::Event {
            return None;
        }
        Some(Event {
            uid: record.uid()?.to_string(),
            calendar_name: calendar_name.to_string(),
            summary: record.get("SUMMARY").map(unescape_text).unwrap_or_default(),
            description: record
                .get("DESCRIPTION")
                .map(unescape_text)
                .filter(|d| !d.is_empty()),
            location: record
                .get("LOCATION")
                .map(unescape_text)
                .filter(|l| !l.is_empty()),
            status: record.get("STATUS").map(|s| s.trim().to_ascii_uppercase()),
            start: record.get("DTSTART").and_then(DateType::from_wire)?,
            end: record.get("DTEND").and_then(DateType::from_wire),
            rrule: record
                .get("RRULE")
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            href: String::new(),
            etag: String::new(),
        })
    }

    pub fn to_record(&self) -> Record {
        let mut record = Record::new(RecordKind::Event);
        record.set("UID", self.uid.clone());
        record.set("DTSTAMP", Utc::now().format(STAMP_FORMAT).to_string());
        record.set("SUMMARY", escape_text(&self.summary));
        set_optional(
            &mut record,
            "DESCRIPTION",
            self.description.as_deref().map(escape_text),
        );
        set_optional(
            &mut record,
            "LOCATION",
            self.location.as_deref().map(escape_text),
        );
        set_optional(&mut record, "STATUS", self.status.clone());
        set_date(&mut record, "DTSTART", Some(&self.start));
        set_date(&mut record, "DTEND", self.end.as_ref());
        set_optional(&mut record, "RRULE", self.rrule.clone());
        record
    }
}

/// Caller input for `add_event`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    pub summary: String,
    pub calendar_name: String,
    /// Raw start input, see [`DateType::parse_input`]
    pub start: String,
    pub end: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub rrule: Option<String>,
}

impl EventDraft {
    pub fn new(summary: &str, calendar_name: &str, start: &str, end: &str) -> Self {
        Self {
            summary: summary.to_string(),
            calendar_name: calendar_name.to_string(),
            start: start.to_string(),
            end: end.to_string(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_rrule(mut self, rrule: &str) -> Self {
        self.rrule = Some(rrule.to_string());
        self
    }

    /// Validates the draft and builds an event with a fresh UID. The end must
    /// come after the start, and both must be of the same kind (dates or
    /// timestamps).
    pub fn into_event(self) -> Result<Event, ProviderError> {
        validate_required(&self.summary, "Event summary")?;
        validate_required(&self.calendar_name, "Calendar name")?;
        let start = DateType::parse_input(&self.start)?;
        let end = DateType::parse_input(&self.end)?;
        if matches!(start, DateType::AllDay(_)) != matches!(end, DateType::AllDay(_)) {
            return Err(ProviderError::Validation(
                "Event start and end must both be dates or both be timestamps".to_string(),
            ));
        }
        if instant(&end) <= instant(&start) {
            return Err(ProviderError::Validation(format!(
                "Event end '{}' must be after its start '{}'",
                self.end.trim(),
                self.start.trim()
            )));
        }

        let rrule = self
            .rrule
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        if let Some(rule) = &rrule
            && let Err(e) = rule_set(instant(&start), rule)
        {
            return Err(ProviderError::Validation(format!(
                "Invalid recurrence '{}': {}",
                rule, e
            )));
        }

        Ok(Event {
            uid: Uuid::new_v4().to_string(),
            calendar_name: self.calendar_name.trim().to_string(),
            summary: self.summary.trim().to_string(),
            description: self.description.filter(|d| !d.trim().is_empty()),
            location: self.location.filter(|l| !l.trim().is_empty()),
            status: None,
            start,
            end: Some(end),
            rrule,
            href: String::new(),
            etag: String::new(),
        })
    }
}
