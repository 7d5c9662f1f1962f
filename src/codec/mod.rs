// File: ./src/codec/mod.rs
//! Parser and serializer for the calendar text format subset used by tasks
//! and events: `BEGIN:VTODO`/`BEGIN:VEVENT` blocks of `NAME;PARAMS:VALUE`
//! lines, folded at 75 characters.
//!
//! Parsing never fails as a whole. Problems are reported as [`Warning`]s next
//! to the records that could be extracted.
pub mod datetime;
pub mod fold;
pub mod record;
pub mod text;

pub use datetime::{DateType, format_duration, parse_duration};
pub use fold::{FOLD_WIDTH, fold_line, unfold};
pub use record::{Property, Record, RecordKind};
pub use text::{escape_text, split_list, unescape_text};

use thiserror::Error;

pub const PRODID: &str = "-//taskpulse//taskpulse//EN";

/// Properties whose values must decode as a [`DateType`].
const DATE_PROPERTIES: &[&str] = &["DUE", "DTSTART", "DTEND"];

/// Non-fatal problems found while parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    #[error("line {line}: {component} without UID dropped")]
    MissingUid {
        line: usize,
        component: &'static str,
    },

    #[error("line {line}: malformed {property} value '{value}' ignored")]
    MalformedDate {
        line: usize,
        property: String,
        value: String,
    },

    #[error("line {line}: {component} never closed, dropped")]
    Unterminated {
        line: usize,
        component: &'static str,
    },

    #[error("line {line}: unparseable content line ignored")]
    MalformedLine { line: usize },
}

struct NestedBlock {
    lines: Vec<String>,
    depth: usize,
}

struct OpenRecord {
    record: Record,
    start_line: usize,
    nested: Option<NestedBlock>,
}

/// Extracts every VTODO/VEVENT in `raw`.
///
/// Lines outside those blocks are ignored. When a property repeats inside a
/// block the last occurrence wins. Records without a UID are dropped with a
/// warning rather than given a generated one.
pub fn parse(raw: &str) -> (Vec<Record>, Vec<Warning>) {
    let mut records = Vec::new();
    let mut warnings = Vec::new();
    let mut open: Option<OpenRecord> = None;

    for (line_no, line) in fold::unfold_numbered(raw) {
        let Some(current) = open.as_mut() else {
            if let Some((name, _, value)) = split_content_line(&line)
                && name == "BEGIN"
                && let Some(kind) = RecordKind::from_component(&value)
            {
                open = Some(OpenRecord {
                    record: Record::new(kind),
                    start_line: line_no,
                    nested: None,
                });
            }
            continue;
        };

        let Some((name, params, value)) = split_content_line(&line) else {
            if let Some(nested) = current.nested.as_mut() {
                nested.lines.push(line);
            } else {
                warnings.push(Warning::MalformedLine { line: line_no });
            }
            continue;
        };

        if let Some(nested) = current.nested.as_mut() {
            nested.lines.push(line);
            match name.as_str() {
                "BEGIN" => nested.depth += 1,
                "END" => nested.depth -= 1,
                _ => {}
            }
            if nested.depth == 0
                && let Some(done) = current.nested.take()
            {
                current.record.push_component(done.lines);
            }
            continue;
        }

        match name.as_str() {
            "BEGIN" => {
                current.nested = Some(NestedBlock {
                    lines: vec![line],
                    depth: 1,
                });
            }
            "END" => {
                if RecordKind::from_component(&value) != Some(current.record.kind()) {
                    warnings.push(Warning::MalformedLine { line: line_no });
                    continue;
                }
                if let Some(finished) = open.take() {
                    if finished.record.uid().is_some() {
                        records.push(finished.record);
                    } else {
                        warnings.push(Warning::MissingUid {
                            line: finished.start_line,
                            component: finished.record.kind().component_name(),
                        });
                    }
                }
            }
            _ => {
                if DATE_PROPERTIES.contains(&name.as_str()) && DateType::from_wire(&value).is_none()
                {
                    // Last occurrence wins, so a bad repeat also clears an earlier good value.
                    current.record.remove(&name);
                    warnings.push(Warning::MalformedDate {
                        line: line_no,
                        property: name,
                        value,
                    });
                    continue;
                }
                current.record.set_with_params(&name, params, value);
            }
        }
    }

    if let Some(unclosed) = open {
        warnings.push(Warning::Unterminated {
            line: unclosed.start_line,
            component: unclosed.record.kind().component_name(),
        });
    }

    (records, warnings)
}

/// Renders one record as a single `BEGIN`/`END` block with CRLF line endings.
pub fn serialize(record: &Record) -> String {
    let mut out = String::new();
    write_record(&mut out, record);
    out
}

/// Wraps records in a `VCALENDAR` envelope, ready to be stored remotely.
pub fn serialize_calendar(records: &[Record]) -> String {
    let mut out = String::new();
    push_line(&mut out, "BEGIN:VCALENDAR");
    push_line(&mut out, "VERSION:2.0");
    push_line(&mut out, &format!("PRODID:{}", PRODID));
    for record in records {
        write_record(&mut out, record);
    }
    push_line(&mut out, "END:VCALENDAR");
    out
}

fn write_record(out: &mut String, record: &Record) {
    let component = record.kind().component_name();
    push_line(out, &format!("BEGIN:{}", component));
    for prop in record.properties() {
        push_line(out, &content_line(prop));
    }
    for block in record.components() {
        for line in block {
            push_line(out, line);
        }
    }
    push_line(out, &format!("END:{}", component));
}

fn push_line(out: &mut String, logical: &str) {
    out.push_str(&fold_line(logical));
    out.push_str("\r\n");
}

fn content_line(prop: &Property) -> String {
    let mut line = prop.name.clone();
    for (key, value) in &prop.params {
        line.push(';');
        line.push_str(key);
        line.push('=');
        if value.contains([':', ';', ',']) {
            line.push('"');
            line.push_str(value);
            line.push('"');
        } else {
            line.push_str(value);
        }
    }
    line.push(':');
    line.push_str(&prop.value);
    line
}

/// Splits `NAME;K=V;K2="V:2":VALUE`. The first colon outside quotes ends the
/// name/parameter block. Returns `None` when there is no colon or the name is
/// not a valid property name.
fn split_content_line(line: &str) -> Option<(String, Vec<(String, String)>, String)> {
    let mut in_quotes = false;
    let mut colon = None;
    let mut semicolons = Vec::new();
    for (idx, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => semicolons.push(idx),
            ':' if !in_quotes => {
                colon = Some(idx);
                break;
            }
            _ => {}
        }
    }
    let colon = colon?;
    let head = &line[..colon];
    let value = line[colon + 1..].to_string();

    let name_end = semicolons.first().copied().unwrap_or(colon);
    let name = head[..name_end].trim();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return None;
    }

    let mut params = Vec::new();
    for (i, start) in semicolons.iter().enumerate() {
        let end = semicolons.get(i + 1).copied().unwrap_or(colon);
        let raw = &line[start + 1..end];
        let (key, val) = raw.split_once('=').unwrap_or((raw, ""));
        let val = val
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(val);
        params.push((key.trim().to_ascii_uppercase(), val.to_string()));
    }

    Some((name.to_ascii_uppercase(), params, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_names_params_and_values() {
        let (name, params, value) =
            split_content_line("dtstart;TZID=\"Europe/Paris\";X-A=\"a:b\":20250101T100000")
                .unwrap();
        assert_eq!(name, "DTSTART");
        assert_eq!(
            params,
            vec![
                ("TZID".to_string(), "Europe/Paris".to_string()),
                ("X-A".to_string(), "a:b".to_string())
            ]
        );
        assert_eq!(value, "20250101T100000");
    }

    #[test]
    fn value_may_contain_colons() {
        let (_, _, value) = split_content_line("URL:https://example.com/a").unwrap();
        assert_eq!(value, "https://example.com/a");
    }

    #[test]
    fn rejects_lines_without_colon_or_name() {
        assert!(split_content_line("just some text").is_none());
        assert!(split_content_line(":value").is_none());
        assert!(split_content_line("BAD NAME:value").is_none());
    }

    #[test]
    fn quoted_params_are_requoted_on_output() {
        let prop = Property {
            name: "ATTENDEE".to_string(),
            params: vec![("CN".to_string(), "Doe, Jane".to_string())],
            value: "mailto:jane@example.com".to_string(),
        };
        assert_eq!(
            content_line(&prop),
            "ATTENDEE;CN=\"Doe, Jane\":mailto:jane@example.com"
        );
    }
}
