// File: ./src/codec/record.rs
use serde::{Deserialize, Serialize};

/// The component kinds the codec extracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Todo,
    Event,
}

impl RecordKind {
    pub fn component_name(&self) -> &'static str {
        match self {
            RecordKind::Todo => "VTODO",
            RecordKind::Event => "VEVENT",
        }
    }

    pub fn from_component(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "VTODO" => Some(RecordKind::Todo),
            "VEVENT" => Some(RecordKind::Event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

impl Property {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }
}

/// One VTODO/VEVENT as an insertion-ordered property map.
///
/// Names are stored upper-cased and are unique: setting an existing name
/// replaces the value in place. Nested components (VALARM, ...) are kept as
/// their raw logical lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    kind: RecordKind,
    properties: Vec<Property>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    components: Vec<Vec<String>>,
}

impl Record {
    pub fn new(kind: RecordKind) -> Self {
        Self {
            kind,
            properties: Vec::new(),
            components: Vec::new(),
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    /// The record's UID, if present and non-blank.
    pub fn uid(&self) -> Option<&str> {
        self.get("UID").map(str::trim).filter(|u| !u.is_empty())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.property(name).map(|p| p.value.as_str())
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Sets `name` to `value`, dropping any parameters it had.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.set_with_params(name, Vec::new(), value);
    }

    pub fn set_with_params(
        &mut self,
        name: &str,
        params: Vec<(String, String)>,
        value: impl Into<String>,
    ) {
        let name = name.to_ascii_uppercase();
        let value = value.into();
        if let Some(existing) = self.properties.iter_mut().find(|p| p.name == name) {
            existing.params = params;
            existing.value = value;
        } else {
            self.properties.push(Property {
                name,
                params,
                value,
            });
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Property> {
        let idx = self
            .properties
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))?;
        Some(self.properties.remove(idx))
    }

    pub fn components(&self) -> &[Vec<String>] {
        &self.components
    }

    pub fn push_component(&mut self, lines: Vec<String>) {
        self.components.push(lines);
    }
}

// Property order is kept for output stability but carries no meaning.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.components == other.components
            && self.properties.len() == other.properties.len()
            && self
                .properties
                .iter()
                .all(|p| other.property(&p.name) == Some(p))
    }
}

impl Eq for Record {}
