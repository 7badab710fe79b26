//! Character records and profiles.

use crate::oracle::compact;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A character's descriptive profile.
///
/// Generated profiles are JSON objects; when the oracle returns something that
/// does not parse, the raw text is kept rather than lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Profile {
    Structured(Map<String, Value>),
    Text(String),
}

impl Default for Profile {
    fn default() -> Self {
        Profile::Structured(Map::new())
    }
}

impl Profile {
    /// Build a structured profile from `(field, value)` pairs.
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Profile::Structured(
            fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
                .collect(),
        )
    }

    /// Parse oracle output: the span from the first `{` to the last `}` as
    /// JSON, otherwise the trimmed text.
    pub fn parse(output: &str) -> Self {
        let cleaned = output.trim().trim_matches('`').trim();
        if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
            if end > start {
                if let Ok(Value::Object(map)) = serde_json::from_str(&cleaned[start..=end]) {
                    return Profile::Structured(map);
                }
            }
        }
        Profile::Text(output.trim().to_string())
    }

    /// A field rendered as a trimmed string; arrays are joined with `, `.
    pub fn field(&self, key: &str) -> String {
        let Profile::Structured(map) = self else {
            return String::new();
        };
        match map.get(key) {
            Some(Value::String(s)) => s.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
                .join(", "),
            _ => String::new(),
        }
    }

    /// Display name, if the profile has one.
    pub fn name(&self) -> Option<String> {
        Some(self.field("name")).filter(|n| !n.is_empty())
    }

    pub fn summary(&self) -> String {
        compact(&self.field("summary"))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Profile::Structured(map) => map.is_empty(),
            Profile::Text(text) => text.trim().is_empty(),
        }
    }

    /// Compact single-line rendering for prompts.
    pub fn render(&self) -> String {
        match self {
            Profile::Structured(map) => {
                serde_json::to_string(map).unwrap_or_default()
            }
            Profile::Text(text) => text.clone(),
        }
    }
}

/// One character in the roster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub id: String,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub polity_id: Option<String>,
    #[serde(default)]
    pub profile: Profile,
}

impl CharacterRecord {
    pub fn new(id: impl Into<String>, profile: Profile) -> Self {
        Self {
            id: id.into(),
            region_id: None,
            polity_id: None,
            profile,
        }
    }

    /// Anchor the character to a region and optionally a polity.
    pub fn with_affiliation(mut self, region_id: Option<&str>, polity_id: Option<&str>) -> Self {
        self.region_id = region_id.map(str::to_string);
        self.polity_id = polity_id.map(str::to_string);
        self
    }

    pub fn name(&self) -> Option<String> {
        self.profile.name()
    }

    /// `id/name`, or the bare id for unnamed characters.
    pub fn label(&self) -> String {
        match self.name() {
            Some(name) => format!("{}/{}", self.id, name),
            None => self.id.clone(),
        }
    }

    pub fn snapshot(&self) -> CharacterSnapshot {
        CharacterSnapshot {
            region_id: self.region_id.clone(),
            polity_id: self.polity_id.clone(),
            profile: self.profile.clone(),
        }
    }
}

/// Serialized view of a character for history records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub polity_id: Option<String>,
    #[serde(default)]
    pub profile: Profile,
}

/// A (region, polity) pair a new character can be anchored to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub region_id: String,
    pub region_key: String,
    pub region_value: String,
    pub polity_id: Option<String>,
    pub polity_key: String,
    pub polity_value: String,
}

impl MountPoint {
    /// Prompt lines describing where the character lives.
    pub fn describe(&self) -> String {
        let mut lines = vec![format!("Region: {} {}", self.region_id, self.region_key)];
        if !self.region_value.trim().is_empty() {
            lines.push(format!("Region notes: {}", compact(&self.region_value)));
        }
        if let Some(polity_id) = &self.polity_id {
            lines.push(format!("Polity: {} {}", polity_id, self.polity_key));
            if !self.polity_value.trim().is_empty() {
                lines.push(format!("Polity notes: {}", compact(&self.polity_value)));
            }
        }
        lines.join("\n")
    }
}
