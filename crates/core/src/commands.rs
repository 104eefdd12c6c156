use std::fmt;

use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandField {
    Temperature,
    Rate,
}

impl fmt::Display for CommandField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandField::Temperature => f.write_str("temperature"),
            CommandField::Rate => f.write_str("rate"),
        }
    }
}

/// Operator text for one device, exactly as typed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInput {
    pub temperature: String,
    pub rate: String,
}

impl CommandInput {
    pub fn new(temperature: impl Into<String>, rate: impl Into<String>) -> Self {
        Self { temperature: temperature.into(), rate: rate.into() }
    }
}

/// Validated set-point for one device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CommandEntry {
    #[serde(rename = "T")]
    pub temperature: f64,
    pub rate: f64,
}

/// One entry per configured device, in registry order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OutboundCommandBatch {
    entries: Vec<(String, CommandEntry)>,
}

impl OutboundCommandBatch {
    pub(crate) fn push(&mut self, device_id: String, entry: CommandEntry) {
        self.entries.push((device_id, entry));
    }

    pub fn entries(&self) -> &[(String, CommandEntry)] {
        &self.entries
    }

    pub fn get(&self, device_id: &str) -> Option<&CommandEntry> {
        self.entries.iter().find(|(id, _)| id == device_id).map(|(_, e)| e)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Written as a map in insertion order so the payload is stable byte for byte.
impl Serialize for OutboundCommandBatch {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, entry) in &self.entries {
            map.serialize_entry(id, entry)?;
        }
        map.end()
    }
}

/// Serializes the batch into the control-topic payload
/// `{"<id>": {"T": .., "rate": ..}, ...}`.
pub fn encode(batch: &OutboundCommandBatch) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(batch)
}
