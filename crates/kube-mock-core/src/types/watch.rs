//! Watch event wire format.

use crate::types::resource::resource_version;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventType {
    Added,
    Modified,
    Deleted,
    Error,
}

/// One line of a watch stream: `{"type": "ADDED", "object": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchEvent {
    #[serde(rename = "type")]
    pub event_type: WatchEventType,
    pub object: Value,
}

impl WatchEvent {
    pub fn new(event_type: WatchEventType, object: Value) -> Self {
        Self { event_type, object }
    }

    /// Version of the object carried by the event.
    pub fn resource_version(&self) -> Option<u64> {
        resource_version(&self.object)
    }

    /// Serialized as a single line, newline terminated.
    pub fn to_line(&self) -> String {
        let mut line = serde_json::to_string(self).unwrap_or_default();
        line.push('\n');
        line
    }
}
