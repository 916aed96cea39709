//! Configuration change events.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of change applied to a team configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpdateType {
    Add,
    Update,
    Delete,
}

impl UpdateType {
    /// Lowercase label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Add => "add",
            UpdateType::Update => "update",
            UpdateType::Delete => "delete",
        }
    }
}

/// Keys owned by the envelope; stripped from the document on construction.
const ENVELOPE_KEYS: [&str; 3] = ["Team", "UpdateType", "UpdateTime"];

/// A change notification: the changed configuration document plus envelope.
///
/// Serializes to a flat JSON object, e.g.
/// `{"Team":"payments","UpdateType":"Add","UpdateTime":1700000000,"Name":"5xx-rate",...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Team owning the configuration.
    #[serde(rename = "Team")]
    pub team: String,

    #[serde(rename = "UpdateType")]
    pub update_type: UpdateType,

    /// Seconds since epoch; defaults to now when absent on input.
    #[serde(rename = "UpdateTime", default = "unix_now")]
    pub update_time: u64,

    /// The configuration fields as submitted.
    #[serde(flatten)]
    pub document: Map<String, Value>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl ChangeEvent {
    /// Create an event stamped with the current time.
    pub fn new(team: impl Into<String>, update_type: UpdateType, mut document: Map<String, Value>) -> Self {
        for key in ENVELOPE_KEYS {
            document.remove(key);
        }
        Self {
            team: team.into(),
            update_type,
            update_time: unix_now(),
            document,
        }
    }

    /// Name of the changed configuration, if the document carries one.
    pub fn config_name(&self) -> Option<&str> {
        self.document.get("Name").and_then(Value::as_str)
    }

    /// JSON body sent to the queue.
    pub fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
