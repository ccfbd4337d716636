use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The versioned configuration document owned by the sync engine.
///
/// Everything besides `version` and `last_updated` is device-specific
/// and kept as an opaque JSON object; the engine only ever moves it
/// around whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigDocument {
    /// Monotonically increasing document version. A value of 0 on the
    /// wire means the device has never been provisioned.
    #[serde(default)]
    pub version: u64,

    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,

    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Default for ConfigDocument {
    fn default() -> Self {
        Self {
            version: 1,
            last_updated: Utc::now(),
            payload: Map::new(),
        }
    }
}

impl ConfigDocument {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.payload.insert(key.into(), value);
    }
}

/// Device info document as held by the hub. Opaque to the engine
/// beyond its version, which drives re-fetching on drift.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DeviceInfo {
    #[serde(default)]
    pub version: u64,

    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

/// Server acknowledgement to a telemetry flush. Besides confirming
/// receipt it carries the signals that drive every follow-up action
/// of the engine.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryAck {
    #[serde(default)]
    pub success: bool,

    /// Newer configuration waiting on the hub.
    #[serde(default)]
    pub config_version: u64,

    /// Newer device info waiting on the hub.
    #[serde(default)]
    pub info_version: u64,

    /// A command is queued for this device.
    #[serde(default, rename = "command")]
    pub command_pending: bool,

    #[serde(default, rename = "new_licenses")]
    pub new_licenses_pending: bool,
}

/// Response to a configuration push. `version` is the authoritative
/// version the hub assigned to the document.
#[derive(Debug, Clone, Deserialize)]
pub struct SetConfigResponse {
    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    InProgress,
    Done,
}

/// A single pending remote command. The hub queues at most one at a
/// time per device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: u64,
    pub status: CommandStatus,
    pub name: String,

    #[serde(default)]
    pub parameters: Option<String>,

    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DumpResponse {
    #[serde(default)]
    pub success: bool,

    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_version_deserializes_as_unprovisioned() {
        let doc: ConfigDocument = serde_json::from_value(json!({
            "networkProperties": { "hostName": "room-14" }
        }))
        .unwrap();

        assert_eq!(doc.version, 0);
        assert_eq!(
            doc.get("networkProperties"),
            Some(&json!({ "hostName": "room-14" }))
        );
    }

    #[test]
    fn payload_round_trips_through_flatten() {
        let mut doc = ConfigDocument::default();
        doc.set("generalProperties", json!({ "fwVersion": "2.7001" }));

        let value = serde_json::to_value(&doc).unwrap();
        assert_eq!(value["version"], json!(1));
        assert_eq!(value["generalProperties"]["fwVersion"], json!("2.7001"));

        let back: ConfigDocument = serde_json::from_value(value).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn telemetry_ack_uses_wire_field_names() {
        let ack: TelemetryAck = serde_json::from_value(json!({
            "success": true,
            "config_version": 4,
            "info_version": 2,
            "command": true,
            "new_licenses": false
        }))
        .unwrap();

        assert!(ack.success);
        assert_eq!(ack.config_version, 4);
        assert!(ack.command_pending);
        assert!(!ack.new_licenses_pending);
    }

    #[test]
    fn command_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(CommandStatus::InProgress).unwrap(),
            json!("in_progress")
        );
        let cmd: Command = serde_json::from_value(json!({
            "id": 12,
            "status": "pending",
            "name": "reboot"
        }))
        .unwrap();
        assert_eq!(cmd.status, CommandStatus::Pending);
        assert!(cmd.parameters.is_none());
    }
}
