use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::Notify;

/// The full telemetry snapshot sent on every flush.
///
/// Values accumulate in the maps and are never cleared after a send,
/// so a failed flush loses nothing; the next one carries the same
/// data plus whatever changed since.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TelemetryMessage {
    pub common: BTreeMap<String, Value>,
    pub custom: BTreeMap<String, Value>,
}

impl TelemetryMessage {
    /// `status` and `firmware_version` are mandatory fields of the
    /// common section, so they are seeded at construction.
    pub fn new(status: &str, firmware_version: &str) -> Self {
        let mut common = BTreeMap::new();
        common.insert("status".to_owned(), Value::from(status));
        common.insert("firmware_version".to_owned(), Value::from(firmware_version));
        Self {
            common,
            custom: BTreeMap::new(),
        }
    }
}

/// Change-triggered telemetry accumulator.
///
/// Upserts go through a plain mutex (nothing awaits while holding
/// it) and raise a change signal; the engine's run loop owns the
/// single flush path and snapshots the maps under the same lock, so
/// a concurrent upsert is either included in the in-flight send or
/// picked up by the next one.
pub struct Telemetry {
    message: Mutex<TelemetryMessage>,
    changed: Notify,
}

impl Telemetry {
    pub fn new(status: &str, firmware_version: &str) -> Self {
        Self {
            message: Mutex::new(TelemetryMessage::new(status, firmware_version)),
            changed: Notify::new(),
        }
    }

    /// Upsert a key in the common section and signal a change.
    pub fn set_common(&self, key: impl Into<String>, value: Value) {
        {
            let mut msg = self.message.lock().expect("telemetry lock poisoned");
            msg.common.insert(key.into(), value);
        }
        self.changed.notify_one();
    }

    /// Upsert a key in the custom section and signal a change.
    pub fn set_custom(&self, key: impl Into<String>, value: Value) {
        {
            let mut msg = self.message.lock().expect("telemetry lock poisoned");
            msg.custom.insert(key.into(), value);
        }
        self.changed.notify_one();
    }

    /// Update the mandatory status field, riding the normal
    /// change-flush path.
    pub fn update_status(&self, status: &str) {
        self.set_common("status", Value::from(status));
    }

    /// Snapshot of the full current message.
    pub fn snapshot(&self) -> TelemetryMessage {
        self.message.lock().expect("telemetry lock poisoned").clone()
    }

    /// Resolves when a change was signalled since the last call.
    /// Multiple upserts between calls coalesce into one wakeup.
    pub async fn changed(&self) {
        self.changed.notified().await;
    }
}
