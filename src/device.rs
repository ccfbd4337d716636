use serde_json::{Map, Value};
use std::sync::Mutex;
use thiserror::Error;

use crate::model::{Command, ConfigDocument, DeviceInfo};

/// Failure raised by a device-specific hook. The engine only logs
/// these, so the payload is a plain message.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct DeviceError(String);

impl DeviceError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Result of applying a configuration document to the device.
#[derive(Debug, Clone, Copy, Default)]
pub struct Applied {
    /// The device needs a restart for the configuration to take
    /// effect. The engine requests it only after the follow-up push
    /// succeeded.
    pub restart_required: bool,
}

/// Capability interface implemented per device variant.
///
/// The sync engine drives everything device-specific through this
/// trait and nothing else. Every method has a safe default so a
/// variant only implements what it supports.
pub trait Device: Send + Sync {
    /// Stamp the device's current local values into the default
    /// working document during initial sync.
    fn collect_local_values(&self, _doc: &mut ConfigDocument) {}

    /// Re-stamp read-only fields the hub may have returned as null,
    /// before a document is pushed back.
    fn override_read_only_fields(&self, _doc: &mut ConfigDocument) {}

    /// Apply a freshly adopted configuration document.
    fn apply_configuration(&self, _doc: &ConfigDocument) -> Result<Applied, DeviceError> {
        Ok(Applied::default())
    }

    /// Whether this device knows how to execute the named command.
    /// Unrecognized commands are dropped by the engine without a
    /// status report.
    fn recognizes_command(&self, _name: &str) -> bool {
        false
    }

    /// Execute a remote command. Only called for names the device
    /// [recognizes](Self::recognizes_command).
    fn apply_command(&self, _cmd: &Command) -> Result<(), DeviceError> {
        Ok(())
    }

    /// Collect the free-text diagnostic dump reported on a `dump`
    /// command.
    fn collect_diagnostic_dump(&self) -> Result<String, DeviceError> {
        Ok(String::new())
    }

    /// Notification that a new configuration document was committed.
    fn on_config_applied(&self, _doc: &ConfigDocument) {}

    /// Notification that the device info document was re-fetched.
    fn on_device_info_updated(&self, _info: &DeviceInfo) {}

    /// Ask the device to restart itself.
    fn request_restart(&self) {}
}

/// Generic key/value device variant.
///
/// Holds arbitrary properties under a single `properties` object in
/// the document payload and recognizes no remote commands. Useful as
/// the device side for integrations that have no dedicated variant.
#[derive(Default)]
pub struct CustomDevice {
    properties: Mutex<Map<String, Value>>,
}

impl CustomDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert a property; it is included in the next collected or
    /// pushed document.
    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        let mut props = self.properties.lock().expect("properties lock poisoned");
        props.insert(key.into(), value);
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        let props = self.properties.lock().expect("properties lock poisoned");
        props.get(key).cloned()
    }
}

impl Device for CustomDevice {
    fn collect_local_values(&self, doc: &mut ConfigDocument) {
        let props = self.properties.lock().expect("properties lock poisoned");
        if !props.is_empty() {
            doc.set("properties", Value::Object(props.clone()));
        }
    }

    fn on_config_applied(&self, doc: &ConfigDocument) {
        if let Some(Value::Object(props)) = doc.get("properties") {
            let mut local = self.properties.lock().expect("properties lock poisoned");
            *local = props.clone();
        }
    }
}
