//! Edge-device agent keeping a device's configuration in sync with a
//! versioned hub service.
//!
//! The agent reconciles three copies of the device configuration (the
//! on-disk cache, the device's live state, and the hub's record),
//! flushes telemetry on change and on a keep-alive interval, and
//! executes commands queued on the hub.

pub mod config;
pub mod device;
pub mod model;
pub mod remote;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod types;
pub mod util;

pub use config::AgentConfig;
pub use device::{Applied, CustomDevice, Device, DeviceError};
pub use model::{Command, CommandStatus, ConfigDocument, DeviceInfo, TelemetryAck};
pub use remote::RemoteApi;
pub use store::ConfigStore;
pub use sync::SyncEngine;
pub use telemetry::Telemetry;
pub use types::Uuid;
