// lrsc-core: Supervised connections and message bridging between an LRSC concentrator and the IoT platform.

pub mod bridge;
pub mod cloud;
pub mod config;
pub mod device;
pub mod error;
pub mod model;
pub mod service;
pub mod status;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use cloud::CloudBridge;
pub use config::{BridgeConfig, CloudConfig, CloudCredentials, DeviceConfig};
pub use device::{ConnectionState, DeviceConnection};
pub use error::CoreError;
pub use model::{Command, Event};
pub use service::BridgeService;
pub use status::StatusReporter;
pub use supervisor::{BackoffConfig, Supervised, Supervisor};
