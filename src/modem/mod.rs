//! SIM7600X modem control
//!
//! This module handles:
//! - AT transactions over an exclusively owned channel
//! - Power-key sequencing
//! - TLS and MQTT session lifecycle
//! - Network diagnostics, SMS and GPS

mod at;
mod gps;
mod network;
mod power;
mod session;

pub use gps::synthetic_position;
pub use power::{PowerKey, RecordedPowerKey, SysfsPowerKey, DEFAULT_POWER_PIN};
pub use session::{ModemSession, MqttEndpoint, Payload, TlsConfig};
