//! Image uplink over the modem's MQTT client

mod transmitter;

pub use transmitter::{EncoderConfig, FrameTransmitter};
