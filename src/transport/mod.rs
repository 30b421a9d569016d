//! Byte channels to the modem's AT port

pub mod serial;
pub mod simulated;
pub mod traits;

pub use serial::{SerialChannel, SerialConfig};
pub use simulated::SimulatedModem;
pub use traits::{read_available, ModemChannel};

#[cfg(test)]
pub use simulated::{DeviceLog, SimulatedChannel};
