//! Power-key control line
//!
//! The hat has no power feedback; switching it on or off means holding the
//! PWRKEY line high for a fixed time, exactly like pressing the button.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::fs;

/// BCM pin wired to the SIM7600X PWRKEY on the Raspberry Pi hat
pub const DEFAULT_POWER_PIN: u32 = 4;

/// A digital output driving the modem's power key
#[async_trait]
pub trait PowerKey: Send {
    /// Drive the line high (pressed) or low (released)
    async fn set_level(&mut self, high: bool) -> Result<()>;
}

/// Power key on a sysfs GPIO line
pub struct SysfsPowerKey {
    value_path: PathBuf,
}

impl SysfsPowerKey {
    /// Export `pin` if needed and configure it as an output
    pub async fn open(pin: u32) -> Result<Self> {
        let base = PathBuf::from("/sys/class/gpio");
        let pin_dir = base.join(format!("gpio{pin}"));

        if fs::metadata(&pin_dir).await.is_err() {
            fs::write(base.join("export"), pin.to_string())
                .await
                .with_context(|| format!("Failed to export GPIO {pin}"))?;
        }
        fs::write(pin_dir.join("direction"), "out")
            .await
            .with_context(|| format!("Failed to set GPIO {pin} as output"))?;

        Ok(Self {
            value_path: pin_dir.join("value"),
        })
    }
}

#[async_trait]
impl PowerKey for SysfsPowerKey {
    async fn set_level(&mut self, high: bool) -> Result<()> {
        fs::write(&self.value_path, if high { "1" } else { "0" })
            .await
            .with_context(|| format!("Failed to write {}", self.value_path.display()))
    }
}

/// Power key that only remembers what it was told
///
/// Used with the simulated modem, where there is no line to drive.
#[derive(Debug, Clone, Default)]
pub struct RecordedPowerKey {
    levels: Arc<Mutex<Vec<bool>>>,
}

impl RecordedPowerKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Levels driven so far, oldest first
    pub fn levels(&self) -> Vec<bool> {
        self.levels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl PowerKey for RecordedPowerKey {
    async fn set_level(&mut self, high: bool) -> Result<()> {
        self.levels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(high);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recorded_levels_are_shared() {
        let key = RecordedPowerKey::new();
        let mut handle = key.clone();
        handle.set_level(true).await.expect("set");
        handle.set_level(false).await.expect("set");
        assert_eq!(key.levels(), vec![true, false]);
    }

    #[tokio::test]
    async fn test_sysfs_key_writes_value_file() {
        let dir = std::env::temp_dir().join(format!("oceanwatch-gpio-{}", std::process::id()));
        fs::create_dir_all(&dir).await.expect("create");
        let mut key = SysfsPowerKey {
            value_path: dir.join("value"),
        };

        key.set_level(true).await.expect("press");
        assert_eq!(fs::read_to_string(dir.join("value")).await.expect("read"), "1");
        key.set_level(false).await.expect("release");
        assert_eq!(fs::read_to_string(dir.join("value")).await.expect("read"), "0");
        let _ = fs::remove_dir_all(&dir).await;
    }
}
