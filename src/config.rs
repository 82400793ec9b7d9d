//! Context configuration.
//!
//! Read from TOML; every field has a default, so an empty file is valid.
//!
//! ```toml
//! include_default_vendors = true
//! vendor_files = ["vendors/extra.json", "/etc/padlink/site.toml"]
//!
//! [hid]
//! read_timeout_ms = 50
//! report_buffer_len = 64
//!
//! [usb]
//! read_timeout_ms = 50
//! report_buffer_len = 64
//! transfers_in_flight = 4
//! write_timeout_ms = 1000
//! ```
//!
//! Relative `vendor_files` entries are resolved against the directory of the
//! config file when loaded with [`GamepadConfig::load`]. Zero buffer sizes,
//! timeouts and transfer counts are rejected at load time.

use crate::error::{GamepadError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GamepadConfig {
    /// Register the built-in signature table before any `vendor_files`.
    pub include_default_vendors: bool,
    /// Extra definition files, JSON or TOML (by extension), loaded in order.
    pub vendor_files: Vec<PathBuf>,
    pub hid: HidConfig,
    pub usb: UsbConfig,
}

impl Default for GamepadConfig {
    fn default() -> Self {
        Self {
            include_default_vendors: true,
            vendor_files: Vec::new(),
            hid: HidConfig::default(),
            usb: UsbConfig::default(),
        }
    }
}

fn nonzero(section: &str, field: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(GamepadError::InvalidConfig(format!(
            "{section}.{field} must be greater than zero"
        )));
    }
    Ok(())
}

/// Settings for the `hidapi` backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HidConfig {
    /// How long a reader thread blocks before rechecking its stop flag.
    pub read_timeout_ms: u64,
    /// Size of the per-device read buffer.
    pub report_buffer_len: usize,
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 50,
            report_buffer_len: 64,
        }
    }
}

impl HidConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// A zero-length buffer or timeout turns the reader into a busy loop.
    pub fn validate(&self) -> Result<()> {
        nonzero("hid", "read_timeout_ms", self.read_timeout_ms)?;
        nonzero("hid", "report_buffer_len", self.report_buffer_len as u64)
    }
}

/// Settings for the raw USB backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbConfig {
    /// How long a reader thread waits for a completed transfer before rechecking
    /// its stop flag.
    pub read_timeout_ms: u64,
    /// Size of each inbound transfer buffer. Rounded up to the endpoint's max
    /// packet size by the host stack.
    pub report_buffer_len: usize,
    /// Inbound transfers kept queued so no report is lost between completions.
    pub transfers_in_flight: usize,
    /// Upper bound for one outbound (startup) packet.
    pub write_timeout_ms: u64,
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: 50,
            report_buffer_len: 64,
            transfers_in_flight: 4,
            write_timeout_ms: 1000,
        }
    }
}

impl UsbConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        nonzero("usb", "read_timeout_ms", self.read_timeout_ms)?;
        nonzero("usb", "report_buffer_len", self.report_buffer_len as u64)?;
        nonzero("usb", "transfers_in_flight", self.transfers_in_flight as u64)?;
        nonzero("usb", "write_timeout_ms", self.write_timeout_ms)
    }
}

impl GamepadConfig {
    /// Parse and validate.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.hid.validate()?;
        self.usb.validate()
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_toml_str(&std::fs::read_to_string(path)?)?;
        if let Some(base) = path.parent() {
            for file in &mut config.vendor_files {
                if file.is_relative() {
                    *file = base.join(&*file);
                }
            }
        }
        Ok(config)
    }
}
