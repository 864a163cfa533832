use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::common::MacAddress;
use crate::error::{Error, Result};
use crate::wake::WAIT_FOR_POWER_ON;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/wake_proxyd.conf";

/// Deserializes an explicit `null` the same way as an absent field.
///
/// Lets `gpio:` with no body fall back to T::default instead of failing.
pub fn deserialize_null_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    T: Default + Deserialize<'de>,
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

pub fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

/// Reads the target MAC address from the line-oriented config file.
pub fn load_target_mac(path: &str) -> Result<MacAddress> {
    let path = expand_path(path);
    let text = fs::read_to_string(&path)
        .map_err(|e| Error::config(&path, None, format!("unable to read: {e}")))?;
    parse_target_mac(&path, &text)
}

/// The first line that is neither blank nor a `#` comment must start with
/// `XX:XX:XX:XX:XX:XX`. Anything after the address is ignored.
pub fn parse_target_mac(path: &Path, text: &str) -> Result<MacAddress> {
    for (idx, line) in text.lines().enumerate() {
        let entry = line.trim_start();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }

        return MacAddress::parse_prefix(entry).map_err(|e| {
            Error::config(path, Some(idx + 1), format!("bad mac address format ({}): {e}", line.trim_end()))
        });
    }

    Err(Error::config(path, None, "no mac address entry found"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WakeMode {
    /// Wake sequences block frame reception.
    #[default]
    Inline,
    /// Wake sequences run on their own thread; triggers arriving meanwhile
    /// are dropped.
    Dedicated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpioSettings {
    pub chip: String,
    pub sense_line: u32,
    pub strobe_line: u32,
    /// Low on the sense line means powered off.
    pub sense_active_low: bool,
}

impl Default for GpioSettings {
    fn default() -> Self {
        Self {
            chip: "/dev/gpiochip0".to_string(),
            sense_line: 22,
            strobe_line: 17,
            sense_active_low: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureSettings {
    pub recv_buffer_size: usize,
    /// Read failures in a row before capture is given up.
    pub max_consecutive_errors: u32,
    pub retry_backoff_ms: u64,
}

impl CaptureSettings {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            recv_buffer_size: 2048,
            max_consecutive_errors: 5,
            retry_backoff_ms: 100,
        }
    }
}

/// Optional daemon settings (YAML). Every field has a default matching the
/// stock wiring, so the file is only needed to deviate from it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Interface to listen on; first usable one if unset.
    pub interface: Option<String>,

    #[serde(deserialize_with = "deserialize_null_default")]
    pub gpio: GpioSettings,

    #[serde(deserialize_with = "deserialize_null_default")]
    pub capture: CaptureSettings,

    pub wait_for_power_on: u32,
    pub wake_mode: WakeMode,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interface: None,
            gpio: GpioSettings::default(),
            capture: CaptureSettings::default(),
            wait_for_power_on: WAIT_FOR_POWER_ON,
            wake_mode: WakeMode::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let path = expand_path(path);
        let file = File::open(&path).map_err(|source| Error::SettingsIo { path: path.clone(), source })?;
        let settings: Settings =
            serde_yml::from_reader(file).map_err(|source| Error::Settings { path: path.clone(), source })?;
        settings.validate(&path)?;
        Ok(settings)
    }

    pub fn validate(&self, path: &Path) -> Result<()> {
        if self.gpio.sense_line == self.gpio.strobe_line {
            return Err(Error::config(path, None, format!(
                "sense and strobe share GPIO line {}", self.gpio.sense_line)));
        }
        if self.capture.recv_buffer_size < crate::magic::MAGIC_PACKET_LEN {
            return Err(Error::config(path, None, format!(
                "capture buffer of {} bytes cannot hold a magic packet", self.capture.recv_buffer_size)));
        }
        Ok(())
    }
}
