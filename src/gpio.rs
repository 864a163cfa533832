//! Power-sense and wake-strobe lines.
//!
//! The sequencer only sees `embedded-hal` pins and delays. On Linux the pins
//! are lines of a GPIO character device (`/dev/gpiochipN`).

use std::fmt;
use std::thread;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{self, ErrorKind, ErrorType, InputPin, OutputPin};
use gpio_cdev::{Chip, LineHandle, LineRequestFlags};

use crate::error::{Error, Result};

const CONSUMER: &str = "wake-proxyd";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    On,
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::Off => f.write_str("OFF"),
            PowerState::On => f.write_str("ON"),
        }
    }
}

/// Reads the proxied machine's power state from the sense line. Never cached:
/// the machine can be switched on or off by hand at any time.
pub struct PowerSense<P> {
    line: P,
    active_low: bool,
}

impl<P: InputPin> PowerSense<P> {
    /// With `active_low == false` a high line means the machine is off.
    pub fn new(line: P, active_low: bool) -> Self {
        Self { line, active_low }
    }

    pub fn is_power_off(&mut self) -> Result<bool> {
        let high = self.line.is_high().map_err(|e| hardware_error("power sense", e))?;
        Ok(high != self.active_low)
    }

    pub fn state(&mut self) -> Result<PowerState> {
        Ok(if self.is_power_off()? { PowerState::Off } else { PowerState::On })
    }
}

pub(crate) fn hardware_error<E: digital::Error>(line: &'static str, e: E) -> Error {
    Error::Hardware { line, reason: format!("{e:?}") }
}

/// Error of a character-device line.
#[derive(Debug)]
pub struct LineError(gpio_cdev::Error);

impl fmt::Display for LineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl digital::Error for LineError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// One requested line of a GPIO character device.
pub struct CdevLine {
    handle: LineHandle,
}

impl ErrorType for CdevLine {
    type Error = LineError;
}

impl InputPin for CdevLine {
    fn is_high(&mut self) -> std::result::Result<bool, LineError> {
        self.handle.get_value().map(|v| v != 0).map_err(LineError)
    }

    fn is_low(&mut self) -> std::result::Result<bool, LineError> {
        self.is_high().map(|high| !high)
    }
}

impl OutputPin for CdevLine {
    fn set_low(&mut self) -> std::result::Result<(), LineError> {
        self.handle.set_value(0).map_err(LineError)
    }

    fn set_high(&mut self) -> std::result::Result<(), LineError> {
        self.handle.set_value(1).map_err(LineError)
    }
}

/// Requests the strobe line (driven low) and then the sense line.
///
/// Returns `(sense, strobe)`.
pub fn open_lines(chip_path: &str, sense_line: u32, strobe_line: u32) -> Result<(CdevLine, CdevLine)> {
    let mut chip = Chip::new(chip_path).map_err(init_error(format!("chip {chip_path}")))?;
    log::debug!("opened GPIO chip '{}' ({} lines)", chip.name(), chip.num_lines());

    let strobe = chip
        .get_line(strobe_line)
        .and_then(|l| l.request(LineRequestFlags::OUTPUT, 0, CONSUMER))
        .map_err(init_error(format!("strobe line {strobe_line}")))?;

    let sense = chip
        .get_line(sense_line)
        .and_then(|l| l.request(LineRequestFlags::INPUT, 0, CONSUMER))
        .map_err(init_error(format!("sense line {sense_line}")))?;

    Ok((CdevLine { handle: sense }, CdevLine { handle: strobe }))
}

fn init_error(what: String) -> impl FnOnce(gpio_cdev::Error) -> Error {
    move |source| Error::HardwareInit { what, source }
}

/// Blocking delay on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadDelay;

impl DelayNs for ThreadDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(ns.into()));
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms.into()));
    }
}
