use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use crate::common::MacAddress;
use crate::error::Result;
use crate::gpio::{hardware_error, PowerSense};

/// How long the strobe is held high, like a short press of the power switch.
pub const STROBE_PULSE_MS: u32 = 100;
/// Grace period between the pulse and the first power check.
pub const SETTLE_DELAY_MS: u32 = 1000;
pub const POLL_INTERVAL_MS: u32 = 1000;
/// Number of one-second waits for the sense line to report power.
pub const WAIT_FOR_POWER_ON: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeOutcome {
    /// Machine was already on; the strobe was not touched.
    Ignored,
    /// Power came up after `polls` one-second waits.
    Succeeded { polls: u32 },
    TimedOut { polls: u32 },
}

/// Result of handling one magic packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeAttempt {
    pub target: MacAddress,
    /// Ethernet source of the triggering frame.
    pub source: Option<MacAddress>,
    pub outcome: WakeOutcome,
}

/// Drives the strobe and sense lines for one proxied machine.
///
/// Each call to [`WakeSequencer::wake`] runs to a terminal outcome before it
/// returns and pulses the strobe at most once. Timeouts are reported, never
/// retried: the next chance to wake is the next magic packet.
pub struct WakeSequencer<S, O, D> {
    target: MacAddress,
    sense: PowerSense<S>,
    strobe: O,
    delay: D,
    wait_for_power_on: u32,
}

impl<S: InputPin, O: OutputPin, D: DelayNs> WakeSequencer<S, O, D> {
    pub fn new(target: MacAddress, sense: PowerSense<S>, strobe: O, delay: D) -> Self {
        Self {
            target,
            sense,
            strobe,
            delay,
            wait_for_power_on: WAIT_FOR_POWER_ON,
        }
    }

    pub fn with_wait_for_power_on(mut self, waits: u32) -> Self {
        self.wait_for_power_on = waits;
        self
    }

    pub fn target(&self) -> MacAddress {
        self.target
    }

    pub fn wake(&mut self, source: Option<MacAddress>) -> Result<WakeAttempt> {
        let from = source.map_or_else(|| "unknown".to_string(), |mac| mac.to_string());
        let target = self.target;
        let attempt = |outcome| WakeAttempt { target, source, outcome };

        if !self.sense.is_power_off()? {
            log::info!("WOL received from {from} for {target}; IGNORING! (already awake)");
            return Ok(attempt(WakeOutcome::Ignored));
        }

        log::info!("WOL received from {from} for {target}; WAKING!");
        self.pulse()?;
        self.delay.delay_ms(SETTLE_DELAY_MS);

        let outcome = self.verify()?;
        match outcome {
            WakeOutcome::Succeeded { polls } => {
                log::info!("Computer is awake (after {polls} s of waiting)");
            }
            WakeOutcome::TimedOut { polls } => {
                log::warn!("Could not wake computer! (still off after {polls} s of waiting)");
            }
            WakeOutcome::Ignored => {}
        }
        Ok(attempt(outcome))
    }

    fn pulse(&mut self) -> Result<()> {
        self.strobe.set_high().map_err(|e| hardware_error("wake strobe", e))?;
        self.delay.delay_ms(STROBE_PULSE_MS);
        self.strobe.set_low().map_err(|e| hardware_error("wake strobe", e))
    }

    fn verify(&mut self) -> Result<WakeOutcome> {
        for polls in 0..self.wait_for_power_on {
            if !self.sense.is_power_off()? {
                return Ok(WakeOutcome::Succeeded { polls });
            }
            log::info!("Computer still not awake; WAITING!");
            self.delay.delay_ms(POLL_INTERVAL_MS);
        }

        let polls = self.wait_for_power_on;
        Ok(if self.sense.is_power_off()? {
            WakeOutcome::TimedOut { polls }
        } else {
            WakeOutcome::Succeeded { polls }
        })
    }
}
