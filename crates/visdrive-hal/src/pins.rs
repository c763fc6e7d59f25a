//! Pin-level traits and the motor pin mapping.
//!
//! A [`PinBackend`] hands out [`DigitalPin`]s (direction lines of an
//! H-bridge) and [`PwmPin`]s (enable lines).  Every pin releases itself when
//! dropped, so a driver that fails half-way through opening never leaves an
//! exported pin behind.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use visdrive_types::{DriveError, DutyCycle};

/// Logic level of a digital output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

/// A single digital output line.
pub trait DigitalPin: Send {
    /// Pin number in the backend's numbering scheme (BCM for GPIO).
    fn pin(&self) -> u32;

    /// # Errors
    ///
    /// Returns [`DriveError::HardwareFault`] if the level cannot be written.
    fn set_level(&mut self, level: Level) -> Result<(), DriveError>;

    /// Last level successfully written.
    fn level(&self) -> Level;

    /// Drive the line low and give it back to the system.  Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::HardwareFault`] if the pin cannot be released.
    fn release(&mut self) -> Result<(), DriveError>;
}

/// A PWM output used as a motor enable line.
pub trait PwmPin: Send {
    fn pin(&self) -> u32;

    /// # Errors
    ///
    /// Returns [`DriveError::HardwareFault`] if the duty cycle cannot be set.
    fn set_duty(&mut self, duty: DutyCycle) -> Result<(), DriveError>;

    /// Last duty cycle successfully written.
    fn duty(&self) -> DutyCycle;

    /// Stop the PWM output and give it back to the system.  Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::HardwareFault`] if the output cannot be released.
    fn release(&mut self) -> Result<(), DriveError>;
}

/// Opens pins on some concrete hardware (or simulation).
pub trait PinBackend {
    /// Claim `pin` as a digital output, initially low.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::HardwareFault`] if the pin cannot be claimed.
    fn output(&mut self, pin: u32) -> Result<Box<dyn DigitalPin>, DriveError>;

    /// Claim `pin` as a PWM output at `frequency_hz`, initially 0 % duty.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::HardwareFault`] if the pin cannot be claimed.
    fn pwm(&mut self, pin: u32, frequency_hz: u32) -> Result<Box<dyn PwmPin>, DriveError>;
}

/// Pins wired to one side of the H-bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPins {
    /// High while driving forward.
    pub in_a: u32,
    /// High while driving in reverse.
    pub in_b: u32,
    /// PWM enable line.  The sysfs backend reads this as a PWM channel index.
    pub enable: u32,
}

/// Complete pin mapping for the two-channel drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMap {
    #[serde(default = "default_left")]
    pub left: ChannelPins,
    #[serde(default = "default_right")]
    pub right: ChannelPins,
    #[serde(default = "default_pwm_frequency")]
    pub pwm_frequency_hz: u32,
}

fn default_left() -> ChannelPins {
    ChannelPins {
        in_a: 24,
        in_b: 23,
        enable: 25,
    }
}

fn default_right() -> ChannelPins {
    ChannelPins {
        in_a: 17,
        in_b: 27,
        enable: 22,
    }
}

fn default_pwm_frequency() -> u32 {
    1000
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            left: default_left(),
            right: default_right(),
            pwm_frequency_hz: default_pwm_frequency(),
        }
    }
}

impl PinMap {
    /// Reject mappings that reuse a pin or have a zero PWM frequency.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::InvalidConfig`] describing the first problem.
    pub fn validate(&self) -> Result<(), DriveError> {
        if self.pwm_frequency_hz == 0 {
            return Err(DriveError::InvalidConfig(
                "pwm_frequency_hz must be greater than zero".into(),
            ));
        }
        let all = [
            self.left.in_a,
            self.left.in_b,
            self.left.enable,
            self.right.in_a,
            self.right.in_b,
            self.right.enable,
        ];
        let mut seen = HashSet::new();
        for pin in all {
            if !seen.insert(pin) {
                return Err(DriveError::InvalidConfig(format!(
                    "pin {pin} is assigned more than once"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockPin {
        pin: u32,
        level: Level,
        released: bool,
    }

    impl DigitalPin for MockPin {
        fn pin(&self) -> u32 {
            self.pin
        }

        fn set_level(&mut self, level: Level) -> Result<(), DriveError> {
            self.level = level;
            Ok(())
        }

        fn level(&self) -> Level {
            self.level
        }

        fn release(&mut self) -> Result<(), DriveError> {
            self.level = Level::Low;
            self.released = true;
            Ok(())
        }
    }

    #[test]
    fn mock_pin_toggle_and_release() {
        let mut pin = MockPin {
            pin: 24,
            level: Level::Low,
            released: false,
        };
        pin.set_level(Level::High).unwrap();
        assert!(pin.level().is_high());
        pin.release().unwrap();
        assert_eq!(pin.level(), Level::Low);
        assert!(pin.released);
    }

    #[test]
    fn default_pin_map_is_valid() {
        let map = PinMap::default();
        assert_eq!(map.left.in_a, 24);
        assert_eq!(map.right.enable, 22);
        assert_eq!(map.pwm_frequency_hz, 1000);
        map.validate().unwrap();
    }

    #[test]
    fn duplicate_pins_are_rejected() {
        let mut map = PinMap::default();
        map.right.in_b = map.left.in_a;
        assert!(matches!(map.validate(), Err(DriveError::InvalidConfig(msg)) if msg.contains("24")));
    }

    #[test]
    fn zero_frequency_is_rejected() {
        let map = PinMap {
            pwm_frequency_hz: 0,
            ..PinMap::default()
        };
        assert!(map.validate().is_err());
    }
}
