//! [`HBridgeDriver`] – dual H-bridge motor driver.
//!
//! Each drive channel is wired to two direction inputs and one PWM enable
//! line.  A [`ChannelCommand`] is translated into pin levels as follows:
//!
//! | Direction | `in_a` | `in_b` | enable duty |
//! |---|---|---|---|
//! | `DriveForward` | High | Low | commanded |
//! | `DriveReverse` | Low | High | commanded |
//! | `Hold` | Low | Low | 0 % |
//!
//! The driver owns every pin it opened.  [`HBridgeDriver::release`] holds
//! both channels before giving the pins back, and runs from `Drop` if nobody
//! called it explicitly.

use tracing::{debug, warn};
use visdrive_types::{ChannelCommand, ChannelDirection, DriveError, DutyCycle};

use crate::actuator::ActuatorDriver;
use crate::pins::{ChannelPins, DigitalPin, Level, PinBackend, PinMap, PwmPin};

// ────────────────────────────────────────────────────────────────────────────
// One side of the bridge
// ────────────────────────────────────────────────────────────────────────────

struct BridgeChannel {
    name: &'static str,
    in_a: Box<dyn DigitalPin>,
    in_b: Box<dyn DigitalPin>,
    enable: Box<dyn PwmPin>,
}

impl BridgeChannel {
    fn open(
        name: &'static str,
        pins: &ChannelPins,
        frequency_hz: u32,
        backend: &mut dyn PinBackend,
    ) -> Result<Self, DriveError> {
        let in_a = backend.output(pins.in_a)?;
        let in_b = backend.output(pins.in_b)?;
        let enable = backend.pwm(pins.enable, frequency_hz)?;
        Ok(Self {
            name,
            in_a,
            in_b,
            enable,
        })
    }

    fn apply(&mut self, command: ChannelCommand) -> Result<(), DriveError> {
        let (a, b, duty) = match command.direction {
            ChannelDirection::DriveForward => (Level::High, Level::Low, command.duty_cycle),
            ChannelDirection::DriveReverse => (Level::Low, Level::High, command.duty_cycle),
            ChannelDirection::Hold => (Level::Low, Level::Low, DutyCycle::ZERO),
        };
        // Cut power before flipping direction lines so the bridge never
        // sees both inputs high under load.
        if a != self.in_a.level() || b != self.in_b.level() {
            self.enable.set_duty(DutyCycle::ZERO)?;
        }
        self.in_a.set_level(a)?;
        self.in_b.set_level(b)?;
        self.enable.set_duty(duty)
    }

    /// Release all three pins, reporting the first failure.
    fn release(&mut self) -> Result<(), DriveError> {
        let results = [
            self.enable.release(),
            self.in_a.release(),
            self.in_b.release(),
        ];
        results.into_iter().collect::<Result<Vec<()>, _>>().map(|_| ())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// HBridgeDriver
// ────────────────────────────────────────────────────────────────────────────

/// Two-channel H-bridge driver implementing [`ActuatorDriver`].
///
/// # Example
///
/// ```rust
/// use visdrive_hal::hbridge::HBridgeDriver;
/// use visdrive_hal::pins::{Level, PinMap};
/// use visdrive_hal::sim::SimBackend;
/// use visdrive_hal::ActuatorDriver;
/// use visdrive_types::{ChannelCommand, DutyCycle};
///
/// let mut backend = SimBackend::new();
/// let board = backend.board();
/// let map = PinMap::default();
/// let mut driver = HBridgeDriver::open(&mut backend, &map).unwrap();
///
/// let duty = DutyCycle::new(75).unwrap();
/// driver.apply(ChannelCommand::forward(duty), ChannelCommand::forward(duty)).unwrap();
/// assert_eq!(board.level(map.left.in_a), Some(Level::High));
/// assert_eq!(board.duty(map.right.enable), Some(duty));
/// ```
pub struct HBridgeDriver {
    left: BridgeChannel,
    right: BridgeChannel,
    released: bool,
}

impl HBridgeDriver {
    /// Open every pin in `map` through `backend`.
    ///
    /// Pins opened before a failure are released again (each pin releases
    /// itself on drop).
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::InvalidConfig`] for an invalid map and
    /// [`DriveError::HardwareFault`] if any pin cannot be claimed.
    pub fn open(backend: &mut dyn PinBackend, map: &PinMap) -> Result<Self, DriveError> {
        map.validate()?;
        let left = BridgeChannel::open("left", &map.left, map.pwm_frequency_hz, backend)?;
        let right = BridgeChannel::open("right", &map.right, map.pwm_frequency_hz, backend)?;
        debug!(
            left = ?map.left,
            right = ?map.right,
            frequency_hz = map.pwm_frequency_hz,
            "h-bridge pins claimed"
        );
        Ok(Self {
            left,
            right,
            released: false,
        })
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl ActuatorDriver for HBridgeDriver {
    fn id(&self) -> &str {
        "hbridge"
    }

    fn apply(&mut self, left: ChannelCommand, right: ChannelCommand) -> Result<(), DriveError> {
        if self.released {
            return Err(DriveError::hardware("hbridge", "driver already released"));
        }
        self.left.apply(left)?;
        self.right.apply(right)?;
        debug!(
            channel_left = self.left.name,
            left = ?left,
            channel_right = self.right.name,
            right = ?right,
            "h-bridge command applied"
        );
        Ok(())
    }

    fn release(&mut self) -> Result<(), DriveError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let hold = self
            .left
            .apply(ChannelCommand::hold())
            .and(self.right.apply(ChannelCommand::hold()));
        let left = self.left.release();
        let right = self.right.release();
        hold.and(left).and(right)
    }
}

impl Drop for HBridgeDriver {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release() {
                warn!(error = %e, "h-bridge release on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBackend;

    fn duty(p: u8) -> DutyCycle {
        DutyCycle::new(p).unwrap()
    }

    #[test]
    fn forward_sets_in_a_high_on_both_channels() {
        let mut backend = SimBackend::new();
        let board = backend.board();
        let map = PinMap::default();
        let mut driver = HBridgeDriver::open(&mut backend, &map).unwrap();

        driver
            .apply(ChannelCommand::forward(duty(75)), ChannelCommand::forward(duty(75)))
            .unwrap();

        for side in [map.left, map.right] {
            assert_eq!(board.level(side.in_a), Some(Level::High));
            assert_eq!(board.level(side.in_b), Some(Level::Low));
            assert_eq!(board.duty(side.enable), Some(duty(75)));
        }
    }

    #[test]
    fn turn_left_reverses_left_channel_only() {
        let mut backend = SimBackend::new();
        let board = backend.board();
        let map = PinMap::default();
        let mut driver = HBridgeDriver::open(&mut backend, &map).unwrap();

        driver
            .apply(ChannelCommand::reverse(duty(50)), ChannelCommand::forward(duty(50)))
            .unwrap();

        assert_eq!(board.level(map.left.in_a), Some(Level::Low));
        assert_eq!(board.level(map.left.in_b), Some(Level::High));
        assert_eq!(board.level(map.right.in_a), Some(Level::High));
        assert_eq!(board.level(map.right.in_b), Some(Level::Low));
    }

    #[test]
    fn hold_forces_zero_duty_and_low_inputs() {
        let mut backend = SimBackend::new();
        let board = backend.board();
        let map = PinMap::default();
        let mut driver = HBridgeDriver::open(&mut backend, &map).unwrap();

        driver
            .apply(ChannelCommand::forward(duty(80)), ChannelCommand::forward(duty(80)))
            .unwrap();
        driver.apply(ChannelCommand::hold(), ChannelCommand::hold()).unwrap();

        assert_eq!(board.level(map.left.in_a), Some(Level::Low));
        assert_eq!(board.duty(map.left.enable), Some(DutyCycle::ZERO));
        assert_eq!(board.duty(map.right.enable), Some(DutyCycle::ZERO));
    }

    #[test]
    fn repeated_hold_is_idempotent() {
        let mut backend = SimBackend::new();
        let board = backend.board();
        let mut driver = HBridgeDriver::open(&mut backend, &PinMap::default()).unwrap();

        driver.apply(ChannelCommand::hold(), ChannelCommand::hold()).unwrap();
        let snapshot = board.snapshot();
        for _ in 0..5 {
            driver.apply(ChannelCommand::hold(), ChannelCommand::hold()).unwrap();
        }
        assert_eq!(board.snapshot(), snapshot);
    }

    #[test]
    fn release_unexports_every_pin_and_is_idempotent() {
        let mut backend = SimBackend::new();
        let board = backend.board();
        let map = PinMap::default();
        let mut driver = HBridgeDriver::open(&mut backend, &map).unwrap();
        assert_eq!(board.exported_count(), 6);

        driver
            .apply(ChannelCommand::forward(duty(75)), ChannelCommand::forward(duty(75)))
            .unwrap();
        driver.release().unwrap();
        assert!(driver.is_released());
        assert_eq!(board.exported_count(), 0);
        assert_eq!(board.duty(map.left.enable), Some(DutyCycle::ZERO));

        driver.release().unwrap();
        assert!(driver.apply(ChannelCommand::hold(), ChannelCommand::hold()).is_err());
    }

    #[test]
    fn drop_releases_pins() {
        let mut backend = SimBackend::new();
        let board = backend.board();
        {
            let _driver = HBridgeDriver::open(&mut backend, &PinMap::default()).unwrap();
            assert_eq!(board.exported_count(), 6);
        }
        assert_eq!(board.exported_count(), 0);
    }

    #[test]
    fn failed_open_leaves_no_pin_claimed() {
        let map = PinMap::default();
        let mut backend = SimBackend::new().refusing_pin(map.right.enable);
        let board = backend.board();
        let result = HBridgeDriver::open(&mut backend, &map);
        assert!(matches!(result, Err(DriveError::HardwareFault { .. })));
        assert_eq!(board.exported_count(), 0);
    }

    #[test]
    fn faulty_pin_surfaces_hardware_fault() {
        let map = PinMap::default();
        let mut backend = SimBackend::new().failing_writes_on(map.left.in_a);
        let mut driver = HBridgeDriver::open(&mut backend, &map).unwrap();
        let result =
            driver.apply(ChannelCommand::forward(duty(75)), ChannelCommand::forward(duty(75)));
        assert!(matches!(result, Err(DriveError::HardwareFault { .. })));
    }
}
