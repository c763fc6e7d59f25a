//! Linux sysfs [`PinBackend`].
//!
//! Digital outputs go through the legacy GPIO interface and enable lines
//! through the PWM class:
//!
//! | Operation | Files written |
//! |---|---|
//! | claim GPIO *n* | `<gpio_root>/export`, `gpio<n>/direction` = `out`, `gpio<n>/value` = `0` |
//! | set level | `gpio<n>/value` |
//! | release GPIO | `gpio<n>/value` = `0`, `<gpio_root>/unexport` |
//! | claim PWM *ch* | `<pwm_root>/pwmchip<c>/export`, `pwm<ch>/period`, `duty_cycle` = `0`, `enable` = `1` |
//! | set duty | `pwm<ch>/duty_cycle` (nanoseconds) |
//! | release PWM | `duty_cycle` = `0`, `enable` = `0`, `pwmchip<c>/unexport` |
//!
//! For PWM the pin number handed to [`PinBackend::pwm`] is the channel index
//! on the configured chip.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use visdrive_types::{DriveError, DutyCycle};

use crate::pins::{DigitalPin, Level, PinBackend, PwmPin};

fn write_attr(path: &Path, value: &str) -> Result<(), DriveError> {
    fs::write(path, value).map_err(|e| {
        DriveError::hardware(path.display().to_string(), format!("write '{value}' failed: {e}"))
    })
}

/// sysfs-backed pin provider.
#[derive(Debug, Clone)]
pub struct SysfsBackend {
    gpio_root: PathBuf,
    pwm_root: PathBuf,
    pwm_chip: u32,
}

impl SysfsBackend {
    pub fn new(gpio_root: impl Into<PathBuf>, pwm_root: impl Into<PathBuf>, pwm_chip: u32) -> Self {
        Self {
            gpio_root: gpio_root.into(),
            pwm_root: pwm_root.into(),
            pwm_chip,
        }
    }

    fn chip_dir(&self) -> PathBuf {
        self.pwm_root.join(format!("pwmchip{}", self.pwm_chip))
    }
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new("/sys/class/gpio", "/sys/class/pwm", 0)
    }
}

impl PinBackend for SysfsBackend {
    fn output(&mut self, pin: u32) -> Result<Box<dyn DigitalPin>, DriveError> {
        let dir = self.gpio_root.join(format!("gpio{pin}"));
        if !dir.exists() {
            write_attr(&self.gpio_root.join("export"), &pin.to_string())?;
        }
        write_attr(&dir.join("direction"), "out")?;
        write_attr(&dir.join("value"), "0")?;
        debug!(pin, "gpio exported");
        Ok(Box::new(SysfsPin {
            pin,
            gpio_root: self.gpio_root.clone(),
            dir,
            level: Level::Low,
            released: false,
        }))
    }

    fn pwm(&mut self, pin: u32, frequency_hz: u32) -> Result<Box<dyn PwmPin>, DriveError> {
        if frequency_hz == 0 {
            return Err(DriveError::hardware(format!("pwm{pin}"), "zero PWM frequency"));
        }
        let chip_dir = self.chip_dir();
        let dir = chip_dir.join(format!("pwm{pin}"));
        if !dir.exists() {
            write_attr(&chip_dir.join("export"), &pin.to_string())?;
        }
        let period_ns = 1_000_000_000u64 / u64::from(frequency_hz);
        write_attr(&dir.join("duty_cycle"), "0")?;
        write_attr(&dir.join("period"), &period_ns.to_string())?;
        write_attr(&dir.join("enable"), "1")?;
        debug!(channel = pin, period_ns, "pwm exported");
        Ok(Box::new(SysfsPwm {
            channel: pin,
            chip_dir,
            dir,
            period_ns,
            duty: DutyCycle::ZERO,
            released: false,
        }))
    }
}

struct SysfsPin {
    pin: u32,
    gpio_root: PathBuf,
    dir: PathBuf,
    level: Level,
    released: bool,
}

impl DigitalPin for SysfsPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn set_level(&mut self, level: Level) -> Result<(), DriveError> {
        if self.released {
            return Err(DriveError::hardware(format!("gpio{}", self.pin), "pin released"));
        }
        write_attr(&self.dir.join("value"), if level.is_high() { "1" } else { "0" })?;
        self.level = level;
        Ok(())
    }

    fn level(&self) -> Level {
        self.level
    }

    fn release(&mut self) -> Result<(), DriveError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let low = write_attr(&self.dir.join("value"), "0");
        self.level = Level::Low;
        let unexport = write_attr(&self.gpio_root.join("unexport"), &self.pin.to_string());
        low.and(unexport)
    }
}

impl Drop for SysfsPin {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(pin = self.pin, error = %e, "gpio release failed");
        }
    }
}

struct SysfsPwm {
    channel: u32,
    chip_dir: PathBuf,
    dir: PathBuf,
    period_ns: u64,
    duty: DutyCycle,
    released: bool,
}

impl SysfsPwm {
    fn duty_ns(&self, duty: DutyCycle) -> u64 {
        self.period_ns * u64::from(duty.percent()) / 100
    }
}

impl PwmPin for SysfsPwm {
    fn pin(&self) -> u32 {
        self.channel
    }

    fn set_duty(&mut self, duty: DutyCycle) -> Result<(), DriveError> {
        if self.released {
            return Err(DriveError::hardware(format!("pwm{}", self.channel), "pwm released"));
        }
        write_attr(&self.dir.join("duty_cycle"), &self.duty_ns(duty).to_string())?;
        self.duty = duty;
        Ok(())
    }

    fn duty(&self) -> DutyCycle {
        self.duty
    }

    fn release(&mut self) -> Result<(), DriveError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.duty = DutyCycle::ZERO;
        let zero = write_attr(&self.dir.join("duty_cycle"), "0");
        let disable = write_attr(&self.dir.join("enable"), "0");
        let unexport = write_attr(&self.chip_dir.join("unexport"), &self.channel.to_string());
        zero.and(disable).and(unexport)
    }
}

impl Drop for SysfsPwm {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(channel = self.channel, error = %e, "pwm release failed");
        }
    }
}
