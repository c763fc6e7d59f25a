//! In-process simulation drivers for CI/CD testing without physical hardware.
//!
//! Every stub here records what it was asked to do so tests can assert on
//! it after the session that owned the stub is gone:
//!
//! | Stub | Observable through |
//! |---|---|
//! | [`SimCamera`] | – (returns blank RGB frames) |
//! | [`ScriptedFrameSource`] | [`SourceProbe`] |
//! | [`SimBackend`] pins | [`PinBoard`] |
//! | [`RecordingDriver`] | [`DriverProbe`] |
//!
//! # Example
//!
//! ```rust
//! use visdrive_hal::sim::RecordingDriver;
//! use visdrive_hal::ActuatorDriver;
//! use visdrive_types::ActuationCommand;
//!
//! let mut driver = RecordingDriver::new("sim_drive");
//! let probe = driver.probe();
//! driver.dispatch(ActuationCommand::stop()).unwrap();
//! assert!(probe.last_attempt().unwrap().is_stop());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use visdrive_types::{ActuationCommand, ChannelCommand, DriveError, DutyCycle};

use crate::actuator::ActuatorDriver;
use crate::camera::{Frame, FrameSource};
use crate::pins::{DigitalPin, Level, PinBackend, PwmPin};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Cameras
// ────────────────────────────────────────────────────────────────────────────

/// A simulated camera that returns a blank RGB frame on every capture.
pub struct SimCamera {
    id: String,
    width: u32,
    height: u32,
    released: bool,
}

impl SimCamera {
    /// A 4×4 blank camera.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_size(id, 4, 4)
    }

    pub fn with_size(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            released: false,
        }
    }
}

impl FrameSource for SimCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn next_frame(&mut self) -> Result<Frame, DriveError> {
        if self.released {
            return Err(DriveError::FrameUnavailable(format!(
                "camera '{}' released",
                self.id
            )));
        }
        Ok(Frame::blank_rgb(self.width, self.height))
    }

    fn release(&mut self) -> Result<(), DriveError> {
        self.released = true;
        Ok(())
    }
}

/// Shared view onto a [`ScriptedFrameSource`] after it has been moved away.
#[derive(Clone, Default)]
pub struct SourceProbe {
    released: Arc<AtomicBool>,
    captures: Arc<AtomicUsize>,
}

impl SourceProbe {
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Number of `next_frame` calls, successful or not.
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::Acquire)
    }
}

/// A frame source that plays back a fixed script of frames and failures,
/// then falls back to blank frames.
pub struct ScriptedFrameSource {
    id: String,
    script: VecDeque<Result<Frame, String>>,
    probe: SourceProbe,
}

impl ScriptedFrameSource {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            script: VecDeque::new(),
            probe: SourceProbe::default(),
        }
    }

    /// Queue a successful capture.
    pub fn then_frame(mut self, frame: Frame) -> Self {
        self.script.push_back(Ok(frame));
        self
    }

    /// Queue a failed capture with the given reason.
    pub fn then_failure(mut self, reason: impl Into<String>) -> Self {
        self.script.push_back(Err(reason.into()));
        self
    }

    pub fn probe(&self) -> SourceProbe {
        self.probe.clone()
    }
}

impl FrameSource for ScriptedFrameSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn next_frame(&mut self) -> Result<Frame, DriveError> {
        self.probe.captures.fetch_add(1, Ordering::AcqRel);
        if self.probe.is_released() {
            return Err(DriveError::FrameUnavailable(format!(
                "source '{}' released",
                self.id
            )));
        }
        match self.script.pop_front() {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(reason)) => Err(DriveError::FrameUnavailable(reason)),
            None => Ok(Frame::blank_rgb(4, 4)),
        }
    }

    fn release(&mut self) -> Result<(), DriveError> {
        self.probe.released.store(true, Ordering::Release);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pins
// ────────────────────────────────────────────────────────────────────────────

/// Observable pin state of a [`SimBackend`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardSnapshot {
    pub levels: BTreeMap<u32, Level>,
    pub duties: BTreeMap<u32, DutyCycle>,
    pub exported: BTreeSet<u32>,
}

/// Shared handle onto the simulated pin header.
#[derive(Clone, Default)]
pub struct PinBoard(Arc<Mutex<BoardSnapshot>>);

impl PinBoard {
    pub fn level(&self, pin: u32) -> Option<Level> {
        lock(&self.0).levels.get(&pin).copied()
    }

    pub fn duty(&self, pin: u32) -> Option<DutyCycle> {
        lock(&self.0).duties.get(&pin).copied()
    }

    pub fn is_exported(&self, pin: u32) -> bool {
        lock(&self.0).exported.contains(&pin)
    }

    pub fn exported_count(&self) -> usize {
        lock(&self.0).exported.len()
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        lock(&self.0).clone()
    }

    fn claim(&self, pin: u32) -> Result<(), DriveError> {
        let mut state = lock(&self.0);
        if !state.exported.insert(pin) {
            return Err(DriveError::hardware(
                format!("gpio{pin}"),
                "pin already claimed",
            ));
        }
        Ok(())
    }

    fn unclaim(&self, pin: u32) {
        lock(&self.0).exported.remove(&pin);
    }
}

/// [`PinBackend`] backed by a [`PinBoard`] instead of real hardware.
#[derive(Default)]
pub struct SimBackend {
    board: PinBoard,
    refused: HashSet<u32>,
    failing: HashSet<u32>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn board(&self) -> PinBoard {
        self.board.clone()
    }

    /// Make claiming `pin` fail.
    pub fn refusing_pin(mut self, pin: u32) -> Self {
        self.refused.insert(pin);
        self
    }

    /// Make every write to `pin` fail after it has been claimed.
    pub fn failing_writes_on(mut self, pin: u32) -> Self {
        self.failing.insert(pin);
        self
    }

    fn check_refused(&self, pin: u32) -> Result<(), DriveError> {
        if self.refused.contains(&pin) {
            return Err(DriveError::hardware(
                format!("gpio{pin}"),
                "simulated claim failure",
            ));
        }
        Ok(())
    }
}

impl PinBackend for SimBackend {
    fn output(&mut self, pin: u32) -> Result<Box<dyn DigitalPin>, DriveError> {
        self.check_refused(pin)?;
        self.board.claim(pin)?;
        lock(&self.board.0).levels.insert(pin, Level::Low);
        Ok(Box::new(SimPin {
            pin,
            board: self.board.clone(),
            failing: self.failing.contains(&pin),
            level: Level::Low,
            released: false,
        }))
    }

    fn pwm(&mut self, pin: u32, frequency_hz: u32) -> Result<Box<dyn PwmPin>, DriveError> {
        self.check_refused(pin)?;
        if frequency_hz == 0 {
            return Err(DriveError::hardware(format!("pwm{pin}"), "zero PWM frequency"));
        }
        self.board.claim(pin)?;
        lock(&self.board.0).duties.insert(pin, DutyCycle::ZERO);
        Ok(Box::new(SimPwm {
            pin,
            board: self.board.clone(),
            failing: self.failing.contains(&pin),
            duty: DutyCycle::ZERO,
            released: false,
        }))
    }
}

struct SimPin {
    pin: u32,
    board: PinBoard,
    failing: bool,
    level: Level,
    released: bool,
}

impl DigitalPin for SimPin {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn set_level(&mut self, level: Level) -> Result<(), DriveError> {
        if self.released || self.failing {
            return Err(DriveError::hardware(
                format!("gpio{}", self.pin),
                "simulated write failure",
            ));
        }
        lock(&self.board.0).levels.insert(self.pin, level);
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
        lock(&self.board.0).levels.insert(self.pin, Level::Low);
        self.level = Level::Low;
        self.board.unclaim(self.pin);
        self.released = true;
        Ok(())
    }
}

impl Drop for SimPin {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

struct SimPwm {
    pin: u32,
    board: PinBoard,
    failing: bool,
    duty: DutyCycle,
    released: bool,
}

impl PwmPin for SimPwm {
    fn pin(&self) -> u32 {
        self.pin
    }

    fn set_duty(&mut self, duty: DutyCycle) -> Result<(), DriveError> {
        if self.released || self.failing {
            return Err(DriveError::hardware(
                format!("pwm{}", self.pin),
                "simulated write failure",
            ));
        }
        lock(&self.board.0).duties.insert(self.pin, duty);
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
        lock(&self.board.0).duties.insert(self.pin, DutyCycle::ZERO);
        self.duty = DutyCycle::ZERO;
        self.board.unclaim(self.pin);
        self.released = true;
        Ok(())
    }
}

impl Drop for SimPwm {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Recording driver
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct ProbeState {
    attempts: Vec<ActuationCommand>,
    applied: Vec<ActuationCommand>,
    releases: usize,
}

/// Shared view onto a [`RecordingDriver`] after it has been moved away.
#[derive(Clone, Default)]
pub struct DriverProbe(Arc<Mutex<ProbeState>>);

impl DriverProbe {
    /// Every command the driver was asked to apply, including rejected ones.
    pub fn attempts(&self) -> Vec<ActuationCommand> {
        lock(&self.0).attempts.clone()
    }

    /// Commands the driver accepted.
    pub fn applied(&self) -> Vec<ActuationCommand> {
        lock(&self.0).applied.clone()
    }

    pub fn last_attempt(&self) -> Option<ActuationCommand> {
        lock(&self.0).attempts.last().copied()
    }

    pub fn release_count(&self) -> usize {
        lock(&self.0).releases
    }

    pub fn is_released(&self) -> bool {
        self.release_count() > 0
    }
}

/// An [`ActuatorDriver`] that records every command instead of moving
/// anything.  Optionally becomes unresponsive after a number of accepted
/// commands.
pub struct RecordingDriver {
    id: String,
    probe: DriverProbe,
    fail_after: Option<usize>,
    released: bool,
}

impl RecordingDriver {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            probe: DriverProbe::default(),
            fail_after: None,
            released: false,
        }
    }

    /// Reject every command once `accepted` commands have been applied.
    pub fn fail_after(mut self, accepted: usize) -> Self {
        self.fail_after = Some(accepted);
        self
    }

    pub fn probe(&self) -> DriverProbe {
        self.probe.clone()
    }
}

impl ActuatorDriver for RecordingDriver {
    fn id(&self) -> &str {
        &self.id
    }

    fn apply(&mut self, left: ChannelCommand, right: ChannelCommand) -> Result<(), DriveError> {
        let command = ActuationCommand { left, right };
        let mut state = lock(&self.probe.0);
        state.attempts.push(command);
        if self.released {
            return Err(DriveError::hardware(&self.id, "driver already released"));
        }
        if let Some(limit) = self.fail_after
            && state.applied.len() >= limit
        {
            return Err(DriveError::hardware(&self.id, "driver unresponsive"));
        }
        state.applied.push(command);
        Ok(())
    }

    fn release(&mut self) -> Result<(), DriveError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        lock(&self.probe.0).releases += 1;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
