//! Generic `ActuatorDriver` trait for the two-channel differential drive.
//!
//! The control loop never touches pins directly: it hands a left and a right
//! [`ChannelCommand`] to whichever driver the session acquired, so drivers can
//! be swapped (H-bridge over GPIO, simulator, recorder) without touching the
//! decision logic.

use visdrive_types::{ActuationCommand, ChannelCommand, DriveError};

/// A differential-drive motor driver with exactly two channels.
pub trait ActuatorDriver: Send {
    /// Stable identifier for this driver, e.g. `"hbridge"`.
    fn id(&self) -> &str;

    /// Apply one command to each channel.
    ///
    /// Repeated `apply(hold, hold)` calls must be harmless: they never fail
    /// on a healthy driver and never change the output state after the first
    /// call.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::HardwareFault`] if the driver cannot accept the
    /// command.  The session treats this as fatal.
    fn apply(&mut self, left: ChannelCommand, right: ChannelCommand) -> Result<(), DriveError>;

    /// Drive both channels to a hold and give the hardware back.
    ///
    /// Calling `release` more than once is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`DriveError::HardwareFault`] if a resource could not be
    /// released.
    fn release(&mut self) -> Result<(), DriveError>;

    /// Convenience wrapper around [`apply`][Self::apply].
    ///
    /// # Errors
    ///
    /// Same as [`apply`][Self::apply].
    fn dispatch(&mut self, command: ActuationCommand) -> Result<(), DriveError> {
        self.apply(command.left, command.right)
    }
}
