//! `visdrive-hal` – Hardware Abstraction Layer.
//!
//! Everything the control loop touches on the physical side sits behind two
//! traits, so the session never knows whether it is driving a robot or a
//! simulator.
//!
//! # Modules
//!
//! - [`camera`] – [`FrameSource`]: anything that can hand over the next
//!   [`Frame`].
//! - [`actuator`] – [`ActuatorDriver`]: a two-channel differential drive that
//!   accepts a left and right
//!   [`ChannelCommand`][visdrive_types::ChannelCommand].
//! - [`pins`] – [`DigitalPin`], [`PwmPin`] and the [`PinBackend`] that hands
//!   them out, plus the [`PinMap`] wiring description.
//! - [`hbridge`] – [`HBridgeDriver`]: turns channel commands into direction
//!   line levels and enable-line duty cycles.
//! - [`sysfs`] – [`SysfsBackend`]: Linux `/sys/class/gpio` and
//!   `/sys/class/pwm` pins.
//! - [`replay`] – [`DirectoryFrameSource`]: cycles through recorded JPEG
//!   frames.
//! - [`sim`] – in-process stubs and probes for headless tests.

pub mod actuator;
pub mod camera;
pub mod hbridge;
pub mod pins;
pub mod replay;
pub mod sim;
pub mod sysfs;

pub use actuator::ActuatorDriver;
pub use camera::{Frame, FrameSource, PixelFormat};
pub use hbridge::HBridgeDriver;
pub use pins::{ChannelPins, DigitalPin, Level, PinBackend, PinMap, PwmPin};
pub use replay::DirectoryFrameSource;
pub use sysfs::SysfsBackend;
