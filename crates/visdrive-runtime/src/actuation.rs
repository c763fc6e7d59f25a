//! [`ActuationMapper`] – directive to per-channel motor commands.
//!
//! | Directive | Left channel | Right channel |
//! |---|---|---|
//! | Forward | Drive-Forward | Drive-Forward |
//! | Backward | Drive-Reverse | Drive-Reverse |
//! | Left | Drive-Reverse | Drive-Forward |
//! | Right | Drive-Forward | Drive-Reverse |
//! | Stop | Hold (0 %) | Hold (0 %) |
//!
//! Both channels always run at the same configured duty cycle; only the sign
//! differs.

use visdrive_types::{ActuationCommand, ChannelCommand, Directive, DutyCycle};

/// Pure, total mapping from [`Directive`] to [`ActuationCommand`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActuationMapper {
    duty_cycle: DutyCycle,
}

impl ActuationMapper {
    pub fn new(duty_cycle: DutyCycle) -> Self {
        Self { duty_cycle }
    }

    pub fn duty_cycle(&self) -> DutyCycle {
        self.duty_cycle
    }

    pub fn map(&self, directive: Directive) -> ActuationCommand {
        let fwd = ChannelCommand::forward(self.duty_cycle);
        let rev = ChannelCommand::reverse(self.duty_cycle);
        let (left, right) = match directive {
            Directive::Forward => (fwd, fwd),
            Directive::Backward => (rev, rev),
            Directive::Left => (rev, fwd),
            Directive::Right => (fwd, rev),
            Directive::Stop => return ActuationCommand::stop(),
        };
        ActuationCommand { left, right }
    }
}
