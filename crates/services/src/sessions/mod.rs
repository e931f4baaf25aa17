mod driver;
mod runner;

// Public API of the session runner subsystem.
pub use crate::error::{DriverError, RunnerError};
pub use driver::{DriverConfig, SessionCommand, SessionDriver, SessionEvent};
pub use runner::{TestSessionRunner, TickReport};
