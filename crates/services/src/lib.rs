#![forbid(unsafe_code)]

pub mod error;
pub mod http_sink;
pub mod sessions;
pub mod sink;

pub use testprep_core::Clock;

pub use error::{DriverError, HttpSinkConfigError, RunnerError};
pub use http_sink::{HttpSinkConfig, HttpSubmissionSink};
pub use sessions::{
    DriverConfig, SessionCommand, SessionDriver, SessionEvent, TestSessionRunner, TickReport,
};
pub use sink::{InMemorySubmissionSink, SubmissionSink, TransportError};
