use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TimingError {
    #[error("timed sessions need a positive duration")]
    ZeroDuration,
}

/// Whether a session counts down to a forced submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TimingMode {
    #[default]
    Untimed,
    Timed { duration_secs: u32 },
}

impl TimingMode {
    /// Timed mode with the given duration.
    ///
    /// # Errors
    ///
    /// Returns `TimingError::ZeroDuration` when `duration_secs` is zero.
    pub fn timed(duration_secs: u32) -> Result<Self, TimingError> {
        let mode = Self::Timed { duration_secs };
        mode.validate()?;
        Ok(mode)
    }

    /// # Errors
    ///
    /// Returns `TimingError::ZeroDuration` for a zero-length timed mode.
    pub fn validate(&self) -> Result<(), TimingError> {
        match self {
            TimingMode::Timed { duration_secs: 0 } => Err(TimingError::ZeroDuration),
            _ => Ok(()),
        }
    }

    #[must_use]
    pub fn duration_secs(&self) -> Option<u32> {
        match self {
            TimingMode::Untimed => None,
            TimingMode::Timed { duration_secs } => Some(*duration_secs),
        }
    }

    #[must_use]
    pub fn is_timed(&self) -> bool {
        matches!(self, TimingMode::Timed { .. })
    }
}
