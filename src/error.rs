//! Errors raised by the clock core.
//!
//! Notification failures are not represented here: the notifier absorbs
//! them and reports a [`crate::notify::NotifyOutcome`] instead.

pub type Result<T> = std::result::Result<T, ClockError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Zone identifier not present in the IANA database
    #[error("unknown time zone '{0}'")]
    UnknownTimeZone(String),

    /// Custom time not in HH:MM[:SS] form or out of range
    #[error("invalid target time '{0}', expected HH:MM")]
    InvalidTargetTime(String),

    /// Display pattern contains a directive the formatter does not know
    #[error("invalid time format pattern '{0}'")]
    InvalidPattern(String),

    /// A keyed external value the clock depends on is absent
    #[error("state '{0}' is not available")]
    MissingState(String),
}
