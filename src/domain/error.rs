use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("invalid clock time `{value}`: expected HH:MM")]
    InvalidClockTime { value: String },
    #[error("invalid active day `{value}`: expected an index between 0 and 6")]
    InvalidActiveDay { value: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_clock_time(value: impl Into<String>) -> Self {
        Self::InvalidClockTime {
            value: value.into(),
        }
    }

    pub fn invalid_active_day(value: impl Into<String>) -> Self {
        Self::InvalidActiveDay {
            value: value.into(),
        }
    }
}
