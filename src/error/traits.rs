//! Error classification for retry decisions.
//!
//! Callers of the engine need to know whether an error is worth retrying.
//! Persistence faults (connection loss, lock-wait timeout) usually are;
//! business-rule failures never are, because the same input will fail again.

use std::time::Duration;

use super::common::FulfillmentError;

/// Classification of error types for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient errors that may resolve on retry (infrastructure faults)
    Transient,
    /// Permanent errors that won't resolve on retry (rule violations, bad input)
    Permanent,
}

/// Trait for errors that can classify themselves for retry logic.
pub trait ErrorClassification {
    /// Returns the category of this error
    fn category(&self) -> ErrorCategory;

    /// Returns true if this error is transient and may succeed on retry
    fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }

    /// Returns true if this error is permanent and won't succeed on retry
    fn is_permanent(&self) -> bool {
        self.category() == ErrorCategory::Permanent
    }

    /// Suggests a delay before retrying, if applicable
    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self.category() {
            ErrorCategory::Transient => Some(Duration::from_millis(100)),
            ErrorCategory::Permanent => None,
        }
    }
}

impl ErrorClassification for FulfillmentError {
    fn category(&self) -> ErrorCategory {
        match self {
            FulfillmentError::Persistence(_) => ErrorCategory::Transient,
            _ => ErrorCategory::Permanent,
        }
    }

    fn suggested_retry_delay(&self) -> Option<Duration> {
        match self {
            // May be a lock-wait timeout or a dropped connection
            FulfillmentError::Persistence(_) => Some(Duration::from_millis(250)),
            _ => None,
        }
    }
}
