//! The fulfillment error taxonomy.
//!
//! Every operation on the engine returns one of these variants. Business-rule
//! failures (`InsufficientStock`, `InvalidTransition`, `OverpaymentRejected`,
//! `LineInvariantViolation`, `NotFound`, `Validation`) are detected before any
//! write and roll back the enclosing transaction in full. Storage faults are
//! wrapped as `Persistence` so callers can tell a retryable infrastructure
//! problem apart from a rule violation.

use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

use crate::orders::{ItemId, LineId};

/// A single item that could not satisfy a requested quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockShortage {
    /// The item that is short
    pub item_id: ItemId,
    /// Quantity the caller asked for
    pub requested: i64,
    /// Quantity actually available
    pub available: i64,
}

impl fmt::Display for StockShortage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "item {}: requested {}, available {}",
            self.item_id, self.requested, self.available
        )
    }
}

/// Result type for fulfillment operations.
pub type FulfillmentResult<T> = Result<T, FulfillmentError>;

/// Errors produced by the fulfillment engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FulfillmentError {
    /// One or more items cannot cover the requested quantities.
    ///
    /// Carries every shortage found, not just the first, so the caller can
    /// present a single actionable message.
    #[error("Insufficient stock: {}", format_shortages(.shortages))]
    InsufficientStock { shortages: Vec<StockShortage> },

    /// The requested status change is not reachable from the current status.
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Payment amount exceeds the order's remaining balance.
    #[error("Payment of {requested} exceeds remaining balance of {remaining}")]
    OverpaymentRejected {
        requested: Decimal,
        remaining: Decimal,
    },

    /// received + returned would exceed the ordered quantity for a line.
    #[error(
        "Line {line_id}: received {received} + returned {returned} exceeds ordered quantity {quantity}"
    )]
    LineInvariantViolation {
        line_id: LineId,
        quantity: i64,
        received: i64,
        returned: i64,
    },

    /// A referenced order, item, or line does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Input rejected before any transaction was opened.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Storage-level failure (connection loss, lock-wait timeout, ...).
    #[error("Persistence failure: {0}")]
    Persistence(String),
}

impl FulfillmentError {
    /// Create a NotFound error
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        FulfillmentError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Create a Validation error
    pub fn validation(reason: impl Into<String>) -> Self {
        FulfillmentError::Validation(reason.into())
    }

    /// Create an InvalidTransition error from any pair of displayable statuses
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        FulfillmentError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<sqlx::Error> for FulfillmentError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => FulfillmentError::NotFound {
                entity: "row",
                id: String::new(),
            },
            _ => FulfillmentError::Persistence(err.to_string()),
        }
    }
}

fn format_shortages(shortages: &[StockShortage]) -> String {
    shortages
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
