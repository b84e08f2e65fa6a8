//! Error handling for the fulfillment engine.
//!
//! This module provides:
//! - The typed business-error taxonomy returned by every engine operation
//! - Error classification for retry logic (persistence faults are retryable,
//!   business-rule failures are not)

mod common;
mod traits;

pub use common::*;
pub use traits::*;
