// inventory-core: order fulfillment consistency engine
// Stock ledger with append-only audit history, reservation-validated sales
// orders, purchase receiving, payment tracking, and low-stock notifications.

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod notify;
pub mod orders;
pub mod stock;
pub mod storage;

pub use engine::FulfillmentEngine;
pub use error::{
    ErrorCategory, ErrorClassification, FulfillmentError, FulfillmentResult, StockShortage,
};
