//! Order domain model for the fulfillment engine.
//!
//! This module provides:
//!
//! - **Statuses**: sales and purchase lifecycle state machines with validated
//!   transitions, plus strictly-derived payment and line states
//! - **Aggregates**: `SalesOrder` / `PurchaseOrder` with their lines
//! - **Requests**: creation and receiving payloads with field-level validation
//! - **Payments**: records applied against an order's balance
//!
//! State changes never mutate these types directly; the engine drives every
//! transition inside a storage transaction so that status writes and their
//! stock/payment side effects commit atomically.

mod payment;
mod purchase;
mod sales;
mod types;

pub use payment::{Payment, PaymentMethod};
pub use purchase::{
    aggregate_receipt_status, NewPurchaseOrder, PurchaseOrder, PurchaseOrderLine, ReceiveLine,
};
pub use sales::{NewOrderLine, NewSalesOrder, SalesOrder, SalesOrderLine};
pub use types::{
    HistoryDimension, ItemId, LineId, LineStatus, OrderId, PaymentStatus, PurchaseOrderStatus,
    SalesOrderStatus, StockChangeType,
};
