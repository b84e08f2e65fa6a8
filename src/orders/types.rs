//! Core order types and enums for the fulfillment engine.
//!
//! This module defines the fundamental types used throughout the order system:
//! - `SalesOrderStatus` / `PurchaseOrderStatus` - order lifecycle state machines
//! - `PaymentStatus` - derived strictly from paid vs total amounts
//! - `LineStatus` - per-line receiving state for purchase orders
//! - `StockChangeType` - audit dimensions of the item history chain
//! - Strongly-typed identifiers for items, orders, lines, and payments

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Item identifier (database key).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ItemId(pub i64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Order identifier, shared by sales and purchase orders.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct OrderId(pub i64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for OrderId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Order line identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LineId(pub i64);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for LineId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Sales order lifecycle state.
///
/// State transitions:
/// ```text
/// Draft → Confirmed → Shipped → Delivered → Closed
///              │          │
///              └──────────┴────────────────► Closed
/// ```
///
/// `Closed` is terminal. Delivery is the transition that commits the stock
/// debit for every line, all-or-nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesOrderStatus {
    /// Order is being assembled; lines are still mutable
    Draft,
    /// Order accepted; stock is reserved against it
    Confirmed,
    /// Order has left the warehouse
    Shipped,
    /// Goods handed over; stock debited
    Delivered,
    /// Order finished (terminal state)
    Closed,
}

impl SalesOrderStatus {
    /// Returns true if the order is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, SalesOrderStatus::Closed)
    }

    /// Returns true if lines may still be edited
    pub fn is_editable(&self) -> bool {
        matches!(self, SalesOrderStatus::Draft)
    }

    /// Returns true if the order still holds a stock reservation.
    ///
    /// Reservations are held from creation until the goods are delivered
    /// (stock physically debited) or the order is closed without delivery.
    pub fn holds_reservation(&self) -> bool {
        matches!(
            self,
            SalesOrderStatus::Draft | SalesOrderStatus::Confirmed | SalesOrderStatus::Shipped
        )
    }

    /// Check if a transition from the current status to `target` is legal
    pub fn can_transition_to(&self, target: SalesOrderStatus) -> bool {
        match self {
            SalesOrderStatus::Draft => matches!(target, SalesOrderStatus::Confirmed),
            SalesOrderStatus::Confirmed => {
                matches!(target, SalesOrderStatus::Shipped | SalesOrderStatus::Closed)
            }
            SalesOrderStatus::Shipped => matches!(
                target,
                SalesOrderStatus::Delivered | SalesOrderStatus::Closed
            ),
            SalesOrderStatus::Delivered => matches!(target, SalesOrderStatus::Closed),
            // Terminal state cannot transition
            SalesOrderStatus::Closed => false,
        }
    }

    /// Stable database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SalesOrderStatus::Draft => "draft",
            SalesOrderStatus::Confirmed => "confirmed",
            SalesOrderStatus::Shipped => "shipped",
            SalesOrderStatus::Delivered => "delivered",
            SalesOrderStatus::Closed => "closed",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(SalesOrderStatus::Draft),
            "confirmed" => Some(SalesOrderStatus::Confirmed),
            "shipped" => Some(SalesOrderStatus::Shipped),
            "delivered" => Some(SalesOrderStatus::Delivered),
            "closed" => Some(SalesOrderStatus::Closed),
            _ => None,
        }
    }

    /// All states, in lifecycle order
    pub fn all() -> [SalesOrderStatus; 5] {
        [
            SalesOrderStatus::Draft,
            SalesOrderStatus::Confirmed,
            SalesOrderStatus::Shipped,
            SalesOrderStatus::Delivered,
            SalesOrderStatus::Closed,
        ]
    }
}

impl fmt::Display for SalesOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SalesOrderStatus::Draft => write!(f, "DRAFT"),
            SalesOrderStatus::Confirmed => write!(f, "CONFIRMED"),
            SalesOrderStatus::Shipped => write!(f, "SHIPPED"),
            SalesOrderStatus::Delivered => write!(f, "DELIVERED"),
            SalesOrderStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Purchase order lifecycle state.
///
/// State transitions:
/// ```text
/// Draft → Ordered ─┬─► Received ─┬─► Closed
///                  │       │     │
///                  │       ▼     │
///                  ├─► Returned ─┤
///                  │             │
///                  └─────────────┘
/// ```
///
/// `Received` and `Returned` are reached through the receiving operation by
/// re-aggregating line states, or directly through a status update. `Closed`
/// is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    /// Order is being assembled; lines are still mutable
    Draft,
    /// Sent to the supplier; goods may start arriving
    Ordered,
    /// Every line fully processed, not everything returned
    Received,
    /// Every line fully processed and fully returned
    Returned,
    /// Order finished (terminal state)
    Closed,
}

impl PurchaseOrderStatus {
    /// Returns true if the order is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseOrderStatus::Closed)
    }

    /// Returns true if lines may still be edited
    pub fn is_editable(&self) -> bool {
        matches!(self, PurchaseOrderStatus::Draft)
    }

    /// Returns true if goods can be received against the order
    pub fn can_receive(&self) -> bool {
        matches!(self, PurchaseOrderStatus::Ordered)
    }

    /// Check if a transition from the current status to `target` is legal
    pub fn can_transition_to(&self, target: PurchaseOrderStatus) -> bool {
        match self {
            PurchaseOrderStatus::Draft => matches!(target, PurchaseOrderStatus::Ordered),
            PurchaseOrderStatus::Ordered => matches!(
                target,
                PurchaseOrderStatus::Received
                    | PurchaseOrderStatus::Returned
                    | PurchaseOrderStatus::Closed
            ),
            PurchaseOrderStatus::Received => matches!(
                target,
                PurchaseOrderStatus::Closed | PurchaseOrderStatus::Returned
            ),
            PurchaseOrderStatus::Returned => matches!(target, PurchaseOrderStatus::Closed),
            // Terminal state cannot transition
            PurchaseOrderStatus::Closed => false,
        }
    }

    /// Stable database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseOrderStatus::Draft => "draft",
            PurchaseOrderStatus::Ordered => "ordered",
            PurchaseOrderStatus::Received => "received",
            PurchaseOrderStatus::Returned => "returned",
            PurchaseOrderStatus::Closed => "closed",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PurchaseOrderStatus::Draft),
            "ordered" => Some(PurchaseOrderStatus::Ordered),
            "received" => Some(PurchaseOrderStatus::Received),
            "returned" => Some(PurchaseOrderStatus::Returned),
            "closed" => Some(PurchaseOrderStatus::Closed),
            _ => None,
        }
    }

    /// All states, in lifecycle order
    pub fn all() -> [PurchaseOrderStatus; 5] {
        [
            PurchaseOrderStatus::Draft,
            PurchaseOrderStatus::Ordered,
            PurchaseOrderStatus::Received,
            PurchaseOrderStatus::Returned,
            PurchaseOrderStatus::Closed,
        ]
    }
}

impl fmt::Display for PurchaseOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PurchaseOrderStatus::Draft => write!(f, "DRAFT"),
            PurchaseOrderStatus::Ordered => write!(f, "ORDERED"),
            PurchaseOrderStatus::Received => write!(f, "RECEIVED"),
            PurchaseOrderStatus::Returned => write!(f, "RETURNED"),
            PurchaseOrderStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Payment settlement state, derived strictly from amounts.
///
/// Never stored independently of `paid_amount`/`total_amount`; always
/// recomputed through [`PaymentStatus::derive`] when either changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Nothing paid yet
    Unpaid,
    /// Some but not all of the total paid
    Partial,
    /// Fully settled
    Paid,
}

impl PaymentStatus {
    /// Derive the status from the paid and total amounts.
    ///
    /// 0 → Unpaid, 0 < paid < total → Partial, paid >= total → Paid.
    /// A zero-total order counts as paid.
    pub fn derive(paid: Decimal, total: Decimal) -> Self {
        if paid >= total {
            PaymentStatus::Paid
        } else if paid > Decimal::ZERO {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Unpaid
        }
    }

    /// Stable database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(PaymentStatus::Unpaid),
            "partial" => Some(PaymentStatus::Partial),
            "paid" => Some(PaymentStatus::Paid),
            _ => None,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Unpaid => write!(f, "UNPAID"),
            PaymentStatus::Partial => write!(f, "PARTIAL"),
            PaymentStatus::Paid => write!(f, "PAID"),
        }
    }
}

/// Per-line receiving state for purchase order lines.
///
/// Derived from `(quantity, received, returned)` by [`LineStatus::derive`],
/// never accumulated through boolean flags, so it cannot drift from the
/// underlying quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LineStatus {
    /// Nothing processed yet
    Ordered,
    /// Some but not all of the quantity processed
    Partial,
    /// Fully received, nothing returned
    Received,
    /// Fully returned
    Returned,
    /// Fully processed with a mix of receipts and returns
    Completed,
}

impl LineStatus {
    /// Derive the line status from the ordered/received/returned quantities.
    ///
    /// Assumes `received + returned <= quantity` (enforced before any write).
    pub fn derive(quantity: i64, received: i64, returned: i64) -> Self {
        let processed = received + returned;
        if processed == 0 {
            LineStatus::Ordered
        } else if processed < quantity {
            LineStatus::Partial
        } else if returned == 0 {
            LineStatus::Received
        } else if received == 0 {
            LineStatus::Returned
        } else {
            LineStatus::Completed
        }
    }

    /// Returns true if the full ordered quantity has been processed
    pub fn is_fully_processed(&self) -> bool {
        matches!(
            self,
            LineStatus::Received | LineStatus::Returned | LineStatus::Completed
        )
    }

    /// Stable database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            LineStatus::Ordered => "ordered",
            LineStatus::Partial => "partial",
            LineStatus::Received => "received",
            LineStatus::Returned => "returned",
            LineStatus::Completed => "completed",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ordered" => Some(LineStatus::Ordered),
            "partial" => Some(LineStatus::Partial),
            "received" => Some(LineStatus::Received),
            "returned" => Some(LineStatus::Returned),
            "completed" => Some(LineStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for LineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineStatus::Ordered => write!(f, "ORDERED"),
            LineStatus::Partial => write!(f, "PARTIAL"),
            LineStatus::Received => write!(f, "RECEIVED"),
            LineStatus::Returned => write!(f, "RETURNED"),
            LineStatus::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// Kind of change recorded in an item's audit history.
///
/// Stock and price form two independent chains per item; the first entry of a
/// chain uses the `Create*` variant, every later one `Update*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockChangeType {
    /// First stock entry for an item
    CreateStock,
    /// Subsequent stock adjustment
    UpdateStock,
    /// First price entry for an item
    CreatePrice,
    /// Subsequent price change
    UpdatePrice,
}

impl StockChangeType {
    /// The audit dimension this change belongs to
    pub fn dimension(&self) -> HistoryDimension {
        match self {
            StockChangeType::CreateStock | StockChangeType::UpdateStock => {
                HistoryDimension::Stock
            }
            StockChangeType::CreatePrice | StockChangeType::UpdatePrice => {
                HistoryDimension::Price
            }
        }
    }

    /// Stable database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            StockChangeType::CreateStock => "create_stock",
            StockChangeType::UpdateStock => "update_stock",
            StockChangeType::CreatePrice => "create_price",
            StockChangeType::UpdatePrice => "update_price",
        }
    }

    /// Parse the database representation
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create_stock" => Some(StockChangeType::CreateStock),
            "update_stock" => Some(StockChangeType::UpdateStock),
            "create_price" => Some(StockChangeType::CreatePrice),
            "update_price" => Some(StockChangeType::UpdatePrice),
            _ => None,
        }
    }
}

impl fmt::Display for StockChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Audit dimension of an item history chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryDimension {
    /// The stock counter chain
    Stock,
    /// The unit price chain
    Price,
}
