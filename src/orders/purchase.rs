//! Purchase order aggregate, receiving requests, and status aggregation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::sales::NewOrderLine;
use super::types::{ItemId, LineId, LineStatus, OrderId, PaymentStatus, PurchaseOrderStatus};
use crate::error::{FulfillmentError, FulfillmentResult};

/// One line of a purchase order.
///
/// `quantity` is a future stock credit, split into `received_quantity` and
/// `returned_quantity` as goods arrive. Invariant: `received + returned <=
/// quantity`, enforced before any write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrderLine {
    pub id: LineId,
    pub order_id: OrderId,
    pub item_id: ItemId,
    pub quantity: i64,
    pub unit_price: Decimal,
    /// Always `quantity * unit_price`
    pub total_price: Decimal,
    pub received_quantity: i64,
    pub returned_quantity: i64,
}

impl PurchaseOrderLine {
    /// Receiving state derived from the quantities
    pub fn status(&self) -> LineStatus {
        LineStatus::derive(self.quantity, self.received_quantity, self.returned_quantity)
    }

    /// Quantity not yet received or returned
    pub fn outstanding(&self) -> i64 {
        self.quantity - self.received_quantity - self.returned_quantity
    }
}

/// A purchase order with its lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    pub id: OrderId,
    pub number: String,
    pub status: PurchaseOrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    /// Down payment recorded at creation, already included in `paid_amount`
    pub dp_amount: Decimal,
    pub lines: Vec<PurchaseOrderLine>,
    pub created_at: DateTime<Utc>,
    /// Set when the order was soft-deleted while still in `Draft`
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PurchaseOrder {
    /// Remaining balance to be paid
    pub fn remaining_amount(&self) -> Decimal {
        self.total_amount - self.paid_amount
    }

    /// Returns true if the order has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Request to create a purchase order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPurchaseOrder {
    pub lines: Vec<NewOrderLine>,
    /// Optional down payment applied at creation
    #[serde(default)]
    pub dp_amount: Decimal,
}

impl NewPurchaseOrder {
    pub fn new(lines: Vec<NewOrderLine>) -> Self {
        Self {
            lines,
            dp_amount: Decimal::ZERO,
        }
    }

    pub fn with_down_payment(mut self, dp_amount: Decimal) -> Self {
        self.dp_amount = dp_amount;
        self
    }

    /// Order total across all requested lines
    pub fn total_amount(&self) -> Decimal {
        self.lines.iter().map(|l| l.total_price()).sum()
    }

    /// Validate lines and the down payment against the computed total
    pub fn validate(&self) -> FulfillmentResult<()> {
        if self.lines.is_empty() {
            return Err(FulfillmentError::validation("order has no lines"));
        }
        for line in &self.lines {
            line.validate()?;
        }
        if self.dp_amount < Decimal::ZERO {
            return Err(FulfillmentError::validation("down payment is negative"));
        }
        if self.dp_amount > self.total_amount() {
            return Err(FulfillmentError::validation(format!(
                "down payment {} exceeds order total {}",
                self.dp_amount,
                self.total_amount()
            )));
        }
        Ok(())
    }
}

/// Per-line deltas for a receiving batch.
///
/// Deltas are increments on top of what the line has already processed; both
/// must be non-negative. The whole batch is rejected if any line would end up
/// with `received + returned > quantity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveLine {
    pub line_id: LineId,
    pub received_delta: i64,
    pub returned_delta: i64,
}

impl ReceiveLine {
    pub fn new(line_id: LineId, received_delta: i64, returned_delta: i64) -> Self {
        Self {
            line_id,
            received_delta,
            returned_delta,
        }
    }

    /// Field-level checks performed before any transaction is opened
    pub fn validate(&self) -> FulfillmentResult<()> {
        if self.received_delta < 0 || self.returned_delta < 0 {
            return Err(FulfillmentError::validation(format!(
                "line {}: receive deltas must be non-negative",
                self.line_id
            )));
        }
        Ok(())
    }
}

/// Re-aggregate an order's status from its line states.
///
/// Pure function over the lines, evaluated after every receiving batch:
/// - every line fully processed and fully returned → `Returned`
/// - every line fully processed, not everything returned → `Received`
/// - anything still outstanding → stays `Ordered`
pub fn aggregate_receipt_status(lines: &[PurchaseOrderLine]) -> PurchaseOrderStatus {
    let all_processed = lines.iter().all(|l| l.status().is_fully_processed());
    if !all_processed {
        return PurchaseOrderStatus::Ordered;
    }
    let all_returned = lines.iter().all(|l| l.received_quantity == 0);
    if all_returned {
        PurchaseOrderStatus::Returned
    } else {
        PurchaseOrderStatus::Received
    }
}
