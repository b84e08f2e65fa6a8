//! Sales order aggregate and creation requests.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::types::{ItemId, LineId, OrderId, PaymentStatus, SalesOrderStatus};
use crate::error::{FulfillmentError, FulfillmentResult};

/// One item/quantity/price entry within a sales order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesOrderLine {
    pub id: LineId,
    pub order_id: OrderId,
    pub item_id: ItemId,
    pub quantity: i64,
    pub unit_price: Decimal,
    /// Always `quantity * unit_price`
    pub total_price: Decimal,
}

/// A sales order with its lines.
///
/// `total_amount` is the sum of line totals; `paid_amount` never exceeds it.
/// Lines are mutable only while the order is in `Draft`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesOrder {
    pub id: OrderId,
    pub number: String,
    pub status: SalesOrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    /// Down payment recorded at creation, already included in `paid_amount`
    pub dp_amount: Decimal,
    pub lines: Vec<SalesOrderLine>,
    pub created_at: DateTime<Utc>,
    /// Set when the order was soft-deleted while still in `Draft`
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SalesOrder {
    /// Remaining balance to be paid
    pub fn remaining_amount(&self) -> Decimal {
        self.total_amount - self.paid_amount
    }

    /// Returns true if the order has been soft-deleted
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A requested line for order creation or draft update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewOrderLine {
    pub item_id: ItemId,
    pub quantity: i64,
    pub unit_price: Decimal,
}

impl NewOrderLine {
    pub fn new(item_id: ItemId, quantity: i64, unit_price: Decimal) -> Self {
        Self {
            item_id,
            quantity,
            unit_price,
        }
    }

    /// Line total, `quantity * unit_price`
    pub fn total_price(&self) -> Decimal {
        Decimal::from(self.quantity) * self.unit_price
    }

    /// Field-level checks performed before any transaction is opened
    pub fn validate(&self) -> FulfillmentResult<()> {
        if self.quantity <= 0 {
            return Err(FulfillmentError::validation(format!(
                "line for item {} has non-positive quantity {}",
                self.item_id, self.quantity
            )));
        }
        if self.unit_price < Decimal::ZERO {
            return Err(FulfillmentError::validation(format!(
                "line for item {} has negative unit price {}",
                self.item_id, self.unit_price
            )));
        }
        Ok(())
    }
}

/// Request to create a sales order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSalesOrder {
    pub lines: Vec<NewOrderLine>,
    /// Optional down payment applied at creation
    #[serde(default)]
    pub dp_amount: Decimal,
}

impl NewSalesOrder {
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(item: i64, qty: i64, price: Decimal) -> NewOrderLine {
        NewOrderLine::new(ItemId(item), qty, price)
    }

    #[test]
    fn test_line_total() {
        assert_eq!(line(1, 3, dec!(25.50)).total_price(), dec!(76.50));
    }

    #[test]
    fn test_order_total() {
        let order = NewSalesOrder::new(vec![line(1, 2, dec!(100)), line(2, 1, dec!(50))]);
        assert_eq!(order.total_amount(), dec!(250));
    }

    #[test]
    fn test_validation_rejects_bad_lines() {
        assert!(NewSalesOrder::new(vec![]).validate().is_err());
        assert!(NewSalesOrder::new(vec![line(1, 0, dec!(10))])
            .validate()
            .is_err());
        assert!(NewSalesOrder::new(vec![line(1, 1, dec!(-1))])
            .validate()
            .is_err());
    }

    #[test]
    fn test_validation_rejects_excess_down_payment() {
        let order =
            NewSalesOrder::new(vec![line(1, 1, dec!(100))]).with_down_payment(dec!(150));
        assert!(order.validate().is_err());

        let order = NewSalesOrder::new(vec![line(1, 1, dec!(100))]).with_down_payment(dec!(100));
        assert!(order.validate().is_ok());
    }
}
