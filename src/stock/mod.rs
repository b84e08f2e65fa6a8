//! Stock Ledger: authoritative item stock plus its append-only audit history.
//!
//! Every stock or price mutation goes through [`StockLedger`], inside the
//! caller's storage transaction, under an exclusive row lock on the item.
//! Each successful mutation appends exactly one history row; the newest row's
//! `current_value` always equals the item's live field.

mod validator;

pub use validator::validate_and_lock;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FulfillmentError, FulfillmentResult, StockShortage};
use crate::notify::NotifierHandle;
use crate::orders::{HistoryDimension, ItemId, StockChangeType};
use crate::storage::{ItemPriceUpdate, ItemStockUpdate, StoreTx};

/// A catalog item with its live stock counter.
///
/// `stock` is mutated only by the ledger, never directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub stock: i64,
    pub price: Decimal,
    /// Emit a low-stock notification when stock falls to or below this
    pub low_stock_threshold: i64,
    pub created_at: DateTime<Utc>,
}

/// Request to create a catalog item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewItem {
    pub name: String,
    pub stock: i64,
    pub price: Decimal,
    pub low_stock_threshold: i64,
}

impl NewItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stock: 0,
            price: Decimal::ZERO,
            low_stock_threshold: 0,
        }
    }

    pub fn with_stock(mut self, stock: i64) -> Self {
        self.stock = stock;
        self
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = price;
        self
    }

    pub fn with_low_stock_threshold(mut self, threshold: i64) -> Self {
        self.low_stock_threshold = threshold;
        self
    }

    /// Field-level checks performed before any transaction is opened
    pub fn validate(&self) -> FulfillmentResult<()> {
        if self.name.trim().is_empty() {
            return Err(FulfillmentError::validation("item name is empty"));
        }
        if self.stock < 0 {
            return Err(FulfillmentError::validation("initial stock is negative"));
        }
        if self.price < Decimal::ZERO {
            return Err(FulfillmentError::validation("price is negative"));
        }
        if self.low_stock_threshold < 0 {
            return Err(FulfillmentError::validation(
                "low stock threshold is negative",
            ));
        }
        Ok(())
    }
}

/// One immutable entry in an item's audit history.
///
/// Stock and price changes form two independent chains per item, ordered by
/// creation time. For stock changes `new_value` is the signed delta; for
/// price changes it is the new price. `current_value` is the live value after
/// the change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemHistory {
    pub id: i64,
    pub item_id: ItemId,
    pub change_type: StockChangeType,
    pub old_value: Decimal,
    pub new_value: Decimal,
    pub current_value: Decimal,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

/// A history entry about to be appended.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItemHistory {
    pub item_id: ItemId,
    pub change_type: StockChangeType,
    pub old_value: Decimal,
    pub new_value: Decimal,
    pub current_value: Decimal,
    pub actor: String,
}

/// The stock ledger.
///
/// Stateless apart from the notifier handle; all persistence runs through the
/// transaction handed in by the caller, so a ledger call participates in the
/// caller's atomicity.
#[derive(Clone)]
pub struct StockLedger {
    notifier: NotifierHandle,
}

impl StockLedger {
    pub fn new(notifier: NotifierHandle) -> Self {
        Self { notifier }
    }

    /// Adjust an item's stock by `delta` under an exclusive row lock.
    ///
    /// Fails with `InsufficientStock` when a debit exceeds the live stock;
    /// nothing is written in that case. On success the new stock value is
    /// persisted, one history row is appended (`CreateStock` for the item's
    /// first stock entry, `UpdateStock` after), and a low-stock notification
    /// is emitted if the result is at or below the item's threshold. The
    /// notification is fire-and-forget; it never blocks or fails the
    /// transaction.
    pub async fn adjust_stock(
        &self,
        tx: &mut dyn StoreTx,
        item_id: ItemId,
        delta: i64,
        reason: &str,
        actor: &str,
    ) -> FulfillmentResult<i64> {
        let item = tx.item_for_update(item_id).await?;

        if delta < 0 && -delta > item.stock {
            return Err(FulfillmentError::InsufficientStock {
                shortages: vec![StockShortage {
                    item_id,
                    requested: -delta,
                    available: item.stock,
                }],
            });
        }

        let new_stock = item.stock + delta;
        let prior = tx.latest_history(item_id, HistoryDimension::Stock).await?;
        let change_type = match prior {
            None => StockChangeType::CreateStock,
            Some(_) => StockChangeType::UpdateStock,
        };
        let old_value = prior.map(|h| h.current_value).unwrap_or(Decimal::ZERO);

        tx.append_history(NewItemHistory {
            item_id,
            change_type,
            old_value,
            new_value: Decimal::from(delta),
            current_value: Decimal::from(new_stock),
            actor: actor.to_string(),
        })
        .await?;
        tx.update_item_stock(ItemStockUpdate {
            item_id,
            stock: new_stock,
        })
        .await?;

        debug!(
            item_id = %item_id,
            delta,
            new_stock,
            reason,
            "stock adjusted"
        );

        if new_stock <= item.low_stock_threshold {
            self.notifier.low_stock(&item, new_stock);
        }

        Ok(new_stock)
    }

    /// Change an item's unit price, appending one price-chain history row.
    ///
    /// Same locking and chaining rules as stock adjustments; the first price
    /// entry is `CreatePrice`, later ones `UpdatePrice`.
    pub async fn set_price(
        &self,
        tx: &mut dyn StoreTx,
        item_id: ItemId,
        new_price: Decimal,
        actor: &str,
    ) -> FulfillmentResult<()> {
        if new_price < Decimal::ZERO {
            return Err(FulfillmentError::validation("price is negative"));
        }

        // Lock the row so concurrent price and stock writers serialize
        let _item = tx.item_for_update(item_id).await?;

        let prior = tx.latest_history(item_id, HistoryDimension::Price).await?;
        let change_type = match prior {
            None => StockChangeType::CreatePrice,
            Some(_) => StockChangeType::UpdatePrice,
        };
        let old_value = prior.map(|h| h.current_value).unwrap_or(Decimal::ZERO);

        tx.append_history(NewItemHistory {
            item_id,
            change_type,
            old_value,
            new_value: new_price,
            current_value: new_price,
            actor: actor.to_string(),
        })
        .await?;
        tx.update_item_price(ItemPriceUpdate { item_id, price: new_price })
            .await?;

        debug!(item_id = %item_id, %new_price, "price changed");
        Ok(())
    }
}
