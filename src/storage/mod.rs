//! Storage seam for the fulfillment engine.
//!
//! The engine talks to persistence through the [`Store`] / [`StoreTx`] pair:
//! one logical transaction per inbound mutation, exclusive per-item row locks
//! as the sole concurrency mechanism. Two implementations are provided:
//!
//! - [`postgres::PgStore`]: sqlx/PostgreSQL, `SELECT ... FOR UPDATE` row
//!   locks, for production
//! - [`memory::MemoryStore`]: in-process tables with per-row async locks
//!   that reproduce the same blocking semantics, for tests and tooling
//!
//! All partial writes go through explicit typed update structs; there are no
//! field-name maps, so a silently omitted field cannot slip through.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::FulfillmentResult;
use crate::orders::{
    HistoryDimension, ItemId, LineId, NewOrderLine, OrderId, Payment, PaymentMethod,
    PaymentStatus, PurchaseOrder, PurchaseOrderStatus, SalesOrder, SalesOrderStatus,
};
use crate::stock::{Item, ItemHistory, NewItem, NewItemHistory};

/// Which order table a payment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderKind {
    Sales,
    Purchase,
}

impl OrderKind {
    /// Stable database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderKind::Sales => "sales",
            OrderKind::Purchase => "purchase",
        }
    }
}

/// Typed partial update: an item's live stock counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemStockUpdate {
    pub item_id: ItemId,
    pub stock: i64,
}

/// Typed partial update: an item's unit price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemPriceUpdate {
    pub item_id: ItemId,
    pub price: Decimal,
}

/// Typed partial update: a sales order's status and payment fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SalesOrderUpdate {
    pub order_id: OrderId,
    pub status: SalesOrderStatus,
    pub payment_status: PaymentStatus,
    pub paid_amount: Decimal,
    pub total_amount: Decimal,
}

/// Typed partial update: a purchase order's status and payment fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchaseOrderUpdate {
    pub order_id: OrderId,
    pub status: PurchaseOrderStatus,
    pub payment_status: PaymentStatus,
    pub paid_amount: Decimal,
    pub total_amount: Decimal,
}

/// Typed partial update: a purchase line's processed quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineReceiptUpdate {
    pub line_id: LineId,
    pub received_quantity: i64,
    pub returned_quantity: i64,
}

/// A sales order row about to be inserted, lines included.
#[derive(Debug, Clone)]
pub struct SalesOrderInsert {
    pub number: String,
    pub status: SalesOrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub dp_amount: Decimal,
    pub lines: Vec<NewOrderLine>,
}

/// A purchase order row about to be inserted, lines included.
#[derive(Debug, Clone)]
pub struct PurchaseOrderInsert {
    pub number: String,
    pub status: PurchaseOrderStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: Decimal,
    pub paid_amount: Decimal,
    pub dp_amount: Decimal,
    pub lines: Vec<NewOrderLine>,
}

/// A payment row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub kind: OrderKind,
    pub order_id: OrderId,
    pub amount: Decimal,
    pub method: PaymentMethod,
}

/// One open storage transaction.
///
/// `*_for_update` methods acquire an exclusive row lock that is held until
/// the transaction commits or rolls back; a concurrent transaction touching
/// the same row blocks on it. Dropping the transaction without committing
/// discards every staged write and releases all locks.
#[async_trait]
pub trait StoreTx: Send {
    // -- items ---------------------------------------------------------------

    async fn insert_item(&mut self, item: NewItem) -> FulfillmentResult<Item>;

    /// Read an item under an exclusive row lock.
    async fn item_for_update(&mut self, id: ItemId) -> FulfillmentResult<Item>;

    async fn update_item_stock(&mut self, update: ItemStockUpdate) -> FulfillmentResult<()>;

    async fn update_item_price(&mut self, update: ItemPriceUpdate) -> FulfillmentResult<()>;

    // -- item history --------------------------------------------------------

    /// Latest history row for an item in the given dimension, if any.
    async fn latest_history(
        &mut self,
        item_id: ItemId,
        dimension: HistoryDimension,
    ) -> FulfillmentResult<Option<ItemHistory>>;

    async fn append_history(&mut self, entry: NewItemHistory) -> FulfillmentResult<ItemHistory>;

    // -- reservations --------------------------------------------------------

    /// Summed line quantities of committed, undelivered, undeleted sales
    /// orders for an item, optionally excluding one order's own lines.
    async fn reserved_quantity(
        &mut self,
        item_id: ItemId,
        exclude_order: Option<OrderId>,
    ) -> FulfillmentResult<i64>;

    // -- sales orders --------------------------------------------------------

    async fn insert_sales_order(
        &mut self,
        order: SalesOrderInsert,
    ) -> FulfillmentResult<SalesOrder>;

    /// Read a sales order (with lines) under an exclusive row lock.
    async fn sales_order_for_update(&mut self, id: OrderId) -> FulfillmentResult<SalesOrder>;

    async fn update_sales_order(&mut self, update: SalesOrderUpdate) -> FulfillmentResult<()>;

    /// Replace a draft order's lines wholesale.
    async fn replace_sales_lines(
        &mut self,
        order_id: OrderId,
        lines: Vec<NewOrderLine>,
    ) -> FulfillmentResult<()>;

    async fn soft_delete_sales_order(
        &mut self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> FulfillmentResult<()>;

    async fn hard_delete_sales_order(&mut self, id: OrderId) -> FulfillmentResult<()>;

    // -- purchase orders -----------------------------------------------------

    async fn insert_purchase_order(
        &mut self,
        order: PurchaseOrderInsert,
    ) -> FulfillmentResult<PurchaseOrder>;

    /// Read a purchase order (with lines) under an exclusive row lock.
    async fn purchase_order_for_update(
        &mut self,
        id: OrderId,
    ) -> FulfillmentResult<PurchaseOrder>;

    async fn update_purchase_order(
        &mut self,
        update: PurchaseOrderUpdate,
    ) -> FulfillmentResult<()>;

    async fn update_line_receipt(&mut self, update: LineReceiptUpdate) -> FulfillmentResult<()>;

    async fn soft_delete_purchase_order(
        &mut self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> FulfillmentResult<()>;

    async fn hard_delete_purchase_order(&mut self, id: OrderId) -> FulfillmentResult<()>;

    // -- payments ------------------------------------------------------------

    async fn insert_payment(&mut self, payment: NewPayment) -> FulfillmentResult<Payment>;

    // -- transaction control -------------------------------------------------

    async fn commit(self: Box<Self>) -> FulfillmentResult<()>;

    async fn rollback(self: Box<Self>) -> FulfillmentResult<()>;
}

/// A store that can open transactions and serve lock-free reads.
#[async_trait]
pub trait Store: Send + Sync {
    /// Open a transaction. All mutations happen inside one.
    async fn begin(&self) -> FulfillmentResult<Box<dyn StoreTx>>;

    async fn item(&self, id: ItemId) -> FulfillmentResult<Item>;

    async fn sales_order(&self, id: OrderId) -> FulfillmentResult<SalesOrder>;

    async fn purchase_order(&self, id: OrderId) -> FulfillmentResult<PurchaseOrder>;

    /// Full audit history for an item, oldest first.
    async fn item_history(&self, id: ItemId) -> FulfillmentResult<Vec<ItemHistory>>;

    /// Payments recorded against an order, oldest first.
    async fn payments(
        &self,
        kind: OrderKind,
        order_id: OrderId,
    ) -> FulfillmentResult<Vec<Payment>>;
}
