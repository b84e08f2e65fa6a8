//! In-process store.
//!
//! Reproduces the locking semantics the engine gets from PostgreSQL: each row
//! carries an async mutex that `*_for_update` acquires and holds until commit
//! or rollback, so a concurrent transaction touching the same row blocks for
//! real. Plain reads take a snapshot of the committed value and never block,
//! matching MVCC `SELECT` behavior. Writes are staged inside the transaction
//! and only become visible at commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

use crate::error::{FulfillmentError, FulfillmentResult};
use crate::orders::{
    HistoryDimension, ItemId, LineId, NewOrderLine, OrderId, Payment, PurchaseOrder,
    PurchaseOrderLine, SalesOrder, SalesOrderLine,
};
use crate::stock::{Item, ItemHistory, NewItem, NewItemHistory};

use super::{
    ItemPriceUpdate, ItemStockUpdate, LineReceiptUpdate, NewPayment, OrderKind,
    PurchaseOrderInsert, PurchaseOrderUpdate, SalesOrderInsert, SalesOrderUpdate, Store, StoreTx,
};

/// A committed row: cheap snapshot access plus a held-across-await write lock.
struct Row<T> {
    value: Mutex<T>,
    lock: Arc<RowLock<()>>,
}

impl<T: Clone> Row<T> {
    fn new(value: T) -> Arc<Self> {
        Arc::new(Self {
            value: Mutex::new(value),
            lock: Arc::new(RowLock::new(())),
        })
    }

    fn snapshot(&self) -> T {
        self.value.lock().clone()
    }
}

struct Table<T> {
    rows: Mutex<BTreeMap<i64, Arc<Row<T>>>>,
}

impl<T: Clone> Table<T> {
    fn new() -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
        }
    }

    fn get(&self, id: i64) -> Option<Arc<Row<T>>> {
        self.rows.lock().get(&id).cloned()
    }

    fn insert(&self, id: i64, value: T) {
        self.rows.lock().insert(id, Row::new(value));
    }

    fn remove(&self, id: i64) {
        self.rows.lock().remove(&id);
    }

    fn snapshot_all(&self) -> Vec<T> {
        self.rows.lock().values().map(|r| r.snapshot()).collect()
    }
}

struct Inner {
    items: Table<Item>,
    sales: Table<SalesOrder>,
    purchases: Table<PurchaseOrder>,
    histories: Mutex<Vec<ItemHistory>>,
    payments: Mutex<Vec<(OrderKind, Payment)>>,
    next_id: AtomicI64,
}

/// In-memory store for tests and tooling.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                items: Table::new(),
                sales: Table::new(),
                purchases: Table::new(),
                histories: Mutex::new(Vec::new()),
                payments: Mutex::new(Vec::new()),
                next_id: AtomicI64::new(1),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> FulfillmentResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            item_guards: HashMap::new(),
            sales_guards: HashMap::new(),
            purchase_guards: HashMap::new(),
            staged_items: HashMap::new(),
            new_items: HashSet::new(),
            staged_sales: HashMap::new(),
            new_sales: HashSet::new(),
            staged_purchases: HashMap::new(),
            new_purchases: HashSet::new(),
            staged_histories: Vec::new(),
            staged_payments: Vec::new(),
            purged_payments: Vec::new(),
        }))
    }

    async fn item(&self, id: ItemId) -> FulfillmentResult<Item> {
        self.inner
            .items
            .get(id.0)
            .map(|r| r.snapshot())
            .ok_or_else(|| FulfillmentError::not_found("Item", id))
    }

    async fn sales_order(&self, id: OrderId) -> FulfillmentResult<SalesOrder> {
        self.inner
            .sales
            .get(id.0)
            .map(|r| r.snapshot())
            .ok_or_else(|| FulfillmentError::not_found("SalesOrder", id))
    }

    async fn purchase_order(&self, id: OrderId) -> FulfillmentResult<PurchaseOrder> {
        self.inner
            .purchases
            .get(id.0)
            .map(|r| r.snapshot())
            .ok_or_else(|| FulfillmentError::not_found("PurchaseOrder", id))
    }

    async fn item_history(&self, id: ItemId) -> FulfillmentResult<Vec<ItemHistory>> {
        Ok(self
            .inner
            .histories
            .lock()
            .iter()
            .filter(|h| h.item_id == id)
            .cloned()
            .collect())
    }

    async fn payments(
        &self,
        kind: OrderKind,
        order_id: OrderId,
    ) -> FulfillmentResult<Vec<Payment>> {
        Ok(self
            .inner
            .payments
            .lock()
            .iter()
            .filter(|(k, p)| *k == kind && p.order_id == order_id)
            .map(|(_, p)| p.clone())
            .collect())
    }
}

/// One open in-memory transaction.
///
/// Row locks live in `*_guards`; staged row states live in `staged_*`
/// (`None` marks a pending hard delete). Committing writes the staged states
/// through and then releases every guard.
pub struct MemoryTx {
    inner: Arc<Inner>,
    item_guards: HashMap<i64, OwnedMutexGuard<()>>,
    sales_guards: HashMap<i64, OwnedMutexGuard<()>>,
    purchase_guards: HashMap<i64, OwnedMutexGuard<()>>,
    staged_items: HashMap<i64, Item>,
    new_items: HashSet<i64>,
    staged_sales: HashMap<i64, Option<SalesOrder>>,
    new_sales: HashSet<i64>,
    staged_purchases: HashMap<i64, Option<PurchaseOrder>>,
    new_purchases: HashSet<i64>,
    staged_histories: Vec<ItemHistory>,
    staged_payments: Vec<(OrderKind, Payment)>,
    purged_payments: Vec<(OrderKind, OrderId)>,
}

impl MemoryTx {
    fn next_id(&self) -> i64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn sales_lines(&self, order_id: OrderId, lines: &[NewOrderLine]) -> Vec<SalesOrderLine> {
        lines
            .iter()
            .map(|l| SalesOrderLine {
                id: LineId(self.next_id()),
                order_id,
                item_id: l.item_id,
                quantity: l.quantity,
                unit_price: l.unit_price,
                total_price: l.total_price(),
            })
            .collect()
    }

    fn staged_sales_order(&mut self, id: OrderId) -> FulfillmentResult<&mut SalesOrder> {
        self.staged_sales
            .get_mut(&id.0)
            .and_then(|o| o.as_mut())
            .ok_or_else(|| FulfillmentError::not_found("SalesOrder", id))
    }

    fn staged_purchase_order(&mut self, id: OrderId) -> FulfillmentResult<&mut PurchaseOrder> {
        self.staged_purchases
            .get_mut(&id.0)
            .and_then(|o| o.as_mut())
            .ok_or_else(|| FulfillmentError::not_found("PurchaseOrder", id))
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert_item(&mut self, item: NewItem) -> FulfillmentResult<Item> {
        let id = self.next_id();
        let row = Item {
            id: ItemId(id),
            name: item.name,
            stock: item.stock,
            price: item.price,
            low_stock_threshold: item.low_stock_threshold,
            created_at: Utc::now(),
        };
        self.staged_items.insert(id, row.clone());
        self.new_items.insert(id);
        Ok(row)
    }

    async fn item_for_update(&mut self, id: ItemId) -> FulfillmentResult<Item> {
        if let Some(staged) = self.staged_items.get(&id.0) {
            return Ok(staged.clone());
        }
        let row = self
            .inner
            .items
            .get(id.0)
            .ok_or_else(|| FulfillmentError::not_found("Item", id))?;
        let guard = row.lock.clone().lock_owned().await;
        self.item_guards.insert(id.0, guard);
        let value = row.snapshot();
        self.staged_items.insert(id.0, value.clone());
        Ok(value)
    }

    async fn update_item_stock(&mut self, update: ItemStockUpdate) -> FulfillmentResult<()> {
        let item = self
            .staged_items
            .get_mut(&update.item_id.0)
            .ok_or_else(|| FulfillmentError::not_found("Item", update.item_id))?;
        item.stock = update.stock;
        Ok(())
    }

    async fn update_item_price(&mut self, update: ItemPriceUpdate) -> FulfillmentResult<()> {
        let item = self
            .staged_items
            .get_mut(&update.item_id.0)
            .ok_or_else(|| FulfillmentError::not_found("Item", update.item_id))?;
        item.price = update.price;
        Ok(())
    }

    async fn latest_history(
        &mut self,
        item_id: ItemId,
        dimension: HistoryDimension,
    ) -> FulfillmentResult<Option<ItemHistory>> {
        let matches =
            |h: &ItemHistory| h.item_id == item_id && h.change_type.dimension() == dimension;
        if let Some(h) = self.staged_histories.iter().rev().find(|h| matches(h)) {
            return Ok(Some(h.clone()));
        }
        let histories = self.inner.histories.lock();
        Ok(histories.iter().rev().find(|h| matches(h)).cloned())
    }

    async fn append_history(&mut self, entry: NewItemHistory) -> FulfillmentResult<ItemHistory> {
        let row = ItemHistory {
            id: self.next_id(),
            item_id: entry.item_id,
            change_type: entry.change_type,
            old_value: entry.old_value,
            new_value: entry.new_value,
            current_value: entry.current_value,
            actor: entry.actor,
            created_at: Utc::now(),
        };
        self.staged_histories.push(row.clone());
        Ok(row)
    }

    async fn reserved_quantity(
        &mut self,
        item_id: ItemId,
        exclude_order: Option<OrderId>,
    ) -> FulfillmentResult<i64> {
        let reserves = |order: &SalesOrder| -> i64 {
            if !order.status.holds_reservation()
                || order.is_deleted()
                || exclude_order == Some(order.id)
            {
                return 0;
            }
            order
                .lines
                .iter()
                .filter(|l| l.item_id == item_id)
                .map(|l| l.quantity)
                .sum()
        };

        let mut total: i64 = 0;
        // Committed rows, except those superseded by a staged state.
        for order in self.inner.sales.snapshot_all() {
            if !self.staged_sales.contains_key(&order.id.0) {
                total += reserves(&order);
            }
        }
        for staged in self.staged_sales.values().flatten() {
            total += reserves(staged);
        }
        Ok(total)
    }

    async fn insert_sales_order(
        &mut self,
        order: SalesOrderInsert,
    ) -> FulfillmentResult<SalesOrder> {
        let id = OrderId(self.next_id());
        let lines = self.sales_lines(id, &order.lines);
        let row = SalesOrder {
            id,
            number: order.number,
            status: order.status,
            payment_status: order.payment_status,
            total_amount: order.total_amount,
            paid_amount: order.paid_amount,
            dp_amount: order.dp_amount,
            lines,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.staged_sales.insert(id.0, Some(row.clone()));
        self.new_sales.insert(id.0);
        Ok(row)
    }

    async fn sales_order_for_update(&mut self, id: OrderId) -> FulfillmentResult<SalesOrder> {
        if let Some(staged) = self.staged_sales.get(&id.0) {
            return staged
                .clone()
                .ok_or_else(|| FulfillmentError::not_found("SalesOrder", id));
        }
        let row = self
            .inner
            .sales
            .get(id.0)
            .ok_or_else(|| FulfillmentError::not_found("SalesOrder", id))?;
        let guard = row.lock.clone().lock_owned().await;
        self.sales_guards.insert(id.0, guard);
        let value = row.snapshot();
        self.staged_sales.insert(id.0, Some(value.clone()));
        Ok(value)
    }

    async fn update_sales_order(&mut self, update: SalesOrderUpdate) -> FulfillmentResult<()> {
        self.sales_order_for_update(update.order_id).await?;
        let order = self.staged_sales_order(update.order_id)?;
        order.status = update.status;
        order.payment_status = update.payment_status;
        order.paid_amount = update.paid_amount;
        order.total_amount = update.total_amount;
        Ok(())
    }

    async fn replace_sales_lines(
        &mut self,
        order_id: OrderId,
        lines: Vec<NewOrderLine>,
    ) -> FulfillmentResult<()> {
        self.sales_order_for_update(order_id).await?;
        let new_lines = self.sales_lines(order_id, &lines);
        let order = self.staged_sales_order(order_id)?;
        order.lines = new_lines;
        Ok(())
    }

    async fn soft_delete_sales_order(
        &mut self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> FulfillmentResult<()> {
        self.sales_order_for_update(id).await?;
        let order = self.staged_sales_order(id)?;
        order.deleted_at = Some(at);
        Ok(())
    }

    async fn hard_delete_sales_order(&mut self, id: OrderId) -> FulfillmentResult<()> {
        self.sales_order_for_update(id).await?;
        self.staged_sales.insert(id.0, None);
        self.staged_payments
            .retain(|(k, p)| !(*k == OrderKind::Sales && p.order_id == id));
        self.purged_payments.push((OrderKind::Sales, id));
        Ok(())
    }

    async fn insert_purchase_order(
        &mut self,
        order: PurchaseOrderInsert,
    ) -> FulfillmentResult<PurchaseOrder> {
        let id = OrderId(self.next_id());
        let lines = order
            .lines
            .iter()
            .map(|l| PurchaseOrderLine {
                id: LineId(self.next_id()),
                order_id: id,
                item_id: l.item_id,
                quantity: l.quantity,
                unit_price: l.unit_price,
                total_price: l.total_price(),
                received_quantity: 0,
                returned_quantity: 0,
            })
            .collect();
        let row = PurchaseOrder {
            id,
            number: order.number,
            status: order.status,
            payment_status: order.payment_status,
            total_amount: order.total_amount,
            paid_amount: order.paid_amount,
            dp_amount: order.dp_amount,
            lines,
            created_at: Utc::now(),
            deleted_at: None,
        };
        self.staged_purchases.insert(id.0, Some(row.clone()));
        self.new_purchases.insert(id.0);
        Ok(row)
    }

    async fn purchase_order_for_update(
        &mut self,
        id: OrderId,
    ) -> FulfillmentResult<PurchaseOrder> {
        if let Some(staged) = self.staged_purchases.get(&id.0) {
            return staged
                .clone()
                .ok_or_else(|| FulfillmentError::not_found("PurchaseOrder", id));
        }
        let row = self
            .inner
            .purchases
            .get(id.0)
            .ok_or_else(|| FulfillmentError::not_found("PurchaseOrder", id))?;
        let guard = row.lock.clone().lock_owned().await;
        self.purchase_guards.insert(id.0, guard);
        let value = row.snapshot();
        self.staged_purchases.insert(id.0, Some(value.clone()));
        Ok(value)
    }

    async fn update_purchase_order(
        &mut self,
        update: PurchaseOrderUpdate,
    ) -> FulfillmentResult<()> {
        self.purchase_order_for_update(update.order_id).await?;
        let order = self.staged_purchase_order(update.order_id)?;
        order.status = update.status;
        order.payment_status = update.payment_status;
        order.paid_amount = update.paid_amount;
        order.total_amount = update.total_amount;
        Ok(())
    }

    async fn update_line_receipt(&mut self, update: LineReceiptUpdate) -> FulfillmentResult<()> {
        let line = self
            .staged_purchases
            .values_mut()
            .flatten()
            .flat_map(|o| o.lines.iter_mut())
            .find(|l| l.id == update.line_id)
            .ok_or_else(|| {
                FulfillmentError::Persistence(format!(
                    "purchase line {} updated outside its order's lock",
                    update.line_id
                ))
            })?;
        line.received_quantity = update.received_quantity;
        line.returned_quantity = update.returned_quantity;
        Ok(())
    }

    async fn soft_delete_purchase_order(
        &mut self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> FulfillmentResult<()> {
        self.purchase_order_for_update(id).await?;
        let order = self.staged_purchase_order(id)?;
        order.deleted_at = Some(at);
        Ok(())
    }

    async fn hard_delete_purchase_order(&mut self, id: OrderId) -> FulfillmentResult<()> {
        self.purchase_order_for_update(id).await?;
        self.staged_purchases.insert(id.0, None);
        self.staged_payments
            .retain(|(k, p)| !(*k == OrderKind::Purchase && p.order_id == id));
        self.purged_payments.push((OrderKind::Purchase, id));
        Ok(())
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> FulfillmentResult<Payment> {
        let row = Payment {
            id: self.next_id(),
            order_id: payment.order_id,
            amount: payment.amount,
            method: payment.method,
            created_at: Utc::now(),
        };
        self.staged_payments.push((payment.kind, row.clone()));
        Ok(row)
    }

    async fn commit(self: Box<Self>) -> FulfillmentResult<()> {
        let tx = *self;
        for (id, item) in tx.staged_items {
            if tx.new_items.contains(&id) {
                tx.inner.items.insert(id, item);
            } else if let Some(row) = tx.inner.items.get(id) {
                *row.value.lock() = item;
            }
        }
        for (id, order) in tx.staged_sales {
            match order {
                Some(order) if tx.new_sales.contains(&id) => tx.inner.sales.insert(id, order),
                Some(order) => {
                    if let Some(row) = tx.inner.sales.get(id) {
                        *row.value.lock() = order;
                    }
                }
                None => tx.inner.sales.remove(id),
            }
        }
        for (id, order) in tx.staged_purchases {
            match order {
                Some(order) if tx.new_purchases.contains(&id) => {
                    tx.inner.purchases.insert(id, order)
                }
                Some(order) => {
                    if let Some(row) = tx.inner.purchases.get(id) {
                        *row.value.lock() = order;
                    }
                }
                None => tx.inner.purchases.remove(id),
            }
        }
        tx.inner
            .histories
            .lock()
            .extend(tx.staged_histories);
        {
            let mut payments = tx.inner.payments.lock();
            payments.retain(|(k, p)| {
                !tx.purged_payments
                    .iter()
                    .any(|(pk, pid)| pk == k && *pid == p.order_id)
            });
            payments.extend(tx.staged_payments);
        }
        // Guards drop here, releasing every row lock after the writes landed.
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> FulfillmentResult<()> {
        // Dropping the transaction discards staged state and releases locks.
        Ok(())
    }
}
