//! Fulfillment engine: the transactional façade every mutation goes through.
//!
//! Each operation opens one storage transaction, takes exclusive row locks in
//! a deterministic order, applies the full effect or nothing, and commits.
//! An error rolls the transaction back, so partial writes never become
//! visible. The engine owns no state beyond the store handle and the stock
//! ledger; two engines over the same store behave identically.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::error::{FulfillmentError, FulfillmentResult};
use crate::notify::NotifierHandle;
use crate::orders::{
    aggregate_receipt_status, ItemId, NewOrderLine, NewPurchaseOrder, NewSalesOrder, OrderId,
    Payment, PaymentMethod, PaymentStatus, PurchaseOrder, PurchaseOrderStatus, ReceiveLine,
    SalesOrder, SalesOrderStatus,
};
use crate::stock::{validate_and_lock, Item, ItemHistory, NewItem, StockLedger};
use crate::storage::{
    LineReceiptUpdate, NewPayment, OrderKind, PurchaseOrderInsert, PurchaseOrderUpdate,
    SalesOrderInsert, SalesOrderUpdate, Store, StoreTx,
};

/// Transactional entry point for every inventory and order mutation.
pub struct FulfillmentEngine {
    store: Arc<dyn Store>,
    ledger: StockLedger,
}

impl FulfillmentEngine {
    pub fn new(store: Arc<dyn Store>, notifier: NotifierHandle) -> Self {
        Self {
            store,
            ledger: StockLedger::new(notifier),
        }
    }

    // -- items ---------------------------------------------------------------

    /// Create an item and seed both of its history chains.
    ///
    /// The initial stock lands as a `CreateStock` entry and the initial price
    /// as `CreatePrice`, so later adjustments always have a chain to append
    /// to.
    pub async fn create_item(&self, new: NewItem, actor: &str) -> FulfillmentResult<Item> {
        new.validate()?;
        let mut tx = self.store.begin().await?;
        match self.create_item_tx(&mut *tx, new, actor).await {
            Ok(item) => {
                tx.commit().await?;
                info!(item_id = %item.id, name = %item.name, "item created");
                Ok(item)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn create_item_tx(
        &self,
        tx: &mut dyn StoreTx,
        new: NewItem,
        actor: &str,
    ) -> FulfillmentResult<Item> {
        let initial_stock = new.stock;
        let initial_price = new.price;
        let shell = NewItem {
            stock: 0,
            price: Decimal::ZERO,
            ..new
        };
        let item = tx.insert_item(shell).await?;
        let stock = self
            .ledger
            .adjust_stock(tx, item.id, initial_stock, "initial stock", actor)
            .await?;
        self.ledger
            .set_price(tx, item.id, initial_price, actor)
            .await?;
        Ok(Item {
            stock,
            price: initial_price,
            ..item
        })
    }

    /// Adjust an item's stock by a signed delta, with audit history.
    pub async fn adjust_stock(
        &self,
        item_id: ItemId,
        delta: i64,
        reason: &str,
        actor: &str,
    ) -> FulfillmentResult<i64> {
        let mut tx = self.store.begin().await?;
        match self.ledger.adjust_stock(&mut *tx, item_id, delta, reason, actor).await {
            Ok(stock) => {
                tx.commit().await?;
                Ok(stock)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Change an item's unit price, with audit history.
    pub async fn set_price(
        &self,
        item_id: ItemId,
        price: Decimal,
        actor: &str,
    ) -> FulfillmentResult<()> {
        let mut tx = self.store.begin().await?;
        match self.ledger.set_price(&mut *tx, item_id, price, actor).await {
            Ok(()) => tx.commit().await,
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    pub async fn item(&self, id: ItemId) -> FulfillmentResult<Item> {
        self.store.item(id).await
    }

    pub async fn item_history(&self, id: ItemId) -> FulfillmentResult<Vec<ItemHistory>> {
        self.store.item_history(id).await
    }

    // -- sales orders --------------------------------------------------------

    /// Create a sales order after validating availability for every line.
    ///
    /// Availability is live stock minus reservations held by other committed,
    /// undelivered sales orders, checked under per-item row locks in
    /// ascending item id order. Of two concurrent orders competing for the
    /// same units, exactly one commits; the other fails with
    /// `InsufficientStock`. A down payment is recorded as a payment row and
    /// reflected in the payment status immediately.
    pub async fn create_sales_order(&self, new: NewSalesOrder) -> FulfillmentResult<SalesOrder> {
        new.validate()?;
        let mut tx = self.store.begin().await?;
        match self.create_sales_order_tx(&mut *tx, new).await {
            Ok(order) => {
                tx.commit().await?;
                info!(
                    order_id = %order.id,
                    number = %order.number,
                    total = %order.total_amount,
                    "sales order created"
                );
                Ok(order)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn create_sales_order_tx(
        &self,
        tx: &mut dyn StoreTx,
        new: NewSalesOrder,
    ) -> FulfillmentResult<SalesOrder> {
        validate_and_lock(tx, &new.lines, None).await?;

        let total = new.total_amount();
        let order = tx
            .insert_sales_order(SalesOrderInsert {
                number: order_number("SO"),
                status: SalesOrderStatus::Draft,
                payment_status: PaymentStatus::derive(new.dp_amount, total),
                total_amount: total,
                paid_amount: new.dp_amount,
                dp_amount: new.dp_amount,
                lines: new.lines,
            })
            .await?;

        if new.dp_amount > Decimal::ZERO {
            tx.insert_payment(NewPayment {
                kind: OrderKind::Sales,
                order_id: order.id,
                amount: new.dp_amount,
                method: PaymentMethod::DownPayment,
            })
            .await?;
        }
        Ok(order)
    }

    /// Replace a draft sales order's lines and recompute its totals.
    ///
    /// Only drafts are editable. The order's own lines are excluded from the
    /// reservation sum during revalidation so it cannot block itself.
    pub async fn update_sales_order(
        &self,
        id: OrderId,
        lines: Vec<NewOrderLine>,
    ) -> FulfillmentResult<SalesOrder> {
        if lines.is_empty() {
            return Err(FulfillmentError::validation("order needs at least one line"));
        }
        for line in &lines {
            line.validate()?;
        }
        let mut tx = self.store.begin().await?;
        match self.update_sales_order_tx(&mut *tx, id, lines).await {
            Ok(order) => {
                tx.commit().await?;
                info!(order_id = %id, total = %order.total_amount, "sales order updated");
                Ok(order)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn update_sales_order_tx(
        &self,
        tx: &mut dyn StoreTx,
        id: OrderId,
        lines: Vec<NewOrderLine>,
    ) -> FulfillmentResult<SalesOrder> {
        let order = tx.sales_order_for_update(id).await?;
        if order.is_deleted() {
            return Err(FulfillmentError::not_found("SalesOrder", id));
        }
        if !order.status.is_editable() {
            return Err(FulfillmentError::validation(format!(
                "sales order {} is {} and can no longer be edited",
                id, order.status
            )));
        }

        validate_and_lock(tx, &lines, Some(id)).await?;

        let total: Decimal = lines.iter().map(|l| l.total_price()).sum();
        // paid_amount <= total_amount must survive the rewrite
        if order.paid_amount > total {
            return Err(FulfillmentError::validation(format!(
                "sales order {} already has {} paid, new total {} would fall below it",
                id, order.paid_amount, total
            )));
        }
        tx.replace_sales_lines(id, lines).await?;
        tx.update_sales_order(SalesOrderUpdate {
            order_id: id,
            status: order.status,
            payment_status: PaymentStatus::derive(order.paid_amount, total),
            paid_amount: order.paid_amount,
            total_amount: total,
        })
        .await?;
        tx.sales_order_for_update(id).await
    }

    /// Move a sales order one step along its lifecycle.
    ///
    /// The transition must be adjacent in the state machine; anything else
    /// fails with `InvalidTransition`. Entering `Delivered` debits stock for
    /// every line, all lines or none, in ascending item id order.
    pub async fn update_sales_status(
        &self,
        id: OrderId,
        target: SalesOrderStatus,
        actor: &str,
    ) -> FulfillmentResult<SalesOrder> {
        let mut tx = self.store.begin().await?;
        match self.update_sales_status_tx(&mut *tx, id, target, actor).await {
            Ok(order) => {
                tx.commit().await?;
                info!(order_id = %id, status = %target, "sales order transitioned");
                Ok(order)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn update_sales_status_tx(
        &self,
        tx: &mut dyn StoreTx,
        id: OrderId,
        target: SalesOrderStatus,
        actor: &str,
    ) -> FulfillmentResult<SalesOrder> {
        let order = tx.sales_order_for_update(id).await?;
        if order.is_deleted() {
            return Err(FulfillmentError::not_found("SalesOrder", id));
        }
        if !order.status.can_transition_to(target) {
            return Err(FulfillmentError::invalid_transition(order.status, target));
        }

        if target == SalesOrderStatus::Delivered {
            // Sorted so concurrent deliveries cannot deadlock on item locks
            let mut debits: BTreeMap<ItemId, i64> = BTreeMap::new();
            for line in &order.lines {
                *debits.entry(line.item_id).or_default() += line.quantity;
            }
            for (&item_id, &quantity) in &debits {
                self.ledger
                    .adjust_stock(tx, item_id, -quantity, "sales delivery", actor)
                    .await?;
            }
        }

        tx.update_sales_order(SalesOrderUpdate {
            order_id: id,
            status: target,
            payment_status: order.payment_status,
            paid_amount: order.paid_amount,
            total_amount: order.total_amount,
        })
        .await?;
        tx.sales_order_for_update(id).await
    }

    /// Record a payment against a sales order.
    ///
    /// The amount must be positive and must not exceed the remaining balance;
    /// an excess payment is rejected whole, never clamped.
    pub async fn apply_sales_payment(
        &self,
        id: OrderId,
        amount: Decimal,
        method: PaymentMethod,
    ) -> FulfillmentResult<SalesOrder> {
        if amount <= Decimal::ZERO {
            return Err(FulfillmentError::validation("payment amount must be positive"));
        }
        let mut tx = self.store.begin().await?;
        match self.apply_sales_payment_tx(&mut *tx, id, amount, method).await {
            Ok(order) => {
                tx.commit().await?;
                info!(
                    order_id = %id,
                    %amount,
                    paid = %order.paid_amount,
                    payment_status = %order.payment_status,
                    "sales payment recorded"
                );
                Ok(order)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn apply_sales_payment_tx(
        &self,
        tx: &mut dyn StoreTx,
        id: OrderId,
        amount: Decimal,
        method: PaymentMethod,
    ) -> FulfillmentResult<SalesOrder> {
        let order = tx.sales_order_for_update(id).await?;
        if order.is_deleted() {
            return Err(FulfillmentError::not_found("SalesOrder", id));
        }
        let remaining = order.remaining_amount();
        if amount > remaining {
            return Err(FulfillmentError::OverpaymentRejected {
                requested: amount,
                remaining,
            });
        }

        tx.insert_payment(NewPayment {
            kind: OrderKind::Sales,
            order_id: id,
            amount,
            method,
        })
        .await?;
        let paid = order.paid_amount + amount;
        tx.update_sales_order(SalesOrderUpdate {
            order_id: id,
            status: order.status,
            payment_status: PaymentStatus::derive(paid, order.total_amount),
            paid_amount: paid,
            total_amount: order.total_amount,
        })
        .await?;
        tx.sales_order_for_update(id).await
    }

    /// Soft-delete a draft sales order, releasing its reservations.
    pub async fn soft_delete_sales_order(&self, id: OrderId) -> FulfillmentResult<()> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let order = tx.sales_order_for_update(id).await?;
            if order.is_deleted() {
                return Err(FulfillmentError::not_found("SalesOrder", id));
            }
            if order.status != SalesOrderStatus::Draft {
                return Err(FulfillmentError::validation(format!(
                    "sales order {} is {}, only drafts can be soft-deleted",
                    id, order.status
                )));
            }
            tx.soft_delete_sales_order(id, chrono::Utc::now()).await
        }
        .await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                info!(order_id = %id, "sales order soft-deleted");
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Permanently delete a sales order, its lines, and its payments.
    pub async fn hard_delete_sales_order(&self, id: OrderId) -> FulfillmentResult<()> {
        let mut tx = self.store.begin().await?;
        let result = async {
            tx.sales_order_for_update(id).await?;
            tx.hard_delete_sales_order(id).await
        }
        .await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                info!(order_id = %id, "sales order hard-deleted");
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    pub async fn sales_order(&self, id: OrderId) -> FulfillmentResult<SalesOrder> {
        self.store.sales_order(id).await
    }

    pub async fn sales_payments(&self, id: OrderId) -> FulfillmentResult<Vec<Payment>> {
        self.store.payments(OrderKind::Sales, id).await
    }

    // -- purchase orders -----------------------------------------------------

    /// Create a purchase order. No stock validation applies; incoming goods
    /// only touch stock when received.
    pub async fn create_purchase_order(
        &self,
        new: NewPurchaseOrder,
    ) -> FulfillmentResult<PurchaseOrder> {
        new.validate()?;
        let mut tx = self.store.begin().await?;
        match self.create_purchase_order_tx(&mut *tx, new).await {
            Ok(order) => {
                tx.commit().await?;
                info!(
                    order_id = %order.id,
                    number = %order.number,
                    total = %order.total_amount,
                    "purchase order created"
                );
                Ok(order)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn create_purchase_order_tx(
        &self,
        tx: &mut dyn StoreTx,
        new: NewPurchaseOrder,
    ) -> FulfillmentResult<PurchaseOrder> {
        let total = new.total_amount();
        let order = tx
            .insert_purchase_order(PurchaseOrderInsert {
                number: order_number("PO"),
                status: PurchaseOrderStatus::Draft,
                payment_status: PaymentStatus::derive(new.dp_amount, total),
                total_amount: total,
                paid_amount: new.dp_amount,
                dp_amount: new.dp_amount,
                lines: new.lines,
            })
            .await?;

        if new.dp_amount > Decimal::ZERO {
            tx.insert_payment(NewPayment {
                kind: OrderKind::Purchase,
                order_id: order.id,
                amount: new.dp_amount,
                method: PaymentMethod::DownPayment,
            })
            .await?;
        }
        Ok(order)
    }

    /// Move a purchase order one step along its lifecycle.
    ///
    /// Direct status sets never move stock; only [`receive_items`] does.
    ///
    /// [`receive_items`]: FulfillmentEngine::receive_items
    pub async fn update_purchase_status(
        &self,
        id: OrderId,
        target: PurchaseOrderStatus,
    ) -> FulfillmentResult<PurchaseOrder> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let order = tx.purchase_order_for_update(id).await?;
            if order.is_deleted() {
                return Err(FulfillmentError::not_found("PurchaseOrder", id));
            }
            if !order.status.can_transition_to(target) {
                return Err(FulfillmentError::invalid_transition(order.status, target));
            }
            tx.update_purchase_order(PurchaseOrderUpdate {
                order_id: id,
                status: target,
                payment_status: order.payment_status,
                paid_amount: order.paid_amount,
                total_amount: order.total_amount,
            })
            .await?;
            tx.purchase_order_for_update(id).await
        }
        .await;
        match result {
            Ok(order) => {
                tx.commit().await?;
                info!(order_id = %id, status = %target, "purchase order transitioned");
                Ok(order)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Record goods received (or returned) against a purchase order's lines.
    ///
    /// The order must be in `Ordered`. Deltas accumulate on each line; if any
    /// line would exceed its ordered quantity the whole batch fails with
    /// `LineInvariantViolation` and nothing is written. Received units credit
    /// stock through the ledger, so each receipt leaves an audit row and can
    /// clear a low-stock condition. When every line is fully processed the
    /// order status advances automatically, to `Returned` if all units came
    /// back and `Received` otherwise.
    pub async fn receive_items(
        &self,
        id: OrderId,
        receipts: Vec<ReceiveLine>,
        actor: &str,
    ) -> FulfillmentResult<PurchaseOrder> {
        if receipts.is_empty() {
            return Err(FulfillmentError::validation("no receipt lines given"));
        }
        for receipt in &receipts {
            receipt.validate()?;
        }
        let mut tx = self.store.begin().await?;
        match self.receive_items_tx(&mut *tx, id, receipts, actor).await {
            Ok(order) => {
                tx.commit().await?;
                info!(order_id = %id, status = %order.status, "purchase receipt recorded");
                Ok(order)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    async fn receive_items_tx(
        &self,
        tx: &mut dyn StoreTx,
        id: OrderId,
        receipts: Vec<ReceiveLine>,
        actor: &str,
    ) -> FulfillmentResult<PurchaseOrder> {
        let order = tx.purchase_order_for_update(id).await?;
        if order.is_deleted() {
            return Err(FulfillmentError::not_found("PurchaseOrder", id));
        }
        if !order.status.can_receive() {
            return Err(FulfillmentError::validation(format!(
                "purchase order {} is {}, receipts require ordered",
                id, order.status
            )));
        }

        // Validate the whole batch before writing anything
        let mut updates = Vec::with_capacity(receipts.len());
        let mut credits: BTreeMap<ItemId, i64> = BTreeMap::new();
        for receipt in &receipts {
            let line = order
                .lines
                .iter()
                .find(|l| l.id == receipt.line_id)
                .ok_or_else(|| {
                    FulfillmentError::not_found("PurchaseOrderLine", receipt.line_id)
                })?;
            let received = line.received_quantity + receipt.received_delta;
            let returned = line.returned_quantity + receipt.returned_delta;
            if received + returned > line.quantity {
                return Err(FulfillmentError::LineInvariantViolation {
                    line_id: line.id,
                    quantity: line.quantity,
                    received,
                    returned,
                });
            }
            updates.push(LineReceiptUpdate {
                line_id: line.id,
                received_quantity: received,
                returned_quantity: returned,
            });
            if receipt.received_delta > 0 {
                *credits.entry(line.item_id).or_default() += receipt.received_delta;
            }
        }

        for update in &updates {
            tx.update_line_receipt(*update).await?;
        }
        for (&item_id, &quantity) in &credits {
            self.ledger
                .adjust_stock(tx, item_id, quantity, "purchase receipt", actor)
                .await?;
        }

        let updated = tx.purchase_order_for_update(id).await?;
        let aggregate = aggregate_receipt_status(&updated.lines);
        if aggregate != updated.status && updated.status.can_transition_to(aggregate) {
            tx.update_purchase_order(PurchaseOrderUpdate {
                order_id: id,
                status: aggregate,
                payment_status: updated.payment_status,
                paid_amount: updated.paid_amount,
                total_amount: updated.total_amount,
            })
            .await?;
        }
        tx.purchase_order_for_update(id).await
    }

    /// Record a payment against a purchase order. Same rules as sales.
    pub async fn apply_purchase_payment(
        &self,
        id: OrderId,
        amount: Decimal,
        method: PaymentMethod,
    ) -> FulfillmentResult<PurchaseOrder> {
        if amount <= Decimal::ZERO {
            return Err(FulfillmentError::validation("payment amount must be positive"));
        }
        let mut tx = self.store.begin().await?;
        let result = async {
            let order = tx.purchase_order_for_update(id).await?;
            if order.is_deleted() {
                return Err(FulfillmentError::not_found("PurchaseOrder", id));
            }
            let remaining = order.remaining_amount();
            if amount > remaining {
                return Err(FulfillmentError::OverpaymentRejected {
                    requested: amount,
                    remaining,
                });
            }
            tx.insert_payment(NewPayment {
                kind: OrderKind::Purchase,
                order_id: id,
                amount,
                method,
            })
            .await?;
            let paid = order.paid_amount + amount;
            tx.update_purchase_order(PurchaseOrderUpdate {
                order_id: id,
                status: order.status,
                payment_status: PaymentStatus::derive(paid, order.total_amount),
                paid_amount: paid,
                total_amount: order.total_amount,
            })
            .await?;
            tx.purchase_order_for_update(id).await
        }
        .await;
        match result {
            Ok(order) => {
                tx.commit().await?;
                info!(
                    order_id = %id,
                    %amount,
                    payment_status = %order.payment_status,
                    "purchase payment recorded"
                );
                Ok(order)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Soft-delete a draft purchase order.
    pub async fn soft_delete_purchase_order(&self, id: OrderId) -> FulfillmentResult<()> {
        let mut tx = self.store.begin().await?;
        let result = async {
            let order = tx.purchase_order_for_update(id).await?;
            if order.is_deleted() {
                return Err(FulfillmentError::not_found("PurchaseOrder", id));
            }
            if order.status != PurchaseOrderStatus::Draft {
                return Err(FulfillmentError::validation(format!(
                    "purchase order {} is {}, only drafts can be soft-deleted",
                    id, order.status
                )));
            }
            tx.soft_delete_purchase_order(id, chrono::Utc::now()).await
        }
        .await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                info!(order_id = %id, "purchase order soft-deleted");
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Permanently delete a purchase order, its lines, and its payments.
    pub async fn hard_delete_purchase_order(&self, id: OrderId) -> FulfillmentResult<()> {
        let mut tx = self.store.begin().await?;
        let result = async {
            tx.purchase_order_for_update(id).await?;
            tx.hard_delete_purchase_order(id).await
        }
        .await;
        match result {
            Ok(()) => {
                tx.commit().await?;
                info!(order_id = %id, "purchase order hard-deleted");
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    pub async fn purchase_order(&self, id: OrderId) -> FulfillmentResult<PurchaseOrder> {
        self.store.purchase_order(id).await
    }

    pub async fn purchase_payments(&self, id: OrderId) -> FulfillmentResult<Vec<Payment>> {
        self.store.payments(OrderKind::Purchase, id).await
    }
}

fn order_number(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &uuid[..12])
}
