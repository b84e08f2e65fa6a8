//! PostgreSQL store.
//!
//! One sqlx transaction per [`StoreTx`]; `SELECT ... FOR UPDATE` provides the
//! exclusive per-row locks the engine relies on. Dropping an uncommitted
//! transaction rolls it back and releases every lock.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use tracing::info;

use crate::config::DatabaseSettings;
use crate::error::{FulfillmentError, FulfillmentResult};
use crate::orders::{
    HistoryDimension, ItemId, LineId, NewOrderLine, OrderId, Payment, PaymentMethod,
    PaymentStatus, PurchaseOrder, PurchaseOrderLine, PurchaseOrderStatus, SalesOrder,
    SalesOrderLine, SalesOrderStatus, StockChangeType,
};
use crate::stock::{Item, ItemHistory, NewItem, NewItemHistory};

use super::{
    ItemPriceUpdate, ItemStockUpdate, LineReceiptUpdate, NewPayment, OrderKind,
    PurchaseOrderInsert, PurchaseOrderUpdate, SalesOrderInsert, SalesOrderUpdate, Store, StoreTx,
};

/// PostgreSQL-backed store.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using the application's database settings
    pub async fn connect(settings: &DatabaseSettings) -> FulfillmentResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&settings.url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Get the database pool reference
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the schema if it does not exist yet
    pub async fn run_migrations(&self) -> FulfillmentResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id BIGSERIAL PRIMARY KEY,
                name VARCHAR(128) NOT NULL,
                stock BIGINT NOT NULL DEFAULT 0 CHECK (stock >= 0),
                price NUMERIC(20, 2) NOT NULL DEFAULT 0,
                low_stock_threshold BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS item_histories (
                id BIGSERIAL PRIMARY KEY,
                item_id BIGINT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
                change_type VARCHAR(16) NOT NULL,
                old_value NUMERIC(20, 2) NOT NULL,
                new_value NUMERIC(20, 2) NOT NULL,
                current_value NUMERIC(20, 2) NOT NULL,
                actor VARCHAR(64) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_item_histories_item
             ON item_histories (item_id, id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sales_orders (
                id BIGSERIAL PRIMARY KEY,
                number VARCHAR(32) NOT NULL UNIQUE,
                status VARCHAR(16) NOT NULL,
                payment_status VARCHAR(16) NOT NULL,
                total_amount NUMERIC(20, 2) NOT NULL,
                paid_amount NUMERIC(20, 2) NOT NULL DEFAULT 0,
                dp_amount NUMERIC(20, 2) NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sales_order_lines (
                id BIGSERIAL PRIMARY KEY,
                order_id BIGINT NOT NULL REFERENCES sales_orders(id) ON DELETE CASCADE,
                item_id BIGINT NOT NULL REFERENCES items(id),
                quantity BIGINT NOT NULL CHECK (quantity > 0),
                unit_price NUMERIC(20, 2) NOT NULL,
                total_price NUMERIC(20, 2) NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS purchase_orders (
                id BIGSERIAL PRIMARY KEY,
                number VARCHAR(32) NOT NULL UNIQUE,
                status VARCHAR(16) NOT NULL,
                payment_status VARCHAR(16) NOT NULL,
                total_amount NUMERIC(20, 2) NOT NULL,
                paid_amount NUMERIC(20, 2) NOT NULL DEFAULT 0,
                dp_amount NUMERIC(20, 2) NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS purchase_order_lines (
                id BIGSERIAL PRIMARY KEY,
                order_id BIGINT NOT NULL REFERENCES purchase_orders(id) ON DELETE CASCADE,
                item_id BIGINT NOT NULL REFERENCES items(id),
                quantity BIGINT NOT NULL CHECK (quantity > 0),
                unit_price NUMERIC(20, 2) NOT NULL,
                total_price NUMERIC(20, 2) NOT NULL,
                received_quantity BIGINT NOT NULL DEFAULT 0,
                returned_quantity BIGINT NOT NULL DEFAULT 0,
                CHECK (received_quantity + returned_quantity <= quantity)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS payments (
                id BIGSERIAL PRIMARY KEY,
                order_kind VARCHAR(8) NOT NULL,
                order_id BIGINT NOT NULL,
                amount NUMERIC(20, 2) NOT NULL CHECK (amount > 0),
                method VARCHAR(16) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("database schema up to date");
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> FulfillmentResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn item(&self, id: ItemId) -> FulfillmentResult<Item> {
        let row = sqlx::query(
            "SELECT id, name, stock, price, low_stock_threshold, created_at
             FROM items WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(item_from_row)
            .ok_or_else(|| FulfillmentError::not_found("Item", id))
    }

    async fn sales_order(&self, id: OrderId) -> FulfillmentResult<SalesOrder> {
        let row = sqlx::query(&sales_order_query(false))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("SalesOrder", id))?;
        let lines = sqlx::query(
            "SELECT id, order_id, item_id, quantity, unit_price, total_price
             FROM sales_order_lines WHERE order_id = $1 ORDER BY id",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        sales_order_from_rows(row, lines)
    }

    async fn purchase_order(&self, id: OrderId) -> FulfillmentResult<PurchaseOrder> {
        let row = sqlx::query(&purchase_order_query(false))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("PurchaseOrder", id))?;
        let lines = sqlx::query(
            "SELECT id, order_id, item_id, quantity, unit_price, total_price,
                    received_quantity, returned_quantity
             FROM purchase_order_lines WHERE order_id = $1 ORDER BY id",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        purchase_order_from_rows(row, lines)
    }

    async fn item_history(&self, id: ItemId) -> FulfillmentResult<Vec<ItemHistory>> {
        let rows = sqlx::query(
            "SELECT id, item_id, change_type, old_value, new_value, current_value,
                    actor, created_at
             FROM item_histories WHERE item_id = $1 ORDER BY id",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(history_from_row).collect()
    }

    async fn payments(
        &self,
        kind: OrderKind,
        order_id: OrderId,
    ) -> FulfillmentResult<Vec<Payment>> {
        let rows = sqlx::query(
            "SELECT id, order_id, amount, method, created_at
             FROM payments WHERE order_kind = $1 AND order_id = $2 ORDER BY id",
        )
        .bind(kind.as_str())
        .bind(order_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(payment_from_row).collect()
    }
}

/// One open PostgreSQL transaction.
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn insert_item(&mut self, item: NewItem) -> FulfillmentResult<Item> {
        let row = sqlx::query(
            "INSERT INTO items (name, stock, price, low_stock_threshold)
             VALUES ($1, $2, $3, $4)
             RETURNING id, name, stock, price, low_stock_threshold, created_at",
        )
        .bind(&item.name)
        .bind(item.stock)
        .bind(item.price)
        .bind(item.low_stock_threshold)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(item_from_row(row))
    }

    async fn item_for_update(&mut self, id: ItemId) -> FulfillmentResult<Item> {
        let row = sqlx::query(
            "SELECT id, name, stock, price, low_stock_threshold, created_at
             FROM items WHERE id = $1 FOR UPDATE",
        )
        .bind(id.0)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(item_from_row)
            .ok_or_else(|| FulfillmentError::not_found("Item", id))
    }

    async fn update_item_stock(&mut self, update: ItemStockUpdate) -> FulfillmentResult<()> {
        sqlx::query("UPDATE items SET stock = $2 WHERE id = $1")
            .bind(update.item_id.0)
            .bind(update.stock)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn update_item_price(&mut self, update: ItemPriceUpdate) -> FulfillmentResult<()> {
        sqlx::query("UPDATE items SET price = $2 WHERE id = $1")
            .bind(update.item_id.0)
            .bind(update.price)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn latest_history(
        &mut self,
        item_id: ItemId,
        dimension: HistoryDimension,
    ) -> FulfillmentResult<Option<ItemHistory>> {
        let (create, update) = dimension_change_types(dimension);
        let row = sqlx::query(
            "SELECT id, item_id, change_type, old_value, new_value, current_value,
                    actor, created_at
             FROM item_histories
             WHERE item_id = $1 AND change_type IN ($2, $3)
             ORDER BY id DESC LIMIT 1",
        )
        .bind(item_id.0)
        .bind(create)
        .bind(update)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(history_from_row).transpose()
    }

    async fn append_history(&mut self, entry: NewItemHistory) -> FulfillmentResult<ItemHistory> {
        let row = sqlx::query(
            "INSERT INTO item_histories
                 (item_id, change_type, old_value, new_value, current_value, actor)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, item_id, change_type, old_value, new_value, current_value,
                       actor, created_at",
        )
        .bind(entry.item_id.0)
        .bind(entry.change_type.as_str())
        .bind(entry.old_value)
        .bind(entry.new_value)
        .bind(entry.current_value)
        .bind(&entry.actor)
        .fetch_one(&mut *self.tx)
        .await?;
        history_from_row(row)
    }

    async fn reserved_quantity(
        &mut self,
        item_id: ItemId,
        exclude_order: Option<OrderId>,
    ) -> FulfillmentResult<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(l.quantity), 0)::BIGINT AS reserved
             FROM sales_order_lines l
             JOIN sales_orders o ON o.id = l.order_id
             WHERE l.item_id = $1
               AND o.deleted_at IS NULL
               AND o.status IN ('draft', 'confirmed', 'shipped')
               AND ($2::BIGINT IS NULL OR o.id <> $2)",
        )
        .bind(item_id.0)
        .bind(exclude_order.map(|o| o.0))
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(row.get("reserved"))
    }

    async fn insert_sales_order(
        &mut self,
        order: SalesOrderInsert,
    ) -> FulfillmentResult<SalesOrder> {
        let row = sqlx::query(
            "INSERT INTO sales_orders
                 (number, status, payment_status, total_amount, paid_amount, dp_amount)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, created_at",
        )
        .bind(&order.number)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.total_amount)
        .bind(order.paid_amount)
        .bind(order.dp_amount)
        .fetch_one(&mut *self.tx)
        .await?;
        let id = OrderId(row.get("id"));
        let created_at: DateTime<Utc> = row.get("created_at");

        let mut lines = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            lines.push(self.insert_sales_line(id, line).await?);
        }

        Ok(SalesOrder {
            id,
            number: order.number,
            status: order.status,
            payment_status: order.payment_status,
            total_amount: order.total_amount,
            paid_amount: order.paid_amount,
            dp_amount: order.dp_amount,
            lines,
            created_at,
            deleted_at: None,
        })
    }

    async fn sales_order_for_update(&mut self, id: OrderId) -> FulfillmentResult<SalesOrder> {
        let row = sqlx::query(&sales_order_query(true))
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("SalesOrder", id))?;
        let lines = sqlx::query(
            "SELECT id, order_id, item_id, quantity, unit_price, total_price
             FROM sales_order_lines WHERE order_id = $1 ORDER BY id",
        )
        .bind(id.0)
        .fetch_all(&mut *self.tx)
        .await?;
        sales_order_from_rows(row, lines)
    }

    async fn update_sales_order(&mut self, update: SalesOrderUpdate) -> FulfillmentResult<()> {
        sqlx::query(
            "UPDATE sales_orders
             SET status = $2, payment_status = $3, paid_amount = $4, total_amount = $5
             WHERE id = $1",
        )
        .bind(update.order_id.0)
        .bind(update.status.as_str())
        .bind(update.payment_status.as_str())
        .bind(update.paid_amount)
        .bind(update.total_amount)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn replace_sales_lines(
        &mut self,
        order_id: OrderId,
        lines: Vec<NewOrderLine>,
    ) -> FulfillmentResult<()> {
        sqlx::query("DELETE FROM sales_order_lines WHERE order_id = $1")
            .bind(order_id.0)
            .execute(&mut *self.tx)
            .await?;
        for line in &lines {
            self.insert_sales_line(order_id, line).await?;
        }
        Ok(())
    }

    async fn soft_delete_sales_order(
        &mut self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> FulfillmentResult<()> {
        sqlx::query("UPDATE sales_orders SET deleted_at = $2 WHERE id = $1")
            .bind(id.0)
            .bind(at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn hard_delete_sales_order(&mut self, id: OrderId) -> FulfillmentResult<()> {
        sqlx::query("DELETE FROM payments WHERE order_kind = 'sales' AND order_id = $1")
            .bind(id.0)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM sales_orders WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_purchase_order(
        &mut self,
        order: PurchaseOrderInsert,
    ) -> FulfillmentResult<PurchaseOrder> {
        let row = sqlx::query(
            "INSERT INTO purchase_orders
                 (number, status, payment_status, total_amount, paid_amount, dp_amount)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, created_at",
        )
        .bind(&order.number)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.total_amount)
        .bind(order.paid_amount)
        .bind(order.dp_amount)
        .fetch_one(&mut *self.tx)
        .await?;
        let id = OrderId(row.get("id"));
        let created_at: DateTime<Utc> = row.get("created_at");

        let mut lines = Vec::with_capacity(order.lines.len());
        for line in &order.lines {
            let row = sqlx::query(
                "INSERT INTO purchase_order_lines
                     (order_id, item_id, quantity, unit_price, total_price)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING id",
            )
            .bind(id.0)
            .bind(line.item_id.0)
            .bind(line.quantity)
            .bind(line.unit_price)
            .bind(line.total_price())
            .fetch_one(&mut *self.tx)
            .await?;
            lines.push(PurchaseOrderLine {
                id: LineId(row.get("id")),
                order_id: id,
                item_id: line.item_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                total_price: line.total_price(),
                received_quantity: 0,
                returned_quantity: 0,
            });
        }

        Ok(PurchaseOrder {
            id,
            number: order.number,
            status: order.status,
            payment_status: order.payment_status,
            total_amount: order.total_amount,
            paid_amount: order.paid_amount,
            dp_amount: order.dp_amount,
            lines,
            created_at,
            deleted_at: None,
        })
    }

    async fn purchase_order_for_update(
        &mut self,
        id: OrderId,
    ) -> FulfillmentResult<PurchaseOrder> {
        let row = sqlx::query(&purchase_order_query(true))
            .bind(id.0)
            .fetch_optional(&mut *self.tx)
            .await?
            .ok_or_else(|| FulfillmentError::not_found("PurchaseOrder", id))?;
        let lines = sqlx::query(
            "SELECT id, order_id, item_id, quantity, unit_price, total_price,
                    received_quantity, returned_quantity
             FROM purchase_order_lines WHERE order_id = $1 ORDER BY id",
        )
        .bind(id.0)
        .fetch_all(&mut *self.tx)
        .await?;
        purchase_order_from_rows(row, lines)
    }

    async fn update_purchase_order(
        &mut self,
        update: PurchaseOrderUpdate,
    ) -> FulfillmentResult<()> {
        sqlx::query(
            "UPDATE purchase_orders
             SET status = $2, payment_status = $3, paid_amount = $4, total_amount = $5
             WHERE id = $1",
        )
        .bind(update.order_id.0)
        .bind(update.status.as_str())
        .bind(update.payment_status.as_str())
        .bind(update.paid_amount)
        .bind(update.total_amount)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_line_receipt(&mut self, update: LineReceiptUpdate) -> FulfillmentResult<()> {
        sqlx::query(
            "UPDATE purchase_order_lines
             SET received_quantity = $2, returned_quantity = $3
             WHERE id = $1",
        )
        .bind(update.line_id.0)
        .bind(update.received_quantity)
        .bind(update.returned_quantity)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn soft_delete_purchase_order(
        &mut self,
        id: OrderId,
        at: DateTime<Utc>,
    ) -> FulfillmentResult<()> {
        sqlx::query("UPDATE purchase_orders SET deleted_at = $2 WHERE id = $1")
            .bind(id.0)
            .bind(at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn hard_delete_purchase_order(&mut self, id: OrderId) -> FulfillmentResult<()> {
        sqlx::query("DELETE FROM payments WHERE order_kind = 'purchase' AND order_id = $1")
            .bind(id.0)
            .execute(&mut *self.tx)
            .await?;
        sqlx::query("DELETE FROM purchase_orders WHERE id = $1")
            .bind(id.0)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn insert_payment(&mut self, payment: NewPayment) -> FulfillmentResult<Payment> {
        let row = sqlx::query(
            "INSERT INTO payments (order_kind, order_id, amount, method)
             VALUES ($1, $2, $3, $4)
             RETURNING id, order_id, amount, method, created_at",
        )
        .bind(payment.kind.as_str())
        .bind(payment.order_id.0)
        .bind(payment.amount)
        .bind(payment.method.as_str())
        .fetch_one(&mut *self.tx)
        .await?;
        payment_from_row(row)
    }

    async fn commit(self: Box<Self>) -> FulfillmentResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> FulfillmentResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl PgStoreTx {
    async fn insert_sales_line(
        &mut self,
        order_id: OrderId,
        line: &NewOrderLine,
    ) -> FulfillmentResult<SalesOrderLine> {
        let row = sqlx::query(
            "INSERT INTO sales_order_lines
                 (order_id, item_id, quantity, unit_price, total_price)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(order_id.0)
        .bind(line.item_id.0)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.total_price())
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(SalesOrderLine {
            id: LineId(row.get("id")),
            order_id,
            item_id: line.item_id,
            quantity: line.quantity,
            unit_price: line.unit_price,
            total_price: line.total_price(),
        })
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn sales_order_query(lock: bool) -> String {
    let mut q = String::from(
        "SELECT id, number, status, payment_status, total_amount, paid_amount,
                dp_amount, created_at, deleted_at
         FROM sales_orders WHERE id = $1",
    );
    if lock {
        q.push_str(" FOR UPDATE");
    }
    q
}

fn purchase_order_query(lock: bool) -> String {
    let mut q = String::from(
        "SELECT id, number, status, payment_status, total_amount, paid_amount,
                dp_amount, created_at, deleted_at
         FROM purchase_orders WHERE id = $1",
    );
    if lock {
        q.push_str(" FOR UPDATE");
    }
    q
}

fn dimension_change_types(dimension: HistoryDimension) -> (&'static str, &'static str) {
    match dimension {
        HistoryDimension::Stock => ("create_stock", "update_stock"),
        HistoryDimension::Price => ("create_price", "update_price"),
    }
}

fn corrupt(what: &str, value: &str) -> FulfillmentError {
    FulfillmentError::Persistence(format!("unexpected {what} in database: '{value}'"))
}

fn item_from_row(row: PgRow) -> Item {
    Item {
        id: ItemId(row.get("id")),
        name: row.get("name"),
        stock: row.get("stock"),
        price: row.get("price"),
        low_stock_threshold: row.get("low_stock_threshold"),
        created_at: row.get("created_at"),
    }
}

fn history_from_row(row: PgRow) -> FulfillmentResult<ItemHistory> {
    let change_type: String = row.get("change_type");
    Ok(ItemHistory {
        id: row.get("id"),
        item_id: ItemId(row.get("item_id")),
        change_type: StockChangeType::parse(&change_type)
            .ok_or_else(|| corrupt("change type", &change_type))?,
        old_value: row.get("old_value"),
        new_value: row.get("new_value"),
        current_value: row.get("current_value"),
        actor: row.get("actor"),
        created_at: row.get("created_at"),
    })
}

fn payment_from_row(row: PgRow) -> FulfillmentResult<Payment> {
    let method: String = row.get("method");
    Ok(Payment {
        id: row.get("id"),
        order_id: OrderId(row.get("order_id")),
        amount: row.get("amount"),
        method: PaymentMethod::parse(&method)
            .ok_or_else(|| corrupt("payment method", &method))?,
        created_at: row.get("created_at"),
    })
}

fn sales_order_from_rows(row: PgRow, lines: Vec<PgRow>) -> FulfillmentResult<SalesOrder> {
    let status: String = row.get("status");
    let payment_status: String = row.get("payment_status");
    let id = OrderId(row.get("id"));
    Ok(SalesOrder {
        id,
        number: row.get("number"),
        status: SalesOrderStatus::parse(&status)
            .ok_or_else(|| corrupt("sales order status", &status))?,
        payment_status: PaymentStatus::parse(&payment_status)
            .ok_or_else(|| corrupt("payment status", &payment_status))?,
        total_amount: row.get("total_amount"),
        paid_amount: row.get("paid_amount"),
        dp_amount: row.get("dp_amount"),
        lines: lines
            .into_iter()
            .map(|l| SalesOrderLine {
                id: LineId(l.get("id")),
                order_id: id,
                item_id: ItemId(l.get("item_id")),
                quantity: l.get("quantity"),
                unit_price: l.get("unit_price"),
                total_price: l.get("total_price"),
            })
            .collect(),
        created_at: row.get("created_at"),
        deleted_at: row.get("deleted_at"),
    })
}

fn purchase_order_from_rows(row: PgRow, lines: Vec<PgRow>) -> FulfillmentResult<PurchaseOrder> {
    let status: String = row.get("status");
    let payment_status: String = row.get("payment_status");
    let id = OrderId(row.get("id"));
    Ok(PurchaseOrder {
        id,
        number: row.get("number"),
        status: PurchaseOrderStatus::parse(&status)
            .ok_or_else(|| corrupt("purchase order status", &status))?,
        payment_status: PaymentStatus::parse(&payment_status)
            .ok_or_else(|| corrupt("payment status", &payment_status))?,
        total_amount: row.get("total_amount"),
        paid_amount: row.get("paid_amount"),
        dp_amount: row.get("dp_amount"),
        lines: lines
            .into_iter()
            .map(|l| PurchaseOrderLine {
                id: LineId(l.get("id")),
                order_id: id,
                item_id: ItemId(l.get("item_id")),
                quantity: l.get("quantity"),
                unit_price: l.get("unit_price"),
                total_price: l.get("total_price"),
                received_quantity: l.get("received_quantity"),
                returned_quantity: l.get("returned_quantity"),
            })
            .collect(),
        created_at: row.get("created_at"),
        deleted_at: row.get("deleted_at"),
    })
}
