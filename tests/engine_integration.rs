//! End-to-end engine scenarios over the in-memory store.
//!
//! The in-memory store reproduces the row-lock blocking of the PostgreSQL
//! backend, so the concurrency scenarios here exercise the real locking
//! protocol, not a simulation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use inventory_core::engine::FulfillmentEngine;
use inventory_core::error::FulfillmentError;
use inventory_core::notify::{
    Notification, NotificationDispatcher, NotificationSink, NotifierHandle, SinkRegistry,
};
use inventory_core::orders::{
    aggregate_receipt_status, ItemId, LineStatus, NewOrderLine, NewPurchaseOrder, NewSalesOrder,
    PaymentMethod, PaymentStatus, PurchaseOrderStatus, ReceiveLine, SalesOrderStatus,
    StockChangeType,
};
use inventory_core::stock::{Item, NewItem};
use inventory_core::storage::memory::MemoryStore;

fn engine() -> FulfillmentEngine {
    FulfillmentEngine::new(Arc::new(MemoryStore::new()), NotifierHandle::disabled())
}

async fn seed_item(engine: &FulfillmentEngine, stock: i64, price: Decimal) -> Item {
    engine
        .create_item(
            NewItem::new("widget").with_stock(stock).with_price(price),
            "tester",
        )
        .await
        .unwrap()
}

fn line(item: &Item, quantity: i64) -> NewOrderLine {
    NewOrderLine::new(item.id, quantity, item.price)
}

// -- stock ledger ------------------------------------------------------------

#[tokio::test]
async fn item_creation_seeds_both_history_chains() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(4.50)).await;
    assert_eq!(item.stock, 10);
    assert_eq!(item.price, dec!(4.50));

    let history = engine.item_history(item.id).await.unwrap();
    assert_eq!(history.len(), 2);

    let stock_row = &history[0];
    assert_eq!(stock_row.change_type, StockChangeType::CreateStock);
    assert_eq!(stock_row.old_value, dec!(0));
    assert_eq!(stock_row.new_value, dec!(10));
    assert_eq!(stock_row.current_value, dec!(10));

    let price_row = &history[1];
    assert_eq!(price_row.change_type, StockChangeType::CreatePrice);
    assert_eq!(price_row.old_value, dec!(0));
    assert_eq!(price_row.new_value, dec!(4.50));
    assert_eq!(price_row.current_value, dec!(4.50));
}

#[tokio::test]
async fn adjustments_chain_old_value_to_prior_current_value() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(1)).await;

    assert_eq!(
        engine.adjust_stock(item.id, 5, "restock", "tester").await.unwrap(),
        15
    );
    assert_eq!(
        engine.adjust_stock(item.id, -3, "damage", "tester").await.unwrap(),
        12
    );

    let history = engine.item_history(item.id).await.unwrap();
    let stock_rows: Vec<_> = history
        .iter()
        .filter(|h| h.change_type.dimension() == inventory_core::orders::HistoryDimension::Stock)
        .collect();
    assert_eq!(stock_rows.len(), 3);

    assert_eq!(stock_rows[1].change_type, StockChangeType::UpdateStock);
    assert_eq!(stock_rows[1].old_value, dec!(10));
    assert_eq!(stock_rows[1].new_value, dec!(5));
    assert_eq!(stock_rows[1].current_value, dec!(15));

    assert_eq!(stock_rows[2].old_value, dec!(15));
    assert_eq!(stock_rows[2].new_value, dec!(-3));
    assert_eq!(stock_rows[2].current_value, dec!(12));

    assert_eq!(engine.item(item.id).await.unwrap().stock, 12);
}

#[tokio::test]
async fn stock_debit_below_zero_is_rejected_and_unrecorded() {
    let engine = engine();
    let item = seed_item(&engine, 3, dec!(1)).await;

    let err = engine
        .adjust_stock(item.id, -5, "oops", "tester")
        .await
        .unwrap_err();
    match err {
        FulfillmentError::InsufficientStock { shortages } => {
            assert_eq!(shortages.len(), 1);
            assert_eq!(shortages[0].requested, 5);
            assert_eq!(shortages[0].available, 3);
        }
        other => panic!("expected InsufficientStock, got {other}"),
    }

    // Nothing was written
    assert_eq!(engine.item(item.id).await.unwrap().stock, 3);
    let stock_rows = engine
        .item_history(item.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|h| h.change_type == StockChangeType::CreateStock
            || h.change_type == StockChangeType::UpdateStock)
        .count();
    assert_eq!(stock_rows, 1);
}

#[tokio::test]
async fn price_changes_use_their_own_chain() {
    let engine = engine();
    let item = seed_item(&engine, 1, dec!(2)).await;

    engine.set_price(item.id, dec!(3.25), "tester").await.unwrap();
    assert_eq!(engine.item(item.id).await.unwrap().price, dec!(3.25));

    let history = engine.item_history(item.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.change_type, StockChangeType::UpdatePrice);
    assert_eq!(last.old_value, dec!(2));
    assert_eq!(last.new_value, dec!(3.25));

    let err = engine.set_price(item.id, dec!(-1), "tester").await.unwrap_err();
    assert!(matches!(err, FulfillmentError::Validation(_)));
}

// -- reservations and the oversell race --------------------------------------

#[tokio::test]
async fn committed_sales_orders_reserve_stock() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(1)).await;

    engine
        .create_sales_order(NewSalesOrder::new(vec![line(&item, 6)]))
        .await
        .unwrap();

    // Physical stock unchanged; only availability shrank
    assert_eq!(engine.item(item.id).await.unwrap().stock, 10);

    let err = engine
        .create_sales_order(NewSalesOrder::new(vec![line(&item, 6)]))
        .await
        .unwrap_err();
    match err {
        FulfillmentError::InsufficientStock { shortages } => {
            assert_eq!(shortages[0].item_id, item.id);
            assert_eq!(shortages[0].requested, 6);
            assert_eq!(shortages[0].available, 4);
        }
        other => panic!("expected InsufficientStock, got {other}"),
    }

    // The remaining 4 are still sellable
    engine
        .create_sales_order(NewSalesOrder::new(vec![line(&item, 4)]))
        .await
        .unwrap();
}

#[tokio::test]
async fn concurrent_creates_cannot_oversell() {
    let engine = Arc::new(engine());
    let item = seed_item(&engine, 10, dec!(1)).await;

    let spawn_create = |engine: Arc<FulfillmentEngine>, item: Item| {
        tokio::spawn(async move {
            engine
                .create_sales_order(NewSalesOrder::new(vec![line(&item, 6)]))
                .await
        })
    };
    let a = spawn_create(engine.clone(), item.clone());
    let b = spawn_create(engine.clone(), item.clone());

    let results = [a.await.unwrap(), b.await.unwrap()];
    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1, "exactly one of two competing orders must commit");

    let loss = results.into_iter().find(|r| r.is_err()).unwrap().unwrap_err();
    match loss {
        FulfillmentError::InsufficientStock { shortages } => {
            assert_eq!(shortages[0].requested, 6);
            assert_eq!(shortages[0].available, 4);
        }
        other => panic!("expected InsufficientStock, got {other}"),
    }
}

#[tokio::test]
async fn multi_item_shortage_reports_every_item() {
    let engine = engine();
    let a = engine
        .create_item(NewItem::new("bolt").with_stock(2).with_price(dec!(1)), "tester")
        .await
        .unwrap();
    let b = engine
        .create_item(NewItem::new("nut").with_stock(3).with_price(dec!(1)), "tester")
        .await
        .unwrap();

    let err = engine
        .create_sales_order(NewSalesOrder::new(vec![line(&a, 5), line(&b, 4)]))
        .await
        .unwrap_err();
    match err {
        FulfillmentError::InsufficientStock { shortages } => {
            assert_eq!(shortages.len(), 2);
            assert_eq!(shortages[0].item_id, a.id);
            assert_eq!(shortages[0].available, 2);
            assert_eq!(shortages[1].item_id, b.id);
            assert_eq!(shortages[1].available, 3);
        }
        other => panic!("expected InsufficientStock, got {other}"),
    }
}

#[tokio::test]
async fn duplicate_lines_for_one_item_are_summed() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(1)).await;

    let err = engine
        .create_sales_order(NewSalesOrder::new(vec![line(&item, 6), line(&item, 6)]))
        .await
        .unwrap_err();
    match err {
        FulfillmentError::InsufficientStock { shortages } => {
            assert_eq!(shortages[0].requested, 12);
            assert_eq!(shortages[0].available, 10);
        }
        other => panic!("expected InsufficientStock, got {other}"),
    }
}

#[tokio::test]
async fn draft_update_excludes_its_own_reservation() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(1)).await;

    let order = engine
        .create_sales_order(NewSalesOrder::new(vec![line(&item, 6)]))
        .await
        .unwrap();

    // 6 reserved by itself plus 4 free; growing to 10 only works because the
    // order's own lines are excluded from the reservation sum
    let updated = engine
        .update_sales_order(order.id, vec![line(&item, 10)])
        .await
        .unwrap();
    assert_eq!(updated.total_amount, dec!(10));
    assert_eq!(updated.lines.len(), 1);
    assert_eq!(updated.lines[0].quantity, 10);

    let err = engine
        .update_sales_order(order.id, vec![line(&item, 11)])
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::InsufficientStock { .. }));
}

#[tokio::test]
async fn draft_cannot_shrink_below_its_paid_amount() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(100)).await;

    let order = engine
        .create_sales_order(
            NewSalesOrder::new(vec![line(&item, 2)]).with_down_payment(dec!(200)),
        )
        .await
        .unwrap();
    assert_eq!(order.total_amount, dec!(200));
    assert_eq!(order.paid_amount, dec!(200));

    // 200 already paid; a rewrite down to a 100 total would leave money
    // unaccounted for and must be rejected whole
    let err = engine
        .update_sales_order(order.id, vec![line(&item, 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::Validation(_)));

    let order = engine.sales_order(order.id).await.unwrap();
    assert_eq!(order.total_amount, dec!(200));
    assert_eq!(order.paid_amount, dec!(200));
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].quantity, 2);

    // growing the total is still fine
    let grown = engine
        .update_sales_order(order.id, vec![line(&item, 3)])
        .await
        .unwrap();
    assert_eq!(grown.total_amount, dec!(300));
    assert_eq!(grown.paid_amount, dec!(200));
}

#[tokio::test]
async fn soft_deleting_a_draft_releases_its_reservation() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(1)).await;

    let order = engine
        .create_sales_order(NewSalesOrder::new(vec![line(&item, 10)]))
        .await
        .unwrap();
    assert!(matches!(
        engine
            .create_sales_order(NewSalesOrder::new(vec![line(&item, 1)]))
            .await,
        Err(FulfillmentError::InsufficientStock { .. })
    ));

    engine.soft_delete_sales_order(order.id).await.unwrap();
    assert!(engine.sales_order(order.id).await.unwrap().is_deleted());

    engine
        .create_sales_order(NewSalesOrder::new(vec![line(&item, 10)]))
        .await
        .unwrap();
}

// -- sales lifecycle ---------------------------------------------------------

#[tokio::test]
async fn delivery_debits_stock_and_records_history() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(2)).await;

    let order = engine
        .create_sales_order(NewSalesOrder::new(vec![line(&item, 6)]))
        .await
        .unwrap();
    assert_eq!(order.status, SalesOrderStatus::Draft);

    for status in [
        SalesOrderStatus::Confirmed,
        SalesOrderStatus::Shipped,
        SalesOrderStatus::Delivered,
    ] {
        let order = engine
            .update_sales_status(order.id, status, "tester")
            .await
            .unwrap();
        assert_eq!(order.status, status);
    }

    assert_eq!(engine.item(item.id).await.unwrap().stock, 4);

    let last = engine.item_history(item.id).await.unwrap();
    let last = last.last().unwrap();
    assert_eq!(last.change_type, StockChangeType::UpdateStock);
    assert_eq!(last.new_value, dec!(-6));
    assert_eq!(last.current_value, dec!(4));
}

#[tokio::test]
async fn delivery_fails_whole_when_any_line_lacks_stock() {
    let engine = engine();
    let a = engine
        .create_item(NewItem::new("bolt").with_stock(5).with_price(dec!(1)), "tester")
        .await
        .unwrap();
    let b = engine
        .create_item(NewItem::new("nut").with_stock(5).with_price(dec!(1)), "tester")
        .await
        .unwrap();

    let order = engine
        .create_sales_order(NewSalesOrder::new(vec![line(&a, 3), line(&b, 3)]))
        .await
        .unwrap();
    engine
        .update_sales_status(order.id, SalesOrderStatus::Confirmed, "tester")
        .await
        .unwrap();
    engine
        .update_sales_status(order.id, SalesOrderStatus::Shipped, "tester")
        .await
        .unwrap();

    // Drain item b behind the reservation's back
    engine.adjust_stock(b.id, -4, "shrinkage", "tester").await.unwrap();

    let err = engine
        .update_sales_status(order.id, SalesOrderStatus::Delivered, "tester")
        .await
        .unwrap_err();
    assert!(matches!(err, FulfillmentError::InsufficientStock { .. }));

    // All-or-nothing: item a was not debited either
    assert_eq!(engine.item(a.id).await.unwrap().stock, 5);
    assert_eq!(engine.item(b.id).await.unwrap().stock, 1);
    assert_eq!(
        engine.sales_order(order.id).await.unwrap().status,
        SalesOrderStatus::Shipped
    );
}

fn sales_path_to(target: SalesOrderStatus) -> Vec<SalesOrderStatus> {
    match target {
        SalesOrderStatus::Draft => vec![],
        SalesOrderStatus::Confirmed => vec![SalesOrderStatus::Confirmed],
        SalesOrderStatus::Shipped => {
            vec![SalesOrderStatus::Confirmed, SalesOrderStatus::Shipped]
        }
        SalesOrderStatus::Delivered => vec![
            SalesOrderStatus::Confirmed,
            SalesOrderStatus::Shipped,
            SalesOrderStatus::Delivered,
        ],
        SalesOrderStatus::Closed => {
            vec![SalesOrderStatus::Confirmed, SalesOrderStatus::Closed]
        }
    }
}

#[tokio::test]
async fn every_non_adjacent_sales_transition_is_rejected() {
    let engine = engine();
    let item = seed_item(&engine, 1_000, dec!(1)).await;

    for from in SalesOrderStatus::all() {
        let order = engine
            .create_sales_order(NewSalesOrder::new(vec![line(&item, 1)]))
            .await
            .unwrap();
        for step in sales_path_to(from) {
            engine.update_sales_status(order.id, step, "tester").await.unwrap();
        }

        for to in SalesOrderStatus::all() {
            if from.can_transition_to(to) {
                continue;
            }
            let err = engine
                .update_sales_status(order.id, to, "tester")
                .await
                .unwrap_err();
            match err {
                FulfillmentError::InvalidTransition { from: f, to: t } => {
                    assert_eq!(f, from.to_string());
                    assert_eq!(t, to.to_string());
                }
                other => panic!("expected InvalidTransition {from}->{to}, got {other}"),
            }
            // State unchanged after the rejection
            assert_eq!(engine.sales_order(order.id).await.unwrap().status, from);
        }
    }
}

#[tokio::test]
async fn only_drafts_can_be_edited_or_soft_deleted() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(1)).await;

    let order = engine
        .create_sales_order(NewSalesOrder::new(vec![line(&item, 2)]))
        .await
        .unwrap();
    engine
        .update_sales_status(order.id, SalesOrderStatus::Confirmed, "tester")
        .await
        .unwrap();

    assert!(matches!(
        engine.update_sales_order(order.id, vec![line(&item, 3)]).await,
        Err(FulfillmentError::Validation(_))
    ));
    assert!(matches!(
        engine.soft_delete_sales_order(order.id).await,
        Err(FulfillmentError::Validation(_))
    ));
}

#[tokio::test]
async fn hard_delete_removes_order_and_payments() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(100)).await;

    let order = engine
        .create_sales_order(
            NewSalesOrder::new(vec![line(&item, 2)]).with_down_payment(dec!(50)),
        )
        .await
        .unwrap();
    assert_eq!(engine.sales_payments(order.id).await.unwrap().len(), 1);

    engine.hard_delete_sales_order(order.id).await.unwrap();

    assert!(matches!(
        engine.sales_order(order.id).await,
        Err(FulfillmentError::NotFound { .. })
    ));
    assert!(engine.sales_payments(order.id).await.unwrap().is_empty());
}

// -- payments ----------------------------------------------------------------

#[tokio::test]
async fn down_payment_is_recorded_and_drives_payment_status() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(100)).await;

    let order = engine
        .create_sales_order(
            NewSalesOrder::new(vec![line(&item, 10)]).with_down_payment(dec!(250)),
        )
        .await
        .unwrap();
    assert_eq!(order.total_amount, dec!(1000));
    assert_eq!(order.paid_amount, dec!(250));
    assert_eq!(order.payment_status, PaymentStatus::Partial);

    let payments = engine.sales_payments(order.id).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, dec!(250));
    assert_eq!(payments[0].method, PaymentMethod::DownPayment);
}

#[tokio::test]
async fn overpayment_is_rejected_whole_never_clamped() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(100)).await;

    let order = engine
        .create_sales_order(NewSalesOrder::new(vec![line(&item, 10)]))
        .await
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Unpaid);

    let order = engine
        .apply_sales_payment(order.id, dec!(600), PaymentMethod::Transfer)
        .await
        .unwrap();
    assert_eq!(order.paid_amount, dec!(600));
    assert_eq!(order.payment_status, PaymentStatus::Partial);

    let err = engine
        .apply_sales_payment(order.id, dec!(500), PaymentMethod::Cash)
        .await
        .unwrap_err();
    match err {
        FulfillmentError::OverpaymentRejected { requested, remaining } => {
            assert_eq!(requested, dec!(500));
            assert_eq!(remaining, dec!(400));
        }
        other => panic!("expected OverpaymentRejected, got {other}"),
    }
    // The rejected payment left no trace
    assert_eq!(engine.sales_payments(order.id).await.unwrap().len(), 1);

    let order = engine
        .apply_sales_payment(order.id, dec!(400), PaymentMethod::Cash)
        .await
        .unwrap();
    assert_eq!(order.paid_amount, dec!(1000));
    assert_eq!(order.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn non_positive_payments_are_rejected() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(100)).await;
    let order = engine
        .create_sales_order(NewSalesOrder::new(vec![line(&item, 1)]))
        .await
        .unwrap();

    for amount in [dec!(0), dec!(-5)] {
        assert!(matches!(
            engine
                .apply_sales_payment(order.id, amount, PaymentMethod::Cash)
                .await,
            Err(FulfillmentError::Validation(_))
        ));
    }
}

// -- purchase lifecycle ------------------------------------------------------

#[tokio::test]
async fn purchase_creation_does_not_touch_stock() {
    let engine = engine();
    let item = seed_item(&engine, 2, dec!(1)).await;

    let order = engine
        .create_purchase_order(NewPurchaseOrder::new(vec![line(&item, 50)]))
        .await
        .unwrap();
    assert_eq!(order.status, PurchaseOrderStatus::Draft);
    assert_eq!(engine.item(item.id).await.unwrap().stock, 2);
}

#[tokio::test]
async fn partial_then_final_receipt_credits_stock_and_advances_status() {
    let engine = engine();
    let item = seed_item(&engine, 0, dec!(1)).await;

    let order = engine
        .create_purchase_order(NewPurchaseOrder::new(vec![line(&item, 20)]))
        .await
        .unwrap();
    engine
        .update_purchase_status(order.id, PurchaseOrderStatus::Ordered)
        .await
        .unwrap();
    let line_id = order.lines[0].id;

    let order = engine
        .receive_items(order.id, vec![ReceiveLine::new(line_id, 15, 0)], "tester")
        .await
        .unwrap();
    assert_eq!(order.status, PurchaseOrderStatus::Ordered);
    assert_eq!(order.lines[0].received_quantity, 15);
    assert_eq!(order.lines[0].status(), LineStatus::Partial);
    assert_eq!(engine.item(item.id).await.unwrap().stock, 15);

    let order = engine
        .receive_items(order.id, vec![ReceiveLine::new(line_id, 5, 0)], "tester")
        .await
        .unwrap();
    assert_eq!(order.status, PurchaseOrderStatus::Received);
    assert_eq!(order.lines[0].status(), LineStatus::Received);
    assert_eq!(engine.item(item.id).await.unwrap().stock, 20);
}

#[tokio::test]
async fn over_receipt_aborts_the_whole_batch() {
    let engine = engine();
    let a = engine
        .create_item(NewItem::new("bolt").with_price(dec!(1)), "tester")
        .await
        .unwrap();
    let b = engine
        .create_item(NewItem::new("nut").with_price(dec!(1)), "tester")
        .await
        .unwrap();

    let order = engine
        .create_purchase_order(NewPurchaseOrder::new(vec![line(&a, 10), line(&b, 10)]))
        .await
        .unwrap();
    engine
        .update_purchase_status(order.id, PurchaseOrderStatus::Ordered)
        .await
        .unwrap();

    let err = engine
        .receive_items(
            order.id,
            vec![
                ReceiveLine::new(order.lines[0].id, 10, 0),
                ReceiveLine::new(order.lines[1].id, 11, 0),
            ],
            "tester",
        )
        .await
        .unwrap_err();
    match err {
        FulfillmentError::LineInvariantViolation { line_id, quantity, received, .. } => {
            assert_eq!(line_id, order.lines[1].id);
            assert_eq!(quantity, 10);
            assert_eq!(received, 11);
        }
        other => panic!("expected LineInvariantViolation, got {other}"),
    }

    // Neither line was touched, no stock moved
    let order = engine.purchase_order(order.id).await.unwrap();
    assert!(order.lines.iter().all(|l| l.received_quantity == 0));
    assert_eq!(engine.item(a.id).await.unwrap().stock, 0);
    assert_eq!(engine.item(b.id).await.unwrap().stock, 0);
}

#[tokio::test]
async fn receipts_are_deliberately_not_idempotent() {
    // Deltas accumulate: replaying the same receipt doubles the counters.
    // There is no request-id dedup; retry handling belongs to the caller.
    let engine = engine();
    let item = seed_item(&engine, 0, dec!(1)).await;

    let order = engine
        .create_purchase_order(NewPurchaseOrder::new(vec![line(&item, 20)]))
        .await
        .unwrap();
    engine
        .update_purchase_status(order.id, PurchaseOrderStatus::Ordered)
        .await
        .unwrap();

    let receipt = vec![ReceiveLine::new(order.lines[0].id, 10, 0)];
    engine.receive_items(order.id, receipt.clone(), "tester").await.unwrap();
    let order = engine.receive_items(order.id, receipt, "tester").await.unwrap();

    assert_eq!(order.lines[0].received_quantity, 20);
    assert_eq!(order.status, PurchaseOrderStatus::Received);
    assert_eq!(engine.item(item.id).await.unwrap().stock, 20);
}

#[tokio::test]
async fn mixed_receipt_credits_only_received_units() {
    let engine = engine();
    let item = seed_item(&engine, 0, dec!(1)).await;

    let order = engine
        .create_purchase_order(NewPurchaseOrder::new(vec![line(&item, 20)]))
        .await
        .unwrap();
    engine
        .update_purchase_status(order.id, PurchaseOrderStatus::Ordered)
        .await
        .unwrap();

    let order = engine
        .receive_items(
            order.id,
            vec![ReceiveLine::new(order.lines[0].id, 15, 5)],
            "tester",
        )
        .await
        .unwrap();

    assert_eq!(order.lines[0].status(), LineStatus::Completed);
    assert_eq!(order.status, PurchaseOrderStatus::Received);
    assert_eq!(engine.item(item.id).await.unwrap().stock, 15);
}

#[tokio::test]
async fn fully_returned_order_aggregates_to_returned_without_stock() {
    let engine = engine();
    let item = seed_item(&engine, 0, dec!(1)).await;

    let order = engine
        .create_purchase_order(NewPurchaseOrder::new(vec![line(&item, 8)]))
        .await
        .unwrap();
    engine
        .update_purchase_status(order.id, PurchaseOrderStatus::Ordered)
        .await
        .unwrap();

    let order = engine
        .receive_items(
            order.id,
            vec![ReceiveLine::new(order.lines[0].id, 0, 8)],
            "tester",
        )
        .await
        .unwrap();
    assert_eq!(order.status, PurchaseOrderStatus::Returned);
    assert_eq!(order.lines[0].status(), LineStatus::Returned);
    // Returned units never entered stock
    assert_eq!(engine.item(item.id).await.unwrap().stock, 0);
}

#[tokio::test]
async fn receipts_require_ordered_status() {
    let engine = engine();
    let item = seed_item(&engine, 0, dec!(1)).await;

    let order = engine
        .create_purchase_order(NewPurchaseOrder::new(vec![line(&item, 5)]))
        .await
        .unwrap();

    // Still a draft
    assert!(matches!(
        engine
            .receive_items(
                order.id,
                vec![ReceiveLine::new(order.lines[0].id, 5, 0)],
                "tester"
            )
            .await,
        Err(FulfillmentError::Validation(_))
    ));
}

fn purchase_path_to(target: PurchaseOrderStatus) -> Vec<PurchaseOrderStatus> {
    match target {
        PurchaseOrderStatus::Draft => vec![],
        PurchaseOrderStatus::Ordered => vec![PurchaseOrderStatus::Ordered],
        PurchaseOrderStatus::Received => {
            vec![PurchaseOrderStatus::Ordered, PurchaseOrderStatus::Received]
        }
        PurchaseOrderStatus::Returned => {
            vec![PurchaseOrderStatus::Ordered, PurchaseOrderStatus::Returned]
        }
        PurchaseOrderStatus::Closed => {
            vec![PurchaseOrderStatus::Ordered, PurchaseOrderStatus::Closed]
        }
    }
}

#[tokio::test]
async fn every_non_adjacent_purchase_transition_is_rejected() {
    let engine = engine();
    let item = seed_item(&engine, 0, dec!(1)).await;

    for from in PurchaseOrderStatus::all() {
        let order = engine
            .create_purchase_order(NewPurchaseOrder::new(vec![line(&item, 1)]))
            .await
            .unwrap();
        for step in purchase_path_to(from) {
            engine.update_purchase_status(order.id, step).await.unwrap();
        }

        for to in PurchaseOrderStatus::all() {
            if from.can_transition_to(to) {
                continue;
            }
            let err = engine.update_purchase_status(order.id, to).await.unwrap_err();
            assert!(
                matches!(err, FulfillmentError::InvalidTransition { .. }),
                "expected InvalidTransition for {from}->{to}"
            );
            assert_eq!(engine.purchase_order(order.id).await.unwrap().status, from);
        }
    }
}

#[tokio::test]
async fn purchase_payments_follow_the_same_rules_as_sales() {
    let engine = engine();
    let item = seed_item(&engine, 0, dec!(50)).await;

    let order = engine
        .create_purchase_order(NewPurchaseOrder::new(vec![line(&item, 4)]))
        .await
        .unwrap();
    assert_eq!(order.total_amount, dec!(200));

    let order = engine
        .apply_purchase_payment(order.id, dec!(200), PaymentMethod::Transfer)
        .await
        .unwrap();
    assert_eq!(order.payment_status, PaymentStatus::Paid);

    assert!(matches!(
        engine
            .apply_purchase_payment(order.id, dec!(1), PaymentMethod::Cash)
            .await,
        Err(FulfillmentError::OverpaymentRejected { .. })
    ));
}

// -- notifications -----------------------------------------------------------

struct RecordingSink {
    count: AtomicUsize,
    last: parking_lot::Mutex<Option<Notification>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            count: AtomicUsize::new(0),
            last: parking_lot::Mutex::new(None),
        })
    }
}

impl NotificationSink for RecordingSink {
    fn deliver(&self, notification: &Notification) {
        self.count.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(notification.clone());
    }
}

#[tokio::test]
async fn crossing_the_threshold_notifies_registered_sinks() {
    let registry = Arc::new(SinkRegistry::new());
    let sink = RecordingSink::new();
    registry.add("recording", sink.clone());
    let notifier = NotificationDispatcher::spawn(registry, 16);

    let engine = FulfillmentEngine::new(Arc::new(MemoryStore::new()), notifier);
    let item = engine
        .create_item(
            NewItem::new("widget")
                .with_stock(10)
                .with_price(dec!(1))
                .with_low_stock_threshold(3),
            "tester",
        )
        .await
        .unwrap();

    // Above threshold, no notification
    engine.adjust_stock(item.id, -5, "sale", "tester").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.count.load(Ordering::SeqCst), 0);

    // 5 - 2 = 3, at the threshold
    engine.adjust_stock(item.id, -2, "sale", "tester").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sink.count.load(Ordering::SeqCst), 1);

    let last = sink.last.lock().clone().unwrap();
    assert_eq!(last.metadata["item_id"], item.id.0);
    assert_eq!(last.metadata["stock"], 3);
    assert_eq!(last.metadata["threshold"], 3);
}

#[tokio::test]
async fn notification_failure_cannot_fail_the_mutation() {
    // A disabled notifier drops everything; stock operations must not care.
    let engine = engine();
    let item = engine
        .create_item(
            NewItem::new("widget")
                .with_stock(5)
                .with_price(dec!(1))
                .with_low_stock_threshold(10),
            "tester",
        )
        .await
        .unwrap();
    assert_eq!(
        engine.adjust_stock(item.id, -1, "sale", "tester").await.unwrap(),
        4
    );
}

// -- derived status sanity over the public surface ---------------------------

#[tokio::test]
async fn aggregate_status_is_pure_over_lines() {
    let engine = engine();
    let item = seed_item(&engine, 0, dec!(1)).await;
    let order = engine
        .create_purchase_order(NewPurchaseOrder::new(vec![line(&item, 10)]))
        .await
        .unwrap();
    assert_eq!(aggregate_receipt_status(&order.lines), PurchaseOrderStatus::Ordered);
}

#[tokio::test]
async fn empty_orders_and_bad_lines_are_rejected_up_front() {
    let engine = engine();
    let item = seed_item(&engine, 10, dec!(1)).await;

    assert!(matches!(
        engine.create_sales_order(NewSalesOrder::new(vec![])).await,
        Err(FulfillmentError::Validation(_))
    ));
    assert!(matches!(
        engine
            .create_sales_order(NewSalesOrder::new(vec![NewOrderLine::new(
                item.id,
                0,
                dec!(1)
            )]))
            .await,
        Err(FulfillmentError::Validation(_))
    ));
    assert!(matches!(
        engine
            .create_sales_order(NewSalesOrder::new(vec![NewOrderLine::new(
                item.id,
                1,
                dec!(-1)
            )]))
            .await,
        Err(FulfillmentError::Validation(_))
    ));
    // Unknown item surfaces as NotFound from the validator's row lock
    assert!(matches!(
        engine
            .create_sales_order(NewSalesOrder::new(vec![NewOrderLine::new(
                ItemId(9_999),
                1,
                dec!(1)
            )]))
            .await,
        Err(FulfillmentError::NotFound { .. })
    ));
}
