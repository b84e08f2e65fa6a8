//! Reservation validator: the consistency gate run before a sales order is
//! created or its draft lines are replaced.
//!
//! The validator locks each requested item row and compares the requested
//! quantity against *available* stock: live stock minus the summed line
//! quantities of committed, undelivered sales orders. That makes a
//! reservation binding without mutating the stock counter: a concurrent
//! create blocks on the row lock, then sees the earlier order's committed
//! lines and fails. Stock is only physically debited at delivery.

use std::collections::BTreeMap;

use crate::error::{FulfillmentError, FulfillmentResult, StockShortage};
use crate::orders::{ItemId, NewOrderLine, OrderId};
use crate::storage::StoreTx;

/// Lock every requested item and verify availability, collecting all
/// shortages rather than failing on the first.
///
/// Requested quantities for the same item are summed before checking. Items
/// are locked in ascending id order regardless of line submission order, so
/// two orders touching the same items can never deadlock against each other.
///
/// `exclude_order` drops that order's own lines from the reservation sum;
/// pass it when revalidating an existing draft's update so the order does
/// not block itself.
pub async fn validate_and_lock(
    tx: &mut dyn StoreTx,
    requested: &[NewOrderLine],
    exclude_order: Option<OrderId>,
) -> FulfillmentResult<()> {
    // BTreeMap gives the sorted, deduplicated lock order
    let mut wanted: BTreeMap<ItemId, i64> = BTreeMap::new();
    for line in requested {
        *wanted.entry(line.item_id).or_default() += line.quantity;
    }

    let mut shortages = Vec::new();
    for (&item_id, &quantity) in &wanted {
        let item = tx.item_for_update(item_id).await?;
        let reserved = tx.reserved_quantity(item_id, exclude_order).await?;
        let available = item.stock - reserved;
        if quantity > available {
            shortages.push(StockShortage {
                item_id,
                requested: quantity,
                available,
            });
        }
    }

    if shortages.is_empty() {
        Ok(())
    } else {
        Err(FulfillmentError::InsufficientStock { shortages })
    }
}
