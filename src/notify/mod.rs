//! Low-stock notification side channel.
//!
//! Notifications are a best-effort signal, deliberately detached from the
//! transaction that produced them: emission never blocks, never fails the
//! owning operation, and may be dropped under pressure or process crash.
//!
//! Events are handed off through a bounded channel to a single dispatcher
//! worker, which fans them out to every sink in the registry. The registry is
//! an injected service with explicit add/remove/send operations so sinks can
//! be swapped or mocked in tests.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::stock::Item;

/// Kind of notification carried on the side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    /// An item's stock fell to or below its threshold
    LowStock,
}

/// A notification to be fanned out to registered sinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Trait for notification delivery targets.
///
/// Delivery is synchronous from the dispatcher worker's point of view and
/// must not block for long; a sink that talks to a slow transport should do
/// its own buffering.
pub trait NotificationSink: Send + Sync {
    /// Deliver a notification. Failures are the sink's problem; the
    /// dispatcher does not observe them.
    fn deliver(&self, notification: &Notification);
}

/// Sink that writes notifications to the log.
#[derive(Clone, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

impl NotificationSink for LogSink {
    fn deliver(&self, notification: &Notification) {
        warn!(
            kind = ?notification.kind,
            title = %notification.title,
            message = %notification.message,
            "notification"
        );
    }
}

/// Registry of notification sinks, keyed by subscriber id.
///
/// Process-wide but injected, never a package-level global: components hold
/// an `Arc<SinkRegistry>` and tests register counting sinks against it.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: RwLock<HashMap<String, Arc<dyn NotificationSink>>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a sink under a subscriber id, replacing any previous one
    pub fn add(&self, id: impl Into<String>, sink: Arc<dyn NotificationSink>) {
        self.sinks.write().insert(id.into(), sink);
    }

    /// Remove a subscriber's sink
    pub fn remove(&self, id: &str) {
        self.sinks.write().remove(id);
    }

    /// Number of registered sinks
    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    /// Deliver a notification to every registered sink
    pub fn send(&self, notification: &Notification) {
        let sinks = self.sinks.read();
        for sink in sinks.values() {
            sink.deliver(notification);
        }
    }
}

/// Cheap, cloneable handle used by producers to emit notifications.
#[derive(Clone)]
pub struct NotifierHandle {
    tx: Option<mpsc::Sender<Notification>>,
}

impl NotifierHandle {
    /// A handle that silently drops everything. Useful where the side
    /// channel is irrelevant.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Emit a notification. Never blocks; drops the event with a warning if
    /// the queue is full or the dispatcher is gone.
    pub fn send(&self, notification: Notification) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(err) = tx.try_send(notification) {
            warn!(%err, "notification dropped");
        }
    }

    /// Emit a low-stock notification for an item.
    pub fn low_stock(&self, item: &Item, new_stock: i64) {
        self.send(Notification::new(
            NotificationKind::LowStock,
            "Low stock",
            format!(
                "{} is down to {} (threshold {})",
                item.name, new_stock, item.low_stock_threshold
            ),
            json!({
                "item_id": item.id.0,
                "item_name": item.name,
                "stock": new_stock,
                "threshold": item.low_stock_threshold,
            }),
        ));
    }
}

/// The dispatcher worker: consumes the bounded queue and fans out to the
/// registry. Spawning returns the producer handle; the worker exits when the
/// last handle is dropped.
pub struct NotificationDispatcher;

impl NotificationDispatcher {
    pub fn spawn(registry: Arc<SinkRegistry>, capacity: usize) -> NotifierHandle {
        let (tx, mut rx) = mpsc::channel::<Notification>(capacity);
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                debug!(kind = ?notification.kind, "dispatching notification");
                registry.send(&notification);
            }
        });
        NotifierHandle { tx: Some(tx) }
    }
}
