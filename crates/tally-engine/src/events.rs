//! # Stock Invalidation Bus
//!
//! Inventory writers publish an [`Invalidation`] after every write that
//! changes computed stock; stock engines listen and drop the matching cache
//! entries.
//!
//! ## Fan-out
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  InventoryWriter ──publish(inv)──► InvalidationBus                     │
//! │                                        │                                │
//! │                  ┌─────────────────────┼─────────────────────┐          │
//! │                  ▼                     ▼                     ▼          │
//! │        listener (sync callback)  listener ...     broadcast::Receiver  │
//! │        StockEngine A cache       StockEngine B    async consumers      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Callbacks run on the publisher's task and must not block. Dropping a
//! [`Subscription`] removes its callback.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the async broadcast channel.
const BROADCAST_CAPACITY: usize = 256;

/// Which cached stock levels became stale.
///
/// `None` fields widen the match: no product means the whole tenant, no
/// location means every location of the product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidation {
    pub tenant_id: String,
    pub product_id: Option<String>,
    pub location_id: Option<String>,
}

impl Invalidation {
    /// Every location and variant of one product.
    pub fn product(tenant_id: impl Into<String>, product_id: impl Into<String>) -> Self {
        Invalidation {
            tenant_id: tenant_id.into(),
            product_id: Some(product_id.into()),
            location_id: None,
        }
    }

    /// Everything cached for the tenant.
    pub fn tenant(tenant_id: impl Into<String>) -> Self {
        Invalidation {
            tenant_id: tenant_id.into(),
            product_id: None,
            location_id: None,
        }
    }
}

type Listener = Arc<dyn Fn(&Invalidation) + Send + Sync>;

struct BusInner {
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<Invalidation>,
}

/// Multi-listener invalidation channel. Cheap to clone.
#[derive(Clone)]
pub struct InvalidationBus {
    inner: Arc<BusInner>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        InvalidationBus {
            inner: Arc::new(BusInner {
                listeners: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Registers a callback. It stays registered until the returned
    /// [`Subscription`] is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Invalidation) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id, Arc::new(listener));

        debug!(listener_id = id, "Invalidation listener registered");
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Async receiver for consumers that want to await invalidations.
    pub fn receiver(&self) -> broadcast::Receiver<Invalidation> {
        self.inner.sender.subscribe()
    }

    /// Delivers `invalidation` to every listener and async receiver.
    ///
    /// Returns the number of callbacks invoked.
    pub fn publish(&self, invalidation: &Invalidation) -> usize {
        // Snapshot so callbacks run without the lock held
        let listeners: Vec<Listener> = self
            .inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect();

        for listener in &listeners {
            listener(invalidation);
        }

        // No receivers is not an error
        let _ = self.inner.sender.send(invalidation.clone());

        debug!(
            tenant_id = %invalidation.tenant_id,
            product_id = ?invalidation.product_id,
            listeners = listeners.len(),
            "Invalidation published"
        );
        listeners.len()
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InvalidationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.listeners
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&self.id);
            debug!(listener_id = self.id, "Invalidation listener removed");
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter(bus: &InvalidationBus) -> (Arc<AtomicUsize>, Subscription) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let sub = bus.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (hits, sub)
    }

    #[test]
    fn test_publish_reaches_every_listener() {
        let bus = InvalidationBus::new();
        let (a, _sub_a) = counter(&bus);
        let (b, _sub_b) = counter(&bus);

        let delivered = bus.publish(&Invalidation::product("tenant-1", "p-1"));
        assert_eq!(delivered, 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let bus = InvalidationBus::new();
        let (a, sub_a) = counter(&bus);
        let (b, _sub_b) = counter(&bus);

        sub_a.unsubscribe();
        assert_eq!(bus.listener_count(), 1);

        bus.publish(&Invalidation::tenant("tenant-1"));
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_receivers_get_a_copy() {
        let bus = InvalidationBus::new();
        let mut rx = bus.receiver();

        let invalidation = Invalidation::product("tenant-1", "p-9");
        bus.publish(&invalidation);

        assert_eq!(rx.recv().await.unwrap(), invalidation);
    }
}
