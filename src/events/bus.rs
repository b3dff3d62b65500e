//! Process-local publish/subscribe bus.
//!
//! Delivery is synchronous, in subscription order, on the caller of
//! [`EventBus::publish`]. Nothing is queued or replayed: a listener that
//! subscribes after a publish never sees it. A panicking handler is logged and
//! skipped; the remaining handlers still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use metrics::counter;
use tracing::{debug, warn};

use crate::cache::lock::{rw_read, rw_write};

use super::signal::{Detail, Epoch, Signal, SignalName, SignalPayload, detail_for};

const SOURCE: &str = "events::bus";
const METRIC_SIGNAL_PUBLISHED: &str = "nutrisync_signal_published_total";

pub type Handler = Arc<dyn Fn(&Signal) + Send + Sync>;

struct Listener {
    id: u64,
    names: Vec<SignalName>,
    handler: Handler,
}

#[derive(Default)]
struct BusInner {
    listeners: RwLock<Vec<Listener>>,
    next_listener: AtomicU64,
    epoch_counter: AtomicU64,
}

impl BusInner {
    fn remove(&self, id: u64) {
        rw_write(&self.listeners, SOURCE, "unsubscribe").retain(|listener| listener.id != id);
    }
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for one signal name. Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe<F>(&self, name: SignalName, handler: F) -> Subscription
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        self.subscribe_many(&[name], handler)
    }

    /// Listen for several names with one handler.
    pub fn subscribe_many<F>(&self, names: &[SignalName], handler: F) -> Subscription
    where
        F: Fn(&Signal) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener.fetch_add(1, Ordering::SeqCst);
        rw_write(&self.inner.listeners, SOURCE, "subscribe").push(Listener {
            id,
            names: names.to_vec(),
            handler: Arc::new(handler),
        });
        Subscription {
            id,
            bus: Some(Arc::downgrade(&self.inner)),
        }
    }

    /// Deliver a signal to every current listener of `name`.
    /// Returns how many handlers completed without panicking.
    pub fn publish(&self, name: SignalName, detail: Option<Detail>) -> usize {
        let epoch: Epoch = self.inner.epoch_counter.fetch_add(1, Ordering::SeqCst);
        let signal = Signal::new(name, detail, epoch);

        // Snapshot so handlers may subscribe or publish without deadlocking.
        let handlers: Vec<Handler> = rw_read(&self.inner.listeners, SOURCE, "publish")
            .iter()
            .filter(|listener| listener.names.contains(&name))
            .map(|listener| Arc::clone(&listener.handler))
            .collect();

        let mut delivered = 0;
        for handler in &handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&signal))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!(
                    signal = %name,
                    signal_id = %signal.id,
                    "Signal handler panicked; continuing delivery"
                ),
            }
        }

        counter!(METRIC_SIGNAL_PUBLISHED, "signal" => name.as_str()).increment(1);
        debug!(
            signal = %name,
            signal_epoch = epoch,
            listeners = handlers.len(),
            delivered,
            "Signal published"
        );
        delivered
    }

    /// Publish a typed payload under its own signal name.
    pub fn publish_payload<P: SignalPayload>(&self, payload: &P) -> usize {
        self.publish(P::NAME, detail_for(payload))
    }

    pub fn listener_count(&self, name: SignalName) -> usize {
        rw_read(&self.inner.listeners, SOURCE, "listener_count")
            .iter()
            .filter(|listener| listener.names.contains(&name))
            .count()
    }
}

/// Handle returned by [`EventBus::subscribe`].
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    bus: Option<Weak<BusInner>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    /// Keep listening for the lifetime of the bus.
    pub fn detach(mut self) {
        self.bus = None;
    }

    fn release(&mut self) {
        if let Some(inner) = self.bus.take().and_then(|weak| weak.upgrade()) {
            inner.remove(self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}
