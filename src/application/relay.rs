//! Best-effort propagation of selected signals between contexts that share a
//! key/value store.
//!
//! Each relay stamps what it writes with its own origin id and ignores store
//! changes carrying that id, so a context never hears its own announcement
//! twice. Signals re-published from the store are not written back.

use std::cell::Cell;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{Detail, EventBus, Signal, SignalName, Subscription};
use crate::infra::storage::{KeyValueStore, StorageChange};

pub const RELAY_KEY_PREFIX: &str = "nutrisync:signal:";

/// Signals worth telling other contexts about.
pub const RELAYED_SIGNALS: [SignalName; 5] = [
    SignalName::ThemeChanged,
    SignalName::WaterSettingsUpdated,
    SignalName::FastingSettingsUpdated,
    SignalName::ReminderSettingsUpdated,
    SignalName::WeightUpdated,
];

thread_local! {
    static REPLAYING: Cell<bool> = const { Cell::new(false) };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Envelope {
    origin: Uuid,
    signal_id: Uuid,
    #[serde(default)]
    detail: Option<Detail>,
}

pub struct StorageRelay {
    origin: Uuid,
    _outbound: Subscription,
    inbound: JoinHandle<()>,
}

impl StorageRelay {
    /// Start relaying. Must be called inside a Tokio runtime.
    pub fn start(bus: &EventBus, storage: Arc<dyn KeyValueStore>) -> Self {
        let origin = Uuid::new_v4();
        let changes = storage.watch();

        let writer = Arc::clone(&storage);
        let outbound = bus.subscribe_many(&RELAYED_SIGNALS, move |signal| {
            if REPLAYING.with(Cell::get) {
                return;
            }
            announce(writer.as_ref(), origin, signal);
        });

        let inbound = tokio::spawn(replay(bus.clone(), origin, changes));
        debug!(%origin, "storage relay started");
        Self {
            origin,
            _outbound: outbound,
            inbound,
        }
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }
}

impl Drop for StorageRelay {
    fn drop(&mut self) {
        self.inbound.abort();
    }
}

fn announce(storage: &dyn KeyValueStore, origin: Uuid, signal: &Signal) {
    let envelope = Envelope {
        origin,
        signal_id: signal.id,
        detail: signal.detail.clone(),
    };
    match serde_json::to_string(&envelope) {
        Ok(value) => storage.set(&storage_key(signal.name), value),
        Err(err) => warn!(signal = %signal.name, error = %err, "failed to encode relayed signal"),
    }
}

async fn replay(
    bus: EventBus,
    origin: Uuid,
    mut changes: tokio::sync::broadcast::Receiver<StorageChange>,
) {
    loop {
        match changes.recv().await {
            Ok(change) => {
                if let Some((name, envelope)) = parse_change(&change)
                    && envelope.origin != origin
                {
                    REPLAYING.with(|flag| flag.set(true));
                    let delivered = bus.publish(name, envelope.detail);
                    REPLAYING.with(|flag| flag.set(false));
                    debug!(
                        signal = %name,
                        from = %envelope.origin,
                        delivered,
                        "relayed signal from another context"
                    );
                }
            }
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "storage relay fell behind; some signals were not relayed");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn storage_key(name: SignalName) -> String {
    format!("{RELAY_KEY_PREFIX}{name}")
}

fn parse_change(change: &StorageChange) -> Option<(SignalName, Envelope)> {
    let name = change.key.strip_prefix(RELAY_KEY_PREFIX)?;
    let name = SignalName::from_str(name).ok()?;
    let value = change.value.as_deref()?;
    match serde_json::from_str(value) {
        Ok(envelope) => Some((name, envelope)),
        Err(err) => {
            debug!(key = %change.key, error = %err, "ignoring unreadable relay entry");
            None
        }
    }
}
