//! Optimistic mutation controller.
//!
//! Mirrors one server-owned value for a widget. An action moves
//! `Idle -> Applying -> Confirmed | RolledBack -> Idle`:
//!
//! - applying shows the locally computed value at once;
//! - confirmation keeps it unless the server disagrees, in which case the
//!   server value wins;
//! - rollback restores the last confirmed value and re-reads in the background.
//!
//! Actions on one controller are serialized by an async gate held for the whole
//! `Applying` phase, so a rapid second action computes its value from the
//! first one's outcome instead of racing it. Every exit from `Applying` clears
//! the request cache and publishes the controller's signal, including an
//! action whose future is dropped before the write resolves (timeout, task
//! abort): that one is rolled back as if the write had failed.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::MutationInvalidator;
use crate::cache::lock::mutex_lock;
use crate::events::{Detail, EventBus, SignalName};

use super::error::ApiError;

const SOURCE: &str = "application::optimistic";

/// Plain read of the authoritative value.
pub type Reader<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T, ApiError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Applying,
    Confirmed,
    RolledBack,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Applying => "applying",
            Phase::Confirmed => "confirmed",
            Phase::RolledBack => "rolled_back",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// What the widget shows.
    pub displayed: T,
    /// Last value the server confirmed.
    pub confirmed: T,
    pub phase: Phase,
    /// How the most recent action ended.
    pub last_resolution: Option<Phase>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Confirmed {
        value: T,
        /// The server value differed from the optimistic one and replaced it.
        reconciled: bool,
    },
    RolledBack {
        restored: T,
        error: ApiError,
    },
}

impl<T> Outcome<T> {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Outcome::Confirmed { .. })
    }
}

struct Inner<T> {
    resource: String,
    state: watch::Sender<Snapshot<T>>,
    gate: AsyncMutex<()>,
    invalidator: MutationInvalidator,
    bus: EventBus,
    signal: SignalName,
    detail: Option<fn(&T) -> Option<Detail>>,
    reader: Reader<T>,
    resync: Mutex<Option<JoinHandle<()>>>,
}

pub struct OptimisticController<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for OptimisticController<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for OptimisticController<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticController")
            .field("resource", &self.inner.resource)
            .field("signal", &self.inner.signal)
            .finish_non_exhaustive()
    }
}

impl<T> OptimisticController<T>
where
    T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    pub fn new(
        resource: impl Into<String>,
        initial: T,
        invalidator: MutationInvalidator,
        bus: EventBus,
        signal: SignalName,
        reader: Reader<T>,
    ) -> Self {
        let (state, _) = watch::channel(Snapshot {
            displayed: initial.clone(),
            confirmed: initial,
            phase: Phase::Idle,
            last_resolution: None,
        });
        Self {
            inner: Arc::new(Inner {
                resource: resource.into(),
                state,
                gate: AsyncMutex::new(()),
                invalidator,
                bus,
                signal,
                detail: None,
                reader,
                resync: Mutex::new(None),
            }),
        }
    }

    /// Attach a payload to confirmed signals. Rollbacks always publish without
    /// one, since the server state is unknown at that point.
    pub fn with_detail(mut self, detail: fn(&T) -> Option<Detail>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.detail = Some(detail);
        }
        self
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        self.inner.state.borrow().clone()
    }

    pub fn displayed(&self) -> T {
        self.inner.state.borrow().displayed.clone()
    }

    pub fn confirmed(&self) -> T {
        self.inner.state.borrow().confirmed.clone()
    }

    pub fn watch(&self) -> watch::Receiver<Snapshot<T>> {
        self.inner.state.subscribe()
    }

    /// True while an action holds the resource.
    pub fn is_busy(&self) -> bool {
        self.inner.gate.try_lock().is_err()
    }

    /// Run one optimistic action.
    ///
    /// `next` computes the optimistic value from what is displayed once this
    /// action owns the resource; `write` receives that value and performs the
    /// network write, returning the server's authoritative value.
    pub async fn apply<N, W, Fut>(&self, next: N, write: W) -> Outcome<T>
    where
        N: FnOnce(&T) -> T,
        W: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let gate = self.inner.gate.lock().await;

        let optimistic = {
            let current = self.inner.state.borrow().displayed.clone();
            next(&current)
        };
        self.inner.state.send_modify(|state| {
            state.displayed = optimistic.clone();
            state.phase = Phase::Applying;
        });
        debug!(resource = %self.inner.resource, value = ?optimistic, "applying optimistic value");
        let mut pending = PendingWrite {
            controller: self,
            armed: true,
        };

        let written = write(optimistic.clone()).await;
        pending.armed = false;
        let outcome = match written {
            Ok(server) => {
                let reconciled = server != optimistic;
                self.inner.state.send_modify(|state| {
                    if reconciled {
                        state.displayed = server.clone();
                    }
                    state.confirmed = server.clone();
                    state.phase = Phase::Confirmed;
                });
                info!(
                    resource = %self.inner.resource,
                    value = ?server,
                    reconciled,
                    "optimistic update confirmed"
                );
                Outcome::Confirmed {
                    value: server,
                    reconciled,
                }
            }
            Err(error) => {
                let mut restored = optimistic.clone();
                self.inner.state.send_modify(|state| {
                    state.displayed = state.confirmed.clone();
                    state.phase = Phase::RolledBack;
                    restored = state.confirmed.clone();
                });
                warn!(
                    resource = %self.inner.resource,
                    error = %error,
                    transient = error.is_transient(),
                    "optimistic update rolled back"
                );
                Outcome::RolledBack { restored, error }
            }
        };

        self.resolve(&outcome);
        drop(gate);

        if !outcome.is_confirmed() {
            self.spawn_resync();
        }
        outcome
    }

    /// Replace both values with a fresh server read, exclusively.
    pub async fn resync(&self) -> Result<T, ApiError> {
        let _gate = self.inner.gate.lock().await;
        let value = (self.inner.reader)().await?;
        self.adopt(value.clone());
        Ok(value)
    }

    /// Adopt a value learned elsewhere (e.g. from a signal payload). Ignored
    /// while an action is in flight; that action's outcome wins.
    pub fn accept(&self, value: T) -> bool {
        let Ok(_gate) = self.inner.gate.try_lock() else {
            debug!(resource = %self.inner.resource, "ignoring external value during apply");
            return false;
        };
        self.adopt(value);
        true
    }

    /// Wait for a background re-read started by the last rollback.
    pub async fn settle(&self) {
        let handle = mutex_lock(&self.inner.resync, SOURCE, "settle").take();
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!(resource = %self.inner.resource, error = %err, "resync task failed");
        }
    }

    fn adopt(&self, value: T) {
        self.inner.state.send_if_modified(|state| {
            let changed = state.displayed != value || state.confirmed != value;
            state.displayed = value.clone();
            state.confirmed = value;
            changed
        });
    }

    fn resolve(&self, outcome: &Outcome<T>) {
        let (resolution, detail) = match (outcome, self.inner.detail) {
            (Outcome::Confirmed { value, .. }, Some(detail)) => (Phase::Confirmed, detail(value)),
            (Outcome::Confirmed { .. }, None) => (Phase::Confirmed, None),
            (Outcome::RolledBack { .. }, _) => (Phase::RolledBack, None),
        };
        self.finish(resolution, detail);
    }

    /// Roll back an action whose write was dropped before it resolved.
    fn abandon(&self) {
        self.inner.state.send_modify(|state| {
            state.displayed = state.confirmed.clone();
            state.phase = Phase::RolledBack;
        });
        warn!(
            resource = %self.inner.resource,
            "optimistic update abandoned before the write resolved"
        );
        self.finish(Phase::RolledBack, None);
        if Handle::try_current().is_ok() {
            self.spawn_resync();
        }
    }

    fn finish(&self, resolution: Phase, detail: Option<Detail>) {
        self.inner.state.send_modify(|state| {
            state.phase = Phase::Idle;
            state.last_resolution = Some(resolution);
        });

        self.inner.invalidator.invalidate("optimistic update resolved");
        self.inner.bus.publish(self.inner.signal, detail);
        debug!(
            resource = %self.inner.resource,
            resolution = resolution.as_str(),
            "optimistic action resolved"
        );
    }

    fn spawn_resync(&self) {
        let controller = self.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = controller.resync().await {
                warn!(
                    resource = %controller.inner.resource,
                    error = %err,
                    "resync after rollback failed"
                );
            }
        });
        if let Some(previous) = mutex_lock(&self.inner.resync, SOURCE, "spawn_resync").replace(handle)
        {
            // A newer read supersedes the older one.
            previous.abort();
        }
    }
}

/// Armed for the duration of a write; rolls the action back if dropped armed.
struct PendingWrite<'a, T>
where
    T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    controller: &'a OptimisticController<T>,
    armed: bool,
}

impl<T> Drop for PendingWrite<'_, T>
where
    T: Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if self.armed {
            self.controller.abandon();
        }
    }
}
