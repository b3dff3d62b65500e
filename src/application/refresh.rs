//! Per-view refresh coordination.
//!
//! Mount, route re-entry, debounced window focus and bus signals all funnel
//! into [`RefreshCoordinator::refresh`]. At most one fetch per view is in
//! flight; a trigger that arrives meanwhile is dropped, because the outstanding
//! fetch already reads through a cache that the triggering write invalidated.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::lock::mutex_lock;
use crate::events::{EventBus, SignalName, Subscription};

use super::error::ApiError;

const SOURCE: &str = "application::refresh";

pub const DEFAULT_FOCUS_DEBOUNCE: Duration = Duration::from_millis(300);

/// Loads the full state a view renders.
#[async_trait]
pub trait ViewLoader: Send + Sync + 'static {
    type State: Clone + fmt::Debug + Send + Sync + 'static;

    async fn load(&self) -> Result<Self::State, ApiError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Mount,
    RouteReentry,
    Focus,
    Signal(SignalName),
    Manual,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Mount => f.write_str("mount"),
            Trigger::RouteReentry => f.write_str("route"),
            Trigger::Focus => f.write_str("focus"),
            Trigger::Signal(name) => write!(f, "signal:{name}"),
            Trigger::Manual => f.write_str("manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Refreshed,
    /// Another fetch for the same view was already outstanding.
    Coalesced,
    /// The fetch failed; the previous state is kept.
    Failed(ApiError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewState<S> {
    pub data: Option<S>,
    pub last_error: Option<ApiError>,
    pub completed_fetches: u64,
}

impl<S> Default for ViewState<S> {
    fn default() -> Self {
        Self {
            data: None,
            last_error: None,
            completed_fetches: 0,
        }
    }
}

/// Views that currently have a fetch outstanding.
#[derive(Default, Clone)]
pub struct InFlightFetches {
    views: Arc<DashMap<String, ()>>,
}

#[derive(Debug, Error)]
pub enum InFlightError {
    #[error("refresh already in progress for view {view}")]
    AlreadyRunning { view: String },
}

impl InFlightFetches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, view: &str) -> Result<FetchGuard, InFlightError> {
        use dashmap::mapref::entry::Entry;

        match self.views.entry(view.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(());
                Ok(FetchGuard {
                    view: view.to_string(),
                    views: Arc::clone(&self.views),
                })
            }
            Entry::Occupied(_) => Err(InFlightError::AlreadyRunning {
                view: view.to_string(),
            }),
        }
    }

    pub fn is_running(&self, view: &str) -> bool {
        self.views.contains_key(view)
    }
}

pub struct FetchGuard {
    view: String,
    views: Arc<DashMap<String, ()>>,
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        self.views.remove(&self.view);
    }
}

struct Inner<L: ViewLoader> {
    view: String,
    loader: L,
    state: watch::Sender<ViewState<L::State>>,
    in_flight: InFlightFetches,
    focus_debounce: Duration,
    focus_generation: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

pub struct RefreshCoordinator<L: ViewLoader> {
    inner: Arc<Inner<L>>,
}

impl<L: ViewLoader> Clone for RefreshCoordinator<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: ViewLoader> RefreshCoordinator<L> {
    pub fn new(
        view: impl Into<String>,
        loader: L,
        in_flight: InFlightFetches,
        focus_debounce: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ViewState::default());
        Self {
            inner: Arc::new(Inner {
                view: view.into(),
                loader,
                state,
                in_flight,
                focus_debounce,
                focus_generation: AtomicU64::new(0),
                subscriptions: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn view(&self) -> &str {
        &self.inner.view
    }

    pub fn state(&self) -> ViewState<L::State> {
        self.inner.state.borrow().clone()
    }

    pub fn data(&self) -> Option<L::State> {
        self.inner.state.borrow().data.clone()
    }

    pub fn watch(&self) -> watch::Receiver<ViewState<L::State>> {
        self.inner.state.subscribe()
    }

    pub async fn on_mount(&self) -> RefreshOutcome {
        self.refresh(Trigger::Mount).await
    }

    pub async fn on_route_reentry(&self) -> RefreshOutcome {
        self.refresh(Trigger::RouteReentry).await
    }

    /// Window focus regained. Focus events closer together than the debounce
    /// delay collapse into one refresh after the last of them.
    pub fn on_focus(&self) -> JoinHandle<Option<RefreshOutcome>> {
        let generation = self.inner.focus_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(coordinator.inner.focus_debounce).await;
            if coordinator.inner.focus_generation.load(Ordering::SeqCst) != generation {
                debug!(view = %coordinator.inner.view, "focus superseded by a later one");
                return None;
            }
            Some(coordinator.refresh(Trigger::Focus).await)
        })
    }

    /// Re-fetch when any of `names` is published. Signals need a Tokio
    /// runtime on the publishing thread; without one the trigger is dropped.
    pub fn listen(&self, bus: &EventBus, names: &[SignalName]) {
        let weak: Weak<Inner<L>> = Arc::downgrade(&self.inner);
        let subscription = bus.subscribe_many(names, move |signal| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let Ok(runtime) = Handle::try_current() else {
                warn!(view = %inner.view, signal = %signal.name, "no runtime to refresh on signal");
                return;
            };
            let coordinator = RefreshCoordinator { inner };
            let trigger = Trigger::Signal(signal.name);
            runtime.spawn(async move {
                coordinator.refresh(trigger).await;
            });
        });
        mutex_lock(&self.inner.subscriptions, SOURCE, "listen").push(subscription);
    }

    /// Stop reacting to signals and cancel a pending focus refresh.
    pub fn unmount(&self) {
        self.inner.focus_generation.fetch_add(1, Ordering::SeqCst);
        mutex_lock(&self.inner.subscriptions, SOURCE, "unmount").clear();
    }

    /// Re-fetch and replace the view state, unless a fetch is already outstanding.
    pub async fn refresh(&self, trigger: Trigger) -> RefreshOutcome {
        let _guard = match self.inner.in_flight.acquire(&self.inner.view) {
            Ok(guard) => guard,
            Err(_) => {
                debug!(view = %self.inner.view, %trigger, "refresh coalesced into outstanding fetch");
                return RefreshOutcome::Coalesced;
            }
        };

        debug!(view = %self.inner.view, %trigger, "refreshing view");
        match self.inner.loader.load().await {
            Ok(data) => {
                self.inner.state.send_modify(|state| {
                    state.data = Some(data);
                    state.last_error = None;
                    state.completed_fetches += 1;
                });
                RefreshOutcome::Refreshed
            }
            Err(error) => {
                warn!(view = %self.inner.view, %trigger, error = %error, "view refresh failed");
                self.inner.state.send_modify(|state| {
                    state.last_error = Some(error.clone());
                    state.completed_fetches += 1;
                });
                RefreshOutcome::Failed(error)
            }
        }
    }
}
