//! Subscription types.

use crate::state::{ReadLog, State, StateAccess};
use crate::store::{Actions, Store};
use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::registry::Entry;

/// Derived value computed from the state.
pub type Getter = Arc<dyn Fn(&State) -> Value + Send + Sync>;

/// Named getters, evaluated in name order.
pub type Getters = BTreeMap<String, Getter>;

/// Explicit dependency list: compared elementwise between transitions.
pub type DependencyFn = Arc<dyn Fn(&State) -> Vec<Value> + Send + Sync>;

/// Called synchronously when a transition is relevant to a subscription.
pub type UpdateCallback = Arc<dyn Fn(&UpdateNotice) + Send + Sync>;

/// Evaluate every getter against `state`.
pub fn resolve_getter_values(state: &State, getters: &Getters) -> Map<String, Value> {
    getters
        .iter()
        .map(|(name, getter)| (name.clone(), getter(state)))
        .collect()
}

/// Unique identifier for a subscription. Never reused within a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

/// Default label for a subscription.
pub const DEFAULT_LABEL: &str = "setState";

/// Options for a subscription.
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Diagnostic tag. Default: `setState`.
    pub label: Option<String>,

    /// Derived values cached per subscription.
    pub getters: Getters,

    /// Explicit dependency function.
    pub update_dependencies: Option<DependencyFn>,

    /// Track top-level field reads (None = store default).
    pub auto_resolve_dependencies: Option<bool>,

    /// Render hook invoked on every relevant transition.
    pub on_update: Option<UpdateCallback>,
}

impl SubscribeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn getter<F>(mut self, name: impl Into<String>, getter: F) -> Self
    where
        F: Fn(&State) -> Value + Send + Sync + 'static,
    {
        self.getters.insert(name.into(), Arc::new(getter));
        self
    }

    pub fn update_dependencies<F>(mut self, dependencies: F) -> Self
    where
        F: Fn(&State) -> Vec<Value> + Send + Sync + 'static,
    {
        self.update_dependencies = Some(Arc::new(dependencies));
        self
    }

    pub fn auto_resolve_dependencies(mut self, enabled: bool) -> Self {
        self.auto_resolve_dependencies = Some(enabled);
        self
    }

    pub fn on_update<F>(mut self, callback: F) -> Self
    where
        F: Fn(&UpdateNotice) + Send + Sync + 'static,
    {
        self.on_update = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("label", &self.label)
            .field("getters", &self.getters.keys().collect::<Vec<_>>())
            .field("update_dependencies", &self.update_dependencies.is_some())
            .field("auto_resolve_dependencies", &self.auto_resolve_dependencies)
            .field("on_update", &self.on_update.is_some())
            .finish()
    }
}

/// Signal that a subscription should re-render.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateNotice {
    pub subscription: SubscriptionId,
    /// Number of relevant transitions seen so far, starting at 1.
    pub revision: u64,
    /// Top-level fields that differ between the previous and next state.
    pub changed: Vec<String>,
}

/// What a component reads during one render.
#[derive(Debug)]
pub struct RenderView {
    /// Live state; records reads when auto-tracking is on.
    pub state: StateAccess,
    pub actions: Actions,
    /// Getter values as of the last relevant transition.
    pub getters: Map<String, Value>,
}

impl RenderView {
    pub fn into_parts(self) -> (StateAccess, Actions, Map<String, Value>) {
        (self.state, self.actions, self.getters)
    }
}

/// Handle to a live subscription. Dropping it unsubscribes.
pub struct Subscription {
    pub id: SubscriptionId,
    /// Notice channel. Holds at most one unread notice; later transitions
    /// coalesce into it until it is read, while `revision()` keeps counting.
    pub receiver: Receiver<UpdateNotice>,
    pub(crate) entry: Arc<Entry>,
    pub(crate) store: Store,
}

impl Subscription {
    /// Diagnostic tag: `{store}-{label}`, or the label for unnamed stores.
    pub fn tag(&self) -> &str {
        &self.entry.tag
    }

    /// Start a render pass.
    ///
    /// With auto-tracking, the fields read through the returned state
    /// replace the ones recorded during the previous render.
    pub fn render(&self) -> RenderView {
        let state = match self.entry.reads {
            Some(ref reads) => {
                reads.reset();
                StateAccess::tracked(self.store.state_cell(), reads.clone())
            }
            None => StateAccess::untracked(self.store.state_cell()),
        };

        RenderView {
            state,
            actions: self.store.actions(),
            getters: self.getters(),
        }
    }

    /// Cached getter values.
    pub fn getters(&self) -> Map<String, Value> {
        self.entry.cache.lock().clone()
    }

    /// Fields recorded during the last render (empty without auto-tracking).
    pub fn tracked_fields(&self) -> Vec<String> {
        self.entry
            .reads
            .as_ref()
            .map(ReadLog::fields)
            .unwrap_or_default()
    }

    /// Number of relevant transitions delivered so far.
    pub fn revision(&self) -> u64 {
        self.entry.revision()
    }

    pub fn is_active(&self) -> bool {
        self.entry.is_active()
    }

    /// Remove this subscription from the store. Idempotent.
    pub fn unsubscribe(&self) {
        self.store.unsubscribe(self.id);
    }

    /// Receive the next notice (blocking).
    pub fn recv(&self) -> Result<UpdateNotice, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a notice (non-blocking).
    pub fn try_recv(&self) -> Result<UpdateNotice, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<UpdateNotice, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain all queued notices.
    pub fn pending(&self) -> Vec<UpdateNotice> {
        self.receiver.try_iter().collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.store.unsubscribe(self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("tag", &self.entry.tag)
            .field("revision", &self.revision())
            .finish()
    }
}
