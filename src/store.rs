//! Main Store struct tying state, actions and subscriptions together.

use crate::action::{ActionFn, ActionSet, Args};
use crate::error::{Result, StoreError};
use crate::state::{changed_fields, merge, state_from_value, State, StateAccess, StateCell};
use crate::subscriptions::{
    SubscribeOptions, Subscription, SubscriptionId, SubscriptionRegistry, Transition,
    DEFAULT_LABEL,
};
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Store configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Identifier used in diagnostics and subscription tags.
    pub name: Option<String>,

    /// Default for `SubscribeOptions::auto_resolve_dependencies`.
    /// Default: false
    pub auto_resolve_dependencies: bool,
}

impl StoreConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Hook run after every applied update, once its broadcast is delivered.
pub type AfterUpdateHook = Arc<dyn Fn(&State) + Send + Sync>;

/// Lifecycle hooks.
#[derive(Clone, Default)]
pub struct StoreHooks {
    pub after_update: Option<AfterUpdateHook>,
}

impl StoreHooks {
    pub fn after_update<F>(hook: F) -> Self
    where
        F: Fn(&State) + Send + Sync + 'static,
    {
        Self {
            after_update: Some(Arc::new(hook)),
        }
    }
}

/// Counters describing store activity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Live subscriptions.
    pub subscriptions: usize,
    /// Actions run to completion or failure.
    pub dispatches: u64,
    /// Broadcast passes.
    pub broadcasts: u64,
    /// Dispatches whose merge changed nothing.
    pub suppressed_dispatches: u64,
}

struct Inner {
    config: StoreConfig,
    hooks: StoreHooks,
    /// Live state. Mutated only by the merge step of a dispatch.
    state: StateCell,
    actions: ActionSet,
    registry: SubscriptionRegistry,
    dispatches: AtomicU64,
    broadcasts: AtomicU64,
    suppressed: AtomicU64,
}

/// A state container: one state, a fixed action set, live subscriptions.
///
/// Cloning is cheap and yields another handle onto the same store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    /// Create an unnamed store with default configuration.
    pub fn new(initial_state: State, actions: ActionSet) -> Self {
        Self::with_config(
            initial_state,
            actions,
            StoreConfig::default(),
            StoreHooks::default(),
        )
    }

    pub fn with_config(
        initial_state: State,
        actions: ActionSet,
        config: StoreConfig,
        hooks: StoreHooks,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                hooks,
                state: Arc::new(RwLock::new(initial_state)),
                actions,
                registry: SubscriptionRegistry::new(),
                dispatches: AtomicU64::new(0),
                broadcasts: AtomicU64::new(0),
                suppressed: AtomicU64::new(0),
            }),
        }
    }

    /// Create a store from a JSON object.
    pub fn from_value(initial_state: Value, actions: ActionSet, config: StoreConfig) -> Result<Self> {
        Ok(Self::with_config(
            state_from_value(initial_state)?,
            actions,
            config,
            StoreHooks::default(),
        ))
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.config.name.as_deref()
    }

    fn label(&self) -> &str {
        self.name().unwrap_or("store")
    }

    // --- State ---

    /// Handle onto the live state. Reads always see the latest values.
    pub fn state(&self) -> StateAccess {
        StateAccess::untracked(self.state_cell())
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> State {
        self.inner.state.read().clone()
    }

    pub(crate) fn state_cell(&self) -> StateCell {
        Arc::clone(&self.inner.state)
    }

    // --- Actions ---

    pub fn actions(&self) -> Actions {
        Actions {
            store: self.clone(),
        }
    }

    /// Run a named action.
    ///
    /// Returns `Ok(None)` when the action produced no update, otherwise the
    /// state after the merge (changed or not).
    ///
    /// A failing action surfaces as [`StoreError::Action`]. The action's own
    /// error is kept untouched as its `source` and can be recovered with
    /// `downcast_ref`. The state is left as it was before the failure.
    ///
    /// When called from inside a subscriber callback, the returned state is
    /// already merged but its broadcast is delivered after the pass that is
    /// currently running.
    pub async fn dispatch(&self, name: &str, args: impl Into<Args>) -> Result<Option<State>> {
        self.actions().get(name)?.call(args).await
    }

    /// Run a named action, driving it to completion on the current thread.
    ///
    /// Actions that finish without suspending never enter an executor and
    /// can be dispatched from subscriber callbacks. An action that suspends
    /// is driven with `futures::executor::block_on`, which panics when it is
    /// already running inside another executor, including an outer
    /// `dispatch_blocking` whose own action suspended. Use [`Store::dispatch`]
    /// from async contexts.
    pub fn dispatch_blocking(&self, name: &str, args: impl Into<Args>) -> Result<Option<State>> {
        self.actions().get(name)?.call_blocking(args)
    }

    /// The action wrapper: copy, run, merge, compare, broadcast.
    async fn run_action(&self, name: &str, action: &ActionFn, args: Args) -> Result<Option<State>> {
        self.inner.dispatches.fetch_add(1, Ordering::SeqCst);

        let before = self.snapshot();
        let update = action(before, args)
            .await
            .map_err(|source| StoreError::Action {
                action: name.to_string(),
                source,
            })?;

        let Some(partial) = update.into_partial() else {
            debug!(store = self.label(), action = name, "no update");
            return Ok(None);
        };

        // Compare against the state as of the merge, not as of the call:
        // other dispatches may have landed while the action was suspended.
        // The transition is queued before the lock drops, so delivery order
        // is merge order.
        let next = {
            let mut state = self.inner.state.write();
            let previous = state.clone();
            merge(&mut state, partial);

            if *state == previous {
                self.inner.suppressed.fetch_add(1, Ordering::SeqCst);
                debug!(store = self.label(), action = name, "no-op update");
                return Ok(Some(previous));
            }

            let next = state.clone();
            debug!(
                store = self.label(),
                action = name,
                changed = ?changed_fields(&previous, &next),
                "applied"
            );

            self.inner.broadcasts.fetch_add(1, Ordering::SeqCst);
            self.inner.registry.enqueue(Transition {
                previous,
                next: next.clone(),
                run_hook: true,
            });
            next
        };

        self.deliver_pending();

        Ok(Some(next))
    }

    /// Deliver queued transitions, running the after-update hook for each
    /// dispatched one.
    fn deliver_pending(&self) -> usize {
        self.inner
            .registry
            .drain(self.inner.hooks.after_update.as_deref())
    }

    // --- Subscriptions ---

    /// Register a subscription. Dropping the returned handle unsubscribes.
    pub fn subscribe(&self, options: SubscribeOptions) -> Subscription {
        let auto_resolve = options
            .auto_resolve_dependencies
            .unwrap_or(self.inner.config.auto_resolve_dependencies);

        let label = options
            .label
            .clone()
            .unwrap_or_else(|| DEFAULT_LABEL.to_string());
        let tag = match self.inner.config.name {
            Some(ref name) => format!("{}-{}", name, label),
            None => label,
        };

        let current = self.snapshot();
        let (entry, receiver) = self
            .inner
            .registry
            .register(tag, options, auto_resolve, &current);

        debug!(
            store = self.label(),
            subscription = %entry.tag,
            id = entry.id.0,
            auto_resolve,
            "subscribed"
        );

        Subscription {
            id: entry.id,
            receiver,
            entry,
            store: self.clone(),
        }
    }

    /// Remove a subscription. Idempotent.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.inner.registry.unsubscribe(id) {
            debug!(store = self.label(), id = id.0, "unsubscribed");
        }
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.inner.registry.contains(id)
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Deliver a transition to every live subscription, in registration
    /// order. Returns how many notifications this call delivered.
    ///
    /// Dispatch broadcasts every real change itself; hosts only need this to
    /// replay a transition by hand. Called while another pass is running (from
    /// a callback or another thread), the transition is queued behind it and
    /// this returns 0. The after-update hook does not run for manual
    /// broadcasts.
    pub fn broadcast(&self, previous: &State, next: &State) -> usize {
        self.inner.broadcasts.fetch_add(1, Ordering::SeqCst);
        self.inner.registry.enqueue(Transition {
            previous: previous.clone(),
            next: next.clone(),
            run_hook: false,
        });
        self.deliver_pending()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            subscriptions: self.subscription_count(),
            dispatches: self.inner.dispatches.load(Ordering::SeqCst),
            broadcasts: self.inner.broadcasts.load(Ordering::SeqCst),
            suppressed_dispatches: self.inner.suppressed.load(Ordering::SeqCst),
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("actions", &self.inner.actions)
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

/// Handle for invoking a store's actions by name.
#[derive(Clone)]
pub struct Actions {
    store: Store,
}

impl Actions {
    /// Look up an action. Fails with `UnknownAction` if it was not
    /// registered when the store was created.
    pub fn get(&self, name: &str) -> Result<BoundAction> {
        let action = self
            .store
            .inner
            .actions
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownAction(name.to_string()))?;

        Ok(BoundAction {
            store: self.store.clone(),
            name: name.to_string(),
            action,
        })
    }

    pub async fn dispatch(&self, name: &str, args: impl Into<Args>) -> Result<Option<State>> {
        self.store.dispatch(name, args).await
    }

    pub fn dispatch_blocking(&self, name: &str, args: impl Into<Args>) -> Result<Option<State>> {
        self.store.dispatch_blocking(name, args)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.store.inner.actions.contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.store.inner.actions.names().map(str::to_string).collect()
    }
}

impl std::fmt::Debug for Actions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Actions").field(&self.store.inner.actions).finish()
    }
}

/// A resolved action bound to its store.
#[derive(Clone)]
pub struct BoundAction {
    store: Store,
    name: String,
    action: ActionFn,
}

impl BoundAction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, args: impl Into<Args>) -> Result<Option<State>> {
        self.store
            .run_action(&self.name, &self.action, args.into())
            .await
    }

    /// Run to completion on the current thread.
    ///
    /// Actions that finish without suspending never enter an executor, so
    /// this is safe to call from a subscriber callback even while another
    /// blocking dispatch is broadcasting. Suspending actions are driven with
    /// `futures::executor::block_on`, which cannot nest.
    pub fn call_blocking(&self, args: impl Into<Args>) -> Result<Option<State>> {
        let mut call = Box::pin(self.call(args));
        match call.as_mut().now_or_never() {
            Some(result) => result,
            None => futures::executor::block_on(call),
        }
    }
}

impl std::fmt::Debug for BoundAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundAction").field("name", &self.name).finish()
    }
}
