//! Subscription registry and broadcast delivery.

use crate::state::{changed_fields, ReadLog, State};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use super::filter::ChangeFilter;
use super::types::{
    resolve_getter_values, Getters, SubscribeOptions, SubscriptionId, UpdateCallback, UpdateNotice,
};

/// Internal subscription state, shared between the registry and the handle.
pub(crate) struct Entry {
    pub(crate) id: SubscriptionId,
    pub(crate) tag: String,
    filter: ChangeFilter,
    /// Read log for auto-tracking, when enabled.
    pub(crate) reads: Option<ReadLog>,
    getters: Getters,
    /// Getter values as of the last relevant transition.
    pub(crate) cache: Mutex<Map<String, Value>>,
    revision: AtomicU64,
    active: AtomicBool,
    sender: Sender<UpdateNotice>,
    on_update: Option<UpdateCallback>,
}

impl Entry {
    pub(crate) fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Run the filter and, if relevant, refresh the getter cache and signal
    /// the subscriber. Returns whether the subscriber was notified.
    fn deliver(&self, previous: &State, next: &State, changed: &[String]) -> bool {
        if !self.filter.is_relevant(previous, next) {
            trace!(subscription = %self.tag, "skip");
            return false;
        }

        *self.cache.lock() = resolve_getter_values(next, &self.getters);
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;

        let notice = UpdateNotice {
            subscription: self.id,
            revision,
            changed: changed.to_vec(),
        };
        trace!(subscription = %self.tag, revision, "update");

        // One queued notice is enough to schedule a re-render; further ones
        // coalesce into it. A closed channel only means nobody polls it.
        match self.sender.try_send(notice.clone()) {
            Ok(()) | Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {}
        }

        if let Some(ref on_update) = self.on_update {
            on_update(&notice);
        }

        true
    }
}

/// Hook run once a transition has been delivered to every subscriber.
pub(crate) type DeliveredHook<'a> = Option<&'a (dyn Fn(&State) + Send + Sync)>;

/// A state change waiting to be delivered.
pub(crate) struct Transition {
    pub(crate) previous: State,
    pub(crate) next: State,
    /// Run the store's after-update hook once delivered.
    pub(crate) run_hook: bool,
}

/// Transitions not yet delivered, in merge order.
#[derive(Default)]
struct Pending {
    queue: VecDeque<Transition>,
    /// Some caller is currently delivering the queue.
    draining: bool,
}

/// Releases the draining flag when a subscriber panics mid-pass.
struct DrainGuard<'a>(&'a Mutex<Pending>);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().draining = false;
    }
}

/// Live subscriptions of one store, in registration order.
pub(crate) struct SubscriptionRegistry {
    /// Active subscriptions by ID. IDs are monotonic, so map order is
    /// registration order.
    subscriptions: RwLock<BTreeMap<SubscriptionId, Arc<Entry>>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    pending: Mutex<Pending>,
}

impl SubscriptionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            subscriptions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(Pending::default()),
        }
    }

    /// Register a subscription. The getter cache is seeded from `current`.
    pub(crate) fn register(
        &self,
        tag: String,
        options: SubscribeOptions,
        auto_resolve: bool,
        current: &State,
    ) -> (Arc<Entry>, Receiver<UpdateNotice>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(1);

        let reads = auto_resolve.then(ReadLog::new);
        let filter = ChangeFilter::new(
            reads.clone(),
            options.update_dependencies,
            options.getters.clone(),
        );
        let cache = resolve_getter_values(current, &options.getters);

        let entry = Arc::new(Entry {
            id,
            tag,
            filter,
            reads,
            getters: options.getters,
            cache: Mutex::new(cache),
            revision: AtomicU64::new(0),
            active: AtomicBool::new(true),
            sender,
            on_update: options.on_update,
        });

        self.subscriptions.write().insert(id, Arc::clone(&entry));

        (entry, receiver)
    }

    /// Remove a subscription. Idempotent.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        match self.subscriptions.write().remove(&id) {
            Some(entry) => {
                entry.active.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub(crate) fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.read().contains_key(&id)
    }

    /// Queue a transition for delivery. Call while the merge that produced
    /// it is still exclusive, so queue order is merge order.
    pub(crate) fn enqueue(&self, transition: Transition) {
        self.pending.lock().queue.push_back(transition);
    }

    /// Deliver queued transitions in order. Returns how many subscriber
    /// notifications this call made.
    ///
    /// Only one caller drains at a time. A broadcast started from inside a
    /// subscriber callback, or from another thread while a pass is running,
    /// only queues its transition and returns 0; the running drain delivers
    /// it after the current pass, so every subscriber sees transitions in
    /// merge order and its getter cache ends on the latest state.
    pub(crate) fn drain(&self, after_delivery: DeliveredHook<'_>) -> usize {
        {
            let mut pending = self.pending.lock();
            if pending.draining {
                return 0;
            }
            pending.draining = true;
        }
        let guard = DrainGuard(&self.pending);

        let mut notified = 0;
        loop {
            // Popping the last transition and releasing the flag happen under
            // one lock, so a concurrent enqueue is never left undelivered.
            let transition = {
                let mut pending = self.pending.lock();
                match pending.queue.pop_front() {
                    Some(transition) => transition,
                    None => {
                        pending.draining = false;
                        break;
                    }
                }
            };

            notified += self.deliver_pass(&transition.previous, &transition.next);

            if transition.run_hook {
                if let Some(hook) = after_delivery {
                    hook(&transition.next);
                }
            }
        }

        // The flag is already released; only an unwinding pass needs the guard.
        std::mem::forget(guard);
        notified
    }

    /// One pass over every live subscription in registration order.
    ///
    /// Iterates a snapshot taken before the first callback, so callbacks may
    /// subscribe or unsubscribe freely. Subscriptions removed mid-pass are
    /// skipped; subscriptions added mid-pass wait for the next transition.
    fn deliver_pass(&self, previous: &State, next: &State) -> usize {
        let snapshot: Vec<Arc<Entry>> = self.subscriptions.read().values().cloned().collect();
        let changed = changed_fields(previous, next);

        let mut notified = 0;
        for entry in snapshot.iter().filter(|entry| entry.is_active()) {
            if entry.deliver(previous, next, &changed) {
                notified += 1;
            }
        }
        notified
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_from_value;
    use serde_json::json;

    fn state(value: Value) -> State {
        state_from_value(value).unwrap()
    }

    fn broadcast(registry: &SubscriptionRegistry, previous: &State, next: &State) -> usize {
        registry.enqueue(Transition {
            previous: previous.clone(),
            next: next.clone(),
            run_hook: false,
        });
        registry.drain(None)
    }

    #[test]
    fn test_register_unregister() {
        let registry = SubscriptionRegistry::new();
        let (entry, _receiver) =
            registry.register("a".into(), SubscribeOptions::new(), false, &State::new());
        assert_eq!(registry.len(), 1);

        assert!(registry.unsubscribe(entry.id));
        assert!(!registry.unsubscribe(entry.id));
        assert_eq!(registry.len(), 0);
        assert!(!entry.is_active());
    }

    #[test]
    fn test_ids_are_never_reused() {
        let registry = SubscriptionRegistry::new();
        let (first, _r1) =
            registry.register("a".into(), SubscribeOptions::new(), false, &State::new());
        registry.unsubscribe(first.id);
        let (second, _r2) =
            registry.register("b".into(), SubscribeOptions::new(), false, &State::new());

        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_broadcast_sends_notice_and_refreshes_cache() {
        let registry = SubscriptionRegistry::new();
        let prev = state(json!({"count": 0}));
        let next = state(json!({"count": 1}));

        let options = SubscribeOptions::new().getter("double", |s: &State| {
            json!(s["count"].as_i64().unwrap_or(0) * 2)
        });
        let (entry, receiver) = registry.register("a".into(), options, false, &prev);
        assert_eq!(entry.cache.lock()["double"], json!(0));

        assert_eq!(broadcast(&registry, &prev, &next), 1);

        let notice = receiver.try_recv().unwrap();
        assert_eq!(notice.revision, 1);
        assert_eq!(notice.changed, vec!["count"]);
        assert_eq!(entry.cache.lock()["double"], json!(2));
    }

    #[test]
    fn test_skipped_transition_keeps_cache() {
        let registry = SubscriptionRegistry::new();
        let prev = state(json!({"count": 0, "name": "x"}));
        let next = state(json!({"count": 0, "name": "y"}));

        let options = SubscribeOptions::new()
            .update_dependencies(|s: &State| vec![s["count"].clone()])
            .getter("name", |s: &State| s["name"].clone());
        let (entry, receiver) = registry.register("a".into(), options, false, &prev);

        // The getter result changed, so the getter check forces an update.
        assert_eq!(broadcast(&registry, &prev, &next), 1);
        assert_eq!(entry.cache.lock()["name"], json!("y"));
        assert_eq!(receiver.try_iter().count(), 1);

        let options = SubscribeOptions::new()
            .update_dependencies(|s: &State| vec![s["count"].clone()])
            .getter("count", |s: &State| s["count"].clone());
        let (other, other_receiver) = registry.register("b".into(), options, false, &prev);
        registry.unsubscribe(entry.id);

        assert_eq!(broadcast(&registry, &prev, &next), 0);
        assert_eq!(other.cache.lock()["count"], json!(0));
        assert!(other_receiver.try_recv().is_err());
    }

    #[test]
    fn test_notices_coalesce() {
        let registry = SubscriptionRegistry::new();
        let (_entry, receiver) =
            registry.register("a".into(), SubscribeOptions::new(), false, &State::new());

        for n in 0..1000 {
            let prev = state(json!({"n": n}));
            let next = state(json!({"n": n + 1}));
            broadcast(&registry, &prev, &next);
        }

        assert_eq!(receiver.len(), 1);
        assert_eq!(receiver.try_recv().unwrap().revision, 1);
    }

    #[test]
    fn test_drain_runs_hook_in_order() {
        let registry = SubscriptionRegistry::new();
        let seen = Mutex::new(Vec::new());
        let hook: &(dyn Fn(&State) + Send + Sync) = &|s: &State| seen.lock().push(s["n"].clone());

        for n in 0..3 {
            registry.enqueue(Transition {
                previous: state(json!({"n": n})),
                next: state(json!({"n": n + 1})),
                run_hook: n != 1,
            });
        }
        registry.drain(Some(hook));

        assert_eq!(*seen.lock(), vec![json!(1), json!(3)]);
        assert!(!registry.pending.lock().draining);
    }
}
