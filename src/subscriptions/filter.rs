//! Per-subscription change filtering.
//!
//! A filter combines up to three checks, each answering "nothing this
//! subscriber cares about changed":
//!
//! 1. auto-tracked fields: every field read during the last render is
//!    deep-equal before and after;
//! 2. explicit dependencies: the dependency function yields equal lists;
//! 3. getters: every getter yields equal values.
//!
//! Getters only join the conjunction when at least one of the first two is
//! configured. A transition is skipped iff the conjunction is non-empty and
//! every member holds. With nothing configured every transition is relevant.

use crate::state::{ReadLog, State};

use super::types::{DependencyFn, Getters};

pub(crate) struct ChangeFilter {
    reads: Option<ReadLog>,
    dependencies: Option<DependencyFn>,
    getters: Getters,
}

impl ChangeFilter {
    pub(crate) fn new(
        reads: Option<ReadLog>,
        dependencies: Option<DependencyFn>,
        getters: Getters,
    ) -> Self {
        Self {
            reads,
            dependencies,
            getters,
        }
    }

    /// Whether any check is configured at all.
    pub(crate) fn is_configured(&self) -> bool {
        self.reads.is_some() || self.dependencies.is_some()
    }

    /// True when the subscriber should be notified of `previous -> next`.
    ///
    /// Checks run in order and stop at the first one reporting a change, so
    /// getters are never evaluated once a change is already established.
    pub(crate) fn is_relevant(&self, previous: &State, next: &State) -> bool {
        if !self.is_configured() {
            return true;
        }

        if let Some(ref reads) = self.reads {
            if !reads.unchanged_between(previous, next) {
                return true;
            }
        }

        if let Some(ref dependencies) = self.dependencies {
            if dependencies(previous) != dependencies(next) {
                return true;
            }
        }

        self.getters
            .values()
            .any(|getter| getter(previous) != getter(next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::state_from_value;
    use crate::subscriptions::types::Getter;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn state(value: Value) -> State {
        state_from_value(value).unwrap()
    }

    fn count_dependency() -> DependencyFn {
        Arc::new(|s: &State| vec![s.get("count").cloned().unwrap_or(Value::Null)])
    }

    fn getters(entries: Vec<(&str, Getter)>) -> Getters {
        entries
            .into_iter()
            .map(|(name, getter)| (name.to_string(), getter))
            .collect()
    }

    #[test]
    fn test_unconfigured_always_relevant() {
        let filter = ChangeFilter::new(None, None, Getters::new());
        let prev = state(json!({"a": 1}));
        assert!(filter.is_relevant(&prev, &prev));
    }

    #[test]
    fn test_getters_alone_do_not_filter() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let getter: Getter = Arc::new(move |s: &State| {
            counter.fetch_add(1, Ordering::SeqCst);
            s["a"].clone()
        });

        let filter = ChangeFilter::new(None, None, getters(vec![("a", getter)]));
        let prev = state(json!({"a": 1, "b": 1}));
        let next = state(json!({"a": 1, "b": 2}));

        assert!(filter.is_relevant(&prev, &next));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dependencies_filter_unrelated_fields() {
        let filter = ChangeFilter::new(None, Some(count_dependency()), Getters::new());
        let prev = state(json!({"count": 0, "name": "x"}));

        assert!(!filter.is_relevant(&prev, &state(json!({"count": 0, "name": "y"}))));
        assert!(filter.is_relevant(&prev, &state(json!({"count": 1, "name": "x"}))));
    }

    #[test]
    fn test_getter_overrides_unchanged_dependencies() {
        let total: Getter = Arc::new(|s: &State| {
            json!(s["items"].as_array().map(|items| items.len()).unwrap_or(0))
        });
        let filter = ChangeFilter::new(
            None,
            Some(count_dependency()),
            getters(vec![("total", total)]),
        );

        let prev = state(json!({"count": 0, "items": [], "name": "x"}));
        let renamed = state(json!({"count": 0, "items": [], "name": "y"}));
        let grown = state(json!({"count": 0, "items": [1], "name": "x"}));

        assert!(!filter.is_relevant(&prev, &renamed));
        assert!(filter.is_relevant(&prev, &grown));
    }

    #[test]
    fn test_getters_skipped_once_change_found() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let getter: Getter = Arc::new(move |_: &State| {
            counter.fetch_add(1, Ordering::SeqCst);
            Value::Null
        });

        let filter = ChangeFilter::new(
            None,
            Some(count_dependency()),
            getters(vec![("g", getter)]),
        );

        let prev = state(json!({"count": 0}));
        assert!(filter.is_relevant(&prev, &state(json!({"count": 1}))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_auto_tracking_by_read_fields() {
        let reads = ReadLog::new();
        reads.record("a");
        let filter = ChangeFilter::new(Some(reads.clone()), None, Getters::new());

        let prev = state(json!({"a": 1, "b": 1}));
        assert!(!filter.is_relevant(&prev, &state(json!({"a": 1, "b": 2}))));
        assert!(filter.is_relevant(&prev, &state(json!({"a": 2, "b": 1}))));

        // Nothing read during the last render: nothing to observe.
        reads.reset();
        assert!(!filter.is_relevant(&prev, &state(json!({"a": 2, "b": 2}))));
    }

    #[test]
    fn test_dependency_order_matters() {
        let pair: DependencyFn = Arc::new(|s: &State| vec![s["a"].clone(), s["b"].clone()]);
        let filter = ChangeFilter::new(None, Some(pair), Getters::new());

        let prev = state(json!({"a": 1, "b": 2}));
        let swapped = state(json!({"a": 2, "b": 1}));
        assert!(filter.is_relevant(&prev, &swapped));
    }
}
