//! State representation, merging and tracked read access.
//!
//! State is a flat mapping of top-level field names to JSON values. Deep
//! equality and deep clone come from `serde_json::Value`, so every field is
//! structurally comparable and cloneable by construction.

use crate::error::{Result, StoreError};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// The state held by a store: top-level field name to value.
pub type State = Map<String, Value>;

/// Shared cell holding the live state. All handles point at the same cell,
/// so a held handle always observes the latest values.
pub(crate) type StateCell = Arc<RwLock<State>>;

/// Build a state from a JSON value. Only objects are accepted.
pub fn state_from_value(value: Value) -> Result<State> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidState(format!(
            "expected an object, got {}",
            kind_of(&other)
        ))),
    }
}

/// Build a state from any serializable value whose JSON form is an object.
pub fn state_from_serialize<T: Serialize>(value: &T) -> Result<State> {
    state_from_value(serde_json::to_value(value)?)
}

/// Assign every field of `partial` into `target`, leaving other fields alone.
pub fn merge(target: &mut State, partial: State) {
    for (field, value) in partial {
        target.insert(field, value);
    }
}

/// Names of top-level fields whose values differ between two states,
/// including fields present on only one side.
pub fn changed_fields(previous: &State, next: &State) -> Vec<String> {
    let mut changed: Vec<String> = previous
        .iter()
        .filter(|(field, value)| next.get(*field) != Some(*value))
        .map(|(field, _)| field.clone())
        .collect();

    changed.extend(
        next.keys()
            .filter(|field| !previous.contains_key(*field))
            .cloned(),
    );

    changed
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Ordered set of top-level field names read during one render pass.
#[derive(Clone, Debug, Default)]
pub struct ReadLog(Arc<Mutex<Vec<String>>>);

impl ReadLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read of `field`. Repeated reads are kept once.
    pub fn record(&self, field: &str) {
        let mut reads = self.0.lock();
        if !reads.iter().any(|f| f == field) {
            reads.push(field.to_string());
        }
    }

    /// Forget everything recorded so far; called at the start of a render.
    pub fn reset(&self) {
        self.0.lock().clear();
    }

    /// Fields recorded since the last reset, in first-read order.
    pub fn fields(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// True if every recorded field is deep-equal between the two states.
    pub(crate) fn unchanged_between(&self, previous: &State, next: &State) -> bool {
        self.0
            .lock()
            .iter()
            .all(|field| previous.get(field) == next.get(field))
    }
}

/// Read handle onto a store's live state.
///
/// When created with a [`ReadLog`], every top-level field read is recorded
/// so the owning subscription can filter later transitions by those fields.
#[derive(Clone)]
pub struct StateAccess {
    cell: StateCell,
    reads: Option<ReadLog>,
}

impl StateAccess {
    pub(crate) fn untracked(cell: StateCell) -> Self {
        Self { cell, reads: None }
    }

    pub(crate) fn tracked(cell: StateCell, reads: ReadLog) -> Self {
        Self {
            cell,
            reads: Some(reads),
        }
    }

    /// Whether reads through this handle are being recorded.
    pub fn is_tracking(&self) -> bool {
        self.reads.is_some()
    }

    /// Current value of a top-level field.
    pub fn get(&self, field: &str) -> Option<Value> {
        self.note(field);
        self.cell.read().get(field).cloned()
    }

    /// Current value of a top-level field, deserialized into `T`.
    pub fn get_as<T: DeserializeOwned>(&self, field: &str) -> Result<Option<T>> {
        match self.get(field) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.note(field);
        self.cell.read().contains_key(field)
    }

    /// Copy of the whole state. Counts as a read of every field.
    pub fn snapshot(&self) -> State {
        let state = self.cell.read().clone();
        if let Some(ref reads) = self.reads {
            for field in state.keys() {
                reads.record(field);
            }
        }
        state
    }

    fn note(&self, field: &str) {
        if let Some(ref reads) = self.reads {
            reads.record(field);
        }
    }
}

impl std::fmt::Debug for StateAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateAccess")
            .field("state", &*self.cell.read())
            .field("tracking", &self.is_tracking())
            .finish()
    }
}
