//! Actions: named state mutators producing partial updates.

use crate::error::{ActionError, Result, StoreError};
use crate::state::State;
use futures::future::{self, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Outcome of an action body.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Update {
    /// Leave the state untouched and skip the broadcast.
    #[default]
    NoUpdate,
    /// Fields to assign into the state.
    Partial(State),
}

impl Update {
    pub fn none() -> Self {
        Update::NoUpdate
    }

    /// Start a partial update with a single field.
    pub fn field(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Update::NoUpdate.set(name, value)
    }

    /// Add a field to the update.
    pub fn set(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = match self {
            Update::NoUpdate => State::new(),
            Update::Partial(fields) => fields,
        };
        fields.insert(name.into(), value.into());
        Update::Partial(fields)
    }

    /// Add a field from any serializable value.
    pub fn set_serialized<T: Serialize>(self, name: impl Into<String>, value: &T) -> Result<Self> {
        Ok(self.set(name, serde_json::to_value(value)?))
    }

    /// The partial fields, or `None` when there is nothing to apply.
    /// An empty partial counts as no update.
    pub fn into_partial(self) -> Option<State> {
        match self {
            Update::Partial(fields) if !fields.is_empty() => Some(fields),
            _ => None,
        }
    }
}

impl From<State> for Update {
    fn from(fields: State) -> Self {
        Update::Partial(fields)
    }
}

impl From<Option<State>> for Update {
    fn from(fields: Option<State>) -> Self {
        fields.map_or(Update::NoUpdate, Update::Partial)
    }
}

/// Positional arguments passed to an action after the state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// Deserialize the argument at `index`.
    pub fn parse<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.0.get(index).ok_or_else(|| StoreError::InvalidArgument {
            index,
            reason: "missing".to_string(),
        })?;

        serde_json::from_value(value.clone()).map_err(|e| StoreError::InvalidArgument {
            index,
            reason: e.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

/// Future returned by an action body.
pub type ActionFuture = BoxFuture<'static, std::result::Result<Update, ActionError>>;

/// Type-erased action body. Receives a deep copy of the state.
pub type ActionFn = Arc<dyn Fn(State, Args) -> ActionFuture + Send + Sync>;

/// The fixed set of actions a store is created with.
#[derive(Clone, Default)]
pub struct ActionSet {
    actions: BTreeMap<String, ActionFn>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous action.
    pub fn with<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(State, Args) -> std::result::Result<Update, ActionError> + Send + Sync + 'static,
    {
        let body: ActionFn = Arc::new(move |state: State, args: Args| {
            future::ready(action(state, args)).boxed()
        });
        self.actions.insert(name.into(), body);
        self
    }

    /// Register an asynchronous action.
    pub fn with_async<F, Fut>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(State, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Update, ActionError>> + Send + 'static,
    {
        let body: ActionFn = Arc::new(move |state: State, args: Args| action(state, args).boxed());
        self.actions.insert(name.into(), body);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ActionFn> {
        self.actions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered action names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.actions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl std::fmt::Debug for ActionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_builder() {
        let update = Update::field("count", 1).set("name", "y");
        let fields = update.into_partial().unwrap();
        assert_eq!(fields["count"], json!(1));
        assert_eq!(fields["name"], json!("y"));
    }

    #[test]
    fn test_update_set_serialized() {
        #[derive(Serialize)]
        struct Todo {
            title: String,
            done: bool,
        }

        let update = Update::field("count", 1)
            .set_serialized(
                "todo",
                &Todo {
                    title: "ship".into(),
                    done: false,
                },
            )
            .unwrap();

        let fields = update.into_partial().unwrap();
        assert_eq!(fields["todo"], json!({"title": "ship", "done": false}));
        assert_eq!(fields["count"], json!(1));
    }

    #[test]
    fn test_empty_partial_is_no_update() {
        assert_eq!(Update::Partial(State::new()).into_partial(), None);
        assert_eq!(Update::from(None::<State>), Update::NoUpdate);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::new(vec![json!("x"), json!(3)]);
        assert_eq!(args.parse::<String>(0).unwrap(), "x");
        assert_eq!(args.parse::<u32>(1).unwrap(), 3);

        assert!(matches!(
            args.parse::<u32>(0),
            Err(StoreError::InvalidArgument { index: 0, .. })
        ));
        assert!(matches!(
            args.parse::<u32>(5),
            Err(StoreError::InvalidArgument { index: 5, .. })
        ));
    }

    #[test]
    fn test_action_set_runs_sync_and_async() {
        let actions = ActionSet::new()
            .with("sync", |_state, _args| Ok(Update::field("a", 1)))
            .with_async("later", |_state, args| async move {
                let n: i64 = args.parse(0)?;
                Ok::<_, ActionError>(Update::field("b", n))
            });

        assert_eq!(actions.names().collect::<Vec<_>>(), vec!["later", "sync"]);

        let sync = actions.get("sync").unwrap();
        let update = futures::executor::block_on(sync(State::new(), Args::empty())).unwrap();
        assert_eq!(update, Update::field("a", 1));

        let later = actions.get("later").unwrap();
        let update =
            futures::executor::block_on(later(State::new(), Args::new(vec![json!(9)]))).unwrap();
        assert_eq!(update, Update::field("b", 9));
    }
}
