//! # State Box
//!
//! A small state container for reactive user interfaces: one shared state,
//! a fixed set of actions that update it, and subscriptions that are only
//! notified when a transition touches what they care about.
//!
//! ## Core Concepts
//!
//! - **State**: a flat map of top-level fields to JSON values
//! - **Actions**: named functions returning a partial update (sync or async)
//! - **Subscriptions**: observers with a change filter and a getter cache
//! - **Broadcast**: synchronous delivery of each real change to every subscriber
//!
//! ## Example
//!
//! ```ignore
//! use serde_json::json;
//! use statebox::{ActionSet, StoreConfig, Store, SubscribeOptions, Update};
//!
//! let actions = ActionSet::new()
//!     .with("increment", |s, _| {
//!         Ok(Update::field("count", s["count"].as_i64().unwrap_or(0) + 1))
//!     });
//!
//! let store = Store::from_value(json!({"count": 0}), actions, StoreConfig::named("counter"))?;
//!
//! let sub = store.subscribe(
//!     SubscribeOptions::new().update_dependencies(|s| vec![s["count"].clone()]),
//! );
//!
//! store.dispatch_blocking("increment", vec![])?;
//! assert_eq!(sub.try_recv()?.revision, 1);
//! ```

pub mod action;
pub mod error;
pub mod state;
pub mod store;
pub mod subscriptions;

// Re-exports
pub use action::{ActionFn, ActionFuture, ActionSet, Args, Update};
pub use error::{ActionError, Result, StoreError};
pub use state::{
    changed_fields, merge, state_from_serialize, state_from_value, ReadLog, State, StateAccess,
};
pub use store::{Actions, AfterUpdateHook, BoundAction, Store, StoreConfig, StoreHooks, StoreStats};
pub use subscriptions::{
    resolve_getter_values, DependencyFn, Getter, Getters, RenderView, SubscribeOptions,
    Subscription, SubscriptionId, UpdateCallback, UpdateNotice, DEFAULT_LABEL,
};
