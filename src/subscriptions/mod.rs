//! Subscriptions with selective change notification.
//!
//! Each subscription owns a change filter deciding whether a state
//! transition matters to it:
//! - fields read during the last render (auto-tracking)
//! - an explicit dependency list
//! - getter results, as a safety net on top of either of the above
//!
//! Relevant transitions refresh the subscription's getter cache and push an
//! [`UpdateNotice`] to its channel and optional render callback.
//!
//! # Example
//!
//! ```ignore
//! let sub = store.subscribe(
//!     SubscribeOptions::new()
//!         .label("counter")
//!         .update_dependencies(|s| vec![s["count"].clone()]),
//! );
//!
//! let view = sub.render();
//! println!("count = {:?}", view.state.get("count"));
//!
//! while let Ok(notice) = sub.recv() {
//!     let view = sub.render();
//!     // ...
//! }
//! ```

mod filter;
mod registry;
mod types;

pub(crate) use registry::{SubscriptionRegistry, Transition};
pub use types::{
    resolve_getter_values, DependencyFn, Getter, Getters, RenderView, SubscribeOptions,
    Subscription, SubscriptionId, UpdateCallback, UpdateNotice, DEFAULT_LABEL,
};
