#![forbid(unsafe_code)]

//! Fine-grained reactive state for render trees.
//!
//! Wrap plain data with [`wrap`], bind render nodes to functions that read
//! it, and mutate the data directly: exactly the bindings that read a
//! changed field re-run, in document order, and only changed results reach
//! the tree.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use ripple::{MemoryTree, batch, bind, install_render_tree, reactive};
//!
//! let tree = Rc::new(MemoryTree::new());
//! install_render_tree(tree.clone());
//! let label = tree.element(tree.root(), "span");
//!
//! let state = reactive(serde_json::json!({ "count": 0 })).unwrap();
//! let reader = state.clone();
//! bind(label, move || reader.get("count"));
//!
//! batch(|| {
//!     for _ in 0..5 {
//!         let n = state.peek("count").as_f64().unwrap_or_default();
//!         state.set("count", n + 1.0);
//!     }
//! });
//! assert_eq!(tree.text(label).as_deref(), Some("5"));
//! ```
//!
//! # Threading
//!
//! All engine state is thread-local. Wrappers and bindings are `!Send` and
//! belong to the thread that created them.

mod applier;
mod binding;
mod computed;
mod config;
pub mod debug;
mod error;
mod lifecycle;
mod reactive;
pub mod render;
mod runtime;
mod scheduler;
mod sequence;
mod tracking;
mod value;

pub use binding::{
    BindingId, Unbind, bind, bind_selector, bind_slot, effect, try_bind, try_effect,
};
pub use computed::{computed_version, define_computed, remove_computed, try_define_computed};
pub use config::{
    ENV_DEEP_COMPARE_DEPTH, ENV_MAX_DEPTH, ENV_MAX_FLUSH_PASSES, ENV_MAX_SEQUENCE_LEN,
    ReactiveConfig,
};
pub use error::{ComputeError, ErrorHandler, ReactiveError, Result};
pub use lifecycle::release_targets;
pub use reactive::{Reactive, WeakReactive, is_reactive, reactive, unwrap, wrap};
pub use render::{MemoryTree, NodeId, RenderTree, Selector};
pub use runtime::{
    clear_error_handler, config, configure, install_render_tree, render_tree, reset,
    set_error_handler,
};
pub use scheduler::{batch, is_batching};
pub use tracking::{
    is_paused, is_tracking, notify, notify_all, pause_tracking, resume_tracking, untrack,
};
pub use value::{Array, DEFAULT_DEEP_COMPARE_DEPTH, Key, Object, Value};
