//! Error taxonomy.
//!
//! Nothing in the engine is fatal. [`ReactiveError`] values are *reported*
//! rather than returned: warnings go to `tracing::warn!`, compute failures go
//! to the installed error handler (or `tracing::error!` when none is set).

use thiserror::Error;

use crate::binding::BindingId;
use crate::value::Key;

/// Result type returned by fallible compute functions.
pub type Result<T, E = ComputeError> = std::result::Result<T, E>;

/// Failure raised by a binding's compute function.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComputeError {
    #[error("{message}")]
    Failed { message: String },

    #[error("compute function panicked: {message}")]
    Panicked { message: String },
}

impl ComputeError {
    #[must_use]
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_owned()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_owned()
        };
        Self::Panicked { message }
    }
}

impl From<String> for ComputeError {
    fn from(message: String) -> Self {
        Self::Failed { message }
    }
}

impl From<&str> for ComputeError {
    fn from(message: &str) -> Self {
        Self::msg(message)
    }
}

/// Everything the engine can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    #[error("maximum reactive depth {limit} exceeded at {path} (depth {depth})")]
    DepthExceeded {
        path: String,
        depth: usize,
        limit: usize,
    },

    #[error("circular binding: {binding} triggered itself while executing")]
    CircularBinding { binding: BindingId },

    #[error("binding {binding} ({context}) failed: {source}")]
    Compute {
        binding: BindingId,
        context: String,
        #[source]
        source: ComputeError,
    },

    #[error("no target matches selector {selector}")]
    MissingTarget { selector: String },

    #[error("flush exceeded {limit} passes; dropped {dropped} pending bindings")]
    FlushLimit { limit: usize, dropped: usize },

    #[error("computed property {path}.{key} is read-only")]
    ReadOnlyComputed { path: String, key: String },

    #[error("{operation} called on non-sequence {path}")]
    NotASequence { path: String, operation: &'static str },

    #[error("key {key} does not apply to {path}")]
    InvalidKey { path: String, key: Key },

    #[error("no render tree installed; cannot bind {target}")]
    NoRenderTree { target: String },
}

impl ReactiveError {
    /// Stable short name, used as the `kind` field on log events.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::CircularBinding { .. } => "circular_binding",
            Self::Compute { .. } => "compute",
            Self::MissingTarget { .. } => "missing_target",
            Self::FlushLimit { .. } => "flush_limit",
            Self::ReadOnlyComputed { .. } => "read_only_computed",
            Self::NotASequence { .. } => "not_a_sequence",
            Self::InvalidKey { .. } => "invalid_key",
            Self::NoRenderTree { .. } => "no_render_tree",
        }
    }

    /// Everything except compute failures is a warning.
    #[must_use]
    pub fn is_warning(&self) -> bool {
        !matches!(self, Self::Compute { .. })
    }
}

/// Callback receiving compute failures.
pub type ErrorHandler = dyn Fn(&ReactiveError);
