//! Engine limits.
//!
//! # Environment Variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `RIPPLE_MAX_DEPTH` | 100 | Max nested wrap depth and trigger recursion depth |
//! | `RIPPLE_MAX_FLUSH_PASSES` | 100 | Max re-drain passes within one flush |
//! | `RIPPLE_DEEP_COMPARE_DEPTH` | 64 | Nesting bound for change suppression |
//! | `RIPPLE_MAX_SEQUENCE_LEN` | 16777216 | Longest sequence a padding write may produce |
//!
//! Unparseable or zero values are ignored with a warning.

/// Env var overriding [`ReactiveConfig::max_depth`].
pub const ENV_MAX_DEPTH: &str = "RIPPLE_MAX_DEPTH";
/// Env var overriding [`ReactiveConfig::max_flush_passes`].
pub const ENV_MAX_FLUSH_PASSES: &str = "RIPPLE_MAX_FLUSH_PASSES";
/// Env var overriding [`ReactiveConfig::deep_compare_depth`].
pub const ENV_DEEP_COMPARE_DEPTH: &str = "RIPPLE_DEEP_COMPARE_DEPTH";
/// Env var overriding [`ReactiveConfig::max_sequence_len`].
pub const ENV_MAX_SEQUENCE_LEN: &str = "RIPPLE_MAX_SEQUENCE_LEN";

/// Limits applied by the engine on the current thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReactiveConfig {
    /// Deepest key path that is still wrapped, and deepest nested trigger
    /// propagation before it is aborted.
    pub max_depth: usize,
    /// Passes a single flush may run before dropping the remaining work.
    pub max_flush_passes: usize,
    /// Nesting bound for the deep compare that suppresses unchanged results.
    pub deep_compare_depth: usize,
    /// Longest sequence an index or length write may pad out to.
    pub max_sequence_len: usize,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            max_depth: 100,
            max_flush_passes: 100,
            deep_compare_depth: crate::value::DEFAULT_DEEP_COMPARE_DEPTH,
            max_sequence_len: 1 << 24,
        }
    }
}

impl ReactiveConfig {
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_max_flush_passes(mut self, passes: usize) -> Self {
        self.max_flush_passes = passes;
        self
    }

    #[must_use]
    pub fn with_deep_compare_depth(mut self, depth: usize) -> Self {
        self.deep_compare_depth = depth;
        self
    }

    #[must_use]
    pub fn with_max_sequence_len(mut self, len: usize) -> Self {
        self.max_sequence_len = len;
        self
    }

    /// Defaults overridden by the `RIPPLE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let fields: [(&str, &mut usize); 4] = [
            (ENV_MAX_DEPTH, &mut config.max_depth),
            (ENV_MAX_FLUSH_PASSES, &mut config.max_flush_passes),
            (ENV_DEEP_COMPARE_DEPTH, &mut config.deep_compare_depth),
            (ENV_MAX_SEQUENCE_LEN, &mut config.max_sequence_len),
        ];
        for (name, slot) in fields {
            let Some(raw) = lookup(name) else { continue };
            match raw.trim().parse::<usize>() {
                Ok(value) if value > 0 => *slot = value,
                _ => tracing::warn!(var = name, value = %raw, "ignoring invalid limit"),
            }
        }
        config
    }
}
