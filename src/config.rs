//! # Configuration
//!
//! Tunables for the binding protocol and the tree walker.
//!
//! ## Example
//!
//! ```rust
//! use anyfs_intercept::InterceptConfig;
//!
//! let config = InterceptConfig::builder()
//!     .walk_queue_limit(4096)
//!     .truncate_on_rebind(false)
//!     .build();
//! assert_eq!(config.walk_queue_limit, Some(4096));
//! ```
//!
//! With the `serde` feature enabled the config can also be loaded from JSON
//! through [`InterceptConfig::from_json`].

/// Runtime configuration for a [`Redirector`](crate::Redirector).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct InterceptConfig {
    /// Maximum number of directories a single walk may hold queued.
    /// Non-directory children are visited at once and never count.
    ///
    /// Exceeding the limit aborts the walk with
    /// [`InterceptError::AllocationFailure`](crate::InterceptError::AllocationFailure).
    /// `None` means unbounded.
    pub walk_queue_limit: Option<usize>,
    /// Drop cached content of a resource after its behavior changes.
    pub truncate_on_rebind: bool,
    /// Follow mount points during walks.
    pub follow_mounts: bool,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            walk_queue_limit: None,
            truncate_on_rebind: true,
            follow_mounts: true,
        }
    }
}

impl InterceptConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> InterceptConfigBuilder {
        InterceptConfigBuilder::default()
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the document is malformed.
    #[cfg(feature = "serde")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Builder for [`InterceptConfig`].
#[derive(Debug, Clone, Default)]
pub struct InterceptConfigBuilder {
    config: InterceptConfig,
}

impl InterceptConfigBuilder {
    /// Bound the walker's pending queue.
    pub fn walk_queue_limit(mut self, limit: usize) -> Self {
        self.config.walk_queue_limit = Some(limit);
        self
    }

    /// Toggle content truncation after rebinding.
    pub fn truncate_on_rebind(mut self, enabled: bool) -> Self {
        self.config.truncate_on_rebind = enabled;
        self
    }

    /// Toggle crossing mount points during walks.
    pub fn follow_mounts(mut self, enabled: bool) -> Self {
        self.config.follow_mounts = enabled;
        self
    }

    /// Finish building.
    pub fn build(self) -> InterceptConfig {
        self.config
    }
}
