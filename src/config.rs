//! Session configuration.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Default bound on the number of cells followed when lifting a list.
pub const DEFAULT_MAX_LIST_LENGTH: usize = 1_000_000;

/// Default bound on the number of nodes in one lifted term.
pub const DEFAULT_MAX_TERM_SIZE: usize = 10_000_000;

/// Limits and switches for one engine session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SessionConfig {
    /// Lifting a longer (or cyclic) list fails with `ListTooLong`.
    pub max_list_length: usize,
    /// Lifting a term with more nodes fails with `TermTooLarge`.
    pub max_term_size: usize,
    /// Resolution steps allowed per query before the engine gives up.
    pub inference_limit: Option<u64>,
    /// Wall-clock time allowed per query before the engine gives up.
    pub time_limit: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_list_length: DEFAULT_MAX_LIST_LENGTH,
            max_term_size: DEFAULT_MAX_TERM_SIZE,
            inference_limit: None,
            time_limit: None,
        }
    }
}

impl SessionConfig {
    /// Configuration with the default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the list length bound used when lifting.
    #[must_use]
    pub fn with_max_list_length(mut self, limit: usize) -> Self {
        self.max_list_length = limit;
        self
    }

    /// Set the node budget used when lifting.
    #[must_use]
    pub fn with_max_term_size(mut self, limit: usize) -> Self {
        self.max_term_size = limit;
        self
    }

    /// Bound the number of resolution steps per query.
    #[must_use]
    pub fn with_inference_limit(mut self, limit: u64) -> Self {
        self.inference_limit = Some(limit);
        self
    }

    /// Bound the wall-clock time per query.
    #[must_use]
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }
}
