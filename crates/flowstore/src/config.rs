//! Store configuration.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};

/// Configuration for an [`EntityStore`](crate::EntityStore).
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use flowstore::{ManualClock, StoreConfig};
/// use time::macros::datetime;
///
/// let config = StoreConfig {
///     auto_transition_limit: 3, // follow up to 3 chained automatic transitions
///     clock: Arc::new(ManualClock::new(datetime!(2024-01-01 00:00 UTC))),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum number of automatic transitions applied right after a create.
    ///
    /// Each applied transition appends one version entry. With the default of
    /// 1, an entity advances at most one step past its initial state. Set to 0
    /// to disable automatic transitions entirely.
    pub auto_transition_limit: usize,

    /// Time source for version timestamps.
    ///
    /// Default: [`SystemClock`].
    pub clock: Arc<dyn Clock>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            auto_transition_limit: 1,
            clock: Arc::new(SystemClock),
        }
    }
}
