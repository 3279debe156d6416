use std::sync::Arc;

use flowstore::{EntityStore, Journal, ManualClock, StoreConfig};
use time::OffsetDateTime;
use time::macros::datetime;

use super::models;

/// Initialize tracing for tests. Safe to call multiple times.
///
/// Uses a standard filter for flowstore debugging. The `try_init()` call
/// is idempotent - subsequent calls are no-ops if already initialized.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("flowstore=debug")
        .with_test_writer()
        .try_init();
}

/// Instant every test clock starts at.
pub const START: OffsetDateTime = datetime!(2024-03-01 09:00 UTC);

/// An in-memory store over the shared test workflows, driven by a manual clock.
pub struct TestStore {
    pub store: EntityStore,
    pub clock: Arc<ManualClock>,
}

impl TestStore {
    pub fn new() -> Self {
        Self::with_auto_limit(1)
    }

    pub fn with_auto_limit(auto_transition_limit: usize) -> Self {
        init_test_tracing();
        let clock = Arc::new(ManualClock::new(START));
        let store = EntityStore::new(Arc::new(models::engine()), config(&clock, auto_transition_limit));
        Self { store, clock }
    }

    /// Open a store over `journal`, sharing this store's clock.
    pub async fn reopen(&self, journal: Arc<dyn Journal>) -> flowstore::Result<EntityStore> {
        EntityStore::open(Arc::new(models::engine()), config(&self.clock, 1), journal).await
    }

    /// Advance the clock by `minutes` and return the new instant.
    pub fn tick(&self, minutes: i64) -> OffsetDateTime {
        self.clock.advance(time::Duration::minutes(minutes));
        self.now()
    }

    pub fn now(&self) -> OffsetDateTime {
        flowstore::Clock::now(self.clock.as_ref())
    }
}

/// Open a journal-backed store with its own manual clock.
pub async fn open_store(journal: Arc<dyn Journal>) -> flowstore::Result<TestStore> {
    init_test_tracing();
    let clock = Arc::new(ManualClock::new(START));
    let store = EntityStore::open(Arc::new(models::engine()), config(&clock, 1), journal).await?;
    Ok(TestStore { store, clock })
}

fn config(clock: &Arc<ManualClock>, auto_transition_limit: usize) -> StoreConfig {
    StoreConfig {
        auto_transition_limit,
        clock: Arc::clone(clock) as Arc<dyn flowstore::Clock>,
    }
}
