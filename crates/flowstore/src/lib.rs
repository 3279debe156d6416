//! Workflow-driven entity store with temporal history.
//!
//! Flowstore keeps JSON entities whose lifecycle is governed by a per-model
//! state machine:
//!
//! - **Workflow-gated mutations**: every entity is in a named state, and
//!   state changes only happen through transitions declared on its model's
//!   [`TransitionGraph`]
//! - **Temporal history**: every change appends an immutable version, so any
//!   entity can be read as it was at an earlier instant
//! - **Business keys**: an optional unique payload field per model, enforced
//!   atomically across concurrent creates
//! - **Condition search**: JSON-path comparison trees compiled once into a
//!   [`Predicate`] and evaluated against live records
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              EntityStore                                │
//! │                                                                         │
//! │   1. Lock the technical ID                                              │
//! │   2. Validate transition against WorkflowEngine                         │
//! │   3. Reserve business key (atomic check-and-insert)                     │
//! │   4. Append staged versions to Journal                                  │
//! │   5. Commit versions to TemporalLog                                     │
//! │   6. Publish live snapshot, release stale keys                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use flowstore::{Condition, EntityModel, EntityStore, Error, StoreConfig, Transition,
//!     TransitionGraph, WorkflowEngine};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> flowstore::Result<()> {
//! let loan = EntityModel::new("loan", 1);
//! let engine = WorkflowEngine::builder()
//!     .register(
//!         loan.clone(),
//!         TransitionGraph::builder("draft")
//!             .transition(Transition::new("approve", "draft", "approved"))
//!             .business_key("loanId"),
//!     )
//!     .build()?;
//! let store = EntityStore::new(Arc::new(engine), StoreConfig::default());
//!
//! let created = store.create(&loan, json!({"loanId": "L-1", "amount": 500}), None).await?;
//! store.update(created.id, json!({"loanId": "L-1", "amount": 500}), Some("approve")).await?;
//!
//! let duplicate = store.create(&loan, json!({"loanId": "L-1"}), None).await;
//! assert!(matches!(duplicate, Err(Error::DuplicateKey { .. })));
//!
//! let big = store.search(&loan, &Condition::greater_or_equal("$.amount", 100))?;
//! assert_eq!(big.len(), 1);
//! assert_eq!(big[0].state, "approved");
//! # Ok(())
//! # }
//! ```
//!
//! # Persistence
//!
//! [`EntityStore::new`] keeps everything in memory. [`EntityStore::open`]
//! replays a [`Journal`] (for example a [`FileJournal`] directory) and then
//! appends every new version to it.
//!
//! # Design Documentation
//!
//! See `DESIGN.md` for architectural decisions and future work.

mod clock;
pub mod condition;
mod config;
mod entity;
mod error;
mod log;
mod store;
pub mod workflow;

pub use clock::{Clock, ManualClock, SystemClock};
pub use condition::{Condition, FieldPath, GroupOperator, Operator, Predicate};
pub use config::StoreConfig;
pub use entity::{
    ChangeKind, ChangeMetadata, CreateOutcome, EntityModel, EntityRecord, TechnicalId,
    UpdateOutcome,
};
pub use error::{Error, Result};
pub use log::{TemporalLog, VersionEntry};
pub use store::{EntityStore, FileJournal, Journal, JournalRecord, MemoryJournal};
pub use workflow::visualization::{StateDefinition, StateMachineDefinition, TransitionDefinition};
pub use workflow::{
    SourceState, Transition, TransitionGraph, TransitionGraphBuilder, WorkflowEngine,
    WorkflowEngineBuilder,
};
