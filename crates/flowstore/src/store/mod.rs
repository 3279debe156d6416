//! The entity store: live records, business keys and history behind one API.
//!
//! Every mutation of an entity runs under that entity's lock and follows the
//! same path:
//!
//! 1. validate against the current record and the workflow engine
//! 2. reserve any new business key
//! 3. append the staged version entries to the [`Journal`]
//! 4. commit them to the [`TemporalLog`] and publish the new snapshot
//!
//! A failure before step 4 leaves the store as it was.

mod index;
mod journal;
mod locks;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub use journal::{FileJournal, Journal, JournalRecord, MemoryJournal};

use self::index::{BusinessKey, BusinessKeyIndex};
use self::locks::StreamLocks;
use crate::condition::Condition;
use crate::config::StoreConfig;
use crate::entity::{
    ChangeKind, ChangeMetadata, CreateOutcome, EntityModel, EntityRecord, Snapshot, TechnicalId,
    UpdateOutcome,
};
use crate::error::{Error, Result};
use crate::log::{TemporalLog, VersionEntry};
use crate::workflow::WorkflowEngine;

/// Workflow-driven entity store.
///
/// Cheap to clone; clones share the same state.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use flowstore::{EntityModel, EntityStore, StoreConfig, Transition, TransitionGraph, WorkflowEngine};
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> flowstore::Result<()> {
/// let cart = EntityModel::new("cart", 1);
/// let engine = WorkflowEngine::builder()
///     .register(
///         cart.clone(),
///         TransitionGraph::builder("initial_state")
///             .transition(Transition::new("create_on_first_add", "initial_state", "open")),
///     )
///     .build()?;
///
/// let store = EntityStore::new(Arc::new(engine), StoreConfig::default());
/// let created = store.create(&cart, json!({"lines": []}), None).await?;
/// assert_eq!(created.state, "initial_state");
///
/// let updated = store
///     .update(created.id, json!({"lines": [{"sku": "A"}]}), Some("create_on_first_add"))
///     .await?;
/// assert_eq!(updated.state, "open");
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<Inner>,
}

struct Inner {
    engine: Arc<WorkflowEngine>,
    config: StoreConfig,
    log: TemporalLog,
    journal: Arc<dyn Journal>,
    live: RwLock<LiveSet>,
    keys: BusinessKeyIndex,
    locks: StreamLocks,
}

#[derive(Default)]
struct LiveSet {
    records: HashMap<TechnicalId, LiveEntry>,
    /// Live IDs per model, keyed by creation sequence.
    by_model: HashMap<EntityModel, BTreeMap<u64, TechnicalId>>,
}

struct LiveEntry {
    created_sequence: u64,
    snapshot: Snapshot,
}

impl LiveSet {
    fn insert(&mut self, created_sequence: u64, snapshot: Snapshot) {
        self.by_model
            .entry(snapshot.model.clone())
            .or_default()
            .insert(created_sequence, snapshot.id);
        self.records.insert(
            snapshot.id,
            LiveEntry {
                created_sequence,
                snapshot,
            },
        );
    }

    fn replace(&mut self, snapshot: Snapshot) {
        if let Some(entry) = self.records.get_mut(&snapshot.id) {
            entry.snapshot = snapshot;
        }
    }

    fn remove(&mut self, id: &TechnicalId) -> Option<Snapshot> {
        let entry = self.records.remove(id)?;
        if let Some(ids) = self.by_model.get_mut(&entry.snapshot.model) {
            ids.remove(&entry.created_sequence);
            if ids.is_empty() {
                self.by_model.remove(&entry.snapshot.model);
            }
        }
        Some(entry.snapshot)
    }
}

impl std::fmt::Debug for EntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("models", &self.inner.engine.len())
            .field("live", &self.inner.live.read().records.len())
            .field("last_sequence", &self.inner.log.last_sequence())
            .finish()
    }
}

impl EntityStore {
    /// Create an empty store that keeps nothing on disk.
    pub fn new(engine: Arc<WorkflowEngine>, config: StoreConfig) -> Self {
        Self::with_journal(engine, config, Arc::new(MemoryJournal))
    }

    fn with_journal(
        engine: Arc<WorkflowEngine>,
        config: StoreConfig,
        journal: Arc<dyn Journal>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                config,
                log: TemporalLog::new(),
                journal,
                live: RwLock::new(LiveSet::default()),
                keys: BusinessKeyIndex::default(),
                locks: StreamLocks::default(),
            }),
        }
    }

    /// Open a store backed by `journal`, replaying everything it holds.
    ///
    /// Live records, business keys and history are rebuilt from the replayed
    /// entries. New sequence numbers continue after the highest one seen.
    pub async fn open(
        engine: Arc<WorkflowEngine>,
        config: StoreConfig,
        journal: Arc<dyn Journal>,
    ) -> Result<Self> {
        let records = journal.load().await?;
        let store = Self::with_journal(engine, config, journal);
        let inner = &store.inner;

        let total = records.len();
        let mut skipped = 0usize;
        for record in records {
            let id = record.entry.id;
            let sequence = record.entry.sequence;
            if !inner.log.restore(
                &record.model,
                record.business_key_field.as_deref(),
                record.entry,
            ) {
                warn!(%id, sequence, "Skipping out-of-order journal record");
                skipped += 1;
            }
        }

        let mut live = inner.live.write();
        for id in inner.log.stream_ids() {
            let Some(record) = inner.log.latest_record(&id) else {
                continue;
            };
            if inner.engine.graph(&record.model).is_err() {
                warn!(%id, model = %record.model, "Replayed entity has no registered workflow");
            }
            if let Some(field) = record.business_key_field.as_deref() {
                let reserved = BusinessKey::from_payload(&record.model, field, &record.payload)
                    .and_then(|key| inner.keys.reserve(&record.model, &key, id));
                if let Err(error) = reserved {
                    warn!(%id, %error, "Replayed entity lost its business key");
                }
            }
            let created_sequence = inner
                .log
                .entries_for(&id)
                .first()
                .map_or(record.sequence, |entry| entry.sequence);
            live.insert(created_sequence, Arc::new(record));
        }
        let entities = live.records.len();
        drop(live);

        info!(
            records = total,
            skipped,
            entities,
            last_sequence = inner.log.last_sequence(),
            "Entity store opened"
        );
        Ok(store)
    }

    /// The workflow engine this store validates against.
    pub fn engine(&self) -> &WorkflowEngine {
        &self.inner.engine
    }

    /// Create a new entity of `model`.
    ///
    /// The business-key field is the one declared on the model's graph, or
    /// `business_key_field` for models that declare none. Naming a different
    /// field than the declared one is [`Error::BusinessKeyFieldConflict`].
    /// Automatic transitions from the initial state fire immediately, up to
    /// [`StoreConfig::auto_transition_limit`].
    pub async fn create(
        &self,
        model: &EntityModel,
        payload: Value,
        business_key_field: Option<&str>,
    ) -> Result<CreateOutcome> {
        let inner = &self.inner;
        let graph = inner.engine.graph(model)?;
        let key_field = match (graph.business_key(), business_key_field) {
            (Some(declared), Some(requested)) if declared != requested => {
                return Err(Error::BusinessKeyFieldConflict {
                    model: model.clone(),
                    declared: declared.to_string(),
                    requested: requested.to_string(),
                });
            }
            (declared, requested) => declared.or(requested).map(str::to_string),
        };

        let id = TechnicalId::new();
        let _guard = inner.locks.lock(id).await;

        let key = key_field
            .as_deref()
            .map(|field| BusinessKey::from_payload(model, field, &payload))
            .transpose()?;
        if let Some(key) = &key {
            inner.keys.reserve(model, key, id)?;
        }

        let now = inner.config.clock.now();
        let mut state = graph.initial_state();
        let first = self.stage(id, now, state, &payload, None, ChangeKind::Create);
        let created_sequence = first.sequence;
        let mut latest = Arc::clone(&first);
        let mut staged = vec![first];
        for _ in 0..inner.config.auto_transition_limit {
            let Some(transition) = graph.auto_transition(state) else {
                break;
            };
            state = transition.destination();
            latest = self.stage(
                id,
                now,
                state,
                &payload,
                Some(transition.name()),
                ChangeKind::Update,
            );
            staged.push(Arc::clone(&latest));
        }

        if let Err(error) = self.persist(model, key_field.as_deref(), &staged).await {
            if let Some(key) = &key {
                inner.keys.release(model, key, id);
            }
            return Err(error);
        }

        let record = snapshot_of(&latest, model, key_field.clone(), now);
        inner.live.write().insert(created_sequence, Arc::new(record));

        debug!(
            %id,
            model = %model,
            state,
            entries = staged.len(),
            business_key = ?key.as_ref().map(BusinessKey::display_value),
            "Entity created"
        );
        Ok(CreateOutcome {
            id,
            state: state.to_string(),
            changes: staged.iter().map(|entry| entry.metadata()).collect(),
        })
    }

    /// Replace the payload of a live entity, optionally firing a transition.
    ///
    /// Without a transition the state is unchanged. If the business-key value
    /// in the new payload differs from the current one, the index entry moves
    /// with it.
    pub async fn update(
        &self,
        id: TechnicalId,
        payload: Value,
        transition: Option<&str>,
    ) -> Result<UpdateOutcome> {
        let _guard = self.inner.locks.lock(id).await;
        self.update_locked(id, payload, transition).await
    }

    /// Body of [`update`](Self::update); the caller holds `id`'s lock.
    async fn update_locked(
        &self,
        id: TechnicalId,
        payload: Value,
        transition: Option<&str>,
    ) -> Result<UpdateOutcome> {
        let inner = &self.inner;
        let current = self.live_snapshot(&id).ok_or_else(|| Error::not_found(&id))?;
        let model = &current.model;
        let graph = inner.engine.graph(model)?;
        let state = match transition {
            Some(name) => graph.resolve(name, &current.state)?.destination(),
            None => current.state.as_str(),
        };

        let mut moved_key = None;
        if let Some(field) = current.business_key_field.as_deref() {
            let new_key = BusinessKey::from_payload(model, field, &payload)?;
            let old_key = BusinessKey::from_payload(model, field, &current.payload).ok();
            if old_key.as_ref() != Some(&new_key) {
                inner.keys.reserve(model, &new_key, id)?;
                moved_key = Some((old_key, new_key));
            }
        }

        let now = inner.log.stamp(&id, inner.config.clock.now());
        let entry = self.stage(id, now, state, &payload, transition, ChangeKind::Update);
        let staged = [entry];

        if let Err(error) = self
            .persist(model, current.business_key_field.as_deref(), &staged)
            .await
        {
            if let Some((_, new_key)) = &moved_key {
                inner.keys.release(model, new_key, id);
            }
            return Err(error);
        }

        let [entry] = staged;
        let record = snapshot_of(
            &entry,
            model,
            current.business_key_field.clone(),
            current.created_at,
        );
        inner.live.write().replace(Arc::new(record));
        if let Some((Some(old_key), _)) = &moved_key {
            inner.keys.release(model, old_key, id);
        }

        debug!(
            %id,
            model = %model,
            from = %current.state,
            to = state,
            transition = ?transition,
            key_moved = moved_key.is_some(),
            "Entity updated"
        );
        Ok(UpdateOutcome {
            state: state.to_string(),
            change: entry.metadata(),
        })
    }

    /// [`update`](Self::update) the entity currently holding a business key.
    pub async fn update_by_business_key(
        &self,
        model: &EntityModel,
        key_field: &str,
        key_value: &Value,
        payload: Value,
        transition: Option<&str>,
    ) -> Result<UpdateOutcome> {
        let key = BusinessKey::from_value(key_field, key_value);
        let missing = || Error::key_not_found(model, key_field, &key.display_value());
        let id = self.inner.keys.get(model, &key).ok_or_else(missing)?;

        let _guard = self.inner.locks.lock(id).await;
        // The key may have moved or been released while we waited.
        if self.inner.keys.get(model, &key) != Some(id) {
            debug!(%id, model = %model, key_field, "Business key changed hands before update");
            return Err(missing());
        }
        self.update_locked(id, payload, transition).await
    }

    /// Fetch an entity, live or as of `point_in_time`.
    ///
    /// A historical read returns the version written by the latest change at
    /// or before that instant, and `None` if the entity did not exist yet or
    /// had been deleted by then.
    pub fn find_by_id(
        &self,
        id: TechnicalId,
        point_in_time: Option<OffsetDateTime>,
    ) -> Option<EntityRecord> {
        match point_in_time {
            None => self.live_snapshot(&id).map(|snapshot| (*snapshot).clone()),
            Some(instant) => self.inner.log.record_at(&id, instant),
        }
    }

    /// Fetch the entity currently holding a business key.
    ///
    /// Only live keys are consulted: a key released by a delete or moved by
    /// an update is not found, even for instants when it was held. A
    /// historical read also requires the version at that instant to carry
    /// the same key.
    pub fn find_by_business_key(
        &self,
        model: &EntityModel,
        key_field: &str,
        key_value: &Value,
        point_in_time: Option<OffsetDateTime>,
    ) -> Option<EntityRecord> {
        let key = BusinessKey::from_value(key_field, key_value);
        let id = self.inner.keys.get(model, &key)?;
        let record = self.find_by_id(id, point_in_time)?;
        if point_in_time.is_some() {
            let held = BusinessKey::from_payload(model, key_field, &record.payload).ok();
            if held.as_ref() != Some(&key) {
                return None;
            }
        }
        Some(record)
    }

    /// Live entities of `model` matching `condition`, in creation order.
    pub fn search(&self, model: &EntityModel, condition: &Condition) -> Result<Vec<EntityRecord>> {
        let predicate = condition.compile()?;

        let candidates: Vec<Snapshot> = {
            let live = self.inner.live.read();
            live.by_model
                .get(model)
                .into_iter()
                .flat_map(|ids| ids.values())
                .filter_map(|id| live.records.get(id))
                .map(|entry| Arc::clone(&entry.snapshot))
                .collect()
        };

        let matches: Vec<EntityRecord> = candidates
            .iter()
            .filter(|snapshot| predicate.matches_record(snapshot))
            .map(|snapshot| (**snapshot).clone())
            .collect();
        debug!(
            model = %model,
            scanned = candidates.len(),
            matched = matches.len(),
            "Search complete"
        );
        Ok(matches)
    }

    /// Change metadata of every version at or before `point_in_time`
    /// (all versions if `None`), oldest first. Includes the delete tombstone.
    pub fn change_history(
        &self,
        id: TechnicalId,
        point_in_time: Option<OffsetDateTime>,
    ) -> Vec<ChangeMetadata> {
        let entries = match point_in_time {
            None => self.inner.log.entries_for(&id),
            Some(instant) => self.inner.log.entries_before(&id, instant),
        };
        entries.iter().map(|entry| entry.metadata()).collect()
    }

    /// Delete a live entity.
    ///
    /// Appends a tombstone carrying the last state and payload and releases
    /// the business key. History stays readable.
    pub async fn delete(&self, id: TechnicalId) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.locks.lock(id).await;

        let current = self.live_snapshot(&id).ok_or_else(|| Error::not_found(&id))?;
        let now = inner.log.stamp(&id, inner.config.clock.now());
        let staged = [self.stage(
            id,
            now,
            &current.state,
            &current.payload,
            None,
            ChangeKind::Delete,
        )];
        self.persist(&current.model, current.business_key_field.as_deref(), &staged)
            .await?;

        inner.live.write().remove(&id);
        self.release_key(&current);

        debug!(%id, model = %current.model, state = %current.state, "Entity deleted");
        Ok(())
    }

    /// Remove an entity and its entire history, including from the journal.
    pub async fn purge(&self, id: TechnicalId) -> Result<()> {
        let inner = &self.inner;
        let _guard = inner.locks.lock(id).await;

        let current = self.live_snapshot(&id);
        let model = match &current {
            Some(snapshot) => snapshot.model.clone(),
            None => inner
                .log
                .stream_model(&id)
                .ok_or_else(|| Error::not_found(&id))?,
        };
        inner.journal.purge(&model, id).await?;

        if let Some(snapshot) = &current {
            inner.live.write().remove(&id);
            self.release_key(snapshot);
        }
        inner.log.purge(&id);

        debug!(%id, model = %model, was_live = current.is_some(), "Entity purged");
        Ok(())
    }

    /// Number of live entities of `model`.
    pub fn count(&self, model: &EntityModel) -> usize {
        self.inner
            .live
            .read()
            .by_model
            .get(model)
            .map_or(0, BTreeMap::len)
    }

    fn live_snapshot(&self, id: &TechnicalId) -> Option<Snapshot> {
        self.inner
            .live
            .read()
            .records
            .get(id)
            .map(|entry| Arc::clone(&entry.snapshot))
    }

    fn stage(
        &self,
        id: TechnicalId,
        timestamp: OffsetDateTime,
        state: &str,
        payload: &Value,
        transition: Option<&str>,
        kind: ChangeKind,
    ) -> Arc<VersionEntry> {
        Arc::new(VersionEntry {
            id,
            sequence: self.inner.log.next_sequence(),
            timestamp,
            state: state.to_string(),
            payload: payload.clone(),
            transition: transition.map(str::to_string),
            kind,
        })
    }

    /// Journal the staged entries, then commit them to the log.
    async fn persist(
        &self,
        model: &EntityModel,
        business_key_field: Option<&str>,
        staged: &[Arc<VersionEntry>],
    ) -> Result<()> {
        let records: Vec<JournalRecord> = staged
            .iter()
            .map(|entry| JournalRecord {
                model: model.clone(),
                business_key_field: business_key_field.map(str::to_string),
                entry: (**entry).clone(),
            })
            .collect();
        self.inner.journal.append(&records).await?;
        self.inner.log.commit(model, business_key_field, staged);
        Ok(())
    }

    fn release_key(&self, record: &EntityRecord) {
        let Some(field) = record.business_key_field.as_deref() else {
            return;
        };
        if let Ok(key) = BusinessKey::from_payload(&record.model, field, &record.payload) {
            self.inner.keys.release(&record.model, &key, record.id);
        }
    }
}

fn snapshot_of(
    entry: &VersionEntry,
    model: &EntityModel,
    business_key_field: Option<String>,
    created_at: OffsetDateTime,
) -> EntityRecord {
    EntityRecord {
        id: entry.id,
        model: model.clone(),
        state: entry.state.clone(),
        payload: entry.payload.clone(),
        business_key_field,
        sequence: entry.sequence,
        created_at,
        last_modified_at: entry.timestamp,
    }
}
