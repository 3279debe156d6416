//! Append-only version history per entity.
//!
//! Every change to an entity appends one [`VersionEntry`] to that entity's
//! stream. Entries carry a global sequence number shared across all streams,
//! so the relative order of changes to different entities is preserved for
//! audit. Streams are never rewritten; deleting an entity appends a tombstone.
//! The only way to drop history is an explicit [`TemporalLog::purge`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::entity::{ChangeKind, ChangeMetadata, EntityModel, EntityRecord, TechnicalId};

/// One immutable version of an entity: its state and payload after a change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub id: TechnicalId,
    /// Global sequence number, unique and increasing across all streams.
    pub sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub state: String,
    pub payload: Value,
    /// Transition that produced this version; `None` for creates, plain
    /// edits and deletes.
    pub transition: Option<String>,
    pub kind: ChangeKind,
}

impl VersionEntry {
    /// Project the entry onto its change metadata.
    pub fn metadata(&self) -> ChangeMetadata {
        ChangeMetadata {
            sequence: self.sequence,
            timestamp: self.timestamp,
            transition: self.transition.clone(),
            kind: self.kind,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.kind == ChangeKind::Delete
    }
}

/// Ownership data shared by every entry of one stream.
#[derive(Debug, Clone)]
struct Stream {
    model: EntityModel,
    business_key_field: Option<String>,
    entries: Vec<Arc<VersionEntry>>,
}

impl Stream {
    fn snapshot(&self, entry: &VersionEntry) -> Option<EntityRecord> {
        if entry.is_tombstone() {
            return None;
        }
        let created_at = self.entries.first()?.timestamp;
        Some(EntityRecord {
            id: entry.id,
            model: self.model.clone(),
            state: entry.state.clone(),
            payload: entry.payload.clone(),
            business_key_field: self.business_key_field.clone(),
            sequence: entry.sequence,
            created_at,
            last_modified_at: entry.timestamp,
        })
    }
}

/// Per-entity version streams with a shared global sequence.
///
/// # Example
///
/// ```
/// use flowstore::{ChangeKind, EntityModel, TechnicalId, TemporalLog};
/// use serde_json::json;
/// use time::macros::datetime;
///
/// let log = TemporalLog::new();
/// let model = EntityModel::new("cart", 1);
/// let id = TechnicalId::new();
///
/// log.append(&model, None, id, json!({"lines": []}), "open", None, ChangeKind::Create,
///     datetime!(2024-01-01 10:00 UTC));
/// log.append(&model, None, id, json!({"lines": [1]}), "open", None, ChangeKind::Update,
///     datetime!(2024-01-01 11:00 UTC));
///
/// let at = log.record_at(&id, datetime!(2024-01-01 10:30 UTC)).unwrap();
/// assert_eq!(at.payload, json!({"lines": []}));
/// assert!(log.record_at(&id, datetime!(2024-01-01 09:00 UTC)).is_none());
/// ```
#[derive(Debug, Default)]
pub struct TemporalLog {
    last_sequence: AtomicU64,
    streams: RwLock<HashMap<TechnicalId, Stream>>,
}

impl TemporalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry, allocating its sequence number.
    ///
    /// The timestamp is clamped so a stream never goes backwards in time.
    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &self,
        model: &EntityModel,
        business_key_field: Option<&str>,
        id: TechnicalId,
        payload: Value,
        state: impl Into<String>,
        transition: Option<String>,
        kind: ChangeKind,
        timestamp: OffsetDateTime,
    ) -> Arc<VersionEntry> {
        let entry = Arc::new(VersionEntry {
            id,
            sequence: self.next_sequence(),
            timestamp: self.stamp(&id, timestamp),
            state: state.into(),
            payload,
            transition,
            kind,
        });
        self.commit(model, business_key_field, std::slice::from_ref(&entry));
        entry
    }

    /// Allocate the next global sequence number.
    pub(crate) fn next_sequence(&self) -> u64 {
        self.last_sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Clamp `now` to be no earlier than the stream's latest entry.
    pub(crate) fn stamp(&self, id: &TechnicalId, now: OffsetDateTime) -> OffsetDateTime {
        let streams = self.streams.read();
        match streams.get(id).and_then(|stream| stream.entries.last()) {
            Some(last) => now.max(last.timestamp),
            None => now,
        }
    }

    /// Publish staged entries to a stream, creating the stream on first use.
    ///
    /// Callers must serialize commits per ID and stage entries in order.
    pub(crate) fn commit(
        &self,
        model: &EntityModel,
        business_key_field: Option<&str>,
        entries: &[Arc<VersionEntry>],
    ) {
        let Some(first) = entries.first() else {
            return;
        };
        let mut streams = self.streams.write();
        let stream = streams.entry(first.id).or_insert_with(|| Stream {
            model: model.clone(),
            business_key_field: business_key_field.map(str::to_string),
            entries: vec![],
        });
        stream.entries.extend(entries.iter().cloned());
    }

    /// Re-insert an entry read back from a journal.
    ///
    /// Entries must arrive in sequence order. Returns `false` (and ignores the
    /// entry) if it does not extend its stream.
    pub(crate) fn restore(
        &self,
        model: &EntityModel,
        business_key_field: Option<&str>,
        entry: VersionEntry,
    ) -> bool {
        let mut streams = self.streams.write();
        let stream = streams.entry(entry.id).or_insert_with(|| Stream {
            model: model.clone(),
            business_key_field: business_key_field.map(str::to_string),
            entries: vec![],
        });
        if stream
            .entries
            .last()
            .is_some_and(|last| last.sequence >= entry.sequence || last.timestamp > entry.timestamp)
        {
            return false;
        }
        self.last_sequence
            .fetch_max(entry.sequence, Ordering::SeqCst);
        stream.entries.push(Arc::new(entry));
        true
    }

    /// Drop a stream entirely. Returns `true` if it existed.
    pub fn purge(&self, id: &TechnicalId) -> bool {
        self.streams.write().remove(id).is_some()
    }

    /// All entries of a stream, oldest first.
    pub fn entries_for(&self, id: &TechnicalId) -> Vec<Arc<VersionEntry>> {
        self.streams
            .read()
            .get(id)
            .map(|stream| stream.entries.clone())
            .unwrap_or_default()
    }

    /// Entries with `timestamp <= instant`, oldest first.
    pub fn entries_before(&self, id: &TechnicalId, instant: OffsetDateTime) -> Vec<Arc<VersionEntry>> {
        let streams = self.streams.read();
        let Some(stream) = streams.get(id) else {
            return vec![];
        };
        let end = stream
            .entries
            .partition_point(|entry| entry.timestamp <= instant);
        stream.entries[..end].to_vec()
    }

    /// The latest entry with `timestamp <= instant` (binary search).
    pub fn latest_at(&self, id: &TechnicalId, instant: OffsetDateTime) -> Option<Arc<VersionEntry>> {
        let streams = self.streams.read();
        let entries = &streams.get(id)?.entries;
        let end = entries.partition_point(|entry| entry.timestamp <= instant);
        end.checked_sub(1).map(|index| Arc::clone(&entries[index]))
    }

    /// The latest entry of a stream.
    pub fn latest(&self, id: &TechnicalId) -> Option<Arc<VersionEntry>> {
        self.streams.read().get(id)?.entries.last().cloned()
    }

    /// The entity as it was at `instant`.
    ///
    /// `None` before the first entry and whenever the latest entry at
    /// `instant` is a tombstone.
    pub fn record_at(&self, id: &TechnicalId, instant: OffsetDateTime) -> Option<EntityRecord> {
        let streams = self.streams.read();
        let stream = streams.get(id)?;
        let end = stream
            .entries
            .partition_point(|entry| entry.timestamp <= instant);
        let entry = stream.entries.get(end.checked_sub(1)?)?;
        stream.snapshot(entry)
    }

    /// The entity as of its latest entry (`None` if deleted).
    pub(crate) fn latest_record(&self, id: &TechnicalId) -> Option<EntityRecord> {
        let streams = self.streams.read();
        let stream = streams.get(id)?;
        stream.snapshot(stream.entries.last()?)
    }

    /// Model a stream belongs to, even after deletion.
    pub(crate) fn stream_model(&self, id: &TechnicalId) -> Option<EntityModel> {
        self.streams.read().get(id).map(|stream| stream.model.clone())
    }

    /// IDs of every stream, including deleted entities.
    pub(crate) fn stream_ids(&self) -> Vec<TechnicalId> {
        self.streams.read().keys().copied().collect()
    }

    /// The highest sequence number handed out so far.
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::SeqCst)
    }

    /// Number of streams (live and deleted entities).
    pub fn len(&self) -> usize {
        self.streams.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.read().is_empty()
    }
}
