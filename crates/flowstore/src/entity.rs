//! Core entity types: identifiers, live records and change metadata.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

/// System-generated identifier of an entity instance.
///
/// Allocated on create and stable for the lifetime of the record (and of its
/// history, which outlives deletion).
///
/// # Example
///
/// ```
/// use flowstore::TechnicalId;
///
/// let id = TechnicalId::new();
/// let parsed: TechnicalId = id.to_string().parse().unwrap();
/// assert_eq!(id, parsed);
/// assert_eq!(id.as_uuid().get_version_num(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TechnicalId(Uuid);

impl TechnicalId {
    /// Allocate a fresh random ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Borrow the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TechnicalId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TechnicalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::str::FromStr for TechnicalId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl From<Uuid> for TechnicalId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// An entity type name paired with its schema version.
///
/// Graphs, indexes and searches are all scoped to a model.
///
/// # Example
///
/// ```
/// use flowstore::EntityModel;
///
/// let model = EntityModel::new("cart", 1);
/// assert_eq!(model.entity_type(), "cart");
/// assert_eq!(model.version(), 1);
/// assert_eq!(format!("{}", model), "cart@1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityModel {
    entity_type: String,
    version: u32,
}

impl EntityModel {
    /// Create a new model reference.
    pub fn new(entity_type: impl Into<String>, version: u32) -> Self {
        Self {
            entity_type: entity_type.into(),
            version,
        }
    }

    /// The entity type name (e.g., "cart", "loan").
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// The schema version.
    pub fn version(&self) -> u32 {
        self.version
    }
}

impl std::fmt::Display for EntityModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.entity_type, self.version)
    }
}

impl<S: Into<String>> From<(S, u32)> for EntityModel {
    fn from((entity_type, version): (S, u32)) -> Self {
        Self::new(entity_type, version)
    }
}

/// Snapshot of an entity: the state and payload after its latest change
/// (or after the latest change at a requested instant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: TechnicalId,
    pub model: EntityModel,
    pub state: String,
    pub payload: Value,
    /// Business-key field the record was registered under, if any.
    pub business_key_field: Option<String>,
    /// Global sequence number of the version entry this snapshot reflects.
    pub sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_modified_at: OffsetDateTime,
}

impl EntityRecord {
    /// Look up a value in the payload by field path.
    ///
    /// Returns `None` if the path is malformed or not present.
    pub fn field(&self, path: &str) -> Option<&Value> {
        crate::condition::FieldPath::parse(path)
            .ok()
            .and_then(|path| path.resolve(&self.payload))
    }
}

/// Shared, immutable snapshot handed out by the store.
pub(crate) type Snapshot = Arc<EntityRecord>;

/// What kind of change produced a version entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Create,
    Update,
    Delete,
}

/// Change metadata for one version entry, without the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMetadata {
    pub sequence: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub transition: Option<String>,
    pub kind: ChangeKind,
}

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateOutcome {
    pub id: TechnicalId,
    /// State after any automatic transitions fired.
    pub state: String,
    /// Metadata of every entry written by the create, oldest first.
    pub changes: Vec<ChangeMetadata>,
}

/// Result of a successful update.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateOutcome {
    pub state: String,
    pub change: ChangeMetadata,
}
