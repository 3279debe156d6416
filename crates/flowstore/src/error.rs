//! Error types for flowstore.

use thiserror::Error;

use crate::entity::{EntityModel, TechnicalId};

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in flowstore operations.
///
/// Every variant is a typed outcome; callers decide how to map them onto
/// their own transport (HTTP status codes and so on).
#[derive(Debug, Error)]
pub enum Error {
    /// A live entity already holds this business-key value.
    #[error("duplicate business key {key_field}={key_value} for {model}")]
    DuplicateKey {
        model: EntityModel,
        key_field: String,
        key_value: String,
    },

    /// The payload does not carry a value for the declared business-key field.
    #[error("payload for {model} has no value for business key field {key_field}")]
    MissingBusinessKey { model: EntityModel, key_field: String },

    /// A create named a business-key field other than the one declared on
    /// the model's graph.
    #[error("{model} declares business key field {declared}, not {requested}")]
    BusinessKeyFieldConflict {
        model: EntityModel,
        declared: String,
        requested: String,
    },

    /// Unknown or deleted technical ID, or unknown business key.
    #[error("entity not found: {0}")]
    NotFound(String),

    /// The transition name is not declared in the entity's graph.
    #[error("unknown transition {transition} for {model}")]
    UnknownTransition { model: EntityModel, transition: String },

    /// The transition exists but its source does not match the current state.
    #[error("transition {transition} is not allowed from state {state} for {model}")]
    IllegalTransition {
        model: EntityModel,
        transition: String,
        state: String,
    },

    /// The condition tree uses an unsupported operator or an unparseable path.
    #[error("malformed condition: {0}")]
    MalformedCondition(String),

    /// No transition graph is registered for the model.
    #[error("unknown entity model: {0}")]
    UnknownEntityModel(EntityModel),

    /// A transition graph was registered more than once for the same model.
    #[error("duplicate entity model registration: {0}")]
    DuplicateEntityModel(EntityModel),

    /// A transition graph violates a construction invariant.
    #[error("invalid transition graph for {model}: {reason}")]
    InvalidGraph { model: EntityModel, reason: String },

    /// Failed to serialize or deserialize journal data.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Journal I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A journal line could not be decoded.
    ///
    /// Includes the file and the 1-based line number of the offending record.
    #[error("corrupt journal record at {file}:{line}: {source}")]
    CorruptJournal {
        file: String,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// Create a not-found error for a technical ID.
    pub fn not_found(id: &TechnicalId) -> Self {
        Error::NotFound(id.to_string())
    }

    /// Create a not-found error for a business key lookup.
    pub fn key_not_found(model: &EntityModel, key_field: &str, key_value: &str) -> Self {
        Error::NotFound(format!("{model} {key_field}={key_value}"))
    }

    /// Create an invalid-graph error with context.
    pub fn invalid_graph(model: &EntityModel, reason: impl Into<String>) -> Self {
        Error::InvalidGraph {
            model: model.clone(),
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors caused by the caller's request rather than
    /// by storage (useful for mapping onto 4xx vs 5xx responses).
    pub fn is_client_error(&self) -> bool {
        !matches!(
            self,
            Error::Serialization(_) | Error::Io(_) | Error::CorruptJournal { .. }
        )
    }
}
