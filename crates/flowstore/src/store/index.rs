//! Business-key index: unique key value → technical ID, per model and field.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde_json::Value;

use crate::condition::FieldPath;
use crate::entity::{EntityModel, TechnicalId};
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeySlot {
    model: EntityModel,
    field: String,
}

/// A business-key value extracted from a payload.
///
/// Values are indexed by their canonical JSON text, so `"L-1"` and `1` never
/// collide and numbers keep their JSON spelling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BusinessKey {
    pub field: String,
    pub value: String,
}

impl BusinessKey {
    /// Extract the key at `field` from `payload`.
    ///
    /// A missing or `null` value is [`Error::MissingBusinessKey`].
    pub fn from_payload(model: &EntityModel, field: &str, payload: &Value) -> Result<Self> {
        let path = FieldPath::parse(field)?;
        match path.resolve(payload) {
            Some(value) if !value.is_null() => Ok(Self {
                field: field.to_string(),
                value: canonical(value),
            }),
            _ => Err(Error::MissingBusinessKey {
                model: model.clone(),
                key_field: field.to_string(),
            }),
        }
    }

    /// Key from a caller-supplied lookup value.
    pub fn from_value(field: &str, value: &Value) -> Self {
        Self {
            field: field.to_string(),
            value: canonical(value),
        }
    }

    /// Human-readable value for error messages (strings without quotes).
    pub fn display_value(&self) -> String {
        match serde_json::from_str::<Value>(&self.value) {
            Ok(Value::String(s)) => s,
            _ => self.value.clone(),
        }
    }
}

fn canonical(value: &Value) -> String {
    value.to_string()
}

/// Unique index over live records.
///
/// `reserve` is an atomic check-and-insert, so two concurrent creates with
/// the same key cannot both succeed.
#[derive(Debug, Default)]
pub(crate) struct BusinessKeyIndex {
    slots: RwLock<HashMap<KeySlot, HashMap<String, TechnicalId>>>,
}

impl BusinessKeyIndex {
    /// Claim `key` for `id`. Succeeds if the key is free or already held by `id`.
    pub fn reserve(&self, model: &EntityModel, key: &BusinessKey, id: TechnicalId) -> Result<()> {
        let mut slots = self.slots.write();
        let values = slots
            .entry(KeySlot {
                model: model.clone(),
                field: key.field.clone(),
            })
            .or_default();
        match values.get(&key.value) {
            Some(holder) if *holder != id => Err(Error::DuplicateKey {
                model: model.clone(),
                key_field: key.field.clone(),
                key_value: key.display_value(),
            }),
            Some(_) => Ok(()),
            None => {
                values.insert(key.value.clone(), id);
                Ok(())
            }
        }
    }

    /// Drop `key` if, and only if, it is held by `id`.
    pub fn release(&self, model: &EntityModel, key: &BusinessKey, id: TechnicalId) {
        let mut slots = self.slots.write();
        let slot = KeySlot {
            model: model.clone(),
            field: key.field.clone(),
        };
        if let Some(values) = slots.get_mut(&slot) {
            if values.get(&key.value) == Some(&id) {
                values.remove(&key.value);
            }
            if values.is_empty() {
                slots.remove(&slot);
            }
        }
    }

    pub fn get(&self, model: &EntityModel, key: &BusinessKey) -> Option<TechnicalId> {
        let slots = self.slots.read();
        let slot = KeySlot {
            model: model.clone(),
            field: key.field.clone(),
        };
        slots.get(&slot)?.get(&key.value).copied()
    }
}
