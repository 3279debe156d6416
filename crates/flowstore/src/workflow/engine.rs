//! Registry of transition graphs keyed by entity model.

use std::collections::HashMap;

use tracing::info;

use super::{Transition, TransitionGraph, TransitionGraphBuilder};
use crate::entity::EntityModel;
use crate::error::{Error, Result};

/// Immutable map from entity model to its validated [`TransitionGraph`].
///
/// Built once at startup and shared (typically behind an `Arc`) with the
/// entity store. There is no global registry; every store is handed the
/// engine it should use.
#[derive(Debug, Clone, Default)]
pub struct WorkflowEngine {
    graphs: HashMap<EntityModel, TransitionGraph>,
}

impl WorkflowEngine {
    /// Start registering graphs.
    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder {
            pending: vec![],
            duplicate_model: None,
        }
    }

    /// Look up the graph for a model.
    pub fn graph(&self, model: &EntityModel) -> Result<&TransitionGraph> {
        self.graphs
            .get(model)
            .ok_or_else(|| Error::UnknownEntityModel(model.clone()))
    }

    /// State assigned to newly created entities of `model`.
    pub fn initial_state(&self, model: &EntityModel) -> Result<&str> {
        Ok(self.graph(model)?.initial_state())
    }

    /// Resolve `transition` from `current_state`, returning the destination.
    pub fn resolve(
        &self,
        model: &EntityModel,
        transition: &str,
        current_state: &str,
    ) -> Result<&str> {
        Ok(self
            .graph(model)?
            .resolve(transition, current_state)?
            .destination())
    }

    /// The automatic transition that fires from `current_state`, if any.
    pub fn auto_transition(&self, model: &EntityModel, current_state: &str) -> Option<&Transition> {
        self.graphs.get(model)?.auto_transition(current_state)
    }

    /// Business-key field declared for `model`, if any.
    pub fn business_key_field(&self, model: &EntityModel) -> Option<&str> {
        self.graphs.get(model)?.business_key()
    }

    /// Registered models, in no particular order.
    pub fn models(&self) -> impl Iterator<Item = &EntityModel> {
        self.graphs.keys()
    }

    /// Returns the number of registered models.
    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

/// Builder for a [`WorkflowEngine`].
///
/// Registering the same model twice is reported by [`build`](Self::build) as
/// [`Error::DuplicateEntityModel`].
pub struct WorkflowEngineBuilder {
    pending: Vec<(EntityModel, TransitionGraphBuilder)>,
    duplicate_model: Option<EntityModel>,
}

impl WorkflowEngineBuilder {
    /// Register the graph for an entity model.
    pub fn register(mut self, model: impl Into<EntityModel>, graph: TransitionGraphBuilder) -> Self {
        let model = model.into();
        if self.duplicate_model.is_none() && self.pending.iter().any(|(m, _)| *m == model) {
            self.duplicate_model = Some(model.clone());
        }
        self.pending.push((model, graph));
        self
    }

    /// Validate every graph and build the engine.
    pub fn build(self) -> Result<WorkflowEngine> {
        if let Some(model) = self.duplicate_model {
            return Err(Error::DuplicateEntityModel(model));
        }

        let mut graphs = HashMap::with_capacity(self.pending.len());
        for (model, builder) in self.pending {
            let graph = builder.build(&model)?;
            graphs.insert(model, graph);
        }

        info!(models = graphs.len(), "Workflow engine built");
        Ok(WorkflowEngine { graphs })
    }
}
