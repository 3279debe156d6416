//! Per-model workflow state machines.
//!
//! A [`TransitionGraph`] declares the initial state of an entity model and the
//! named transitions that move its entities between states. States are opaque
//! string labels; transitions are deterministic (exactly one destination).
//!
//! Graphs are built once at startup and registered in an immutable
//! [`WorkflowEngine`], which the entity store consults on every create and
//! transition.
//!
//! # Example
//!
//! ```
//! use flowstore::{EntityModel, Transition, TransitionGraph, WorkflowEngine};
//!
//! let cart = EntityModel::new("cart", 1);
//! let engine = WorkflowEngine::builder()
//!     .register(
//!         cart.clone(),
//!         TransitionGraph::builder("initial_state")
//!             .transition(Transition::new("create_on_first_add", "initial_state", "open"))
//!             .transition(Transition::new("checkout", "open", "checked_out"))
//!             .transition(Transition::from_any("abandon", "abandoned")),
//!     )
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(engine.initial_state(&cart).unwrap(), "initial_state");
//! assert_eq!(
//!     engine.resolve(&cart, "create_on_first_add", "initial_state").unwrap(),
//!     "open"
//! );
//! ```

mod engine;
pub mod visualization;

use std::collections::{BTreeSet, HashMap};

use crate::entity::EntityModel;
use crate::error::{Error, Result};

pub use engine::{WorkflowEngine, WorkflowEngineBuilder};

/// Which states a transition may fire from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceState {
    /// Fires from every state.
    Any,
    /// Fires only from the named state.
    State(String),
}

impl SourceState {
    /// Returns `true` if a transition with this source may fire from `state`.
    pub fn matches(&self, state: &str) -> bool {
        match self {
            SourceState::Any => true,
            SourceState::State(source) => source == state,
        }
    }

    fn overlaps(&self, other: &SourceState) -> bool {
        match (self, other) {
            (SourceState::State(a), SourceState::State(b)) => a == b,
            _ => true,
        }
    }
}

impl From<&str> for SourceState {
    fn from(state: &str) -> Self {
        SourceState::State(state.to_string())
    }
}

impl From<String> for SourceState {
    fn from(state: String) -> Self {
        SourceState::State(state)
    }
}

impl std::fmt::Display for SourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceState::Any => f.write_str("*"),
            SourceState::State(state) => f.write_str(state),
        }
    }
}

/// A named edge in a transition graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    name: String,
    source: SourceState,
    destination: String,
    automatic: bool,
}

impl Transition {
    /// A manual transition from `source` to `destination`.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<SourceState>,
        destination: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            destination: destination.into(),
            automatic: false,
        }
    }

    /// A manual transition that may fire from any state.
    pub fn from_any(name: impl Into<String>, destination: impl Into<String>) -> Self {
        Self::new(name, SourceState::Any, destination)
    }

    /// Mark the transition as automatic: the store applies it without an
    /// explicit request as soon as an entity is created in its source state.
    pub fn automatic(mut self) -> Self {
        self.automatic = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SourceState {
        &self.source
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn is_automatic(&self) -> bool {
        self.automatic
    }
}

/// Validated state machine for one entity model.
#[derive(Debug, Clone)]
pub struct TransitionGraph {
    model: EntityModel,
    initial_state: String,
    transitions: Vec<Transition>,
    by_name: HashMap<String, usize>,
    business_key: Option<String>,
}

impl TransitionGraph {
    /// Start building a graph with the given initial state.
    pub fn builder(initial_state: impl Into<String>) -> TransitionGraphBuilder {
        TransitionGraphBuilder {
            initial_state: initial_state.into(),
            transitions: vec![],
            business_key: None,
        }
    }

    pub fn model(&self) -> &EntityModel {
        &self.model
    }

    /// State assigned to every newly created entity.
    pub fn initial_state(&self) -> &str {
        &self.initial_state
    }

    /// Business-key field declared for the model, if any.
    pub fn business_key(&self) -> Option<&str> {
        self.business_key.as_deref()
    }

    /// Look up a transition by name.
    pub fn transition(&self, name: &str) -> Option<&Transition> {
        self.by_name.get(name).map(|&index| &self.transitions[index])
    }

    /// All transitions in declaration order.
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.iter()
    }

    /// Every state mentioned by the graph, sorted.
    pub fn states(&self) -> BTreeSet<&str> {
        let mut states = BTreeSet::from([self.initial_state.as_str()]);
        for transition in &self.transitions {
            if let SourceState::State(source) = &transition.source {
                states.insert(source.as_str());
            }
            states.insert(transition.destination.as_str());
        }
        states
    }

    /// Transitions that may fire from `state`.
    pub fn outgoing<'a>(&'a self, state: &'a str) -> impl Iterator<Item = &'a Transition> + 'a {
        self.transitions
            .iter()
            .filter(move |transition| transition.source.matches(state))
    }

    /// A state with no outgoing transitions.
    pub fn is_terminal(&self, state: &str) -> bool {
        self.outgoing(state).next().is_none()
    }

    /// Resolve a named transition from `current_state` to its destination.
    ///
    /// Fails with [`Error::UnknownTransition`] if the name is not declared and
    /// [`Error::IllegalTransition`] if its source does not match.
    pub fn resolve(&self, name: &str, current_state: &str) -> Result<&Transition> {
        let transition = self
            .transition(name)
            .ok_or_else(|| Error::UnknownTransition {
                model: self.model.clone(),
                transition: name.to_string(),
            })?;

        if !transition.source.matches(current_state) {
            return Err(Error::IllegalTransition {
                model: self.model.clone(),
                transition: name.to_string(),
                state: current_state.to_string(),
            });
        }

        Ok(transition)
    }

    /// The automatic transition that fires from `state`, if any.
    ///
    /// Construction guarantees there is at most one.
    pub fn auto_transition(&self, state: &str) -> Option<&Transition> {
        self.transitions
            .iter()
            .find(|transition| transition.automatic && transition.source.matches(state))
    }
}

/// Builder for a [`TransitionGraph`].
///
/// Validation happens when the owning [`WorkflowEngineBuilder`] is built, so
/// that errors carry the model they belong to.
#[derive(Debug, Clone)]
pub struct TransitionGraphBuilder {
    initial_state: String,
    transitions: Vec<Transition>,
    business_key: Option<String>,
}

impl TransitionGraphBuilder {
    /// Add a transition.
    pub fn transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Add multiple transitions.
    pub fn transitions(mut self, transitions: impl IntoIterator<Item = Transition>) -> Self {
        self.transitions.extend(transitions);
        self
    }

    /// Declare the payload field that must be unique across live entities.
    pub fn business_key(mut self, field: impl Into<String>) -> Self {
        self.business_key = Some(field.into());
        self
    }

    /// Validate and build the graph.
    pub fn build(self, model: &EntityModel) -> Result<TransitionGraph> {
        if self.initial_state.is_empty() {
            return Err(Error::invalid_graph(model, "initial state must not be empty"));
        }
        if let Some(field) = &self.business_key {
            crate::condition::FieldPath::parse(field)
                .map_err(|_| Error::invalid_graph(model, format!("bad business key {field:?}")))?;
        }

        let mut by_name = HashMap::with_capacity(self.transitions.len());
        for (index, transition) in self.transitions.iter().enumerate() {
            if transition.name.is_empty() {
                return Err(Error::invalid_graph(model, "transition name must not be empty"));
            }
            if transition.destination.is_empty()
                || matches!(&transition.source, SourceState::State(s) if s.is_empty())
            {
                return Err(Error::invalid_graph(
                    model,
                    format!("transition {} has an empty state", transition.name),
                ));
            }
            if by_name.insert(transition.name.clone(), index).is_some() {
                return Err(Error::invalid_graph(
                    model,
                    format!("transition {} declared twice", transition.name),
                ));
            }
        }

        let automatic: Vec<&Transition> =
            self.transitions.iter().filter(|t| t.automatic).collect();
        for (i, a) in automatic.iter().enumerate() {
            if let Some(b) = automatic[i + 1..]
                .iter()
                .find(|b| a.source.overlaps(&b.source))
            {
                return Err(Error::invalid_graph(
                    model,
                    format!(
                        "automatic transitions {} and {} fire from the same state",
                        a.name, b.name
                    ),
                ));
            }
        }

        Ok(TransitionGraph {
            model: model.clone(),
            initial_state: self.initial_state,
            transitions: self.transitions,
            by_name,
            business_key: self.business_key,
        })
    }
}
