//! Diagram export for transition graphs.
//!
//! [`TransitionGraph::definition`] flattens a graph into a
//! [`StateMachineDefinition`], which renders to Mermaid or Graphviz DOT for
//! debugging and documentation.
//!
//! # Example
//!
//! ```
//! use flowstore::{EntityModel, Transition, TransitionGraph};
//!
//! let graph = TransitionGraph::builder("initial_state")
//!     .transition(Transition::new("start", "initial_state", "created").automatic())
//!     .transition(Transition::new("finish", "created", "done"))
//!     .build(&EntityModel::new("data_source", 1))
//!     .unwrap();
//!
//! let mermaid = graph.definition().to_mermaid();
//! assert!(mermaid.contains("initial_state --> created : start (auto)"));
//! assert!(mermaid.contains("done --> [*]"));
//! ```

use std::collections::{HashMap, HashSet};

use super::{SourceState, TransitionGraph};

/// Static state machine definition for visualization tools.
#[derive(Debug, Clone)]
pub struct StateMachineDefinition {
    /// All states, sorted by name.
    pub states: Vec<StateDefinition>,

    /// All edges. Any-source transitions are expanded to one edge per state.
    pub transitions: Vec<TransitionDefinition>,

    /// The initial state name.
    pub initial_state: String,
}

/// A state in the definition.
#[derive(Debug, Clone)]
pub struct StateDefinition {
    pub name: String,
    /// No transition leaves this state.
    pub is_terminal: bool,
}

impl StateDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_terminal: false,
        }
    }

    /// Mark as terminal state.
    pub fn terminal(mut self) -> Self {
        self.is_terminal = true;
        self
    }
}

/// An edge in the definition.
#[derive(Debug, Clone)]
pub struct TransitionDefinition {
    pub from: String,
    pub to: String,
    /// Transition name.
    pub name: String,
    pub automatic: bool,
}

impl TransitionDefinition {
    pub fn new(from: impl Into<String>, to: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            name: name.into(),
            automatic: false,
        }
    }

    /// Mark as automatic.
    pub fn automatic(mut self) -> Self {
        self.automatic = true;
        self
    }

    fn label(&self) -> String {
        if self.automatic {
            format!("{} (auto)", self.name)
        } else {
            self.name.clone()
        }
    }
}

impl StateMachineDefinition {
    /// Create a new, empty definition.
    pub fn new(initial_state: impl Into<String>) -> Self {
        Self {
            states: vec![],
            transitions: vec![],
            initial_state: initial_state.into(),
        }
    }

    /// Add a state.
    pub fn with_state(mut self, state: StateDefinition) -> Self {
        self.states.push(state);
        self
    }

    /// Add a transition.
    pub fn with_transition(mut self, transition: TransitionDefinition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Generate a Mermaid state diagram.
    ///
    /// # Example Output
    ///
    /// ```text
    /// stateDiagram-v2
    ///     [*] --> initial_state
    ///     initial_state --> created : start (auto)
    ///     created --> done : finish
    ///     done --> [*]
    /// ```
    ///
    /// State names that are not plain identifiers are declared once with a
    /// generated ID (`state "in review" as in_review`) and referenced by it.
    pub fn to_mermaid(&self) -> String {
        let ids = self.mermaid_ids();
        let mut lines = vec!["stateDiagram-v2".to_string()];

        for name in self.state_names() {
            let state_id = mermaid_id(&ids, name);
            if state_id != name {
                lines.push(format!("    state \"{}\" as {}", name.replace('"', "'"), state_id));
            }
        }

        lines.push(format!("    [*] --> {}", mermaid_id(&ids, &self.initial_state)));

        for t in &self.transitions {
            lines.push(format!(
                "    {} --> {} : {}",
                mermaid_id(&ids, &t.from),
                mermaid_id(&ids, &t.to),
                t.label()
            ));
        }

        for s in &self.states {
            if s.is_terminal {
                lines.push(format!("    {} --> [*]", mermaid_id(&ids, &s.name)));
            }
        }

        lines.join("\n")
    }

    /// Generate a DOT graph for Graphviz. Automatic edges are dashed.
    pub fn to_dot(&self) -> String {
        let mut lines = vec![
            "digraph workflow {".to_string(),
            "    rankdir=LR;".to_string(),
            "    node [shape=box];".to_string(),
            "".to_string(),
        ];

        for t in &self.transitions {
            let style = if t.automatic { ", style=dashed" } else { "" };
            lines.push(format!(
                "    \"{}\" -> \"{}\" [label=\"{}\"{}];",
                dot_escape(&t.from),
                dot_escape(&t.to),
                dot_escape(&t.name),
                style
            ));
        }

        lines.push("".to_string());
        for s in &self.states {
            if s.is_terminal {
                lines.push(format!("    \"{}\" [shape=doublecircle];", dot_escape(&s.name)));
            }
        }

        lines.push("}".to_string());
        lines.join("\n")
    }

    /// Every state name mentioned, in first-seen order.
    fn state_names(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        std::iter::once(self.initial_state.as_str())
            .chain(self.states.iter().map(|s| s.name.as_str()))
            .chain(self.transitions.iter().flat_map(|t| [t.from.as_str(), t.to.as_str()]))
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Mermaid ID for each state name. Plain identifiers map to themselves;
    /// anything else is reduced to `[A-Za-z0-9_]` and made unique.
    fn mermaid_ids(&self) -> HashMap<&str, String> {
        let names = self.state_names();
        let mut taken: HashSet<String> = names
            .iter()
            .filter(|name| is_mermaid_id(name))
            .map(|name| name.to_string())
            .collect();

        let mut ids = HashMap::new();
        for name in names {
            if is_mermaid_id(name) {
                ids.insert(name, name.to_string());
                continue;
            }
            let base: String = name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            let base = if base.is_empty() { "state".to_string() } else { base };
            let mut candidate = base.clone();
            let mut suffix = 1;
            while taken.contains(&candidate) {
                suffix += 1;
                candidate = format!("{base}_{suffix}");
            }
            taken.insert(candidate.clone());
            ids.insert(name, candidate);
        }
        ids
    }
}

fn mermaid_id<'a>(ids: &'a HashMap<&str, String>, name: &'a str) -> &'a str {
    ids.get(name).map_or(name, String::as_str)
}

fn is_mermaid_id(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn dot_escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

impl TransitionGraph {
    /// Flatten the graph into a [`StateMachineDefinition`].
    pub fn definition(&self) -> StateMachineDefinition {
        let states = self.states();
        let mut definition = StateMachineDefinition::new(self.initial_state());

        for state in &states {
            let mut def = StateDefinition::new(*state);
            if self.is_terminal(state) {
                def = def.terminal();
            }
            definition = definition.with_state(def);
        }

        for transition in self.transitions() {
            let sources: Vec<&str> = match transition.source() {
                SourceState::Any => states.iter().copied().collect(),
                SourceState::State(source) => vec![source.as_str()],
            };
            for source in sources {
                let mut def =
                    TransitionDefinition::new(source, transition.destination(), transition.name());
                if transition.is_automatic() {
                    def = def.automatic();
                }
                definition = definition.with_transition(def);
            }
        }

        definition
    }
}
