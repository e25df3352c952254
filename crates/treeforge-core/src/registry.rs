//! Action registry: name to definition lookup built by explicit host
//! registration.
//!
//! The engine's dependency on the registry is just `lookup(name)`; how
//! definitions are discovered is the host's concern. Registering the same
//! name twice is a configuration error.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::action::DynForgeAction;
use crate::typing::TypeHint;

/// Factory producing the action object for one invocation.
pub type ActionFactory = Arc<dyn Fn() -> DynForgeAction + Send + Sync>;

/// A registered action: how to build it and how to type its input.
#[derive(Clone)]
pub struct ActionDefinition {
    name: String,
    input_hint: Option<TypeHint>,
    factory: ActionFactory,
}

impl ActionDefinition {
    /// Define an action instantiated fresh for every invocation.
    pub fn new(name: impl Into<String>, factory: ActionFactory) -> Self {
        Self {
            name: name.into(),
            input_hint: None,
            factory,
        }
    }

    /// Define an action backed by a shared instance.
    pub fn from_instance(name: impl Into<String>, instance: DynForgeAction) -> Self {
        let factory: ActionFactory = Arc::new(move || Arc::clone(&instance));
        Self::new(name, factory)
    }

    /// Declare the input type the evaluator should target.
    pub fn with_input_type(mut self, hint: TypeHint) -> Self {
        self.input_hint = Some(hint);
        self
    }

    /// Registered action name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared input type, if any.
    pub fn input_hint(&self) -> Option<&TypeHint> {
        self.input_hint.as_ref()
    }

    /// Build the action object for one invocation.
    pub fn instantiate(&self) -> DynForgeAction {
        (self.factory)()
    }
}

impl fmt::Debug for ActionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionDefinition")
            .field("name", &self.name)
            .field("input_hint", &self.input_hint)
            .finish_non_exhaustive()
    }
}

/// Registry configuration errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The same action name was registered more than once.
    #[error("action '{0}' is registered more than once")]
    DuplicateAction(String),
}

/// Immutable name to definition map consulted during fan-out.
#[derive(Debug, Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, ActionDefinition>,
}

impl ActionRegistry {
    /// Registry with no actions (an absent host module).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Start building a registry.
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// Definition for an action name, if registered.
    pub fn lookup(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.get(name)
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether no actions are registered.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Builder collecting action definitions, rejecting duplicates.
#[derive(Debug, Default)]
pub struct ActionRegistryBuilder {
    actions: HashMap<String, ActionDefinition>,
}

impl ActionRegistryBuilder {
    /// Add a definition; the name must not already be registered.
    pub fn register(mut self, definition: ActionDefinition) -> Result<Self, RegistryError> {
        let name = definition.name().to_owned();
        if self.actions.contains_key(&name) {
            return Err(RegistryError::DuplicateAction(name));
        }
        tracing::debug!(action = name.as_str(), "registered action");
        self.actions.insert(name, definition);
        Ok(self)
    }

    /// Finish building.
    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            actions: self.actions,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
