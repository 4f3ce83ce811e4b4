/// Operation registry.
///
/// Holds the closed set of operations in registration order. Lookup walks
/// that order and returns the first spec whose rule accepts the text, so
/// registration order *is* classification precedence.
use std::sync::Arc;

use tracing::debug;

use crate::classifier::rules::{Rule, RULES};
use crate::config::OperationsConfig;

use super::{builtin, Operation, OperationKind};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Operation '{0}' is already registered")]
    AlreadyRegistered(OperationKind),
}

/// A registered operation: its rule (id, matcher, extraction, declared
/// parameters) bound to a handler.
pub struct OperationSpec {
    pub rule: &'static Rule,
    pub handler: Arc<dyn Operation>,
}

impl OperationSpec {
    pub fn new(rule: &'static Rule, handler: Arc<dyn Operation>) -> Self {
        Self { rule, handler }
    }

    pub fn kind(&self) -> OperationKind {
        self.rule.kind
    }
}

#[derive(Default)]
pub struct OperationRegistry {
    specs: Vec<OperationSpec>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every builtin rule in precedence order.
    pub fn builtin(config: &OperationsConfig) -> Self {
        let mut registry = Self::new();
        for rule in RULES {
            let handler = builtin::handler_for(rule.kind, config);
            // RULES holds one entry per kind, checked by its tests
            if let Err(e) = registry.register(OperationSpec::new(rule, handler)) {
                debug!("Skipping builtin rule: {e}");
            }
        }
        registry
    }

    pub fn register(&mut self, spec: OperationSpec) -> Result<(), RegistryError> {
        if self.get(spec.kind()).is_some() {
            return Err(RegistryError::AlreadyRegistered(spec.kind()));
        }
        debug!("Registered operation {}", spec.kind());
        self.specs.push(spec);
        Ok(())
    }

    /// First spec, in registration order, whose rule accepts the
    /// (lower-cased) text.
    pub fn lookup(&self, lowered: &str) -> Option<&OperationSpec> {
        self.specs.iter().find(|spec| spec.rule.matches(lowered))
    }

    pub fn get(&self, kind: OperationKind) -> Option<&OperationSpec> {
        self.specs.iter().find(|spec| spec.kind() == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OperationSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}
