//! Definition registry: stores and retrieves workflow definitions
//!
//! Workflow definitions are immutable once registered. To modify,
//! register a new version under the same name. Every definition is
//! compiled at registration so submissions never see an invalid graph.

use crate::compiler::PatternCompiler;
use crate::graph::CompiledGraph;
use std::collections::HashMap;
use std::sync::Arc;
use workflow_types::{WorkflowDefinition, WorkflowDefinitionId, WorkflowError, WorkflowResult};

/// A definition together with its compiled graph
#[derive(Clone, Debug)]
pub struct RegisteredDefinition {
    pub definition: Arc<WorkflowDefinition>,
    pub graph: Arc<CompiledGraph>,
}

/// Registry of workflow definitions
#[derive(Clone, Debug, Default)]
pub struct DefinitionRegistry {
    /// All registered definitions, keyed by ID
    definitions: HashMap<WorkflowDefinitionId, RegisteredDefinition>,
    /// Index by name → list of definition IDs, oldest version first
    by_name: HashMap<String, Vec<WorkflowDefinitionId>>,
}

impl DefinitionRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow definition
    ///
    /// Validates and compiles the definition before storing it. The
    /// version is assigned here: one more than the latest version
    /// registered under the same name. Returns the definition ID.
    pub fn register(
        &mut self,
        mut definition: WorkflowDefinition,
    ) -> WorkflowResult<WorkflowDefinitionId> {
        if self.definitions.contains_key(&definition.id) {
            return Err(WorkflowError::ValidationError(format!(
                "Definition {} is already registered",
                definition.id
            )));
        }

        let graph = PatternCompiler::compile(&definition)?;

        definition.version = self
            .get_latest_by_name(&definition.name)
            .map(|latest| latest.version + 1)
            .unwrap_or(1);

        let id = definition.id.clone();
        let name = definition.name.clone();
        let version = definition.version;

        self.definitions.insert(
            id.clone(),
            RegisteredDefinition {
                definition: Arc::new(definition),
                graph: Arc::new(graph),
            },
        );
        self.by_name.entry(name).or_default().push(id.clone());

        tracing::info!(definition_id = %id, version, "Workflow definition registered");
        Ok(id)
    }

    /// Get a definition and its graph by ID
    pub fn get(&self, id: &WorkflowDefinitionId) -> WorkflowResult<&RegisteredDefinition> {
        self.definitions
            .get(id)
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.clone()))
    }

    /// Get the latest version of a definition by name
    pub fn get_latest_by_name(&self, name: &str) -> Option<&WorkflowDefinition> {
        self.by_name
            .get(name)
            .and_then(|ids| ids.last())
            .and_then(|id| self.definitions.get(id))
            .map(|r| r.definition.as_ref())
    }

    /// Get all versions of a definition by name, oldest first
    pub fn get_versions_by_name(&self, name: &str) -> Vec<&WorkflowDefinition> {
        self.by_name
            .get(name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.definitions.get(id))
                    .map(|r| r.definition.as_ref())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// List all registered definitions
    pub fn list(&self) -> Vec<&WorkflowDefinition> {
        self.definitions
            .values()
            .map(|r| r.definition.as_ref())
            .collect()
    }

    /// Total number of registered definitions
    pub fn count(&self) -> usize {
        self.definitions.len()
    }

    /// Check if a definition exists
    pub fn contains(&self, id: &WorkflowDefinitionId) -> bool {
        self.definitions.contains_key(id)
    }

    /// Remove a definition
    ///
    /// Running executions keep their own handle on the graph and are
    /// unaffected.
    pub fn remove(&mut self, id: &WorkflowDefinitionId) -> WorkflowResult<Arc<WorkflowDefinition>> {
        let removed = self
            .definitions
            .remove(id)
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.clone()))?;

        // Clean up the name index
        let name = &removed.definition.name;
        if let Some(ids) = self.by_name.get_mut(name) {
            ids.retain(|i| i != id);
            if ids.is_empty() {
                self.by_name.remove(name);
            }
        }

        tracing::info!(definition_id = %id, "Workflow definition removed");
        Ok(removed.definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use workflow_types::{AgentRole, Pattern, StepSpec};

    fn make_valid_definition(name: &str) -> WorkflowDefinition {
        WorkflowDefinition::new(name, Pattern::Sequential)
            .with_role(AgentRole::new("writer"))
            .with_step(StepSpec::agent("draft", "writer", "Write a draft"))
            .with_step(StepSpec::agent("polish", "writer", "Polish the draft"))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = DefinitionRegistry::new();
        let def = make_valid_definition("Test Workflow");
        let id = registry.register(def).unwrap();

        let retrieved = registry.get(&id).unwrap();
        assert_eq!(retrieved.definition.name, "Test Workflow");
        assert_eq!(retrieved.graph.step_count(), 2);
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn test_register_invalid() {
        let mut registry = DefinitionRegistry::new();
        // No steps
        let def = WorkflowDefinition::new("Bad", Pattern::Sequential);
        let result = registry.register(def);
        assert!(result.is_err());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_register_duplicate_id() {
        let mut registry = DefinitionRegistry::new();
        registry
            .register(make_valid_definition("A").with_id("fixed"))
            .unwrap();
        let result = registry.register(make_valid_definition("B").with_id("fixed"));
        assert!(matches!(result, Err(WorkflowError::ValidationError(_))));
    }

    #[test]
    fn test_get_by_name_assigns_versions() {
        let mut registry = DefinitionRegistry::new();

        let def1 = make_valid_definition("Review Workflow");
        let def2 = make_valid_definition("Review Workflow");

        registry.register(def1).unwrap();
        let id2 = registry.register(def2).unwrap();

        let versions = registry.get_versions_by_name("Review Workflow");
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, 1);
        assert_eq!(versions[1].version, 2);

        let latest = registry.get_latest_by_name("Review Workflow").unwrap();
        assert_eq!(latest.id, id2);

        assert!(registry.get_latest_by_name("Nonexistent").is_none());
    }

    #[test]
    fn test_list() {
        let mut registry = DefinitionRegistry::new();
        registry.register(make_valid_definition("A")).unwrap();
        registry.register(make_valid_definition("B")).unwrap();

        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_remove() {
        let mut registry = DefinitionRegistry::new();
        let id = registry
            .register(make_valid_definition("Remove Me"))
            .unwrap();

        assert!(registry.contains(&id));
        let removed = registry.remove(&id).unwrap();
        assert_eq!(removed.name, "Remove Me");
        assert!(!registry.contains(&id));
        assert_eq!(registry.count(), 0);
        assert!(registry.get_versions_by_name("Remove Me").is_empty());
    }

    #[test]
    fn test_remove_nonexistent() {
        let mut registry = DefinitionRegistry::new();
        let result = registry.remove(&WorkflowDefinitionId::new("nonexistent"));
        assert!(matches!(result, Err(WorkflowError::DefinitionNotFound(_))));
    }

    #[test]
    fn test_get_nonexistent() {
        let registry = DefinitionRegistry::new();
        let result = registry.get(&WorkflowDefinitionId::new("nonexistent"));
        assert!(matches!(result, Err(WorkflowError::DefinitionNotFound(_))));
    }
}
