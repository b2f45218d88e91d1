//! Handler registry: resolves a step's action key to a handler.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use crate::handler::ActionHandler;

/// Maps handler ids and aliases to handlers.
///
/// Registering a key that is already taken replaces the previous handler for
/// that key (last registration wins).
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: ActionHandler + 'static>(&mut self, handler: H) {
        self.register_arc(Arc::new(handler));
    }

    /// Register under the handler's id and every alias.
    pub fn register_arc(&mut self, handler: Arc<dyn ActionHandler>) {
        let metadata = handler.metadata();
        for key in metadata.keys() {
            if let Some(previous) = self.handlers.insert(key.to_string(), Arc::clone(&handler)) {
                tracing::debug!(
                    key,
                    previous = %previous.metadata().id,
                    replacement = %metadata.id,
                    "handler key re-registered"
                );
            }
        }
    }

    pub fn resolve(&self, id_or_alias: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(id_or_alias).cloned()
    }

    pub fn contains(&self, id_or_alias: &str) -> bool {
        self.handlers.contains_key(id_or_alias)
    }

    /// Sorted ids of all reachable handlers.
    pub fn ids(&self) -> Vec<String> {
        self.handlers
            .values()
            .map(|h| h.metadata().id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Number of distinct reachable handlers.
    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::error::Result;
    use crate::handler::{ExecutionScope, HandlerMetadata};
    use crate::snapshot::ActionSnapshot;
    use crate::validation::ValidationError;
    use async_trait::async_trait;
    use serde_json::Value;

    struct Named {
        metadata: HandlerMetadata,
    }

    impl Named {
        fn new(id: &str, aliases: &[&str]) -> Self {
            Self {
                metadata: HandlerMetadata::new(id).with_aliases(aliases.iter().copied()),
            }
        }
    }

    #[async_trait]
    impl ActionHandler for Named {
        fn metadata(&self) -> &HandlerMetadata {
            &self.metadata
        }

        fn validate(
            &self,
            _options: &Value,
            _context: &Context,
            _snapshot: &ActionSnapshot,
        ) -> std::result::Result<(), ValidationError> {
            Ok(())
        }

        async fn execute(
            &self,
            _options: &Value,
            _scope: &ExecutionScope<'_>,
            _snapshot: &mut ActionSnapshot,
        ) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_resolve_by_id_and_alias() {
        let mut registry = HandlerRegistry::new();
        registry.register(Named::new("x.handler", &["x", "handler"]));

        let by_id = registry.resolve("x.handler").unwrap();
        let by_a1 = registry.resolve("x").unwrap();
        let by_a2 = registry.resolve("handler").unwrap();
        assert!(Arc::ptr_eq(&by_id, &by_a1));
        assert!(Arc::ptr_eq(&by_id, &by_a2));
        assert!(registry.resolve("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_last_registration_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register(Named::new("first", &["shared"]));
        registry.register(Named::new("second", &["shared"]));

        assert_eq!(registry.resolve("shared").unwrap().metadata().id, "second");
        assert_eq!(registry.resolve("first").unwrap().metadata().id, "first");
        assert_eq!(registry.ids(), vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_empty_registry() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.contains("anything"));
    }
}
