//! Entity tracking handlers.
//!
//! ```yaml
//! ctx.entities.registered:
//!   - type: service
//!     id: api
//!     payload:
//!       replicas: 2
//! ```

use async_trait::async_trait;
use serde_json::Value;

use crate::context::{Context, EntityRef};
use crate::error::{FlowError, Result};
use crate::handler::{ActionHandler, ExecutionScope, HandlerMetadata};
use crate::snapshot::ActionSnapshot;
use crate::validation::{ValidationError, Violations, type_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityList {
    Registered,
    Updated,
    Unregistered,
    Deleted,
}

impl EntityList {
    fn name(self) -> &'static str {
        match self {
            Self::Registered => "registered",
            Self::Updated => "updated",
            Self::Unregistered => "unregistered",
            Self::Deleted => "deleted",
        }
    }
}

/// Marks entities in one of the four entity-tracking lists.
pub struct EntitiesHandler {
    metadata: HandlerMetadata,
    list: EntityList,
}

impl EntitiesHandler {
    fn for_list(list: EntityList) -> Self {
        let name = list.name();
        Self {
            metadata: HandlerMetadata::new(format!("fbl.context.entities.{name}"))
                .with_version("1.0.0")
                .with_aliases([
                    format!("context.entities.{name}"),
                    format!("ctx.entities.{name}"),
                ])
                .with_description(format!("Mark entities as {name}")),
            list,
        }
    }

    pub fn registered() -> Self {
        Self::for_list(EntityList::Registered)
    }

    pub fn updated() -> Self {
        Self::for_list(EntityList::Updated)
    }

    pub fn unregistered() -> Self {
        Self::for_list(EntityList::Unregistered)
    }

    pub fn deleted() -> Self {
        Self::for_list(EntityList::Deleted)
    }
}

#[async_trait]
impl ActionHandler for EntitiesHandler {
    fn metadata(&self) -> &HandlerMetadata {
        &self.metadata
    }

    fn validate(
        &self,
        options: &Value,
        _context: &Context,
        _snapshot: &ActionSnapshot,
    ) -> std::result::Result<(), ValidationError> {
        let mut violations = Violations::new();
        let Some(items) = violations.array("", options) else {
            return violations.finish();
        };
        if items.is_empty() {
            violations.push("", "must not be empty");
        }

        for (i, item) in items.iter().enumerate() {
            let path = format!("[{i}]");
            let Some(entity) = violations.object(&path, item) else {
                continue;
            };
            violations.unknown_keys(&path, entity, &["type", "id", "payload"]);
            violations.non_empty_string(&format!("{path}.type"), entity.get("type"));
            match entity.get("id") {
                Some(Value::Number(_)) => {}
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                Some(Value::String(_)) => violations.push(&format!("{path}.id"), "must not be empty"),
                Some(other) => violations.push(
                    &format!("{path}.id"),
                    format!("must be a string or number, got {}", type_name(other)),
                ),
                None => violations.push(&format!("{path}.id"), "is required"),
            }
        }
        violations.finish()
    }

    async fn execute(
        &self,
        options: &Value,
        scope: &ExecutionScope<'_>,
        snapshot: &mut ActionSnapshot,
    ) -> Result<()> {
        let entities: Vec<EntityRef> = serde_json::from_value(options.clone())
            .map_err(|e| FlowError::execution(format!("invalid entities: {e}")))?;
        let count = entities.len();

        let view = {
            let mut ctx = scope.context.write();
            for entity in entities {
                match self.list {
                    EntityList::Registered => ctx.mark_registered(entity),
                    EntityList::Updated => ctx.mark_updated(entity),
                    EntityList::Unregistered => ctx.mark_unregistered(entity),
                    EntityList::Deleted => ctx.mark_deleted(entity),
                }
            }
            ctx.view()
        };

        tracing::debug!(list = self.list.name(), count, "entities marked");
        snapshot.set_context(view);
        Ok(())
    }
}
