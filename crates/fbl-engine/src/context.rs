//! Shared execution context.
//!
//! One [`Context`] lives for a whole flow run and is shared by reference
//! between every step as a [`SharedContext`]. Handlers take the lock only for
//! the duration of a read or write and never hold a guard across an `.await`.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Context shared across a flow run.
pub type SharedContext = Arc<RwLock<Context>>;

/// Reference to an external entity touched by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRef {
    #[serde(rename = "type")]
    pub entity_type: String,
    /// String or numeric identifier.
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: impl Into<Value>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// The four ordered entity-tracking lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub registered: Vec<EntityRef>,
    #[serde(default)]
    pub updated: Vec<EntityRef>,
    #[serde(default)]
    pub unregistered: Vec<EntityRef>,
    #[serde(default)]
    pub deleted: Vec<EntityRef>,
}

/// Delimiter characters for the two template passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateDelimiters {
    pub global: char,
    pub local: char,
}

impl Default for TemplateDelimiters {
    fn default() -> Self {
        Self {
            global: '$',
            local: '%',
        }
    }
}

/// Mutable state shared by every step of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    /// Free-form variables, addressed as `ctx` in templates.
    #[serde(rename = "ctx", default)]
    pub variables: Map<String, Value>,
    /// Same shape as `variables`; never copied into snapshots or logs.
    #[serde(default)]
    pub secrets: Map<String, Value>,
    #[serde(default)]
    pub entities: Entities,
    #[serde(default)]
    pub template_delimiters: TemplateDelimiters,
}

impl Context {
    /// Empty context with default delimiters.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delimiters(mut self, global: char, local: char) -> Self {
        self.template_delimiters = TemplateDelimiters { global, local };
        self
    }

    /// Wrap into a [`SharedContext`].
    pub fn into_shared(self) -> SharedContext {
        Arc::new(RwLock::new(self))
    }

    /// Secret-free copy recorded in snapshots.
    pub fn view(&self) -> ContextView {
        ContextView {
            ctx: self.variables.clone(),
            entities: self.entities.clone(),
        }
    }

    pub fn mark_registered(&mut self, entity: EntityRef) {
        self.entities.registered.push(entity);
    }

    /// Updating an entity also re-asserts its registration.
    pub fn mark_updated(&mut self, entity: EntityRef) {
        self.entities.updated.push(entity.clone());
        self.entities.registered.push(entity);
    }

    pub fn mark_unregistered(&mut self, entity: EntityRef) {
        self.entities.unregistered.push(entity);
    }

    /// Deleting an entity also unregisters it.
    pub fn mark_deleted(&mut self, entity: EntityRef) {
        self.entities.deleted.push(entity.clone());
        self.entities.unregistered.push(entity);
    }
}

/// Copy of a [`Context`] without secrets.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ContextView {
    pub ctx: Map<String, Value>,
    pub entities: Entities,
}

// ─────────────────────────────────────────────────────────────────────────────
// Path assignment
// ─────────────────────────────────────────────────────────────────────────────

/// Split a dotted path (`a.b.c`, optionally prefixed with `$.`) into segments.
///
/// `.`, `$` and `$.` address the root and yield no segments.
pub fn path_segments(path: &str) -> Result<Vec<&str>, String> {
    let trimmed = path.trim();
    let body = trimmed
        .strip_prefix("$.")
        .or_else(|| trimmed.strip_prefix('$'))
        .unwrap_or(trimmed);
    if body.is_empty() || body == "." {
        return Ok(Vec::new());
    }
    let segments: Vec<&str> = body.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(format!("invalid path '{path}'"));
    }
    Ok(segments)
}

/// Write `value` at `path` inside `root`, creating intermediate objects.
///
/// With `push` the target is treated as an array and `value` is appended to
/// it (an absent target becomes a one-element array). A root path merges an
/// object value into `root` key by key.
pub fn assign_path(
    root: &mut Map<String, Value>,
    path: &str,
    value: Value,
    push: bool,
) -> Result<(), String> {
    let segments = path_segments(path)?;

    let Some((last, parents)) = segments.split_last() else {
        if push {
            return Err("cannot push to the root".to_string());
        }
        return match value {
            Value::Object(map) => {
                root.extend(map);
                Ok(())
            }
            _ => Err("only an object can be assigned to the root".to_string()),
        };
    };

    let mut current = root;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return Err(format!("'{segment}' is not an object")),
        };
    }

    if push {
        let target = current
            .entry(last.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        match target {
            Value::Array(items) => items.push(value),
            _ => return Err(format!("'{path}' is not an array")),
        }
    } else {
        current.insert(last.to_string(), value);
    }
    Ok(())
}

/// Recursively merge `overlay` into `base`; non-object values in `overlay` win.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Object(base)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_context_is_empty() {
        let ctx = Context::new();
        assert!(ctx.variables.is_empty());
        assert!(ctx.secrets.is_empty());
        assert_eq!(ctx.entities, Entities::default());
        assert_eq!(ctx.template_delimiters, TemplateDelimiters::default());
    }

    #[test]
    fn test_view_excludes_secrets() {
        let mut ctx = Context::new();
        ctx.variables.insert("a".into(), json!(1));
        ctx.secrets.insert("token".into(), json!("hidden"));
        let view = serde_json::to_value(ctx.view()).unwrap();
        assert_eq!(view["ctx"], json!({"a": 1}));
        assert!(view.get("secrets").is_none());
        assert!(!view.to_string().contains("hidden"));
    }

    #[test]
    fn test_entity_marks() {
        let mut ctx = Context::new();
        ctx.mark_registered(EntityRef::new("svc", "a"));
        ctx.mark_updated(EntityRef::new("svc", "b"));
        ctx.mark_unregistered(EntityRef::new("svc", "c"));
        ctx.mark_deleted(EntityRef::new("svc", 4));

        let ids = |list: &[EntityRef]| list.iter().map(|e| e.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&ctx.entities.registered), vec![json!("a"), json!("b")]);
        assert_eq!(ids(&ctx.entities.updated), vec![json!("b")]);
        assert_eq!(ids(&ctx.entities.unregistered), vec![json!("c"), json!(4)]);
        assert_eq!(ids(&ctx.entities.deleted), vec![json!(4)]);
    }

    #[test]
    fn test_serde_shape() {
        let ctx: Context = serde_json::from_value(json!({
            "ctx": {"x": 1},
            "templateDelimiters": {"global": "@", "local": "&"}
        }))
        .unwrap();
        assert_eq!(ctx.variables["x"], json!(1));
        assert_eq!(ctx.template_delimiters.global, '@');
    }

    #[test]
    fn test_path_segments() {
        assert!(path_segments(".").unwrap().is_empty());
        assert!(path_segments("$.").unwrap().is_empty());
        assert_eq!(path_segments("$.a.b").unwrap(), vec!["a", "b"]);
        assert_eq!(path_segments("a").unwrap(), vec!["a"]);
        assert!(path_segments("a..b").is_err());
    }

    #[test]
    fn test_assign_nested_and_push() {
        let mut root = Map::new();
        assign_path(&mut root, "a.b", json!(1), false).unwrap();
        assign_path(&mut root, "list", json!("x"), true).unwrap();
        assign_path(&mut root, "list", json!("y"), true).unwrap();
        assert_eq!(Value::Object(root.clone()), json!({"a": {"b": 1}, "list": ["x", "y"]}));

        assert!(assign_path(&mut root, "a.b", json!(2), true).is_err());
    }

    #[test]
    fn test_assign_root_merges() {
        let mut root = Map::new();
        root.insert("keep".into(), json!(true));
        assign_path(&mut root, ".", json!({"x": 1}), false).unwrap();
        assert_eq!(Value::Object(root.clone()), json!({"keep": true, "x": 1}));
        assert!(assign_path(&mut root, "$", json!(1), false).is_err());
    }

    #[test]
    fn test_deep_merge() {
        let merged = deep_merge(
            json!({"a": {"x": 1, "y": 1}, "b": 1}),
            json!({"a": {"y": 2}, "c": 3}),
        );
        assert_eq!(merged, json!({"a": {"x": 1, "y": 2}, "b": 1, "c": 3}));
        assert_eq!(deep_merge(json!({"a": 1}), json!("s")), json!("s"));
    }
}
