//! Execution snapshots.
//!
//! Every executed step produces one [`ActionSnapshot`]. Snapshots own their
//! children, so the finished root snapshot is the full execution trace of a
//! run. Entries are append-only and `successful` can only go from `true` to
//! `false`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::context::ContextView;

/// Replacement for secret values in recorded options.
pub const MASK: &str = "{MASKED}";

/// Execution record of a single step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSnapshot {
    id_or_alias: String,
    idx: usize,
    wd: PathBuf,
    #[serde(skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<i64>,
    successful: bool,
    steps: Vec<SnapshotStep>,
}

/// One timestamped entry in a snapshot log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStep {
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub entry: SnapshotEntry,
}

/// Typed snapshot log entry.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SnapshotEntry {
    /// Options as handed to the handler, secrets masked.
    Options(Value),
    /// Secret-free context copy.
    Context(ContextView),
    Child(Box<ActionSnapshot>),
    Failure(String),
    Log(String),
    /// `should_execute` returned false.
    Skipped,
    Custom(Value),
}

impl ActionSnapshot {
    /// Create a snapshot; the initial context copy becomes its first entry.
    pub fn new(
        id_or_alias: impl Into<String>,
        idx: usize,
        wd: impl Into<PathBuf>,
        metadata: Map<String, Value>,
        context: ContextView,
    ) -> Self {
        let title = crate::step::title(&metadata);
        let mut snapshot = Self {
            id_or_alias: id_or_alias.into(),
            idx,
            wd: wd.into(),
            metadata,
            title,
            created_at: Utc::now(),
            duration_ms: None,
            successful: true,
            steps: Vec::new(),
        };
        snapshot.push(SnapshotEntry::Context(context));
        snapshot
    }

    fn push(&mut self, entry: SnapshotEntry) {
        self.steps.push(SnapshotStep {
            created_at: Utc::now(),
            entry,
        });
    }

    pub fn id_or_alias(&self) -> &str {
        &self.id_or_alias
    }

    /// Position of the step among its siblings.
    pub fn idx(&self) -> usize {
        self.idx
    }

    pub fn wd(&self) -> &Path {
        &self.wd
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.duration_ms
    }

    pub fn successful(&self) -> bool {
        self.successful
    }

    pub fn steps(&self) -> &[SnapshotStep] {
        &self.steps
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.push(SnapshotEntry::Log(message.into()));
    }

    /// Record the context after a handler changed it.
    pub fn set_context(&mut self, context: ContextView) {
        self.push(SnapshotEntry::Context(context));
    }

    /// Record the options with every string equal to a secret value masked.
    pub fn set_options(&mut self, options: &Value, secrets: &Map<String, Value>) {
        let mut secret_strings = Vec::new();
        collect_strings(&Value::Object(secrets.clone()), &mut secret_strings);
        self.push(SnapshotEntry::Options(mask(options, &secret_strings)));
    }

    /// Record a placeholder instead of the options.
    pub fn set_masked_options(&mut self) {
        self.push(SnapshotEntry::Options(Value::String(MASK.to_string())));
    }

    pub fn custom(&mut self, payload: Value) {
        self.push(SnapshotEntry::Custom(payload));
    }

    /// Mark unsuccessful and record the failure.
    pub fn fail(&mut self, error: impl std::fmt::Display) {
        self.successful = false;
        self.push(SnapshotEntry::Failure(error.to_string()));
    }

    pub fn skip(&mut self) {
        self.push(SnapshotEntry::Skipped);
    }

    /// Append a child snapshot. An unsuccessful child fails this snapshot too.
    pub fn register_child(&mut self, child: ActionSnapshot) {
        if !child.successful {
            self.successful = false;
        }
        self.push(SnapshotEntry::Child(Box::new(child)));
    }

    /// Child snapshots in registration order.
    pub fn children(&self) -> impl Iterator<Item = &ActionSnapshot> {
        self.steps.iter().filter_map(|s| match &s.entry {
            SnapshotEntry::Child(child) => Some(child.as_ref()),
            _ => None,
        })
    }

    pub fn context_entries(&self) -> Vec<&ContextView> {
        self.steps
            .iter()
            .filter_map(|s| match &s.entry {
                SnapshotEntry::Context(view) => Some(view),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| match &s.entry {
                SnapshotEntry::Failure(message) => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn options(&self) -> Option<&Value> {
        self.steps.iter().find_map(|s| match &s.entry {
            SnapshotEntry::Options(options) => Some(options),
            _ => None,
        })
    }

    pub fn is_skipped(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s.entry, SnapshotEntry::Skipped))
    }

    /// Record the total duration. Called once when the step is done.
    pub fn finish(&mut self) {
        self.duration_ms = Some((Utc::now() - self.created_at).num_milliseconds());
    }
}

fn collect_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.is_empty() => out.push(s.clone()),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

fn mask(value: &Value, secrets: &[String]) -> Value {
    match value {
        Value::String(s) => {
            let mut masked = s.clone();
            for secret in secrets {
                masked = masked.replace(secret.as_str(), MASK);
            }
            Value::String(masked)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| mask(v, secrets)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), mask(v, secrets)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(id: &str) -> ActionSnapshot {
        ActionSnapshot::new(id, 0, "/tmp", Map::new(), ContextView::default())
    }

    #[test]
    fn test_new_snapshot_records_context() {
        let snap = snapshot("ctx");
        assert!(snap.successful());
        assert_eq!(snap.context_entries().len(), 1);
        assert_eq!(snap.id_or_alias(), "ctx");
    }

    #[test]
    fn test_title_from_metadata() {
        let mut metadata = Map::new();
        metadata.insert("$title".into(), json!("Deploy"));
        let snap = ActionSnapshot::new("exec", 2, "/", metadata, ContextView::default());
        assert_eq!(snap.title(), Some("Deploy"));
        assert_eq!(snap.idx(), 2);
    }

    #[test]
    fn test_failed_child_fails_parent() {
        let mut parent = snapshot("sequence");
        let ok = snapshot("a");
        let mut failed = snapshot("b");
        failed.fail("boom");

        parent.register_child(ok);
        assert!(parent.successful());
        parent.register_child(failed);
        assert!(!parent.successful());

        let ids: Vec<_> = parent.children().map(|c| c.id_or_alias()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_options_are_masked() {
        let mut snap = snapshot("exec");
        let mut secrets = Map::new();
        secrets.insert("token".into(), json!("s3cr3t"));
        snap.set_options(
            &json!({"args": ["--token=s3cr3t"], "n": 1}),
            &secrets,
        );
        assert_eq!(
            snap.options(),
            Some(&json!({"args": ["--token={MASKED}"], "n": 1}))
        );
    }

    #[test]
    fn test_serialized_shape() {
        let mut snap = snapshot("ctx");
        snap.log("hello");
        snap.skip();
        snap.finish();
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["idOrAlias"], json!("ctx"));
        assert_eq!(value["successful"], json!(true));
        assert!(value["durationMs"].is_number());
        let steps = value["steps"].as_array().unwrap();
        assert_eq!(steps[0]["type"], json!("context"));
        assert_eq!(steps[1]["type"], json!("log"));
        assert_eq!(steps[1]["payload"], json!("hello"));
        assert_eq!(steps[2]["type"], json!("skipped"));
        assert!(steps[2]["createdAt"].is_string());
        assert!(snap.is_skipped());
    }
}
