//! Integration tests for FlowService and the built-in handlers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use fbl_engine::{
    ActionHandler, ActionSnapshot, Context, DelegatedParameters, ExecutionScope, FlowError,
    FlowService, HandlerMetadata, HandlerRegistry, SequenceFlowHandler, SharedContext,
    TemplateEngine, ValidationError, builtin_handlers,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test handler
// ─────────────────────────────────────────────────────────────────────────────

/// Names and parameter bags seen by `record` steps, in completion order.
#[derive(Clone, Default)]
struct Journal(Arc<Mutex<Vec<(String, Map<String, Value>)>>>);

impl Journal {
    fn names(&self) -> Vec<String> {
        self.0.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    fn params(&self, name: &str) -> Map<String, Value> {
        self.0
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.clone())
            .unwrap()
    }
}

/// `record: {name, write?, delay?, invalid?, skip?, fail?}`
struct Recorder {
    metadata: HandlerMetadata,
    journal: Journal,
}

impl Recorder {
    fn new(journal: Journal) -> Self {
        Self {
            metadata: HandlerMetadata::new("test.record").with_aliases(["record"]),
            journal,
        }
    }
}

fn flag(options: &Value, key: &str) -> bool {
    options.get(key).and_then(Value::as_bool) == Some(true)
}

#[async_trait]
impl ActionHandler for Recorder {
    fn metadata(&self) -> &HandlerMetadata {
        &self.metadata
    }

    fn validate(
        &self,
        options: &Value,
        _context: &Context,
        _snapshot: &ActionSnapshot,
    ) -> Result<(), ValidationError> {
        if flag(options, "invalid") {
            return Err(ValidationError::new("invalid requested"));
        }
        Ok(())
    }

    async fn should_execute(
        &self,
        options: &Value,
        _context: &SharedContext,
        _snapshot: &ActionSnapshot,
    ) -> fbl_engine::Result<bool> {
        Ok(!flag(options, "skip"))
    }

    async fn execute(
        &self,
        options: &Value,
        scope: &ExecutionScope<'_>,
        _snapshot: &mut ActionSnapshot,
    ) -> fbl_engine::Result<()> {
        if let Some(ms) = options.get("delay").and_then(Value::as_u64) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        let name = options["name"].as_str().unwrap_or("?").to_string();
        self.journal.0.lock().push((name, scope.parameters.snapshot()));

        if let Some(Value::Object(writes)) = options.get("write") {
            for (key, value) in writes {
                scope.parameters.set(key.clone(), value.clone());
            }
        }
        if flag(options, "fail") {
            return Err(FlowError::execution("recorded failure"));
        }
        Ok(())
    }
}

fn service(journal: &Journal) -> FlowService {
    let mut registry = HandlerRegistry::new();
    for handler in builtin_handlers() {
        registry.register_arc(handler);
    }
    registry.register(Recorder::new(journal.clone()));
    FlowService::new(registry, TemplateEngine::new())
}

async fn run(flow: &FlowService, wd: &Path, step: Value, context: &SharedContext) -> ActionSnapshot {
    flow.execute_action(wd, &step, context, &DelegatedParameters::new(), 0)
        .await
        .unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolution
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_aliases_resolve_to_same_handler() {
    let journal = Journal::default();
    let flow = service(&journal);
    for key in ["fbl.context.values", "context.values", "context", "ctx"] {
        let context = Context::new().into_shared();
        let snap = run(&flow, Path::new("."), json!({ key: {"a": {"inline": key}} }), &context).await;
        assert!(snap.successful(), "{key} failed: {:?}", snap.failures());
        assert_eq!(context.read().variables["a"], json!(key));
    }
}

#[tokio::test]
async fn test_unknown_handler_at_root_is_error() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let err = flow
        .execute_action(
            Path::new("."),
            &json!({"nope": {}}),
            &context,
            &DelegatedParameters::new(),
            0,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::HandlerNotFound(ref id) if id == "nope"));
}

#[tokio::test]
async fn test_unknown_handler_below_root_is_recorded() {
    let journal = Journal::default();
    let flow = service(&journal);
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"--": [{"record": {"name": "a"}}, {"nope": {}}, {"record": {"name": "c"}}]}),
        &context,
    )
    .await;

    assert!(!snap.successful());
    assert_eq!(snap.children().count(), 1);
    assert!(snap.failures()[0].contains("Handler not found: nope"));
    assert_eq!(journal.names(), vec!["a"]);
}

#[tokio::test]
async fn test_structural_error_in_child() {
    let journal = Journal::default();
    let flow = service(&journal);
    let context = Context::new().into_shared();
    let err = flow
        .execute_action(
            Path::new("."),
            &json!({"--": [
                {"ctx": {"a": {"inline": 1}}},
                {"ctx": {}, "exec": {"command": "true"}}
            ]}),
            &context,
            &DelegatedParameters::new(),
            0,
        )
        .await
        .unwrap_err();

    assert!(err.is_structural());
    assert!(err.to_string().contains("exactly one action key"));
    assert!(context.read().variables.is_empty());
}

#[tokio::test]
async fn test_step_without_action_key_in_parallel_aborts() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let err = flow
        .execute_action(
            Path::new("."),
            &json!({"||": [{"$title": "x"}, {"ctx": {"b": {"inline": 2}}}]}),
            &context,
            &DelegatedParameters::new(),
            0,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, FlowError::Structural(ref m) if m.contains("no action key")));
    assert!(context.read().variables.get("b").is_none());
}

#[tokio::test]
async fn test_deeply_nested_malformed_step_runs_nothing() {
    let journal = Journal::default();
    let flow = service(&journal);
    let context = Context::new().into_shared();
    let result = flow
        .execute_action(
            Path::new("."),
            &json!({"--": [
                {"record": {"name": "a"}},
                {"||": [
                    {"record": {"name": "b"}},
                    {"--": [{"record": {"name": "c"}}, "not a step"]}
                ]}
            ]}),
            &context,
            &DelegatedParameters::new(),
            0,
        )
        .await;

    assert!(matches!(result, Err(FlowError::Structural(ref m)) if m.contains("must be an object")));
    assert!(journal.names().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Sequence
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_sequence_stops_at_invalid_step() {
    let journal = Journal::default();
    let flow = service(&journal);
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"sequence": [
            {"record": {"name": "a"}},
            {"record": {"name": "b", "invalid": true}},
            {"record": {"name": "c"}},
            {"record": {"name": "d"}}
        ]}),
        &context,
    )
    .await;

    assert!(!snap.successful());
    let children: Vec<_> = snap.children().collect();
    assert_eq!(children.len(), 2);
    assert!(children[0].successful());
    assert!(!children[1].successful());
    assert!(children[1].failures()[0].contains("invalid requested"));
    assert_eq!(journal.names(), vec!["a"]);
}

#[tokio::test]
async fn test_sequence_stops_at_failed_execution() {
    let journal = Journal::default();
    let flow = service(&journal);
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"--": [
            {"record": {"name": "a"}},
            {"record": {"name": "b", "fail": true}},
            {"record": {"name": "c"}}
        ]}),
        &context,
    )
    .await;

    assert!(!snap.successful());
    assert_eq!(snap.children().count(), 2);
    assert_eq!(journal.names(), vec!["a", "b"]);
}

#[tokio::test]
async fn test_forked_parameters_are_isolated() {
    let journal = Journal::default();
    let flow = service(&journal);
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"--": [
            {"record": {"name": "a", "write": {"x": 1}}},
            {"record": {"name": "b"}}
        ]}),
        &context,
    )
    .await;

    assert!(snap.successful());
    assert_eq!(journal.params("a").get("index"), Some(&json!(0)));
    let b = journal.params("b");
    assert_eq!(b.get("index"), Some(&json!(1)));
    assert!(b.get("x").is_none());
}

#[tokio::test]
async fn test_shared_parameters_are_visible() {
    let journal = Journal::default();
    let flow = service(&journal);
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"--": {
            "shareParameters": true,
            "actions": [
                {"record": {"name": "a", "write": {"x": 1}}},
                {"record": {"name": "b"}}
            ]
        }}),
        &context,
    )
    .await;

    assert!(snap.successful());
    let b = journal.params("b");
    assert_eq!(b.get("index"), Some(&json!(1)));
    assert_eq!(b.get("x"), Some(&json!(1)));
}

#[tokio::test]
async fn test_sequence_validation() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"--": {"actions": "nope", "other": 1}}),
        &context,
    )
    .await;
    assert!(!snap.successful());
    assert_eq!(snap.children().count(), 0);
    assert!(snap.failures()[0].contains("actions"));
}

#[tokio::test]
async fn test_flow_options_reject_malformed_children() {
    let context = Context::new();
    let snapshot = ActionSnapshot::new("--", 0, "/", Map::new(), Default::default());
    let handler = SequenceFlowHandler::new();

    let err = handler
        .validate(
            &json!([{"$title": "x"}, {"ctx": {}, "exec": {}}, {"ctx": {}}]),
            &context,
            &snapshot,
        )
        .unwrap_err();
    let violations = err.violations();
    assert_eq!(violations.len(), 2);
    assert!(violations[0].contains("actions[0]"));
    assert!(violations[1].contains("actions[1]"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Parallel
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_parallel_runs_everything_and_registers_in_start_order() {
    let journal = Journal::default();
    let flow = service(&journal);
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"||": [
            {"record": {"name": "a", "delay": 60}},
            {"record": {"name": "b", "delay": 30, "fail": true}},
            {"record": {"name": "c"}}
        ]}),
        &context,
    )
    .await;

    assert!(!snap.successful());
    assert_eq!(journal.names(), vec!["c", "b", "a"]);

    let children: Vec<_> = snap.children().collect();
    assert_eq!(children.len(), 3);
    assert_eq!(
        children.iter().map(|c| c.idx()).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    assert!(children[0].successful());
    assert!(!children[1].successful());
    assert!(children[2].successful());
}

#[tokio::test]
async fn test_parallel_all_successful() {
    let journal = Journal::default();
    let flow = service(&journal);
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"parallel": {"actions": [
            {"record": {"name": "a"}},
            {"record": {"name": "b"}}
        ]}}),
        &context,
    )
    .await;
    assert!(snap.successful());
    assert_eq!(snap.children().count(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Templates
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_two_pass_templating() {
    let flow = service(&Journal::default());
    let context = Context::new().with_delimiters('@', '&').into_shared();
    let parameters = DelegatedParameters::new();

    let text = r#"
pipeline:
  '--':
    <@#each (range 1 3)@>
    - ctx:
        test_<@this@>:
          inline: <@this@>
    <@/each@>
    - ctx:
        local:
          inline: <& ctx.test_1 &>
"#;

    let document = flow
        .render_document(Path::new("."), text, &context, &parameters)
        .unwrap();
    let snap = flow
        .execute_flow(Path::new("."), &document, &context, &parameters)
        .await
        .unwrap();

    assert!(snap.successful(), "{:?}", snap.failures());
    let children: Vec<_> = snap.children().collect();
    assert_eq!(children.len(), 3);

    let last = children[2].context_entries();
    assert_eq!(last.len(), 2);
    assert_eq!(
        Value::Object(last[0].ctx.clone()),
        json!({"test_1": 1, "test_2": 2})
    );
    assert_eq!(
        Value::Object(last[1].ctx.clone()),
        json!({"test_1": 1, "test_2": 2, "local": 1})
    );
}

#[tokio::test]
async fn test_local_pass_sees_parameters_and_metadata_is_rendered() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"--": [
            {"$title": "step <% parameters.index %>", "ctx": {"first": {"inline": "<% parameters.index %>"}}},
            {"ctx": {"second": {"inline": "<% parameters.index %>"}}}
        ]}),
        &context,
    )
    .await;

    assert!(snap.successful());
    assert_eq!(snap.children().next().unwrap().title(), Some("step 0"));
    let ctx = context.read();
    assert_eq!(ctx.variables["first"], json!(0));
    assert_eq!(ctx.variables["second"], json!(1));
}

#[tokio::test]
async fn test_single_tag_values_keep_their_type() {
    let flow = service(&Journal::default());
    let mut ctx = Context::new();
    ctx.variables.insert("version".into(), json!("1.10"));
    ctx.variables.insert("pair".into(), json!("key: value"));
    ctx.variables.insert("dir".into(), json!("work"));
    ctx.variables.insert("count".into(), json!(3));
    let context = ctx.into_shared();

    let snap = run(
        &flow,
        Path::new("."),
        json!({"ctx": {
            "copy": {"inline": {
                "version": "<% ctx.version %>",
                "pair": "<% ctx.pair %>",
                "count": "<% ctx.count %>",
                "text": "<%- ctx.count %>",
                "path": "C:\\<% ctx.dir %>"
            }}
        }}),
        &context,
    )
    .await;

    assert!(snap.successful(), "{:?}", snap.failures());
    assert_eq!(
        context.read().variables["copy"],
        json!({
            "version": "1.10",
            "pair": "key: value",
            "count": 3,
            "text": "3",
            "path": "C:\\work"
        })
    );
}

#[tokio::test]
async fn test_global_pass_keeps_backslash_before_tag() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let mut overrides = Map::new();
    overrides.insert("dir".into(), json!("work"));
    let parameters = DelegatedParameters::new().fork(overrides);

    let text = r#"
pipeline:
  ctx:
    path:
      inline: 'C:\<$ parameters.dir $>'
"#;
    let document = flow
        .render_document(Path::new("."), text, &context, &parameters)
        .unwrap();
    let snap = flow
        .execute_flow(Path::new("."), &document, &context, &parameters)
        .await
        .unwrap();

    assert!(snap.successful(), "{:?}", snap.failures());
    assert_eq!(context.read().variables["path"], json!("C:\\work"));
}

#[tokio::test]
async fn test_skip_template_processing_metadata() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"$skipTemplateProcessing": true, "ctx": {"raw": {"inline": "<% ctx.x %>"}}}),
        &context,
    )
    .await;
    assert!(snap.successful());
    assert_eq!(context.read().variables["raw"], json!("<% ctx.x %>"));
}

#[tokio::test]
async fn test_malformed_template_fails_step() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"ctx": {"a": {"inline": "<%#if ctx.x %>unclosed"}}}),
        &context,
    )
    .await;
    assert!(!snap.successful());
    assert!(snap.failures()[0].contains("Template error"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Context handlers
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_inline_wins_by_default_files_win_with_priority() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("file.yml"), "content: file\n").unwrap();
    let flow = service(&Journal::default());

    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        dir.path(),
        json!({"ctx": {".": {"inline": {"content": "inline"}, "files": ["file.yml"]}}}),
        &context,
    )
    .await;
    assert!(snap.successful(), "{:?}", snap.failures());
    assert_eq!(context.read().variables["content"], json!("inline"));

    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        dir.path(),
        json!({"ctx": {".": {
            "inline": {"content": "inline"},
            "files": ["file.yml"],
            "priority": "files"
        }}}),
        &context,
    )
    .await;
    assert!(snap.successful());
    assert_eq!(context.read().variables["content"], json!("file"));
}

#[tokio::test]
async fn test_missing_file_fails_step() {
    let dir = tempfile::tempdir().unwrap();
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        dir.path(),
        json!({"ctx": {"a": {"files": ["missing.yml"]}}}),
        &context,
    )
    .await;
    assert!(!snap.successful());
    assert!(context.read().variables.is_empty());
}

#[tokio::test]
async fn test_secrets_stay_out_of_snapshots() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"--": [
            {"secrets": {"token": {"inline": "s3cr3t"}}},
            {"ctx": {"header": {"inline": "Bearer <% secrets.token %>"}}}
        ]}),
        &context,
    )
    .await;

    assert!(snap.successful());
    assert_eq!(context.read().secrets["token"], json!("s3cr3t"));
    let children: Vec<_> = snap.children().collect();
    assert_eq!(children[0].options(), Some(&json!("{MASKED}")));
    assert_eq!(
        children[1].options(),
        Some(&json!({"header": {"inline": "Bearer {MASKED}"}}))
    );
    for child in children {
        for view in child.context_entries() {
            assert!(!serde_json::to_string(view).unwrap().contains("token"));
        }
    }
}

#[tokio::test]
async fn test_entity_handlers() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"--": [
            {"ctx.entities.registered": [{"type": "svc", "id": "a"}]},
            {"context.entities.updated": [{"type": "svc", "id": "b"}]},
            {"fbl.context.entities.deleted": [{"type": "svc", "id": 3, "payload": {"x": 1}}]}
        ]}),
        &context,
    )
    .await;

    assert!(snap.successful(), "{:?}", snap.failures());
    let ctx = context.read();
    assert_eq!(ctx.entities.registered.len(), 2);
    assert_eq!(ctx.entities.updated.len(), 1);
    assert_eq!(ctx.entities.deleted.len(), 1);
    assert_eq!(ctx.entities.unregistered.len(), 1);
    assert_eq!(ctx.entities.deleted[0].payload, Some(json!({"x": 1})));
}

#[tokio::test]
async fn test_skipped_step() {
    let journal = Journal::default();
    let flow = service(&journal);
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"record": {"name": "a", "skip": true}}),
        &context,
    )
    .await;
    assert!(snap.successful());
    assert!(snap.is_skipped());
    assert!(journal.names().is_empty());
}

#[tokio::test]
async fn test_temp_file_write() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"tmp.->": {"context": "files.out", "content": "hello"}}),
        &context,
    )
    .await;
    assert!(snap.successful(), "{:?}", snap.failures());

    let path = context.read().variables["files"]["out"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
    std::fs::remove_file(path).unwrap();
}

#[tokio::test]
async fn test_temp_file_aliases() {
    let flow = service(&Journal::default());
    let handler = flow.registry().resolve("fbl.fs.temp.file.write").unwrap();
    for alias in ["fs.temp.file.write", "temp.file.write", "tmp.->"] {
        let resolved = flow.registry().resolve(alias).unwrap();
        assert_eq!(resolved.metadata().id, handler.metadata().id, "{alias}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Processes
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(unix)]
#[tokio::test]
async fn test_exec_assigns_result() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"exec": {
            "command": "sh",
            "args": ["-c", "echo hi"],
            "options": {"stdout": true},
            "assignResultTo": {"ctx": "out"},
            "pushResultTo": {"parameters": "runs"}
        }}),
        &context,
    )
    .await;
    assert!(snap.successful(), "{:?}", snap.failures());
    assert_eq!(
        context.read().variables["out"],
        json!({"code": 0, "stdout": "hi\n"})
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_exec_non_zero_exit_fails_after_storing() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    let snap = run(
        &flow,
        Path::new("."),
        json!({"exec": {
            "command": "sh",
            "args": ["-c", "exit 3"],
            "assignResultTo": {"ctx": "out"}
        }}),
        &context,
    )
    .await;
    assert!(!snap.successful());
    assert!(snap.failures()[0].contains("exited with code 3"));
    assert_eq!(context.read().variables["out"]["code"], json!(3));
}

#[cfg(unix)]
#[tokio::test]
async fn test_shell_runs_script() {
    let flow = service(&Journal::default());
    let context = Context::new().into_shared();
    context
        .write()
        .variables
        .insert("n".into(), json!(2));
    let snap = run(
        &flow,
        Path::new("."),
        json!({"shell": {
            "executable": "sh",
            "script": "echo $((<% ctx.n %> + 1))",
            "options": {"stdout": true},
            "pushResultTo": {"ctx": "outputs"}
        }}),
        &context,
    )
    .await;
    assert!(snap.successful(), "{:?}", snap.failures());
    assert_eq!(
        context.read().variables["outputs"],
        json!([{"code": 0, "stdout": "3\n"}])
    );
}
