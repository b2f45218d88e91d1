//! Template resolution.
//!
//! Two passes share one [`TemplateEngine`] but use different delimiters:
//!
//! - the **global** pass renders the raw flow document text before it is
//!   parsed (default tags `<$ ... $>`), so steps can be generated;
//! - the **local** pass renders a single step's options right before the
//!   handler sees them (default tags `<% ... %>`).
//!
//! A delimiter `d` defines the tag pair `<d` / `d>`. Tag bodies are
//! handlebars expressions, block openers/closers or comments:
//!
//! ```yaml
//! pipeline:
//!   '--':
//!     <@#each (range 1 3)@>
//!     - ctx:
//!         test_<@this@>:
//!           inline: <@this@>
//!     <@/each@>
//! ```
//!
//! Template data exposes `ctx`, `secrets`, `entities`, `parameters`, `env`
//! and `cwd`.
//!
//! When an option value is exactly one tag, the result keeps its type:
//! a plain reference such as `<% ctx.count %>` yields the referenced value
//! and a helper call is re-parsed as YAML. `<%- ... %>` always yields text.
//! Literal `{{` and backslashes in front of a tag are kept as written.

use std::path::Path;

use handlebars::{Handlebars, handlebars_helper};
use serde_json::{Map, Value};

use crate::context::Context;
use crate::error::{FlowError, Result};

/// Contributes helpers to the template engine.
pub trait TemplateUtility: Send + Sync {
    fn name(&self) -> &str;

    fn register(&self, handlebars: &mut Handlebars<'static>);
}

handlebars_helper!(range_helper: |start: i64, end: i64| (start..end).collect::<Vec<i64>>());
handlebars_helper!(json_helper: |value: Json| serde_json::to_string(value).unwrap_or_default());
handlebars_helper!(default_helper: |value: Json, fallback: Json| {
    if value.is_null() || value.as_str() == Some("") {
        fallback.clone()
    } else {
        value.clone()
    }
});

handlebars_helper!(literal_helper: |text: str| text.to_string());

/// Helper that echoes its string argument; carries literal `{{` through.
const LITERAL_HELPER: &str = "fbl-literal";

/// Built-in helpers: `range`, `json`, `default`.
#[derive(Debug, Default)]
pub struct CoreHelpers;

impl TemplateUtility for CoreHelpers {
    fn name(&self) -> &str {
        "core"
    }

    fn register(&self, handlebars: &mut Handlebars<'static>) {
        handlebars.register_helper("range", Box::new(range_helper));
        handlebars.register_helper("json", Box::new(json_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper(LITERAL_HELPER, Box::new(literal_helper));
    }
}

/// Renders templated text and option values.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// Engine with HTML escaping disabled and the core helpers registered.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(false);
        CoreHelpers.register(&mut handlebars);
        Self { handlebars }
    }

    pub fn register_utility(&mut self, utility: &dyn TemplateUtility) {
        tracing::debug!(utility = utility.name(), "registering template utility");
        utility.register(&mut self.handlebars);
    }

    /// Render `source`, treating `<d ... d>` as template tags.
    pub fn render_text(&self, source: &str, delimiter: char, data: &Value) -> Result<String> {
        let template = to_handlebars(source, delimiter);
        self.handlebars
            .render_template(&template, data)
            .map_err(|e| FlowError::template(excerpt(source), e.to_string()))
    }

    /// Render every string key and value inside `value`.
    ///
    /// A string made of exactly one tag keeps the type of its result, so
    /// `"<% ctx.count %>"` yields a number rather than a string.
    pub fn render_value(&self, value: &Value, delimiter: char, data: &Value) -> Result<Value> {
        match value {
            Value::String(s) => self.render_string(s, delimiter, data),
            Value::Array(items) => items
                .iter()
                .map(|v| self.render_value(v, delimiter, data))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut rendered = Map::new();
                for (key, v) in map {
                    let key = if has_tag(key, delimiter) {
                        self.render_text(key, delimiter, data)?
                    } else {
                        key.clone()
                    };
                    rendered.insert(key, self.render_value(v, delimiter, data)?);
                }
                Ok(Value::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    fn render_string(&self, source: &str, delimiter: char, data: &Value) -> Result<Value> {
        if !has_tag(source, delimiter) {
            return Ok(Value::String(source.to_string()));
        }

        let Some(body) = single_tag_body(source, delimiter) else {
            return self.render_text(source, delimiter, data).map(Value::String);
        };
        if body.starts_with(RAW_MARKER) {
            return self.render_text(source, delimiter, data).map(Value::String);
        }
        if let Some(path) = plain_reference(body, data) {
            return Ok(match lookup(data, &path) {
                None | Some(Value::Null) => Value::String(String::new()),
                Some(value) => value.clone(),
            });
        }

        let rendered = self.render_text(source, delimiter, data)?;
        if !rendered.trim().is_empty()
            && let Ok(parsed) = serde_yaml::from_str::<Value>(&rendered)
        {
            return Ok(parsed);
        }
        Ok(Value::String(rendered))
    }
}

/// Evaluation data for both passes.
pub fn template_data(context: &Context, parameters: &Map<String, Value>, wd: &Path) -> Value {
    let env: Map<String, Value> = std::env::vars()
        .map(|(k, v)| (k, Value::String(v)))
        .collect();

    let mut data = Map::new();
    data.insert("ctx".into(), Value::Object(context.variables.clone()));
    data.insert("secrets".into(), Value::Object(context.secrets.clone()));
    data.insert(
        "entities".into(),
        serde_json::to_value(&context.entities).unwrap_or_default(),
    );
    data.insert("parameters".into(), Value::Object(parameters.clone()));
    data.insert("env".into(), Value::Object(env));
    data.insert("cwd".into(), Value::String(wd.display().to_string()));
    Value::Object(data)
}

fn has_tag(source: &str, delimiter: char) -> bool {
    source.contains(&format!("<{delimiter}"))
}

/// Marks a tag whose output always stays text, as in `<%- ctx.version %>`.
const RAW_MARKER: char = '-';

/// Body of `source` when it is exactly one tag, surrounding whitespace aside.
fn single_tag_body(source: &str, delimiter: char) -> Option<&str> {
    let open = format!("<{delimiter}");
    let close = format!("{delimiter}>");
    let body = source
        .trim()
        .strip_prefix(open.as_str())?
        .strip_suffix(close.as_str())?;
    (!body.contains(&open) && !body.contains(&close)).then_some(body)
}

/// Split a bare data path such as `ctx.items.[0]` into segments.
///
/// Returns `None` for helper calls, block tags and paths that handlebars
/// resolves against a scope (`this`, `../`, `@root`). The first segment
/// must name a root of `data`.
fn plain_reference(body: &str, data: &Value) -> Option<Vec<String>> {
    let body = body.trim();
    if body.is_empty() || body.contains(char::is_whitespace) {
        return None;
    }
    let mut segments = Vec::new();
    for raw in body.split(['.', '/']) {
        let segment = match raw.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
            Some(inner) if !inner.is_empty() => inner,
            _ => raw,
        };
        let plain = segment
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '$'));
        if !plain || segment.is_empty() || segment == "this" {
            return None;
        }
        segments.push(segment.to_string());
    }
    // a bare word that is not a data root may be a helper call
    data.get(&segments[0])?;
    Some(segments)
}

fn lookup<'a>(data: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter().try_fold(data, |value, segment| match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => items.get(segment.parse::<usize>().ok()?),
        _ => None,
    })
}

/// Translate `<d`/`d>` tags to handlebars braces.
///
/// Text outside tags must come out unchanged. Handlebars treats `\{{` as a
/// literal opener, eats one backslash of any longer run in front of `{{` and
/// reads `{{{` as a triple-stash. So a backslash run before an emitted `{{`
/// gets one extra backslash, while literal `{{` and a `{` right before a tag
/// go through the literal helper.
fn to_handlebars(source: &str, delimiter: char) -> String {
    let open = format!("<{delimiter}");
    let close = format!("{delimiter}>");
    let mut out = String::with_capacity(source.len() + 16);
    let mut rest = source;
    let mut in_tag = false;

    while let Some(ch) = rest.chars().next() {
        if in_tag {
            if let Some(tail) = rest.strip_prefix(close.as_str()) {
                out.push_str("}}");
                rest = tail;
                in_tag = false;
                continue;
            }
        } else if let Some(tail) = rest.strip_prefix(open.as_str()) {
            guard_opener(&mut out);
            out.push_str("{{");
            rest = tail.strip_prefix(RAW_MARKER).unwrap_or(tail);
            in_tag = true;
            continue;
        } else if let Some(tail) = rest.strip_prefix("{{") {
            guard_opener(&mut out);
            out.push_str(&literal("{{"));
            rest = tail;
            continue;
        }
        out.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    out
}

/// Keep the text already in `out` literal once a `{{` follows it.
fn guard_opener(out: &mut String) {
    let brace = out.ends_with('{');
    if brace {
        out.pop();
    }
    if out.ends_with('\\') {
        out.push('\\');
    }
    if brace {
        out.push_str(&literal("{"));
    }
}

fn literal(text: &str) -> String {
    format!("{{{{{LITERAL_HELPER} \"{text}\"}}}}")
}

fn excerpt(source: &str) -> String {
    const MAX: usize = 120;
    match source.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &source[..idx]),
        None => source.to_string(),
    }
}
