//! `assignResultTo` / `pushResultTo` targets shared by the process handlers.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::context::assign_path;
use crate::error::{FlowError, Result};
use crate::handler::ExecutionScope;
use crate::snapshot::ActionSnapshot;
use crate::validation::{Violations, join_path};

/// Where a handler result is written. Each field is a dotted path.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResultTarget {
    #[serde(default)]
    pub ctx: Option<String>,
    #[serde(default)]
    pub secrets: Option<String>,
    #[serde(default)]
    pub parameters: Option<String>,
}

impl ResultTarget {
    /// Check the raw option value at `path`.
    pub fn check(path: &str, value: Option<&Value>, violations: &mut Violations) {
        let Some(value) = value else {
            return;
        };
        let Some(map) = violations.object(path, value) else {
            return;
        };
        const KEYS: [&str; 3] = ["ctx", "secrets", "parameters"];
        violations.unknown_keys(path, map, &KEYS);
        if !KEYS.iter().any(|key| map.contains_key(*key)) {
            violations.push(path, "must name at least one of ctx, secrets, parameters");
        }
        for key in KEYS {
            if map.contains_key(key) {
                violations.non_empty_string(&join_path(path, key), map.get(key));
            }
        }
    }
}

/// Apply optional assign and push targets for `result`.
pub(crate) fn store_result(
    scope: &ExecutionScope<'_>,
    snapshot: &mut ActionSnapshot,
    assign: Option<&ResultTarget>,
    push: Option<&ResultTarget>,
    result: &Value,
) -> Result<()> {
    let mut context_changed = false;
    for (target, push) in [(assign, false), (push, true)] {
        let Some(target) = target else {
            continue;
        };

        {
            let mut ctx = scope.context.write();
            if let Some(path) = &target.ctx {
                write(&mut ctx.variables, path, result, push)?;
                context_changed = true;
            }
            if let Some(path) = &target.secrets {
                write(&mut ctx.secrets, path, result, push)?;
            }
        }

        if let Some(path) = &target.parameters {
            scope
                .parameters
                .with_values(|values| write(values, path, result, push))?;
        }
    }

    if context_changed {
        let view = scope.context.read().view();
        snapshot.set_context(view);
    }
    Ok(())
}

fn write(root: &mut Map<String, Value>, path: &str, value: &Value, push: bool) -> Result<()> {
    assign_path(root, path, value.clone(), push)
        .map_err(|e| FlowError::execution(format!("cannot store result at '{path}': {e}")))
}
