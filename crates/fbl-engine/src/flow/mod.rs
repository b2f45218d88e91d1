//! Control-flow handlers.
//!
//! Both handlers accept either a plain list of steps or
//! `{actions: [...], shareParameters: bool}` and opt out of the per-step
//! template pass so every child renders its own options when it runs.

mod parallel;
mod sequence;

pub use parallel::ParallelFlowHandler;
pub use sequence::SequenceFlowHandler;

use serde_json::{Map, Value};

use crate::step::ParsedStep;
use crate::validation::{ValidationError, Violations};

/// Children and sharing mode of a control-flow step.
pub(crate) struct FlowOptions<'a> {
    pub actions: &'a [Value],
    pub share_parameters: bool,
}

impl<'a> FlowOptions<'a> {
    pub fn parse(options: &'a Value) -> Option<Self> {
        match options {
            Value::Array(actions) => Some(Self {
                actions,
                share_parameters: false,
            }),
            Value::Object(map) => Some(Self {
                actions: map.get("actions")?.as_array()?,
                share_parameters: map
                    .get("shareParameters")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            _ => None,
        }
    }

    pub fn validate(options: &Value) -> Result<(), ValidationError> {
        let mut violations = Violations::new();
        let actions = match options {
            Value::Object(map) => {
                violations.unknown_keys("", map, &["actions", "shareParameters"]);
                if let Some(share) = map.get("shareParameters")
                    && !share.is_boolean()
                {
                    violations.push("shareParameters", "must be a boolean");
                }
                match map.get("actions") {
                    Some(actions) => violations.array("actions", actions),
                    None => {
                        violations.push("actions", "is required");
                        None
                    }
                }
            }
            other => violations.array("", other),
        };

        for (i, action) in actions.into_iter().flatten().enumerate() {
            if let Err(e) = ParsedStep::decode(action) {
                violations.push(&format!("actions[{i}]"), e);
            }
        }
        violations.finish()
    }
}

/// Child steps, or none when the options are malformed.
pub(crate) fn child_steps(options: &Value) -> Vec<&Value> {
    FlowOptions::parse(options)
        .map(|flow| flow.actions.iter().collect())
        .unwrap_or_default()
}

/// Parameter overrides injected into each child.
pub(crate) fn child_overrides(index: usize) -> Map<String, Value> {
    let mut overrides = Map::new();
    overrides.insert("index".into(), Value::from(index));
    overrides
}
