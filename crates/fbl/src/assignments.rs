//! `--context` / `--secret` assignments.
//!
//! `KEY=VALUE` where `VALUE` is parsed as YAML (falling back to a plain
//! string) and `KEY=@path` loads a YAML or JSON file. `KEY` is a dotted path;
//! `.` merges an object into the root.

use std::path::Path;

use anyhow::{Context as _, Result, bail};
use fbl_engine::context::{assign_path, deep_merge, path_segments};
use serde_json::{Map, Value};

/// One parsed `KEY=VALUE` flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub key: String,
    pub value: Value,
}

impl Assignment {
    /// Parse a flag; `@path` values are resolved relative to `base`.
    pub fn parse(raw: &str, base: &Path) -> Result<Self> {
        let Some((key, value)) = raw.split_once('=') else {
            bail!("expected KEY=VALUE, got '{raw}'");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("missing key in '{raw}'");
        }
        path_segments(key).map_err(anyhow::Error::msg)?;

        let value: Value = match value.strip_prefix('@') {
            Some(file) => {
                let path = base.join(file);
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("cannot read '{}'", path.display()))?;
                serde_yaml::from_str(&content)
                    .with_context(|| format!("cannot parse '{}'", path.display()))?
            }
            None => {
                serde_yaml::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()))
            }
        };

        Ok(Self {
            key: key.to_string(),
            value,
        })
    }

    /// Write the value into `target`.
    pub fn apply(self, target: &mut Map<String, Value>) -> Result<()> {
        if path_segments(&self.key).map_err(anyhow::Error::msg)?.is_empty() {
            if !self.value.is_object() {
                bail!("only an object can be merged into the root ('{}')", self.key);
            }
            let merged = deep_merge(Value::Object(std::mem::take(target)), self.value);
            if let Value::Object(map) = merged {
                *target = map;
            }
            return Ok(());
        }
        assign_path(target, &self.key, self.value, false)
            .map_err(|e| anyhow::anyhow!("cannot assign '{}': {e}", self.key))
    }
}

/// Parse and apply every flag in order.
pub fn apply_all(flags: &[String], base: &Path, target: &mut Map<String, Value>) -> Result<()> {
    for flag in flags {
        Assignment::parse(flag, base)?.apply(target)?;
    }
    Ok(())
}
