//! npm-style version ranges on top of `semver`.
//!
//! Requirement ranges follow the npm grammar that plugin authors already know:
//! space-separated comparators (`>=1.0.0 <2.0.0`), caret and tilde ranges,
//! `x`/`*` wildcards, hyphen ranges (`1.0.0 - 1.5.0`) and `||` alternatives.
//! Each alternative is rewritten into a [`semver::VersionReq`].

use std::fmt;
use std::str::FromStr;

use semver::{Version, VersionReq};

/// A parsed requirement range such as `^1.2.0 || >=3`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    source: String,
    alternatives: Vec<VersionReq>,
}

impl VersionRange {
    pub fn parse(range: &str) -> Result<Self, semver::Error> {
        let alternatives = range
            .split("||")
            .map(|alternative| VersionReq::parse(&to_semver_req(alternative)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            source: range.trim().to_string(),
            alternatives,
        })
    }

    /// True when any alternative accepts `version`.
    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for VersionRange {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse a version leniently: a leading `v` is dropped and missing minor or
/// patch components default to zero (`1.2` is `1.2.0`).
pub fn parse_version(version: &str) -> Result<Version, semver::Error> {
    let trimmed = version.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    if let Ok(parsed) = Version::parse(trimmed) {
        return Ok(parsed);
    }

    let (core, rest) = match trimmed.find(['-', '+']) {
        Some(pos) => trimmed.split_at(pos),
        None => (trimmed, ""),
    };
    let mut parts: Vec<&str> = core.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    Version::parse(&format!("{}{rest}", parts.join(".")))
}

fn to_semver_req(alternative: &str) -> String {
    let alternative = alternative.trim();
    if alternative.is_empty() || matches!(alternative, "*" | "x" | "X") {
        return "*".to_string();
    }

    if let Some((low, high)) = alternative.split_once(" - ") {
        return format!(
            ">={}, <={}",
            strip_v(low.trim()),
            strip_v(high.trim())
        );
    }

    let mut comparators = Vec::new();
    let mut pending_op: Option<&str> = None;
    for token in alternative.split_whitespace() {
        if token.chars().all(is_operator_char) {
            pending_op = Some(token);
            continue;
        }
        let token = match pending_op.take() {
            Some(op) => format!("{op}{token}"),
            None => token.to_string(),
        };
        comparators.push(normalize_comparator(&token));
    }
    if let Some(op) = pending_op {
        comparators.push(op.to_string());
    }
    comparators.join(", ")
}

fn normalize_comparator(token: &str) -> String {
    let split = token
        .find(|c: char| !is_operator_char(c))
        .unwrap_or(token.len());
    let (op, version) = token.split_at(split);
    let version = strip_v(version);

    let has_wildcard = version
        .split('.')
        .any(|part| matches!(part, "*" | "x" | "X"));
    if op.is_empty() && !has_wildcard && version.starts_with(|c: char| c.is_ascii_digit()) {
        // npm treats a bare version as exact, semver as caret.
        format!("={version}")
    } else {
        format!("{op}{version}")
    }
}

fn strip_v(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

fn is_operator_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '^' | '~')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accepts(range: &str, version: &str) -> bool {
        VersionRange::parse(range)
            .unwrap()
            .matches(&Version::parse(version).unwrap())
    }

    #[test]
    fn test_comparator_set() {
        assert!(accepts(">=1.0.0 <2.0.0", "1.5.0"));
        assert!(!accepts(">=1.0.0 <2.0.0", "2.0.0"));
        assert!(accepts(">= 1.0.0", "1.0.0"));
    }

    #[test]
    fn test_caret_and_tilde() {
        assert!(accepts("^1.2", "1.9.0"));
        assert!(!accepts("^1.2", "2.0.0"));
        assert!(accepts("~1.2.3", "1.2.9"));
        assert!(!accepts("~1.2.3", "1.3.0"));
    }

    #[test]
    fn test_wildcards() {
        assert!(accepts("1.x", "1.7.3"));
        assert!(!accepts("1.x", "2.0.0"));
        assert!(accepts("*", "0.0.1"));
        assert!(accepts("", "9.9.9"));
    }

    #[test]
    fn test_bare_version_is_exact() {
        assert!(accepts("1.2.3", "1.2.3"));
        assert!(!accepts("1.2.3", "1.2.4"));
        assert!(accepts("v1.2.3", "1.2.3"));
    }

    #[test]
    fn test_alternatives_and_hyphen() {
        assert!(accepts("<1.0.0 || >=2.0.0", "2.1.0"));
        assert!(!accepts("<1.0.0 || >=2.0.0", "1.1.0"));
        assert!(accepts("1.0.0 - 1.5.0", "1.5.0"));
        assert!(!accepts("1.0.0 - 1.5.0", "1.5.1"));
    }

    #[test]
    fn test_invalid_range() {
        assert!(VersionRange::parse("not a range").is_err());
        assert!(VersionRange::parse(">=1.0.0 <<2").is_err());
    }

    #[test]
    fn test_parse_version_lenient() {
        assert_eq!(parse_version("v1.2").unwrap(), Version::new(1, 2, 0));
        assert_eq!(parse_version("3").unwrap(), Version::new(3, 0, 0));
        assert_eq!(
            parse_version("1.0.0-beta.1").unwrap().pre.as_str(),
            "beta.1"
        );
        assert!(parse_version("one").is_err());
    }

    #[test]
    fn test_display_keeps_source() {
        let range: VersionRange = " ^1.0.0 ".parse().unwrap();
        assert_eq!(range.to_string(), "^1.0.0");
    }
}
