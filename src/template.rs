//! Placeholder resolution for link requests.
//!
//! Two placeholder forms are understood:
//! - `{{chain.<key>.<path>}}` reads from a stored response, where `<key>` is a
//!   link's `storeAs` (or its request id) and `<path>` walks the response
//!   object `{status, headers, body, durationMs, executedAt}`.
//! - `{{<name>}}` or `{{<name>.<path>}}` reads a variable. Values extracted
//!   during this run shadow chain-level variables.
//!
//! A placeholder that makes up an entire JSON string value is replaced by the
//! referenced value with its native type; placeholders embedded in a larger
//! string are interpolated as text.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex_lite::Regex;
use serde_json::Value;

use crate::error::{Error, Result};

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER_REGEX: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER_REGEX.get_or_init(|| Regex::new(r"\{\{\s*([^{}]+?)\s*\}\}").expect("valid regex"))
}

/// One step of a path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object key, or array index when written as a bare number (`items.0`)
    Field(String),
    /// Explicit array index (`items[0]` or `items.[0]`)
    Index(usize),
}

/// Parse a dotted path expression such as `body.items[0].id`.
pub fn parse_path(path: &str) -> std::result::Result<Vec<PathSegment>, String> {
    let mut segments = Vec::new();

    for part in path.split('.') {
        if part.is_empty() {
            return Err(format!("empty segment in path '{}'", path));
        }

        let (name, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !name.is_empty() {
            segments.push(PathSegment::Field(name.to_string()));
        }

        while !rest.is_empty() {
            let close = rest
                .find(']')
                .ok_or_else(|| format!("unclosed '[' in path '{}'", path))?;
            if !rest.starts_with('[') {
                return Err(format!("unexpected '{}' in path '{}'", rest, path));
            }
            let index = rest[1..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid index '{}' in path '{}'", &rest[1..close], path))?;
            segments.push(PathSegment::Index(index));
            rest = &rest[close + 1..];
        }
    }

    Ok(segments)
}

/// Walk `root` along `path`, failing with a descriptive reason on a missing
/// key, an out-of-range index, or a shape mismatch.
pub fn evaluate_path<'a>(root: &'a Value, path: &str) -> std::result::Result<&'a Value, String> {
    let segments = parse_path(path)?;
    let mut current = root;
    let mut walked = String::new();

    for segment in &segments {
        current = match (segment, current) {
            (PathSegment::Field(key), Value::Object(map)) => map
                .get(key)
                .ok_or_else(|| format!("field '{}' not found{}", key, location(&walked)))?,
            (PathSegment::Field(key), Value::Array(items)) => {
                let index = key.parse::<usize>().map_err(|_| {
                    format!("cannot read field '{}' from an array{}", key, location(&walked))
                })?;
                items.get(index).ok_or_else(|| {
                    format!(
                        "index {} out of bounds (length {}){}",
                        index,
                        items.len(),
                        location(&walked)
                    )
                })?
            }
            (PathSegment::Index(index), Value::Array(items)) => {
                items.get(*index).ok_or_else(|| {
                    format!(
                        "index {} out of bounds (length {}){}",
                        index,
                        items.len(),
                        location(&walked)
                    )
                })?
            }
            (PathSegment::Field(key), other) => {
                return Err(format!(
                    "cannot read field '{}' from {}{}",
                    key,
                    kind_of(other),
                    location(&walked)
                ))
            }
            (PathSegment::Index(index), other) => {
                return Err(format!(
                    "cannot index [{}] into {}{}",
                    index,
                    kind_of(other),
                    location(&walked)
                ))
            }
        };

        match segment {
            PathSegment::Field(key) => {
                if !walked.is_empty() {
                    walked.push('.');
                }
                walked.push_str(key);
            }
            PathSegment::Index(index) => walked.push_str(&format!("[{}]", index)),
        }
    }

    Ok(current)
}

fn location(walked: &str) -> String {
    if walked.is_empty() {
        String::new()
    } else {
        format!(" at '{}'", walked)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Convert a JSON value to a string for interpolation.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

/// Variable scope of one chain execution.
#[derive(Debug, Clone, Default)]
pub struct TemplateScope {
    variables: HashMap<String, Value>,
    extracted: HashMap<String, Value>,
    responses: HashMap<String, Value>,
}

impl TemplateScope {
    /// Scope seeded with chain variables.
    pub fn new(variables: HashMap<String, Value>) -> Self {
        Self {
            variables,
            ..Default::default()
        }
    }

    /// Override chain variables for this run only.
    pub fn with_overrides(mut self, overrides: HashMap<String, Value>) -> Self {
        self.variables.extend(overrides);
        self
    }

    /// Record a value extracted from a link response.
    pub fn insert_extracted(&mut self, name: impl Into<String>, value: Value) {
        self.extracted.insert(name.into(), value);
    }

    /// Record a captured response under `key`.
    pub fn store_response(&mut self, key: impl Into<String>, response: Value) {
        self.responses.insert(key.into(), response);
    }

    /// Chain variables merged with every extracted value.
    pub fn resolved_variables(&self) -> HashMap<String, Value> {
        let mut merged = self.variables.clone();
        merged.extend(self.extracted.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Resolve the inner expression of one placeholder.
    pub fn resolve(&self, expression: &str) -> Result<Value> {
        let expression = expression.trim();

        if let Some(reference) = expression.strip_prefix("chain.") {
            let (key, path) = match reference.split_once('.') {
                Some((key, path)) => (key, Some(path)),
                None => (reference, None),
            };
            let response = self.responses.get(key).ok_or_else(|| {
                unresolved(expression, format!("no response stored under '{}'", key))
            })?;
            return match path {
                Some(path) => evaluate_path(response, path)
                    .cloned()
                    .map_err(|reason| unresolved(expression, reason)),
                None => Ok(response.clone()),
            };
        }

        if let Some(value) = self.lookup(expression) {
            return Ok(value.clone());
        }

        if let Some((name, path)) = expression.split_once('.') {
            if let Some(value) = self.lookup(name) {
                return evaluate_path(value, path)
                    .cloned()
                    .map_err(|reason| unresolved(expression, reason));
            }
        }

        Err(unresolved(expression, "variable is not defined".to_string()))
    }

    /// Interpolate every placeholder in a string.
    pub fn render_str(&self, template: &str) -> Result<String> {
        let mut output = String::with_capacity(template.len());
        let mut last = 0;

        for caps in placeholder_regex().captures_iter(template) {
            let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            output.push_str(&template[last..whole.start()]);
            output.push_str(&value_to_string(&self.resolve(inner.as_str())?));
            last = whole.end();
        }

        output.push_str(&template[last..]);
        Ok(output)
    }

    /// Resolve placeholders throughout a JSON value.
    pub fn render_json(&self, value: &Value) -> Result<Value> {
        match value {
            Value::String(s) => {
                if let Some(expression) = whole_placeholder(s) {
                    self.resolve(expression)
                } else {
                    Ok(Value::String(self.render_str(s)?))
                }
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.render_json(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut rendered = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    rendered.insert(key.clone(), self.render_json(item)?);
                }
                Ok(Value::Object(rendered))
            }
            other => Ok(other.clone()),
        }
    }

    fn lookup(&self, name: &str) -> Option<&Value> {
        self.extracted.get(name).or_else(|| self.variables.get(name))
    }
}

/// The placeholder expression when `s` consists of exactly one placeholder.
fn whole_placeholder(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let caps = placeholder_regex().captures(trimmed)?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == trimmed.len() {
        caps.get(1).map(|m| m.as_str())
    } else {
        None
    }
}

fn unresolved(expression: &str, reason: String) -> Error {
    Error::UnresolvedVariable {
        placeholder: expression.to_string(),
        reason,
    }
}
