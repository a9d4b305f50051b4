// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload path lookup.
//!
//! Paths are dot-separated keys with optional bracketed indices:
//! `value`, `meta.region`, `cells[2]`, `grid.phases[0].volts`, `[1]`.
//! A purely numeric key also indexes into an array (`cells.2`).

use serde_json::Value;

/// Path that selects the raw, unparsed message body.
pub const WHOLE_BODY: &str = "@this";

/// Text used for a path that does not resolve.
pub const UNDEFINED: &str = "undefined";

#[derive(Debug, PartialEq, Eq)]
enum Step<'a> {
    Key(&'a str),
    Index(usize),
}

fn parse(path: &str) -> Option<Vec<Step<'_>>> {
    let mut steps = Vec::new();

    for part in path.split('.') {
        let (key, mut rest) = match part.find('[') {
            Some(pos) => part.split_at(pos),
            None => (part, ""),
        };

        if !key.is_empty() {
            steps.push(Step::Key(key));
        } else if rest.is_empty() {
            // Empty segment, e.g. "a..b" or a trailing dot.
            return None;
        }

        while !rest.is_empty() {
            let close = rest.find(']')?;
            let index = rest[1..close].trim().parse().ok()?;
            steps.push(Step::Index(index));
            rest = &rest[close + 1..];
            if !rest.is_empty() && !rest.starts_with('[') {
                return None;
            }
        }
    }

    Some(steps)
}

/// Resolve `path` in `value`. Malformed paths resolve to nothing.
pub fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }

    let mut current = value;
    for step in parse(path)? {
        current = match (step, current) {
            (Step::Key(key), Value::Object(map)) => map.get(key)?,
            (Step::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
            (Step::Index(i), Value::Array(items)) => items.get(i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a resolved value as field text.
///
/// Strings are used as-is; everything else is written as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
