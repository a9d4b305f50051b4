// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic pattern expansion and wildcard matching.
//!
//! Item topics may list several literal alternatives for one level,
//! joined with `+`:
//!
//! ```text
//! pv/plant1+plant2/power  ->  pv/plant1/power
//!                             pv/plant2/power
//! ```
//!
//! A level that is exactly `+` is the bus single-level wildcard and is
//! passed through untouched, as is the multi-level wildcard `#`.

/// Topic level separator.
pub const LEVEL_SEPARATOR: char = '/';

/// Single-level wildcard, also the alternative delimiter inside a level.
pub const SINGLE_LEVEL_WILDCARD: &str = "+";

/// Multi-level wildcard.
pub const MULTI_LEVEL_WILDCARD: &str = "#";

/// Expand a topic pattern into the concrete bus subscription patterns.
///
/// Levels are folded left to right. For each level the alternatives form
/// the outer loop and the combinations built so far the inner loop, so
/// the result order is fixed for a given pattern.
pub fn expand(pattern: &str) -> Vec<String> {
    let mut combinations: Vec<String> = Vec::new();

    for (depth, level) in pattern.split(LEVEL_SEPARATOR).enumerate() {
        let alternatives: Vec<&str> = if level == SINGLE_LEVEL_WILDCARD {
            vec![level]
        } else {
            level.split('+').collect()
        };

        if depth == 0 {
            combinations = alternatives.iter().map(|a| a.to_string()).collect();
            continue;
        }

        let mut next = Vec::with_capacity(alternatives.len() * combinations.len());
        for alternative in &alternatives {
            for prefix in &combinations {
                next.push(format!("{}{}{}", prefix, LEVEL_SEPARATOR, alternative));
            }
        }
        combinations = next;
    }

    combinations
}

/// Check whether a concrete topic matches a bus subscription filter.
///
/// `+` matches exactly one level, `#` matches the remaining levels
/// (including none) and is only meaningful as the last filter level.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split(LEVEL_SEPARATOR);
    let mut topic_levels = topic.split(LEVEL_SEPARATOR);

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some(MULTI_LEVEL_WILDCARD), _) => return true,
            (Some(SINGLE_LEVEL_WILDCARD), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Split a received topic into its levels.
pub fn segments(topic: &str) -> Vec<&str> {
    topic.split(LEVEL_SEPARATOR).collect()
}
