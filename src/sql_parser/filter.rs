// Identifier normalization and table exclusion
use crate::sql_parser::classifier::classify;
use crate::types::{SkipDecision, Statement};
use std::collections::HashSet;

const SEQUENCE_SUFFIX: &str = "_id_seq";

/// Canonical form of an identifier: unquoted, lowercase, dot-joined segments
pub fn normalize(identifier: &str) -> String {
    identifier
        .split('.')
        .map(|segment| {
            let segment = segment.trim();
            let unquoted = segment
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .unwrap_or(segment);
            unquoted.to_lowercase()
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Whether `identifier` names an excluded table or one of its id sequences.
///
/// `skip_set` entries are expected in normalized form.
pub fn excludes(identifier: &str, skip_set: &HashSet<String>) -> bool {
    if skip_set.is_empty() {
        return false;
    }

    let normalized = normalize(identifier);
    if normalized.is_empty() {
        return false;
    }
    if skip_set.contains(&normalized) {
        return true;
    }

    let last = normalized.rsplit('.').next().unwrap_or(&normalized);
    if skip_set.contains(last) {
        return true;
    }

    if let Some(table) = last.strip_suffix(SEQUENCE_SUFFIX) {
        if skip_set.contains(table) {
            return true;
        }
        // Qualified exclusion entry, e.g. `public.api_keys` for `public.api_keys_id_seq`
        if let Some(qualified) = normalized.strip_suffix(SEQUENCE_SUFFIX) {
            if skip_set.contains(qualified) {
                return true;
            }
        }
    }

    false
}

/// Decide whether a statement must be dropped before execution
pub fn should_skip_statement(statement: &Statement, skip_set: &HashSet<String>) -> SkipDecision {
    if skip_set.is_empty() {
        return SkipDecision::proceed();
    }

    match classify(&statement.sql) {
        Some(target) if excludes(&target.identifier, skip_set) => SkipDecision::skip(format!(
            "{} targets excluded identifier {}",
            target.operation,
            normalize(&target.identifier)
        )),
        _ => SkipDecision::proceed(),
    }
}
