//! Execution naming
//!
//! Execution names double as idempotency tokens: starting twice with the same
//! name never launches two executions.

use chrono::{DateTime, Utc};

const MAX_NAME_LENGTH: usize = 80;
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Builds a valid execution name from an operator-supplied label.
///
/// Characters outside `[A-Za-z0-9-_]` become `_`, runs of `_` collapse, and the
/// result is suffixed with a UTC timestamp. Long labels are cut so the whole name
/// stays within 80 characters without losing the timestamp.
pub fn execution_name(label: &str, now: DateTime<Utc>) -> String {
    let mut cleaned = String::with_capacity(label.len());
    for c in label.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            c
        } else {
            '_'
        };
        if c == '_' && cleaned.ends_with('_') {
            continue;
        }
        cleaned.push(c);
    }
    let cleaned = cleaned.trim_matches('_');
    let cleaned = if cleaned.is_empty() { "run" } else { cleaned };

    let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
    let max_label = MAX_NAME_LENGTH - timestamp.len() - 1;
    let label: String = cleaned.chars().take(max_label).collect();

    format!("{}_{}", label.trim_end_matches('_'), timestamp)
}

/// Locally generated token for a start the remote has not yet identified
pub fn local_token() -> String {
    format!("local-{}", uuid::Uuid::new_v4())
}
