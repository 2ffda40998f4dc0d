//! Presentation helpers shared by front ends

use chrono::{DateTime, Utc};

/// Formats the time between two instants as `1h 2m 3s`, `2m 3s` or `3s`.
///
/// Returns `-` when either end is missing.
pub fn format_duration(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> String {
    let (Some(start), Some(end)) = (start, end) else {
        return "-".to_string();
    };

    let total_seconds = end.signed_duration_since(start).num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// AWS console link for an execution ARN, if the ARN carries a region
pub fn console_url(execution_arn: &str) -> Option<String> {
    let region = execution_arn.split(':').nth(3).filter(|r| !r.is_empty())?;
    Some(format!(
        "https://{region}.console.aws.amazon.com/states/home?region={region}#/executions/details/{execution_arn}"
    ))
}
