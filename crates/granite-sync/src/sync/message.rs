//! Commit message templating.

use chrono::{DateTime, Utc};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Renders a commit message template.
///
/// `{timestamp}` becomes `YYYY-MM-DD HH:MM:SS` and `{date}` becomes
/// `YYYY-MM-DD`, both from `at`. Any other `{...}` text is left as is.
pub fn render_commit_message(template: &str, at: DateTime<Utc>) -> String {
    template
        .replace("{timestamp}", &at.format(TIMESTAMP_FORMAT).to_string())
        .replace("{date}", &at.format(DATE_FORMAT).to_string())
}
