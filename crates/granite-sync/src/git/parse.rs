//! Git output parsing helpers.

use std::sync::LazyLock;

use regex::Regex;

use super::executor::CommandOutput;
use super::types::StatusEntry;

static RE_CONFLICT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CONFLICT \([^)]*\): (?:Merge conflict in )?(.+)").unwrap());

/// Formats a git error with both stdout and stderr for better debugging.
pub fn format_git_error(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    let stdout = output.stdout.trim();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.exit_code.unwrap_or(-1)
        ),
        (true, false) => stdout.to_string(),
        (false, true) => stderr.to_string(),
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Parses `git status --porcelain -z` output.
///
/// Records are NUL-terminated; a rename or copy record is followed by an
/// extra field holding the original path.
pub fn parse_porcelain_z(output: &str) -> Vec<StatusEntry> {
    let mut entries = Vec::new();
    let mut fields = output.split('\0');

    while let Some(record) = fields.next() {
        if record.len() < 4 {
            continue;
        }
        let mut chars = record.chars();
        let index = chars.next().unwrap_or(' ');
        let worktree = chars.next().unwrap_or(' ');
        let path = record[3..].to_string();

        let orig_path = if matches!(index, 'R' | 'C') || matches!(worktree, 'R' | 'C') {
            fields.next().map(str::to_string)
        } else {
            None
        };

        entries.push(StatusEntry {
            path,
            orig_path,
            index,
            worktree,
        });
    }

    entries
}

/// Extracts conflicting paths from merge/rebase output.
pub fn conflicting_files(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| RE_CONFLICT.captures(line))
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect()
}

/// Counts changed files from git pull output.
pub fn count_changed_files(output: &str) -> u32 {
    for line in output.lines() {
        if line.contains("file") && line.contains("changed") {
            for word in line.split_whitespace() {
                if let Ok(n) = word.parse::<u32>() {
                    return n;
                }
            }
        }
    }
    0
}
