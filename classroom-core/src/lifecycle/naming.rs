//! Deterministic remote repository names

use crate::model::{Actor, Assignment};

/// Longest repository name the remote host accepts
pub const MAX_REPO_NAME_LEN: usize = 100;

/// Repository name for an actor's copy of an assignment: `{assignment}-{actor}`
///
/// Returns `None` when either part normalizes to nothing.
pub fn repo_name(assignment: &Assignment, actor: &Actor) -> Option<String> {
    let prefix = normalize(&assignment.slug);
    let suffix = normalize(actor.slug());
    if prefix.is_empty() || suffix.is_empty() {
        return None;
    }

    let mut name = format!("{}-{}", prefix, suffix);
    if name.len() > MAX_REPO_NAME_LEN {
        name.truncate(MAX_REPO_NAME_LEN);
        while name.ends_with(['-', '.']) {
            name.pop();
        }
    }
    Some(name)
}

/// Lowercase, map disallowed characters to `-`, collapse and trim dashes
fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        let c = c.to_ascii_lowercase();
        let mapped = if c.is_ascii_alphanumeric() || c == '.' || c == '_' {
            c
        } else {
            '-'
        };
        if mapped == '-' && out.ends_with('-') {
            continue;
        }
        out.push(mapped);
    }
    out.trim_matches('-').to_string()
}
