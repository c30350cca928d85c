use crate::sandbox::ValidatedChange;
use crate::types::{Ticket, TicketKey};
use std::fmt::Write as _;

const MAX_SLUG_LEN: usize = 30;

/// `prefix` joined to a slug of `key`: lowercase, spaces become `-`, only
/// `[a-z0-9-]` kept, at most 30 characters, trimmed of `-`.
pub fn branch_name(prefix: &str, key: &TicketKey) -> String {
    let slug: String = key
        .as_str()
        .to_lowercase()
        .replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-')
        .take(MAX_SLUG_LEN)
        .collect();
    let slug = match slug.trim_matches('-') {
        "" => "ticket",
        trimmed => trimmed,
    };
    if prefix.is_empty() || prefix.ends_with('/') || prefix.ends_with('-') {
        format!("{prefix}{slug}")
    } else {
        format!("{prefix}-{slug}")
    }
}

pub fn pr_title(ticket: &Ticket) -> String {
    let summary = ticket.summary.trim();
    if summary.is_empty() {
        return ticket.key.to_string();
    }
    format!("{}: {summary}", ticket.key)
}

pub fn commit_message(key: &TicketKey) -> String {
    format!("feat({key}): apply planned changes")
}

pub fn pr_body(ticket: &Ticket, changes: &[ValidatedChange], notes: &[String]) -> String {
    let mut body = String::new();
    body.push_str("## Ticket\n");
    let _ = writeln!(body, "- Key: {}", ticket.key);
    if !ticket.summary.trim().is_empty() {
        let _ = writeln!(body, "- Summary: {}", ticket.summary.trim());
    }

    body.push_str("\n## Description\n");
    if ticket.description.trim().is_empty() {
        body.push_str("(no description provided)\n");
    } else {
        body.push_str(ticket.description.trim_end());
        body.push('\n');
    }

    body.push_str("\n## Changeset\n");
    if changes.is_empty() {
        body.push_str("(no changes)\n");
    }
    for change in changes {
        let _ = writeln!(body, "- {} ({})", change.path, change.operation);
    }

    if !notes.is_empty() {
        body.push_str("\n## Notes\n");
        for note in notes {
            let _ = writeln!(body, "- {note}");
        }
    }

    body.push_str("\n## Checklist\n");
    body.push_str("- [ ] Code compiles\n");
    body.push_str("- [ ] Tests (if any) pass locally\n");
    body.push_str("- [ ] Review requested\n");
    body
}
