pub mod check;
pub mod daemon;
pub mod init;

use projsync_core::IdentitySet;
use projsync_engine::SkipReason;

/// Comma-separated identities, at most `MAX_LISTED` of them.
pub fn join_identities(set: &IdentitySet) -> String {
    const MAX_LISTED: usize = 8;
    let mut names: Vec<&str> = set.iter().take(MAX_LISTED).map(|id| id.as_str()).collect();
    let more = set.len().saturating_sub(MAX_LISTED);
    let more_label = format!("+{more} more");
    if more > 0 {
        names.push(&more_label);
    }
    names.join(", ")
}

pub fn skip_label(reason: SkipReason) -> &'static str {
    match reason {
        SkipReason::Unavailable => "unavailable",
        SkipReason::ReadOnly => "read-only",
        SkipReason::BaselinePending => "baseline pending",
    }
}
