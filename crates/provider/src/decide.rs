//! Three-way comparison between the last agreed state, the local content and
//! the server's current metadata.

use crate::models::{Baseline, RemoteFile, RevisionKind};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::{OffsetDateTime, UtcDateTime};

/// What a sync should do with one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Neither side moved.
    NoAction,
    /// Both sides moved but ended up with identical bytes. Nothing to
    /// transfer, only the stored revision is stale.
    Converged,
    /// Only the local content changed.
    Push,
    /// Only the server revision changed.
    Pull,
    /// Both changed, a human has to choose.
    Conflict,
}

/// Decide how to reconcile `local_hash` with `remote`, given the `base` they
/// last agreed on.
pub fn decide(kind: RevisionKind, base: &Baseline, local_hash: &str, remote: &RemoteFile) -> Decision {
    let local_changed = base.content_hash != local_hash;
    let remote_changed = !same_revision(kind, &base.revision, &remote.revision);
    match (remote_changed, local_changed) {
        (false, false) => Decision::NoAction,
        (false, true) => Decision::Push,
        (true, false) => Decision::Pull,
        (true, true) if remote.content_hash.as_deref() == Some(local_hash) => Decision::Converged,
        (true, true) => Decision::Conflict,
    }
}

/// Compare two revision strings according to `kind`.
///
/// Timestamps that fail to parse are only equal if the strings are
/// identical; anything else counts as "changed".
pub fn same_revision(kind: RevisionKind, a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match kind {
        RevisionKind::Exact => false,
        RevisionKind::Timestamp => match (parse_timestamp(a), parse_timestamp(b)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// Parse an RFC 3339 or RFC 2822/HTTP-date timestamp.
pub fn parse_timestamp(value: &str) -> Option<UtcDateTime> {
    let value = value.trim();
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed.to_utc());
    }
    // HTTP dates use the obsolete "GMT" zone name.
    let value = value.strip_suffix(" GMT").map_or_else(|| value.to_string(), |v| format!("{v} +0000"));
    OffsetDateTime::parse(&value, &Rfc2822).ok().map(OffsetDateTime::to_utc)
}

/// Render a timestamp revision in its canonical (RFC 3339) form.
pub fn format_timestamp(value: UtcDateTime) -> String {
    value.format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}
