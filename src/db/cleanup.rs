//! Best-effort cleanup.

use std::fmt::Display;
use tracing::warn;

/// Run-and-forget for cleanup steps whose failure must not mask the
/// operation that triggered them. Failures are logged and discarded.
pub fn best_effort<T, E: Display>(what: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(error = %e, "Failed to {what}");
            None
        }
    }
}
