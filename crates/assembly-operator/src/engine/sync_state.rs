//! Sync state bookkeeping.

use crate::crd::{SyncState, SyncStatus};

/// Separator between error messages of one pass.
pub const ERROR_SEPARATOR: &str = "; ";

/// Computes the sync state after a pass that recorded `errors`.
///
/// Without errors the state is `OK` with no error and zero attempts. With
/// errors the messages are joined; repeating the previous `ERROR` message
/// increments the attempt count, anything else restarts it at one.
#[must_use]
pub fn next_sync_state(previous: &SyncState, errors: &[String]) -> SyncState {
    if errors.is_empty() {
        return SyncState::default();
    }

    let message = errors.join(ERROR_SEPARATOR);
    let attempts = if previous.status == SyncStatus::Error
        && previous.error.as_deref() == Some(message.as_str())
    {
        previous.attempts.saturating_add(1)
    } else {
        1
    };

    SyncState {
        status: SyncStatus::Error,
        error: Some(message),
        attempts,
    }
}
