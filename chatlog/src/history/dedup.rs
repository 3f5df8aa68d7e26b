//! Duplicate detection for incoming append requests.
//!
//! Remote timestamps can be skewed, and servers replay archived messages, so
//! identity is matched within a time window around the candidate. A
//! correlation id is a stronger identity signal and widens the window.

use std::time::Duration;

use super::HistoryError;
use super::append::AppendRequest;
use super::store::{DuplicateQuery, Store};

/// Default half-width of the window for candidates without a correlation id.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Default half-width of the window for candidates with a correlation id.
pub const DEFAULT_CORRELATED_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Half-widths of the dedup time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupWindows {
    /// Used when the candidate has no correlation id.
    pub plain: Duration,
    /// Used when the candidate carries a correlation id.
    pub correlated: Duration,
}

impl Default for DedupWindows {
    fn default() -> Self {
        Self {
            plain: DEFAULT_WINDOW,
            correlated: DEFAULT_CORRELATED_WINDOW,
        }
    }
}

impl DedupWindows {
    /// Window half-width for a candidate.
    #[must_use]
    pub const fn for_candidate(&self, has_correlation_id: bool) -> Duration {
        if has_correlation_id {
            self.correlated
        } else {
            self.plain
        }
    }
}

/// Whether the store already holds a record that `request` duplicates.
///
/// Matching is exact and case-sensitive on body and author nickname. A
/// missing nickname only matches records without one. When the candidate
/// has a correlation id, a stored record with a different id is never a
/// duplicate.
///
/// # Errors
///
/// Returns [`HistoryError::Store`] if the lookup fails.
pub fn is_duplicate(
    store: &Store,
    windows: DedupWindows,
    request: &AppendRequest,
) -> Result<bool, HistoryError> {
    let window = windows.for_candidate(request.correlation_id.is_some());
    let query = DuplicateQuery {
        account: &request.account,
        conversation: &request.conversation,
        item_type: request.item_type,
        body: &request.body,
        direction: request.state.direction(),
        author_nickname: request.author_nickname.as_deref(),
        correlation_id: request.correlation_id.as_ref(),
        from: request.timestamp.saturating_sub(window),
        to: request.timestamp.saturating_add(window),
    };
    Ok(store.count_duplicates(&query)? > 0)
}
