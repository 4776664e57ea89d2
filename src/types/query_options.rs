use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::types::RecordId;

//------------ CancelToken ---------------------------------------------------

/// A shared flag that aborts a running query.
///
/// Clone the token, hand one copy to [QueryOptions] and keep the other;
/// calling [CancelToken::cancel] makes the query yield
/// [IndexError::Cancelled](crate::IndexError::Cancelled) at its next step.
/// Mutations cannot be cancelled; durability of in-flight provider
/// operations is the provider's concern.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

//------------ QueryOptions --------------------------------------------------

/// Per-query options passed into the query methods on the index.
///
/// The default is an unbounded query: no cancellation, no deadline, no
/// result limit and no early chain termination.
#[derive(Clone, Default)]
pub struct QueryOptions {
    /// Checked at every merge step and before every yield.
    pub cancel: Option<CancelToken>,
    /// When the deadline passes the iterator behaves as if cancelled.
    pub deadline: Option<Instant>,
    /// Stop after this many record identifiers have been yielded.
    pub limit: Option<usize>,
    /// Early termination for chain walks: when the predicate returns true
    /// for a chain entry's record identifier, that walk stops. Entries are
    /// visited newest-first, so `|id| id < some_floor` cuts off the old
    /// tail of every chain.
    pub terminate: Option<TerminationFn>,
}

pub type TerminationFn = Arc<dyn Fn(RecordId) -> bool + Send + Sync>;

impl QueryOptions {
    pub(crate) fn interrupted(&self) -> bool {
        if let Some(cancel) = &self.cancel {
            if cancel.is_cancelled() {
                return true;
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        false
    }
}

impl std::fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOptions")
            .field("cancel", &self.cancel)
            .field("deadline", &self.deadline)
            .field("limit", &self.limit)
            .field("terminate", &self.terminate.as_ref().map(|_| ".."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_trips_options() {
        let token = CancelToken::new();
        let opts = QueryOptions {
            cancel: Some(token.clone()),
            ..Default::default()
        };
        assert!(!opts.interrupted());
        token.cancel();
        assert!(opts.interrupted());
    }

    #[test]
    fn elapsed_deadline_interrupts() {
        let opts = QueryOptions {
            deadline: Some(Instant::now()),
            ..Default::default()
        };
        assert!(opts.interrupted());
    }
}
