//! Background catalog search.
//!
//! A search walks every policy of a catalog on a dedicated worker thread and
//! hands hits back in batches:
//!
//! ```text
//!   caller ──spawn──> worker: for each policy
//!     │                  ├─ cancelled? stop
//!     │                  ├─ matcher.matches(policy)  (errors counted, not fatal)
//!     │                  └─ every `batch_size` policies: send SearchBatch
//!     │<── bounded channel ──┘
//!     └──join──> SearchSummary
//! ```
//!
//! Cancellation is cooperative: the flag is read between policies, so a
//! cancelled search stops after the policy in progress.

mod matcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use matcher::{PolicyMatcher, RegistryMatcher, TextFields, TextMatcher};

use crate::catalog::PolicyCatalog;
use crate::error::{PolError, PolResult};

/// Search worker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Policies evaluated between hand-offs.
    pub batch_size: usize,
    /// Batches buffered before the worker waits for the consumer.
    pub channel_capacity: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            batch_size: 20,
            channel_capacity: 64,
        }
    }
}

/// Hits found since the previous batch, plus running totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchBatch {
    /// IDs of matching policies, in catalog order.
    pub hits: Vec<String>,
    /// Policies evaluated so far.
    pub searched: usize,
    /// Hits so far.
    pub found: usize,
}

/// Final tally of a search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchSummary {
    /// Policies evaluated.
    pub searched: usize,
    /// Policies that matched.
    pub found: usize,
    /// Policies whose evaluation returned an error.
    pub failures: usize,
    /// Whether the search stopped early.
    pub cancelled: bool,
}

/// A running search.
#[derive(Debug)]
pub struct SearchHandle {
    cancel: Arc<AtomicBool>,
    rx: Receiver<SearchBatch>,
    join: JoinHandle<SearchSummary>,
}

impl SearchHandle {
    /// Asks the worker to stop after the policy in progress.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    /// Blocks for the next batch; `None` once the worker has finished.
    #[must_use]
    pub fn recv(&self) -> Option<SearchBatch> {
        self.rx.recv().ok()
    }

    /// Waits up to `timeout` for the next batch.
    ///
    /// # Errors
    /// `Search` on timeout or once the worker has finished.
    pub fn recv_timeout(&self, timeout: Duration) -> PolResult<SearchBatch> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => PolError::Search {
                message: format!("no batch within {} ms", timeout.as_millis()),
            },
            RecvTimeoutError::Disconnected => PolError::Search {
                message: "search finished".to_string(),
            },
        })
    }

    /// Waits for the worker. Batches not yet received are discarded.
    ///
    /// # Errors
    /// `Search` if the worker panicked.
    pub fn join(self) -> PolResult<SearchSummary> {
        // Unblock a worker waiting on a full channel.
        drop(self.rx);
        self.join.join().map_err(|_| PolError::Search {
            message: "search worker panicked".to_string(),
        })
    }

    /// Receives every batch, then joins. Returns all hit IDs in order.
    ///
    /// # Errors
    /// `Search` if the worker panicked.
    pub fn collect(self) -> PolResult<(Vec<String>, SearchSummary)> {
        let mut hits = Vec::new();
        while let Ok(batch) = self.rx.recv() {
            hits.extend(batch.hits);
        }
        let summary = self.join()?;
        Ok((hits, summary))
    }
}

/// Starts a search over `catalog` on a new worker thread.
///
/// # Errors
/// `Search` if the thread cannot be spawned.
pub fn spawn_search(
    catalog: Arc<PolicyCatalog>,
    matcher: Box<dyn PolicyMatcher>,
    config: &SearchConfig,
) -> PolResult<SearchHandle> {
    let batch_size = config.batch_size.max(1);
    let (tx, rx) = bounded::<SearchBatch>(config.channel_capacity.max(1));
    let cancel = Arc::new(AtomicBool::new(false));

    let thread_cancel = Arc::clone(&cancel);
    let join = thread::Builder::new()
        .name("regpol-search".to_string())
        .spawn(move || search_loop(&catalog, matcher.as_ref(), batch_size, &thread_cancel, &tx))
        .map_err(|e| PolError::Search {
            message: format!("failed to spawn search worker: {e}"),
        })?;

    Ok(SearchHandle { cancel, rx, join })
}

fn search_loop(
    catalog: &PolicyCatalog,
    matcher: &dyn PolicyMatcher,
    batch_size: usize,
    cancel: &AtomicBool,
    tx: &Sender<SearchBatch>,
) -> SearchSummary {
    let mut summary = SearchSummary::default();
    let mut pending = Vec::new();
    let mut consumer_gone = false;

    for policy in catalog.policies.values() {
        if cancel.load(Ordering::Acquire) {
            summary.cancelled = true;
            break;
        }
        summary.searched += 1;
        match matcher.matches(policy) {
            Ok(true) => {
                summary.found += 1;
                pending.push(policy.id.clone());
            }
            Ok(false) => {}
            Err(error) => {
                summary.failures += 1;
                warn!(policy = %policy.id, %error, "policy evaluation failed during search");
            }
        }
        if summary.searched % batch_size == 0 {
            let batch = SearchBatch {
                hits: std::mem::take(&mut pending),
                searched: summary.searched,
                found: summary.found,
            };
            if tx.send(batch).is_err() {
                // Nobody is listening; finish the tally without hand-offs.
                consumer_gone = true;
                summary.cancelled = true;
                break;
            }
        }
    }

    if !consumer_gone {
        let _ = tx.send(SearchBatch {
            hits: pending,
            searched: summary.searched,
            found: summary.found,
        });
    }
    debug!(
        searched = summary.searched,
        found = summary.found,
        failures = summary.failures,
        cancelled = summary.cancelled,
        "search finished"
    );
    summary
}
