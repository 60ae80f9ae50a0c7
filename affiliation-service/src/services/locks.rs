//! Subtree locks.
//!
//! Mutating requests hold the paths they touch for the duration of their
//! commit. A request waits only while another request holds a path that is an
//! ancestor, descendant or equal of one of its own, so disjoint subtrees
//! proceed in parallel.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::models::AffiliationPath;

#[derive(Default)]
struct LockTable {
    held: Mutex<Vec<AffiliationPath>>,
    released: Notify,
}

impl LockTable {
    fn held(&self) -> MutexGuard<'_, Vec<AffiliationPath>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone, Default)]
pub struct SubtreeLocks {
    table: Arc<LockTable>,
}

impl SubtreeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until none of `paths` overlaps a held path, then hold them all.
    pub async fn acquire(&self, paths: Vec<AffiliationPath>) -> SubtreeGuard {
        loop {
            let notified = self.table.released.notified();
            tokio::pin!(notified);
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();

            {
                let mut held = self.table.held();
                let blocked = paths
                    .iter()
                    .any(|path| held.iter().any(|other| other.overlaps(path)));
                if !blocked {
                    held.extend(paths.iter().cloned());
                    return SubtreeGuard {
                        table: Arc::clone(&self.table),
                        paths,
                    };
                }
            }

            tracing::debug!(paths = ?paths, "Waiting for overlapping subtree lock");
            notified.await;
        }
    }

    /// Paths currently held.
    pub fn held(&self) -> Vec<AffiliationPath> {
        self.table.held().clone()
    }
}

/// Releases its paths on drop.
pub struct SubtreeGuard {
    table: Arc<LockTable>,
    paths: Vec<AffiliationPath>,
}

impl SubtreeGuard {
    pub fn paths(&self) -> &[AffiliationPath] {
        &self.paths
    }
}

impl Drop for SubtreeGuard {
    fn drop(&mut self) {
        {
            let mut held = self.table.held();
            for path in &self.paths {
                if let Some(index) = held.iter().position(|other| other == path) {
                    held.swap_remove(index);
                }
            }
        }
        self.table.released.notify_waiters();
    }
}
