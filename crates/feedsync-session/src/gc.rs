//! Reachability-based garbage collection.
//!
//! Each pass recomputes reachability from scratch: the root closure plus
//! whatever every initializing, ready or resumable session retains.
//! Anything else in the tree is evicted from the tree and the store.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use feedsync_core::{ContentId, SessionId};

use crate::journal::MutationJournal;
use crate::registry::SessionRegistry;
use crate::store::PayloadStore;
use crate::tree::ContentTree;

#[derive(Debug, Clone, Default, Serialize)]
pub struct GcReport {
    pub evicted: Vec<ContentId>,
    pub expired_sessions: Vec<SessionId>,
    pub reachable: usize,
}

pub struct GarbageCollector<'a> {
    pub tree: &'a mut ContentTree,
    pub registry: &'a mut SessionRegistry,
    pub journal: &'a mut MutationJournal,
    pub store: &'a dyn PayloadStore,
}

impl GarbageCollector<'_> {
    pub fn collect(self, now: DateTime<Utc>, session_lifetime: Duration) -> GcReport {
        let expired_sessions = self.registry.expired(now, session_lifetime);
        for id in &expired_sessions {
            debug!(session = %id, "detached session expired");
            self.registry.remove(id);
        }

        let mut reachable: HashSet<ContentId> = self.tree.reachable_from_root();
        for record in self.registry.iter() {
            reachable.extend(record.view.retained_ids(self.tree));
        }

        let mut evicted: Vec<ContentId> = self
            .tree
            .node_ids()
            .filter(|id| !reachable.contains(*id) && self.tree.root() != Some(*id))
            .cloned()
            .collect();
        evicted.sort();

        if !evicted.is_empty() {
            self.tree.evict(&evicted);
            if let Err(e) = self.store.delete_payloads(&evicted) {
                warn!(error = %e, count = evicted.len(), "failed to delete evicted payloads");
            }
            debug!(count = evicted.len(), "evicted unreachable content");
        }

        let oldest_needed = self
            .registry
            .iter()
            .filter(|r| r.is_detached())
            .map(|r| r.last_seq)
            .min();
        match oldest_needed {
            Some(seq) => self.journal.trim_through(seq),
            None => self.journal.clear(),
        }

        GcReport {
            evicted,
            expired_sessions,
            reachable: reachable.len(),
        }
    }
}
