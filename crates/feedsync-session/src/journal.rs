//! Epoch-scoped log of applied batches, replayed into restored sessions.

use std::collections::VecDeque;

use feedsync_core::MutationContext;

use crate::applier::TreeEvent;

#[derive(Debug, Clone)]
pub struct JournalEntry {
    pub seq: u64,
    pub events: Vec<TreeEvent>,
    pub context: MutationContext,
}

#[derive(Debug, Default)]
pub struct MutationJournal {
    entries: VecDeque<JournalEntry>,
    last_seq: u64,
}

impl MutationJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a batch and return its sequence number.
    pub fn append(&mut self, events: Vec<TreeEvent>, context: MutationContext) -> u64 {
        self.last_seq += 1;
        self.entries.push_back(JournalEntry {
            seq: self.last_seq,
            events,
            context,
        });
        self.last_seq
    }

    /// Sequence number of the latest batch, kept across clears.
    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Entries after `seq`, oldest first.
    pub fn since(&self, seq: u64) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter().filter(move |e| e.seq > seq)
    }

    /// Drop entries every reader has already consumed.
    pub fn trim_through(&mut self, seq: u64) {
        while self.entries.front().is_some_and(|e| e.seq <= seq) {
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_since_and_trim() {
        let mut journal = MutationJournal::new();
        let a = journal.append(Vec::new(), MutationContext::new());
        let b = journal.append(Vec::new(), MutationContext::new());
        let c = journal.append(Vec::new(), MutationContext::new());

        assert_eq!(journal.since(a).map(|e| e.seq).collect::<Vec<_>>(), vec![b, c]);
        journal.trim_through(b);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.since(0).count(), 1);
    }

    #[test]
    fn test_sequence_survives_clear() {
        let mut journal = MutationJournal::new();
        journal.append(Vec::new(), MutationContext::new());
        journal.clear();
        assert!(journal.is_empty());
        assert_eq!(journal.append(Vec::new(), MutationContext::new()), 2);
    }
}
