//! Cursors over a session's revealed children.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use feedsync_core::{ContentId, ModelChild, PageResult, TokenId};

#[derive(Debug)]
pub(crate) struct CursorState {
    items: Vec<ModelChild>,
    position: usize,
    exhausted: bool,
}

pub(crate) type CursorLink = Weak<Mutex<CursorState>>;

/// Forward-only producer of the children of one node, as revealed to one
/// session when the cursor was created.
///
/// Appends the session applies to the same node are pushed onto live
/// cursors until they report exhaustion. Everything else in the tree is
/// invisible to an existing cursor.
#[derive(Debug)]
pub struct ModelCursor {
    parent: Option<ContentId>,
    state: Arc<Mutex<CursorState>>,
}

impl ModelCursor {
    pub(crate) fn new(parent: Option<ContentId>, items: Vec<ModelChild>) -> Self {
        Self {
            parent,
            state: Arc::new(Mutex::new(CursorState {
                items,
                position: 0,
                exhausted: false,
            })),
        }
    }

    pub(crate) fn link(&self) -> CursorLink {
        Arc::downgrade(&self.state)
    }

    /// Node whose children this cursor yields.
    pub fn parent_id(&self) -> Option<&ContentId> {
        self.parent.as_ref()
    }

    pub fn next_item(&mut self) -> Option<ModelChild> {
        let mut state = self.state.lock();
        match state.items.get(state.position).cloned() {
            Some(item) => {
                state.position += 1;
                Some(item)
            }
            None => {
                state.exhausted = true;
                None
            }
        }
    }

    pub fn is_at_end(&self) -> bool {
        let state = self.state.lock();
        state.position >= state.items.len()
    }

    pub fn remaining(&self) -> usize {
        let state = self.state.lock();
        state.items.len().saturating_sub(state.position)
    }
}

impl Iterator for ModelCursor {
    type Item = ModelChild;

    fn next(&mut self) -> Option<ModelChild> {
        self.next_item()
    }
}

/// Push appended children onto a live cursor. Returns false once the
/// cursor is gone.
pub(crate) fn append(link: &CursorLink, items: &[ModelChild]) -> bool {
    match link.upgrade() {
        Some(state) => {
            let mut state = state.lock();
            if !state.exhausted {
                state.items.extend_from_slice(items);
            }
            true
        }
        None => false,
    }
}

/// Outcome of resolving a token, handed to token observers.
#[derive(Debug, Clone)]
pub struct TokenCompleted {
    pub token: TokenId,
    pub parent: ContentId,
    pub items: Vec<ModelChild>,
    pub page: PageResult,
}

impl TokenCompleted {
    /// Cursor over just the newly revealed items.
    pub fn cursor(&self) -> ModelCursor {
        ModelCursor::new(Some(self.parent.clone()), self.items.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedsync_core::ModelFeature;

    fn item(n: u64) -> ModelChild {
        ModelChild::Feature(ModelFeature {
            content_id: ContentId::feature("stream", n),
            payload: Arc::new(Vec::new()),
        })
    }

    #[test]
    fn test_cursor_yields_in_order() {
        let cursor = ModelCursor::new(None, vec![item(1), item(2)]);
        let ids: Vec<_> = cursor.filter_map(|c| c.content_id().map(|id| id.id)).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_append_reaches_live_cursor() {
        let mut cursor = ModelCursor::new(None, vec![item(1)]);
        let link = cursor.link();
        assert!(cursor.next_item().is_some());
        assert!(cursor.is_at_end());

        assert!(append(&link, &[item(2)]));
        assert!(!cursor.is_at_end());
        assert_eq!(cursor.next_item().and_then(|c| c.content_id().map(|id| id.id)), Some(2));
    }

    #[test]
    fn test_exhausted_cursor_stays_exhausted() {
        let mut cursor = ModelCursor::new(None, vec![]);
        let link = cursor.link();
        assert!(cursor.next_item().is_none());
        append(&link, &[item(1)]);
        assert!(cursor.is_at_end());
    }

    #[test]
    fn test_dropped_cursor_link_is_dead() {
        let cursor = ModelCursor::new(None, vec![]);
        let link = cursor.link();
        drop(cursor);
        assert!(!append(&link, &[item(1)]));
    }
}
