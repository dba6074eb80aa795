//! The canonical content tree ($HEAD).
//!
//! An arena of nodes keyed by [`ContentId`]. Edges are ordered child lists.
//! Nodes stay in the arena after they become unreachable; only the garbage
//! collector evicts them. Each node records the epoch it was last inserted
//! in, so nodes left over from before a `ClearAll` or root replacement are
//! orphans until they are added again.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use feedsync_core::{AnomalyKind, ContentId, ContentNode, NodeKind, SharedState};

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub kind: NodeKind,
    pub payload: Arc<Vec<u8>>,
    pub children: Vec<ContentId>,
    epoch: u64,
}

/// Result of linking a node under a parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The child was new under this parent
    Appended,
    /// The child was already linked; its payload was replaced
    Updated { changed: bool },
}

/// Result of an `AddFeature` without a parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootOutcome {
    Created,
    /// Same root id again; only the payload may change
    Updated { changed: bool },
    /// A different root took over; the tree starts a new epoch
    Replaced { previous: ContentId },
}

#[derive(Debug, Default)]
pub struct ContentTree {
    root: Option<ContentId>,
    nodes: HashMap<ContentId, TreeNode>,
    shared_states: HashMap<ContentId, SharedState>,
    epoch: u64,
}

impl ContentTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn root(&self) -> Option<&ContentId> {
        self.root.as_ref()
    }

    /// Drop every edge and the root. Nodes remain as orphans.
    pub fn clear(&mut self) {
        self.root = None;
        self.start_epoch();
    }

    fn start_epoch(&mut self) {
        self.epoch += 1;
        for node in self.nodes.values_mut() {
            node.children.clear();
        }
    }

    pub fn set_root(&mut self, node: ContentNode) -> Result<RootOutcome, AnomalyKind> {
        if node.is_token() {
            return Err(AnomalyKind::TokenAsRoot(node.id));
        }

        match self.root.clone() {
            Some(current) if current == node.id => {
                let changed = self.replace_payload(&node);
                Ok(RootOutcome::Updated { changed })
            }
            Some(previous) => {
                self.start_epoch();
                self.root = Some(node.id.clone());
                self.revive(node);
                Ok(RootOutcome::Replaced { previous })
            }
            None => {
                self.root = Some(node.id.clone());
                self.revive(node);
                Ok(RootOutcome::Created)
            }
        }
    }

    /// Link `node` as the last child of `parent`, or update it in place.
    pub fn insert_child(
        &mut self,
        parent: &ContentId,
        node: ContentNode,
    ) -> Result<InsertOutcome, AnomalyKind> {
        if !self.contains(parent) {
            return Err(AnomalyKind::ParentNotFound {
                parent: parent.clone(),
                child: node.id,
            });
        }

        let already_linked = self.children(parent).contains(&node.id);
        if already_linked {
            let changed = self.replace_payload(&node);
            return Ok(InsertOutcome::Updated { changed });
        }

        if &node.id == parent || (self.contains(&node.id) && self.subtree(&node.id).contains(parent)) {
            return Err(AnomalyKind::Cycle {
                parent: parent.clone(),
                child: node.id,
            });
        }

        let child = node.id.clone();
        if self.contains(&child) {
            self.replace_payload(&node);
        } else {
            self.revive(node);
        }
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.push(child);
        }
        Ok(InsertOutcome::Appended)
    }

    pub fn remove_child(&mut self, parent: &ContentId, child: &ContentId) -> Result<(), AnomalyKind> {
        let edge_missing = || AnomalyKind::EdgeNotFound {
            parent: parent.clone(),
            child: child.clone(),
        };

        let epoch = self.epoch;
        let node = self
            .nodes
            .get_mut(parent)
            .filter(|n| n.epoch == epoch)
            .ok_or_else(edge_missing)?;
        let index = node
            .children
            .iter()
            .position(|c| c == child)
            .ok_or_else(edge_missing)?;
        node.children.remove(index);
        Ok(())
    }

    /// Insert a node fresh in the current epoch, with no children.
    fn revive(&mut self, node: ContentNode) {
        self.nodes.insert(
            node.id,
            TreeNode {
                kind: node.kind,
                payload: Arc::new(node.payload),
                children: Vec::new(),
                epoch: self.epoch,
            },
        );
    }

    /// Replace a live node's payload. Readers holding the old `Arc` keep it.
    fn replace_payload(&mut self, node: &ContentNode) -> bool {
        match self.nodes.get_mut(&node.id) {
            Some(existing) => {
                let changed = existing.payload.as_slice() != node.payload.as_slice()
                    || existing.kind != node.kind;
                if changed {
                    existing.payload = Arc::new(node.payload.clone());
                    existing.kind = node.kind;
                }
                changed
            }
            None => false,
        }
    }

    /// Whether `id` is a node of the current epoch.
    pub fn contains(&self, id: &ContentId) -> bool {
        self.nodes.get(id).is_some_and(|n| n.epoch == self.epoch)
    }

    /// Whether `id` is in the arena at all, orphan or not.
    pub fn holds(&self, id: &ContentId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn node(&self, id: &ContentId) -> Option<&TreeNode> {
        self.nodes.get(id).filter(|n| n.epoch == self.epoch)
    }

    pub fn kind(&self, id: &ContentId) -> Option<NodeKind> {
        self.nodes.get(id).map(|n| n.kind)
    }

    pub fn is_token(&self, id: &ContentId) -> bool {
        self.kind(id) == Some(NodeKind::Token)
    }

    pub fn payload(&self, id: &ContentId) -> Option<Arc<Vec<u8>>> {
        self.nodes.get(id).map(|n| Arc::clone(&n.payload))
    }

    pub fn children(&self, id: &ContentId) -> &[ContentId] {
        self.node(id).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// `id` and every node below it, preorder.
    pub fn subtree(&self, id: &ContentId) -> Vec<ContentId> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            for child in self.children(&current).iter().rev() {
                stack.push(child.clone());
            }
            order.push(current);
        }
        order
    }

    pub fn reachable_from_root(&self) -> HashSet<ContentId> {
        match &self.root {
            Some(root) => self.subtree(root).into_iter().collect(),
            None => HashSet::new(),
        }
    }

    /// Whether any live node lists `id` as a child.
    pub fn is_referenced(&self, id: &ContentId) -> bool {
        self.nodes
            .values()
            .any(|n| n.epoch == self.epoch && n.children.contains(id))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &ContentId> {
        self.nodes.keys()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes not reachable from the root.
    pub fn orphan_count(&self) -> usize {
        self.len().saturating_sub(self.reachable_from_root().len())
    }

    /// Remove nodes from the arena. The root is never evicted.
    pub fn evict(&mut self, ids: &[ContentId]) -> usize {
        let mut evicted = 0;
        for id in ids {
            if self.root.as_ref() == Some(id) {
                continue;
            }
            if self.nodes.remove(id).is_some() {
                evicted += 1;
            }
        }
        evicted
    }

    pub fn put_shared_state(&mut self, state: SharedState) {
        self.shared_states.insert(state.content_id.clone(), state);
    }

    pub fn shared_state(&self, id: &ContentId) -> Option<&SharedState> {
        self.shared_states.get(id)
    }

    pub fn shared_state_count(&self) -> usize {
        self.shared_states.len()
    }
}
