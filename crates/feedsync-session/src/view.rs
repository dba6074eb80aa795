//! A session's own reveal state over the content tree.
//!
//! The view records, per revealed node, the ordered entries this session
//! has seen: features and tokens. It never holds node payloads; cursors read
//! them from the tree when they are created. The root's children are paged
//! with synthetic tokens; everything below a revealed root child is
//! revealed in full.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use feedsync_core::{
    AppliedDiff, ContentId, FeatureChange, ModelChild, ModelFeature, ModelToken, MutationContext,
    PageResult, TokenId,
};

use crate::applier::TreeEvent;
use crate::cursor::{self, CursorLink, ModelCursor, TokenCompleted};
use crate::pager::TokenPager;
use crate::tree::ContentTree;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Entry {
    Feature(ContentId),
    Token(TokenId),
}

impl Entry {
    fn refers_to(&self, id: &ContentId) -> bool {
        match self {
            Entry::Feature(c) | Entry::Token(TokenId::Real(c)) => c == id,
            Entry::Token(TokenId::Synthetic(_)) => false,
        }
    }

    fn synthetic(&self) -> Option<Uuid> {
        match self {
            Entry::Token(TokenId::Synthetic(uuid)) => Some(*uuid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct SyntheticTracker {
    parent: ContentId,
    pending: Vec<ContentId>,
}

#[derive(Debug, Clone)]
struct RealTracker {
    parent: ContentId,
    in_flight: bool,
}

/// What applying a batch did to one view.
#[derive(Debug, Default)]
pub struct ViewDelta {
    pub changes: Vec<FeatureChange>,
    /// Set when the batch answered one of this view's real tokens
    pub completed: Option<TokenCompleted>,
}

/// Outcome of asking a view about a real token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealTokenState {
    Unknown,
    InFlight,
    /// Marked in flight by this call
    Claimed(ModelToken),
}

#[derive(Debug, Default)]
pub struct SessionView {
    root: Option<ContentId>,
    containers: HashMap<ContentId, Vec<Entry>>,
    synthetic: HashMap<Uuid, SyntheticTracker>,
    real: HashMap<ContentId, RealTracker>,
    cursors: HashMap<ContentId, Vec<CursorLink>>,
    /// Containers created while applying the current batch
    fresh: HashSet<ContentId>,
    pager: TokenPager,
    pruned: bool,
}

impl SessionView {
    pub fn new(pager: TokenPager) -> Self {
        Self {
            pager,
            ..Default::default()
        }
    }

    pub fn root(&self) -> Option<&ContentId> {
        self.root.as_ref()
    }

    pub fn is_revealed(&self, id: &ContentId) -> bool {
        self.containers.contains_key(id)
    }

    pub fn revealed_count(&self) -> usize {
        self.containers.len()
    }

    /// Bind to the tree's current root and reveal the first page.
    ///
    /// With `prune_hint`, root children after the one containing the hint
    /// are left out of the reveal.
    pub fn populate(&mut self, tree: &ContentTree, prune_hint: Option<&ContentId>) {
        self.containers.clear();
        self.synthetic.clear();
        self.real.clear();
        self.cursors.clear();
        self.pruned = false;
        self.root = tree.root().cloned();

        let Some(root) = self.root.clone() else {
            return;
        };

        let mut entries = tree.children(&root).to_vec();
        if let Some(hint) = prune_hint {
            if let Some(at) = entries.iter().position(|c| tree.subtree(c).contains(hint)) {
                entries.truncate(at + 1);
                self.pruned = true;
            }
        }

        self.containers.insert(root.clone(), Vec::new());
        self.fresh.insert(root.clone());
        let revealed = self.fill(tree, &root, entries, true);
        self.containers.insert(root, revealed);
    }

    /// Reveal `entries` under `parent`, cutting a synthetic page when
    /// `parent` is the root.
    fn fill(&mut self, tree: &ContentTree, parent: &ContentId, entries: Vec<ContentId>, first: bool) -> Vec<Entry> {
        let split = if self.root.as_ref() == Some(parent) {
            if first {
                self.pager.first_page(&entries, tree)
            } else {
                self.pager.next_page(&entries, tree)
            }
        } else {
            crate::pager::Split {
                revealed: entries,
                pending: Vec::new(),
            }
        };

        let mut out: Vec<Entry> = split
            .revealed
            .into_iter()
            .map(|id| self.reveal_child(tree, parent, id))
            .collect();

        if split.pending.is_empty() {
            return out;
        }
        let uuid = Uuid::new_v4();
        self.synthetic.insert(
            uuid,
            SyntheticTracker {
                parent: parent.clone(),
                pending: split.pending,
            },
        );
        out.push(Entry::Token(TokenId::Synthetic(uuid)));
        out
    }

    fn reveal_child(&mut self, tree: &ContentTree, parent: &ContentId, id: ContentId) -> Entry {
        if tree.is_token(&id) {
            self.real.insert(
                id.clone(),
                RealTracker {
                    parent: parent.clone(),
                    in_flight: false,
                },
            );
            Entry::Token(TokenId::Real(id))
        } else {
            self.reveal_subtree(tree, &id);
            Entry::Feature(id)
        }
    }

    fn reveal_subtree(&mut self, tree: &ContentTree, id: &ContentId) {
        if self.containers.contains_key(id) {
            return;
        }
        self.containers.insert(id.clone(), Vec::new());
        self.fresh.insert(id.clone());
        let entries: Vec<Entry> = tree
            .children(id)
            .to_vec()
            .into_iter()
            .map(|child| self.reveal_child(tree, id, child))
            .collect();
        self.containers.insert(id.clone(), entries);
    }

    fn model_child(&self, tree: &ContentTree, parent: &ContentId, entry: &Entry) -> ModelChild {
        match entry {
            Entry::Feature(id) => ModelChild::Feature(ModelFeature {
                content_id: id.clone(),
                payload: tree.payload(id).unwrap_or_default(),
            }),
            Entry::Token(TokenId::Real(id)) => ModelChild::Token(ModelToken {
                id: TokenId::Real(id.clone()),
                parent: parent.clone(),
                continuation: tree.payload(id),
            }),
            Entry::Token(token) => ModelChild::Token(ModelToken {
                id: token.clone(),
                parent: parent.clone(),
                continuation: None,
            }),
        }
    }

    /// Cursor over the revealed children of `parent` (the root when `None`).
    /// Unrevealed or missing nodes give an empty cursor.
    pub fn cursor(&mut self, tree: &ContentTree, parent: Option<&ContentId>) -> ModelCursor {
        let Some(key) = parent.or(self.root.as_ref()).cloned() else {
            return ModelCursor::new(None, Vec::new());
        };
        let items: Vec<ModelChild> = self
            .containers
            .get(&key)
            .map(|entries| entries.iter().map(|e| self.model_child(tree, &key, e)).collect())
            .unwrap_or_default();

        let cursor = ModelCursor::new(Some(key.clone()), items);
        let links = self.cursors.entry(key).or_default();
        links.retain(|link| link.strong_count() > 0);
        links.push(cursor.link());
        cursor
    }

    /// Drop cursor bindings (detach).
    pub fn release_cursors(&mut self) {
        self.cursors.clear();
    }

    fn push_to_cursors(&mut self, parent: &ContentId, items: &[ModelChild]) {
        if let Some(links) = self.cursors.get_mut(parent) {
            links.retain(|link| cursor::append(link, items));
        }
    }

    /// Every id this view needs kept: revealed nodes, their tokens, and
    /// everything a pending synthetic token still points at.
    pub fn retained_ids(&self, tree: &ContentTree) -> HashSet<ContentId> {
        let mut ids = HashSet::new();
        ids.extend(self.root.iter().cloned());
        for (id, entries) in &self.containers {
            ids.insert(id.clone());
            for entry in entries {
                if let Entry::Feature(c) | Entry::Token(TokenId::Real(c)) = entry {
                    ids.insert(c.clone());
                }
            }
        }
        ids.extend(self.real.keys().cloned());
        for tracker in self.synthetic.values() {
            for pending in &tracker.pending {
                ids.extend(tree.subtree(pending));
            }
        }
        ids
    }

    pub fn has_synthetic(&self, uuid: &Uuid) -> bool {
        self.synthetic.contains_key(uuid)
    }

    /// Claim a real token for fetching.
    pub fn claim_real_token(&mut self, tree: &ContentTree, id: &ContentId) -> RealTokenState {
        match self.real.get_mut(id) {
            None => RealTokenState::Unknown,
            Some(tracker) if tracker.in_flight => RealTokenState::InFlight,
            Some(tracker) => {
                tracker.in_flight = true;
                RealTokenState::Claimed(ModelToken {
                    id: TokenId::Real(id.clone()),
                    parent: tracker.parent.clone(),
                    continuation: tree.payload(id),
                })
            }
        }
    }

    /// Make a real token resolvable again after a failed fetch.
    pub fn release_real_token(&mut self, id: &ContentId) {
        if let Some(tracker) = self.real.get_mut(id) {
            tracker.in_flight = false;
        }
    }

    /// Reveal the next page behind a synthetic token.
    pub fn resolve_synthetic(&mut self, tree: &ContentTree, uuid: Uuid) -> Option<TokenCompleted> {
        let tracker = self.synthetic.remove(&uuid)?;
        let token = TokenId::Synthetic(uuid);
        self.fresh.clear();
        let entries = self.fill(tree, &tracker.parent, tracker.pending, false);
        Some(self.replace_token(tree, &tracker.parent, &token, entries))
    }

    /// Swap a token entry for the entries of the page it stood for.
    fn replace_token(&mut self, tree: &ContentTree, parent: &ContentId, token: &TokenId, entries: Vec<Entry>) -> TokenCompleted {
        let items: Vec<ModelChild> = entries.iter().map(|e| self.model_child(tree, parent, e)).collect();

        let container = self.containers.entry(parent.clone()).or_default();
        let target = Entry::Token(token.clone());
        match container.iter().position(|e| *e == target) {
            Some(at) => {
                container.splice(at..=at, entries);
            }
            None => container.extend(entries),
        }

        let new_children = items
            .iter()
            .filter_map(|item| item.content_id().cloned())
            .collect();
        let next_token = items.last().and_then(|item| item.as_token().cloned());

        TokenCompleted {
            token: token.clone(),
            parent: parent.clone(),
            items,
            page: PageResult {
                new_children,
                next_token,
            },
        }
    }

    /// Apply the events of one batch to this view.
    ///
    /// `own_page` is set when this view's session requested the page the
    /// batch answers. With `limit_page_updates`, pages requested by other
    /// sessions are not appended here.
    pub fn apply_events(
        &mut self,
        tree: &ContentTree,
        events: &[TreeEvent],
        context: &MutationContext,
        own_page: bool,
        limit_page_updates: bool,
    ) -> ViewDelta {
        self.fresh.clear();
        let mut delta = ViewDelta::default();
        let mut diff = AppliedDiff::default();

        let mut page_parent: Option<ContentId> = None;
        let mut page_members: HashSet<ContentId> = HashSet::new();

        if let Some(token) = &context.continuation_token {
            let parent = self
                .real
                .get(token)
                .map(|t| t.parent.clone())
                .or_else(|| removed_parent(events, token));

            if let Some(parent) = parent {
                if own_page && self.real.contains_key(token) {
                    let children = page_children(events, &parent, token, self.containers.get(&parent));
                    self.real.remove(token);
                    let entries = self.fill(tree, &parent, children.clone(), false);
                    delta.completed = Some(self.replace_token(tree, &parent, &TokenId::Real(token.clone()), entries));
                    page_members.extend(children);
                    page_members.insert(token.clone());
                    page_parent = Some(parent);
                } else if !own_page && limit_page_updates {
                    page_members.extend(page_children(events, &parent, token, None));
                    page_members.insert(token.clone());
                    page_parent = Some(parent);
                }
            }
        }

        let in_page = |parent: &ContentId, child: &ContentId| {
            page_parent.as_ref() == Some(parent) && page_members.contains(child)
        };

        for event in events {
            match event {
                TreeEvent::Appended { parent, child } => {
                    if !in_page(parent, child) {
                        self.append_child(tree, parent, child, &mut diff);
                    }
                }
                TreeEvent::Updated { parent, id, changed } => {
                    if let Some(p) = parent {
                        if in_page(p, id) {
                            continue;
                        }
                        if self.pruned && self.root.as_ref() == Some(p) {
                            self.append_child(tree, p, id, &mut diff);
                        }
                    }
                    if *changed && self.containers.contains_key(id) && !self.fresh.contains(id) {
                        diff.change_mut(id).feature_changed = true;
                    }
                }
                TreeEvent::Removed { parent, child } => {
                    if !in_page(parent, child) {
                        self.remove_child(parent, child, &mut diff);
                    }
                }
                TreeEvent::RootSet { root, replaced: None } if self.root.is_none() => {
                    self.populate(tree, None);
                    let revealed: Vec<ContentId> = self
                        .containers
                        .get(root)
                        .map(|entries| {
                            entries
                                .iter()
                                .filter_map(|e| match e {
                                    Entry::Feature(c) | Entry::Token(TokenId::Real(c)) => Some(c.clone()),
                                    Entry::Token(TokenId::Synthetic(_)) => None,
                                })
                                .collect()
                        })
                        .unwrap_or_default();
                    diff.change_mut(root).appended_children.extend(revealed);
                }
                _ => {}
            }
        }

        delta.changes = diff.changes.into_iter().filter(|c| !c.is_empty()).collect();
        delta
    }

    fn append_child(&mut self, tree: &ContentTree, parent: &ContentId, child: &ContentId, diff: &mut AppliedDiff) {
        if self.fresh.contains(parent) {
            return;
        }
        let Some(entries) = self.containers.get(parent) else {
            return;
        };
        if entries.iter().any(|e| e.refers_to(child)) {
            return;
        }

        if let Some(uuid) = entries.last().and_then(Entry::synthetic) {
            if let Some(tracker) = self.synthetic.get_mut(&uuid) {
                if !tracker.pending.contains(child) {
                    tracker.pending.push(child.clone());
                }
                return;
            }
        }

        let entry = self.reveal_child(tree, parent, child.clone());
        let item = self.model_child(tree, parent, &entry);
        if let Some(entries) = self.containers.get_mut(parent) {
            entries.push(entry);
        }
        diff.change_mut(parent).appended_children.push(child.clone());
        self.push_to_cursors(parent, std::slice::from_ref(&item));
    }

    fn remove_child(&mut self, parent: &ContentId, child: &ContentId, diff: &mut AppliedDiff) {
        if self.fresh.contains(parent) {
            return;
        }
        let Some(entries) = self.containers.get_mut(parent) else {
            return;
        };

        let before = entries.len();
        entries.retain(|e| !e.refers_to(child));
        if entries.len() == before {
            let pending = entries.last().and_then(Entry::synthetic);
            if let Some(tracker) = pending.and_then(|uuid| self.synthetic.get_mut(&uuid)) {
                tracker.pending.retain(|p| p != child);
            }
            return;
        }

        diff.change_mut(parent).removed_children.push(child.clone());
        self.real.remove(child);
        self.forget(child);
    }

    fn is_referenced(&self, id: &ContentId) -> bool {
        self.root.as_ref() == Some(id)
            || self.containers.values().any(|entries| entries.iter().any(|e| e.refers_to(id)))
            || self.synthetic.values().any(|t| t.pending.contains(id))
    }

    /// Drop reveal state below a removed node unless it is still linked
    /// elsewhere in this view.
    fn forget(&mut self, id: &ContentId) {
        if self.is_referenced(id) {
            return;
        }
        self.cursors.remove(id);
        let Some(entries) = self.containers.remove(id) else {
            return;
        };
        for entry in entries {
            match entry {
                Entry::Feature(child) => self.forget(&child),
                Entry::Token(TokenId::Real(token)) => {
                    self.real.remove(&token);
                }
                Entry::Token(TokenId::Synthetic(uuid)) => {
                    self.synthetic.remove(&uuid);
                }
            }
        }
    }
}

fn removed_parent(events: &[TreeEvent], token: &ContentId) -> Option<ContentId> {
    events.iter().find_map(|e| match e {
        TreeEvent::Removed { parent, child } if child == token => Some(parent.clone()),
        _ => None,
    })
}

/// Children a token page adds under `parent`, in batch order, skipping
/// ones already shown in `existing`.
fn page_children(
    events: &[TreeEvent],
    parent: &ContentId,
    token: &ContentId,
    existing: Option<&Vec<Entry>>,
) -> Vec<ContentId> {
    let mut seen = HashSet::new();
    events
        .iter()
        .filter_map(|e| match e {
            TreeEvent::Appended { parent: p, child } if p == parent => Some(child),
            TreeEvent::Updated {
                parent: Some(p), id, ..
            } if p == parent => Some(id),
            _ => None,
        })
        .filter(|c| *c != token)
        .filter(|c| !existing.is_some_and(|entries| entries.iter().any(|e| e.refers_to(c))))
        .filter(|c| seen.insert((*c).clone()))
        .cloned()
        .collect()
}
