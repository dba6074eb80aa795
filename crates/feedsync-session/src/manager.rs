//! The synchronous core: owns the content tree and every session view.
//!
//! All methods run on the engine's single writer. Observer notifications are
//! collected in an outbox and dispatched by the caller after it releases the
//! engine lock.

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{debug, info, warn};

use feedsync_core::{
    AppliedDiff, Clock, Config, ContentId, ContentNode, Error, FetchError, ModelError, ModelToken,
    MutationBatch, MutationContext, NodeKind, Operation, PageResult, Result, SemanticProperties,
    SessionId, SessionState, SharedState, TokenId, UiContext,
};

use crate::applier::{apply_operations, TreeEvent};
use crate::cursor::ModelCursor;
use crate::gc::{GarbageCollector, GcReport};
use crate::journal::MutationJournal;
use crate::observers::{
    FeatureChangeObserver, Notification, ObserverId, ObserverRegistry, RemoveTracking,
    SessionObserver, TokenCompletedObserver,
};
use crate::pager::{PagingPolicy, TokenPager};
use crate::registry::{SessionCounts, SessionRecord, SessionRegistry};
use crate::store::PayloadStore;
use crate::tree::ContentTree;
use crate::view::{RealTokenState, SessionView, ViewDelta};

/// What resolving a token requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenResolution {
    /// Synthetic token revealed locally
    Completed(PageResult),
    /// Real token claimed; the caller must fetch the page
    Fetch {
        token: ModelToken,
        consistency_token: Option<Vec<u8>>,
    },
    /// A fetch for this token is already running
    InFlight,
}

/// Cumulative engine counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub commits: u64,
    pub token_commits: u64,
    pub update_commits: u64,
    pub removed_children: u64,
    pub anomalies: u64,
    pub gc_passes: u64,
    pub evicted_nodes: u64,
    pub cursors_created: u64,
    pub sessions_created: u64,
    pub sessions_finished: u64,
}

/// Snapshot of engine state for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct EngineDump {
    pub epoch: u64,
    pub root: Option<String>,
    pub node_count: usize,
    pub orphan_count: usize,
    pub shared_states: usize,
    pub sessions: SessionCounts,
    pub journal_len: usize,
    pub observers: usize,
    pub has_consistency_token: bool,
    pub stats: EngineStats,
}

pub struct SessionManager {
    config: Config,
    pager: TokenPager,
    tree: ContentTree,
    registry: SessionRegistry,
    journal: MutationJournal,
    observers: ObserverRegistry,
    store: Arc<dyn PayloadStore>,
    clock: Arc<dyn Clock>,
    remove_tracking: Option<Arc<dyn RemoveTracking>>,
    outbox: Vec<Notification>,
    consistency_token: Option<Vec<u8>>,
    stats: EngineStats,
}

impl SessionManager {
    pub fn new(config: Config, store: Arc<dyn PayloadStore>, clock: Arc<dyn Clock>) -> Self {
        let pager = TokenPager::new(PagingPolicy::from_config(&config.paging));
        Self {
            config,
            pager,
            tree: ContentTree::new(),
            registry: SessionRegistry::new(),
            journal: MutationJournal::new(),
            observers: ObserverRegistry::default(),
            store,
            clock,
            remove_tracking: None,
            outbox: Vec::new(),
            consistency_token: None,
            stats: EngineStats::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn set_remove_tracking(&mut self, tracker: Option<Arc<dyn RemoveTracking>>) {
        self.remove_tracking = tracker;
    }

    /// Whether the tree has a root with at least one child.
    pub fn has_content(&self) -> bool {
        self.tree
            .root()
            .is_some_and(|root| !self.tree.children(root).is_empty())
    }

    pub fn tree(&self) -> &ContentTree {
        &self.tree
    }

    fn notify(&mut self, notification: Notification) {
        if notification.has_audience() {
            self.outbox.push(notification);
        }
    }

    pub(crate) fn take_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.outbox)
    }

    // ---- mutations ----

    /// Apply a batch to the tree, update sessions and collect garbage.
    pub fn apply(&mut self, batch: MutationBatch, context: MutationContext) -> AppliedDiff {
        let outcome = apply_operations(&mut self.tree, &batch.operations, self.store.as_ref());
        let diff = outcome.diff.clone();

        self.stats.commits += 1;
        if context.is_token_page() {
            self.stats.token_commits += 1;
        } else if !diff.started_new_epoch() {
            self.stats.update_commits += 1;
        }
        self.stats.anomalies += diff.anomalies.len() as u64;
        self.stats.removed_children += outcome
            .events
            .iter()
            .filter(|e| matches!(e, TreeEvent::Removed { .. }))
            .count() as u64;

        if let Some(token) = batch.consistency_token {
            self.consistency_token = Some(token);
        }

        debug!(
            operations = batch.operations.len(),
            events = outcome.events.len(),
            anomalies = diff.anomalies.len(),
            "applied mutation batch"
        );

        self.track_removals(&outcome.events, &context);

        if diff.started_new_epoch() {
            let reason = if diff.cleared { "cleared" } else { "root replaced" };
            info!(epoch = self.tree.epoch(), reason, "content tree started a new epoch");
            self.journal.clear();
            for id in self
                .registry
                .ids_where(|r| r.state == SessionState::Ready || r.is_detached())
            {
                self.finish_session(&id, None, reason);
            }
        } else if !outcome.events.is_empty() {
            let seq = self.journal.append(outcome.events.clone(), context.clone());
            for id in self.registry.ids_where(SessionRecord::is_attached_ready) {
                self.broadcast(&id, &outcome.events, &context, seq);
            }
        }

        self.collect_garbage();
        diff
    }

    /// Apply a refresh response on top of content a session is already
    /// showing: no clear, and the response root maps onto the current root.
    pub fn apply_append(&mut self, batch: MutationBatch, context: MutationContext) -> AppliedDiff {
        let MutationBatch {
            operations,
            consistency_token,
        } = batch;

        let Some(root) = self.tree.root().cloned() else {
            let operations = operations.into_iter().filter(|op| !op.is_clear_all()).collect();
            return self.apply(
                MutationBatch {
                    operations,
                    consistency_token,
                },
                context,
            );
        };

        let response_root = operations.iter().find_map(|op| match op {
            Operation::AddFeature { parent: None, node } => Some(node.id.clone()),
            _ => None,
        });
        let remap = |id: ContentId| {
            if response_root.as_ref() == Some(&id) {
                root.clone()
            } else {
                id
            }
        };

        let operations = operations
            .into_iter()
            .filter_map(|op| match op {
                Operation::ClearAll | Operation::AddFeature { parent: None, .. } => None,
                Operation::AddFeature {
                    parent: Some(parent),
                    node,
                } => Some(Operation::AddFeature {
                    parent: Some(remap(parent)),
                    node,
                }),
                Operation::RemoveFeature { child, parent } => Some(Operation::RemoveFeature {
                    child,
                    parent: remap(parent),
                }),
                other => Some(other),
            })
            .collect();

        debug!(root = %root, "applying refresh response in append mode");
        self.apply(
            MutationBatch {
                operations,
                consistency_token,
            },
            context,
        )
    }

    fn broadcast(&mut self, id: &SessionId, events: &[TreeEvent], context: &MutationContext, seq: u64) {
        let limit = self.config.session.limit_page_updates;
        let Some(record) = self.registry.get_mut(id) else {
            return;
        };
        let own_page = context.requesting_session_id.as_ref() == Some(id);
        let delta = record.view.apply_events(&self.tree, events, context, own_page, limit);
        record.last_seq = seq;
        self.emit_delta(id, delta);
    }

    fn emit_delta(&mut self, id: &SessionId, delta: ViewDelta) {
        for change in delta.changes {
            let observers = self.observers.feature_observers(id, &change.content_id);
            self.notify(Notification::FeatureChanged { observers, change });
        }
        if let Some(completed) = delta.completed {
            let observers = self.observers.take_token_observers(id, &completed.token);
            self.notify(Notification::TokenCompleted { observers, completed });
        }
    }

    fn track_removals(&mut self, events: &[TreeEvent], context: &MutationContext) {
        if !context.user_initiated {
            return;
        }
        let Some(tracker) = self.remove_tracking.clone() else {
            return;
        };

        let mut removed: Vec<ContentId> = Vec::new();
        for event in events {
            if let TreeEvent::Removed { child, .. } = event {
                for id in self.tree.subtree(child) {
                    if self.tree.kind(&id) == Some(NodeKind::Feature) && !removed.contains(&id) {
                        removed.push(id);
                    }
                }
            }
        }
        if !removed.is_empty() {
            self.notify(Notification::Removed {
                tracker,
                context: context.clone(),
                removed,
            });
        }
    }

    // ---- session lifecycle ----

    /// Register a new session in `Initializing`.
    pub fn create_session(&mut self, view_depth_hint: Option<ContentId>, ui_context: UiContext) -> SessionId {
        let id = SessionId::new();
        let record = SessionRecord::new(
            id.clone(),
            SessionView::new(self.pager),
            ui_context,
            view_depth_hint,
            self.clock.now(),
        );
        self.registry.insert(record);
        self.stats.sessions_created += 1;
        debug!(session = %id, "session created");
        id
    }

    /// Reveal the first page and move an initializing session to `Ready`.
    pub fn populate_session(&mut self, id: &SessionId, prune: bool) {
        let last_seq = self.journal.last_seq();
        let Some(record) = self.registry.get_mut(id) else {
            return;
        };
        if record.state != SessionState::Initializing {
            return;
        }

        let hint = if prune { record.view_depth_hint.clone() } else { None };
        record.view.populate(&self.tree, hint.as_ref());
        record.state = SessionState::Ready;
        record.last_seq = last_seq;
        let ui_context = record.ui_context.clone();
        info!(session = %id, "session ready");

        let observers = self.observers.session_observers(id);
        self.notify(Notification::SessionStarted { observers, ui_context });
    }

    /// Reattach a detached session, replaying what it missed.
    pub fn restore_session(&mut self, id: &SessionId) -> SessionState {
        let now = self.clock.now();
        let lifetime = self.session_lifetime();
        let limit = self.config.session.limit_page_updates;

        let Some(record) = self.registry.get_mut(id) else {
            debug!(session = %id, "restore of unknown session");
            return SessionState::Invalidated;
        };
        if !record.is_detached() {
            return record.state;
        }
        if record.is_expired(now, lifetime) {
            self.registry.remove(id);
            self.observers.remove_session(id);
            debug!(session = %id, "restore of expired session");
            return SessionState::Invalidated;
        }

        let mut replayed = 0;
        if record.state == SessionState::Ready {
            for entry in self.journal.since(record.last_seq) {
                let own_page = entry.context.requesting_session_id.as_ref() == Some(id);
                record
                    .view
                    .apply_events(&self.tree, &entry.events, &entry.context, own_page, limit);
                record.last_seq = entry.seq;
                replayed += 1;
            }
        }
        record.detached_at = None;
        let state = record.state;
        info!(session = %id, replayed, "session restored");

        self.collect_garbage();
        state
    }

    /// Stop live updates; keep reveal progress for later restore.
    pub fn detach_session(&mut self, id: &SessionId) {
        let now = self.clock.now();
        let Some(record) = self.registry.get_mut(id) else {
            return;
        };
        if record.is_detached() {
            return;
        }
        record.detached_at = Some(now);
        record.view.release_cursors();
        self.observers.remove_session(id);
        info!(session = %id, "session detached");
    }

    /// Terminal. Fires `on_session_finished` once; later calls do nothing.
    pub fn invalidate_session(&mut self, id: &SessionId, ui_context: Option<UiContext>) -> bool {
        let finished = self.finish_session(id, ui_context, "invalidated");
        if finished {
            self.collect_garbage();
        }
        finished
    }

    fn finish_session(&mut self, id: &SessionId, ui_context: Option<UiContext>, reason: &str) -> bool {
        let Some(record) = self.registry.remove(id) else {
            return false;
        };
        let ui_context = ui_context.unwrap_or(record.ui_context);
        let observers = self.observers.session_observers(id);
        self.observers.remove_session(id);
        self.stats.sessions_finished += 1;
        info!(session = %id, reason, "session finished");
        self.notify(Notification::SessionFinished { observers, ui_context });
        true
    }

    pub fn session_state(&self, id: &SessionId) -> SessionState {
        self.registry.state(id)
    }

    pub fn is_detached(&self, id: &SessionId) -> bool {
        self.registry.get(id).is_some_and(SessionRecord::is_detached)
    }

    /// Raise `NoCards` on a session's observers.
    pub fn report_no_cards(&mut self, id: &SessionId, message: &str) {
        let observers = self.observers.session_observers(id);
        self.notify(Notification::SessionError {
            observers,
            error: ModelError::no_cards(message),
        });
    }

    // ---- observers ----

    pub fn register_observer(&mut self, id: &SessionId, observer: Arc<dyn SessionObserver>) -> ObserverId {
        let Some(record) = self.registry.get(id) else {
            self.notify(Notification::SessionFinished {
                observers: vec![observer],
                ui_context: UiContext::default(),
            });
            return self.observers.allocate();
        };

        let state = record.state;
        let ui_context = record.ui_context.clone();
        let observer_id = self.observers.add_session(id, Arc::clone(&observer));
        if state == SessionState::Ready {
            self.notify(Notification::SessionStarted {
                observers: vec![observer],
                ui_context,
            });
        }
        observer_id
    }

    pub fn register_feature_observer(
        &mut self,
        id: &SessionId,
        content_id: &ContentId,
        observer: Arc<dyn FeatureChangeObserver>,
    ) -> ObserverId {
        if !self.registry.contains(id) {
            return self.observers.allocate();
        }
        self.observers.add_feature(id, content_id, observer)
    }

    pub fn register_token_observer(
        &mut self,
        id: &SessionId,
        token: &TokenId,
        observer: Arc<dyn TokenCompletedObserver>,
    ) -> ObserverId {
        if !self.registry.contains(id) {
            return self.observers.allocate();
        }
        self.observers.add_token(id, token, observer)
    }

    pub fn unregister_observer(&mut self, id: &SessionId, observer: ObserverId) -> bool {
        self.observers.remove(id, observer)
    }

    // ---- reading ----

    /// Cursor over the children of `parent` (the root when `None`).
    pub fn cursor(&mut self, id: &SessionId, parent: Option<&ContentId>) -> Result<ModelCursor> {
        let record = self
            .registry
            .get_mut(id)
            .ok_or_else(|| Error::SessionInvalidated(id.clone()))?;
        if record.state == SessionState::Initializing {
            return Err(Error::SessionNotReady(id.clone()));
        }
        self.stats.cursors_created += 1;
        Ok(record.view.cursor(&self.tree, parent))
    }

    /// Root node of the session's view, with its current payload.
    pub fn root_feature(&self, id: &SessionId) -> Option<ContentNode> {
        let record = self.registry.get(id)?;
        let root = record.view.root()?;
        let payload = self.tree.payload(root)?;
        Some(ContentNode::feature(root.clone(), payload.as_ref().clone()))
    }

    pub fn resolve_token(&mut self, id: &SessionId, token: &TokenId) -> Result<TokenResolution> {
        let record = self
            .registry
            .get_mut(id)
            .ok_or_else(|| Error::SessionInvalidated(id.clone()))?;
        if record.state == SessionState::Initializing {
            return Err(Error::SessionNotReady(id.clone()));
        }

        match token {
            TokenId::Synthetic(uuid) => match record.view.resolve_synthetic(&self.tree, *uuid) {
                Some(completed) => {
                    let page = completed.page.clone();
                    debug!(session = %id, token = %token, revealed = page.new_children.len(), "resolved synthetic token");
                    self.emit_delta(
                        id,
                        ViewDelta {
                            changes: Vec::new(),
                            completed: Some(completed),
                        },
                    );
                    Ok(TokenResolution::Completed(page))
                }
                None => {
                    warn!(session = %id, token = %token, "unknown synthetic token");
                    let observers = self.observers.take_token_observers(id, token);
                    self.notify(Notification::TokenFailed {
                        observers,
                        error: ModelError::synthetic(token.clone()),
                    });
                    Err(Error::UnknownToken {
                        session: id.clone(),
                        token: token.clone(),
                    })
                }
            },
            TokenId::Real(content_id) => match record.view.claim_real_token(&self.tree, content_id) {
                RealTokenState::Claimed(model_token) => Ok(TokenResolution::Fetch {
                    token: model_token,
                    consistency_token: self.consistency_token.clone(),
                }),
                RealTokenState::InFlight => Ok(TokenResolution::InFlight),
                RealTokenState::Unknown => {
                    warn!(session = %id, token = %token, "unknown real token");
                    Err(Error::UnknownToken {
                        session: id.clone(),
                        token: token.clone(),
                    })
                }
            },
        }
    }

    /// A page fetch failed: raise `PaginationError` and make the token
    /// resolvable again.
    pub fn token_fetch_failed(&mut self, id: &SessionId, token: &ContentId, error: &FetchError) {
        warn!(session = %id, token = %token, error = %error, "page fetch failed");
        if let Some(record) = self.registry.get_mut(id) {
            record.view.release_real_token(token);
        }
        let token = TokenId::Real(token.clone());
        let observers = self.observers.take_token_observers(id, &token);
        self.notify(Notification::TokenFailed {
            observers,
            error: ModelError::pagination(token, error.to_string()),
        });
    }

    pub fn shared_state(&self, id: &ContentId) -> Option<SharedState> {
        self.tree.shared_state(id).cloned()
    }

    pub fn payloads(&self, ids: &[ContentId]) -> Result<Vec<ContentNode>> {
        self.store
            .get_payloads(ids)
            .map_err(|e| Error::store(e.to_string()))
    }

    pub fn semantic_properties(&self, ids: &[ContentId]) -> Result<Vec<SemanticProperties>> {
        self.store
            .get_semantic_properties(ids)
            .map_err(|e| Error::store(e.to_string()))
    }

    // ---- maintenance ----

    fn session_lifetime(&self) -> Duration {
        Duration::milliseconds(i64::try_from(self.config.session.session_lifetime_ms).unwrap_or(i64::MAX))
    }

    pub fn collect_garbage(&mut self) -> GcReport {
        let now = self.clock.now();
        let lifetime = self.session_lifetime();
        let report = GarbageCollector {
            tree: &mut self.tree,
            registry: &mut self.registry,
            journal: &mut self.journal,
            store: self.store.as_ref(),
        }
        .collect(now, lifetime);

        for id in &report.expired_sessions {
            self.observers.remove_session(id);
        }
        self.stats.gc_passes += 1;
        self.stats.evicted_nodes += report.evicted.len() as u64;
        report
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn dump(&self) -> EngineDump {
        EngineDump {
            epoch: self.tree.epoch(),
            root: self.tree.root().map(ToString::to_string),
            node_count: self.tree.len(),
            orphan_count: self.tree.orphan_count(),
            shared_states: self.tree.shared_state_count(),
            sessions: self.registry.counts(),
            journal_len: self.journal.len(),
            observers: self.observers.count(),
            has_consistency_token: self.consistency_token.is_some(),
            stats: self.stats.clone(),
        }
    }
}
