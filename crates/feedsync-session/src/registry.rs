//! Registry of live and detached sessions.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use feedsync_core::{ContentId, SessionId, SessionState, UiContext};

use crate::view::SessionView;

#[derive(Debug)]
pub struct SessionRecord {
    pub id: SessionId,
    pub state: SessionState,
    pub view: SessionView,
    pub ui_context: UiContext,
    pub view_depth_hint: Option<ContentId>,
    pub created_at: DateTime<Utc>,
    /// Set while the session is detached
    pub detached_at: Option<DateTime<Utc>>,
    /// Last journal entry reflected in the view
    pub last_seq: u64,
}

impl SessionRecord {
    pub fn new(id: SessionId, view: SessionView, ui_context: UiContext, hint: Option<ContentId>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            state: SessionState::Initializing,
            view,
            ui_context,
            view_depth_hint: hint,
            created_at: now,
            detached_at: None,
            last_seq: 0,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached_at.is_some()
    }

    /// Ready and receiving live broadcasts.
    pub fn is_attached_ready(&self) -> bool {
        self.state == SessionState::Ready && !self.is_detached()
    }

    /// Detached for longer than `lifetime`.
    pub fn is_expired(&self, now: DateTime<Utc>, lifetime: Duration) -> bool {
        self.detached_at.is_some_and(|at| now - at >= lifetime)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionCounts {
    pub initializing: usize,
    pub ready: usize,
    pub detached: usize,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, SessionRecord>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: SessionRecord) {
        self.sessions.insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &SessionId) -> Option<&SessionRecord> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut SessionRecord> {
        self.sessions.get_mut(id)
    }

    pub fn remove(&mut self, id: &SessionId) -> Option<SessionRecord> {
        self.sessions.remove(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Current state; unknown sessions read as invalidated.
    pub fn state(&self, id: &SessionId) -> SessionState {
        self.sessions
            .get(id)
            .map(|r| r.state)
            .unwrap_or(SessionState::Invalidated)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionRecord> {
        self.sessions.values()
    }

    /// Ids of sessions matching `predicate`, sorted for stable iteration.
    pub fn ids_where(&self, predicate: impl Fn(&SessionRecord) -> bool) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|r| predicate(r))
            .map(|r| r.id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn expired(&self, now: DateTime<Utc>, lifetime: Duration) -> Vec<SessionId> {
        self.ids_where(|r| r.is_expired(now, lifetime))
    }

    pub fn counts(&self) -> SessionCounts {
        let mut counts = SessionCounts::default();
        for record in self.sessions.values() {
            if record.is_detached() {
                counts.detached += 1;
            } else if record.state == SessionState::Ready {
                counts.ready += 1;
            } else if record.state == SessionState::Initializing {
                counts.initializing += 1;
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
