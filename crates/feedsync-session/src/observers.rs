//! Observer traits and the registry that routes notifications to them.
//!
//! The engine never calls an observer while holding its own lock. Work that
//! produces notifications queues [`Notification`] values, and the caller
//! dispatches them once the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use feedsync_core::{ContentId, FeatureChange, ModelError, MutationContext, SessionId, TokenId, UiContext};

use crate::cursor::TokenCompleted;

/// Lifecycle observer for one session.
pub trait SessionObserver: Send + Sync {
    fn on_session_start(&self, ui_context: &UiContext);

    fn on_session_finished(&self, ui_context: &UiContext);

    fn on_error(&self, _error: &ModelError) {}
}

/// Receives changes to one feature as seen by one session.
pub trait FeatureChangeObserver: Send + Sync {
    fn on_change(&self, change: &FeatureChange);
}

/// Receives the outcome of resolving one token.
pub trait TokenCompletedObserver: Send + Sync {
    fn on_token_completed(&self, completed: &TokenCompleted);

    fn on_error(&self, error: &ModelError);
}

/// Host hook for content removed by user action.
pub trait RemoveTracking: Send + Sync {
    fn on_removed(&self, context: &MutationContext, removed: &[ContentId]);
}

/// Handle returned by observer registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Entries<T> = Vec<(ObserverId, Arc<T>)>;

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: u64,
    sessions: HashMap<SessionId, Entries<dyn SessionObserver>>,
    features: HashMap<(SessionId, ContentId), Entries<dyn FeatureChangeObserver>>,
    tokens: HashMap<(SessionId, TokenId), Entries<dyn TokenCompletedObserver>>,
}

impl ObserverRegistry {
    pub fn allocate(&mut self) -> ObserverId {
        self.next_id += 1;
        ObserverId(self.next_id)
    }

    pub fn add_session(&mut self, session: &SessionId, observer: Arc<dyn SessionObserver>) -> ObserverId {
        let id = self.allocate();
        self.sessions.entry(session.clone()).or_default().push((id, observer));
        id
    }

    pub fn add_feature(
        &mut self,
        session: &SessionId,
        content_id: &ContentId,
        observer: Arc<dyn FeatureChangeObserver>,
    ) -> ObserverId {
        let id = self.allocate();
        self.features
            .entry((session.clone(), content_id.clone()))
            .or_default()
            .push((id, observer));
        id
    }

    pub fn add_token(
        &mut self,
        session: &SessionId,
        token: &TokenId,
        observer: Arc<dyn TokenCompletedObserver>,
    ) -> ObserverId {
        let id = self.allocate();
        self.tokens
            .entry((session.clone(), token.clone()))
            .or_default()
            .push((id, observer));
        id
    }

    /// Remove one registration of any kind. Returns whether it existed.
    pub fn remove(&mut self, session: &SessionId, observer: ObserverId) -> bool {
        fn drop_from<K, T: ?Sized>(
            map: &mut HashMap<K, Entries<T>>,
            skip: impl Fn(&K) -> bool,
            observer: ObserverId,
        ) -> bool
        where
            K: std::hash::Hash + Eq,
        {
            let mut removed = false;
            for (key, entries) in map.iter_mut() {
                if skip(key) {
                    continue;
                }
                let before = entries.len();
                entries.retain(|(id, _)| *id != observer);
                removed |= entries.len() != before;
            }
            map.retain(|_, entries| !entries.is_empty());
            removed
        }

        drop_from(&mut self.sessions, |k| k != session, observer)
            | drop_from(&mut self.features, |(s, _)| s != session, observer)
            | drop_from(&mut self.tokens, |(s, _)| s != session, observer)
    }

    /// Forget every registration for a session.
    pub fn remove_session(&mut self, session: &SessionId) {
        self.sessions.remove(session);
        self.features.retain(|(s, _), _| s != session);
        self.tokens.retain(|(s, _), _| s != session);
    }

    pub fn session_observers(&self, session: &SessionId) -> Vec<Arc<dyn SessionObserver>> {
        self.sessions
            .get(session)
            .map(|entries| entries.iter().map(|(_, o)| Arc::clone(o)).collect())
            .unwrap_or_default()
    }

    pub fn feature_observers(&self, session: &SessionId, content_id: &ContentId) -> Vec<Arc<dyn FeatureChangeObserver>> {
        self.features
            .get(&(session.clone(), content_id.clone()))
            .map(|entries| entries.iter().map(|(_, o)| Arc::clone(o)).collect())
            .unwrap_or_default()
    }

    /// Take the observers of a token; each fires at most once.
    pub fn take_token_observers(&mut self, session: &SessionId, token: &TokenId) -> Vec<Arc<dyn TokenCompletedObserver>> {
        self.tokens
            .remove(&(session.clone(), token.clone()))
            .map(|entries| entries.into_iter().map(|(_, o)| o).collect())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.sessions.values().map(Vec::len).sum::<usize>()
            + self.features.values().map(Vec::len).sum::<usize>()
            + self.tokens.values().map(Vec::len).sum::<usize>()
    }
}

/// A callback to run after the engine lock is released.
pub(crate) enum Notification {
    SessionStarted {
        observers: Vec<Arc<dyn SessionObserver>>,
        ui_context: UiContext,
    },
    SessionFinished {
        observers: Vec<Arc<dyn SessionObserver>>,
        ui_context: UiContext,
    },
    SessionError {
        observers: Vec<Arc<dyn SessionObserver>>,
        error: ModelError,
    },
    FeatureChanged {
        observers: Vec<Arc<dyn FeatureChangeObserver>>,
        change: FeatureChange,
    },
    TokenCompleted {
        observers: Vec<Arc<dyn TokenCompletedObserver>>,
        completed: TokenCompleted,
    },
    TokenFailed {
        observers: Vec<Arc<dyn TokenCompletedObserver>>,
        error: ModelError,
    },
    Removed {
        tracker: Arc<dyn RemoveTracking>,
        context: MutationContext,
        removed: Vec<ContentId>,
    },
}

impl Notification {
    pub fn dispatch(self) {
        match self {
            Notification::SessionStarted { observers, ui_context } => {
                observers.iter().for_each(|o| o.on_session_start(&ui_context));
            }
            Notification::SessionFinished { observers, ui_context } => {
                observers.iter().for_each(|o| o.on_session_finished(&ui_context));
            }
            Notification::SessionError { observers, error } => {
                observers.iter().for_each(|o| o.on_error(&error));
            }
            Notification::FeatureChanged { observers, change } => {
                observers.iter().for_each(|o| o.on_change(&change));
            }
            Notification::TokenCompleted { observers, completed } => {
                observers.iter().for_each(|o| o.on_token_completed(&completed));
            }
            Notification::TokenFailed { observers, error } => {
                observers.iter().for_each(|o| o.on_error(&error));
            }
            Notification::Removed {
                tracker,
                context,
                removed,
            } => tracker.on_removed(&context, &removed),
        }
    }

    /// Whether dispatching would reach anyone.
    pub fn has_audience(&self) -> bool {
        match self {
            Notification::SessionStarted { observers, .. }
            | Notification::SessionFinished { observers, .. }
            | Notification::SessionError { observers, .. } => !observers.is_empty(),
            Notification::FeatureChanged { observers, .. } => !observers.is_empty(),
            Notification::TokenCompleted { observers, .. } | Notification::TokenFailed { observers, .. } => {
                !observers.is_empty()
            }
            Notification::Removed { .. } => true,
        }
    }
}
