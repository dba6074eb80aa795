//! Tracks the single outstanding initial request and the sessions waiting
//! on it.
//!
//! Fetch completion and deadline expiry arrive as separate tasks on the
//! engine queue. Whichever is handled first moves a waiting session out of
//! `Initializing`; the other finds nothing left to do.

use std::fmt;

use tracing::{debug, info, warn};

use feedsync_core::{
    FetchError, MutationBatch, MutationContext, RequestReason, SessionId, SessionState,
};

use crate::manager::SessionManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// How a session waits on the outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Already showing content; the response is appended
    Append,
    /// Stays `Initializing` until the response arrives
    Blocking,
    /// Stays `Initializing` until the response or the deadline
    Deadline,
}

#[derive(Debug, Clone)]
pub struct Waiter {
    pub session: SessionId,
    pub mode: WaitMode,
    /// The deadline fired first and the session is showing cached content
    pub released: bool,
}

impl Waiter {
    fn shows_content(&self) -> bool {
        self.mode == WaitMode::Append || self.released
    }
}

#[derive(Debug)]
struct OutstandingRequest {
    id: RequestId,
    reason: RequestReason,
    waiters: Vec<Waiter>,
}

#[derive(Debug, Default)]
pub struct RefreshCoordinator {
    next_id: u64,
    outstanding: Option<OutstandingRequest>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> Option<RequestId> {
        self.outstanding.as_ref().map(|r| r.id)
    }

    /// Start a request unless one is already outstanding.
    pub fn begin(&mut self, reason: RequestReason) -> Option<RequestId> {
        if self.outstanding.is_some() {
            return None;
        }
        self.next_id += 1;
        let id = RequestId(self.next_id);
        info!(request = %id, ?reason, "initial request started");
        self.outstanding = Some(OutstandingRequest {
            id,
            reason,
            waiters: Vec::new(),
        });
        Some(id)
    }

    /// Attach a session to the outstanding request.
    pub fn join(&mut self, session: SessionId, mode: WaitMode) -> Option<RequestId> {
        let request = self.outstanding.as_mut()?;
        debug!(request = %request.id, session = %session, ?mode, "session joined request");
        request.waiters.push(Waiter {
            session,
            mode,
            released: false,
        });
        Some(request.id)
    }

    /// Deadline for `session` fired. Returns `true` if the session was still
    /// waiting on `request`.
    pub fn release(&mut self, request: RequestId, session: &SessionId) -> bool {
        let Some(outstanding) = self.outstanding.as_mut().filter(|r| r.id == request) else {
            return false;
        };
        match outstanding
            .waiters
            .iter_mut()
            .find(|w| &w.session == session && w.mode == WaitMode::Deadline && !w.released)
        {
            Some(waiter) => {
                waiter.released = true;
                true
            }
            None => false,
        }
    }

    /// Close `request`, handing back its waiters. `None` for a stale id.
    pub fn complete(&mut self, request: RequestId) -> Option<Vec<Waiter>> {
        if self.outstanding.as_ref().map(|r| r.id) != Some(request) {
            return None;
        }
        self.outstanding.take().map(|r| {
            debug!(request = %r.id, reason = ?r.reason, waiters = r.waiters.len(), "initial request completed");
            r.waiters
        })
    }
}

/// Apply an initial-request outcome and move its waiters to `Ready`.
pub(crate) fn resolve(
    manager: &mut SessionManager,
    waiters: &[Waiter],
    result: Result<MutationBatch, FetchError>,
) {
    let appending = waiters
        .iter()
        .any(|w| w.shows_content() && manager.session_state(&w.session) == SessionState::Ready);

    let failed = match result {
        Ok(batch) => {
            if appending {
                manager.apply_append(batch, MutationContext::new());
            } else {
                manager.apply(batch, MutationContext::new());
            }
            false
        }
        Err(e) => {
            warn!(error = %e, "initial request failed");
            true
        }
    };

    for waiter in waiters {
        if manager.session_state(&waiter.session) == SessionState::Initializing {
            manager.populate_session(&waiter.session, false);
        }
        if failed && !manager.has_content() && manager.session_state(&waiter.session).is_ready() {
            manager.report_no_cards(&waiter.session, "initial request failed and no content is cached");
        }
    }
}

/// The deadline for a waiting session elapsed before the response.
pub(crate) fn timed_out(
    manager: &mut SessionManager,
    coordinator: &mut RefreshCoordinator,
    request: RequestId,
    session: &SessionId,
) {
    if !coordinator.release(request, session) {
        return;
    }
    if manager.session_state(session) == SessionState::Initializing {
        info!(request = %request, session = %session, "request deadline elapsed; showing cached content");
        manager.populate_session(session, false);
    }
}
