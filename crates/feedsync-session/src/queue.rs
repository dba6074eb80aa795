//! Single-writer task queue.
//!
//! Every mutation of engine state that originates off the caller's thread
//! (fetch responses, deadlines, page failures) is sent here and handled by
//! one worker task in arrival order.

use std::sync::Weak;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use feedsync_core::{
    AppliedDiff, ContentId, Error, FetchError, MutationBatch, MutationContext, Result, SessionId,
};

use crate::engine::EngineShared;
use crate::gc::GcReport;
use crate::refresh::{self, RequestId};

pub(crate) enum Task {
    Apply {
        batch: MutationBatch,
        context: MutationContext,
        /// Apply on top of the current root instead of replacing it
        append: bool,
        ack: Option<oneshot::Sender<AppliedDiff>>,
    },
    InitialFetchCompleted {
        request: RequestId,
        result: std::result::Result<MutationBatch, FetchError>,
    },
    RequestTimedOut {
        request: RequestId,
        session: SessionId,
    },
    TokenFetchFailed {
        session: SessionId,
        token: ContentId,
        error: FetchError,
    },
    CollectGarbage {
        ack: oneshot::Sender<GcReport>,
    },
    /// Respond once every earlier task has been handled.
    Barrier {
        ack: oneshot::Sender<()>,
    },
}

/// Acknowledgement sent after the task's notifications are dispatched.
enum Reply {
    Diff(oneshot::Sender<AppliedDiff>, AppliedDiff),
    Gc(oneshot::Sender<GcReport>, GcReport),
    Done(oneshot::Sender<()>),
}

impl Reply {
    fn send(self) {
        // The caller may have stopped waiting; nothing to do then.
        match self {
            Reply::Diff(ack, diff) => {
                let _ = ack.send(diff);
            }
            Reply::Gc(ack, report) => {
                let _ = ack.send(report);
            }
            Reply::Done(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

#[derive(Clone)]
pub(crate) struct TaskQueue {
    tx: mpsc::UnboundedSender<Task>,
}

impl TaskQueue {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Task>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, task: Task) -> Result<()> {
        self.tx.send(task).map_err(|_| Error::EngineShutDown)
    }
}

/// Worker loop. Ends when the engine is dropped.
pub(crate) async fn run(shared: Weak<EngineShared>, mut rx: mpsc::UnboundedReceiver<Task>) {
    while let Some(task) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };

        let (reply, notifications) = {
            let mut state = shared.state.lock();
            let reply = handle(&mut state, task);
            let notifications = state.manager.take_notifications();
            (reply, notifications)
        };

        for notification in notifications {
            notification.dispatch();
        }
        if let Some(reply) = reply {
            reply.send();
        }
    }
    debug!("engine task queue closed");
}

fn handle(state: &mut crate::engine::EngineState, task: Task) -> Option<Reply> {
    let crate::engine::EngineState { manager, refresh: coordinator } = state;

    match task {
        Task::Apply {
            batch,
            context,
            append,
            ack,
        } => {
            let diff = if append {
                manager.apply_append(batch, context)
            } else {
                manager.apply(batch, context)
            };
            ack.map(|ack| Reply::Diff(ack, diff))
        }
        Task::InitialFetchCompleted { request, result } => {
            match coordinator.complete(request) {
                Some(waiters) => refresh::resolve(manager, &waiters, result),
                None => debug!(request = %request, "ignoring response for a closed request"),
            }
            None
        }
        Task::RequestTimedOut { request, session } => {
            refresh::timed_out(manager, coordinator, request, &session);
            None
        }
        Task::TokenFetchFailed {
            session,
            token,
            error,
        } => {
            manager.token_fetch_failed(&session, &token, &error);
            None
        }
        Task::CollectGarbage { ack } => Some(Reply::Gc(ack, manager.collect_garbage())),
        Task::Barrier { ack } => Some(Reply::Done(ack)),
    }
}
