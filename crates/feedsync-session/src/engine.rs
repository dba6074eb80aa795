//! Async front of the engine.
//!
//! [`FeedEngine`] owns a [`SessionManager`] behind a lock and a worker task
//! that drains the [`TaskQueue`]. Host I/O (initial fetches, page fetches,
//! deadlines) runs on spawned tasks which report back through the queue.
//! Observer callbacks always run after the lock is released.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info};

use feedsync_core::{
    AppliedDiff, Clock, Config, ContentFetcher, ContentId, ContentNode, Error, FixedPolicy,
    ModelError, ModelToken, MutationBatch, MutationContext, PageResult, RefreshPolicy,
    RequestBehavior, RequestReason, Result, SemanticProperties, SessionId, SessionState,
    SharedState, SystemClock, TokenId, UiContext,
};

use crate::cursor::{ModelCursor, TokenCompleted};
use crate::gc::GcReport;
use crate::manager::{EngineDump, SessionManager, TokenResolution};
use crate::observers::{
    FeatureChangeObserver, ObserverId, RemoveTracking, SessionObserver, TokenCompletedObserver,
};
use crate::queue::{self, Task, TaskQueue};
use crate::refresh::{RefreshCoordinator, RequestId, WaitMode};
use crate::store::{InMemoryPayloadStore, PayloadStore, SqlitePayloadStore};

pub(crate) struct EngineState {
    pub(crate) manager: SessionManager,
    pub(crate) refresh: RefreshCoordinator,
}

pub(crate) struct EngineShared {
    pub(crate) state: Mutex<EngineState>,
    queue: TaskQueue,
    fetcher: Arc<dyn ContentFetcher>,
    policy: Arc<dyn RefreshPolicy>,
    timeout: Duration,
}

impl EngineShared {
    /// Run `f` under the lock, then dispatch what it produced.
    fn with_manager<R>(&self, f: impl FnOnce(&mut SessionManager) -> R) -> R {
        let (result, notifications) = {
            let mut state = self.state.lock();
            let result = f(&mut state.manager);
            (result, state.manager.take_notifications())
        };
        for notification in notifications {
            notification.dispatch();
        }
        result
    }

    fn spawn_initial_fetch(&self, request: RequestId, reason: RequestReason) {
        let fetcher = Arc::clone(&self.fetcher);
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch_initial(reason).await;
            if queue.send(Task::InitialFetchCompleted { request, result }).is_err() {
                debug!(request = %request, "engine shut down before the initial response arrived");
            }
        });
    }

    fn spawn_deadline(&self, request: RequestId, session: SessionId) {
        let queue = self.queue.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if queue.send(Task::RequestTimedOut { request, session }).is_err() {
                debug!(request = %request, "engine shut down before the deadline fired");
            }
        });
    }

    fn spawn_page_fetch(
        &self,
        session: SessionId,
        token_id: ContentId,
        token: ModelToken,
        consistency_token: Option<Vec<u8>>,
    ) {
        let fetcher = Arc::clone(&self.fetcher);
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let page_session = session.clone();
            let task = match fetcher.fetch_more(token, consistency_token).await {
                Ok(batch) => Task::Apply {
                    batch,
                    context: MutationContext::for_token(session, token_id),
                    append: false,
                    ack: None,
                },
                Err(error) => Task::TokenFetchFailed {
                    session,
                    token: token_id,
                    error,
                },
            };
            if queue.send(task).is_err() {
                debug!(session = %page_session, "engine shut down before the page arrived");
            }
        });
    }
}

/// Builder for [`FeedEngine`].
pub struct FeedEngineBuilder {
    config: Config,
    fetcher: Arc<dyn ContentFetcher>,
    policy: Option<Arc<dyn RefreshPolicy>>,
    store: Option<Arc<dyn PayloadStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl FeedEngineBuilder {
    pub fn policy(mut self, policy: Arc<dyn RefreshPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn store(mut self, store: Arc<dyn PayloadStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Validate the configuration and start the worker task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Result<FeedEngine> {
        let config = self.config.ensure_valid()?;

        let store: Arc<dyn PayloadStore> = match (self.store, &config.store.path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(
                SqlitePayloadStore::new(path).map_err(|e| Error::store(e.to_string()))?,
            ),
            (None, None) => Arc::new(InMemoryPayloadStore::new()),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let policy = self
            .policy
            .unwrap_or_else(|| Arc::new(FixedPolicy(RequestBehavior::NoRequest)));
        let timeout = Duration::from_millis(config.refresh.timeout_ms);

        let (queue, rx) = TaskQueue::channel();
        let shared = Arc::new(EngineShared {
            state: Mutex::new(EngineState {
                manager: SessionManager::new(config, store, clock),
                refresh: RefreshCoordinator::new(),
            }),
            queue,
            fetcher: self.fetcher,
            policy,
            timeout,
        });
        tokio::spawn(queue::run(Arc::downgrade(&shared), rx));
        info!("feed engine started");

        Ok(FeedEngine { shared })
    }
}

/// Client-side feed engine shared by every session.
#[derive(Clone)]
pub struct FeedEngine {
    shared: Arc<EngineShared>,
}

impl FeedEngine {
    pub fn builder(config: Config, fetcher: Arc<dyn ContentFetcher>) -> FeedEngineBuilder {
        FeedEngineBuilder {
            config,
            fetcher,
            policy: None,
            store: None,
            clock: None,
        }
    }

    /// Create a session, consulting the refresh policy.
    pub fn create_session(&self, view_depth_hint: Option<ContentId>, ui_context: UiContext) -> SessionHandle {
        let shared = &self.shared;
        let (id, request, deadline) = {
            let mut guard = shared.state.lock();
            let EngineState { manager, refresh } = &mut *guard;

            let has_content = manager.has_content();
            let behavior = shared.policy.decide(has_content);
            let reason = if has_content {
                RequestReason::OpenWithContent
            } else {
                RequestReason::OpenWithoutContent
            };
            let id = manager.create_session(view_depth_hint, ui_context);
            debug!(session = %id, ?behavior, has_content, "consulted refresh policy");

            let mut request = None;
            let mut deadline = None;
            match behavior {
                RequestBehavior::NoRequest => manager.populate_session(&id, false),
                RequestBehavior::RequestWithContent => {
                    manager.populate_session(&id, true);
                    request = refresh.begin(reason);
                    refresh.join(id.clone(), WaitMode::Append);
                }
                RequestBehavior::RequestWithWait => {
                    request = refresh.begin(reason);
                    refresh.join(id.clone(), WaitMode::Blocking);
                }
                RequestBehavior::RequestWithTimeout => {
                    request = refresh.begin(reason);
                    deadline = refresh.join(id.clone(), WaitMode::Deadline);
                }
                RequestBehavior::NoRequestWithTimeout => {
                    deadline = refresh.join(id.clone(), WaitMode::Deadline);
                    if deadline.is_none() {
                        manager.populate_session(&id, false);
                    }
                }
            }

            let notifications = manager.take_notifications();
            drop(guard);
            for notification in notifications {
                notification.dispatch();
            }
            (id, request.map(|r| (r, reason)), deadline)
        };

        if let Some((request, reason)) = request {
            shared.spawn_initial_fetch(request, reason);
        }
        if let Some(request) = deadline {
            shared.spawn_deadline(request, id.clone());
        }
        self.session(id)
    }

    /// Reattach a detached session. Unknown or expired sessions come back
    /// invalidated.
    pub fn restore_session(&self, id: &SessionId) -> SessionHandle {
        self.shared.with_manager(|manager| manager.restore_session(id));
        self.session(id.clone())
    }

    /// Handle for an existing session id.
    pub fn session(&self, id: SessionId) -> SessionHandle {
        SessionHandle {
            id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Queue a batch for application.
    pub fn submit(&self, batch: MutationBatch, context: MutationContext) -> Result<()> {
        self.shared.queue.send(Task::Apply {
            batch,
            context,
            append: false,
            ack: None,
        })
    }

    /// Queue a batch and wait until it is applied and observers have run.
    pub async fn apply(&self, batch: MutationBatch, context: MutationContext) -> Result<AppliedDiff> {
        let (ack, rx) = oneshot::channel();
        self.shared.queue.send(Task::Apply {
            batch,
            context,
            append: false,
            ack: Some(ack),
        })?;
        rx.await.map_err(|_| Error::EngineShutDown)
    }

    /// Start an initial request outside session creation. Returns `false`
    /// when one is already outstanding.
    pub fn trigger_refresh(&self, reason: RequestReason) -> bool {
        let request = self.shared.state.lock().refresh.begin(reason);
        match request {
            Some(request) => {
                self.shared.spawn_initial_fetch(request, reason);
                true
            }
            None => false,
        }
    }

    /// Wait until every task queued so far has been handled.
    pub async fn flush(&self) -> Result<()> {
        let (ack, rx) = oneshot::channel();
        self.shared.queue.send(Task::Barrier { ack })?;
        rx.await.map_err(|_| Error::EngineShutDown)
    }

    pub async fn collect_garbage(&self) -> Result<GcReport> {
        let (ack, rx) = oneshot::channel();
        self.shared.queue.send(Task::CollectGarbage { ack })?;
        rx.await.map_err(|_| Error::EngineShutDown)
    }

    pub fn set_remove_tracking(&self, tracker: Option<Arc<dyn RemoveTracking>>) {
        self.shared.state.lock().manager.set_remove_tracking(tracker);
    }

    pub fn shared_state(&self, id: &ContentId) -> Option<SharedState> {
        self.shared.state.lock().manager.shared_state(id)
    }

    pub fn payloads(&self, ids: &[ContentId]) -> Result<Vec<ContentNode>> {
        self.shared.state.lock().manager.payloads(ids)
    }

    pub fn semantic_properties(&self, ids: &[ContentId]) -> Result<Vec<SemanticProperties>> {
        self.shared.state.lock().manager.semantic_properties(ids)
    }

    pub fn has_content(&self) -> bool {
        self.shared.state.lock().manager.has_content()
    }

    pub fn dump(&self) -> EngineDump {
        self.shared.state.lock().manager.dump()
    }
}

/// A host's handle on one session.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    shared: Arc<EngineShared>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state.lock().manager.session_state(&self.id)
    }

    pub fn register_observer(&self, observer: Arc<dyn SessionObserver>) -> ObserverId {
        self.shared
            .with_manager(|manager| manager.register_observer(&self.id, observer))
    }

    pub fn register_feature_observer(
        &self,
        content_id: &ContentId,
        observer: Arc<dyn FeatureChangeObserver>,
    ) -> ObserverId {
        self.shared
            .with_manager(|manager| manager.register_feature_observer(&self.id, content_id, observer))
    }

    pub fn register_token_observer(
        &self,
        token: &TokenId,
        observer: Arc<dyn TokenCompletedObserver>,
    ) -> ObserverId {
        self.shared
            .with_manager(|manager| manager.register_token_observer(&self.id, token, observer))
    }

    pub fn unregister_observer(&self, observer: ObserverId) -> bool {
        self.shared
            .with_manager(|manager| manager.unregister_observer(&self.id, observer))
    }

    pub fn root_feature(&self) -> Option<ContentNode> {
        self.shared.state.lock().manager.root_feature(&self.id)
    }

    pub fn root_cursor(&self) -> Result<ModelCursor> {
        self.cursor(None)
    }

    pub fn cursor(&self, parent: Option<&ContentId>) -> Result<ModelCursor> {
        self.shared.with_manager(|manager| manager.cursor(&self.id, parent))
    }

    /// Start resolving a token. Completion is reported to the token's
    /// observers.
    pub fn handle_token(&self, token: &ModelToken) -> Result<()> {
        let resolution = self
            .shared
            .with_manager(|manager| manager.resolve_token(&self.id, &token.id))?;

        if let TokenResolution::Fetch {
            token,
            consistency_token,
        } = resolution
        {
            if let TokenId::Real(token_id) = token.id.clone() {
                debug!(session = %self.id, token = %token_id, "fetching page");
                self.shared
                    .spawn_page_fetch(self.id.clone(), token_id, token, consistency_token);
            }
        }
        Ok(())
    }

    /// Resolve a token and wait for its page.
    pub async fn resolve_token(&self, token: &ModelToken) -> Result<PageResult> {
        let (tx, rx) = oneshot::channel();
        self.register_token_observer(&token.id, Arc::new(PageWaiter(Mutex::new(Some(tx)))));
        self.handle_token(token)?;
        match rx.await {
            Ok(Ok(page)) => Ok(page),
            Ok(Err(error)) => Err(Error::Model(error)),
            Err(_) => Err(Error::EngineShutDown),
        }
    }

    /// Stop live updates; the session can be restored until its lifetime
    /// elapses.
    pub fn detach(&self) {
        self.shared
            .with_manager(|manager| manager.detach_session(&self.id));
    }

    pub fn invalidate(&self) -> bool {
        self.shared
            .with_manager(|manager| manager.invalidate_session(&self.id, None))
    }

    pub fn invalidate_with(&self, ui_context: UiContext) -> bool {
        self.shared
            .with_manager(|manager| manager.invalidate_session(&self.id, Some(ui_context)))
    }

    /// Start an initial request on behalf of this session.
    pub fn trigger_refresh(&self, reason: RequestReason) -> bool {
        FeedEngine {
            shared: Arc::clone(&self.shared),
        }
        .trigger_refresh(reason)
    }
}

struct PageWaiter(Mutex<Option<oneshot::Sender<std::result::Result<PageResult, ModelError>>>>);

impl TokenCompletedObserver for PageWaiter {
    fn on_token_completed(&self, completed: &TokenCompleted) {
        if let Some(tx) = self.0.lock().take() {
            let _ = tx.send(Ok(completed.page.clone()));
        }
    }

    fn on_error(&self, error: &ModelError) {
        if let Some(tx) = self.0.lock().take() {
            let _ = tx.send(Err(error.clone()));
        }
    }
}
