//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use feedsync_core::{
    Config, ContentFetcher, ContentId, ContentNode, FeatureChange, FetchError, FixedPolicy,
    ManualClock, ModelChild, ModelError, MutationBatch, MutationContext, RequestBehavior,
    RequestReason, SessionState, UiContext,
};
use feedsync_session::{
    FeatureChangeObserver, FeedEngine, InMemoryPayloadStore, RemoveTracking, SessionHandle,
    SessionObserver, TokenCompleted, TokenCompletedObserver,
};

pub const DOMAIN: &str = "stream";

pub fn id(n: u64) -> ContentId {
    ContentId::feature(DOMAIN, n)
}

pub fn token_id(n: u64) -> ContentId {
    ContentId::token(DOMAIN, n)
}

pub fn feature(n: u64) -> ContentNode {
    ContentNode::feature(id(n), format!("item {n}").into_bytes())
}

pub fn token(n: u64) -> ContentNode {
    ContentNode::token(token_id(n), format!("page after {n}").into_bytes())
}

/// `ClearAll`, root 0 and children `1..=count`.
pub fn initial_batch(count: u64) -> MutationBatch {
    (1..=count).fold(
        MutationBatch::new().clear_all().add_root(feature(0)),
        |batch, n| batch.add_feature(id(0), feature(n)),
    )
}

/// The page behind token `n`: consumes the token and appends `items`.
pub fn page_batch(n: u64, items: impl IntoIterator<Item = u64>) -> MutationBatch {
    items.into_iter().fold(
        MutationBatch::new().remove_feature(token_id(n), id(0)),
        |batch, item| batch.add_feature(id(0), feature(item)),
    )
}

pub fn config(initial: usize, page: usize, min: usize) -> Config {
    let mut config = Config::default();
    config.paging.initial_page_size = initial;
    config.paging.page_size = page;
    config.paging.min_page_size = min;
    config
}

/// Paging off: every root child is revealed at once.
pub fn unpaged() -> Config {
    config(0, 10, 0)
}

/// Fetcher whose initial responses are released by the test.
#[derive(Default)]
pub struct ScriptedFetcher {
    initial: Mutex<VecDeque<Result<MutationBatch, FetchError>>>,
    released: Notify,
    pages: Mutex<HashMap<ContentId, VecDeque<Result<MutationBatch, FetchError>>>>,
    pub initial_calls: AtomicUsize,
    pub page_calls: AtomicUsize,
    pub reasons: Mutex<Vec<RequestReason>>,
    pub consistency_tokens: Mutex<Vec<Option<Vec<u8>>>>,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer the pending (or next) initial request.
    pub fn respond(&self, result: Result<MutationBatch, FetchError>) {
        self.initial.lock().push_back(result);
        self.released.notify_one();
    }

    /// Queue a response for the token with id `n`.
    pub fn script_page(&self, n: u64, result: Result<MutationBatch, FetchError>) {
        self.pages.lock().entry(token_id(n)).or_default().push_back(result);
    }

    pub fn initial_calls(&self) -> usize {
        self.initial_calls.load(Ordering::SeqCst)
    }

    pub fn page_calls(&self) -> usize {
        self.page_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentFetcher for ScriptedFetcher {
    async fn fetch_initial(&self, reason: RequestReason) -> Result<MutationBatch, FetchError> {
        self.initial_calls.fetch_add(1, Ordering::SeqCst);
        self.reasons.lock().push(reason);
        loop {
            if let Some(result) = self.initial.lock().pop_front() {
                return result;
            }
            self.released.notified().await;
        }
    }

    async fn fetch_more(
        &self,
        token: feedsync_core::ModelToken,
        consistency_token: Option<Vec<u8>>,
    ) -> Result<MutationBatch, FetchError> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        self.consistency_tokens.lock().push(consistency_token);
        let feedsync_core::TokenId::Real(content_id) = token.id else {
            return Err(FetchError::Malformed("synthetic token sent to fetcher".into()));
        };
        self.pages
            .lock()
            .get_mut(&content_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(FetchError::Unavailable(format!("no page for {content_id}"))))
    }
}

/// Records every callback it receives as a short string.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
    removed: Mutex<Vec<ContentId>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| e.as_str() == event).count()
    }

    pub fn removed(&self) -> Vec<ContentId> {
        self.removed.lock().clone()
    }

    fn push(&self, event: String) {
        self.events.lock().push(event);
    }
}

impl SessionObserver for Recorder {
    fn on_session_start(&self, _ui_context: &UiContext) {
        self.push("start".into());
    }

    fn on_session_finished(&self, _ui_context: &UiContext) {
        self.push("finished".into());
    }

    fn on_error(&self, error: &ModelError) {
        self.push(format!("error:{:?}", error.kind));
    }
}

impl FeatureChangeObserver for Recorder {
    fn on_change(&self, change: &FeatureChange) {
        self.push(format!("change:{}", change.content_id.id));
    }
}

impl TokenCompletedObserver for Recorder {
    fn on_token_completed(&self, completed: &TokenCompleted) {
        self.push(format!("completed:{}", completed.page.new_children.len()));
    }

    fn on_error(&self, error: &ModelError) {
        self.push(format!("token_error:{:?}", error.kind));
    }
}

impl RemoveTracking for Recorder {
    fn on_removed(&self, _context: &MutationContext, removed: &[ContentId]) {
        self.removed.lock().extend_from_slice(removed);
    }
}

pub struct Harness {
    pub engine: FeedEngine,
    pub fetcher: Arc<ScriptedFetcher>,
    pub store: Arc<InMemoryPayloadStore>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(config: Config, behavior: RequestBehavior) -> Harness {
    let fetcher = ScriptedFetcher::new();
    let store = Arc::new(InMemoryPayloadStore::new());
    let clock = Arc::new(ManualClock::default());
    let engine = FeedEngine::builder(config, fetcher.clone())
        .policy(Arc::new(FixedPolicy(behavior)))
        .store(store.clone())
        .clock(clock.clone())
        .start()
        .unwrap();
    Harness {
        engine,
        fetcher,
        store,
        clock,
    }
}

/// Feature ids (numeric part) of a session's current root cursor.
pub fn root_ids(session: &SessionHandle) -> Vec<u64> {
    session
        .root_cursor()
        .unwrap()
        .filter_map(|item| item.content_id().map(|c| c.id))
        .collect()
}

pub fn last_token(items: &[ModelChild]) -> Option<feedsync_core::ModelToken> {
    items.last().and_then(|item| item.as_token().cloned())
}

/// Resolve tokens until the session is exhausted, returning feature ids in
/// reveal order and the size of each page.
pub async fn page_to_end(session: &SessionHandle) -> (Vec<u64>, Vec<usize>) {
    let items: Vec<ModelChild> = session.root_cursor().unwrap().collect();
    let first: Vec<u64> = items
        .iter()
        .filter_map(|item| item.content_id().map(|c| c.id))
        .collect();
    let mut pages = vec![first.len()];
    let mut ids = first;

    let mut next = last_token(&items);
    while let Some(token) = next {
        let page = session.resolve_token(&token).await.unwrap();
        pages.push(page.new_children.len());
        ids.extend(page.new_children.iter().map(|c| c.id));
        next = page.next_token;
    }
    (ids, pages)
}

/// Yield to spawned tasks until `condition` holds.
pub async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..10_000 {
        if condition() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

pub async fn wait_for_state(session: &SessionHandle, state: SessionState) {
    wait_for(|| session.state() == state).await;
}
