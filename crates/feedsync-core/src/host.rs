//! Interfaces the host application provides to the engine.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::model::ModelToken;
use crate::mutation::MutationBatch;

/// Why a request for fresh content is being made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestReason {
    Unknown,
    /// The feed has no content at all
    ZeroState,
    /// The host asked explicitly
    HostRequested,
    /// A session opened while cached content existed
    OpenWithContent,
    /// A session opened with nothing cached
    OpenWithoutContent,
    /// The user pulled to refresh
    ManualRefresh,
    /// Content was cleared and must be reloaded
    ClearAll,
}

/// Network transport and response decoding, owned by the host.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch a fresh feed. The batch usually starts with `ClearAll`.
    async fn fetch_initial(&self, reason: RequestReason) -> Result<MutationBatch, FetchError>;

    /// Fetch the page behind a real token.
    async fn fetch_more(
        &self,
        token: ModelToken,
        consistency_token: Option<Vec<u8>>,
    ) -> Result<MutationBatch, FetchError>;
}

/// What to do about fresh content when a session is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestBehavior {
    /// Serve only what is cached
    NoRequest,
    /// Serve the cache now, append the response when it arrives
    RequestWithContent,
    /// Stay initializing until the response arrives
    RequestWithWait,
    /// Stay initializing until the response arrives or the deadline passes
    RequestWithTimeout,
    /// Make no request, but wait (bounded) for one already in flight
    NoRequestWithTimeout,
}

impl RequestBehavior {
    pub fn makes_request(&self) -> bool {
        matches!(
            self,
            Self::RequestWithContent | Self::RequestWithWait | Self::RequestWithTimeout
        )
    }
}

/// Host scheduling oracle consulted on every session creation.
pub trait RefreshPolicy: Send + Sync {
    fn decide(&self, session_has_content: bool) -> RequestBehavior;
}

/// Policy that always answers the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub RequestBehavior);

impl RefreshPolicy for FixedPolicy {
    fn decide(&self, _session_has_content: bool) -> RequestBehavior {
        self.0
    }
}

/// Source of wall-clock time for retention deadlines.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn advance_ms(&self, millis: i64) {
        self.advance(Duration::milliseconds(millis));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
