//! Recorded feed traffic and a fetcher that answers from it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use feedsync_core::{
    Config, ContentFetcher, ContentId, FetchError, ModelChild, ModelToken, MutationBatch,
    MutationContext, RequestReason, TokenId, UiContext,
};
use feedsync_session::{FeedEngine, SessionHandle};

/// A recording: batches applied in order, plus the pages behind real tokens
/// keyed by the token id (`token::<domain>::<id>`).
#[derive(Debug, Default, Deserialize)]
pub struct Recording {
    pub batches: Vec<MutationBatch>,
    #[serde(default)]
    pub pages: HashMap<String, MutationBatch>,
}

impl Recording {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recording {}", path.display()))?;
        let recording: Recording = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse recording {}", path.display()))?;
        Ok(recording)
    }
}

/// Serves recorded pages for `fetch_more`.
pub struct RecordedFetcher {
    pages: HashMap<String, MutationBatch>,
}

impl RecordedFetcher {
    pub fn new(pages: HashMap<String, MutationBatch>) -> Self {
        Self { pages }
    }
}

#[async_trait]
impl ContentFetcher for RecordedFetcher {
    async fn fetch_initial(&self, reason: RequestReason) -> Result<MutationBatch, FetchError> {
        Err(FetchError::Unavailable(format!(
            "recordings cannot answer live requests ({reason:?})"
        )))
    }

    async fn fetch_more(
        &self,
        token: ModelToken,
        _consistency_token: Option<Vec<u8>>,
    ) -> Result<MutationBatch, FetchError> {
        let key = match &token.id {
            TokenId::Real(id) => id.to_string(),
            TokenId::Synthetic(_) => {
                return Err(FetchError::Malformed("synthetic tokens are resolved locally".into()))
            }
        };
        debug!(token = %key, "serving recorded page");
        self.pages
            .get(&key)
            .cloned()
            .ok_or_else(|| FetchError::Unavailable(format!("no recorded page for {key}")))
    }
}

/// Start an engine, apply every batch of `recording` and open
/// `session_count` sessions paged to the end.
pub async fn replay(
    config: &Config,
    recording: Recording,
    store: Option<PathBuf>,
    session_count: usize,
) -> anyhow::Result<(FeedEngine, Vec<SessionHandle>)> {
    let mut config = config.clone();
    if store.is_some() {
        config.store.path = store;
    }

    let fetcher = Arc::new(RecordedFetcher::new(recording.pages));
    let engine = FeedEngine::builder(config, fetcher)
        .start()
        .context("Failed to start engine")?;

    for (index, batch) in recording.batches.into_iter().enumerate() {
        let diff = engine.apply(batch, MutationContext::new()).await?;
        for anomaly in &diff.anomalies {
            warn!(batch = index, ?anomaly, "recording produced an anomaly");
        }
        info!(batch = index, changes = diff.changes.len(), "applied batch");
    }

    let mut sessions = Vec::with_capacity(session_count);
    for _ in 0..session_count {
        let session = engine.create_session(None, UiContext::default());
        page_to_end(&session).await?;
        sessions.push(session);
    }
    Ok((engine, sessions))
}

/// Resolve trailing tokens until the session shows everything it can.
async fn page_to_end(session: &SessionHandle) -> anyhow::Result<()> {
    loop {
        let items: Vec<ModelChild> = session.root_cursor()?.collect();
        let Some(token) = items.last().and_then(ModelChild::as_token).cloned() else {
            return Ok(());
        };
        if let Err(e) = session.resolve_token(&token).await {
            warn!(session = %session.id(), token = %token.id, error = %e, "stopping at unresolved token");
            return Ok(());
        }
    }
}

/// Short printable form of a payload.
pub fn preview(payload: &[u8]) -> String {
    const MAX: usize = 48;
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() > MAX {
        format!("{}...", text.chars().take(MAX).collect::<String>())
    } else {
        text.into_owned()
    }
}

pub fn label(id: &ContentId) -> String {
    format!("{}/{}", id.content_domain, id.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORDING: &str = r#"{
        "batches": [
            {
                "operations": [
                    { "op": "clear_all" },
                    { "op": "add_feature", "node": { "id": { "table": "feature", "content_domain": "news", "id": 0 }, "kind": "feature" } },
                    { "op": "add_feature",
                      "parent": { "table": "feature", "content_domain": "news", "id": 0 },
                      "node": { "id": { "table": "feature", "content_domain": "news", "id": 1 }, "kind": "feature", "payload": [104, 105] } },
                    { "op": "add_feature",
                      "parent": { "table": "feature", "content_domain": "news", "id": 0 },
                      "node": { "id": { "table": "token", "content_domain": "news", "id": 9 }, "kind": "token" } }
                ]
            }
        ],
        "pages": {
            "token::news::9": {
                "operations": [
                    { "op": "remove_feature",
                      "child": { "table": "token", "content_domain": "news", "id": 9 },
                      "parent": { "table": "feature", "content_domain": "news", "id": 0 } },
                    { "op": "add_feature",
                      "parent": { "table": "feature", "content_domain": "news", "id": 0 },
                      "node": { "id": { "table": "feature", "content_domain": "news", "id": 2 }, "kind": "feature" } }
                ]
            }
        }
    }"#;

    #[tokio::test]
    async fn test_replay_pages_through_recorded_tokens() {
        let recording: Recording = serde_json::from_str(RECORDING).unwrap();
        let (engine, sessions) = replay(&Config::default(), recording, None, 2).await.unwrap();

        for session in &sessions {
            let ids: Vec<u64> = session
                .root_cursor()
                .unwrap()
                .map(|item| item.content_id().map(|c| c.id).unwrap_or(u64::MAX))
                .collect();
            assert_eq!(ids, vec![1, 2]);
        }
        assert_eq!(engine.dump().sessions.ready, 2);
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview(b"hi"), "hi");
        assert_eq!(preview(&[b'x'; 60]).len(), 51);
    }
}
