//! Mutation batches: the only way content enters the tree.

use serde::{Deserialize, Serialize};

use crate::content::{ContentId, ContentNode, SharedState};
use crate::session::{SessionId, UiContext};

/// A single operation in a mutation batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Drop every edge in the tree and start a new epoch
    ClearAll,
    /// Insert or update `node` under `parent`; `parent = None` sets the root
    AddFeature {
        #[serde(default)]
        parent: Option<ContentId>,
        node: ContentNode,
    },
    /// Unlink `child` from `parent`
    RemoveFeature { child: ContentId, parent: ContentId },
    /// Replace a shared state
    UpdateSharedState { state: SharedState },
    /// Persist semantic properties for an id
    SetSemanticProperties {
        content_id: ContentId,
        #[serde(default)]
        data: Vec<u8>,
    },
}

impl Operation {
    pub fn is_clear_all(&self) -> bool {
        matches!(self, Operation::ClearAll)
    }
}

/// An ordered list of operations, applied atomically with respect to readers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationBatch {
    pub operations: Vec<Operation>,
    /// Server consistency token to send with later page requests
    #[serde(default)]
    pub consistency_token: Option<Vec<u8>>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_all(mut self) -> Self {
        self.operations.push(Operation::ClearAll);
        self
    }

    pub fn add_root(mut self, node: ContentNode) -> Self {
        self.operations.push(Operation::AddFeature { parent: None, node });
        self
    }

    pub fn add_feature(mut self, parent: ContentId, node: ContentNode) -> Self {
        self.operations.push(Operation::AddFeature {
            parent: Some(parent),
            node,
        });
        self
    }

    pub fn remove_feature(mut self, child: ContentId, parent: ContentId) -> Self {
        self.operations.push(Operation::RemoveFeature { child, parent });
        self
    }

    pub fn update_shared_state(mut self, state: SharedState) -> Self {
        self.operations.push(Operation::UpdateSharedState { state });
        self
    }

    pub fn set_semantic_properties(mut self, content_id: ContentId, data: impl Into<Vec<u8>>) -> Self {
        self.operations.push(Operation::SetSemanticProperties {
            content_id,
            data: data.into(),
        });
        self
    }

    pub fn with_consistency_token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.consistency_token = Some(token.into());
        self
    }

    /// Whether this batch starts a new epoch.
    pub fn is_refresh(&self) -> bool {
        self.operations.iter().any(Operation::is_clear_all)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Where a mutation came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationContext {
    /// Session whose own continuation triggered the mutation
    pub requesting_session_id: Option<SessionId>,
    /// The real token this batch answers
    pub continuation_token: Option<ContentId>,
    /// Set when a user action caused the mutation (routes RemoveTracking)
    pub user_initiated: bool,
    pub ui_context: UiContext,
}

impl MutationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for the page answering `token` on behalf of `session`.
    pub fn for_token(session: SessionId, token: ContentId) -> Self {
        Self {
            requesting_session_id: Some(session),
            continuation_token: Some(token),
            ..Default::default()
        }
    }

    pub fn for_session(session: SessionId) -> Self {
        Self {
            requesting_session_id: Some(session),
            ..Default::default()
        }
    }

    pub fn user_initiated(mut self) -> Self {
        self.user_initiated = true;
        self
    }

    pub fn with_ui_context(mut self, ui_context: UiContext) -> Self {
        self.ui_context = ui_context;
        self
    }

    pub fn is_token_page(&self) -> bool {
        self.continuation_token.is_some()
    }
}
