//! Content identifiers and the nodes that make up the feed tree.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable, globally unique identifier of a content node.
///
/// The three parts together form one immutable key; equality is structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentId {
    /// Table the content belongs to (e.g. `feature`, `token`)
    pub table: String,
    /// Content domain (e.g. `stories`)
    pub content_domain: String,
    /// Numeric id within the domain
    pub id: u64,
}

impl ContentId {
    /// Create a new content id.
    pub fn new(table: impl Into<String>, content_domain: impl Into<String>, id: u64) -> Self {
        Self {
            table: table.into(),
            content_domain: content_domain.into(),
            id,
        }
    }

    /// Create an id in the `feature` table.
    pub fn feature(content_domain: impl Into<String>, id: u64) -> Self {
        Self::new("feature", content_domain, id)
    }

    /// Create an id in the `token` table.
    pub fn token(content_domain: impl Into<String>, id: u64) -> Self {
        Self::new("token", content_domain, id)
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}::{}", self.table, self.content_domain, self.id)
    }
}

/// What a node represents in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Regular content: a leaf or a structural node (card, cluster, root)
    Feature,
    /// Server-issued continuation marker; the payload is the continuation data
    Token,
}

/// A node as it arrives in a mutation batch.
///
/// Children are not part of the node itself; they are linked by separate
/// `AddFeature` operations naming this node as parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: ContentId,
    pub kind: NodeKind,
    /// Opaque bytes interpreted by callers
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl ContentNode {
    /// Create a feature node.
    pub fn feature(id: ContentId, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            kind: NodeKind::Feature,
            payload: payload.into(),
        }
    }

    /// Create a real (server-issued) continuation token node.
    pub fn token(id: ContentId, continuation: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            kind: NodeKind::Token,
            payload: continuation.into(),
        }
    }

    pub fn is_token(&self) -> bool {
        self.kind == NodeKind::Token
    }
}

/// Root-adjacent payload shared by every session (e.g. rendering templates).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedState {
    pub content_id: ContentId,
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// Opaque per-id bytes persisted independently of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticProperties {
    pub content_id: ContentId,
    #[serde(default)]
    pub data: Vec<u8>,
}
