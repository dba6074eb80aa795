//! Model value objects handed to session consumers.

use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::content::ContentId;

/// Prefix used when rendering synthetic token ids.
pub const SYNTHETIC_TOKEN_PREFIX: &str = "_token:";

/// Identity of a pagination token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TokenId {
    /// Server-issued token; the id of the token node in the tree
    Real(ContentId),
    /// Locally cut page over content already in the tree
    Synthetic(Uuid),
}

impl TokenId {
    pub fn synthetic() -> Self {
        TokenId::Synthetic(Uuid::new_v4())
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self, TokenId::Synthetic(_))
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenId::Real(id) => write!(f, "{id}"),
            TokenId::Synthetic(uuid) => write!(f, "{SYNTHETIC_TOKEN_PREFIX}{uuid}"),
        }
    }
}

/// A token child: more children exist beyond the current frontier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelToken {
    pub id: TokenId,
    /// The node whose children this token continues
    pub parent: ContentId,
    /// Continuation data for real tokens
    pub continuation: Option<Arc<Vec<u8>>>,
}

impl ModelToken {
    pub fn is_synthetic(&self) -> bool {
        self.id.is_synthetic()
    }
}

/// A content reference with the payload visible when the cursor was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFeature {
    pub content_id: ContentId,
    pub payload: Arc<Vec<u8>>,
}

/// One item produced by a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelChild {
    Feature(ModelFeature),
    Token(ModelToken),
}

impl ModelChild {
    pub fn is_token(&self) -> bool {
        matches!(self, ModelChild::Token(_))
    }

    pub fn as_feature(&self) -> Option<&ModelFeature> {
        match self {
            ModelChild::Feature(feature) => Some(feature),
            ModelChild::Token(_) => None,
        }
    }

    pub fn as_token(&self) -> Option<&ModelToken> {
        match self {
            ModelChild::Token(token) => Some(token),
            ModelChild::Feature(_) => None,
        }
    }

    /// Content id of a feature child.
    pub fn content_id(&self) -> Option<&ContentId> {
        self.as_feature().map(|f| &f.content_id)
    }
}

/// Result of resolving a token for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageResult {
    /// Newly revealed children, in insertion order
    pub new_children: Vec<ContentId>,
    /// Token ending the new page, if more content exists
    pub next_token: Option<ModelToken>,
}

impl PageResult {
    pub fn is_exhausted(&self) -> bool {
        self.next_token.is_none()
    }
}

/// Kind of a model error surfaced to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// The session could not show any content
    NoCards,
    /// Fetching the page behind a real token failed
    PaginationError,
    /// A synthetic token could not be resolved
    SyntheticTokenError,
}

/// Error reported to session or token observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelError {
    pub kind: ModelErrorKind,
    pub token: Option<TokenId>,
    pub message: String,
}

impl ModelError {
    pub fn pagination(token: TokenId, message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::PaginationError,
            token: Some(token),
            message: message.into(),
        }
    }

    pub fn synthetic(token: TokenId) -> Self {
        Self {
            kind: ModelErrorKind::SyntheticTokenError,
            message: format!("unable to resolve synthetic token {token}"),
            token: Some(token),
        }
    }

    pub fn no_cards(message: impl Into<String>) -> Self {
        Self {
            kind: ModelErrorKind::NoCards,
            token: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_token_display_prefix() {
        let id = TokenId::synthetic();
        assert!(id.to_string().starts_with(SYNTHETIC_TOKEN_PREFIX));
        assert!(id.is_synthetic());
    }

    #[test]
    fn test_model_child_accessors() {
        let feature = ModelChild::Feature(ModelFeature {
            content_id: ContentId::feature("s", 1),
            payload: Arc::new(b"x".to_vec()),
        });
        assert_eq!(feature.content_id(), Some(&ContentId::feature("s", 1)));
        assert!(!feature.is_token());

        let token = ModelChild::Token(ModelToken {
            id: TokenId::Real(ContentId::token("s", 2)),
            parent: ContentId::feature("s", 0),
            continuation: None,
        });
        assert!(token.is_token());
        assert!(token.content_id().is_none());
    }
}
