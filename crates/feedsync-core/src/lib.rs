//! # feedsync-core
//!
//! Core types and abstractions for feedsync, a client-side synchronization
//! engine for paginated, server-fed content streams.
//!
//! This crate provides:
//! - Content identifiers, nodes and shared state
//! - Mutation batches and their context
//! - Model value objects handed to consumers (children, tokens, changes)
//! - Host interfaces (fetching, refresh policy, clock)
//! - Configuration system
//! - Common error types

pub mod config;
pub mod content;
pub mod diff;
pub mod error;
pub mod host;
pub mod model;
pub mod mutation;
pub mod session;

pub use config::Config;
pub use content::{ContentId, ContentNode, NodeKind, SemanticProperties, SharedState};
pub use diff::{Anomaly, AnomalyKind, AppliedDiff, FeatureChange};
pub use error::{format_error_with_suggestion, Error, FetchError, Result};
pub use host::{
    Clock, ContentFetcher, FixedPolicy, ManualClock, RefreshPolicy, RequestBehavior,
    RequestReason, SystemClock,
};
pub use model::{ModelChild, ModelError, ModelErrorKind, ModelFeature, ModelToken, PageResult, TokenId};
pub use mutation::{MutationBatch, MutationContext, Operation};
pub use session::{SessionId, SessionState, UiContext};
