//! # feedsync-session
//!
//! The session/model engine for feedsync.
//!
//! This crate provides:
//! - The canonical content tree (`$HEAD`) and the mutation applier
//! - Per-session views with synthetic paging and real continuation tokens
//! - Detach/restore with a replay journal
//! - Reachability-based garbage collection over the tree and payload store
//! - A single-writer async engine coordinating refreshes and page fetches
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use feedsync_core::{Config, UiContext};
//! use feedsync_session::FeedEngine;
//!
//! let engine = FeedEngine::builder(Config::load_validated()?, fetcher).start()?;
//! let session = engine.create_session(None, UiContext::default());
//! for item in session.root_cursor()? {
//!     // render
//! }
//! ```
//!
//! ## Storage
//!
//! Payloads are written through a [`store::PayloadStore`]. The SQLite
//! backend lives at `~/.local/share/feedsync/payloads.db` by default.

pub mod applier;
pub mod cursor;
pub mod engine;
pub mod gc;
pub mod journal;
pub mod manager;
pub mod observers;
pub mod pager;
mod queue;
pub mod refresh;
pub mod registry;
pub mod store;
pub mod tree;
pub mod view;

// Re-export commonly used types
pub use applier::{apply_operations, ApplyOutcome, TreeEvent};
pub use cursor::{ModelCursor, TokenCompleted};
pub use engine::{FeedEngine, FeedEngineBuilder, SessionHandle};
pub use gc::{GarbageCollector, GcReport};
pub use manager::{EngineDump, EngineStats, SessionManager, TokenResolution};
pub use observers::{
    FeatureChangeObserver, ObserverId, RemoveTracking, SessionObserver, TokenCompletedObserver,
};
pub use pager::{PagingPolicy, TokenPager};
pub use registry::{SessionCounts, SessionRecord, SessionRegistry};
pub use store::{InMemoryPayloadStore, PayloadStore, SqlitePayloadStore, StoreError};
pub use tree::ContentTree;
pub use view::SessionView;
