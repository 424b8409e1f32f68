//! # Recipebox Engine
//!
//! An offline-first recipe catalog with background sync.
//!
//! Every edit lands in local storage first and is visible immediately. A
//! durable change log remembers what still has to reach the remote service,
//! and the sync engine delivers it whenever the network allows, without ever
//! silently dropping or overwriting an edit.
//!
//! ## Design Principles
//!
//! - **Local first**: reads never wait for the network
//! - **Durable intent**: a mutation is only reported as done once its change
//!   entry is on disk
//! - **No silent overwrite**: divergent edits become conflicts that need an
//!   explicit [`Resolution`]
//! - **Testable**: storage and the remote are traits with in-memory versions
//!
//! ## Core Concepts
//!
//! ### Recipes
//!
//! A [`RecipeRecord`] carries the user's content (title, ingredients, steps,
//! an optional photo and location) plus sync bookkeeping: a [`SyncState`],
//! the remote id once known, and the last remote version seen.
//!
//! ### Content Store and Change Log
//!
//! The [`ContentStore`] holds records and photo blobs, reference counting
//! blobs by the records that point at them. The [`ChangeLog`] is an
//! append-only queue of [`ChangeEntry`]s, removed only when the remote
//! acknowledges them.
//!
//! ### Query Cache
//!
//! The [`QueryCache`] keeps list-screen rows for fast filtering, sorting and
//! multi-select. It is derived data and can be rebuilt from the store.
//!
//! ### Sync
//!
//! The [`SyncEngine`] runs pull, media upload and push phases against a
//! [`RemoteApi`]. [`HttpRemote`] talks to the reference server;
//! [`MemoryRemote`] is an in-process stand-in for tests.
//!
//! ## Quick Start
//!
//! ```rust
//! use recipebox_engine::{RecipeBook, RecipeDraft, RecipeQuery, SyncState};
//!
//! let book = RecipeBook::in_memory("phone-1").unwrap();
//!
//! let pasta = book
//!     .create_recipe(RecipeDraft::new("Pasta").with_ingredients(["200g spaghetti"]))
//!     .unwrap();
//! assert_eq!(pasta.sync_state, SyncState::Pending);
//!
//! let rows = book.query(&RecipeQuery::new().title_contains("past"));
//! assert_eq!(rows.len(), 1);
//! assert_eq!(book.pending_changes(None).len(), 1);
//! ```
//!
//! ## FFI
//!
//! The [`ffi`] module exposes the book and a background sync to other
//! languages through C functions exchanging JSON strings.

pub mod book;
pub mod change_log;
pub mod clock;
pub mod content_store;
pub mod error;
pub mod ffi;
pub mod locks;
pub mod media;
pub mod query_cache;
pub mod reconcile;
pub mod record;
pub mod remote;
pub mod state;
pub mod storage;
pub mod sync;

// Re-export main types at crate root
pub use book::{ChangeKind, ChangeNotification, Origin, RecipeBook};
pub use change_log::{ChangeEntry, ChangeLog, OpKind};
pub use clock::LogicalClock;
pub use content_store::{ContentStore, Listing};
pub use error::{Error, Result};
pub use media::{MediaBlob, UploadState};
pub use query_cache::{NearFilter, QueryCache, RecipeQuery, RecipeSummary, SortOrder};
pub use reconcile::{ConflictReason, ConflictRecord, Resolution};
pub use record::{
    Location, PhotoState, RecipeContent, RecipeDraft, RecipeRecord, SyncState, MAX_TITLE_LEN,
};
pub use remote::{
    HttpRemote, HttpRemoteConfig, MemoryRemote, PullPage, RecipeBody, RemoteApi, RemoteError,
    RemoteRecipe,
};
pub use state::{EngineState, StateSummary};
pub use storage::{Backend, FileBackend, MemoryBackend};
pub use sync::{RetryPolicy, RetryState, SyncConfig, SyncEngine, SyncHandle, SyncPhase, SyncReport};

/// Type aliases for clarity
pub type RecipeId = String;
pub type RemoteId = String;
/// Content hash of a photo blob
pub type BlobRef = String;
pub type DeviceId = String;
pub type Sequence = u64;
pub type Timestamp = u64;
