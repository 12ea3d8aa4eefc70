//! The `same` daemon: a per-workspace background process that keeps a
//! parsed task graph, resolved tool environments, and proactively
//! recomputed input hashes warm behind a Unix-domain socket RPC surface
//! (spec §4.6-§4.10).
//!
//! ```rust,no_run
//! use same_core::collaborators::{GlobInputResolver, StaticToolEnvironment};
//! use same_core::config::YamlConfigLoader;
//! use same_daemon::{lifecycle::DEFAULT_IDLE_TIMEOUT, server::DaemonServer};
//! use std::path::PathBuf;
//! use std::sync::Arc;
//!
//! # async fn run() -> same_daemon::Result<()> {
//! let server = Arc::new(DaemonServer::new(
//!     PathBuf::from("."),
//!     Arc::new(YamlConfigLoader),
//!     Arc::new(StaticToolEnvironment),
//!     Arc::new(GlobInputResolver),
//!     DEFAULT_IDLE_TIMEOUT,
//! ));
//! server.run().await
//! # }
//! ```

pub mod env_id;
pub mod error;
pub mod hash_cache;
pub mod lifecycle;
pub mod paths;
pub mod rehash;
pub mod server;
pub mod server_cache;
pub mod watcher;

pub use error::{Error, Result};
pub use hash_cache::{HashCache, HashCacheKey, HashState};
pub use lifecycle::DaemonLifecycle;
pub use server::DaemonServer;
pub use server_cache::ServerCache;
pub use watcher::{Debouncer, Watcher};
