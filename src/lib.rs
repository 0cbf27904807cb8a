//! feedmill: cached feed generation and export for third-party platforms.
//!
//! The crate is built around three mechanisms:
//!
//! - [`coordinator::Coordinator`] serializes cache population per resource
//!   family: one worker, strict FIFO, at most one generation in flight.
//! - [`fetch::FetchClient`] performs rate-limited, signed API calls,
//!   retrying infrastructure failures and failing fast on semantic ones.
//! - [`export::export`] streams a rendered document into object storage
//!   without buffering it in memory.
//!
//! Everything platform-specific (parsing, rendering rules) plugs in
//! through the [`coordinator::Generate`] and [`export::Render`] traits.

pub mod config;
pub mod coordinator;
pub mod export;
pub mod fetch;
pub mod key;
pub mod notify;
pub mod storage;

pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorConfig, FetchGenerator, Generate, GetError};
pub use export::{export, ExportError, LocalObjectStore, MemoryObjectStore, ObjectStore, Render};
pub use fetch::{FetchClient, FetchError, RateLimiter};
pub use key::ResourceKey;
