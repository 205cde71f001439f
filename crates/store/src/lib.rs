//! Key-value store backends for auto-pr-bot.
//!
//! Implements [`pipeline::store::KeyValueStore`] twice:
//!
//! - [`MemoryStore`]: process-local map, used by tests and single-shot runs.
//! - [`SqliteStore`]: one SQLite table named after the configured status
//!   table, used by the long-running service.
//!
//! Both honour item expiry on read, so an expired record is invisible even
//! before it is physically purged.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Backends add no domain rules; the record layouts and
//! retention periods belong to the [`pipeline`] crate.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
