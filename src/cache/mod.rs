//! Versioned persistent cache of request→response pairs.
//!
//! Entries are grouped into named stores; only the store named by the
//! current cache generation is considered live, and stale generations are
//! deleted wholesale during activation.

mod key;
mod store;

pub use key::request_key;
pub use store::{CacheStore, CachedEntry, SqliteStore, StoredResponse};
