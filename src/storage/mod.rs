//! Storage implementations
//!
//! Only the in-memory backend ships with the crate. Other backends implement
//! [`DataStore`](crate::core::store::DataStore) and
//! [`Transaction`](crate::core::store::Transaction) directly.

pub mod filter;
pub mod in_memory;

pub use filter::{RecordLookup, matches_spec, sort_records};
pub use in_memory::{IdStrategy, InMemoryStore, MemoryTransaction, SaveHook};
