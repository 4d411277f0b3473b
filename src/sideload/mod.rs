//! Graph flattening
//!
//! Rendered root objects keep only identifiers for sideloaded relations; each
//! distinct related object is rendered once into the envelope's `linked`
//! section, keyed by type name. Shared and cyclic references are resolved by
//! an identity set of (type, id) pairs, so every object is visited at most once.

pub mod envelope;
pub mod processor;

pub use envelope::{Envelope, RootData};
pub use processor::SideloadProcessor;
