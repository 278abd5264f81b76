//! Memory engine for the Engram semantic memory store.
//!
//! The engine orchestrates remember / recall / forget / context / stats over
//! two external collaborators (embedding service, storage adapter) and four
//! parallel in-memory indices kept consistent with storage:
//!
//! - **semantic**: id -> embedding + scope metadata, searched by cosine
//!   similarity
//! - **keyword**: token -> posting set, searched by token overlap
//! - **kind**: memory kind -> id set
//! - **tag**: tag -> id set
//!
//! Indices are only ever mutated by the engine; callers see records through
//! `RecallHit` views with embeddings stripped.

pub mod engine;
pub mod index;

pub use engine::MemoryEngine;
pub use index::IndexManager;
