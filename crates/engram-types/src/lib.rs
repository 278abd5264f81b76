//! Core types and ports for the Engram memory engine.
//!
//! This crate defines the shared data model (records, scopes, recall results,
//! stats), the error taxonomy, and the external-collaborator ports
//! (`EmbeddingService`, `StorageAdapter`, `CacheTier`) used across the engine,
//! cache, and optimizer crates. It contains no business logic.

pub mod error;
pub mod memory;
pub mod ports;
