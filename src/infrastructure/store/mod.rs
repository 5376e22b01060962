//! Durable artifact storage.

pub mod file_store;

pub use file_store::{FileArtifactStore, IndexEntry};
