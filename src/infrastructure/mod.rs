//! Infrastructure layer module
//!
//! Adapters and ambient concerns around the engine:
//! - Configuration management (figment)
//! - Logging infrastructure (tracing)
//! - Bounded retry at the collaborator-call boundary
//! - HTTP collaborator adapters (reqwest)
//! - File-backed artifact store
//!
//! Implementations satisfy the port traits defined in the domain layer.

pub mod collaborators;
pub mod config;
pub mod logging;
pub mod retry;
pub mod store;
