//! Collaborator adapters satisfying the domain ports.

pub mod http;

pub use http::{classify_status, HttpCollaborators};
