//! Git-backed snapshots of the working tree taken before mutating tools run.

pub mod error;
pub mod git;
pub mod service;
pub mod store;

pub use error::CheckpointError;
pub use git::GitRepo;
pub use service::{CheckpointConfig, CheckpointMetadata, CheckpointOptions, CheckpointService};
