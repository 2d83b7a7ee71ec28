//! Git-backed implementation of the version-control provider.

pub mod client;

pub use client::{GitRepository, METADATA_DIR};
