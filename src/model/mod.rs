//! Data models for projpack.
//!
//! - Project
//! - Manifest
//! - FileRecord

pub mod manifest;
pub mod project;

pub use manifest::{FileRecord, Manifest};
pub use project::Project;
