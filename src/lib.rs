//! projpack - portable project archives for SQLite-backed case databases
//!
//! Packs every row that belongs to one project, the project's settings, and
//! the evidence files its rows reference into a single `.projpack` archive,
//! and unpacks such an archive into the same or another database.
//!
//! # Architecture
//!
//! - [`cli`] - Command-line interface using clap
//! - [`config`] - Database location, naming conventions, project context
//! - [`model`] - Archive manifest and project records
//! - [`storage`] - SQLite access and schema introspection
//! - [`transfer`] - Export and import pipelines
//! - [`error`] - Error types and handling

#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;
pub mod transfer;

pub use error::{Error, Result};
