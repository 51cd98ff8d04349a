//! Storage layer for Keepsafe
//!
//! Atomic file helpers plus the file-backed domain provider used by the CLI.

pub mod file_io;
mod json_domain;

pub use json_domain::{JsonFileDomain, SUPPORTED_SCHEMA_VERSION};
