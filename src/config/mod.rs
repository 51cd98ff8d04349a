//! Configuration module for Keepsafe
//!
//! This module provides configuration management including:
//! - Platform-aware path resolution
//! - Backup configuration persistence and validation

pub mod paths;
pub mod settings;

pub use paths::EnginePaths;
pub use settings::{BackupConfiguration, ConfigurationPatch, Frequency};
