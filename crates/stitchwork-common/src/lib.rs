//! StitchWork Common - Shared types and utilities
//!
//! This crate provides the artifact record, error definitions, and
//! configuration used by the registry and the admin CLI.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, LoggingConfig, MANIFEST_FILE_NAME, RegistryConfig, SweeperConfig};
pub use error::{Error, Result};
pub use types::*;
