//! # Cinerec Common Library
//!
//! Shared code for the cinerec reconciliation tools:
//! - Error types (Error enum, Result alias)
//! - Configuration loading (TOML file + environment overrides)

pub mod config;
pub mod error;

pub use error::{Error, Result};
