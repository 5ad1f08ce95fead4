//! cinerec-dv library interface
//!
//! Multi-source data reconciliation engine for the cinerec content
//! portal: cross-checks canonical movie/people records against external
//! providers, builds per-field consensus, and auto-applies, flags, or
//! discards corrections.

pub mod apply;
pub mod cli;
pub mod consensus;
pub mod db;
pub mod decision;
pub mod error;
pub mod matcher;
pub mod normalize;
pub mod pipeline;
pub mod quality;
pub mod report;
pub mod sources;
pub mod types;

pub use crate::error::{EngineResult, ValidationError};
