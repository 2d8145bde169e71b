//! Core types shared across the ORGAN crates.
//!
//! Provides:
//! - Centralized error types via thiserror
//! - Configuration management with TOML support
//! - Character vocabulary codec and corpus loading

pub mod config;
pub mod corpus;
pub mod error;
pub mod vocab;

// Re-export commonly used types
pub use config::{
    AppConfig, ConvSpec, DiscriminatorConfig, FinishThreshold, GeneratorConfig, RolloutConfig,
};
pub use corpus::Corpus;
pub use error::{OrganError, Result};
pub use vocab::{SpecialIds, Vocab};
