//! Centralized configuration management with TOML support.
//!
//! Provides structured configs for the generator, the discriminator and the
//! rollout estimator with load/save capabilities.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{OrganError, Result};

/// Recurrent generator architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Token embedding dimension.
    pub embedding_dim: usize,
    /// LSTM hidden size.
    pub hidden_size: usize,
    /// Number of stacked LSTM layers.
    pub num_layers: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 32,
            hidden_size: 512,
            num_layers: 2,
        }
    }
}

impl GeneratorConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 || self.hidden_size == 0 {
            return Err(OrganError::InvalidConfig(
                "generator embedding_dim and hidden_size must be > 0".into(),
            ));
        }
        if self.num_layers == 0 {
            return Err(OrganError::InvalidConfig(
                "generator num_layers must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// One convolution bank of the discriminator: `filters` kernels spanning `width` tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvSpec {
    pub filters: usize,
    pub width: usize,
}

impl ConvSpec {
    pub const fn new(filters: usize, width: usize) -> Self {
        Self { filters, width }
    }
}

/// Convolutional discriminator architecture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscriminatorConfig {
    /// Token embedding dimension.
    pub embedding_dim: usize,
    /// Convolution banks applied over the time axis.
    pub convs: Vec<ConvSpec>,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 32,
            convs: vec![
                ConvSpec::new(100, 1),
                ConvSpec::new(200, 2),
                ConvSpec::new(200, 3),
                ConvSpec::new(200, 4),
                ConvSpec::new(200, 5),
                ConvSpec::new(100, 6),
                ConvSpec::new(100, 7),
                ConvSpec::new(100, 8),
                ConvSpec::new(100, 9),
                ConvSpec::new(100, 10),
            ],
        }
    }
}

impl DiscriminatorConfig {
    /// Widest kernel; shorter inputs are padded up to it.
    pub fn max_width(&self) -> usize {
        self.convs.iter().map(|c| c.width).max().unwrap_or(1)
    }

    /// Total number of filters across all banks.
    pub fn total_filters(&self) -> usize {
        self.convs.iter().map(|c| c.filters).sum()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(OrganError::InvalidConfig(
                "discriminator embedding_dim must be > 0".into(),
            ));
        }
        if self.convs.is_empty() {
            return Err(OrganError::InvalidConfig(
                "discriminator needs at least one conv bank".into(),
            ));
        }
        if self.convs.iter().any(|c| c.filters == 0 || c.width == 0) {
            return Err(OrganError::InvalidConfig(
                "conv filters and width must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// When the rollout outer loop may stop before the step budget is spent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishThreshold {
    /// Stop once at least this many rows have emitted the end token.
    Count(usize),
    /// Stop once at least `ceil(fraction * rows)` rows have finished.
    Fraction(f64),
}

impl FinishThreshold {
    /// Number of finished rows that ends the loop for a batch of `n_rows`.
    pub fn resolve(&self, n_rows: usize) -> usize {
        match *self {
            FinishThreshold::Count(count) => count,
            FinishThreshold::Fraction(fraction) => {
                ((fraction * n_rows as f64).ceil() as usize).max(1)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            FinishThreshold::Count(0) => Err(OrganError::InvalidConfig(
                "finish_threshold count must be > 0".into(),
            )),
            FinishThreshold::Fraction(f) if !(f > 0.0 && f <= 1.0) => Err(
                OrganError::InvalidConfig(format!(
                    "finish_threshold fraction must be in (0, 1], got {f}"
                )),
            ),
            _ => Ok(()),
        }
    }
}

/// Rollout reward estimation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Continuations sampled per active row at each step (rollout width `k`).
    pub n_rollouts: usize,
    /// Maximum number of decision steps that receive a reward column.
    pub step_budget: usize,
    /// Maximum number of generated ids per sequence, rollouts included.
    pub max_length: usize,
    /// Blend weight `w`: reward = (1 - w) * discriminator + w * metric.
    pub reward_weight: f32,
    /// Early termination of the outer loop.
    pub finish_threshold: FinishThreshold,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            n_rollouts: 16,
            step_budget: 10,
            max_length: 100,
            reward_weight: 0.7,
            finish_threshold: FinishThreshold::Count(10),
        }
    }
}

impl RolloutConfig {
    /// Validate rollout parameters. Values are rejected, never clamped.
    pub fn validate(&self) -> Result<()> {
        if self.n_rollouts == 0 {
            return Err(OrganError::InvalidConfig(
                "n_rollouts must be > 0".into(),
            ));
        }
        if self.step_budget == 0 {
            return Err(OrganError::InvalidConfig(
                "step_budget must be > 0".into(),
            ));
        }
        if self.max_length == 0 {
            return Err(OrganError::InvalidConfig(
                "max_length must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.reward_weight) {
            return Err(OrganError::InvalidConfig(format!(
                "reward_weight must be in [0, 1], got {}",
                self.reward_weight
            )));
        }
        self.finish_threshold.validate()
    }

    /// Decision steps the outer loop may take.
    pub fn horizon(&self) -> usize {
        self.step_budget.min(self.max_length)
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub generator: GeneratorConfig,
    pub discriminator: DiscriminatorConfig,
    pub rollout: RolloutConfig,
    /// Logging level (debug, info, warn, error).
    pub log_level: String,
    /// Seed for the sampling RNG; entropy-seeded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            generator: GeneratorConfig::default(),
            discriminator: DiscriminatorConfig::default(),
            rollout: RolloutConfig::default(),
            log_level: "info".into(),
            seed: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            OrganError::InvalidConfig(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.validate()?;
        let content = toml::to_string_pretty(self)
            .map_err(|e| OrganError::InvalidConfig(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.as_ref(), content)?;
        Ok(())
    }

    /// Validate all sub-configs.
    pub fn validate(&self) -> Result<()> {
        self.generator.validate()?;
        self.discriminator.validate()?;
        self.rollout.validate()?;
        Ok(())
    }
}
