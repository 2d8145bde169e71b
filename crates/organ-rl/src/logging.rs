//! Structured logging for sampling and rollout runs with tracing.
//!
//! Provides subscriber setup (JSON or pretty console) and per-step rollout
//! events, with automatic warnings for non-finite rewards.

use tracing::{debug, info, span, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info,organ_rl=info,organ_core=info";

fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if level.is_empty() {
            DEFAULT_FILTER.into()
        } else {
            format!("{level},organ_rl={level},organ_core={level}").into()
        }
    })
}

/// Initialize structured logging.
///
/// Reads log level from RUST_LOG environment variable, falling back to
/// `level` (or "info" when empty). Outputs JSON-formatted logs.
pub fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(filter_for(level))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Structured logging initialized");
}

/// Initialize simple console logging at `level` unless RUST_LOG overrides it.
pub fn init_console_logging(level: &str) {
    tracing_subscriber::registry()
        .with(filter_for(level))
        .with(tracing_subscriber::fmt::layer().compact())
        .init();
}

/// What happened during one rollout decision step.
#[derive(Debug, Clone)]
pub struct RolloutStepMetrics {
    /// Rows that had not finished when the step started.
    pub active_rows: usize,
    /// Rows scored this step (`active_rows * k`).
    pub rollout_rows: usize,
    /// Rows finished after the step's end-token marking.
    pub finished_rows: usize,
    /// Mean reward over the active rows.
    pub mean_reward: f64,
}

impl RolloutStepMetrics {
    /// Summarise a reward column; finished rows (outside `active`) are excluded.
    pub fn from_column(column: &[f32], active: &[bool], k: usize, finished_rows: usize) -> Self {
        let values: Vec<f64> = column
            .iter()
            .zip(active)
            .filter(|(_, active)| **active)
            .map(|(&r, _)| r as f64)
            .collect();
        let mean_reward = if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        };
        Self {
            active_rows: values.len(),
            rollout_rows: values.len() * k,
            finished_rows,
            mean_reward,
        }
    }
}

/// Log one rollout step.
pub fn log_rollout_step(step: usize, metrics: &RolloutStepMetrics) {
    let span = span!(Level::DEBUG, "rollout_step", step = step);
    let _enter = span.enter();

    if !metrics.mean_reward.is_finite() {
        warn!(
            step = step,
            mean_reward = metrics.mean_reward,
            active_rows = metrics.active_rows,
            "Non-finite rollout reward - check discriminator output and metric scorer"
        );
        return;
    }

    debug!(
        active_rows = metrics.active_rows,
        rollout_rows = metrics.rollout_rows,
        finished_rows = metrics.finished_rows,
        mean_reward = metrics.mean_reward,
        "Rollout step scored"
    );
}

/// Log the end of a rollout call.
pub fn log_rollout_complete(n_rows: usize, steps_written: usize, finished_rows: usize) {
    info!(
        rows = n_rows,
        steps_written = steps_written,
        finished_rows = finished_rows,
        incomplete_rows = n_rows - finished_rows,
        event = "rollout_complete",
        "Rollout reward estimation finished"
    );
}

/// Log a sampling call.
pub fn log_sampling(n_rows: usize, max_length: usize, mean_length: f64) {
    info!(
        rows = n_rows,
        max_length = max_length,
        mean_length = mean_length,
        event = "sampling",
        "Sampling completed"
    );
}
