//! organ-rl: Sampling and Monte-Carlo rollout rewards for sequence GANs
//!
//! A recurrent generator emits SMILES strings one character at a time. To
//! train it as a policy, every partial sequence needs a reward; this crate
//! estimates one by completing the prefix several times and scoring the
//! completions.
//!
//! ## Architecture
//!
//! 1. **Sampler**: batched autoregressive sampling with per-row stopping
//! 2. **Rollout Estimator**: `k` completions per active row per step, averaged
//! 3. **Reward Sources**: discriminator score, metric score and their linear blend
//! 4. **Candle Models**: LSTM generator and highway CNN discriminator

pub mod batch;
pub mod discriminator;
pub mod generator;
pub mod logging;
pub mod model;
pub mod reward;
pub mod rollout;
pub mod sampler;
pub mod testing;

pub use batch::{RowIndex, TokenGrid};
pub use discriminator::CnnDiscriminator;
pub use generator::{CharRnnGenerator, LstmState};
pub use model::{Discriminator, RecurrentState, SequenceModel};
pub use reward::{
    blend, BlendedReward, DiscriminatorReward, FnMetric, MetricReward, MetricRewardSource,
    NoMetric, RewardSource, RolloutBatch,
};
pub use rollout::{RewardTrace, RolloutEstimator, RolloutOutcome};
pub use sampler::{Continuation, SampledBatch, Sampler};
