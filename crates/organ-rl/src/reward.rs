//! Reward strategies for completed rollouts.
//!
//! Two independently scaled signals score the same rollout batch:
//! - a learned discriminator over whole id sequences
//! - an external metric scorer over decoded strings and a reference set
//!
//! [`BlendedReward`] mixes them linearly with an explicit weight `w`:
//! `reward = (1 - w) * discriminator + w * metric`.

use candle_core::DType;
use organ_core::{OrganError, Result, Vocab};

use crate::batch::TokenGrid;
use crate::model::{ensure_rows, Discriminator};

/// Completed rollouts handed to a reward source.
#[derive(Debug, Clone, Copy)]
pub struct RolloutBatch<'a> {
    /// Prefix plus continuation, right-padded.
    pub sequences: &'a TokenGrid,
    /// Meaningful ids per row, `<bos>` included.
    pub lengths: &'a [usize],
}

impl<'a> RolloutBatch<'a> {
    pub fn new(sequences: &'a TokenGrid, lengths: &'a [usize]) -> Result<Self> {
        ensure_rows("rollout lengths", sequences.n_rows(), lengths.len())?;
        Ok(Self { sequences, lengths })
    }

    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    /// Decode each row up to its length, `<bos>`/`<eos>` stripped.
    pub fn decode(&self, vocab: &Vocab) -> Result<Vec<String>> {
        self.sequences
            .rows()
            .zip(self.lengths)
            .map(|(row, &len)| vocab.decode(&row[..len.min(row.len())], true, true))
            .collect()
    }
}

/// One scalar per rollout row.
pub trait RewardSource {
    fn reward(&self, batch: &RolloutBatch<'_>) -> Result<Vec<f32>>;
}

impl<S: RewardSource + ?Sized> RewardSource for &S {
    fn reward(&self, batch: &RolloutBatch<'_>) -> Result<Vec<f32>> {
        (**self).reward(batch)
    }
}

/// Scores rollouts with a [`Discriminator`].
pub struct DiscriminatorReward<'d, D> {
    discriminator: &'d D,
}

impl<'d, D: Discriminator> DiscriminatorReward<'d, D> {
    pub fn new(discriminator: &'d D) -> Self {
        Self { discriminator }
    }
}

impl<D: Discriminator> RewardSource for DiscriminatorReward<'_, D> {
    fn reward(&self, batch: &RolloutBatch<'_>) -> Result<Vec<f32>> {
        let ids = batch.sequences.to_tensor(self.discriminator.device())?;
        let scores = self
            .discriminator
            .score(&ids)?
            .flatten_all()?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()?;
        ensure_rows("discriminator scores", batch.len(), scores.len())?;
        Ok(scores)
    }
}

/// External domain scorer over decoded strings.
///
/// `Structure` is whatever parsed form of the references the scorer wants
/// (the rollout core never looks inside it).
pub trait MetricReward {
    type Structure;

    fn score(
        &self,
        samples: &[String],
        reference_strings: &[String],
        reference_structures: &[Self::Structure],
    ) -> anyhow::Result<Vec<f32>>;
}

/// Scorer that returns zero for every sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetric;

impl MetricReward for NoMetric {
    type Structure = ();

    fn score(&self, samples: &[String], _: &[String], _: &[()]) -> anyhow::Result<Vec<f32>> {
        Ok(vec![0.0; samples.len()])
    }
}

/// Adapts a closure `(samples, references) -> scores` into a [`MetricReward`].
pub struct FnMetric<F>(pub F);

impl<F> MetricReward for FnMetric<F>
where
    F: Fn(&[String], &[String]) -> anyhow::Result<Vec<f32>>,
{
    type Structure = ();

    fn score(&self, samples: &[String], refs: &[String], _: &[()]) -> anyhow::Result<Vec<f32>> {
        (self.0)(samples, refs)
    }
}

/// Scores rollouts by decoding them and calling a [`MetricReward`].
pub struct MetricRewardSource<'a, M: MetricReward> {
    metric: &'a M,
    vocab: &'a Vocab,
    reference_strings: &'a [String],
    reference_structures: &'a [M::Structure],
}

impl<'a, M: MetricReward> MetricRewardSource<'a, M> {
    pub fn new(
        metric: &'a M,
        vocab: &'a Vocab,
        reference_strings: &'a [String],
        reference_structures: &'a [M::Structure],
    ) -> Self {
        Self {
            metric,
            vocab,
            reference_strings,
            reference_structures,
        }
    }
}

impl<M: MetricReward> RewardSource for MetricRewardSource<'_, M> {
    fn reward(&self, batch: &RolloutBatch<'_>) -> Result<Vec<f32>> {
        let samples = batch.decode(self.vocab)?;
        let scores = self
            .metric
            .score(&samples, self.reference_strings, self.reference_structures)
            .map_err(OrganError::External)?;
        ensure_rows("metric scores", batch.len(), scores.len())?;
        Ok(scores)
    }
}

/// `(1 - w) * discriminator + w * metric`.
pub fn blend(discriminator: f32, metric: f32, weight: f32) -> f32 {
    (1.0 - weight) * discriminator + weight * metric
}

/// Linear blend of a discriminator-backed and a metric-backed source.
///
/// Built by [`RolloutEstimator::blended`](crate::rollout::RolloutEstimator::blended)
/// from the rollout configuration's `reward_weight`.
pub struct BlendedReward<D, M> {
    discriminator: D,
    metric: M,
    weight: f32,
}

impl<D: RewardSource, M: RewardSource> BlendedReward<D, M> {
    /// `weight` must lie in `[0, 1]`; it is rejected, not clamped.
    pub(crate) fn new(discriminator: D, metric: M, weight: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(OrganError::InvalidConfig(format!(
                "reward_weight must be in [0, 1], got {weight}"
            )));
        }
        Ok(Self {
            discriminator,
            metric,
            weight,
        })
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }
}

impl<D: RewardSource, M: RewardSource> RewardSource for BlendedReward<D, M> {
    fn reward(&self, batch: &RolloutBatch<'_>) -> Result<Vec<f32>> {
        let disc = self.discriminator.reward(batch)?;
        // w = 0: the metric scorer is not consulted at all.
        if self.weight == 0.0 {
            return Ok(disc);
        }
        let metric = self.metric.reward(batch)?;
        ensure_rows("blended metric scores", disc.len(), metric.len())?;
        Ok(disc
            .iter()
            .zip(&metric)
            .map(|(&d, &m)| blend(d, m, self.weight))
            .collect())
    }
}
