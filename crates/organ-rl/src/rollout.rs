//! Monte-Carlo rollout reward estimation.
//!
//! Generates `n` sequences live from `<bos>`. After every real step, each
//! row that had not finished is completed `k` times from its current prefix
//! and recurrent state; the row's reward for the step is the mean score of
//! its `k` completions.
//!
//! Row bookkeeping: the active rows `a` are expanded with the tiled index
//! `[a; k]`, and that one index gathers the prefixes, the last ids and the
//! recurrent state. Rollout row `j` therefore belongs to source row
//! `index[j]`.
//!
//! The loop stops at the step budget, once every row has finished, or once
//! the finish threshold is met. Rows still active at that point simply have
//! no further entries; the trace records how far it got.

use candle_core::{Device, Tensor};
use organ_core::{Result, RolloutConfig, SpecialIds};
use rand::Rng;

use crate::batch::{RowIndex, TokenGrid};
use crate::logging::{log_rollout_complete, log_rollout_step, RolloutStepMetrics};
use crate::model::{ensure_rows, RecurrentState, SequenceModel};
use crate::reward::{BlendedReward, RewardSource, RolloutBatch};
use crate::sampler::Sampler;

/// Per-row, per-step rewards of one rollout call.
///
/// Column `t` holds the reward of every row at decision step `t`; rows that
/// had already finished hold `0`. `steps_written` and the per-row finish step
/// mark where the trace is valid: entries past a row's finish step, and steps
/// never written, are absent rather than zero.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardTrace {
    n_rows: usize,
    columns: Vec<Vec<f32>>,
    finish_step: Vec<Option<usize>>,
}

impl RewardTrace {
    fn new(n_rows: usize) -> Self {
        Self {
            n_rows,
            columns: Vec::new(),
            finish_step: vec![None; n_rows],
        }
    }

    fn push_step(&mut self, column: Vec<f32>, finished: &[bool]) {
        let step = self.columns.len();
        for (slot, &done) in self.finish_step.iter_mut().zip(finished) {
            if done && slot.is_none() {
                *slot = Some(step);
            }
        }
        self.columns.push(column);
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of decision steps that received a reward column.
    pub fn steps_written(&self) -> usize {
        self.columns.len()
    }

    /// Step at which `row` emitted `<eos>`, if it did before the loop stopped.
    pub fn finish_step(&self, row: usize) -> Option<usize> {
        self.finish_step.get(row).copied().flatten()
    }

    /// Rows that emitted `<eos>` within the trace.
    pub fn finished_rows(&self) -> usize {
        self.finish_step.iter().filter(|s| s.is_some()).count()
    }

    /// Reward column for `step`, zeros for already-finished rows.
    pub fn column(&self, step: usize) -> Option<&[f32]> {
        self.columns.get(step).map(Vec::as_slice)
    }

    /// Reward of `row` at `step`; `None` if never written, past the row's
    /// end, or `row` is out of range.
    pub fn get(&self, row: usize, step: usize) -> Option<f32> {
        let reward = *self.columns.get(step)?.get(row)?;
        match self.finish_step[row] {
            Some(end) if step > end => None,
            _ => Some(reward),
        }
    }

    /// The valid rewards of `row`, one per decision it actually made.
    /// Empty for rows outside the trace.
    pub fn row_rewards(&self, row: usize) -> Vec<f32> {
        let valid = match self.finish_step.get(row) {
            None => return Vec::new(),
            Some(Some(end)) => end + 1,
            Some(None) => self.columns.len(),
        };
        self.columns[..valid].iter().map(|c| c[row]).collect()
    }

    /// Dense `(rows, steps_written)` grid, zeros after each row's end.
    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        (0..self.n_rows)
            .map(|row| self.columns.iter().map(|c| c[row]).collect())
            .collect()
    }

    /// Dense `(rows, steps_written)` f32 tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let flat: Vec<f32> = self.to_rows().into_iter().flatten().collect();
        Ok(Tensor::from_vec(flat, (self.n_rows, self.columns.len()), device)?)
    }
}

/// Sequences generated during a rollout call together with their reward trace.
#[derive(Debug, Clone)]
pub struct RolloutOutcome {
    /// `<bos>` column followed by one column per step written.
    pub sequences: TokenGrid,
    /// Meaningful ids per row, `<bos>` included.
    pub lengths: Vec<usize>,
    pub trace: RewardTrace,
}

/// Drives live generation and scores every partial sequence by rollouts.
pub struct RolloutEstimator<'m, M: SequenceModel, R: RewardSource> {
    sampler: Sampler<'m, M>,
    reward: R,
    config: RolloutConfig,
}

impl<'m, M: SequenceModel, R: RewardSource> RolloutEstimator<'m, M, R> {
    /// The configuration is validated here, before any model call.
    pub fn new(model: &'m M, specials: SpecialIds, reward: R, config: RolloutConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            sampler: Sampler::new(model, specials),
            reward,
            config,
        })
    }

    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    pub fn reward_source(&self) -> &R {
        &self.reward
    }

    /// Generate `n_samples` sequences and their reward trace.
    pub fn rollout<G: Rng>(&self, n_samples: usize, rng: &mut G) -> Result<RolloutOutcome> {
        let specials = self.sampler.specials();
        let k = self.config.n_rollouts;
        let threshold = self.config.finish_threshold.resolve(n_samples);

        let mut prevs = vec![specials.bos; n_samples];
        let mut sequences = TokenGrid::from_column(&prevs);
        let mut lengths = vec![1usize; n_samples];
        let mut finished = vec![false; n_samples];
        let mut state: Option<M::State> = None;
        let mut trace = RewardTrace::new(n_samples);

        for step in 0..self.config.horizon() {
            if finished.iter().all(|&f| f) {
                break;
            }

            let (currents, next_state) =
                self.sampler
                    .advance(&prevs, state, &finished, &mut lengths, rng)?;
            sequences.push_column(&currents)?;

            let active = RowIndex::unfinished(&finished);
            let column = self.score_active(
                step,
                &active,
                &currents,
                &next_state,
                &sequences,
                &lengths,
                rng,
            )?;

            let was_active: Vec<bool> = finished.iter().map(|f| !f).collect();
            self.sampler.mark_finished(&currents, &mut finished);
            let n_finished = finished.iter().filter(|&&f| f).count();

            log_rollout_step(
                step,
                &RolloutStepMetrics::from_column(&column, &was_active, k, n_finished),
            );
            trace.push_step(column, &finished);

            if n_finished >= threshold {
                break;
            }
            prevs = currents;
            state = Some(next_state);
        }

        log_rollout_complete(n_samples, trace.steps_written(), trace.finished_rows());
        Ok(RolloutOutcome {
            sequences,
            lengths,
            trace,
        })
    }

    /// Reward column for one step: mean rollout score for active rows, zero elsewhere.
    #[allow(clippy::too_many_arguments)]
    fn score_active<G: Rng>(
        &self,
        step: usize,
        active: &RowIndex,
        currents: &[u32],
        state: &M::State,
        sequences: &TokenGrid,
        lengths: &[usize],
        rng: &mut G,
    ) -> Result<Vec<f32>> {
        let n = currents.len();
        let k = self.config.n_rollouts;
        let mut column = vec![0.0f32; n];
        if active.is_empty() {
            return Ok(column);
        }

        let index = active.tiled(k);
        let device = self.sampler.model().device();
        let rollout_prevs = index.gather(currents);
        let rollout_state = state.select_rows(&index.to_tensor(device)?)?;
        ensure_rows("rollout state", index.len(), rollout_state.batch_rows())?;

        let remaining = self.config.max_length.saturating_sub(step + 1);
        let continuation =
            self.sampler
                .proceed(&rollout_prevs, Some(rollout_state), remaining, rng)?;

        let full = sequences.gather_rows(&index).hcat(&continuation.sequences)?;
        let full_lengths: Vec<usize> = continuation
            .lengths
            .iter()
            .zip(index.iter())
            .map(|(tail, row)| lengths[row] + tail)
            .collect();

        let scores = self
            .reward
            .reward(&RolloutBatch::new(&full, &full_lengths)?)?;
        ensure_rows("rollout rewards", index.len(), scores.len())?;

        let mut sums = vec![0.0f64; n];
        for (row, &score) in index.iter().zip(&scores) {
            sums[row] += score as f64;
        }
        for row in active.iter() {
            column[row] = (sums[row] / k as f64) as f32;
        }
        Ok(column)
    }
}

impl<'m, M, D, Mt> RolloutEstimator<'m, M, BlendedReward<D, Mt>>
where
    M: SequenceModel,
    D: RewardSource,
    Mt: RewardSource,
{
    /// Score rollouts with `(1 - w) * discriminator + w * metric`, where `w`
    /// is `config.reward_weight`.
    pub fn blended(
        model: &'m M,
        specials: SpecialIds,
        discriminator: D,
        metric: Mt,
        config: RolloutConfig,
    ) -> Result<Self> {
        config.validate()?;
        let reward = BlendedReward::new(discriminator, metric, config.reward_weight)?;
        Self::new(model, specials, reward, config)
    }

    /// Blend weight in effect; always equal to `config().reward_weight`.
    pub fn reward_weight(&self) -> f32 {
        self.reward.weight()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reward::{DiscriminatorReward, FnMetric, MetricRewardSource};
    use crate::testing::{FnDiscriminator, ScriptedModel};
    use organ_core::{FinishThreshold, Vocab};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ab_vocab() -> Vocab {
        Vocab::from_corpus(["AB"])
    }

    fn config(k: usize) -> RolloutConfig {
        RolloutConfig {
            n_rollouts: k,
            step_budget: 10,
            max_length: 10,
            reward_weight: 0.0,
            finish_threshold: FinishThreshold::Fraction(1.0),
        }
    }

    #[test]
    fn test_deterministic_trace() -> Result<()> {
        let vocab = ab_vocab();
        let sp = vocab.special_ids();
        let (a, b) = (vocab.char_to_id('A'), vocab.char_to_id('B'));
        let model = ScriptedModel::per_row(
            vocab.len(),
            vec![vec![a, sp.eos], vec![b, b, b, sp.eos]],
            sp.pad,
        );
        // Ten points per A, one per B: rollouts of row 0 score 10, of row 1 score 3.
        let disc = FnDiscriminator::new(move |row: &[u32]| {
            row.iter()
                .map(|&id| if id == a { 10.0 } else if id == b { 1.0 } else { 0.0 })
                .sum()
        });
        let estimator =
            RolloutEstimator::new(&model, sp, DiscriminatorReward::new(&disc), config(3))?;
        let mut rng = StdRng::seed_from_u64(0);
        let outcome = estimator.rollout(2, &mut rng)?;
        let trace = &outcome.trace;

        assert_eq!(trace.steps_written(), 4);
        assert_eq!(trace.to_rows(), vec![vec![10.0, 10.0, 0.0, 0.0], vec![3.0; 4]]);
        assert_eq!(trace.finish_step(0), Some(1));
        assert_eq!(trace.finish_step(1), Some(3));
        assert_eq!(trace.get(0, 1), Some(10.0));
        assert_eq!(trace.get(0, 2), None);
        assert_eq!(trace.row_rewards(0), vec![10.0, 10.0]);
        assert_eq!(trace.get(1, 4), None);

        assert_eq!(outcome.lengths, vec![3, 5]);
        assert_eq!(outcome.sequences.row(0), &[sp.bos, a, sp.eos, sp.pad, sp.pad]);
        assert_eq!(outcome.sequences.row(1), &[sp.bos, b, b, b, sp.eos]);
        Ok(())
    }

    #[test]
    fn test_zero_rollout_width_rejected_before_model_call() {
        let vocab = ab_vocab();
        let sp = vocab.special_ids();
        let model = ScriptedModel::uniform(vocab.len(), vec![sp.eos], sp.pad);
        let disc = FnDiscriminator::new(|_: &[u32]| 1.0);
        let result = RolloutEstimator::new(&model, sp, DiscriminatorReward::new(&disc), config(0));
        assert!(result.is_err_and(|e| e.is_config_error()));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_finish_threshold_leaves_trace_incomplete() -> Result<()> {
        let vocab = ab_vocab();
        let sp = vocab.special_ids();
        let a = vocab.char_to_id('A');
        let model = ScriptedModel::per_row(
            vocab.len(),
            vec![
                vec![sp.eos],
                vec![a, sp.eos],
                vec![a, a, sp.eos],
                vec![a; 20],
            ],
            sp.pad,
        );
        let disc = FnDiscriminator::new(|_: &[u32]| 0.5);
        let cfg = RolloutConfig {
            finish_threshold: FinishThreshold::Count(2),
            ..config(2)
        };
        let estimator = RolloutEstimator::new(&model, sp, DiscriminatorReward::new(&disc), cfg)?;
        let mut rng = StdRng::seed_from_u64(7);
        let outcome = estimator.rollout(4, &mut rng)?;

        assert_eq!(outcome.trace.steps_written(), 2);
        assert_eq!(outcome.sequences.width(), 3);
        assert_eq!(outcome.trace.finish_step(3), None);
        assert_eq!(outcome.trace.get(3, 1), Some(0.5));
        assert_eq!(outcome.trace.get(3, 2), None);
        // Row 0 finished at step 0: scored at step 0, zero afterwards.
        assert_eq!(outcome.trace.column(1).map(|c| c[0]), Some(0.0));
        assert_eq!(outcome.trace.row_rewards(0), vec![0.5]);
        Ok(())
    }

    #[test]
    fn test_step_budget_bounds_columns() -> Result<()> {
        let vocab = ab_vocab();
        let sp = vocab.special_ids();
        let a = vocab.char_to_id('A');
        let model = ScriptedModel::uniform(vocab.len(), vec![a; 50], sp.pad);
        let disc = FnDiscriminator::new(|row: &[u32]| row.len() as f32);
        let cfg = RolloutConfig {
            step_budget: 3,
            max_length: 6,
            ..config(2)
        };
        let estimator = RolloutEstimator::new(&model, sp, DiscriminatorReward::new(&disc), cfg)?;
        let mut rng = StdRng::seed_from_u64(11);
        let outcome = estimator.rollout(2, &mut rng)?;

        assert_eq!(outcome.trace.steps_written(), 3);
        assert_eq!(outcome.trace.finished_rows(), 0);
        // Every rollout runs to max_length, so each scored row is <bos> + 6 ids wide.
        for step in 0..3 {
            assert_eq!(outcome.trace.column(step), Some(&[7.0, 7.0][..]));
        }
        let dense = outcome.trace.to_tensor(&Device::Cpu)?;
        assert_eq!(dense.dims(), &[2, 3]);
        Ok(())
    }

    #[test]
    fn test_empty_batch() -> Result<()> {
        let vocab = ab_vocab();
        let sp = vocab.special_ids();
        let model = ScriptedModel::uniform(vocab.len(), vec![sp.eos], sp.pad);
        let disc = FnDiscriminator::new(|_: &[u32]| 1.0);
        let estimator =
            RolloutEstimator::new(&model, sp, DiscriminatorReward::new(&disc), config(4))?;
        let outcome = estimator.rollout(0, &mut StdRng::seed_from_u64(0))?;
        assert_eq!(outcome.trace.steps_written(), 0);
        assert_eq!(model.calls(), 0);
        Ok(())
    }

    #[test]
    fn test_blended_applies_configured_weight() -> Result<()> {
        let vocab = ab_vocab();
        let sp = vocab.special_ids();
        let a = vocab.char_to_id('A');
        let model = ScriptedModel::uniform(vocab.len(), vec![a, sp.eos], sp.pad);
        let disc = FnDiscriminator::new(|_: &[u32]| 1.0);
        let metric = FnMetric(|samples: &[String], _: &[String]| -> anyhow::Result<Vec<f32>> {
            Ok(vec![9.0; samples.len()])
        });

        for (weight, expected) in [(0.0, 1.0), (1.0, 9.0), (0.25, 3.0)] {
            let config = RolloutConfig {
                reward_weight: weight,
                ..config(2)
            };
            let estimator = RolloutEstimator::blended(
                &model,
                sp,
                DiscriminatorReward::new(&disc),
                MetricRewardSource::new(&metric, &vocab, &[], &[]),
                config,
            )?;
            assert_eq!(estimator.reward_weight(), weight);
            let trace = estimator.rollout(1, &mut StdRng::seed_from_u64(3))?.trace;
            assert_eq!(trace.to_rows(), vec![vec![expected, expected]], "w = {weight}");
        }
        Ok(())
    }

    #[test]
    fn test_blended_rejects_weight_before_model_call() {
        let vocab = ab_vocab();
        let sp = vocab.special_ids();
        let model = ScriptedModel::uniform(vocab.len(), vec![sp.eos], sp.pad);
        let disc = FnDiscriminator::new(|_: &[u32]| 1.0);
        let config = RolloutConfig {
            reward_weight: -0.1,
            ..config(2)
        };
        let result = RolloutEstimator::blended(
            &model,
            sp,
            DiscriminatorReward::new(&disc),
            DiscriminatorReward::new(&disc),
            config,
        );
        assert!(result.is_err_and(|e| e.is_config_error()));
        assert_eq!(model.calls(), 0);
    }

    #[test]
    fn test_trace_accessors_out_of_range_rows() -> Result<()> {
        let vocab = ab_vocab();
        let sp = vocab.special_ids();
        let model = ScriptedModel::uniform(vocab.len(), vec![sp.eos], sp.pad);
        let disc = FnDiscriminator::new(|_: &[u32]| 0.5);
        let estimator =
            RolloutEstimator::new(&model, sp, DiscriminatorReward::new(&disc), config(2))?;
        let trace = estimator.rollout(2, &mut StdRng::seed_from_u64(0))?.trace;

        assert_eq!(trace.get(1, 0), Some(0.5));
        assert_eq!(trace.get(2, 0), None);
        assert_eq!(trace.finish_step(2), None);
        assert!(trace.row_rewards(2).is_empty());
        Ok(())
    }
}
