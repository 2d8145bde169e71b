//! Deterministic models for tests and demos.
//!
//! [`ScriptedModel`] follows a per-row script of allowed ids per step. Its
//! state tensor carries `[source_row, steps_taken]` for each row, so a row
//! replicated through `select_rows` keeps following its source row's script;
//! a state gathered out of lockstep shows up as the wrong script.

use std::cell::{Cell, RefCell};

use candle_core::{Device, Tensor};
use organ_core::Result;

use crate::batch::TokenGrid;
use crate::model::{Discriminator, SequenceModel};
use crate::reward::{RewardSource, RolloutBatch};

/// Model that emits scripted ids; steps past the end of a script emit `fallback`.
pub struct ScriptedModel {
    vocab_size: usize,
    /// row -> step -> ids drawn uniformly at that step.
    scripts: Vec<Vec<Vec<u32>>>,
    fallback: u32,
    nan: bool,
    calls: Cell<usize>,
    device: Device,
}

impl ScriptedModel {
    /// Every row follows the same deterministic script.
    pub fn uniform(vocab_size: usize, script: Vec<u32>, fallback: u32) -> Self {
        Self::per_row(vocab_size, vec![script], fallback)
    }

    /// Row `r` follows `scripts[r % scripts.len()]`.
    pub fn per_row(vocab_size: usize, scripts: Vec<Vec<u32>>, fallback: u32) -> Self {
        let scripts = scripts
            .into_iter()
            .map(|s| s.into_iter().map(|id| vec![id]).collect())
            .collect();
        Self::branching(vocab_size, scripts, fallback)
    }

    /// Row `r` draws uniformly among `scripts[r % len][step]` at each step.
    /// With no scripts every row emits `fallback`.
    pub fn branching(vocab_size: usize, scripts: Vec<Vec<Vec<u32>>>, fallback: u32) -> Self {
        Self {
            vocab_size,
            scripts,
            fallback,
            nan: false,
            calls: Cell::new(0),
            device: Device::Cpu,
        }
    }

    /// Model whose logits are all NaN.
    pub fn nan_logits(vocab_size: usize) -> Self {
        Self {
            nan: true,
            ..Self::uniform(vocab_size, vec![], 0)
        }
    }

    /// Number of `step` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.get()
    }

    /// State for `n` rows that have not stepped yet.
    pub fn initial_state(&self, n: usize) -> Result<Tensor> {
        let rows: Vec<f32> = (0..n).flat_map(|r| [r as f32, 0.0]).collect();
        Ok(Tensor::from_vec(rows, (n, 2), &self.device)?)
    }

    fn choices(&self, source_row: usize, step: usize) -> Vec<u32> {
        if self.scripts.is_empty() {
            return vec![self.fallback];
        }
        self.scripts[source_row % self.scripts.len()]
            .get(step)
            .cloned()
            .unwrap_or_else(|| vec![self.fallback])
    }
}

impl SequenceModel for ScriptedModel {
    type State = Tensor;

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn step(&self, tokens: &Tensor, state: Option<Tensor>) -> Result<(Tensor, Tensor)> {
        self.calls.set(self.calls.get() + 1);
        let n = tokens.dims()[0];
        let state = match state {
            Some(s) => s,
            None => self.initial_state(n)?,
        };
        let rows = state.to_vec2::<f32>()?;

        let mut logits = Vec::with_capacity(n * self.vocab_size);
        let mut next = Vec::with_capacity(n * 2);
        for row in &rows {
            let (source, step) = (row[0] as usize, row[1] as usize);
            let mut row_logits = vec![f32::NEG_INFINITY; self.vocab_size];
            if self.nan {
                row_logits.fill(f32::NAN);
            } else {
                for id in self.choices(source, step) {
                    row_logits[id as usize] = 0.0;
                }
            }
            logits.extend(row_logits);
            next.extend([row[0], row[1] + 1.0]);
        }

        let logits = Tensor::from_vec(logits, (n, self.vocab_size), &self.device)?;
        let next = Tensor::from_vec(next, (n, 2), &self.device)?;
        Ok((logits, next))
    }
}

/// Discriminator scoring each row by a closure over its ids.
pub struct FnDiscriminator<F> {
    score_fn: F,
    device: Device,
}

impl<F: Fn(&[u32]) -> f32> FnDiscriminator<F> {
    pub fn new(score_fn: F) -> Self {
        Self {
            score_fn,
            device: Device::Cpu,
        }
    }
}

impl<F: Fn(&[u32]) -> f32> Discriminator for FnDiscriminator<F> {
    fn device(&self) -> &Device {
        &self.device
    }

    fn score(&self, sequences: &Tensor) -> Result<Tensor> {
        let rows = sequences.to_vec2::<u32>()?;
        let scores: Vec<f32> = rows.iter().map(|r| (self.score_fn)(r)).collect();
        Ok(Tensor::new(scores.as_slice(), &self.device)?)
    }
}

/// One observed scoring call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub sequences: TokenGrid,
    pub lengths: Vec<usize>,
    pub scores: Vec<f32>,
}

/// Wraps a reward source and keeps every batch it scored.
pub struct RecordingReward<S> {
    inner: S,
    calls: RefCell<Vec<RecordedCall>>,
}

impl<S> RecordingReward<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.borrow().clone()
    }
}

impl<S: RewardSource> RewardSource for RecordingReward<S> {
    fn reward(&self, batch: &RolloutBatch<'_>) -> Result<Vec<f32>> {
        let scores = self.inner.reward(batch)?;
        self.calls.borrow_mut().push(RecordedCall {
            sequences: batch.sequences.clone(),
            lengths: batch.lengths.to_vec(),
            scores: scores.clone(),
        });
        Ok(scores)
    }
}
