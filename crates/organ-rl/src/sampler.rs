//! Batched autoregressive sampling with per-row stopping.
//!
//! Each row stops independently at its own `<eos>`; from then on it only
//! receives `<pad>` and its length is frozen. The `<eos>` itself counts
//! toward the length.

use candle_core::{DType, Tensor};
use organ_core::{Result, SpecialIds, Vocab};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use crate::batch::TokenGrid;
use crate::model::{ensure_rows, RecurrentState, SequenceModel};

/// Ids generated after the starting column, with per-row lengths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub sequences: TokenGrid,
    pub lengths: Vec<usize>,
}

/// Full sequences including the leading `<bos>` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledBatch {
    pub sequences: TokenGrid,
    pub lengths: Vec<usize>,
}

impl SampledBatch {
    /// Decode every row up to its length, `<bos>`/`<eos>` stripped.
    pub fn to_strings(&self, vocab: &Vocab) -> Result<Vec<String>> {
        self.sequences
            .rows()
            .zip(&self.lengths)
            .map(|(row, &len)| vocab.decode(&row[..len], true, true))
            .collect()
    }
}

/// Autoregressive sampler over a [`SequenceModel`].
pub struct Sampler<'m, M: SequenceModel> {
    model: &'m M,
    specials: SpecialIds,
}

impl<'m, M: SequenceModel> Sampler<'m, M> {
    pub fn new(model: &'m M, specials: SpecialIds) -> Self {
        Self { model, specials }
    }

    pub fn model(&self) -> &'m M {
        self.model
    }

    pub fn specials(&self) -> SpecialIds {
        self.specials
    }

    /// Sample `n` sequences from `<bos>`, at most `max_length` ids after it.
    pub fn sample<R: Rng>(&self, n: usize, max_length: usize, rng: &mut R) -> Result<SampledBatch> {
        let prevs = vec![self.specials.bos; n];
        let continuation = self.proceed(&prevs, None, max_length, rng)?;
        let sequences = TokenGrid::from_column(&prevs).hcat(&continuation.sequences)?;
        let lengths = continuation.lengths.iter().map(|l| l + 1).collect();
        Ok(SampledBatch { sequences, lengths })
    }

    /// Sample and decode `n` strings.
    pub fn sample_strings<R: Rng>(
        &self,
        vocab: &Vocab,
        n: usize,
        max_length: usize,
        rng: &mut R,
    ) -> Result<Vec<String>> {
        self.sample(n, max_length, rng)?.to_strings(vocab)
    }

    /// Continue each row from its last id `prevs[row]` and optional state.
    ///
    /// A row whose starting id is already `<eos>` counts as finished and only
    /// receives padding.
    pub fn proceed<R: Rng>(
        &self,
        prevs: &[u32],
        state: Option<M::State>,
        max_length: usize,
        rng: &mut R,
    ) -> Result<Continuation> {
        let n = prevs.len();
        let mut finished: Vec<bool> = prevs.iter().map(|&p| p == self.specials.eos).collect();
        let mut lengths = vec![0usize; n];
        let mut sequences = TokenGrid::empty(n);
        let mut prevs = prevs.to_vec();
        let mut state = state;

        for _ in 0..max_length {
            if finished.iter().all(|&f| f) {
                break;
            }
            let (currents, next_state) =
                self.advance(&prevs, state, &finished, &mut lengths, rng)?;
            sequences.push_column(&currents)?;
            self.mark_finished(&currents, &mut finished);
            state = Some(next_state);
            prevs = currents;
        }

        Ok(Continuation { sequences, lengths })
    }

    /// One real step for every row: model call, draw, pad forcing, length update.
    ///
    /// Finished flags are left to the caller so it can act on the drawn ids
    /// before they are marked.
    pub(crate) fn advance<R: Rng>(
        &self,
        prevs: &[u32],
        state: Option<M::State>,
        finished: &[bool],
        lengths: &mut [usize],
        rng: &mut R,
    ) -> Result<(Vec<u32>, M::State)> {
        let n = prevs.len();
        if let Some(state) = &state {
            ensure_rows("sampler input state", n, state.batch_rows())?;
        }

        let tokens = Tensor::new(prevs, self.model.device())?;
        let (logits, next_state) = self.model.step(&tokens, state)?;
        ensure_rows("model logits", n, logits.dims().first().copied().unwrap_or(0))?;
        ensure_rows("model output state", n, next_state.batch_rows())?;

        let probs = candle_nn::ops::softmax_last_dim(&logits.to_dtype(DType::F32)?)?;
        let probs = probs.to_vec2::<f32>()?;

        let mut currents = Vec::with_capacity(n);
        for (row, row_probs) in probs.iter().enumerate() {
            if finished[row] {
                currents.push(self.specials.pad);
                continue;
            }
            let dist = WeightedIndex::new(row_probs)
                .map_err(|_| organ_core::OrganError::InvalidDistribution { row })?;
            currents.push(dist.sample(rng) as u32);
            lengths[row] += 1;
        }
        Ok((currents, next_state))
    }

    pub(crate) fn mark_finished(&self, currents: &[u32], finished: &mut [bool]) {
        for (done, &id) in finished.iter_mut().zip(currents) {
            if id == self.specials.eos {
                *done = true;
            }
        }
    }
}
