//! Contracts for the external models driven by the sampler and estimator.

use candle_core::{Device, Tensor};
use organ_core::{OrganError, Result};

/// Opaque per-row recurrent carry. Rows are aligned with the token grid.
pub trait RecurrentState: Sized {
    /// Number of rows held.
    fn batch_rows(&self) -> usize;

    /// Gather rows (`rows` is a `(n,)` u32 index tensor, repeats allowed).
    fn select_rows(&self, rows: &Tensor) -> Result<Self>;
}

/// A bare tensor is a valid state: rows live on dim 0.
impl RecurrentState for Tensor {
    fn batch_rows(&self) -> usize {
        self.dims().first().copied().unwrap_or(0)
    }

    fn select_rows(&self, rows: &Tensor) -> Result<Self> {
        Ok(self.index_select(rows, 0)?)
    }
}

/// Stateful next-token policy: `(ids, state) -> (logits, new state)`.
///
/// The state is moved in and a fresh one handed back, so the caller owns it
/// between steps.
pub trait SequenceModel {
    type State: RecurrentState;

    fn vocab_size(&self) -> usize;

    fn device(&self) -> &Device;

    /// `tokens` is `(rows,)` u32; returns `(rows, vocab)` logits.
    fn step(&self, tokens: &Tensor, state: Option<Self::State>) -> Result<(Tensor, Self::State)>;
}

/// Realness scorer over whole padded sequences.
pub trait Discriminator {
    fn device(&self) -> &Device;

    /// `sequences` is `(rows, width)` u32; returns `(rows,)` f32 scores.
    fn score(&self, sequences: &Tensor) -> Result<Tensor>;
}

/// Fail unless a row-aligned structure has the expected number of rows.
pub(crate) fn ensure_rows(context: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(OrganError::ShapeMismatch {
            context,
            expected,
            actual,
        });
    }
    Ok(())
}
