//! Highway CNN discriminator (Candle).
//!
//! Embedding -> one Conv1d bank per kernel width -> ELU -> max over time ->
//! concat -> highway -> Linear(1) -> sigmoid. Inputs narrower than the widest
//! kernel are right-padded with `<pad>`, and `<pad>` always embeds to zero,
//! whatever the stored embedding row holds.

use candle_core::{Device, Tensor, D};
use candle_nn::{Conv1d, Conv1dConfig, Embedding, Linear, Module, VarBuilder};
use organ_core::{DiscriminatorConfig, Result};

use crate::model::Discriminator;

pub struct CnnDiscriminator {
    embedding: Embedding,
    convs: Vec<Conv1d>,
    highway: Linear,
    output: Linear,
    max_width: usize,
    pad_id: u32,
    device: Device,
}

impl CnnDiscriminator {
    pub fn new(
        vocab_size: usize,
        pad_id: u32,
        config: &DiscriminatorConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        config.validate()?;
        let embedding = candle_nn::embedding(vocab_size, config.embedding_dim, vb.pp("embedding"))?;
        let convs = config
            .convs
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                candle_nn::conv1d(
                    config.embedding_dim,
                    spec.filters,
                    spec.width,
                    Conv1dConfig::default(),
                    vb.pp(format!("conv{i}")),
                )
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        let total = config.total_filters();
        let highway = candle_nn::linear(total, total, vb.pp("highway"))?;
        let output = candle_nn::linear(total, 1, vb.pp("output"))?;
        Ok(Self {
            embedding,
            convs,
            highway,
            output,
            max_width: config.max_width(),
            pad_id,
            device: vb.device().clone(),
        })
    }

    /// Raw realness logits, `(rows,)`.
    pub fn logits(&self, sequences: &Tensor) -> Result<Tensor> {
        let sequences = self.pad_to_kernel(sequences)?;
        // (rows, width, emb) -> (rows, emb, width) for conv1d
        let x = self.embed(&sequences)?.transpose(1, 2)?.contiguous()?;

        let pooled = self
            .convs
            .iter()
            .map(|conv| conv.forward(&x)?.elu(1.0)?.max(D::Minus1))
            .collect::<candle_core::Result<Vec<_>>>()?;
        let features = Tensor::cat(&pooled, 1)?;

        let h = self.highway.forward(&features)?;
        let gate = candle_nn::ops::sigmoid(&h)?;
        let carry = gate.affine(-1.0, 1.0)?;
        let features = ((&gate * h.elu(1.0)?)? + (&carry * &features)?)?;

        Ok(self.output.forward(&features)?.squeeze(1)?)
    }

    /// `(rows, width, emb)` embeddings with `<pad>` positions zeroed.
    pub(crate) fn embed(&self, sequences: &Tensor) -> Result<Tensor> {
        let x = self.embedding.forward(sequences)?;
        let pad = Tensor::full(self.pad_id, sequences.dims(), &self.device)?;
        let keep = sequences.ne(&pad)?.to_dtype(x.dtype())?.unsqueeze(2)?;
        Ok(x.broadcast_mul(&keep)?)
    }

    fn pad_to_kernel(&self, sequences: &Tensor) -> Result<Tensor> {
        let (rows, width) = sequences.dims2()?;
        if width >= self.max_width {
            return Ok(sequences.clone());
        }
        let pad = Tensor::full(self.pad_id, (rows, self.max_width - width), &self.device)?;
        Ok(Tensor::cat(&[sequences, &pad], 1)?)
    }
}

impl Discriminator for CnnDiscriminator {
    fn device(&self) -> &Device {
        &self.device
    }

    fn score(&self, sequences: &Tensor) -> Result<Tensor> {
        Ok(candle_nn::ops::sigmoid(&self.logits(sequences)?)?)
    }
}
