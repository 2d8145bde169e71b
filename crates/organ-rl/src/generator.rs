//! Character-level LSTM generator (Candle).

use candle_core::{Device, Tensor};
use candle_nn::rnn::{LSTMConfig, LSTMState, LSTM, RNN};
use candle_nn::{Embedding, Linear, Module, VarBuilder};
use organ_core::{GeneratorConfig, Result};

use crate::model::{RecurrentState, SequenceModel};

/// One `(h, c)` pair per LSTM layer, each `(rows, hidden)`.
#[derive(Debug, Clone)]
pub struct LstmState {
    layers: Vec<LSTMState>,
}

impl LstmState {
    pub fn layers(&self) -> &[LSTMState] {
        &self.layers
    }
}

impl RecurrentState for LstmState {
    fn batch_rows(&self) -> usize {
        self.layers
            .first()
            .and_then(|s| s.h().dims().first().copied())
            .unwrap_or(0)
    }

    fn select_rows(&self, rows: &Tensor) -> Result<Self> {
        let layers = self
            .layers
            .iter()
            .map(|s| Ok(LSTMState::new(s.h().index_select(rows, 0)?, s.c().index_select(rows, 0)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { layers })
    }
}

/// Embedding -> stacked LSTM -> vocabulary projection.
pub struct CharRnnGenerator {
    embedding: Embedding,
    layers: Vec<LSTM>,
    head: Linear,
    vocab_size: usize,
    device: Device,
}

impl CharRnnGenerator {
    pub fn new(vocab_size: usize, config: &GeneratorConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let embedding = candle_nn::embedding(vocab_size, config.embedding_dim, vb.pp("embedding"))?;
        let mut layers = Vec::with_capacity(config.num_layers);
        for layer_idx in 0..config.num_layers {
            let in_dim = if layer_idx == 0 {
                config.embedding_dim
            } else {
                config.hidden_size
            };
            let lstm_config = LSTMConfig {
                layer_idx,
                ..LSTMConfig::default()
            };
            layers.push(candle_nn::lstm(in_dim, config.hidden_size, lstm_config, vb.pp("lstm"))?);
        }
        let head = candle_nn::linear(config.hidden_size, vocab_size, vb.pp("head"))?;
        Ok(Self {
            embedding,
            layers,
            head,
            vocab_size,
            device: vb.device().clone(),
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    fn zero_state(&self, rows: usize) -> Result<LstmState> {
        let layers = self
            .layers
            .iter()
            .map(|lstm| lstm.zero_state(rows))
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(LstmState { layers })
    }
}

impl SequenceModel for CharRnnGenerator {
    type State = LstmState;

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn step(&self, tokens: &Tensor, state: Option<LstmState>) -> Result<(Tensor, LstmState)> {
        let rows = tokens.dims().first().copied().unwrap_or(0);
        let state = match state {
            Some(state) => state,
            None => self.zero_state(rows)?,
        };

        let mut x = self.embedding.forward(tokens)?;
        let mut next = Vec::with_capacity(self.layers.len());
        for (lstm, prev) in self.layers.iter().zip(&state.layers) {
            let s = lstm.step(&x, prev)?;
            x = s.h().clone();
            next.push(s);
        }
        let logits = self.head.forward(&x)?;
        Ok((logits, LstmState { layers: next }))
    }
}
