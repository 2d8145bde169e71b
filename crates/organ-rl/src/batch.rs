//! Row bookkeeping for batched generation.
//!
//! [`TokenGrid`] is the fixed-width id grid; [`RowIndex`] is the one
//! selection that every row-aligned structure (ids, recurrent state, lengths)
//! is gathered through, so they cannot drift apart.

use candle_core::{Device, Tensor};
use organ_core::{OrganError, Result};

/// Explicit list of source rows, applied as a gather to row-aligned data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowIndex(Vec<u32>);

impl RowIndex {
    pub fn new(rows: Vec<u32>) -> Self {
        Self(rows)
    }

    /// Rows whose finished flag is not set.
    pub fn unfinished(finished: &[bool]) -> Self {
        Self(
            finished
                .iter()
                .enumerate()
                .filter(|(_, done)| !**done)
                .map(|(i, _)| i as u32)
                .collect(),
        )
    }

    /// The whole index repeated `k` times back to back: `[a, b, a, b, ...]`.
    ///
    /// Row `j` of the result maps to source row `self[j % self.len()]`.
    pub fn tiled(&self, k: usize) -> Self {
        let mut rows = Vec::with_capacity(self.0.len() * k);
        for _ in 0..k {
            rows.extend_from_slice(&self.0);
        }
        Self(rows)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().map(|&r| r as usize)
    }

    /// Gather the selected entries of a row-aligned slice.
    pub fn gather<T: Copy>(&self, values: &[T]) -> Vec<T> {
        self.iter().map(|r| values[r]).collect()
    }

    /// `(len,)` u32 tensor for `index_select`.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        Ok(Tensor::new(self.0.as_slice(), device)?)
    }
}

/// Right-padded grid of token ids, one row per sequence, uniform width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrid {
    rows: Vec<Vec<u32>>,
    width: usize,
}

impl TokenGrid {
    /// `n_rows` rows of width zero.
    pub fn empty(n_rows: usize) -> Self {
        Self {
            rows: vec![Vec::new(); n_rows],
            width: 0,
        }
    }

    /// Width-one grid holding `column`.
    pub fn from_column(column: &[u32]) -> Self {
        Self {
            rows: column.iter().map(|&id| vec![id]).collect(),
            width: 1,
        }
    }

    /// Build from rows that already share one width.
    pub fn from_rows(rows: Vec<Vec<u32>>) -> Result<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(OrganError::ShapeMismatch {
                context: "token grid row width",
                expected: width,
                actual: bad.len(),
            });
        }
        Ok(Self { rows, width })
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row(&self, i: usize) -> &[u32] {
        &self.rows[i]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u32]> {
        self.rows.iter().map(Vec::as_slice)
    }

    /// Append one id per row.
    pub fn push_column(&mut self, column: &[u32]) -> Result<()> {
        if column.len() != self.rows.len() {
            return Err(OrganError::ShapeMismatch {
                context: "token grid column",
                expected: self.rows.len(),
                actual: column.len(),
            });
        }
        for (row, &id) in self.rows.iter_mut().zip(column) {
            row.push(id);
        }
        self.width += 1;
        Ok(())
    }

    /// Row-wise concatenation: `self` on the left, `right` on the right.
    pub fn hcat(&self, right: &TokenGrid) -> Result<Self> {
        if right.n_rows() != self.n_rows() {
            return Err(OrganError::ShapeMismatch {
                context: "token grid concat",
                expected: self.n_rows(),
                actual: right.n_rows(),
            });
        }
        let rows = self
            .rows
            .iter()
            .zip(&right.rows)
            .map(|(l, r)| {
                let mut row = Vec::with_capacity(l.len() + r.len());
                row.extend_from_slice(l);
                row.extend_from_slice(r);
                row
            })
            .collect();
        Ok(Self {
            rows,
            width: self.width + right.width,
        })
    }

    /// New grid made of the selected rows, in index order.
    pub fn gather_rows(&self, index: &RowIndex) -> Self {
        Self {
            rows: index.iter().map(|r| self.rows[r].clone()).collect(),
            width: self.width,
        }
    }

    /// `(rows, width)` u32 tensor.
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let flat: Vec<u32> = self.rows.iter().flatten().copied().collect();
        Ok(Tensor::from_vec(flat, (self.n_rows(), self.width), device)?)
    }
}
