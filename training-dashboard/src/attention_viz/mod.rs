//! Attention weight normalization and heatmap rendering.
//!
//! Inbound attention payloads come in many shapes: a single vector, one
//! head's matrix, or a stack of heads, sometimes ragged or carrying
//! non-numeric junk. This module reduces all of them to a
//! [`CanonicalAttention`] tensor (`[head][row][col]`) and turns one head of
//! that tensor into a display grid:
//! - [`normalize`]: raw JSON payload to canonical tensor, never fails
//! - [`render`]: canonical tensor + head + [`RenderOptions`] to [`HeatmapGrid`]

mod heatmap;
mod normalize;

pub use heatmap::{render, ColorMap, HeatmapGrid, RenderOptions, DEFAULT_MAX_DIM, LOG_EPSILON};
pub use normalize::normalize;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during visualization operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VizError {
    #[error("No attention data to render")]
    NoData,
}

/// Result type for visualization operations.
pub type VizResult<T> = Result<T, VizError>;

/// Attention weights in canonical `[head][row][col]` layout.
///
/// Every row of a head has the same length. Heads may differ in shape from
/// each other.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalAttention {
    heads: Vec<Vec<Vec<f64>>>,
}

impl CanonicalAttention {
    /// An attention tensor with no heads.
    pub fn empty() -> Self {
        Self::default()
    }

    pub(crate) fn from_heads(heads: Vec<Vec<Vec<f64>>>) -> Self {
        Self { heads }
    }

    /// Number of heads.
    pub fn head_count(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// One head's matrix, if present.
    pub fn head(&self, index: usize) -> Option<&[Vec<f64>]> {
        self.heads.get(index).map(Vec::as_slice)
    }

    /// All heads.
    pub fn heads(&self) -> &[Vec<Vec<f64>>] {
        &self.heads
    }

    /// `(rows, cols)` of one head.
    pub fn head_shape(&self, index: usize) -> Option<(usize, usize)> {
        self.head(index)
            .map(|rows| (rows.len(), rows.first().map(Vec::len).unwrap_or(0)))
    }

    /// Consume into the raw nested vectors.
    pub fn into_inner(self) -> Vec<Vec<Vec<f64>>> {
        self.heads
    }
}
