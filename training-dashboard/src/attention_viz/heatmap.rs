//! Heatmap grid generation for one attention head.
//!
//! Large heads are reduced by striding (every Nth row and column) rather
//! than averaging, so isolated peaks survive downsampling. Log scaling is
//! applied to the output grid only; the canonical tensor is never touched.

use serde::{Deserialize, Serialize};

use super::{CanonicalAttention, VizError, VizResult};

/// Default largest rendered dimension before striding.
pub const DEFAULT_MAX_DIM: usize = 64;

/// Floor applied before `log10` so zero and negative weights stay finite.
pub const LOG_EPSILON: f64 = 1e-10;

/// Display options for [`render`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Replace each cell `v` with `log10(max(v, 1e-10))`.
    pub log_scale: bool,
    /// Largest rows/cols rendered before striding.
    pub max_dim: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            log_scale: false,
            max_dim: DEFAULT_MAX_DIM,
        }
    }
}

impl RenderOptions {
    #[must_use]
    pub const fn with_log_scale(mut self, log_scale: bool) -> Self {
        self.log_scale = log_scale;
        self
    }

    #[must_use]
    pub const fn with_max_dim(mut self, max_dim: usize) -> Self {
        self.max_dim = max_dim;
        self
    }
}

/// Heatmap-ready grid plus the layout metadata used to produce it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapGrid {
    /// Cell values, already strided and (optionally) log-scaled.
    pub grid: Vec<Vec<f64>>,
    /// Colour scale bounds: `[0, 1]`, or `[log10(1e-10), 0]` in log mode.
    pub value_range: (f64, f64),
    /// Head actually rendered after clamping.
    pub head_index: usize,
    /// Number of heads in the source tensor.
    pub head_count: usize,
    /// Rows of the source head.
    pub source_rows: usize,
    /// Columns of the source head.
    pub source_cols: usize,
    /// Row sampling stride (1 when not downsampled).
    pub row_stride: usize,
    /// Column sampling stride (1 when not downsampled).
    pub col_stride: usize,
}

impl HeatmapGrid {
    pub fn num_rows(&self) -> usize {
        self.grid.len()
    }

    pub fn num_cols(&self) -> usize {
        self.grid.first().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether striding reduced the source head.
    pub fn is_downsampled(&self) -> bool {
        self.row_stride > 1 || self.col_stride > 1
    }

    /// Position of `value` within `value_range`, clamped to [0, 1].
    pub fn scaled(&self, value: f64) -> f64 {
        let (lo, hi) = self.value_range;
        if (hi - lo).abs() < f64::EPSILON {
            0.5
        } else {
            ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
        }
    }

    /// Render as ASCII art, one character per cell, with a legend line.
    pub fn render_ascii(&self, color_map: ColorMap) -> String {
        let mut output = String::new();
        for row in &self.grid {
            for &value in row {
                output.push(color_map.get_ascii_char(self.scaled(value)));
            }
            output.push('\n');
        }

        output.push_str("Legend: ");
        output.push_str(&format!("[{:.2} ", self.value_range.0));
        for c in ASCII_RAMP {
            output.push(*c);
        }
        output.push_str(&format!(" {:.2}]", self.value_range.1));
        output.push('\n');
        output
    }
}

/// Produce a display grid for one head of `canonical`.
///
/// `head_index` is clamped into range. Returns [`VizError::NoData`] when the
/// tensor has no heads or the selected head has no cells.
pub fn render(
    canonical: &CanonicalAttention,
    head_index: usize,
    options: RenderOptions,
) -> VizResult<HeatmapGrid> {
    if canonical.is_empty() {
        return Err(VizError::NoData);
    }
    let head_count = canonical.head_count();
    let head_index = head_index.min(head_count - 1);
    let matrix = canonical.head(head_index).ok_or(VizError::NoData)?;

    let rows = matrix.len();
    let cols = matrix.first().map(Vec::len).unwrap_or(0);
    if rows == 0 || cols == 0 {
        return Err(VizError::NoData);
    }

    let max_dim = options.max_dim.max(1);
    let (row_stride, col_stride) = if rows > max_dim || cols > max_dim {
        (rows.div_ceil(max_dim), cols.div_ceil(max_dim))
    } else {
        (1, 1)
    };

    let grid = matrix
        .iter()
        .step_by(row_stride)
        .map(|row| {
            row.iter()
                .step_by(col_stride)
                .map(|&v| if options.log_scale { log_scale(v) } else { v })
                .collect()
        })
        .collect();

    let value_range = if options.log_scale {
        (LOG_EPSILON.log10(), 0.0)
    } else {
        (0.0, 1.0)
    };

    Ok(HeatmapGrid {
        grid,
        value_range,
        head_index,
        head_count,
        source_rows: rows,
        source_cols: cols,
        row_stride,
        col_stride,
    })
}

fn log_scale(value: f64) -> f64 {
    value.max(LOG_EPSILON).log10()
}

const ASCII_RAMP: &[char] = &[' ', '.', ':', '-', '=', '+', '*', '#', '@'];

/// Color map options for heatmap cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorMap {
    /// White to blue (sequential).
    Blues,
    /// White to red (sequential).
    Reds,
    /// Viridis perceptually uniform color map.
    #[default]
    Viridis,
    /// Grayscale.
    Grayscale,
}

impl ColorMap {
    /// Get RGB color for a value in range [0, 1].
    pub fn get_color(&self, value: f64) -> (u8, u8, u8) {
        let v = value.clamp(0.0, 1.0);

        match self {
            ColorMap::Blues => (
                (255.0 * (1.0 - v * 0.8)) as u8,
                (255.0 * (1.0 - v * 0.5)) as u8,
                255,
            ),
            ColorMap::Reds => (
                255,
                (255.0 * (1.0 - v * 0.8)) as u8,
                (255.0 * (1.0 - v * 0.8)) as u8,
            ),
            ColorMap::Viridis => {
                // Simplified viridis approximation
                let r = (68.0 + v * (253.0 - 68.0)) as u8;
                let g = (1.0 + v * (231.0 - 1.0)) as u8;
                let b = (84.0 + (1.0 - (v - 0.5).abs() * 2.0) * (150.0 - 84.0)) as u8;
                (r, g, b)
            }
            ColorMap::Grayscale => {
                let c = (255.0 * v) as u8;
                (c, c, c)
            }
        }
    }

    /// Get an ASCII character representing a value in range [0, 1].
    pub fn get_ascii_char(&self, value: f64) -> char {
        let v = value.clamp(0.0, 1.0);
        let idx = ((v * (ASCII_RAMP.len() - 1) as f64) as usize).min(ASCII_RAMP.len() - 1);
        ASCII_RAMP[idx]
    }

    /// Next map in the cycle, for the colour toggle key.
    pub fn next(self) -> Self {
        match self {
            ColorMap::Viridis => ColorMap::Blues,
            ColorMap::Blues => ColorMap::Reds,
            ColorMap::Reds => ColorMap::Grayscale,
            ColorMap::Grayscale => ColorMap::Viridis,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColorMap::Blues => "blues",
            ColorMap::Reds => "reds",
            ColorMap::Viridis => "viridis",
            ColorMap::Grayscale => "grayscale",
        }
    }
}
