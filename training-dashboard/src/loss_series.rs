//! Append-only loss-over-step series.
//!
//! [`LossSeries::append`] returns a new series and leaves the receiver
//! untouched, so a renderer holding an older snapshot keeps seeing exactly
//! what it drew. Points live in a persistent [`im::Vector`], so an append
//! shares structure with the previous series instead of copying it. Change
//! detection compares version stamps ([`LossSeries::same_as`]).

use std::sync::atomic::{AtomicU64, Ordering};

use im::Vector;
use serde::{Deserialize, Serialize};

static NEXT_VERSION: AtomicU64 = AtomicU64::new(1);

fn next_version() -> u64 {
    NEXT_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// A single `(step, loss)` observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossPoint {
    pub step: f64,
    pub loss: f64,
}

impl LossPoint {
    pub fn new(step: f64, loss: f64) -> Self {
        Self { step, loss }
    }
}

/// Loss points in arrival order. Never re-sorted or deduplicated.
#[derive(Debug, Clone)]
pub struct LossSeries {
    points: Vector<LossPoint>,
    version: u64,
}

impl Default for LossSeries {
    fn default() -> Self {
        Self::new()
    }
}

impl LossSeries {
    pub fn new() -> Self {
        Self {
            points: Vector::new(),
            version: next_version(),
        }
    }

    /// Return a new series with `point` appended.
    ///
    /// O(log n): the new series shares all existing chunks with `self`.
    #[must_use]
    pub fn append(&self, point: LossPoint) -> Self {
        let mut points = self.points.clone();
        points.push_back(point);
        Self {
            points,
            version: next_version(),
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Points in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &LossPoint> + '_ {
        self.points.iter()
    }

    pub fn to_vec(&self) -> Vec<LossPoint> {
        self.points.iter().copied().collect()
    }

    /// Most recently received point.
    pub fn latest(&self) -> Option<LossPoint> {
        self.points.last().copied()
    }

    /// True when `other` is this series or a clone of it.
    pub fn same_as(&self, other: &LossSeries) -> bool {
        self.version == other.version
    }

    /// `(x, y)` pairs for a line chart.
    pub fn chart_data(&self) -> Vec<(f64, f64)> {
        self.points.iter().map(|p| (p.step, p.loss)).collect()
    }

    /// `(min, max)` of the loss values.
    pub fn loss_bounds(&self) -> Option<(f64, f64)> {
        bounds(self.points.iter().map(|p| p.loss))
    }

    /// `(min, max)` of the step values. Steps are not assumed sorted.
    pub fn step_bounds(&self) -> Option<(f64, f64)> {
        bounds(self.points.iter().map(|p| p.step))
    }
}

impl PartialEq for LossSeries {
    fn eq(&self, other: &Self) -> bool {
        self.points == other.points
    }
}

fn bounds(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values.fold(None, |acc, v| match acc {
        None => Some((v, v)),
        Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
    })
}
