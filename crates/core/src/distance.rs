//! Distance metrics and f32 kernels.
//!
//! Supports three distance functions: cosine, euclidean (L2), and inner product.
//! All metrics return a distance where **lower is better** (more similar), so every
//! index and the flat scan can order candidates the same way regardless of metric.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Distance metric used for vector similarity computation.
///
/// Fixed when a collection is created and applied to every insert and search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine distance: `1 - cosine_similarity`. Range: \[0, 2\].
    Cosine,
    /// Euclidean (L2) distance. Range: \[0, ∞).
    Euclidean,
    /// Negative inner product: `-dot(a, b)`. Lower = higher similarity.
    InnerProduct,
}

impl Default for DistanceMetric {
    fn default() -> Self {
        DistanceMetric::Cosine
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::Euclidean => "euclidean",
            DistanceMetric::InnerProduct => "inner_product",
        };
        f.write_str(name)
    }
}

impl DistanceMetric {
    /// Exact f32-vs-f32 distance.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - cosine_f32(a, b),
            DistanceMetric::Euclidean => euclidean_sq_f32(a, b).sqrt(),
            DistanceMetric::InnerProduct => -dot_product_f32(a, b),
        }
    }

    /// Maps a distance onto a similarity in \[0, 1\] where 1 is most similar.
    ///
    /// Cosine uses `1 - d/2`, euclidean `1 / (1 + d)`, inner product the logistic
    /// of the dot product. Each mapping is monotone decreasing in the distance, so
    /// ranking by similarity preserves the index's distance order.
    pub fn similarity(&self, distance: f32) -> f32 {
        let s = match self {
            DistanceMetric::Cosine => 1.0 - distance / 2.0,
            DistanceMetric::Euclidean => 1.0 / (1.0 + distance.max(0.0)),
            DistanceMetric::InnerProduct => 1.0 / (1.0 + distance.exp()),
        };
        if s.is_finite() {
            s.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// Cosine similarity between two f32 slices. Zero vectors have similarity 0.
#[inline]
pub fn cosine_f32(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = [0.0f32; 4];
    let mut na = [0.0f32; 4];
    let mut nb = [0.0f32; 4];
    let chunks = a.len() / 4;
    for c in 0..chunks {
        let i = c * 4;
        for lane in 0..4 {
            let x = a[i + lane];
            let y = b[i + lane];
            dot[lane] += x * y;
            na[lane] += x * x;
            nb[lane] += y * y;
        }
    }
    let mut dot_sum: f32 = dot.iter().sum();
    let mut na_sum: f32 = na.iter().sum();
    let mut nb_sum: f32 = nb.iter().sum();
    for i in chunks * 4..a.len() {
        dot_sum += a[i] * b[i];
        na_sum += a[i] * a[i];
        nb_sum += b[i] * b[i];
    }
    let denom = na_sum.sqrt() * nb_sum.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }
    (dot_sum / denom).clamp(-1.0, 1.0)
}

/// Squared Euclidean distance between two f32 slices.
#[inline]
pub fn euclidean_sq_f32(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 4];
    let chunks = a.len() / 4;
    for c in 0..chunks {
        let i = c * 4;
        for lane in 0..4 {
            let d = a[i + lane] - b[i + lane];
            acc[lane] += d * d;
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for i in chunks * 4..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

/// Dot product between two f32 slices.
#[inline]
pub fn dot_product_f32(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 4];
    let chunks = a.len() / 4;
    for c in 0..chunks {
        let i = c * 4;
        for lane in 0..4 {
            acc[lane] += a[i + lane] * b[i + lane];
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for i in chunks * 4..a.len() {
        sum += a[i] * b[i];
    }
    sum
}
