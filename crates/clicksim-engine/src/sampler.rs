//! Probability-weighted point sampling from scalar fields.
//!
//! Both samplers turn a non-negative field `F` into sampling weights
//! `exp(clip(F, 0, T)) - 1`. The clip `T` keeps the exponential finite
//! even for fields holding many large values; by default it is
//! `floor(ln(f32::MAX)) / 800³`, sized for volumes up to 800³ voxels.
//!
//! Only strictly positive entries are eligible, so a sampled point never
//! lies on the zero-distance boundary of its region. An empty support is
//! the normal "region fully corrected" outcome and yields `None`.

use log::{trace, warn};
use ndarray::{ArrayViewD, Dimension};
use rand::Rng;
use rand::distr::Distribution;
use rand::distr::weighted::WeightedIndex;
use serde::{Deserialize, Serialize};

/// Edge length of the reference volume used to size the default clip.
const REFERENCE_EDGE: f64 = 800.0;

/// Default clip applied before the exponential transform.
///
/// `floor(ln(f32::MAX)) / 800³`.
pub const DEFAULT_OVERFLOW_THRESHOLD: f64 =
    88.0 / (REFERENCE_EDGE * REFERENCE_EDGE * REFERENCE_EDGE);

/// One sampled voxel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampledPoint {
    /// Index into the sampled field, one element per axis.
    pub coordinate: Vec<usize>,
    /// Clipped field value at that index.
    pub value: f32,
}

/// Draws a single voxel with probability proportional to
/// `exp(clip(F, 0, T)) - 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedPointSampler {
    threshold: f64,
}

impl Default for WeightedPointSampler {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_OVERFLOW_THRESHOLD,
        }
    }
}

impl WeightedPointSampler {
    /// Create a sampler with a custom clip threshold.
    #[must_use]
    pub const fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// The clip threshold `T`.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Sample one voxel of `field`.
    ///
    /// Returns `None` if the field's total mass is non-positive or no
    /// entry is strictly positive after clipping. Given the same field
    /// and generator state the draw is reproducible.
    pub fn sample<R>(&self, field: ArrayViewD<'_, f32>, rng: &mut R) -> Option<SampledPoint>
    where
        R: Rng + ?Sized,
    {
        let total: f64 = field
            .iter()
            .filter(|v| !v.is_nan())
            .map(|&v| f64::from(v))
            .sum();
        if total.is_nan() || total <= 0.0 {
            return None;
        }

        let (support, weights): (Vec<usize>, Vec<f64>) = field
            .iter()
            .enumerate()
            .filter_map(|(flat, &v)| {
                let clipped = clip(v, self.threshold);
                (clipped > 0.0).then(|| (flat, clipped.exp_m1()))
            })
            .unzip();
        trace!("weighted sampler: {} eligible voxels", support.len());
        if support.is_empty() {
            return None;
        }

        let chosen = match WeightedIndex::new(&weights) {
            Ok(dist) => support[dist.sample(rng)],
            Err(e) => {
                warn!("weighted sampler: cannot build weight table: {e}");
                return None;
            }
        };

        let coordinate = unravel(chosen, field.shape());
        let value = field
            .get(coordinate.as_slice())
            .map_or(0.0, |&v| narrow(clip(v, self.threshold)));
        Some(SampledPoint { coordinate, value })
    }
}

/// Draws several distinct voxels from the one-sided border of a mask.
///
/// A voxel is on the border when it is foreground and the voxel before it
/// along axis 0 (wrapping around) is background. Weights follow the same
/// clipped exponential transform as [`WeightedPointSampler`], applied to
/// the mask values themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BorderPointSampler {
    threshold: f64,
}

impl Default for BorderPointSampler {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_OVERFLOW_THRESHOLD,
        }
    }
}

impl BorderPointSampler {
    /// Create a sampler with a custom clip threshold.
    #[must_use]
    pub const fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Sample `num_points` distinct border voxels of `mask`.
    ///
    /// Returns `None` if the border holds fewer than `num_points` voxels;
    /// a partial result is never returned.
    pub fn sample<R>(
        &self,
        mask: ArrayViewD<'_, f32>,
        num_points: usize,
        rng: &mut R,
    ) -> Option<Vec<SampledPoint>>
    where
        R: Rng + ?Sized,
    {
        let shape = mask.shape();
        let (support, weights): (Vec<usize>, Vec<f64>) = mask
            .indexed_iter()
            .enumerate()
            .filter_map(|(flat, (index, &v))| {
                let clipped = clip(v, self.threshold);
                if clipped <= 0.0 || !preceding_is_background(&mask, index.slice()) {
                    return None;
                }
                Some((flat, clipped.exp_m1()))
            })
            .unzip();
        trace!(
            "border sampler: {} border voxels, {num_points} requested",
            support.len()
        );
        if support.len() < num_points {
            return None;
        }

        let picked = match rand::seq::index::sample_weighted(
            rng,
            support.len(),
            |i| weights[i],
            num_points,
        ) {
            Ok(picked) => picked,
            Err(e) => {
                warn!("border sampler: cannot build weight table: {e}");
                return None;
            }
        };

        let points = picked
            .into_iter()
            .map(|i| {
                let coordinate = unravel(support[i], shape);
                let value = mask
                    .get(coordinate.as_slice())
                    .map_or(0.0, |&v| narrow(clip(v, self.threshold)));
                SampledPoint { coordinate, value }
            })
            .collect();
        Some(points)
    }
}

/// Clip to `[0, threshold]`; NaN maps to 0 so it is never eligible.
fn clip(v: f32, threshold: f64) -> f64 {
    let v = f64::from(v);
    if v.is_nan() { 0.0 } else { v.clamp(0.0, threshold) }
}

#[allow(clippy::cast_possible_truncation)]
fn narrow(v: f64) -> f32 {
    v as f32
}

/// Whether the voxel before `index` along axis 0 (wrapping) is background.
#[allow(clippy::float_cmp)]
fn preceding_is_background(mask: &ArrayViewD<'_, f32>, index: &[usize]) -> bool {
    let Some((&first, rest)) = index.split_first() else {
        return false;
    };
    let len = mask.shape()[0];
    let mut previous = Vec::with_capacity(index.len());
    previous.push((first + len - 1) % len);
    previous.extend_from_slice(rest);
    mask.get(previous.as_slice()).is_some_and(|&v| v == 0.0)
}

/// Convert a row-major flat index into a multi-dimensional index.
fn unravel(mut flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut index = vec![0; shape.len()];
    for (slot, &len) in index.iter_mut().zip(shape).rev() {
        if len > 0 {
            *slot = flat % len;
            flat /= len;
        }
    }
    index
}
