//! Worst-patch localization.
//!
//! A channel-first volume is split into non-overlapping patches along its
//! spatial axes. Each patch is scored per channel by the soft Dice loss
//! between one-hot prediction and label, and the patch with the highest
//! loss is selected for every channel. Patches at the far border are
//! truncated to the volume rather than padded.

use log::trace;
use ndarray::{Array, ArrayD, ArrayViewD, Axis, Slice};
use serde::{Deserialize, Serialize};

use crate::device::colocated;
use crate::discrepancy::binarize;
use crate::types::{ClickError, LabelMap, spatial_dims};

/// Smoothing term of the Dice loss.
pub const DICE_EPSILON: f64 = 1e-5;

/// A spatial sub-block of a channel-first volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Global index of the patch's first voxel, one entry per spatial axis.
    pub origin: Vec<usize>,
    /// Extent along each spatial axis; smaller than the patch size at the
    /// far border.
    pub shape: Vec<usize>,
}

impl Patch {
    /// View of `volume` restricted to this patch. Axis 0 (channels) is
    /// kept whole.
    #[must_use]
    pub fn view_of<'a, A>(&self, mut volume: ArrayViewD<'a, A>) -> ArrayViewD<'a, A> {
        volume.slice_each_axis_inplace(|ax| match ax.axis.index().checked_sub(1) {
            Some(i) => Slice::from(self.origin[i]..self.origin[i] + self.shape[i]),
            None => Slice::from(..),
        });
        volume
    }
}

/// Split a spatial shape into non-overlapping patches in row-major order.
///
/// # Errors
///
/// Returns [`ClickError::ShapeMismatch`] if `patch_size` does not have one
/// entry per spatial axis, or [`ClickError::InvalidConfig`] if any entry
/// is zero.
pub fn partition(spatial_shape: &[usize], patch_size: &[usize]) -> Result<Vec<Patch>, ClickError> {
    if spatial_shape.len() != patch_size.len() {
        return Err(ClickError::ShapeMismatch {
            context: "patch size vs spatial shape",
            left: patch_size.to_vec(),
            right: spatial_shape.to_vec(),
        });
    }
    if patch_size.contains(&0) {
        return Err(ClickError::InvalidConfig(format!(
            "patch size must be non-zero on every axis, got {patch_size:?}"
        )));
    }

    let mut patches = vec![Patch {
        origin: Vec::new(),
        shape: Vec::new(),
    }];
    for (&len, &step) in spatial_shape.iter().zip(patch_size) {
        patches = patches
            .into_iter()
            .flat_map(|patch| {
                (0..len).step_by(step).map(move |start| {
                    let mut next = patch.clone();
                    next.origin.push(start);
                    next.shape.push(step.min(len - start));
                    next
                })
            })
            .collect();
    }
    Ok(patches)
}

/// Expand a single-channel label volume `(1, ...)` into one channel per
/// label `(C, ...)`, ordered by label id.
///
/// # Errors
///
/// Returns [`ClickError::ShapeMismatch`] if the input has more than one
/// channel or is not a 2D/3D channel-first volume.
pub fn one_hot(volume: ArrayViewD<'_, f32>, labels: &LabelMap) -> Result<ArrayD<f32>, ClickError> {
    spatial_dims(volume.shape())?;
    if volume.shape()[0] != 1 {
        return Err(ClickError::ShapeMismatch {
            context: "one-hot input must have a single channel",
            left: volume.shape().to_vec(),
            right: Vec::new(),
        });
    }

    let mut shape = volume.shape().to_vec();
    shape[0] = labels.len();
    let mut out = Array::zeros(shape);
    for ((_, id), mut channel) in labels.iter().zip(out.axis_iter_mut(Axis(0))) {
        let indicator = binarize(volume.index_axis(Axis(0), 0), id);
        channel.zip_mut_with(&indicator, |o, &on| *o = if on { 1.0 } else { 0.0 });
    }
    Ok(out)
}

/// Soft Dice loss `1 - (2|P∩L| + ε) / (|P| + |L| + ε)` between two
/// single-channel arrays.
#[must_use]
pub fn dice_loss(prediction: ArrayViewD<'_, f32>, label: ArrayViewD<'_, f32>) -> f64 {
    let mut intersection = 0.0;
    let mut predicted = 0.0;
    let mut truth = 0.0;
    for (&p, &l) in prediction.iter().zip(label.iter()) {
        let (p, l) = (f64::from(p), f64::from(l));
        intersection += p * l;
        predicted += p;
        truth += l;
    }
    1.0 - 2.0f64.mul_add(intersection, DICE_EPSILON) / (predicted + truth + DICE_EPSILON)
}

/// Finds, per channel, the patch where prediction and label agree least.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchWorstRegionSelector {
    patch_size: Vec<usize>,
}

impl PatchWorstRegionSelector {
    /// Create a selector for the given spatial patch size.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::InvalidConfig`] if the size is empty or has a
    /// zero entry.
    pub fn new(patch_size: Vec<usize>) -> Result<Self, ClickError> {
        if patch_size.is_empty() || patch_size.contains(&0) {
            return Err(ClickError::InvalidConfig(format!(
                "patch size must be non-empty and non-zero, got {patch_size:?}"
            )));
        }
        Ok(Self { patch_size })
    }

    /// Spatial patch size.
    #[must_use]
    pub fn patch_size(&self) -> &[usize] {
        &self.patch_size
    }

    /// Select the worst patch for each channel of one-hot `prediction`
    /// and `label` volumes shaped `(C, ...)`.
    ///
    /// Returns one patch per channel, in channel order. Ties go to the
    /// patch that comes first in row-major order.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::ShapeMismatch`] if the two volumes differ in
    /// shape or the patch size does not match the spatial rank, and
    /// [`ClickError::DeviceMismatch`] if they live on different devices.
    pub fn select(
        &self,
        prediction: ArrayViewD<'_, f32>,
        label: ArrayViewD<'_, f32>,
    ) -> Result<Vec<Patch>, ClickError> {
        if prediction.shape() != label.shape() {
            return Err(ClickError::ShapeMismatch {
                context: "patch selection (prediction vs label)",
                left: prediction.shape().to_vec(),
                right: label.shape().to_vec(),
            });
        }
        colocated("patch selection (prediction vs label)", &prediction, &label)?;
        spatial_dims(label.shape())?;

        let patches = partition(&label.shape()[1..], &self.patch_size)?;
        let channels = label.shape()[0];
        let mut worst: Vec<Option<(usize, f64)>> = vec![None; channels];

        for (index, patch) in patches.iter().enumerate() {
            let p = patch.view_of(prediction.view());
            let l = patch.view_of(label.view());
            for (channel, best) in worst.iter_mut().enumerate() {
                let loss = dice_loss(
                    p.index_axis(Axis(0), channel),
                    l.index_axis(Axis(0), channel),
                );
                if best.is_none_or(|(_, b)| loss > b) {
                    *best = Some((index, loss));
                }
            }
        }

        trace!(
            "patch selector: {} patches of {:?}, worst per channel {:?}",
            patches.len(),
            self.patch_size,
            worst
        );
        Ok(worst
            .into_iter()
            .filter_map(|best| best.map(|(index, _)| patches[index].clone()))
            .collect())
    }
}
