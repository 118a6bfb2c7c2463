//! Discrepancy regions between ground truth and prediction.
//!
//! For every label the ground truth and the prediction are binarized
//! against the label's id and compared voxel by voxel. Voxels the
//! annotator would have to add form the false-negative mask; voxels they
//! would have to remove form the false-positive mask.
//!
//! The background label uses the same rule: its indicator is "value is
//! 0", so background is correct wherever neither volume is foreground.

use std::collections::BTreeMap;

use ndarray::{ArrayD, ArrayViewD, Zip};

use crate::device::colocated;
use crate::types::{ClickError, LabelMap};

/// False-negative and false-positive masks for one label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    /// Label says foreground, prediction says background.
    pub false_negative: ArrayD<bool>,
    /// Prediction says foreground, label says background.
    pub false_positive: ArrayD<bool>,
}

impl Discrepancy {
    /// Number of false-negative voxels.
    #[must_use]
    pub fn false_negative_count(&self) -> usize {
        self.false_negative.iter().filter(|&&v| v).count()
    }

    /// Number of false-positive voxels.
    #[must_use]
    pub fn false_positive_count(&self) -> usize {
        self.false_positive.iter().filter(|&&v| v).count()
    }

    /// Returns `true` if label and prediction agree everywhere.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.false_negative.iter().chain(&self.false_positive).any(|&v| v)
    }
}

/// Discrepancies for every label, keyed by label name.
pub type DiscrepancyMap = BTreeMap<String, Discrepancy>;

/// Indicator mask of voxels whose value equals `id`.
#[must_use]
pub fn binarize(volume: ArrayViewD<'_, f32>, id: u32) -> ArrayD<bool> {
    #[allow(clippy::cast_precision_loss)]
    let target = id as f32;
    volume.mapv(|v| (v - target).abs() < 0.5)
}

/// Compute the discrepancy of a single label.
///
/// # Errors
///
/// Returns [`ClickError::UnknownLabel`] if `name` is not in `labels`,
/// [`ClickError::ShapeMismatch`] if the volumes differ in shape, or
/// [`ClickError::DeviceMismatch`] if they live on different devices.
pub fn label_discrepancy(
    label: ArrayViewD<'_, f32>,
    prediction: ArrayViewD<'_, f32>,
    labels: &LabelMap,
    name: &str,
) -> Result<Discrepancy, ClickError> {
    check_pair(&label, &prediction)?;
    let id = labels.id(name)?;
    Ok(discrepancy_for_id(label, prediction, id))
}

/// Compute the discrepancies of every label in `labels`.
///
/// # Errors
///
/// Returns [`ClickError::ShapeMismatch`] if the volumes differ in shape,
/// or [`ClickError::DeviceMismatch`] if they live on different devices.
pub fn find_discrepancies(
    label: ArrayViewD<'_, f32>,
    prediction: ArrayViewD<'_, f32>,
    labels: &LabelMap,
) -> Result<DiscrepancyMap, ClickError> {
    check_pair(&label, &prediction)?;
    Ok(labels
        .iter()
        .map(|(name, id)| {
            (
                name.to_string(),
                discrepancy_for_id(label.view(), prediction.view(), id),
            )
        })
        .collect())
}

fn check_pair(label: &ArrayViewD<'_, f32>, prediction: &ArrayViewD<'_, f32>) -> Result<(), ClickError> {
    if label.shape() != prediction.shape() {
        return Err(ClickError::ShapeMismatch {
            context: "discrepancy (label vs prediction)",
            left: label.shape().to_vec(),
            right: prediction.shape().to_vec(),
        });
    }
    colocated("discrepancy (label vs prediction)", label, prediction)?;
    Ok(())
}

fn discrepancy_for_id(label: ArrayViewD<'_, f32>, prediction: ArrayViewD<'_, f32>, id: u32) -> Discrepancy {
    let truth = binarize(label, id);
    let predicted = binarize(prediction, id);
    let false_negative = Zip::from(&truth).and(&predicted).map_collect(|&t, &p| t && !p);
    let false_positive = Zip::from(&truth).and(&predicted).map_collect(|&t, &p| !t && p);
    Discrepancy {
        false_negative,
        false_positive,
    }
}
