//! Distance fields over binary masks.
//!
//! The samplers weight candidate voxels by how deep they sit inside a
//! region. [`DistanceField`] is the seam through which that depth is
//! computed; [`EuclideanDistance`] is the default exact implementation.

use ndarray::{ArrayD, ArrayViewD, ArrayViewMut1, Axis, Dimension};

/// Produces a non-negative scalar field from a binary mask.
///
/// Axis 0 of the mask is the channel axis and must never be crossed:
/// each channel is transformed independently. The output has the same
/// shape as the input.
pub trait DistanceField {
    /// Compute the field for `mask` (`true` = foreground).
    fn distance_field(&self, mask: ArrayViewD<'_, bool>) -> ArrayD<f32>;
}

/// Exact Euclidean distance transform.
///
/// Every foreground voxel receives its distance to the nearest
/// background voxel in the same channel; background voxels receive 0.
/// Uses the separable lower-envelope-of-parabolas algorithm of
/// Felzenszwalb and Huttenlocher, one pass per spatial axis.
///
/// A channel without any background voxel is measured against the
/// volume exterior instead, so a voxel on the border gets distance 1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EuclideanDistance;

impl DistanceField for EuclideanDistance {
    #[allow(clippy::cast_possible_truncation)]
    fn distance_field(&self, mask: ArrayViewD<'_, bool>) -> ArrayD<f32> {
        let mut squared = mask.mapv(|fg| if fg { f64::INFINITY } else { 0.0 });
        let first_spatial = usize::from(mask.ndim() > 1);

        let mut scratch = Scratch::default();
        for axis in first_spatial..mask.ndim() {
            for lane in squared.lanes_mut(Axis(axis)) {
                squared_edt_lane(lane, &mut scratch);
            }
        }

        let shape = mask.shape().to_vec();
        squared.indexed_iter_mut().for_each(|(index, value)| {
            if value.is_infinite() {
                *value = squared_exterior_distance(index.slice(), &shape, first_spatial);
            }
        });

        squared.mapv(|d| d.sqrt() as f32)
    }
}

/// Reusable buffers for the 1D transform.
#[derive(Default)]
struct Scratch {
    input: Vec<f64>,
    sites: Vec<usize>,
    bounds: Vec<f64>,
}

/// Replace a lane of squared costs by its 1D squared distance transform.
///
/// Infinite entries are not sites. A lane without any finite entry stays
/// infinite.
#[allow(clippy::cast_precision_loss)]
fn squared_edt_lane(mut lane: ArrayViewMut1<'_, f64>, scratch: &mut Scratch) {
    let Scratch {
        input,
        sites,
        bounds,
    } = scratch;
    input.clear();
    input.extend(lane.iter().copied());
    sites.clear();
    bounds.clear();

    for (q, &fq) in input.iter().enumerate() {
        if !fq.is_finite() {
            continue;
        }
        let qf = q as f64;
        let mut start = f64::NEG_INFINITY;
        while let (Some(&p), Some(&zp)) = (sites.last(), bounds.last()) {
            let pf = p as f64;
            let s = (qf.mul_add(qf, fq) - pf.mul_add(pf, input[p])) / (2.0 * (qf - pf));
            if s <= zp {
                sites.pop();
                bounds.pop();
            } else {
                start = s;
                break;
            }
        }
        sites.push(q);
        bounds.push(start);
    }

    if sites.is_empty() {
        return;
    }

    let mut k = 0;
    for (q, out) in lane.iter_mut().enumerate() {
        let qf = q as f64;
        while k + 1 < sites.len() && bounds[k + 1] <= qf {
            k += 1;
        }
        let dq = qf - sites[k] as f64;
        *out = dq.mul_add(dq, input[sites[k]]);
    }
}

/// Squared distance from a voxel to just outside the nearest border.
#[allow(clippy::cast_precision_loss)]
fn squared_exterior_distance(index: &[usize], shape: &[usize], first_spatial: usize) -> f64 {
    let steps = index
        .iter()
        .zip(shape)
        .skip(first_spatial)
        .map(|(&i, &n)| (i + 1).min(n - i))
        .min()
        .unwrap_or(1);
    let d = steps as f64;
    d * d
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn mask_from(shape: &[usize], on: impl Fn(&[usize]) -> bool) -> ArrayD<bool> {
        ArrayD::from_shape_fn(IxDyn(shape), |idx| on(idx.slice()))
    }

    #[test]
    fn background_is_zero() {
        let mask = mask_from(&[1, 5, 5], |i| i[1] == 2 && i[2] == 2);
        let field = EuclideanDistance.distance_field(mask.view());
        for (idx, &v) in field.indexed_iter() {
            if !mask[idx.slice()] {
                assert!(v.abs() < f32::EPSILON, "background voxel {idx:?} has {v}");
            }
        }
        assert!((field[[0, 2, 2]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn slab_depth_along_one_axis() {
        // Foreground rows 1..=5 of a 7x3 image, background rows 0 and 6.
        let mask = mask_from(&[1, 7, 3], |i| (1..=5).contains(&i[1]));
        let field = EuclideanDistance.distance_field(mask.view());
        let expected = [0.0, 1.0, 2.0, 3.0, 2.0, 1.0, 0.0];
        for (row, &e) in expected.iter().enumerate() {
            for col in 0..3 {
                assert!(
                    (field[[0, row, col]] - e).abs() < 1e-6,
                    "row {row} col {col}: expected {e}, got {}",
                    field[[0, row, col]],
                );
            }
        }
    }

    #[test]
    fn diagonal_distance_is_euclidean() {
        // Single background voxel in a corner of an otherwise full 3D block.
        let mask = mask_from(&[1, 4, 4, 4], |i| i[1..] != [0, 0, 0]);
        let field = EuclideanDistance.distance_field(mask.view());
        let d = field[[0, 3, 3, 3]];
        assert!((d - 27_f32.sqrt()).abs() < 1e-5, "got {d}");
        assert!((field[[0, 1, 1, 0]] - 2_f32.sqrt()).abs() < 1e-5);
    }

    #[test]
    fn channels_are_independent() {
        // Channel 0 is all background, channel 1 has a foreground voxel.
        let mask = mask_from(&[2, 3, 3], |i| i[0] == 1 && i[1] == 1 && i[2] == 1);
        let field = EuclideanDistance.distance_field(mask.view());
        assert!(field.index_axis(Axis(0), 0).iter().all(|&v| v == 0.0));
        assert!((field[[1, 1, 1]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn full_channel_measures_to_exterior() {
        let mask = mask_from(&[1, 5, 5], |_| true);
        let field = EuclideanDistance.distance_field(mask.view());
        assert!((field[[0, 0, 0]] - 1.0).abs() < 1e-6);
        assert!((field[[0, 2, 2]] - 3.0).abs() < 1e-6);
        assert!(field.iter().all(|v| v.is_finite() && *v > 0.0));
    }

    #[test]
    fn empty_mask_is_all_zero() {
        let mask = mask_from(&[1, 4, 4], |_| false);
        let field = EuclideanDistance.distance_field(mask.view());
        assert!(field.iter().all(|&v| v == 0.0));
    }
}
