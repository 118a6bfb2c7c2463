//! Guidance channels rasterized from click lists.
//!
//! Each label's clicks become one extra input channel: the clicked voxels
//! are set to 1, optionally smoothed with a Gaussian, rescaled into
//! `[0, 1]`, and optionally thresholded into filled balls.

use log::{debug, trace};
use ndarray::{ArrayD, ArrayViewD, ArrayViewMut1, Axis, IxDyn};

use crate::coordinate::ClickList;
use crate::device::colocated;
use crate::session::ClickSession;
use crate::types::{ClickConfig, ClickError, LabelMap, spatial_dims};

/// Normalized value above which a smoothed click counts as inside its
/// disk.
pub const DISK_THRESHOLD: f32 = 0.1;

/// Kernel half-width in standard deviations.
const TRUNCATE: f32 = 4.0;

/// Turns click lists into guidance channels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuidanceRasterizer {
    sigma: f32,
    disks: bool,
}

impl GuidanceRasterizer {
    /// Create a rasterizer.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::InvalidConfig`] if `sigma` is negative or
    /// not finite.
    pub fn new(sigma: f32, disks: bool) -> Result<Self, ClickError> {
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(ClickError::InvalidConfig(format!(
                "sigma must be finite and non-negative, got {sigma}"
            )));
        }
        Ok(Self { sigma, disks })
    }

    /// Create a rasterizer from the guidance fields of `config`.
    ///
    /// # Errors
    ///
    /// Same as [`GuidanceRasterizer::new`].
    pub fn from_config(config: &ClickConfig) -> Result<Self, ClickError> {
        Self::new(config.sigma, config.disks)
    }

    /// Rasterize `clicks` into a `(1, ...spatial_shape)` channel.
    ///
    /// Coordinates may or may not carry the leading slot; their trailing
    /// components are clamped into bounds. An empty list yields zeros.
    ///
    /// # Errors
    ///
    /// - [`ClickError::ShapeMismatch`] unless `spatial_shape` has 2 or 3
    ///   axes.
    /// - [`ClickError::MalformedCoordinate`] if a click has fewer
    ///   elements than there are spatial axes.
    /// - [`ClickError::InvalidRange`] if the result leaves `[0, 1]`.
    pub fn rasterize(
        &self,
        spatial_shape: &[usize],
        clicks: &ClickList,
        label: &str,
    ) -> Result<ArrayD<f32>, ClickError> {
        let mut shape = Vec::with_capacity(spatial_shape.len() + 1);
        shape.push(1);
        shape.extend_from_slice(spatial_shape);
        let spatial = spatial_dims(&shape)?;
        let mut signal = ArrayD::<f32>::zeros(IxDyn(&shape));
        if clicks.is_empty() || signal.is_empty() {
            return Ok(signal);
        }

        let mut placed = 0_usize;
        for coordinate in clicks.coordinates() {
            let Some(tail) = coordinate.spatial(spatial) else {
                return Err(ClickError::MalformedCoordinate {
                    label: label.to_string(),
                    coordinate: coordinate.elements().to_vec(),
                    expected: spatial + 1,
                });
            };
            // Negative components mark an unset click.
            if tail.iter().any(|&c| c < 0) {
                continue;
            }
            let mut index = Vec::with_capacity(spatial + 1);
            index.push(0);
            index.extend(tail.iter().zip(spatial_shape).map(|(&c, &len)| clamp_index(c, len)));
            signal[index.as_slice()] = 1.0;
            placed += 1;
        }
        if placed == 0 {
            return Ok(signal);
        }

        if self.sigma > 0.0 {
            let kernel = gaussian_kernel(self.sigma);
            let mut scratch = Vec::new();
            for axis in 1..signal.ndim() {
                for lane in signal.lanes_mut(Axis(axis)) {
                    convolve_lane(lane, &kernel, &mut scratch);
                }
            }
        }

        normalize(&mut signal);
        if self.disks {
            signal.mapv_inplace(|v| if v > DISK_THRESHOLD { 1.0 } else { 0.0 });
        }

        if signal.iter().any(|v| !(0.0..=1.0).contains(v)) {
            let (min, max) = min_max(&signal);
            return Err(ClickError::InvalidRange {
                label: label.to_string(),
                min,
                max,
            });
        }
        trace!(
            "guidance `{label}`: {} clicks, sigma {}, disks {}",
            clicks.len(),
            self.sigma,
            self.disks
        );
        Ok(signal)
    }
}

/// Append `channel` to `input` along the channel axis.
///
/// # Errors
///
/// Returns [`ClickError::ShapeMismatch`] if the spatial shapes differ and
/// [`ClickError::DeviceMismatch`] if the volumes live on different devices.
pub fn append_channel(
    input: ArrayViewD<'_, f32>,
    channel: ArrayViewD<'_, f32>,
) -> Result<ArrayD<f32>, ClickError> {
    colocated("guidance append", &input, &channel)?;
    concatenate_channels(input, &[channel])
}

/// Rasterize every label's clicks and append them to `image` in label id
/// order.
///
/// # Errors
///
/// Returns [`ClickError::InvalidConfig`] for an invalid `config`,
/// [`ClickError::ShapeMismatch`] if `image` is not a 2D/3D channel-first
/// volume matching the session's dimensionality, and any error of
/// [`GuidanceRasterizer::rasterize`].
pub fn add_guidance_signals(
    image: ArrayViewD<'_, f32>,
    session: &ClickSession,
    labels: &LabelMap,
    config: &ClickConfig,
) -> Result<ArrayD<f32>, ClickError> {
    config.validate()?;
    let spatial = spatial_dims(image.shape())?;
    if spatial != session.spatial_dims() {
        return Err(ClickError::ShapeMismatch {
            context: "guidance (session vs image spatial dims)",
            left: vec![session.spatial_dims()],
            right: vec![spatial],
        });
    }

    let rasterizer = GuidanceRasterizer::from_config(config)?;
    let spatial_shape = &image.shape()[1..];
    let channels = labels
        .iter()
        .map(|(name, _)| rasterizer.rasterize(spatial_shape, session.clicks(name), name))
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        "guidance: appended {} channel(s) to input of shape {:?}",
        channels.len(),
        image.shape()
    );

    let views: Vec<_> = channels.iter().map(ArrayD::view).collect();
    concatenate_channels(image, &views)
}

fn concatenate_channels(
    input: ArrayViewD<'_, f32>,
    channels: &[ArrayViewD<'_, f32>],
) -> Result<ArrayD<f32>, ClickError> {
    if let Some(bad) = channels
        .iter()
        .find(|c| input.ndim() == 0 || c.ndim() != input.ndim() || c.shape()[1..] != input.shape()[1..])
    {
        return Err(ClickError::ShapeMismatch {
            context: "guidance append (input vs channel)",
            left: input.shape().to_vec(),
            right: bad.shape().to_vec(),
        });
    }
    let mut views = Vec::with_capacity(channels.len() + 1);
    views.push(input.view());
    views.extend(channels.iter().map(|c| c.view()));
    ndarray::concatenate(Axis(0), &views).map_err(|_| ClickError::ShapeMismatch {
        context: "guidance append (concatenate)",
        left: views.first().map(|v| v.shape().to_vec()).unwrap_or_default(),
        right: Vec::new(),
    })
}

/// Clamp a non-negative component to the last index along its axis.
fn clamp_index(c: i64, len: usize) -> usize {
    let max = len.saturating_sub(1);
    usize::try_from(c).map_or(max, |c| c.min(max))
}

/// Sampled Gaussian truncated at `TRUNCATE * sigma`, normalized to unit
/// sum.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (sigma * TRUNCATE).max(0.5).round() as usize;
    let denom = 2.0 * sigma * sigma;
    let mut kernel: Vec<f32> = (0..=2 * radius)
        .map(|i| {
            let x = i as f32 - radius as f32;
            (-x * x / denom).exp()
        })
        .collect();
    let sum: f32 = kernel.iter().sum();
    for w in &mut kernel {
        *w /= sum;
    }
    kernel
}

/// Convolve one lane in place with zero padding.
fn convolve_lane(mut lane: ArrayViewMut1<'_, f32>, kernel: &[f32], scratch: &mut Vec<f32>) {
    scratch.clear();
    scratch.extend(lane.iter().copied());
    let radius = kernel.len() / 2;
    let n = scratch.len();
    for (i, out) in lane.iter_mut().enumerate() {
        let lo = i.saturating_sub(radius);
        let hi = (i + radius).min(n - 1);
        *out = (lo..=hi)
            .map(|j| scratch[j] * kernel[j + radius - i])
            .sum();
    }
}

/// Rescale into `[0, 1]`; leaves constant channels unchanged.
fn normalize(signal: &mut ArrayD<f32>) {
    let (min, max) = min_max(signal);
    let range = max - min;
    if range > 0.0 {
        signal.mapv_inplace(|v| (v - min) / range);
    }
}

fn min_max(signal: &ArrayD<f32>) -> (f32, f32) {
    signal
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::coordinate::Coordinate;
    use ndarray::Dimension;

    fn clicks(coords: &[&[i64]]) -> ClickList {
        coords.iter().map(|c| Coordinate::new(c.to_vec())).collect()
    }

    #[test]
    fn empty_click_list_is_zero_channel() {
        let r = GuidanceRasterizer::new(2.0, true).unwrap();
        let signal = r.rasterize(&[6, 7, 8], &ClickList::new(), "lesion").unwrap();
        assert_eq!(signal.shape(), &[1, 6, 7, 8]);
        assert!(signal.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn zero_sigma_marks_exactly_the_clicked_voxels() {
        let r = GuidanceRasterizer::new(0.0, false).unwrap();
        let list = clicks(&[&[0, 1, 1], &[0, 3, 2]]);
        let signal = r.rasterize(&[5, 5], &list, "lesion").unwrap();
        let hot: Vec<_> = signal
            .indexed_iter()
            .filter(|&(_, &v)| v != 0.0)
            .map(|(idx, &v)| (idx.slice().to_vec(), v))
            .collect();
        assert_eq!(
            hot,
            vec![(vec![0, 1, 1], 1.0), (vec![0, 3, 2], 1.0)]
        );
    }

    #[test]
    fn clicks_past_the_far_edge_are_clamped() {
        let r = GuidanceRasterizer::new(0.0, false).unwrap();
        let list = clicks(&[&[0, 20, 2]]);
        let signal = r.rasterize(&[5, 5], &list, "lesion").unwrap();
        assert!((signal[[0, 4, 2]] - 1.0).abs() < f32::EPSILON);
        assert!((signal.sum() - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn clicks_with_negative_components_are_skipped() {
        let r = GuidanceRasterizer::new(0.0, false).unwrap();
        let signal = r
            .rasterize(&[5, 5], &clicks(&[&[0, 20, -3]]), "lesion")
            .unwrap();
        assert!(signal.iter().all(|&v| v == 0.0));

        let signal = r
            .rasterize(&[5, 5], &clicks(&[&[0, -1, -1], &[0, 2, 3]]), "lesion")
            .unwrap();
        assert!((signal[[0, 2, 3]] - 1.0).abs() < f32::EPSILON);
        assert!((signal.sum() - 1.0).abs() < f32::EPSILON);

        let smoothed = GuidanceRasterizer::new(2.0, true)
            .unwrap()
            .rasterize(&[5, 5], &clicks(&[&[0, -1, 2]]), "lesion")
            .unwrap();
        assert!(smoothed.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn spatial_only_coordinates_are_accepted() {
        let r = GuidanceRasterizer::new(0.0, false).unwrap();
        let list = clicks(&[&[2, 3, 4]]);
        let signal = r.rasterize(&[5, 5, 5], &list, "lesion").unwrap();
        assert!((signal[[0, 2, 3, 4]] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn short_coordinate_is_malformed() {
        let r = GuidanceRasterizer::new(0.0, false).unwrap();
        let list = clicks(&[&[2, 3]]);
        let result = r.rasterize(&[5, 5, 5], &list, "lesion");
        assert!(matches!(
            result,
            Err(ClickError::MalformedCoordinate { expected: 4, .. })
        ));
    }

    #[test]
    fn smoothed_signal_peaks_at_click() {
        let r = GuidanceRasterizer::new(1.0, false).unwrap();
        let list = clicks(&[&[0, 4, 4]]);
        let signal = r.rasterize(&[9, 9], &list, "lesion").unwrap();
        assert!((signal[[0, 4, 4]] - 1.0).abs() < 1e-6);
        assert!(signal.iter().all(|&v| (0.0..=1.0).contains(&v)));
        assert!(signal[[0, 4, 5]] > signal[[0, 4, 6]]);
        assert!(signal[[0, 4, 6]] > 0.0);
        // Symmetric around the click.
        assert!((signal[[0, 3, 4]] - signal[[0, 5, 4]]).abs() < 1e-6);
    }

    #[test]
    fn disks_are_filled_balls() {
        let r = GuidanceRasterizer::new(1.0, true).unwrap();
        let list = clicks(&[&[0, 4, 4]]);
        let signal = r.rasterize(&[9, 9], &list, "lesion").unwrap();
        assert!(signal.iter().all(|&v| v == 0.0 || v == 1.0));
        for inside in [[0, 4, 4], [0, 6, 4], [0, 5, 5], [0, 4, 2]] {
            assert!((signal[inside] - 1.0).abs() < f32::EPSILON, "{inside:?}");
        }
        for outside in [[0, 6, 5], [0, 7, 4], [0, 0, 0]] {
            assert!(signal[outside].abs() < f32::EPSILON, "{outside:?}");
        }
    }

    #[test]
    fn constant_channel_is_left_as_is() {
        let r = GuidanceRasterizer::new(0.0, false).unwrap();
        let list = clicks(&[&[0, 0, 0]]);
        let signal = r.rasterize(&[1, 1], &list, "lesion").unwrap();
        assert!((signal[[0, 0, 0]] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn negative_sigma_is_rejected() {
        assert!(matches!(
            GuidanceRasterizer::new(-0.5, false),
            Err(ClickError::InvalidConfig(_))
        ));
    }

    #[test]
    fn kernel_has_unit_sum() {
        for sigma in [0.3_f32, 1.0, 2.5] {
            let k = gaussian_kernel(sigma);
            assert_eq!(k.len() % 2, 1);
            assert!((k.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn add_guidance_appends_one_channel_per_label() {
        let labels = LabelMap::from_names(["background", "lesion"]).unwrap();
        let mut session = ClickSession::new(2);
        session.push("lesion", Coordinate::new(vec![0, 2, 2])).unwrap();
        let image = ArrayD::from_elem(IxDyn(&[1, 5, 5]), 0.5_f32);
        let config = ClickConfig {
            sigma: 0.0,
            ..ClickConfig::default()
        };

        let stacked = add_guidance_signals(image.view(), &session, &labels, &config).unwrap();
        assert_eq!(stacked.shape(), &[3, 5, 5]);
        assert!((stacked[[0, 2, 2]] - 0.5).abs() < f32::EPSILON);
        // Background has no clicks.
        assert!(stacked.index_axis(Axis(0), 1).iter().all(|&v| v == 0.0));
        assert!((stacked[[2, 2, 2]] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn add_guidance_rejects_dimension_mismatch() {
        let labels = LabelMap::from_names(["background", "lesion"]).unwrap();
        let session = ClickSession::new(3);
        let image = ArrayD::<f32>::zeros(IxDyn(&[1, 5, 5]));
        let result = add_guidance_signals(image.view(), &session, &labels, &ClickConfig::default());
        assert!(matches!(result, Err(ClickError::ShapeMismatch { .. })));
    }

    #[test]
    fn append_channel_checks_spatial_shape() {
        let input = ArrayD::<f32>::zeros(IxDyn(&[2, 4, 4]));
        let good = ArrayD::<f32>::ones(IxDyn(&[1, 4, 4]));
        let bad = ArrayD::<f32>::ones(IxDyn(&[1, 4, 5]));
        let out = append_channel(input.view(), good.view()).unwrap();
        assert_eq!(out.shape(), &[3, 4, 4]);
        assert!(matches!(
            append_channel(input.view(), bad.view()),
            Err(ClickError::ShapeMismatch { .. })
        ));
    }
}
