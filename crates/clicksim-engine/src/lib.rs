//! clicksim-engine: simulated annotator clicks for interactive
//! segmentation training (sans-IO).
//!
//! One interaction round runs:
//! discrepancy detection -> (worst-patch selection ->) distance field ->
//! weighted point sampling -> click accumulation -> guidance rasterization.
//!
//! This crate has **no I/O dependencies** -- it operates on in-memory
//! `ndarray` volumes and a caller-supplied random generator. Reading
//! prerecorded clicks from disk lives in `clicksim-replay`.

pub mod coordinate;
pub mod device;
pub mod diagnostics;
pub mod discrepancy;
pub mod distance;
pub mod guidance;
pub mod patch;
pub mod record;
pub mod sampler;
pub mod session;
pub mod strategy;
pub mod types;

pub use coordinate::{ClickList, Coordinate, to_global};
pub use device::{Device, Resident};
pub use diagnostics::{InteractionDiagnostics, LabelDiagnostics, RoundDiagnostics};
pub use discrepancy::{Discrepancy, DiscrepancyMap, find_discrepancies, label_discrepancy};
pub use distance::{DistanceField, EuclideanDistance};
pub use guidance::{GuidanceRasterizer, add_guidance_signals, append_channel};
pub use patch::{Patch, PatchWorstRegionSelector, one_hot};
pub use record::{ClickRecord, ClickRecordSource};
pub use sampler::{BorderPointSampler, SampledPoint, WeightedPointSampler};
pub use session::ClickSession;
pub use strategy::{ClickEngine, ClickStrategy, LabelOutcome, RoundReport, Sample};
pub use types::{ClickConfig, ClickError, LabelMap};

use rand::Rng;

/// Run one full interaction round.
///
/// Validates `config`, appends the clicks chosen by its strategy to
/// `session` (sampling with `config.overflow_threshold`), then rasterizes every label's accumulated clicks and
/// appends them to `image` as guidance channels.
///
/// # Steps
///
/// 1. Validate the configuration
/// 2. Add clicks with `config.strategy` and `config.overflow_threshold`
/// 3. Rasterize one guidance channel per label
/// 4. Concatenate the channels onto `image`
///
/// # Errors
///
/// Returns [`ClickError::InvalidConfig`] for an invalid `config`, and any
/// error of [`ClickEngine::add_configured_clicks`] or [`add_guidance_signals`].
pub fn interact<D, R>(
    engine: &ClickEngine<D>,
    config: &ClickConfig,
    sample: &Sample<'_>,
    image: ndarray::ArrayViewD<'_, f32>,
    session: &mut ClickSession,
    rng: &mut R,
) -> Result<(RoundReport, ndarray::ArrayD<f32>), ClickError>
where
    D: DistanceField,
    R: Rng + ?Sized,
{
    // 1. Validate.
    config.validate()?;

    // 2. Clicks, sampled with the configured overflow threshold.
    let report = engine.add_configured_clicks(config, sample, session, rng)?;

    // 3-4. Guidance channels.
    let input = add_guidance_signals(image, session, sample.labels, config)?;
    Ok((report, input))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn interact_adds_click_and_guidance() {
        let labels = LabelMap::from_names(["background", "lesion"]).unwrap();
        let mut label = ArrayD::<f32>::zeros(IxDyn(&[1, 9, 9]));
        for x in 3..6 {
            for y in 3..6 {
                label[[0, x, y]] = 1.0;
            }
        }
        let prediction = ArrayD::<f32>::zeros(IxDyn(&[1, 9, 9]));
        let image = ArrayD::<f32>::ones(IxDyn(&[1, 9, 9]));
        let sample = Sample::new("case_1", label.view(), prediction.view(), &labels);

        let config = ClickConfig {
            sigma: 0.0,
            ..ClickConfig::default()
        };
        let mut session = ClickSession::new(2);
        let mut rng = StdRng::seed_from_u64(42);
        let (report, input) = interact(
            &ClickEngine::new(),
            &config,
            &sample,
            image.view(),
            &mut session,
            &mut rng,
        )
        .unwrap();

        assert_eq!(report.added(), 1);
        assert_eq!(input.shape(), &[3, 9, 9]);
        let click = session.clicks("lesion").last().unwrap().elements().to_vec();
        let x = usize::try_from(click[1]).unwrap();
        let y = usize::try_from(click[2]).unwrap();
        assert!((input[[2, x, y]] - 1.0).abs() < f32::EPSILON);
        assert!((label[[0, x, y]] - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn interact_samples_with_configured_threshold() {
        // Depth grows towards the middle of the lesion row; with a loose
        // clip the deepest voxels dominate the draw.
        let labels = LabelMap::from_names(["background", "lesion"]).unwrap();
        let mut label = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 41]));
        for y in 1..40 {
            label[[0, 0, y]] = 1.0;
        }
        let prediction = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 41]));
        let image = ArrayD::<f32>::zeros(IxDyn(&[1, 1, 41]));
        let sample = Sample::new("row", label.view(), prediction.view(), &labels);
        let engine = ClickEngine::new();

        let deep_hits = |config: &ClickConfig| {
            (0..100)
                .filter(|&seed| {
                    let mut session = ClickSession::new(2);
                    let mut rng = StdRng::seed_from_u64(seed);
                    interact(&engine, config, &sample, image.view(), &mut session, &mut rng).unwrap();
                    let y = session.clicks("lesion").last().unwrap().elements()[2];
                    (15..=25).contains(&y)
                })
                .count()
        };

        let loose = ClickConfig {
            overflow_threshold: 50.0,
            ..ClickConfig::default()
        };
        assert!(deep_hits(&loose) >= 95);
        // Default clip flattens the weights, so the draw is close to uniform.
        assert!(deep_hits(&ClickConfig::default()) < 60);
    }

    #[test]
    fn interact_rejects_invalid_config() {
        let labels = LabelMap::from_names(["background", "lesion"]).unwrap();
        let volume = ArrayD::<f32>::zeros(IxDyn(&[1, 4, 4]));
        let sample = Sample::new("case_1", volume.view(), volume.view(), &labels);
        let config = ClickConfig {
            strategy: ClickStrategy::ProbabilisticGlobalCorrective { probability: 2.0 },
            ..ClickConfig::default()
        };
        let result = interact(
            &ClickEngine::new(),
            &config,
            &sample,
            volume.view(),
            &mut ClickSession::new(2),
            &mut StdRng::seed_from_u64(0),
        );
        assert!(matches!(result, Err(ClickError::InvalidConfig(_))));
    }
}
