//! Click-generation strategies and the engine that runs them.
//!
//! The strategy is chosen by the caller for every round; the only state
//! carried between rounds is the [`ClickSession`], whose per-label lists
//! only grow until the caller resets them at a sample boundary.
//!
//! ```rust
//! # use clicksim_engine::{ClickEngine, ClickError, ClickSession, ClickStrategy, LabelMap, Sample};
//! # use ndarray::{ArrayD, IxDyn};
//! # use rand::SeedableRng;
//! # fn run() -> Result<(), ClickError> {
//! let labels = LabelMap::from_names(["background", "lesion"])?;
//! let mut label = ArrayD::<f32>::zeros(IxDyn(&[1, 8, 8]));
//! label[[0, 4, 4]] = 1.0;
//! let prediction = ArrayD::<f32>::zeros(IxDyn(&[1, 8, 8]));
//!
//! let engine = ClickEngine::new();
//! let mut session = ClickSession::new(2);
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let sample = Sample::new("case_1", label.view(), prediction.view(), &labels);
//! let report = engine.add_clicks(&ClickStrategy::GlobalCorrective, &sample, &mut session, &mut rng)?;
//! assert_eq!(report.added(), 1);
//! # Ok(())
//! # }
//! # run().unwrap();
//! ```

use std::collections::BTreeMap;

use log::debug;
use ndarray::ArrayViewD;
use rand::Rng;
use rand::distr::{Bernoulli, Distribution};
use serde::{Deserialize, Serialize};

use crate::coordinate::{Coordinate, to_global};
use crate::device::colocated;
use crate::discrepancy::{binarize, find_discrepancies};
use crate::distance::{DistanceField, EuclideanDistance};
use crate::patch::{PatchWorstRegionSelector, one_hot};
use crate::record::ClickRecordSource;
use crate::sampler::WeightedPointSampler;
use crate::session::ClickSession;
use crate::types::{ClickConfig, ClickError, LabelMap, spatial_dims};

// ───────────────────────── Strategy selection ──────────────────────────

/// How the simulated annotator places the next click.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClickStrategy {
    /// Replay the next click from a prerecorded sequence.
    ReplayFromFile,

    /// Click inside the ground-truth region, ignoring the prediction.
    GlobalNonCorrective,

    /// Click inside the region the prediction misses.
    #[default]
    GlobalCorrective,

    /// Like [`GlobalCorrective`](Self::GlobalCorrective), but the whole
    /// round only happens with the given probability.
    #[serde(alias = "DEEPGROW_GLOBAL_CORRECTIVE")]
    ProbabilisticGlobalCorrective {
        /// Chance that the annotator interacts this round.
        probability: f64,
    },

    /// Click inside the missed region of the worst-predicted patch.
    PatchBasedCorrective {
        /// Spatial patch extent, one entry per spatial axis.
        patch_size: Vec<usize>,
    },
}

impl ClickStrategy {
    /// Resolve a strategy from its name, taking parameters for the
    /// variants that need them.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::UnknownStrategy`] if the name is not
    /// recognized.
    pub fn from_name(name: &str, probability: f64, patch_size: &[usize]) -> Result<Self, ClickError> {
        match name {
            "REPLAY_FROM_FILE" => Ok(Self::ReplayFromFile),
            "GLOBAL_NON_CORRECTIVE" => Ok(Self::GlobalNonCorrective),
            "GLOBAL_CORRECTIVE" => Ok(Self::GlobalCorrective),
            "PROBABILISTIC_GLOBAL_CORRECTIVE" | "DEEPGROW_GLOBAL_CORRECTIVE" => {
                Ok(Self::ProbabilisticGlobalCorrective { probability })
            }
            "PATCH_BASED_CORRECTIVE" => Ok(Self::PatchBasedCorrective {
                patch_size: patch_size.to_vec(),
            }),
            other => Err(ClickError::UnknownStrategy(other.to_string())),
        }
    }

    /// Canonical name of the strategy.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReplayFromFile => "REPLAY_FROM_FILE",
            Self::GlobalNonCorrective => "GLOBAL_NON_CORRECTIVE",
            Self::GlobalCorrective => "GLOBAL_CORRECTIVE",
            Self::ProbabilisticGlobalCorrective { .. } => "PROBABILISTIC_GLOBAL_CORRECTIVE",
            Self::PatchBasedCorrective { .. } => "PATCH_BASED_CORRECTIVE",
        }
    }

    /// Check the strategy's parameters.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::InvalidConfig`] if the probability is not in
    /// `[0, 1]` or the patch size is empty or has a zero entry.
    pub fn validate(&self) -> Result<(), ClickError> {
        match self {
            Self::ProbabilisticGlobalCorrective { probability }
                if !(0.0..=1.0).contains(probability) =>
            {
                Err(ClickError::InvalidConfig(format!(
                    "probability must be in [0, 1], got {probability}"
                )))
            }
            Self::PatchBasedCorrective { patch_size } => {
                PatchWorstRegionSelector::new(patch_size.clone()).map(|_| ())
            }
            _ => Ok(()),
        }
    }
}

// ───────────────────────── Round input and output ──────────────────────────

/// Volumes and identity of the sample being annotated.
///
/// `label` and `prediction` are channel-first with a single channel,
/// `(1, X, Y)` or `(1, X, Y, Z)`, holding label ids as values.
#[derive(Debug, Clone)]
pub struct Sample<'a> {
    /// Identity used to look up prerecorded clicks.
    pub id: &'a str,
    /// Ground-truth label volume.
    pub label: ArrayViewD<'a, f32>,
    /// Current discrete prediction.
    pub prediction: ArrayViewD<'a, f32>,
    /// Label names and ids.
    pub labels: &'a LabelMap,
}

impl<'a> Sample<'a> {
    /// Bundle the inputs of one round.
    #[must_use]
    pub fn new(
        id: &'a str,
        label: ArrayViewD<'a, f32>,
        prediction: ArrayViewD<'a, f32>,
        labels: &'a LabelMap,
    ) -> Self {
        Self {
            id,
            label,
            prediction,
            labels,
        }
    }
}

/// What happened to one label during a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LabelOutcome {
    /// A sampled click was appended.
    Added {
        /// The appended click.
        coordinate: Coordinate,
    },
    /// Clicks were copied from the prerecorded sequence.
    Replayed {
        /// Clicks appended this round (0 once the record is exhausted).
        appended: usize,
        /// Length of the label's list afterwards.
        total: usize,
    },
    /// The eligible region was empty, so nothing was appended.
    NoPoint,
    /// The interaction gate skipped this round.
    Skipped,
}

/// Per-label outcomes of one engine call, ordered by label name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundReport {
    /// Strategy that produced the round.
    pub strategy: String,
    /// Outcome for every label.
    pub outcomes: BTreeMap<String, LabelOutcome>,
}

impl RoundReport {
    fn new(strategy: &ClickStrategy) -> Self {
        Self {
            strategy: strategy.name().to_string(),
            outcomes: BTreeMap::new(),
        }
    }

    /// Outcome recorded for `label`.
    #[must_use]
    pub fn outcome(&self, label: &str) -> Option<&LabelOutcome> {
        self.outcomes.get(label)
    }

    /// Number of clicks appended across all labels.
    #[must_use]
    pub fn added(&self) -> usize {
        self.outcomes
            .values()
            .map(|o| match o {
                LabelOutcome::Added { .. } => 1,
                LabelOutcome::Replayed { appended, .. } => *appended,
                LabelOutcome::NoPoint | LabelOutcome::Skipped => 0,
            })
            .sum()
    }
}

// ───────────────────────── Engine ──────────────────────────

/// Runs click strategies against a sample and appends the resulting
/// clicks to a [`ClickSession`].
pub struct ClickEngine<D = EuclideanDistance> {
    distance: D,
    sampler: WeightedPointSampler,
    records: Option<Box<dyn ClickRecordSource>>,
}

impl ClickEngine<EuclideanDistance> {
    /// Engine with the exact Euclidean distance transform and the default
    /// overflow threshold.
    #[must_use]
    pub fn new() -> Self {
        Self::with_distance(EuclideanDistance)
    }
}

impl Default for ClickEngine<EuclideanDistance> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DistanceField> ClickEngine<D> {
    /// Engine using a custom distance-field provider.
    #[must_use]
    pub fn with_distance(distance: D) -> Self {
        Self {
            distance,
            sampler: WeightedPointSampler::default(),
            records: None,
        }
    }

    /// Replace the sampler's overflow threshold.
    #[must_use]
    pub fn with_overflow_threshold(mut self, threshold: f64) -> Self {
        self.sampler = WeightedPointSampler::new(threshold);
        self
    }

    /// Attach the source consulted by [`ClickStrategy::ReplayFromFile`].
    #[must_use]
    pub fn with_record_source(mut self, records: Box<dyn ClickRecordSource>) -> Self {
        self.records = Some(records);
        self
    }

    /// Run one round of `strategy` on `sample`, appending clicks to
    /// `session`.
    ///
    /// Labels are visited in id order, so a seeded `rng` makes the round
    /// reproducible.
    ///
    /// # Errors
    ///
    /// - [`ClickError::InvalidConfig`] if the strategy's parameters are
    ///   out of range.
    /// - [`ClickError::ShapeMismatch`] if label and prediction differ in
    ///   shape, are not 2D/3D channel-first volumes, or disagree with the
    ///   session's dimensionality.
    /// - [`ClickError::DeviceMismatch`] if the volumes live on different
    ///   devices.
    /// - [`ClickError::MissingRecordedClicks`] when replaying and the
    ///   source has no record for the sample or one of its labels.
    /// - [`ClickError::MalformedCoordinate`] if a click has the wrong
    ///   arity.
    pub fn add_clicks<R>(
        &self,
        strategy: &ClickStrategy,
        sample: &Sample<'_>,
        session: &mut ClickSession,
        rng: &mut R,
    ) -> Result<RoundReport, ClickError>
    where
        R: Rng + ?Sized,
    {
        self.round(strategy, self.sampler, sample, session, rng)
    }

    /// Run one round configured by `config`: its strategy, sampled with
    /// its overflow threshold instead of the engine's own.
    ///
    /// # Errors
    ///
    /// [`ClickError::InvalidConfig`] for an invalid `config`, otherwise as
    /// [`add_clicks`](Self::add_clicks).
    pub fn add_configured_clicks<R>(
        &self,
        config: &ClickConfig,
        sample: &Sample<'_>,
        session: &mut ClickSession,
        rng: &mut R,
    ) -> Result<RoundReport, ClickError>
    where
        R: Rng + ?Sized,
    {
        config.validate()?;
        let sampler = WeightedPointSampler::new(config.overflow_threshold);
        self.round(&config.strategy, sampler, sample, session, rng)
    }

    fn round<R>(
        &self,
        strategy: &ClickStrategy,
        sampler: WeightedPointSampler,
        sample: &Sample<'_>,
        session: &mut ClickSession,
        rng: &mut R,
    ) -> Result<RoundReport, ClickError>
    where
        R: Rng + ?Sized,
    {
        strategy.validate()?;
        check_sample(sample, session)?;

        let report = match strategy {
            ClickStrategy::ReplayFromFile => self.replay(sample, session)?,
            ClickStrategy::GlobalNonCorrective => self.non_corrective(sampler, sample, session, rng)?,
            ClickStrategy::GlobalCorrective => self.corrective(strategy, sampler, sample, session, rng)?,
            ClickStrategy::ProbabilisticGlobalCorrective { probability } => {
                let gate = Bernoulli::new(*probability)
                    .map_err(|e| ClickError::InvalidConfig(format!("probability {probability}: {e}")))?;
                if gate.sample(rng) {
                    self.corrective(strategy, sampler, sample, session, rng)?
                } else {
                    debug!("{}: interaction gate closed, skipping round", sample.id);
                    let mut report = RoundReport::new(strategy);
                    for (name, _) in sample.labels.iter() {
                        report.outcomes.insert(name.to_string(), LabelOutcome::Skipped);
                    }
                    report
                }
            }
            ClickStrategy::PatchBasedCorrective { patch_size } => {
                self.patch_corrective(strategy, patch_size, sampler, sample, session, rng)?
            }
        };

        debug!(
            "{}: {} round appended {} click(s), {} total",
            sample.id,
            report.strategy,
            report.added(),
            session.total_clicks()
        );
        Ok(report)
    }

    fn replay(&self, sample: &Sample<'_>, session: &mut ClickSession) -> Result<RoundReport, ClickError> {
        let missing = |label: Option<String>| ClickError::MissingRecordedClicks {
            sample: sample.id.to_string(),
            label,
        };
        let record = match &self.records {
            Some(source) => source.load(sample.id)?,
            None => None,
        }
        .ok_or_else(|| missing(None))?;

        let mut report = RoundReport::new(&ClickStrategy::ReplayFromFile);
        for (name, _) in sample.labels.iter() {
            let recorded = record.get(name).ok_or_else(|| missing(Some(name.to_string())))?;
            let existing = session.clicks(name).len();
            let next = recorded.get(existing);
            if let Some(spatial) = next {
                session.push(name, Coordinate::with_leading_slot(spatial))?;
            }
            report.outcomes.insert(
                name.to_string(),
                LabelOutcome::Replayed {
                    appended: usize::from(next.is_some()),
                    total: session.clicks(name).len(),
                },
            );
        }
        Ok(report)
    }

    fn non_corrective<R>(
        &self,
        sampler: WeightedPointSampler,
        sample: &Sample<'_>,
        session: &mut ClickSession,
        rng: &mut R,
    ) -> Result<RoundReport, ClickError>
    where
        R: Rng + ?Sized,
    {
        let mut report = RoundReport::new(&ClickStrategy::GlobalNonCorrective);
        for (name, id) in sample.labels.iter() {
            let mask = binarize(sample.label.view(), id).mapv(|on| if on { 1.0_f32 } else { 0.0 });
            let outcome = match sampler.sample(mask.view(), rng) {
                Some(point) => append(session, name, Coordinate::from_index(&point.coordinate)?)?,
                None => LabelOutcome::NoPoint,
            };
            report.outcomes.insert(name.to_string(), outcome);
        }
        Ok(report)
    }

    fn corrective<R>(
        &self,
        strategy: &ClickStrategy,
        sampler: WeightedPointSampler,
        sample: &Sample<'_>,
        session: &mut ClickSession,
        rng: &mut R,
    ) -> Result<RoundReport, ClickError>
    where
        R: Rng + ?Sized,
    {
        let mut discrepancies = find_discrepancies(sample.label.view(), sample.prediction.view(), sample.labels)?;
        let mut report = RoundReport::new(strategy);
        for (name, _) in sample.labels.iter() {
            let Some(discrepancy) = discrepancies.remove(name) else {
                return Err(ClickError::UnknownLabel(name.to_string()));
            };
            let field = self.distance.distance_field(discrepancy.false_negative.view());
            let outcome = match sampler.sample(field.view(), rng) {
                Some(point) => append(session, name, Coordinate::from_index(&point.coordinate)?)?,
                None => LabelOutcome::NoPoint,
            };
            report.outcomes.insert(name.to_string(), outcome);
        }
        Ok(report)
    }

    fn patch_corrective<R>(
        &self,
        strategy: &ClickStrategy,
        patch_size: &[usize],
        sampler: WeightedPointSampler,
        sample: &Sample<'_>,
        session: &mut ClickSession,
        rng: &mut R,
    ) -> Result<RoundReport, ClickError>
    where
        R: Rng + ?Sized,
    {
        let selector = PatchWorstRegionSelector::new(patch_size.to_vec())?;
        let prediction = one_hot(sample.prediction.view(), sample.labels)?;
        let label = one_hot(sample.label.view(), sample.labels)?;
        let worst = selector.select(prediction.view(), label.view())?;

        let mut discrepancies = find_discrepancies(sample.label.view(), sample.prediction.view(), sample.labels)?;
        let mut report = RoundReport::new(strategy);
        for ((name, _), patch) in sample.labels.iter().zip(&worst) {
            let Some(discrepancy) = discrepancies.remove(name) else {
                return Err(ClickError::UnknownLabel(name.to_string()));
            };
            let local = patch.view_of(discrepancy.false_negative.view());
            let field = self.distance.distance_field(local);
            let outcome = match sampler.sample(field.view(), rng) {
                Some(point) => {
                    let global = to_global(&Coordinate::from_index(&point.coordinate)?, &patch.origin)?;
                    append(session, name, global)?
                }
                None => LabelOutcome::NoPoint,
            };
            debug!("{}: `{name}` worst patch at {:?}", sample.id, patch.origin);
            report.outcomes.insert(name.to_string(), outcome);
        }
        Ok(report)
    }
}

fn check_sample(sample: &Sample<'_>, session: &ClickSession) -> Result<(), ClickError> {
    if sample.label.shape() != sample.prediction.shape() {
        return Err(ClickError::ShapeMismatch {
            context: "click round (label vs prediction)",
            left: sample.label.shape().to_vec(),
            right: sample.prediction.shape().to_vec(),
        });
    }
    colocated("click round (label vs prediction)", &sample.label, &sample.prediction)?;
    let spatial = spatial_dims(sample.label.shape())?;
    if spatial != session.spatial_dims() {
        return Err(ClickError::ShapeMismatch {
            context: "click round (session vs volume spatial dims)",
            left: vec![session.spatial_dims()],
            right: vec![spatial],
        });
    }
    Ok(())
}

fn append(session: &mut ClickSession, label: &str, coordinate: Coordinate) -> Result<LabelOutcome, ClickError> {
    session.push(label, coordinate.clone())?;
    debug!("appended click {:?} for `{label}`", coordinate.elements());
    Ok(LabelOutcome::Added { coordinate })
}
