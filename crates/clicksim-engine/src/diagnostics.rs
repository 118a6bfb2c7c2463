//! Interaction diagnostics: timing, outcomes, and remaining error per
//! round.
//!
//! The engine does no I/O and keeps no clock, so the caller measures
//! each round and hands the duration to [`RoundDiagnostics::collect`].
//!
//! Durations are serialized as fractional seconds (`f64`) for JSON
//! compatibility, since `std::time::Duration` does not implement serde
//! traits.

use std::collections::BTreeMap;
use std::time::Duration;

use ndarray::ArrayViewD;
use serde::{Deserialize, Serialize};

use crate::discrepancy::{binarize, find_discrepancies};
use crate::patch::dice_loss;
use crate::session::ClickSession;
use crate::strategy::{LabelOutcome, RoundReport};
use crate::types::{ClickError, LabelMap};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics for every round run on one sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InteractionDiagnostics {
    /// Sample identity.
    pub sample: String,
    /// Rounds in the order they ran.
    pub rounds: Vec<RoundDiagnostics>,
}

/// Diagnostics for a single engine call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundDiagnostics {
    /// Zero-based round index.
    pub round: usize,
    /// Strategy name.
    pub strategy: String,
    /// Wall-clock duration of the round (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Per-label details, ordered by label name.
    pub labels: BTreeMap<String, LabelDiagnostics>,
}

/// State of one label after a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDiagnostics {
    /// What the round did for this label.
    pub outcome: LabelOutcome,
    /// Clicks accumulated so far.
    pub clicks: usize,
    /// Voxels the prediction still misses.
    pub false_negatives: usize,
    /// Voxels the prediction wrongly claims.
    pub false_positives: usize,
    /// Dice score between label and prediction for this label.
    pub dice: f64,
}

impl RoundDiagnostics {
    /// Gather per-label diagnostics for a finished round.
    ///
    /// `prediction` is the prediction the round was run against.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::ShapeMismatch`] if label and prediction
    /// differ in shape.
    pub fn collect(
        round: usize,
        duration: Duration,
        report: &RoundReport,
        session: &ClickSession,
        label: ArrayViewD<'_, f32>,
        prediction: ArrayViewD<'_, f32>,
        labels: &LabelMap,
    ) -> Result<Self, ClickError> {
        let discrepancies = find_discrepancies(label.view(), prediction.view(), labels)?;
        let mut per_label = BTreeMap::new();
        for (name, id) in labels.iter() {
            let (false_negatives, false_positives) = discrepancies
                .get(name)
                .map_or((0, 0), |d| (d.false_negative_count(), d.false_positive_count()));
            let truth = binarize(label.view(), id).mapv(f32::from);
            let predicted = binarize(prediction.view(), id).mapv(f32::from);
            per_label.insert(
                name.to_string(),
                LabelDiagnostics {
                    outcome: report
                        .outcome(name)
                        .cloned()
                        .unwrap_or(LabelOutcome::NoPoint),
                    clicks: session.clicks(name).len(),
                    false_negatives,
                    false_positives,
                    dice: 1.0 - dice_loss(predicted.view(), truth.view()),
                },
            );
        }
        Ok(Self {
            round,
            strategy: report.strategy.clone(),
            duration,
            labels: per_label,
        })
    }
}

impl InteractionDiagnostics {
    /// Start an empty diagnostics log for `sample`.
    #[must_use]
    pub fn new(sample: impl Into<String>) -> Self {
        Self {
            sample: sample.into(),
            rounds: Vec::new(),
        }
    }

    /// Append a finished round.
    pub fn push(&mut self, round: RoundDiagnostics) {
        self.rounds.push(round);
    }

    /// Sum of all round durations.
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.rounds.iter().map(|r| r.duration).sum()
    }

    /// Total clicks across labels after the last round.
    #[must_use]
    pub fn final_clicks(&self) -> usize {
        self.rounds
            .last()
            .map_or(0, |r| r.labels.values().map(|l| l.clicks).sum())
    }

    /// Format as a human-readable table.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Interaction Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!("Sample: {}", self.sample));
        lines.push(format!(
            "Rounds: {}  |  Total duration: {:.3}ms",
            self.rounds.len(),
            duration_ms(self.total_duration()),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:>5} {:<32} {:<16} {:>10} {:>6} {:>8} {:>8} {:>7}",
            "Round", "Strategy", "Label", "Duration", "Clicks", "FN", "FP", "Dice"
        ));
        lines.push("-".repeat(100));

        for round in &self.rounds {
            let ms = duration_ms(round.duration);
            for (i, (name, label)) in round.labels.iter().enumerate() {
                let (index, strategy, duration) = if i == 0 {
                    (round.round.to_string(), round.strategy.as_str(), format!("{ms:.3}ms"))
                } else {
                    (String::new(), "", String::new())
                };
                lines.push(format!(
                    "{index:>5} {strategy:<32} {name:<16} {duration:>10} {:>6} {:>8} {:>8} {:>7.4}  {}",
                    label.clicks,
                    label.false_negatives,
                    label.false_positives,
                    label.dice,
                    format_outcome(&label.outcome),
                ));
            }
        }

        lines.push(String::new());
        lines.push(format!("Final clicks: {}", self.final_clicks()));

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn format_outcome(outcome: &LabelOutcome) -> String {
    match outcome {
        LabelOutcome::Added { coordinate } => format!("added {:?}", coordinate.elements()),
        LabelOutcome::Replayed { appended, total } => format!("replayed +{appended} ({total})"),
        LabelOutcome::NoPoint => "no point".to_string(),
        LabelOutcome::Skipped => "skipped".to_string(),
    }
}
