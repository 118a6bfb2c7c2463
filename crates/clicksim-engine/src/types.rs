//! Shared types for the click simulation engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sampler::DEFAULT_OVERFLOW_THRESHOLD;
use crate::strategy::ClickStrategy;

/// Re-export the dynamic array types so downstream crates can build
/// volumes without depending on `ndarray` directly.
pub use ndarray::{ArrayD, ArrayViewD, IxDyn};

/// Ordered mapping from label name to integer id.
///
/// Ids form a contiguous range starting at 0, and id 0 is reserved for
/// background. The map is indexed by id, so iteration order is id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, u32>",
    into = "BTreeMap<String, u32>"
)]
pub struct LabelMap {
    names: Vec<String>,
}

impl LabelMap {
    /// Build a label map from `(name, id)` pairs in any order.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::InvalidLabelMap`] if the map is empty, a
    /// name or id appears twice, or the ids are not exactly `0..n`.
    pub fn new<I, S>(pairs: I) -> Result<Self, ClickError>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut pairs: Vec<(String, u32)> = pairs.into_iter().map(|(s, id)| (s.into(), id)).collect();
        if pairs.is_empty() {
            return Err(ClickError::InvalidLabelMap(
                "at least a background label is required".to_string(),
            ));
        }
        pairs.sort_by_key(|&(_, id)| id);

        let mut names: Vec<String> = Vec::with_capacity(pairs.len());
        for (expected, (name, id)) in pairs.into_iter().enumerate() {
            if usize::try_from(id).ok() != Some(expected) {
                return Err(ClickError::InvalidLabelMap(format!(
                    "ids must be contiguous from 0, found id {id} for `{name}` at position {expected}"
                )));
            }
            if names.contains(&name) {
                return Err(ClickError::InvalidLabelMap(format!(
                    "label `{name}` appears more than once"
                )));
            }
            names.push(name);
        }

        Ok(Self { names })
    }

    /// Build a label map assigning ids `0..n` in the given order.
    ///
    /// The first name becomes the background label.
    ///
    /// # Errors
    ///
    /// Same as [`LabelMap::new`].
    pub fn from_names<I, S>(names: I) -> Result<Self, ClickError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut pairs = Vec::new();
        for (idx, name) in names.into_iter().enumerate() {
            let id = u32::try_from(idx)
                .map_err(|_| ClickError::InvalidLabelMap("too many labels".to_string()))?;
            pairs.push((name.into(), id));
        }
        Self::new(pairs)
    }

    /// Look up the id for a label name.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::UnknownLabel`] if the name is not present.
    pub fn id(&self, name: &str) -> Result<u32, ClickError> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|idx| u32::try_from(idx).ok())
            .ok_or_else(|| ClickError::UnknownLabel(name.to_string()))
    }

    /// Look up the name for a label id.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::UnknownLabel`] if the id is out of range.
    pub fn name(&self, id: u32) -> Result<&str, ClickError> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.names.get(idx))
            .map(String::as_str)
            .ok_or_else(|| ClickError::UnknownLabel(format!("id {id}")))
    }

    /// Name of the background label (id 0).
    #[must_use]
    pub fn background(&self) -> &str {
        self.names.first().map_or("", String::as_str)
    }

    /// Number of labels, background included.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.names.len()
    }

    /// Always `false`: a valid map holds at least the background label.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterate `(name, id)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.names
            .iter()
            .zip(0_u32..)
            .map(|(name, id)| (name.as_str(), id))
    }
}

impl TryFrom<BTreeMap<String, u32>> for LabelMap {
    type Error = ClickError;

    fn try_from(map: BTreeMap<String, u32>) -> Result<Self, Self::Error> {
        Self::new(map)
    }
}

impl From<LabelMap> for BTreeMap<String, u32> {
    fn from(labels: LabelMap) -> Self {
        labels.names.into_iter().zip(0_u32..).collect()
    }
}

/// Configuration for one click-generation and guidance round.
///
/// # Invariants
///
/// [`ClickConfig::validate`] checks that `sigma` is finite and
/// non-negative, `overflow_threshold` is finite and positive, and the
/// strategy's own parameters are in range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClickConfig {
    /// Which click-generation strategy to run.
    pub strategy: ClickStrategy,

    /// Standard deviation of the Gaussian applied to click positions
    /// when rasterizing guidance. Zero disables smoothing.
    pub sigma: f32,

    /// Threshold the smoothed guidance into filled balls instead of
    /// smooth bumps.
    pub disks: bool,

    /// Upper clip applied to field values before exponential weighting.
    pub overflow_threshold: f64,
}

impl ClickConfig {
    /// Default Gaussian sigma for guidance rasterization.
    pub const DEFAULT_SIGMA: f32 = 1.0;

    /// Default disk mode.
    pub const DEFAULT_DISKS: bool = false;

    /// Check the configuration for out-of-range values.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::InvalidConfig`] describing the first
    /// offending field.
    pub fn validate(&self) -> Result<(), ClickError> {
        if !self.sigma.is_finite() || self.sigma < 0.0 {
            return Err(ClickError::InvalidConfig(format!(
                "sigma must be finite and non-negative, got {}",
                self.sigma
            )));
        }
        if !self.overflow_threshold.is_finite() || self.overflow_threshold <= 0.0 {
            return Err(ClickError::InvalidConfig(format!(
                "overflow_threshold must be finite and positive, got {}",
                self.overflow_threshold
            )));
        }
        self.strategy.validate()
    }
}

impl Default for ClickConfig {
    fn default() -> Self {
        Self {
            strategy: ClickStrategy::default(),
            sigma: Self::DEFAULT_SIGMA,
            disks: Self::DEFAULT_DISKS,
            overflow_threshold: DEFAULT_OVERFLOW_THRESHOLD,
        }
    }
}

/// Errors raised by the click simulation engine.
///
/// "No point found" is not an error: samplers return `None` when the
/// eligible region is empty.
#[derive(Debug, thiserror::Error)]
pub enum ClickError {
    /// Two volumes that must agree in shape do not.
    #[error("shape mismatch in {context}: {left:?} vs {right:?}")]
    ShapeMismatch {
        /// Operation that detected the mismatch.
        context: &'static str,
        /// Shape of the first operand.
        left: Vec<usize>,
        /// Shape of the second operand (or the expected shape).
        right: Vec<usize>,
    },

    /// A label name or id is not present in the [`LabelMap`].
    #[error("unknown label `{0}`")]
    UnknownLabel(String),

    /// A strategy name could not be resolved.
    #[error("unknown click strategy `{0}`")]
    UnknownStrategy(String),

    /// A coordinate has the wrong number of elements.
    #[error("malformed coordinate {coordinate:?} for `{label}`: expected {expected} elements")]
    MalformedCoordinate {
        /// Label the coordinate belongs to (or the operation name).
        label: String,
        /// The offending coordinate.
        coordinate: Vec<i64>,
        /// Required number of elements.
        expected: usize,
    },

    /// A coordinate element does not fit the signed click representation.
    #[error("coordinate overflow in {context}: {elements:?}")]
    CoordinateOverflow {
        /// Operation that produced the coordinate.
        context: &'static str,
        /// The unrepresentable elements, widened.
        elements: Vec<i128>,
    },

    /// The replay source holds no record for a sample or label.
    #[error("no recorded clicks for sample `{sample}`{}", label.as_ref().map(|l| format!(" (label `{l}`)")).unwrap_or_default())]
    MissingRecordedClicks {
        /// Sample identity used for the lookup.
        sample: String,
        /// Label missing from an otherwise present record.
        label: Option<String>,
    },

    /// A rasterized guidance channel left the unit interval.
    #[error("guidance signal for `{label}` out of range: min={min}, max={max}")]
    InvalidRange {
        /// Label whose channel failed the check.
        label: String,
        /// Observed minimum.
        min: f32,
        /// Observed maximum.
        max: f32,
    },

    /// A label map violates its invariants.
    #[error("invalid label map: {0}")]
    InvalidLabelMap(String),

    /// Configuration values are out of range.
    #[error("invalid click configuration: {0}")]
    InvalidConfig(String),

    /// Volumes handed to one call live on different devices.
    #[error("device mismatch in {context}: {left} vs {right}")]
    DeviceMismatch {
        /// Operation that detected the mismatch.
        context: &'static str,
        /// Device of the first operand.
        left: crate::device::Device,
        /// Device of the second operand.
        right: crate::device::Device,
    },

    /// A replay record exists but cannot be used.
    #[error("invalid click record for `{sample}`: {reason}")]
    InvalidRecord {
        /// Sample identity used for the lookup.
        sample: String,
        /// What went wrong.
        reason: String,
    },
}

/// Number of spatial dimensions of a channel-first volume shape.
///
/// # Errors
///
/// Returns [`ClickError::ShapeMismatch`] unless the shape is
/// `(C, X, Y)` or `(C, X, Y, Z)`.
pub fn spatial_dims(shape: &[usize]) -> Result<usize, ClickError> {
    match shape.len() {
        3 | 4 => Ok(shape.len() - 1),
        _ => Err(ClickError::ShapeMismatch {
            context: "channel-first volume with 2 or 3 spatial dims",
            left: shape.to_vec(),
            right: Vec::new(),
        }),
    }
}
