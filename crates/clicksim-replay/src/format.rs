//! Click record file format.
//!
//! One JSON file per sample holds an object mapping label names to
//! ordered lists of spatial coordinates:
//!
//! ```json
//! {"background": [[12, 40, 7]], "liver": [[55, 61, 30], [58, 70, 31]]}
//! ```
//!
//! Coordinates carry no leading channel slot; the engine adds it when
//! replaying. The file for an image `case_001.nii.gz` is named
//! `case_001_clicks.json`.
//!
//! These are pure functions with no I/O.

use clicksim_engine::ClickRecord;

/// Suffix appended to the image stem to form the record file name.
pub const RECORD_SUFFIX: &str = "_clicks.json";

/// Compound image extension replaced by [`RECORD_SUFFIX`].
const NIFTI_GZ: &str = ".nii.gz";

/// Errors raised while reading or writing click records.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The record file could not be read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// File involved.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The record is not valid JSON of the expected shape.
    #[error("malformed click record: {0}")]
    Json(#[from] serde_json::Error),

    /// A coordinate list has inconsistent dimensionality.
    #[error("label `{label}` mixes coordinates of {first} and {other} elements")]
    RaggedCoordinates {
        /// Offending label.
        label: String,
        /// Length of the first coordinate.
        first: usize,
        /// Length of a later coordinate.
        other: usize,
    },
}

/// Record file name for an image path or file name.
///
/// Only the final path component is used. A `.nii.gz` extension is
/// replaced by [`RECORD_SUFFIX`]; otherwise the last extension (if any)
/// is dropped before appending it.
#[must_use]
pub fn record_file_name(image: &str) -> String {
    let base = image.rsplit(['/', '\\']).next().unwrap_or(image);
    let stem = base.strip_suffix(NIFTI_GZ).unwrap_or_else(|| {
        match base.rfind('.') {
            Some(dot) if dot > 0 => &base[..dot],
            _ => base,
        }
    });
    format!("{stem}{RECORD_SUFFIX}")
}

/// Parse a record from JSON text.
///
/// # Errors
///
/// Returns [`ReplayError::Json`] for invalid JSON and
/// [`ReplayError::RaggedCoordinates`] if one label's coordinates differ
/// in length.
pub fn parse_record(json: &str) -> Result<ClickRecord, ReplayError> {
    let record: ClickRecord = serde_json::from_str(json)?;
    for label in record.labels() {
        let coords = record.get(label).unwrap_or_default();
        if let Some(first) = coords.first().map(Vec::len)
            && let Some(other) = coords.iter().map(Vec::len).find(|&l| l != first)
        {
            return Err(ReplayError::RaggedCoordinates {
                label: label.to_string(),
                first,
                other,
            });
        }
    }
    Ok(record)
}

/// Serialize a record to pretty-printed JSON.
///
/// # Errors
///
/// Returns [`ReplayError::Json`] if serialization fails.
pub fn to_json(record: &ClickRecord) -> Result<String, ReplayError> {
    Ok(serde_json::to_string_pretty(record)?)
}
