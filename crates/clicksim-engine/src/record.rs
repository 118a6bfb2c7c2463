//! Prerecorded click sequences.
//!
//! A [`ClickRecord`] holds, per label, the ordered clicks an annotator
//! placed on one sample. Coordinates are stored without the leading
//! channel slot; the engine prepends it when replaying. Where records
//! come from is abstracted by [`ClickRecordSource`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::session::ClickSession;
use crate::types::{ClickError, LabelMap};

/// Recorded clicks of one sample, keyed by label name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClickRecord {
    clicks: BTreeMap<String, Vec<Vec<i64>>>,
}

impl ClickRecord {
    /// Create an empty record.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            clicks: BTreeMap::new(),
        }
    }

    /// Set the click sequence for `label`, replacing any previous one.
    pub fn insert(&mut self, label: impl Into<String>, clicks: Vec<Vec<i64>>) {
        self.clicks.insert(label.into(), clicks);
    }

    /// Recorded clicks for `label`, if the label is present.
    #[must_use]
    pub fn get(&self, label: &str) -> Option<&[Vec<i64>]> {
        self.clicks.get(label).map(Vec::as_slice)
    }

    /// Label names present in the record.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.clicks.keys().map(String::as_str)
    }

    /// Capture the clicks accumulated in `session`, dropping the leading
    /// slot of every coordinate.
    ///
    /// Every label of `labels` gets an entry, empty when it was never
    /// clicked, so the record replays for the same label set.
    #[must_use]
    pub fn from_session(session: &ClickSession, labels: &LabelMap) -> Self {
        let spatial = session.spatial_dims();
        let clicks = labels
            .iter()
            .map(|(label, _)| {
                let coords = session
                    .clicks(label)
                    .coordinates()
                    .iter()
                    .filter_map(|c| c.spatial(spatial).map(<[i64]>::to_vec))
                    .collect();
                (label.to_string(), coords)
            })
            .collect();
        Self { clicks }
    }
}

/// Supplies prerecorded clicks keyed by sample identity.
///
/// Implementations must not hold resources open between calls.
pub trait ClickRecordSource {
    /// Load the record for `sample`.
    ///
    /// Returns `Ok(None)` if the source has no record for the sample.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::InvalidRecord`] if a record exists but
    /// cannot be read.
    fn load(&self, sample: &str) -> Result<Option<ClickRecord>, ClickError>;
}

impl ClickRecordSource for BTreeMap<String, ClickRecord> {
    fn load(&self, sample: &str) -> Result<Option<ClickRecord>, ClickError> {
        Ok(self.get(sample).cloned())
    }
}

impl<S: std::hash::BuildHasher> ClickRecordSource for HashMap<String, ClickRecord, S> {
    fn load(&self, sample: &str) -> Result<Option<ClickRecord>, ClickError> {
        Ok(self.get(sample).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::coordinate::Coordinate;

    #[test]
    fn record_json_is_a_plain_label_map() {
        let mut record = ClickRecord::new();
        record.insert("liver", vec![vec![1, 2, 3], vec![4, 5, 6]]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"liver":[[1,2,3],[4,5,6]]}"#);
        let back: ClickRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn from_session_strips_leading_slot() {
        let mut session = ClickSession::new(2);
        session.push("lesion", Coordinate::new(vec![0, 3, 4])).unwrap();
        let labels = LabelMap::from_names(["background", "lesion"]).unwrap();
        let record = ClickRecord::from_session(&session, &labels);
        assert_eq!(record.get("lesion"), Some(&[vec![3_i64, 4]][..]));
    }

    #[test]
    fn from_session_lists_unclicked_labels() {
        let mut session = ClickSession::new(2);
        session.push("lesion", Coordinate::new(vec![0, 3, 4])).unwrap();
        let labels = LabelMap::from_names(["background", "lesion", "vessel"]).unwrap();
        let record = ClickRecord::from_session(&session, &labels);
        assert_eq!(
            record.labels().collect::<Vec<_>>(),
            vec!["background", "lesion", "vessel"]
        );
        assert_eq!(record.get("background"), Some(&[][..]));
        assert_eq!(record.get("vessel"), Some(&[][..]));
    }

    #[test]
    fn map_sources_return_none_for_unknown_samples() {
        let mut records = BTreeMap::new();
        records.insert("case_1".to_string(), ClickRecord::new());
        assert!(records.load("case_1").unwrap().is_some());
        assert!(records.load("case_2").unwrap().is_none());

        let hashed: HashMap<String, ClickRecord> = records.into_iter().collect();
        assert!(hashed.load("case_1").unwrap().is_some());
    }
}
