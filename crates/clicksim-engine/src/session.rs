//! Per-sample interaction state.
//!
//! A [`ClickSession`] owns one [`ClickList`] per label for the sample
//! currently being trained on. The training loop creates (or resets) it
//! at every sample boundary and passes it by `&mut` into each engine
//! call; lists only grow in between.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::coordinate::{ClickList, Coordinate};
use crate::types::ClickError;

/// Accumulated clicks for every label of one sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickSession {
    spatial_dims: usize,
    clicks: BTreeMap<String, ClickList>,
}

impl ClickSession {
    /// Create an empty session for volumes with `spatial_dims` spatial axes.
    #[must_use]
    pub const fn new(spatial_dims: usize) -> Self {
        Self {
            spatial_dims,
            clicks: BTreeMap::new(),
        }
    }

    /// Number of spatial axes of the sample.
    #[must_use]
    pub const fn spatial_dims(&self) -> usize {
        self.spatial_dims
    }

    /// Required number of elements per click (`spatial + 1`).
    #[must_use]
    pub const fn arity(&self) -> usize {
        self.spatial_dims + 1
    }

    /// Clicks placed so far for `label`; empty if none.
    #[must_use]
    pub fn clicks(&self, label: &str) -> &ClickList {
        static EMPTY: ClickList = ClickList::new();
        self.clicks.get(label).unwrap_or(&EMPTY)
    }

    /// Append a click to `label`'s list.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::MalformedCoordinate`] if the coordinate does
    /// not have [`arity`](Self::arity) elements.
    pub fn push(&mut self, label: &str, coordinate: Coordinate) -> Result<(), ClickError> {
        let arity = self.arity();
        if let Some(list) = self.clicks.get_mut(label) {
            return list.push(label, coordinate, arity);
        }
        let mut list = ClickList::new();
        list.push(label, coordinate, arity)?;
        self.clicks.insert(label.to_string(), list);
        Ok(())
    }

    /// Total number of clicks across all labels.
    #[must_use]
    pub fn total_clicks(&self) -> usize {
        self.clicks.values().map(ClickList::len).sum()
    }

    /// Iterate `(label, clicks)` in label-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClickList)> {
        self.clicks.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Drop every click, keeping the dimensionality. Call at sample
    /// boundaries.
    pub fn reset(&mut self) {
        self.clicks.clear();
    }
}
