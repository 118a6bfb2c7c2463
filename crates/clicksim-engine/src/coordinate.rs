//! Click coordinates, per-label click lists, and patch-to-volume mapping.
//!
//! A [`Coordinate`] stores one element per spatial axis preceded by a
//! constant leading slot that lines it up with the channel axis of a
//! channel-first volume. Coordinates produced by the engine always have
//! this `spatial + 1` arity.

use serde::{Deserialize, Serialize};

use crate::types::ClickError;

/// Integer coordinate of one simulated click.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Coordinate(Vec<i64>);

impl Coordinate {
    /// Create a coordinate from its raw elements.
    #[must_use]
    pub const fn new(elements: Vec<i64>) -> Self {
        Self(elements)
    }

    /// Convert an array index (as returned by the samplers) into a
    /// coordinate.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::CoordinateOverflow`] if an element exceeds
    /// `i64::MAX`.
    pub fn from_index(index: &[usize]) -> Result<Self, ClickError> {
        index
            .iter()
            .map(|&i| i64::try_from(i))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|_| ClickError::CoordinateOverflow {
                context: "array index",
                elements: index.iter().map(|&i| widen(i)).collect(),
            })
    }

    /// Prepend the constant leading slot to spatial-only elements.
    #[must_use]
    pub fn with_leading_slot(spatial: &[i64]) -> Self {
        let mut elements = Vec::with_capacity(spatial.len() + 1);
        elements.push(0);
        elements.extend_from_slice(spatial);
        Self(elements)
    }

    /// Number of elements, leading slot included.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the coordinate has no elements.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All elements.
    #[must_use]
    pub fn elements(&self) -> &[i64] {
        &self.0
    }

    /// The trailing `spatial` elements, or `None` if the coordinate is
    /// shorter than that.
    #[must_use]
    pub fn spatial(&self, spatial: usize) -> Option<&[i64]> {
        self.0.len().checked_sub(spatial).map(|start| &self.0[start..])
    }
}

/// Append-only, ordered sequence of clicks for one label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClickList(Vec<Coordinate>);

impl ClickList {
    /// Create an empty click list.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a click after checking its arity.
    ///
    /// # Errors
    ///
    /// Returns [`ClickError::MalformedCoordinate`] if the coordinate does
    /// not have exactly `arity` elements. The list is left unchanged.
    pub fn push(&mut self, label: &str, coordinate: Coordinate, arity: usize) -> Result<(), ClickError> {
        if coordinate.len() != arity {
            return Err(ClickError::MalformedCoordinate {
                label: label.to_string(),
                coordinate: coordinate.0,
                expected: arity,
            });
        }
        self.0.push(coordinate);
        Ok(())
    }

    /// Number of clicks.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if no click has been placed yet.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The most recent click, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Coordinate> {
        self.0.last()
    }

    /// All clicks in placement order.
    #[must_use]
    pub fn coordinates(&self) -> &[Coordinate] {
        &self.0
    }
}

impl FromIterator<Coordinate> for ClickList {
    fn from_iter<T: IntoIterator<Item = Coordinate>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Map a patch-local coordinate to global volume coordinates.
///
/// `origin` holds one offset per spatial axis. `local` either has the
/// same length (pure spatial) or one extra leading slot, which is carried
/// over unchanged.
///
/// # Errors
///
/// Returns [`ClickError::MalformedCoordinate`] if `local` has neither
/// `origin.len()` nor `origin.len() + 1` elements, and
/// [`ClickError::CoordinateOverflow`] if a sum leaves the `i64` range.
pub fn to_global(local: &Coordinate, origin: &[usize]) -> Result<Coordinate, ClickError> {
    let lead = match local.len().checked_sub(origin.len()) {
        Some(lead @ (0 | 1)) => lead,
        _ => {
            return Err(ClickError::MalformedCoordinate {
                label: "patch-local coordinate".to_string(),
                coordinate: local.0.clone(),
                expected: origin.len() + 1,
            });
        }
    };

    let mut global = local.0.clone();
    for (g, &o) in global[lead..].iter_mut().zip(origin) {
        let Some(sum) = i64::try_from(o).ok().and_then(|o| g.checked_add(o)) else {
            return Err(ClickError::CoordinateOverflow {
                context: "patch-to-volume mapping",
                elements: local.0[lead..]
                    .iter()
                    .zip(origin)
                    .map(|(&l, &o)| i128::from(l) + widen(o))
                    .collect(),
            });
        };
        *g = sum;
    }
    Ok(Coordinate(global))
}

fn widen(i: usize) -> i128 {
    i128::try_from(i).unwrap_or(i128::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn to_global_keeps_leading_slot() {
        let local = Coordinate::new(vec![0, 1, 2, 3]);
        let global = to_global(&local, &[10, 20, 30]).unwrap();
        assert_eq!(global.elements(), &[0, 11, 22, 33]);
    }

    #[test]
    fn to_global_without_leading_slot() {
        let local = Coordinate::new(vec![4, 5]);
        let global = to_global(&local, &[64, 0]).unwrap();
        assert_eq!(global.elements(), &[68, 5]);
    }

    #[test]
    fn to_global_rejects_dimension_mismatch() {
        let local = Coordinate::new(vec![0, 1]);
        let result = to_global(&local, &[1, 2, 3]);
        assert!(matches!(
            result,
            Err(ClickError::MalformedCoordinate { expected: 4, .. })
        ));

        let too_long = Coordinate::new(vec![0, 0, 1, 2, 3]);
        assert!(to_global(&too_long, &[1, 2, 3]).is_err());
    }

    #[test]
    fn to_global_then_subtract_recovers_local() {
        let origins: [[usize; 3]; 3] = [[0, 0, 0], [128, 0, 64], [7, 300, 12]];
        for origin in &origins {
            for x in 0..4_i64 {
                for y in [0_i64, 17, 127] {
                    let local = Coordinate::new(vec![0, x, y, x + y]);
                    let global = to_global(&local, origin).unwrap();
                    let recovered: Vec<i64> = global
                        .elements()
                        .iter()
                        .zip(std::iter::once(0).chain(origin.iter().copied()))
                        .map(|(&g, o)| g - i64::try_from(o).unwrap())
                        .collect();
                    assert_eq!(recovered, local.elements());
                }
            }
        }
    }

    #[test]
    fn to_global_reports_overflow() {
        let local = Coordinate::new(vec![0, i64::MAX - 1, 0]);
        let result = to_global(&local, &[2, 0]);
        assert!(matches!(
            result,
            Err(ClickError::CoordinateOverflow { ref elements, .. })
                if elements[0] == i128::from(i64::MAX) + 1
        ));

        let huge = usize::try_from(i64::MAX).unwrap() + 1;
        assert!(to_global(&Coordinate::new(vec![0, 0]), &[huge]).is_err());
    }

    #[test]
    fn from_index_converts_or_reports_overflow() {
        let c = Coordinate::from_index(&[0, 3, 9]).unwrap();
        assert_eq!(c.elements(), &[0, 3, 9]);

        let huge = usize::try_from(i64::MAX).unwrap() + 1;
        assert!(matches!(
            Coordinate::from_index(&[0, huge]),
            Err(ClickError::CoordinateOverflow { .. })
        ));
    }

    #[test]
    fn click_list_enforces_arity() {
        let mut clicks = ClickList::new();
        clicks
            .push("liver", Coordinate::new(vec![0, 1, 2, 3]), 4)
            .unwrap();
        let err = clicks
            .push("liver", Coordinate::new(vec![1, 2, 3]), 4)
            .unwrap_err();
        assert!(matches!(
            err,
            ClickError::MalformedCoordinate { ref label, expected: 4, .. } if label == "liver"
        ));
        assert_eq!(clicks.len(), 1);
        assert_eq!(clicks.last(), Some(&Coordinate::new(vec![0, 1, 2, 3])));
    }

    #[test]
    fn coordinate_spatial_tail() {
        let c = Coordinate::with_leading_slot(&[3, 4, 5]);
        assert_eq!(c.elements(), &[0, 3, 4, 5]);
        assert_eq!(c.spatial(3), Some(&[3_i64, 4, 5][..]));
        assert_eq!(c.spatial(5), None);
    }

    #[test]
    fn coordinate_serializes_as_plain_array() {
        let c = Coordinate::new(vec![0, 1, 2]);
        assert_eq!(serde_json::to_string(&c).unwrap(), "[0,1,2]");
    }
}
