//! Exemplar-based approximate prediction for a trained density-based
//! clustering model.
//!
//! The clustering model was trained with the haversine metric on
//! `[latitude, longitude]` in radians, so every exemplar and every query
//! point is in radians and every distance is an angle on the unit sphere.
//!
//! A query point takes the label of its nearest exemplar when the
//! mutual-reachability distance `max(core_distance, distance)` does not
//! exceed `max_reachability`. Otherwise it is noise (`-1`).

use geo::{Distance, HaversineMeasure, Point};
use rstar::RTree;
use rstar::primitives::GeomWithData;
use serde::{Deserialize, Serialize};

use crate::{Clusterer, ModelError};

/// Label returned for points that fall outside every cluster.
pub const NOISE_LABEL: i64 = -1;

/// Haversine on the unit sphere, so distances are central angles in radians.
const UNIT_SPHERE: HaversineMeasure = HaversineMeasure::new(1.0);

/// Nearest exemplars (in the projected plane) re-ranked by haversine
/// distance.
const NEIGHBOR_CANDIDATES: usize = 4;

/// One training point retained by the clustering model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemplar {
    /// Latitude in radians.
    pub latitude: f64,
    /// Longitude in radians.
    pub longitude: f64,
    /// Cluster label of the exemplar.
    pub label: i64,
    /// Core distance of the exemplar, in radians.
    #[serde(default)]
    pub core_distance: f64,
}

/// Stored parameters of an [`ExemplarClusterer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExemplarParams {
    /// Cluster exemplars.
    pub exemplars: Vec<Exemplar>,
    /// Largest mutual-reachability distance (radians) still assigned to a
    /// cluster.
    pub max_reachability: f64,
}

type IndexedPoint = GeomWithData<[f64; 2], usize>;

/// Approximate-prediction clusterer backed by an R-tree of exemplars.
pub struct ExemplarClusterer {
    tree: RTree<IndexedPoint>,
    exemplars: Vec<Exemplar>,
    max_reachability: f64,
    /// `cos(mean latitude)`, applied to longitudes so that planar
    /// nearest-neighbour order approximates great-circle order.
    lon_scale: f64,
}

impl ExemplarClusterer {
    /// Builds the R-tree over the exemplars.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InvalidParameters`] if there are no exemplars,
    /// an exemplar has non-finite coordinates, or `max_reachability` is
    /// negative or non-finite.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(params: ExemplarParams) -> Result<Self, ModelError> {
        let ExemplarParams {
            exemplars,
            max_reachability,
        } = params;

        if exemplars.is_empty() {
            return Err(ModelError::InvalidParameters {
                message: "clustering model has no exemplars".to_string(),
            });
        }
        if !max_reachability.is_finite() || max_reachability < 0.0 {
            return Err(ModelError::InvalidParameters {
                message: format!(
                    "max_reachability must be finite and >= 0, got {max_reachability}"
                ),
            });
        }
        if let Some(bad) = exemplars
            .iter()
            .find(|e| !e.latitude.is_finite() || !e.longitude.is_finite())
        {
            return Err(ModelError::InvalidParameters {
                message: format!("exemplar with non-finite coordinates: {bad:?}"),
            });
        }

        let mean_lat = exemplars.iter().map(|e| e.latitude).sum::<f64>() / exemplars.len() as f64;
        let lon_scale = mean_lat.cos();

        let points = exemplars
            .iter()
            .enumerate()
            .map(|(idx, e)| IndexedPoint::new([e.latitude, e.longitude * lon_scale], idx))
            .collect();
        let tree = RTree::bulk_load(points);

        log::debug!(
            "Built exemplar index with {} points (max reachability {max_reachability})",
            exemplars.len()
        );

        Ok(Self {
            tree,
            exemplars,
            max_reachability,
            lon_scale,
        })
    }

    /// Number of exemplars in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exemplars.len()
    }

    /// Whether the index is empty. Always `false` for a constructed model.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exemplars.is_empty()
    }

    fn predict_one(&self, lat: f64, lon: f64) -> Option<i64> {
        if !lat.is_finite() || !lon.is_finite() {
            return None;
        }

        let nearest = self
            .tree
            .nearest_neighbor_iter(&[lat, lon * self.lon_scale])
            .take(NEIGHBOR_CANDIDATES)
            .map(|candidate| {
                let exemplar = &self.exemplars[candidate.data];
                let distance =
                    central_angle(lat, lon, exemplar.latitude, exemplar.longitude);
                (exemplar, distance)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1));

        let label = nearest.map_or(NOISE_LABEL, |(exemplar, distance)| {
            if exemplar.core_distance.max(distance) <= self.max_reachability {
                exemplar.label
            } else {
                NOISE_LABEL
            }
        });
        Some(label)
    }
}

impl Clusterer for ExemplarClusterer {
    fn predict_labels(&self, points: &[[f64; 2]]) -> Result<Vec<Option<i64>>, ModelError> {
        Ok(points
            .iter()
            .map(|[lat, lon]| self.predict_one(*lat, *lon))
            .collect())
    }
}

/// Central angle between two `(lat, lon)` points given in radians.
fn central_angle(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let from = Point::new(lon1.to_degrees(), lat1.to_degrees());
    let to = Point::new(lon2.to_degrees(), lat2.to_degrees());
    UNIT_SPHERE.distance(from, to)
}
