//! Cluster assignment: labels each incident with the hotspot it falls in.

use crime_hotspot_incident_models::{HotspotLabel, IncidentRecord, LabeledIncident};
use crime_hotspot_inference::{Clusterer, ModelError};

/// Labels every incident with valid coordinates using `clusterer`.
///
/// Incidents without usable coordinates are kept with `label: None` so the
/// output lines up with the input, but they never reach the clusterer and
/// never join a hotspot. Noise is labeled, not filtered.
///
/// # Errors
///
/// Returns [`ModelError`] if the clusterer fails, returns the wrong number
/// of labels, or returns a label that cannot be a hotspot id.
pub fn assign(
    records: &[IncidentRecord],
    clusterer: &dyn Clusterer,
) -> Result<Vec<LabeledIncident>, ModelError> {
    let retained: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| record.coordinates().is_some())
        .map(|(idx, _)| idx)
        .collect();

    let points: Vec<[f64; 2]> = retained
        .iter()
        .filter_map(|&idx| records[idx].coordinates())
        .map(|(lat, lon)| [lat.to_radians(), lon.to_radians()])
        .collect();

    let raw_labels = if points.is_empty() {
        Vec::new()
    } else {
        clusterer.predict_labels(&points)?
    };

    if raw_labels.len() != points.len() {
        return Err(ModelError::LengthMismatch {
            expected: points.len(),
            got: raw_labels.len(),
        });
    }

    let mut labels: Vec<Option<HotspotLabel>> = vec![None; records.len()];
    for (idx, raw) in retained.into_iter().zip(raw_labels) {
        let label =
            HotspotLabel::from_raw(raw).map_err(|e| ModelError::InvalidLabel(e.to_string()))?;
        labels[idx] = Some(label);
    }

    let dropped = records.len() - points.len();
    if dropped > 0 {
        log::debug!("{dropped} of {} incidents have no usable coordinates", records.len());
    }

    Ok(records
        .iter()
        .zip(labels)
        .map(|(record, label)| LabeledIncident {
            record: record.clone(),
            label,
        })
        .collect())
}
