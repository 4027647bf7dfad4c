//! Daily incident counts.

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use crime_hotspot_incident_models::{DailyCount, IncidentRecord};

/// Counts incidents per calendar date of their occurrence timestamp,
/// ascending by date. Dates with no incidents are absent.
#[must_use]
pub fn daily_counts(records: &[IncidentRecord]) -> Vec<DailyCount> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.occurrence_date()).or_insert(0_u64) += 1;
    }
    counts
        .into_iter()
        .map(|(date, count)| DailyCount { date, count })
        .collect()
}

/// Keeps the most recent `max_days` entries of an ascending series, or all
/// of it when `max_days` is `None`. A non-empty series stays non-empty.
#[must_use]
pub fn cap_history(counts: &[DailyCount], max_days: Option<NonZeroUsize>) -> &[DailyCount] {
    match max_days {
        Some(max) if counts.len() > max.get() => &counts[counts.len() - max.get()..],
        _ => counts,
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::test_support::incident;

    fn date(value: &str) -> NaiveDate {
        NaiveDate::parse_from_str(value, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn counts_per_day_in_date_order() {
        let counts = daily_counts(&[
            incident(0.0, 0.0, "2025-01-02"),
            incident(0.0, 0.0, "2025-01-01"),
            incident(0.0, 0.0, "2025-01-02"),
            incident(0.0, 0.0, "2025-01-05"),
        ]);

        assert_eq!(
            counts,
            vec![
                DailyCount {
                    date: date("2025-01-01"),
                    count: 1
                },
                DailyCount {
                    date: date("2025-01-02"),
                    count: 2
                },
                DailyCount {
                    date: date("2025-01-05"),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn cap_keeps_most_recent_days() {
        let counts = daily_counts(&[
            incident(0.0, 0.0, "2025-01-01"),
            incident(0.0, 0.0, "2025-01-02"),
            incident(0.0, 0.0, "2025-01-03"),
        ]);

        let capped = cap_history(&counts, NonZeroUsize::new(2));
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].date, date("2025-01-02"));

        assert_eq!(cap_history(&counts, NonZeroUsize::new(10)).len(), 3);
        assert_eq!(cap_history(&counts, None).len(), 3);
    }

    #[test]
    fn smallest_cap_keeps_last_day() {
        let counts = daily_counts(&[
            incident(0.0, 0.0, "2025-01-01"),
            incident(0.0, 0.0, "2025-01-02"),
        ]);

        let capped = cap_history(&counts, NonZeroUsize::new(1));
        assert_eq!(capped.len(), 1);
        assert_eq!(capped[0].date, date("2025-01-02"));
        assert_eq!(NonZeroUsize::new(0), None);
    }
}
