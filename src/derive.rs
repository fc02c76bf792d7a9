//! Chart-ready views derived from buckets and snapshots: deltas, percentage
//! shares, breakdown normalisation and the KPI metric cards.
//!
//! Nothing here allocates state or fails. Divisions by zero come back as
//! `None`, never as `NaN` or infinity.

use serde::{Deserialize, Serialize};

use crate::aggregate::{
    Bucket, Bucketing, DataPoint, Granularity, bucketize_series, finite_or_zero, recent,
};
use crate::kpi::{KpiSnapshot, Metric};
use crate::store::{SnapshotSource, StoredSnapshot};

/// One bucket as plotted, with its share of the total and its change from the
/// previous bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    pub label: String,
    pub value: f64,

    /// `value / total * 100`; `None` for every entry when the total is zero
    pub percentage_of_total: Option<f64>,

    /// `value - previous`; `None` for the first entry
    pub delta_from_previous: Option<f64>,

    /// `(value - previous) / |previous| * 100`; `None` for the first entry or a
    /// zero previous value
    pub relative_change: Option<f64>,
}

/// Percentage share of each value in the total.
///
/// # Examples
/// ```
/// use businalyst::derive::shares;
///
/// assert_eq!(shares(&[1.0, 3.0]), vec![Some(25.0), Some(75.0)]);
/// assert_eq!(shares(&[0.0, 0.0]), vec![None, None]);
/// ```
pub fn shares(values: &[f64]) -> Vec<Option<f64>> {
    let total: f64 = values.iter().copied().map(finite_or_zero).sum();
    values
        .iter()
        .map(|v| {
            if total == 0.0 {
                None
            } else {
                Some(finite_or_zero(*v) / total * 100.0)
            }
        })
        .collect()
}

/// Turns buckets into plotted entries with shares and period-over-period
/// deltas
pub fn derive_entries(buckets: &[Bucket]) -> Vec<SeriesEntry> {
    let values: Vec<f64> = buckets.iter().map(|b| finite_or_zero(b.value)).collect();
    let percentages = shares(&values);

    buckets
        .iter()
        .enumerate()
        .map(|(i, bucket)| {
            let value = values[i];
            let previous = i.checked_sub(1).map(|p| values[p]);
            SeriesEntry {
                label: bucket.label.clone(),
                value,
                percentage_of_total: percentages[i],
                delta_from_previous: previous.map(|prev| value - prev),
                relative_change: previous
                    .filter(|prev| *prev != 0.0)
                    .map(|prev| (value - prev) / prev.abs() * 100.0),
            }
        })
        .collect()
}

/// Which series to plot and how to reduce it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesRequest {
    pub metric: Metric,
    pub bucketing: Bucketing,
    /// Keep only the most recent buckets
    pub limit: Option<usize>,
}

impl Default for SeriesRequest {
    /// Monthly revenue
    fn default() -> Self {
        Self {
            metric: Metric::Revenue,
            bucketing: Bucketing::Calendar(Granularity::Month),
            limit: None,
        }
    }
}

impl SeriesRequest {
    pub fn buckets(&self, snapshot: &KpiSnapshot) -> Vec<Bucket> {
        let buckets = bucketize_series(&snapshot.series(self.metric), &self.bucketing);
        match self.limit {
            Some(n) => recent(&buckets, n),
            None => buckets,
        }
    }

    pub fn entries(&self, snapshot: &KpiSnapshot) -> Vec<SeriesEntry> {
        derive_entries(&self.buckets(snapshot))
    }

    /// Chart title, e.g. `Revenue by month`
    pub fn title(&self) -> String {
        match self.bucketing {
            Bucketing::Calendar(granularity) => format!("{} by {}", self.metric, granularity),
            Bucketing::LastPoints(n) => format!("{} (last {} points)", self.metric, n),
        }
    }
}

/// Per-point expense series (`revenue - profit`), truncated to the shorter
/// input
pub fn expense_series(revenue: &[DataPoint], profit: &[DataPoint]) -> Vec<DataPoint> {
    revenue
        .iter()
        .zip(profit.iter())
        .map(|(r, p)| DataPoint::new(r.date.clone(), finite_or_zero(r.value - p.value)))
        .collect()
}

/// One slice of a breakdown (donut, segmented bar)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub name: String,
    pub value: f64,
    /// Share in percent; filled by [`segments`], rescaled by [`normalize_shares`]
    pub percentage: f64,
}

/// Builds breakdown segments from `(name, value)` pairs, percentages computed
/// from the values
pub fn segments<'a, I>(items: I) -> Vec<Segment>
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let raw: Vec<(&str, f64)> = items
        .into_iter()
        .map(|(name, value)| (name, finite_or_zero(value)))
        .collect();
    let values: Vec<f64> = raw.iter().map(|(_, v)| *v).collect();

    raw.iter()
        .zip(shares(&values))
        .map(|((name, value), share)| Segment {
            name: name.to_string(),
            value: *value,
            percentage: share.unwrap_or(0.0),
        })
        .collect()
}

/// Rescales segment percentages so they add up to 100.
///
/// Rounded percentages coming from the backend rarely add up exactly. When
/// they sum to zero they are left alone.
pub fn normalize_shares(segments: &mut [Segment]) {
    let sum: f64 = segments.iter().map(|s| finite_or_zero(s.percentage)).sum();
    if sum == 0.0 {
        return;
    }
    for segment in segments.iter_mut() {
        segment.percentage = finite_or_zero(segment.percentage) / sum * 100.0;
    }
}

/// One of the five KPI cards on the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricCard {
    pub title: &'static str,
    /// `None` when no snapshot is loaded
    pub value: Option<f64>,
    pub target: f64,
    /// Percentage of target reached, capped at 100
    pub progress: f64,
    pub caption: &'static str,
}

const NO_DATA_CAPTION: &str = "Upload a file to see data";
const DEMO_CAPTION: &str = "Demo data — upload to see yours";
const UPLOADED_CAPTION: &str = "From your uploaded file";

/// Builds the KPI cards for whatever the store currently holds.
///
/// Targets are the current sum plus 20% (10% for revenue), rounded up, or a
/// fixed default when the sum is zero.
pub fn metric_cards(stored: Option<&StoredSnapshot>) -> Vec<MetricCard> {
    let caption = match stored.map(|s| &s.source) {
        None => NO_DATA_CAPTION,
        Some(SnapshotSource::Demo) => DEMO_CAPTION,
        Some(_) => UPLOADED_CAPTION,
    };
    let snapshot = stored.map(|s| &s.snapshot);

    let card = |title: &'static str, pick: fn(&KpiSnapshot) -> f64, factor: f64, fallback: f64| {
        let current = snapshot.map(pick).map(finite_or_zero);
        let sum = current.unwrap_or(0.0);
        let target = if sum != 0.0 {
            (sum * factor).ceil()
        } else {
            fallback
        };
        MetricCard {
            title,
            value: current,
            target,
            progress: progress(sum, target),
            caption,
        }
    };

    vec![
        card("Profit", |s| s.profit_sum, 1.2, 30_000.0),
        card("Revenue", |s| s.revenue_sum, 1.1, 200_000.0),
        card("Orders", |s| s.orders_sum, 1.2, 1_500.0),
        card("Expense", |s| s.expense_sum, 1.2, 50_000.0),
        card("Customers", |s| s.customers_sum, 1.2, 10_000.0),
    ]
}

fn progress(current: f64, target: f64) -> f64 {
    if target == 0.0 {
        return 0.0;
    }
    finite_or_zero((current / target * 100.0).min(100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bucket(label: &str, value: f64) -> Bucket {
        Bucket {
            key: label.to_string(),
            label: label.to_string(),
            start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            value,
            count: 1,
        }
    }

    #[test]
    fn deltas_and_relative_change() {
        let entries = derive_entries(&[bucket("a", 0.0), bucket("b", 10.0), bucket("c", 5.0)]);
        assert_eq!(entries[0].delta_from_previous, None);
        assert_eq!(entries[0].relative_change, None);
        assert_eq!(entries[1].delta_from_previous, Some(10.0));
        // previous value is zero
        assert_eq!(entries[1].relative_change, None);
        assert_eq!(entries[2].delta_from_previous, Some(-5.0));
        assert_eq!(entries[2].relative_change, Some(-50.0));
    }

    #[test]
    fn zero_total_has_no_shares() {
        let entries = derive_entries(&[bucket("a", 0.0), bucket("b", 0.0)]);
        assert!(entries.iter().all(|e| e.percentage_of_total.is_none()));
    }

    #[test]
    fn non_finite_values_count_as_zero() {
        let entries = derive_entries(&[bucket("a", f64::NAN), bucket("b", 4.0)]);
        assert_eq!(entries[0].value, 0.0);
        assert_eq!(entries[1].percentage_of_total, Some(100.0));
        assert_eq!(entries[1].delta_from_previous, Some(4.0));
    }

    #[test]
    fn normalizes_rounded_breakdowns() {
        let mut parts = vec![
            Segment { name: "A".into(), value: 1.0, percentage: 33.0 },
            Segment { name: "B".into(), value: 1.0, percentage: 33.0 },
            Segment { name: "C".into(), value: 1.0, percentage: 33.0 },
        ];
        normalize_shares(&mut parts);
        let total: f64 = parts.iter().map(|s| s.percentage).sum();
        assert!((total - 100.0).abs() < 1e-9);

        let mut empty = vec![Segment { name: "A".into(), value: 0.0, percentage: 0.0 }];
        normalize_shares(&mut empty);
        assert_eq!(empty[0].percentage, 0.0);
    }

    #[test]
    fn segments_from_pairs() {
        let parts = segments([("Electronics", 48.0), ("Office Supplies", 52.0)]);
        assert_eq!(parts[0].percentage, 48.0);
        assert_eq!(parts[1].name, "Office Supplies");
    }

    #[test]
    fn request_limits_to_recent_buckets() {
        let snapshot = KpiSnapshot {
            date_data: vec!["2024-01-10".into(), "2024-02-10".into(), "2024-03-10".into()],
            revenue_data: vec![1.0, 2.0, 3.0],
            profit_data: vec![0.5, 0.5, 0.5],
            ..Default::default()
        };
        let request = SeriesRequest {
            limit: Some(2),
            ..Default::default()
        };
        let entries = request.entries(&snapshot);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].label, "Feb");
        assert_eq!(entries[1].delta_from_previous, Some(1.0));
        assert_eq!(request.title(), "Revenue by month");

        let expense = SeriesRequest {
            metric: Metric::Expense,
            bucketing: Bucketing::LastPoints(2),
            limit: None,
        };
        let values: Vec<f64> = expense.entries(&snapshot).iter().map(|e| e.value).collect();
        assert_eq!(values, vec![0.5, 2.5]);
    }

    #[test]
    fn cards_without_data() {
        let cards = metric_cards(None);
        assert_eq!(cards.len(), 5);
        assert!(cards.iter().all(|c| c.value.is_none()));
        assert_eq!(cards[0].target, 30_000.0);
        assert_eq!(cards[1].target, 200_000.0);
        assert_eq!(cards[0].caption, "Upload a file to see data");
    }

    #[test]
    fn cards_from_upload() {
        let stored = StoredSnapshot {
            snapshot: KpiSnapshot {
                revenue_sum: 1000.0,
                profit_sum: 250.0,
                ..Default::default()
            },
            source: SnapshotSource::Uploaded {
                file_name: "sales.csv".into(),
                uploaded_at: chrono::Utc::now(),
            },
        };
        let cards = metric_cards(Some(&stored));
        assert_eq!(cards[0].target, 300.0);
        assert_eq!(cards[1].target, 1100.0);
        assert!((cards[1].progress - 1000.0 / 1100.0 * 100.0).abs() < 1e-9);
        assert_eq!(cards[2].value, Some(0.0));
        assert_eq!(cards[2].target, 1_500.0);
        assert_eq!(cards[0].caption, "From your uploaded file");
    }
}
