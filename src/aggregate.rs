use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::kpi::Metric;

/// Date-only layouts accepted in `date_data`, tried in order.
///
/// Day-first slash/dash/dot layouts match how the backend reads spreadsheets.
const DATE_FORMATS: [&str; 5] = ["%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%d-%m-%Y", "%d.%m.%Y"];

/// Date-time layouts (pandas renders timestamps as `2024-01-01 00:00:00`).
const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// Bucket names for the 30 day comparison frame (five rows per bucket).
const THIRTY_DAY_BUCKETS: [&str; 6] = ["1-5", "6-10", "11-15", "16-20", "21-25", "26-30"];

/// Bimonthly pairs for the 12 month comparison frame.
const MONTH_PAIRS: [&str; 6] = [
    "Jan-Feb", "Mar-Apr", "May-Jun", "Jul-Aug", "Sep-Oct", "Nov-Dec",
];

/// One raw `{date, value}` point as it comes out of the parallel arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Date exactly as the backend sent it
    pub date: String,

    /// Value at that date
    pub value: f64,
}

impl DataPoint {
    pub fn new(date: impl Into<String>, value: f64) -> Self {
        Self {
            date: date.into(),
            value,
        }
    }
}

/// Calendar granularity used to group a series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Day,
    /// ISO week, starting Monday
    Week,
    Month,
    Quarter,
    Year,
}

impl Granularity {
    /// First day of the bucket containing `date`
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            Granularity::Day => date,
            Granularity::Week => {
                date - Duration::days(date.weekday().num_days_from_monday() as i64)
            }
            Granularity::Month => date.with_day(1).unwrap_or(date),
            Granularity::Quarter => {
                let month = (date.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), month, 1).unwrap_or(date)
            }
            Granularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date),
        }
    }

    /// Sortable, unique identifier of the bucket starting at `start`
    pub fn key(self, start: NaiveDate) -> String {
        match self {
            Granularity::Day => start.format("%Y-%m-%d").to_string(),
            Granularity::Week => {
                let week = start.iso_week();
                format!("{}-W{:02}", week.year(), week.week())
            }
            Granularity::Month => start.format("%Y-%m").to_string(),
            Granularity::Quarter => format!("{}-Q{}", start.year(), start.month0() / 3 + 1),
            Granularity::Year => start.year().to_string(),
        }
    }

    /// Axis label of the bucket starting at `start`
    pub fn label(self, start: NaiveDate) -> String {
        match self {
            Granularity::Day => start.format("%b %-d").to_string(),
            Granularity::Week => {
                let week = start.iso_week();
                format!("W{:02} {}", week.week(), week.year())
            }
            Granularity::Month => start.format("%b").to_string(),
            Granularity::Quarter => format!("Q{} {}", start.month0() / 3 + 1, start.year()),
            Granularity::Year => start.year().to_string(),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "daily" | "d" => Ok(Granularity::Day),
            "week" | "weekly" | "w" => Ok(Granularity::Week),
            "month" | "monthly" | "m" => Ok(Granularity::Month),
            "quarter" | "quarterly" | "q" => Ok(Granularity::Quarter),
            "year" | "yearly" | "y" => Ok(Granularity::Year),
            other => Err(format!("unknown granularity: {}", other)),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Granularity::Day => "day",
            Granularity::Week => "week",
            Granularity::Month => "month",
            Granularity::Quarter => "quarter",
            Granularity::Year => "year",
        };
        f.write_str(name)
    }
}

/// How a raw series is reduced before charting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucketing {
    /// Sum points falling into the same calendar bucket
    Calendar(Granularity),
    /// Keep at most N points, always including the first and last one
    LastPoints(usize),
}

/// One aggregated point of a chart series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Sortable identifier, unique within a series
    pub key: String,

    /// Label shown on the axis
    pub label: String,

    /// First day covered by the bucket
    pub start: NaiveDate,

    /// Sum of the values in the bucket
    pub value: f64,

    /// Number of source points summed
    pub count: usize,
}

/// Fixed comparison windows offered by the revenue comparison chart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Timeframe {
    /// Last 7 rows, one bar per row
    #[serde(rename = "7D")]
    Week,
    /// Last 30 rows in six groups of five
    #[serde(rename = "30D")]
    ThirtyDays,
    /// Calendar months folded into bimonthly pairs
    #[serde(rename = "12M")]
    TwelveMonths,
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "7D" | "WEEK" => Ok(Timeframe::Week),
            "30D" | "MONTH" => Ok(Timeframe::ThirtyDays),
            "12M" | "YEAR" => Ok(Timeframe::TwelveMonths),
            other => Err(format!("unknown timeframe: {}", other)),
        }
    }
}

/// One row of the parallel arrays with every metric resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionRow {
    pub date: String,
    pub revenue: f64,
    pub profit: f64,
    pub expense: f64,
    pub orders: f64,
}

impl TransactionRow {
    pub fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Revenue => self.revenue,
            Metric::Profit => self.profit,
            Metric::Expense => self.expense,
            Metric::Orders => self.orders,
        }
    }
}

/// Revenue against one compared metric for one comparison bucket
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeframeEntry {
    pub name: String,
    pub revenue: f64,
    pub compare: f64,
}

/// Parses a backend date string.
///
/// # Arguments
/// * `raw` - Date as found in `date_data`
///
/// # Returns
/// * `Some(date)` for any of the accepted layouts (ISO date, pandas timestamp,
///   RFC 3339, `YYYY/MM/DD`, day-first `DD/MM/YYYY`, `DD-MM-YYYY`, `DD.MM.YYYY`)
/// * `None` otherwise
///
/// # Examples
/// ```
/// use businalyst::aggregate::parse_date;
/// use chrono::NaiveDate;
///
/// assert_eq!(parse_date("2024-03-01"), NaiveDate::from_ymd_opt(2024, 3, 1));
/// assert_eq!(parse_date("2024-03-01 00:00:00"), NaiveDate::from_ymd_opt(2024, 3, 1));
/// assert_eq!(parse_date("not a date"), None);
/// ```
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// Pairs a date array with a value array.
///
/// Mismatched lengths truncate to the shorter array. Non-finite values are
/// replaced by zero so nothing downstream ever sees `NaN`.
pub fn zip_points(dates: &[String], values: &[f64]) -> Vec<DataPoint> {
    dates
        .iter()
        .zip(values.iter())
        .map(|(date, value)| DataPoint::new(date.clone(), finite_or_zero(*value)))
        .collect()
}

/// Replaces `NaN` and infinities with zero
pub fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Parses every point's date, drops the malformed ones and sorts the rest
/// chronologically (stable, so equal dates keep their source order).
fn dated_points(points: &[DataPoint]) -> Vec<(NaiveDate, &DataPoint)> {
    let mut dated: Vec<(NaiveDate, &DataPoint)> = points
        .iter()
        .filter_map(|p| parse_date(&p.date).map(|d| (d, p)))
        .collect();

    let dropped = points.len() - dated.len();
    if dropped > 0 {
        log::debug!(
            "dropped {} of {} points with unparseable dates",
            dropped,
            points.len()
        );
    }

    dated.sort_by_key(|(date, _)| *date);
    dated
}

/// Groups a series into calendar buckets.
///
/// # Arguments
/// * `points` - Raw `{date, value}` points, in any order
/// * `granularity` - Calendar unit to group by
///
/// # Returns
/// * Buckets in chronological order; empty input gives an empty vector
///
/// # Notes
/// * Points whose date cannot be parsed are skipped, never reported as errors
/// * The bucket values add up to the sum of the points that were kept
pub fn bucketize(points: &[DataPoint], granularity: Granularity) -> Vec<Bucket> {
    let mut buckets: BTreeMap<NaiveDate, Bucket> = BTreeMap::new();

    for (date, point) in dated_points(points) {
        let start = granularity.bucket_start(date);
        let bucket = buckets.entry(start).or_insert_with(|| Bucket {
            key: granularity.key(start),
            label: granularity.label(start),
            start,
            value: 0.0,
            count: 0,
        });
        bucket.value += finite_or_zero(point.value);
        bucket.count += 1;
    }

    buckets.into_values().collect()
}

/// Reduces a series to at most `cap` points.
///
/// The first and last points are always kept; the ones in between are picked
/// at evenly spaced indices. A series already within the cap is returned as
/// is (minus points with unparseable dates).
///
/// # Examples
/// ```
/// use businalyst::aggregate::{downsample, DataPoint};
///
/// let points: Vec<DataPoint> = (1..=10)
///     .map(|d| DataPoint::new(format!("2024-01-{:02}", d), d as f64))
///     .collect();
/// let kept = downsample(&points, 4);
/// assert_eq!(kept.len(), 4);
/// assert_eq!(kept.first().unwrap().value, 1.0);
/// assert_eq!(kept.last().unwrap().value, 10.0);
/// ```
pub fn downsample(points: &[DataPoint], cap: usize) -> Vec<Bucket> {
    let dated = dated_points(points);
    let n = dated.len();

    let indices: Vec<usize> = if cap == 0 || n == 0 {
        Vec::new()
    } else if n <= cap {
        (0..n).collect()
    } else if cap == 1 {
        vec![n - 1]
    } else {
        let step = (n - 1) as f64 / (cap - 1) as f64;
        (0..cap)
            .map(|i| ((i as f64 * step).round() as usize).min(n - 1))
            .collect()
    };

    indices
        .into_iter()
        .map(|i| {
            let (date, point) = dated[i];
            Bucket {
                key: Granularity::Day.key(date),
                label: Granularity::Day.label(date),
                start: date,
                value: finite_or_zero(point.value),
                count: 1,
            }
        })
        .collect()
}

/// Applies a [`Bucketing`] to a raw series
pub fn bucketize_series(points: &[DataPoint], bucketing: &Bucketing) -> Vec<Bucket> {
    match *bucketing {
        Bucketing::Calendar(granularity) => bucketize(points, granularity),
        Bucketing::LastPoints(cap) => downsample(points, cap),
    }
}

/// Keeps the `n` most recent buckets
pub fn recent(buckets: &[Bucket], n: usize) -> Vec<Bucket> {
    buckets[buckets.len().saturating_sub(n)..].to_vec()
}

/// Largest calendar months of a series, biggest first
pub fn top_months(points: &[DataPoint], n: usize) -> Vec<Bucket> {
    let mut months = bucketize(points, Granularity::Month);
    months.sort_by(|a, b| b.value.total_cmp(&a.value));
    months.truncate(n);
    months
}

/// Aggregates rows into one of the fixed comparison frames.
///
/// # Arguments
/// * `rows` - Rows of the parallel arrays
/// * `frame` - Comparison window
/// * `compare` - Metric plotted next to revenue
///
/// # Returns
/// * `Week`: the last 7 dated rows as `Day 1` .. `Day 7`
/// * `ThirtyDays`: the last 30 dated rows summed into six groups `1-5` .. `26-30`
/// * `TwelveMonths`: every dated row summed by month of year into six pairs
///   `Jan-Feb` .. `Nov-Dec`
/// * An empty vector when no row has a parseable date
pub fn aggregate_timeframe(
    rows: &[TransactionRow],
    frame: Timeframe,
    compare: Metric,
) -> Vec<TimeframeEntry> {
    let mut dated: Vec<(NaiveDate, &TransactionRow)> = rows
        .iter()
        .filter_map(|r| parse_date(&r.date).map(|d| (d, r)))
        .collect();
    if dated.is_empty() {
        return Vec::new();
    }
    dated.sort_by_key(|(date, _)| *date);

    match frame {
        Timeframe::Week => {
            let tail = &dated[dated.len().saturating_sub(7)..];
            tail.iter()
                .enumerate()
                .map(|(i, (_, row))| TimeframeEntry {
                    name: format!("Day {}", i + 1),
                    revenue: finite_or_zero(row.revenue),
                    compare: finite_or_zero(row.metric(compare)),
                })
                .collect()
        }
        Timeframe::ThirtyDays => {
            let mut entries: Vec<TimeframeEntry> = THIRTY_DAY_BUCKETS
                .iter()
                .map(|name| TimeframeEntry {
                    name: name.to_string(),
                    revenue: 0.0,
                    compare: 0.0,
                })
                .collect();
            let tail = &dated[dated.len().saturating_sub(30)..];
            for (i, (_, row)) in tail.iter().enumerate() {
                let entry = &mut entries[(i / 5).min(5)];
                entry.revenue += finite_or_zero(row.revenue);
                entry.compare += finite_or_zero(row.metric(compare));
            }
            entries
        }
        Timeframe::TwelveMonths => {
            let mut entries: Vec<TimeframeEntry> = MONTH_PAIRS
                .iter()
                .map(|name| TimeframeEntry {
                    name: name.to_string(),
                    revenue: 0.0,
                    compare: 0.0,
                })
                .collect();
            for (date, row) in &dated {
                let entry = &mut entries[(date.month0() / 2) as usize];
                entry.revenue += finite_or_zero(row.revenue);
                entry.compare += finite_or_zero(row.metric(compare));
            }
            entries
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(raw: &[(&str, f64)]) -> Vec<DataPoint> {
        raw.iter().map(|(d, v)| DataPoint::new(*d, *v)).collect()
    }

    #[test]
    fn parses_day_first_layouts() {
        assert_eq!(parse_date("15/01/2024"), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(parse_date("15-01-2024"), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(parse_date("15.01.2024"), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(parse_date("2024/01/15"), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(
            parse_date("2024-01-15T08:30:00Z"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("2024-13-45"), None);
    }

    #[test]
    fn week_buckets_start_on_monday() {
        // 2024-01-03 is a Wednesday
        let date = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let start = Granularity::Week.bucket_start(date);
        assert_eq!(start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(Granularity::Week.label(start), "W01 2024");
        assert_eq!(Granularity::Week.key(start), "2024-W01");
    }

    #[test]
    fn quarter_and_year_labels() {
        let date = NaiveDate::from_ymd_opt(2023, 8, 19).unwrap();
        let q = Granularity::Quarter.bucket_start(date);
        assert_eq!(q, NaiveDate::from_ymd_opt(2023, 7, 1).unwrap());
        assert_eq!(Granularity::Quarter.label(q), "Q3 2023");
        assert_eq!(Granularity::Year.label(date), "2023");
        assert_eq!(Granularity::Day.label(date), "Aug 19");
    }

    #[test]
    fn bucketize_sorts_and_sums() {
        let series = points(&[
            ("2024-02-10", 5.0),
            ("2024-01-02", 1.0),
            ("garbage", 100.0),
            ("2024-01-20", 2.0),
        ]);
        let buckets = bucketize(&series, Granularity::Month);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].label, "Jan");
        assert_eq!(buckets[0].value, 3.0);
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[1].label, "Feb");
        assert_eq!(buckets[1].value, 5.0);
    }

    #[test]
    fn downsample_edges() {
        let series = points(&[("2024-01-01", 1.0), ("2024-01-02", 2.0)]);
        assert!(downsample(&series, 0).is_empty());
        assert_eq!(downsample(&series, 5).len(), 2);

        let only_last = downsample(&series, 1);
        assert_eq!(only_last.len(), 1);
        assert_eq!(only_last[0].value, 2.0);

        assert!(downsample(&[], 3).is_empty());
    }

    #[test]
    fn recent_keeps_the_tail() {
        let series = points(&[
            ("2024-01-01", 1.0),
            ("2024-02-01", 2.0),
            ("2024-03-01", 3.0),
        ]);
        let months = bucketize(&series, Granularity::Month);
        let tail = recent(&months, 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].label, "Feb");
        assert_eq!(recent(&months, 10).len(), 3);
    }

    #[test]
    fn top_months_orders_by_value() {
        let series = points(&[
            ("2024-01-05", 10.0),
            ("2024-02-05", 40.0),
            ("2024-03-05", 25.0),
            ("2024-03-06", 25.0),
        ]);
        let top = top_months(&series, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].label, "Mar");
        assert_eq!(top[0].value, 50.0);
        assert_eq!(top[1].label, "Feb");
    }

    #[test]
    fn thirty_day_frame_has_six_groups() {
        let rows: Vec<TransactionRow> = (1..=12)
            .map(|d| TransactionRow {
                date: format!("2024-01-{:02}", d),
                revenue: 10.0,
                profit: 4.0,
                expense: 6.0,
                orders: 1.0,
            })
            .collect();
        let entries = aggregate_timeframe(&rows, Timeframe::ThirtyDays, Metric::Expense);
        assert_eq!(entries.len(), 6);
        assert_eq!(entries[0].name, "1-5");
        assert_eq!(entries[0].revenue, 50.0);
        assert_eq!(entries[1].compare, 30.0);
        assert_eq!(entries[2].revenue, 20.0);
        assert_eq!(entries[5].revenue, 0.0);
    }

    #[test]
    fn twelve_month_frame_folds_pairs() {
        let rows = vec![
            TransactionRow {
                date: "2024-01-10".into(),
                revenue: 100.0,
                profit: 20.0,
                expense: 80.0,
                orders: 3.0,
            },
            TransactionRow {
                date: "2023-02-10".into(),
                revenue: 50.0,
                profit: 10.0,
                expense: 40.0,
                orders: 2.0,
            },
            TransactionRow {
                date: "2024-12-01".into(),
                revenue: 7.0,
                profit: 1.0,
                expense: 6.0,
                orders: 1.0,
            },
        ];
        let entries = aggregate_timeframe(&rows, Timeframe::TwelveMonths, Metric::Orders);
        assert_eq!(entries[0].name, "Jan-Feb");
        assert_eq!(entries[0].revenue, 150.0);
        assert_eq!(entries[0].compare, 5.0);
        assert_eq!(entries[5].revenue, 7.0);
    }

    #[test]
    fn timeframe_parsing() {
        assert_eq!("7d".parse::<Timeframe>(), Ok(Timeframe::Week));
        assert_eq!("30D".parse::<Timeframe>(), Ok(Timeframe::ThirtyDays));
        assert_eq!("12M".parse::<Timeframe>(), Ok(Timeframe::TwelveMonths));
        assert!("1H".parse::<Timeframe>().is_err());
    }
}
