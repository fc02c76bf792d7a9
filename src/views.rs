//! Ready-to-draw dashboard widgets: breakdown donuts, KPI gauges and the
//! laid-out line and bar charts.
//!
//! Each view pairs the data from [`crate::derive`] with the coordinates from
//! [`crate::geometry`], so a front end only has to paint what it receives.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::derive::{MetricCard, Segment, SeriesEntry, normalize_shares, segments};
use crate::error::Error;
use crate::geometry::{
    self, Arc, Frame, GAUGE_SEGMENTS, Point, Rect, area_path, bar_rects, donut_arcs, gauge_fill,
    line_points, smooth_path, x_label_indices, y_ticks,
};
use crate::kpi::{KpiSnapshot, NamedValue};

/// Donut geometry used for every breakdown view
const DONUT_CENTER: Point = Point { x: 100.0, y: 100.0 };
const DONUT_OUTER: f64 = 72.0;
const DONUT_INNER: f64 = 40.0;

/// Pixels between two bars
const BAR_GAP: f64 = 8.0;

/// Which categorical split of the snapshot to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Breakdown {
    /// `pie_data`, revenue by the backend's chosen pie column
    Pie,
    /// `bar_data`
    Bar,
    /// `map_data`, revenue per location
    Map,
    /// `orders_by_status`
    Status,
    /// `orders_by_channel`
    Channel,
    /// `orders_by_region`
    Region,
    /// `profit_breakdown`, shares rescaled to add up to 100
    Profit,
    /// `revenue_by_column[name]`
    Column(String),
}

impl FromStr for Breakdown {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pie" => Ok(Breakdown::Pie),
            "bar" => Ok(Breakdown::Bar),
            "map" | "location" => Ok(Breakdown::Map),
            "status" => Ok(Breakdown::Status),
            "channel" => Ok(Breakdown::Channel),
            "region" => Ok(Breakdown::Region),
            "profit" => Ok(Breakdown::Profit),
            other => Err(Error::InvalidForm(format!("unknown breakdown: {}", other))),
        }
    }
}

impl fmt::Display for Breakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breakdown::Pie => write!(f, "pie"),
            Breakdown::Bar => write!(f, "bar"),
            Breakdown::Map => write!(f, "map"),
            Breakdown::Status => write!(f, "status"),
            Breakdown::Channel => write!(f, "channel"),
            Breakdown::Region => write!(f, "region"),
            Breakdown::Profit => write!(f, "profit"),
            Breakdown::Column(name) => write!(f, "column {}", name),
        }
    }
}

fn named(items: &[NamedValue]) -> Vec<Segment> {
    segments(items.iter().map(|item| (item.name.as_str(), item.value)))
}

/// Segments of one breakdown, percentages of the total.
///
/// A column the backend did not split falls back to `map_data` for `region`
/// and to `pie_data` for anything else.
pub fn breakdown_segments(snapshot: &KpiSnapshot, breakdown: &Breakdown) -> Vec<Segment> {
    match breakdown {
        Breakdown::Pie => named(&snapshot.pie_data),
        Breakdown::Bar => named(&snapshot.bar_data),
        Breakdown::Map => segments(
            snapshot
                .map_data
                .iter()
                .map(|p| (p.name.as_str(), p.value)),
        ),
        Breakdown::Status => named(&snapshot.orders_by_status),
        Breakdown::Channel => segments(
            snapshot
                .orders_by_channel
                .iter()
                .map(|c| (c.name.as_str(), c.orders)),
        ),
        Breakdown::Region => segments(
            snapshot
                .orders_by_region
                .iter()
                .map(|r| (r.name.as_str(), r.orders)),
        ),
        Breakdown::Profit => {
            let mut shares: Vec<Segment> = snapshot
                .profit_breakdown
                .iter()
                .enumerate()
                .map(|(i, share)| Segment {
                    name: if share.name.is_empty() {
                        format!("Item {}", i + 1)
                    } else {
                        share.name.clone()
                    },
                    value: share.percentage,
                    percentage: share.percentage,
                })
                .collect();
            normalize_shares(&mut shares);
            shares
        }
        Breakdown::Column(column) => match snapshot.revenue_by_column.get(column) {
            Some(items) if !items.is_empty() => named(items),
            _ if column.eq_ignore_ascii_case("region") => {
                breakdown_segments(snapshot, &Breakdown::Map)
            }
            _ => named(&snapshot.pie_data),
        },
    }
}

/// A breakdown with its donut sectors, one arc per non-zero segment
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakdownView {
    pub title: String,
    pub segments: Vec<Segment>,
    pub arcs: Vec<Arc>,
}

impl BreakdownView {
    pub fn new(snapshot: &KpiSnapshot, breakdown: &Breakdown) -> Self {
        let segments = breakdown_segments(snapshot, breakdown);
        let values: Vec<f64> = segments.iter().map(|s| s.value).collect();
        Self {
            title: title(snapshot, breakdown),
            arcs: donut_arcs(&values, DONUT_CENTER, DONUT_OUTER, DONUT_INNER),
            segments,
        }
    }
}

fn title(snapshot: &KpiSnapshot, breakdown: &Breakdown) -> String {
    let column = |c: &Option<String>, fallback: &str| {
        format!("Revenue by {}", c.as_deref().unwrap_or(fallback))
    };
    match breakdown {
        Breakdown::Pie => column(&snapshot.pie_column, "category"),
        Breakdown::Bar => column(&snapshot.bar_column, "category"),
        Breakdown::Map => column(&snapshot.map_column, "location"),
        Breakdown::Status => "Orders by status".to_string(),
        Breakdown::Channel => "Orders by channel".to_string(),
        Breakdown::Region => "Orders by region".to_string(),
        Breakdown::Profit => "Profit breakdown".to_string(),
        Breakdown::Column(name) => format!("Revenue by {}", name),
    }
}

/// Segmented progress gauge of one KPI card
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Gauge {
    pub title: &'static str,
    pub value: Option<f64>,
    pub target: f64,
    /// Percent of target, 0 to 100
    pub progress: f64,
    pub filled: usize,
    pub segments: usize,
}

impl From<&MetricCard> for Gauge {
    fn from(card: &MetricCard) -> Self {
        Self {
            title: card.title,
            value: card.value,
            target: card.target,
            progress: card.progress,
            filled: gauge_fill(card.progress, GAUGE_SEGMENTS),
            segments: GAUGE_SEGMENTS,
        }
    }
}

pub fn gauges(cards: &[MetricCard]) -> Vec<Gauge> {
    cards.iter().map(Gauge::from).collect()
}

/// An x-axis label and where it goes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AxisLabel {
    pub x: f64,
    pub text: String,
}

/// Smooth line (and its filled area) through the entries
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineLayout {
    pub frame: Frame,
    pub points: Vec<Point>,
    pub path: String,
    pub area: String,
    pub x_labels: Vec<AxisLabel>,
    pub y_ticks: Vec<f64>,
}

impl LineLayout {
    /// Padding scales with the frame, like the responsive dashboard chart
    pub fn new(entries: &[SeriesEntry], width: f64, height: f64) -> Self {
        let frame = Frame::proportional(width, height);
        let values: Vec<f64> = entries.iter().map(|e| e.value).collect();
        let points = line_points(&values, &frame);
        let x_labels = x_label_indices(entries.len())
            .into_iter()
            .map(|i| AxisLabel {
                x: points[i].x,
                text: entries[i].label.clone(),
            })
            .collect();

        Self {
            path: smooth_path(&points),
            area: area_path(&points, &frame),
            y_ticks: y_ticks(geometry::y_max(&values)),
            frame,
            points,
            x_labels,
        }
    }
}

/// One bar per entry, every bar labelled
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BarLayout {
    pub frame: Frame,
    pub bars: Vec<Rect>,
    pub labels: Vec<AxisLabel>,
    pub y_ticks: Vec<f64>,
}

impl BarLayout {
    pub fn new(entries: &[SeriesEntry], width: f64, height: f64) -> Self {
        let frame = Frame::new(width, height);
        let values: Vec<f64> = entries.iter().map(|e| e.value).collect();
        let bars = bar_rects(&values, &frame, BAR_GAP);
        let labels = bars
            .iter()
            .zip(entries)
            .map(|(bar, entry)| AxisLabel {
                x: bar.x + bar.width / 2.0,
                text: entry.label.clone(),
            })
            .collect();
        let top = values.iter().copied().fold(0.0, f64::max);

        Self {
            frame,
            bars,
            labels,
            y_ticks: y_ticks(top),
        }
    }
}

/// A laid-out series chart, tagged with its kind
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChartLayout {
    Line(LineLayout),
    Area(LineLayout),
    Bar(BarLayout),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kpi::{BreakdownShare, MapPoint, NamedOrders};
    use std::collections::BTreeMap;

    fn value(name: &str, value: f64) -> NamedValue {
        NamedValue {
            name: name.to_string(),
            value,
            color: None,
        }
    }

    fn snapshot() -> KpiSnapshot {
        KpiSnapshot {
            pie_column: Some("Category".into()),
            pie_data: vec![value("Office", 30.0), value("Tech", 10.0)],
            map_data: vec![MapPoint {
                name: "Austin".into(),
                value: 50.0,
                coordinates: [-97.7, 30.3],
            }],
            orders_by_channel: vec![
                NamedOrders {
                    name: "Online".into(),
                    orders: 3.0,
                    fill: None,
                },
                NamedOrders {
                    name: "Store".into(),
                    orders: 1.0,
                    fill: None,
                },
            ],
            profit_breakdown: vec![
                BreakdownShare {
                    name: "Cost".into(),
                    percentage: 30.0,
                    color: None,
                },
                BreakdownShare {
                    name: String::new(),
                    percentage: 30.0,
                    color: None,
                },
            ],
            revenue_by_column: BTreeMap::from([(
                "segment".to_string(),
                vec![value("Consumer", 1.0), value("Corporate", 3.0)],
            )]),
            ..Default::default()
        }
    }

    fn entries(values: &[f64]) -> Vec<SeriesEntry> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| SeriesEntry {
                label: format!("2024-{:02}", i + 1),
                value: *v,
                percentage_of_total: None,
                delta_from_previous: None,
                relative_change: None,
            })
            .collect()
    }

    #[test]
    fn breakdown_names() {
        assert_eq!("Channel".parse::<Breakdown>().unwrap(), Breakdown::Channel);
        assert_eq!("location".parse::<Breakdown>().unwrap(), Breakdown::Map);
        assert!(matches!(
            "weather".parse::<Breakdown>(),
            Err(Error::InvalidForm(_))
        ));
    }

    #[test]
    fn channel_shares() {
        let segments = breakdown_segments(&snapshot(), &Breakdown::Channel);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].name, "Online");
        assert_eq!(segments[0].percentage, 75.0);
        assert_eq!(segments[1].percentage, 25.0);
    }

    #[test]
    fn profit_shares_are_normalised_and_named() {
        let segments = breakdown_segments(&snapshot(), &Breakdown::Profit);
        assert_eq!(segments[0].percentage, 50.0);
        assert_eq!(segments[1].name, "Item 2");
        assert_eq!(segments[1].percentage, 50.0);
    }

    #[test]
    fn column_falls_back() {
        let snapshot = snapshot();

        let split = breakdown_segments(&snapshot, &Breakdown::Column("segment".into()));
        assert_eq!(split[1].name, "Corporate");
        assert_eq!(split[1].percentage, 75.0);

        let region = breakdown_segments(&snapshot, &Breakdown::Column("region".into()));
        assert_eq!(region.len(), 1);
        assert_eq!(region[0].name, "Austin");

        let other = breakdown_segments(&snapshot, &Breakdown::Column("ship_mode".into()));
        assert_eq!(other[0].name, "Office");
    }

    #[test]
    fn view_has_one_arc_per_segment() {
        let view = BreakdownView::new(&snapshot(), &Breakdown::Pie);
        assert_eq!(view.title, "Revenue by Category");
        assert_eq!(view.arcs.len(), 2);
        assert_eq!(view.arcs[0].percentage, 75.0);

        let empty = BreakdownView::new(&KpiSnapshot::default(), &Breakdown::Status);
        assert!(empty.segments.is_empty());
        assert!(empty.arcs.is_empty());
    }

    #[test]
    fn gauge_fill_follows_progress() {
        let card = MetricCard {
            title: "Revenue",
            value: Some(50.0),
            target: 100.0,
            progress: 50.0,
            caption: "",
        };
        let gauge = Gauge::from(&card);
        assert_eq!(gauge.filled, 18);
        assert_eq!(gauge.segments, GAUGE_SEGMENTS);
    }

    #[test]
    fn line_layout_labels_ends() {
        let layout = LineLayout::new(&entries(&[1.0, 4.0, 2.0, 8.0, 5.0, 3.0]), 600.0, 300.0);
        assert_eq!(layout.points.len(), 6);
        assert!(layout.path.starts_with("M "));
        assert!(layout.area.ends_with('Z'));
        assert_eq!(layout.x_labels.first().unwrap().text, "2024-01");
        assert_eq!(layout.x_labels.last().unwrap().text, "2024-06");
        assert_eq!(layout.y_ticks.len(), 5);
        assert_eq!(layout.frame.padding.left, 42.0);
    }

    #[test]
    fn bar_layout_centres_labels() {
        let layout = BarLayout::new(&entries(&[2.0, 4.0]), 400.0, 200.0);
        assert_eq!(layout.bars.len(), 2);
        assert_eq!(layout.labels.len(), 2);
        let bar = layout.bars[1];
        assert_eq!(layout.labels[1].x, bar.x + bar.width / 2.0);
        assert_eq!(layout.y_ticks, vec![0.0, 1.0, 2.0, 3.0, 4.0]);

        let empty = LineLayout::new(&[], 400.0, 200.0);
        assert!(empty.points.is_empty());
        assert!(empty.path.is_empty());
        assert!(empty.x_labels.is_empty());
    }
}
