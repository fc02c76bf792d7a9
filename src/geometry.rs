//! Layout math for the dashboard charts.
//!
//! Only coordinates and SVG path strings are produced here; colours, fonts and
//! everything else visual belong to whoever draws them.

use serde::Serialize;
use std::f64::consts::PI;
use std::fmt::Write;

use crate::aggregate::finite_or_zero;

/// Segments in the health gauge
pub const GAUGE_SEGMENTS: usize = 36;

/// Space around the plot area
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Padding {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Default for Padding {
    fn default() -> Self {
        Self {
            top: 16.0,
            right: 24.0,
            bottom: 44.0,
            left: 52.0,
        }
    }
}

/// Drawing surface of one chart
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Frame {
    pub width: f64,
    pub height: f64,
    pub padding: Padding,
}

/// Inner rectangle where data is plotted
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlotArea {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl PlotArea {
    pub fn bottom(&self) -> f64 {
        self.top + self.height
    }
}

impl Frame {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            padding: Padding::default(),
        }
    }

    /// Padding proportional to the frame, as used by the responsive line chart
    pub fn proportional(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            padding: Padding {
                top: (0.06 * height).round(),
                right: (0.02 * width).round(),
                bottom: (0.18 * height).round(),
                left: (0.07 * width).round(),
            },
        }
    }

    pub fn plot_area(&self) -> PlotArea {
        PlotArea {
            left: self.padding.left,
            top: self.padding.top,
            width: (self.width - self.padding.left - self.padding.right).max(0.0),
            height: (self.height - self.padding.top - self.padding.bottom).max(0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Top of the value axis: the larger of the maximum and the mean, plus 5%.
/// Never zero.
pub fn y_max(values: &[f64]) -> f64 {
    let clean: Vec<f64> = values.iter().copied().map(finite_or_zero).collect();
    let max = clean.iter().copied().fold(0.0, f64::max);
    let mean = if clean.is_empty() {
        0.0
    } else {
        clean.iter().sum::<f64>() / clean.len() as f64
    };
    let top = max.max(mean) * 1.05;
    if top == 0.0 { 1.0 } else { top }
}

/// Places values evenly across the plot area, scaled against [`y_max`]
pub fn line_points(values: &[f64], frame: &Frame) -> Vec<Point> {
    let area = frame.plot_area();
    let top = y_max(values);
    let n = values.len();

    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let x = if n <= 1 {
                area.left
            } else {
                area.left + (i as f64 / (n - 1) as f64) * area.width
            };
            let y = area.top + area.height - (finite_or_zero(*v) / top) * area.height;
            Point { x, y }
        })
        .collect()
}

/// Cubic Bézier through the points, control points at the horizontal midpoint.
/// Empty for fewer than two points.
pub fn smooth_path(points: &[Point]) -> String {
    if points.len() < 2 {
        return String::new();
    }

    let mut d = format!("M {} {}", points[0].x, points[0].y);
    for pair in points.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        let cpx = (a.x + b.x) / 2.0;
        let _ = write!(d, " C {} {} {} {} {} {}", cpx, a.y, cpx, b.y, b.x, b.y);
    }
    d
}

/// The smooth line closed down to the baseline
pub fn area_path(points: &[Point], frame: &Frame) -> String {
    let line = smooth_path(points);
    match (points.first(), points.last()) {
        (Some(first), Some(last)) if !line.is_empty() => {
            let baseline = frame.plot_area().bottom();
            format!(
                "{} L {} {} L {} {} Z",
                line, last.x, baseline, first.x, baseline
            )
        }
        _ => String::new(),
    }
}

/// Indices that get an x-axis label: first, last and three evenly spaced in
/// between, without duplicates.
///
/// # Examples
/// ```
/// use businalyst::geometry::x_label_indices;
///
/// assert_eq!(x_label_indices(9), vec![0, 2, 4, 6, 8]);
/// assert_eq!(x_label_indices(3), vec![0, 1, 2]);
/// assert_eq!(x_label_indices(2), vec![0, 1]);
/// ```
pub fn x_label_indices(n: usize) -> Vec<usize> {
    if n <= 2 {
        return (0..n).collect();
    }
    let step = (n - 1) as f64 / 4.0;
    let mut indices = vec![
        0,
        step.round() as usize,
        (step * 2.0).round() as usize,
        (step * 3.0).round() as usize,
        n - 1,
    ];
    indices.dedup();
    indices
}

/// Five evenly spaced, rounded ticks from zero to `y_max`
pub fn y_ticks(y_max: f64) -> Vec<f64> {
    if y_max <= 0.0 || !y_max.is_finite() {
        return vec![0.0];
    }
    let step = y_max / 4.0;
    (0..5).map(|i| (step * i as f64).round()).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One bar per value, `gap` pixels between bars. Negative values are drawn as
/// empty bars.
pub fn bar_rects(values: &[f64], frame: &Frame, gap: f64) -> Vec<Rect> {
    if values.is_empty() {
        return Vec::new();
    }
    let area = frame.plot_area();
    let clamped: Vec<f64> = values.iter().map(|v| finite_or_zero(*v).max(0.0)).collect();
    let top = clamped.iter().copied().fold(0.0, f64::max);
    let top = if top == 0.0 { 1.0 } else { top };

    let n = clamped.len() as f64;
    let slot = area.width / n;
    let width = (slot - gap).max(0.0);

    clamped
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let height = v / top * area.height;
            Rect {
                x: area.left + i as f64 * slot + (slot - width) / 2.0,
                y: area.bottom() - height,
                width,
                height,
            }
        })
        .collect()
}

/// One sector of a donut chart. Angles are in radians, clockwise from 12
/// o'clock.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Arc {
    pub start_angle: f64,
    pub end_angle: f64,
    pub percentage: f64,
    pub path: String,
}

fn polar(center: Point, radius: f64, angle: f64) -> Point {
    Point {
        x: center.x + radius * angle.sin(),
        y: center.y - radius * angle.cos(),
    }
}

/// Splits a ring into sectors proportional to the values.
///
/// Negative values count as zero. When everything is zero there is nothing
/// to draw and the result is empty.
pub fn donut_arcs(values: &[f64], center: Point, outer: f64, inner: f64) -> Vec<Arc> {
    let clamped: Vec<f64> = values.iter().map(|v| finite_or_zero(*v).max(0.0)).collect();
    let total: f64 = clamped.iter().sum();
    if total == 0.0 {
        return Vec::new();
    }

    let mut start = 0.0;
    clamped
        .iter()
        .map(|v| {
            let sweep = v / total * 2.0 * PI;
            let end = start + sweep;
            // a full circle cannot be drawn as a single SVG arc
            let drawn_end = if sweep >= 2.0 * PI { end - 1e-6 } else { end };
            let large = if sweep > PI { 1 } else { 0 };

            let o1 = polar(center, outer, start);
            let o2 = polar(center, outer, drawn_end);
            let i1 = polar(center, inner, drawn_end);
            let i2 = polar(center, inner, start);
            let path = format!(
                "M {} {} A {} {} 0 {} 1 {} {} L {} {} A {} {} 0 {} 0 {} {} Z",
                o1.x, o1.y, outer, outer, large, o2.x, o2.y, i1.x, i1.y, inner, inner, large,
                i2.x, i2.y
            );

            let arc = Arc {
                start_angle: start,
                end_angle: end,
                percentage: v / total * 100.0,
                path,
            };
            start = end;
            arc
        })
        .collect()
}

/// Filled segments of a gauge showing `value` percent, clamped to the gauge
pub fn gauge_fill(value: f64, total_segments: usize) -> usize {
    let value = finite_or_zero(value).clamp(0.0, 100.0);
    ((value / 100.0) * total_segments as f64).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn y_max_uses_mean_or_one() {
        assert_eq!(y_max(&[]), 1.0);
        assert_eq!(y_max(&[0.0, 0.0]), 1.0);
        assert!((y_max(&[10.0, 20.0]) - 21.0).abs() < 1e-9);
        // all negative: the mean is below zero, max is clamped at zero
        assert_eq!(y_max(&[-5.0]), 1.0);
    }

    #[test]
    fn line_points_span_the_plot_area() {
        let frame = Frame::new(200.0, 100.0);
        let area = frame.plot_area();
        let points = line_points(&[0.0, 10.0], &frame);
        assert_eq!(points[0].x, area.left);
        assert_eq!(points[0].y, area.bottom());
        assert_eq!(points[1].x, area.left + area.width);
        assert!(points[1].y > area.top);

        let single = line_points(&[5.0], &frame);
        assert_eq!(single[0].x, area.left);
    }

    #[test]
    fn paths() {
        assert_eq!(smooth_path(&[Point { x: 0.0, y: 0.0 }]), "");
        let pts = [Point { x: 0.0, y: 10.0 }, Point { x: 10.0, y: 0.0 }];
        assert_eq!(smooth_path(&pts), "M 0 10 C 5 10 5 0 10 0");

        let frame = Frame::new(100.0, 100.0);
        let area = area_path(&pts, &frame);
        assert!(area.ends_with(" Z"));
        assert!(area.contains(&format!("L 10 {}", frame.plot_area().bottom())));
    }

    #[test]
    fn ticks() {
        assert_eq!(y_ticks(100.0), vec![0.0, 25.0, 50.0, 75.0, 100.0]);
        assert_eq!(y_ticks(0.0), vec![0.0]);
    }

    #[test]
    fn bars_clamp_negatives() {
        let frame = Frame::new(124.0, 100.0);
        let rects = bar_rects(&[10.0, -3.0, 5.0], &frame, 4.0);
        assert_eq!(rects.len(), 3);
        assert_eq!(rects[1].height, 0.0);
        assert_eq!(rects[0].height, frame.plot_area().height);
        assert_eq!(rects[2].height, frame.plot_area().height / 2.0);
        assert!(rects[0].x < rects[1].x);
    }

    #[test]
    fn donut_sweeps_full_circle() {
        let center = Point { x: 50.0, y: 50.0 };
        let arcs = donut_arcs(&[1.0, 1.0, 2.0], center, 40.0, 25.0);
        assert_eq!(arcs.len(), 3);
        assert_eq!(arcs[0].start_angle, 0.0);
        assert!((arcs[2].end_angle - 2.0 * PI).abs() < 1e-9);
        assert_eq!(arcs[2].percentage, 50.0);
        assert!(donut_arcs(&[0.0, 0.0], center, 40.0, 25.0).is_empty());
    }

    #[test]
    fn gauge() {
        assert_eq!(gauge_fill(68.0, GAUGE_SEGMENTS), 24);
        assert_eq!(gauge_fill(150.0, GAUGE_SEGMENTS), 36);
        assert_eq!(gauge_fill(-1.0, GAUGE_SEGMENTS), 0);
        assert_eq!(gauge_fill(f64::NAN, GAUGE_SEGMENTS), 0);
    }
}
