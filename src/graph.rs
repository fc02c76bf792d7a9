#![cfg(feature = "web")]
use plotters::coord::Shift;
use plotters::prelude::*;
use std::ops::Range;

use crate::derive::SeriesEntry;
use crate::error::{Error, Result};
use crate::geometry::y_max;

/// Available chart types for a derived series
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GraphType {
    /// One point per bucket, connected
    Line,

    /// One bar per bucket
    Bar,

    /// Line with the area below it filled
    Area,
}

impl std::str::FromStr for GraphType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "line" => Ok(GraphType::Line),
            "bar" => Ok(GraphType::Bar),
            "area" => Ok(GraphType::Area),
            other => Err(Error::Render(format!("unknown chart type: {}", other))),
        }
    }
}

/// Configuration options for chart rendering
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Title displayed at the top of the chart
    pub title: String,

    /// Label for the value axis
    pub y_label: String,

    /// Width of the image in pixels
    pub width: u32,

    /// Height of the image in pixels
    pub height: u32,

    pub graph_type: GraphType,
}

impl Default for GraphOptions {
    /// Line chart, 800x600, generic labels
    fn default() -> Self {
        Self {
            title: "Revenue".to_string(),
            y_label: "Value".to_string(),
            width: 800,
            height: 600,
            graph_type: GraphType::Line,
        }
    }
}

/// Renders a derived series as PNG
///
/// # Arguments
/// * `entries` - Series as produced by `derive_entries`
/// * `options` - Chart type, size and labels
///
/// # Returns
/// * PNG bytes
///
/// # Errors
/// * `Error::Render` for an empty series or a drawing failure
///
/// # Implementation Notes
/// * The bitmap backend writes to a temporary file which is read back and
///   removed when it goes out of scope
pub fn render_png(entries: &[SeriesEntry], options: &GraphOptions) -> Result<Vec<u8>> {
    ensure_not_empty(entries)?;

    let tmp = tempfile::Builder::new()
        .prefix("businalyst-chart")
        .suffix(".png")
        .tempfile()?;
    {
        let root = BitMapBackend::new(tmp.path(), (options.width, options.height))
            .into_drawing_area();
        draw_chart(root, entries, options)?;
    }

    std::fs::read(tmp.path()).map_err(|e| Error::io(tmp.path(), e))
}

/// Renders a derived series as an SVG document
pub fn render_svg(entries: &[SeriesEntry], options: &GraphOptions) -> Result<String> {
    ensure_not_empty(entries)?;

    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, (options.width, options.height))
            .into_drawing_area();
        draw_chart(root, entries, options)?;
    }
    Ok(svg)
}

fn ensure_not_empty(entries: &[SeriesEntry]) -> Result<()> {
    if entries.is_empty() {
        return Err(Error::Render("nothing to draw".to_string()));
    }
    Ok(())
}

fn render_error<E: std::fmt::Display>(e: E) -> Error {
    Error::Render(e.to_string())
}

/// Value axis range: from zero (or the most negative value) up to the same
/// headroom the dashboard charts use
pub fn value_range(entries: &[SeriesEntry]) -> Range<f64> {
    let values: Vec<f64> = entries.iter().map(|e| e.value).collect();
    let min = values.iter().copied().fold(0.0, f64::min);
    min..y_max(&values)
}

/// Draws the chart on any plotters backend
///
/// Buckets sit on a categorical axis: bucket `i` spans `i..i + 1`, labelled
/// with its bucket label.
fn draw_chart<DB: DrawingBackend>(
    root: DrawingArea<DB, Shift>,
    entries: &[SeriesEntry],
    options: &GraphOptions,
) -> Result<()> {
    root.fill(&WHITE).map_err(render_error)?;

    let n = entries.len();
    let labels: Vec<&str> = entries.iter().map(|e| e.label.as_str()).collect();
    let x_formatter = |x: &f64| {
        let i = x.floor();
        if i < 0.0 {
            return String::new();
        }
        labels
            .get(i as usize)
            .map(|l| l.to_string())
            .unwrap_or_default()
    };

    let mut chart = ChartBuilder::on(&root)
        .caption(&options.title, ("sans-serif", 30).into_font())
        .margin(10)
        .x_label_area_size(30)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..n as f64, value_range(entries))
        .map_err(render_error)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(n.min(12))
        .x_label_formatter(&x_formatter)
        .y_desc(&options.y_label)
        .draw()
        .map_err(render_error)?;

    let centers = entries
        .iter()
        .enumerate()
        .map(|(i, e)| (i as f64 + 0.5, e.value));

    match options.graph_type {
        GraphType::Line => {
            chart
                .draw_series(LineSeries::new(centers, &BLUE))
                .map_err(render_error)?;
        }
        GraphType::Area => {
            chart
                .draw_series(AreaSeries::new(centers, 0.0, BLUE.mix(0.2)).border_style(&BLUE))
                .map_err(render_error)?;
        }
        GraphType::Bar => {
            chart
                .draw_series(entries.iter().enumerate().map(|(i, e)| {
                    let x = i as f64;
                    Rectangle::new([(x + 0.15, 0.0), (x + 0.85, e.value)], BLUE.filled())
                }))
                .map_err(render_error)?;
        }
    }

    root.present().map_err(render_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(label: &str, value: f64) -> SeriesEntry {
        SeriesEntry {
            label: label.to_string(),
            value,
            percentage_of_total: None,
            delta_from_previous: None,
            relative_change: None,
        }
    }

    #[test]
    fn empty_series_is_an_error() {
        let options = GraphOptions::default();
        assert!(matches!(render_svg(&[], &options), Err(Error::Render(_))));
        assert!(matches!(render_png(&[], &options), Err(Error::Render(_))));
    }

    #[test]
    fn range_includes_negatives_and_headroom() {
        let range = value_range(&[entry("Jan", -10.0), entry("Feb", 100.0)]);
        assert_eq!(range.start, -10.0);
        assert!((range.end - 105.0).abs() < 1e-9);

        let flat = value_range(&[entry("Jan", 0.0)]);
        assert_eq!(flat, 0.0..1.0);
    }

    #[test]
    fn chart_type_names() {
        assert_eq!("Bar".parse::<GraphType>().unwrap(), GraphType::Bar);
        assert!("pie".parse::<GraphType>().is_err());
    }
}
