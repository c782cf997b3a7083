//! Hydrograph rendered as inline SVG for HTML alert mails.
//!
//! The chart shows history, the current reading and the forecast as one
//! line, red where it is at or above the limit and blue below it, plus the
//! limit itself, the forecast uncertainty band and a marker for "now".

use std::fmt::Write as _;

use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;

use crate::messages::{escape_html, format_float};
use crate::model::{Locale, Reading, StationData};
use crate::threshold::forecast_uncertainty_cm;

const WIDTH: f64 = 960.0;
const HEIGHT: f64 = 380.0;
const MARGIN_LEFT: f64 = 64.0;
const MARGIN_RIGHT: f64 = 24.0;
const MARGIN_TOP: f64 = 28.0;
const MARGIN_BOTTOM: f64 = 56.0;

const BELOW_COLOR: &str = "#1f4e79";
const ABOVE_COLOR: &str = "#b00020";
const NOW_COLOR: &str = "#1976d2";

/// Target number of horizontal grid lines.
const Y_GRID_LINES: f64 = 8.0;
/// Upper bound on labelled time ticks.
const MAX_TIME_TICKS: usize = 16;
/// Longer charts are drawn without time ticks.
const MAX_TICKED_SPAN_HOURS: i64 = 60 * 24;

/// Localized strings drawn into the chart.
#[derive(Debug, Clone)]
pub struct ChartLabels {
    pub now: String,
    pub threshold: String,
    pub time_axis: String,
    pub title: String,
}

/// Maps time and level to SVG coordinates.
struct Frame {
    start: DateTime<Utc>,
    span_seconds: f64,
    min: f64,
    max: f64,
}

impl Frame {
    fn plot_width() -> f64 {
        WIDTH - MARGIN_LEFT - MARGIN_RIGHT
    }

    fn plot_height() -> f64 {
        HEIGHT - MARGIN_TOP - MARGIN_BOTTOM
    }

    fn x(&self, timestamp: DateTime<Utc>) -> f64 {
        let offset = (timestamp - self.start).num_seconds() as f64;
        MARGIN_LEFT + offset / self.span_seconds * Self::plot_width()
    }

    fn y(&self, value: f64) -> f64 {
        MARGIN_TOP + (self.max - value) / (self.max - self.min) * Self::plot_height()
    }

    fn bottom(&self) -> f64 {
        MARGIN_TOP + Self::plot_height()
    }

    fn right(&self) -> f64 {
        MARGIN_LEFT + Self::plot_width()
    }
}

/// Render the hydrograph of `data` against `limit_cm`.
///
/// Returns `None` when there are fewer than two points in time to draw.
pub fn hydrograph_svg(
    data: &StationData,
    reference: DateTime<Utc>,
    limit_cm: f64,
    labels: &ChartLabels,
    zone: Tz,
    locale: Locale,
) -> Option<String> {
    let mut series: Vec<Reading> = data
        .history
        .iter()
        .chain(std::iter::once(&data.current))
        .chain(data.forecast.iter())
        .copied()
        .filter(|point| point.value().is_finite())
        .collect();
    series.sort_by_key(|point| point.timestamp());
    series.dedup_by_key(|point| point.timestamp());

    let start = series.first()?.timestamp();
    let end = series.last()?.timestamp();
    if end <= start {
        return None;
    }

    let band: Vec<(DateTime<Utc>, f64, f64)> = data
        .forecast
        .iter()
        .filter_map(|point| {
            forecast_uncertainty_cm(reference, point.timestamp())
                .map(|delta| (point.timestamp(), point.value() - delta, point.value() + delta))
        })
        .collect();

    let values = series
        .iter()
        .map(|point| point.value())
        .chain(std::iter::once(limit_cm))
        .chain(band.iter().flat_map(|(_, low, high)| [*low, *high]));
    let (mut min, mut max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if max - min < 1.0 {
        min -= 1.0;
        max += 1.0;
    } else {
        let padding = (max - min) * 0.08;
        min -= padding;
        max += padding;
    }

    let frame = Frame {
        start,
        span_seconds: (end - start).num_seconds() as f64,
        min,
        max,
    };

    let mut svg = String::new();
    let _ = write!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{WIDTH}\" height=\"{HEIGHT}\" \
         viewBox=\"0 0 {WIDTH} {HEIGHT}\" role=\"img\" aria-label=\"{}\" \
         style=\"max-width:100%;height:auto;border:1px solid #ddd;background:#fff\" \
         font-family=\"Arial,sans-serif\" font-size=\"11\">",
        escape_html(&labels.title)
    );

    draw_value_grid(&mut svg, &frame, locale);
    draw_time_grid(&mut svg, &frame, end, zone, locale);
    draw_band(&mut svg, &frame, &band);

    let limit_y = frame.y(limit_cm);
    let _ = write!(
        svg,
        "<line x1=\"{:.1}\" y1=\"{limit_y:.1}\" x2=\"{:.1}\" y2=\"{limit_y:.1}\" stroke=\"{ABOVE_COLOR}\" stroke-width=\"1.6\"/>",
        MARGIN_LEFT,
        frame.right()
    );

    for pair in series.windows(2) {
        draw_segment(&mut svg, &frame, &pair[0], &pair[1], limit_cm);
    }

    if start <= reference && reference <= end {
        let x = frame.x(reference);
        let _ = write!(
            svg,
            "<line x1=\"{x:.1}\" y1=\"{MARGIN_TOP:.1}\" x2=\"{x:.1}\" y2=\"{:.1}\" stroke=\"{NOW_COLOR}\" \
             stroke-width=\"1.4\" stroke-dasharray=\"3 3\"/>\
             <text x=\"{:.1}\" y=\"{:.1}\" fill=\"{NOW_COLOR}\">{}</text>",
            frame.bottom(),
            x + 3.0,
            MARGIN_TOP - 4.0,
            escape_html(&labels.now)
        );
    }

    let _ = write!(
        svg,
        "<line x1=\"{MARGIN_LEFT:.1}\" y1=\"{MARGIN_TOP:.1}\" x2=\"{MARGIN_LEFT:.1}\" y2=\"{bottom:.1}\" stroke=\"#bcbcbc\"/>\
         <line x1=\"{MARGIN_LEFT:.1}\" y1=\"{bottom:.1}\" x2=\"{right:.1}\" y2=\"{bottom:.1}\" stroke=\"#bcbcbc\"/>\
         <text x=\"{:.1}\" y=\"{:.1}\" fill=\"{ABOVE_COLOR}\">{}</text>\
         <text x=\"{:.1}\" y=\"{:.1}\" fill=\"#555\" text-anchor=\"middle\">{}</text>",
        MARGIN_LEFT + 6.0,
        MARGIN_TOP + 12.0,
        escape_html(&labels.threshold),
        MARGIN_LEFT + Frame::plot_width() / 2.0,
        HEIGHT - 8.0,
        escape_html(&labels.time_axis),
        bottom = frame.bottom(),
        right = frame.right(),
    );

    svg.push_str("</svg>");
    Some(svg)
}

fn draw_value_grid(svg: &mut String, frame: &Frame, locale: Locale) {
    let step = nice_step((frame.max - frame.min) / Y_GRID_LINES);
    let digits = if step >= 1.0 { 0 } else { 1 };

    let mut value = (frame.min / step).ceil() * step;
    while value <= frame.max {
        let y = frame.y(value);
        let _ = write!(
            svg,
            "<line x1=\"{MARGIN_LEFT:.1}\" y1=\"{y:.1}\" x2=\"{:.1}\" y2=\"{y:.1}\" stroke=\"#e9e9e9\" stroke-width=\"0.9\"/>\
             <text x=\"{:.1}\" y=\"{:.1}\" fill=\"#555\" text-anchor=\"end\">{}</text>",
            frame.right(),
            MARGIN_LEFT - 6.0,
            y + 4.0,
            format_float(value, locale, digits)
        );
        value += step;
    }
}

/// Vertical lines at local midnight and noon, thinned out on long charts.
fn draw_time_grid(svg: &mut String, frame: &Frame, end: DateTime<Utc>, zone: Tz, locale: Locale) {
    if (end - frame.start).num_hours() > MAX_TICKED_SPAN_HOURS {
        return;
    }

    let first_hour = (frame.start.timestamp() + 3599).div_euclid(3600) * 3600;
    let Some(mut at) = DateTime::<Utc>::from_timestamp(first_hour, 0) else {
        return;
    };
    let mut ticks = Vec::new();
    while at <= end {
        let local = at.with_timezone(&zone);
        if local.minute() == 0 && local.hour() % 12 == 0 {
            ticks.push(at);
        }
        at += Duration::hours(1);
    }

    let every = ticks.len().div_ceil(MAX_TIME_TICKS).max(1);
    for tick in ticks.into_iter().step_by(every) {
        let local = tick.with_timezone(&zone);
        let x = frame.x(tick);
        let color = if local.hour() == 0 { "#c6c6c6" } else { "#e6e6e6" };
        let label = match locale {
            Locale::De => local.format("%d.%m %H:%M"),
            Locale::En => local.format("%m/%d %H:%M"),
        };
        let _ = write!(
            svg,
            "<line x1=\"{x:.1}\" y1=\"{MARGIN_TOP:.1}\" x2=\"{x:.1}\" y2=\"{:.1}\" stroke=\"{color}\" stroke-width=\"1\"/>\
             <text x=\"{x:.1}\" y=\"{:.1}\" fill=\"#555\" text-anchor=\"middle\">{label}</text>",
            frame.bottom(),
            frame.bottom() + 16.0,
        );
    }
}

fn draw_band(svg: &mut String, frame: &Frame, band: &[(DateTime<Utc>, f64, f64)]) {
    if band.is_empty() {
        return;
    }

    let upper: Vec<String> = band
        .iter()
        .map(|(ts, _, high)| format!("{:.1},{:.1}", frame.x(*ts), frame.y(*high)))
        .collect();
    let lower: Vec<String> = band
        .iter()
        .map(|(ts, low, _)| format!("{:.1},{:.1}", frame.x(*ts), frame.y(*low)))
        .collect();
    let outline: Vec<&str> = upper
        .iter()
        .chain(lower.iter().rev())
        .map(String::as_str)
        .collect();

    let _ = write!(
        svg,
        "<polygon points=\"{}\" fill=\"#d9d9d9\" fill-opacity=\"0.35\"/>",
        outline.join(" ")
    );
    for edge in [&upper, &lower] {
        let _ = write!(
            svg,
            "<polyline points=\"{}\" fill=\"none\" stroke=\"#b8b8b8\" stroke-width=\"1\" stroke-dasharray=\"3 4\"/>",
            edge.join(" ")
        );
    }
}

/// One line segment, split where it crosses the limit.
fn draw_segment(svg: &mut String, frame: &Frame, first: &Reading, second: &Reading, limit_cm: f64) {
    let above_first = first.value() >= limit_cm;
    let above_second = second.value() >= limit_cm;
    let color = |above: bool| if above { ABOVE_COLOR } else { BELOW_COLOR };

    let (x1, y1) = (frame.x(first.timestamp()), frame.y(first.value()));
    let (x2, y2) = (frame.x(second.timestamp()), frame.y(second.value()));

    if above_first == above_second {
        line(svg, (x1, y1), (x2, y2), color(above_first));
        return;
    }

    let ratio = ((limit_cm - first.value()) / (second.value() - first.value())).clamp(0.0, 1.0);
    let crossing = (x1 + (x2 - x1) * ratio, frame.y(limit_cm));
    line(svg, (x1, y1), crossing, color(above_first));
    line(svg, crossing, (x2, y2), color(above_second));
}

fn line(svg: &mut String, (x1, y1): (f64, f64), (x2, y2): (f64, f64), color: &str) {
    let _ = write!(
        svg,
        "<line x1=\"{x1:.1}\" y1=\"{y1:.1}\" x2=\"{x2:.1}\" y2=\"{y2:.1}\" stroke=\"{color}\" stroke-width=\"1.6\" stroke-linecap=\"round\"/>"
    );
}

/// Round `raw` up to 1, 2 or 5 times a power of ten.
fn nice_step(raw: f64) -> f64 {
    if !(raw.is_finite() && raw > 0.0) {
        return 1.0;
    }
    let magnitude = 10f64.powf(raw.log10().floor());
    let fraction = raw / magnitude;
    let nice = if fraction <= 1.0 {
        1.0
    } else if fraction <= 2.0 {
        2.0
    } else if fraction <= 5.0 {
        5.0
    } else {
        10.0
    };
    nice * magnitude
}
