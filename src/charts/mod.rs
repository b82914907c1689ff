// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! SVG chart rendering
//!
//! Charts are plain SVG documents built with `format!`, so they can be
//! written to disk, served as static artifacts or inlined as data URIs.

use chrono::NaiveDateTime;
use std::fmt::Write;

use crate::dataset::stats::fmt_num;

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 500.0;
const FONT: &str = "-apple-system, 'Segoe UI', Roboto, sans-serif";
const LINE_COLOR: &str = "#1f77b4";
const BAR_COLOR: &str = "#4c72b0";
const BAND_COLOR: &str = "#9ecae1";

/// One point of a forecast with its uncertainty interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandPoint {
    pub x: NaiveDateTime,
    pub mid: f64,
    pub lower: f64,
    pub upper: f64,
}

/// Histogram bin with half-open range (the last bin is closed)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// File-name fragment for a chart title
pub fn slug(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Escape text for SVG content and attributes
pub fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Sturges' rule
pub fn sturges_bins(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    (n as f64).log2().ceil() as usize + 1
}

/// Bin values with Sturges' rule over their range
pub fn histogram_bins(values: &[f64]) -> Vec<Bin> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return Vec::new();
    }
    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if min == max {
        return vec![Bin { lower: min - 0.5, upper: max + 0.5, count: finite.len() }];
    }

    let k = sturges_bins(finite.len());
    let width = (max - min) / k as f64;
    let mut bins: Vec<Bin> = (0..k)
        .map(|i| Bin {
            lower: min + width * i as f64,
            upper: if i + 1 == k { max } else { min + width * (i + 1) as f64 },
            count: 0,
        })
        .collect();

    for v in finite {
        let idx = (((v - min) / width).floor() as usize).min(k - 1);
        bins[idx].count += 1;
    }
    bins
}

/// Diverging blue-white-red scale for r in [-1, 1]
pub fn coolwarm(r: f64) -> String {
    const COOL: (f64, f64, f64) = (59.0, 76.0, 192.0);
    const MID: (f64, f64, f64) = (221.0, 221.0, 221.0);
    const WARM: (f64, f64, f64) = (180.0, 4.0, 38.0);

    let r = r.clamp(-1.0, 1.0);
    let (from, to, t) = if r < 0.0 { (MID, COOL, -r) } else { (MID, WARM, r) };
    let mix = |a: f64, b: f64| (a + (b - a) * t).round() as u8;
    format!("#{:02x}{:02x}{:02x}", mix(from.0, to.0), mix(from.1, to.1), mix(from.2, to.2))
}

/// Round-number axis ticks covering `[min, max]`
pub fn nice_ticks(min: f64, max: f64, target: usize) -> Vec<f64> {
    if !min.is_finite() || !max.is_finite() || target == 0 {
        return Vec::new();
    }
    if min == max {
        return vec![min];
    }
    let raw = (max - min) / target as f64;
    let magnitude = 10f64.powf(raw.log10().floor());
    let step = [1.0, 2.0, 2.5, 5.0, 10.0]
        .iter()
        .map(|m| m * magnitude)
        .find(|s| *s >= raw)
        .unwrap_or(10.0 * magnitude);

    let start = (min / step).ceil() * step;
    // at large magnitudes `step` can fall below the float spacing
    let count = (((max - start) / step + 1e-9).floor().max(0.0) as usize + 1).min(target * 4);
    let mut ticks: Vec<f64> = Vec::with_capacity(count);
    for i in 0..count {
        let t = start + i as f64 * step;
        if ticks.last().is_some_and(|last| *last == t) {
            break;
        }
        ticks.push(if t.abs() < step * 1e-9 { 0.0 } else { t });
    }
    ticks
}

/// Fractional days since the Unix epoch
fn days(dt: &NaiveDateTime) -> f64 {
    dt.and_utc().timestamp() as f64 / 86_400.0
}

fn date_label(x: f64) -> String {
    chrono::DateTime::from_timestamp((x * 86_400.0).round() as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_default()
}

/// Plot area with linear x/y mapping
struct Canvas {
    body: String,
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
    x_range: (f64, f64),
    y_range: (f64, f64),
}

impl Canvas {
    fn new(title: &str, x_range: (f64, f64), y_range: (f64, f64)) -> Self {
        let mut canvas = Self {
            body: String::new(),
            left: 80.0,
            right: WIDTH - 30.0,
            top: 50.0,
            bottom: HEIGHT - 60.0,
            x_range: widen(x_range),
            y_range: widen(y_range),
        };
        canvas.title(title);
        canvas
    }

    fn with_area(mut self, left: f64, right: f64, top: f64, bottom: f64) -> Self {
        self.left = left;
        self.right = right;
        self.top = top;
        self.bottom = bottom;
        self
    }

    fn sx(&self, x: f64) -> f64 {
        let (lo, hi) = self.x_range;
        self.left + (x - lo) / (hi - lo) * (self.right - self.left)
    }

    fn sy(&self, y: f64) -> f64 {
        let (lo, hi) = self.y_range;
        self.bottom - (y - lo) / (hi - lo) * (self.bottom - self.top)
    }

    fn title(&mut self, title: &str) {
        let _ = write!(
            self.body,
            r#"<text x="{:.1}" y="28" text-anchor="middle" font-size="18" font-weight="bold">{}</text>"#,
            WIDTH / 2.0,
            escape(title)
        );
    }

    fn frame(&mut self) {
        let _ = write!(
            self.body,
            r##"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="#eaeaf2"/>"##,
            self.left,
            self.top,
            self.right - self.left,
            self.bottom - self.top
        );
    }

    fn y_axis(&mut self, label: &str) {
        for t in nice_ticks(self.y_range.0, self.y_range.1, 5) {
            let y = self.sy(t);
            let _ = write!(
                self.body,
                r##"<line x1="{:.1}" y1="{y:.1}" x2="{:.1}" y2="{y:.1}" stroke="#ffffff"/><text x="{:.1}" y="{:.1}" text-anchor="end" font-size="11">{}</text>"##,
                self.left,
                self.right,
                self.left - 6.0,
                y + 4.0,
                fmt_num(t)
            );
        }
        let _ = write!(
            self.body,
            r#"<text transform="translate(18,{:.1}) rotate(-90)" text-anchor="middle" font-size="13">{}</text>"#,
            (self.top + self.bottom) / 2.0,
            escape(label)
        );
    }

    fn x_axis(&mut self, label: &str, dates: bool) {
        for t in nice_ticks(self.x_range.0, self.x_range.1, 6) {
            let x = self.sx(t);
            let text = if dates { date_label(t) } else { fmt_num(t) };
            let _ = write!(
                self.body,
                r##"<line x1="{x:.1}" y1="{:.1}" x2="{x:.1}" y2="{:.1}" stroke="#ffffff"/><text x="{x:.1}" y="{:.1}" text-anchor="middle" font-size="11">{}</text>"##,
                self.top,
                self.bottom,
                self.bottom + 16.0,
                text
            );
        }
        let _ = write!(
            self.body,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="13">{}</text>"#,
            (self.left + self.right) / 2.0,
            self.bottom + 40.0,
            escape(label)
        );
    }

    fn polyline(&mut self, points: &[(f64, f64)], color: &str) {
        if points.is_empty() {
            return;
        }
        let coords: Vec<String> = points
            .iter()
            .map(|(x, y)| format!("{:.1},{:.1}", self.sx(*x), self.sy(*y)))
            .collect();
        let _ = write!(
            self.body,
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
            coords.join(" "),
            color
        );
    }

    fn finish(self) -> String {
        document(&self.body)
    }
}

fn widen((lo, hi): (f64, f64)) -> (f64, f64) {
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if lo == hi {
        return (lo - 1.0, hi + 1.0);
    }
    (lo, hi)
}

fn document(body: &str) -> String {
    format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="{font}"><rect width="100%" height="100%" fill="white"/>{body}</svg>"#,
        w = WIDTH,
        h = HEIGHT,
        font = FONT,
        body = body
    )
}

fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)))
}

/// Annotated correlation heatmap
pub fn heatmap(title: &str, labels: &[String], matrix: &[Vec<Option<f64>>]) -> String {
    let n = labels.len().max(1);
    let left = 160.0;
    let top = 50.0;
    let size = ((WIDTH - left - 30.0).min(HEIGHT - top - 110.0)) / n as f64;

    let mut body = String::new();
    let _ = write!(
        body,
        r#"<text x="{:.1}" y="28" text-anchor="middle" font-size="18" font-weight="bold">{}</text>"#,
        WIDTH / 2.0,
        escape(title)
    );

    for (i, row) in matrix.iter().enumerate() {
        for (j, cell) in row.iter().enumerate() {
            let x = left + j as f64 * size;
            let y = top + i as f64 * size;
            let (fill, text) = match cell {
                Some(r) => (coolwarm(*r), format!("{:.2}", r)),
                None => ("#ffffff".to_string(), "nan".to_string()),
            };
            let ink = match cell {
                Some(r) if r.abs() > 0.6 => "#ffffff",
                _ => "#222222",
            };
            let _ = write!(
                body,
                r#"<rect x="{x:.1}" y="{y:.1}" width="{s:.1}" height="{s:.1}" fill="{fill}" stroke="white"/><text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="12" fill="{ink}">{text}</text>"#,
                x + size / 2.0,
                y + size / 2.0 + 4.0,
                s = size,
            );
        }
    }

    for (i, label) in labels.iter().enumerate() {
        let y = top + i as f64 * size + size / 2.0 + 4.0;
        let x = left + i as f64 * size + size / 2.0;
        let _ = write!(
            body,
            r#"<text x="{:.1}" y="{y:.1}" text-anchor="end" font-size="12">{l}</text><text transform="translate({x:.1},{:.1}) rotate(-40)" text-anchor="end" font-size="12">{l}</text>"#,
            left - 6.0,
            top + n as f64 * size + 14.0,
            l = escape(label),
        );
    }

    document(&body)
}

/// Histogram with Sturges bins
pub fn histogram(title: &str, values: &[f64], x_label: &str) -> String {
    let bins = histogram_bins(values);
    let x_range = match (bins.first(), bins.last()) {
        (Some(f), Some(l)) => (f.lower, l.upper),
        _ => (0.0, 1.0),
    };
    let max_count = bins.iter().map(|b| b.count).max().unwrap_or(0) as f64;

    let mut canvas = Canvas::new(title, x_range, (0.0, max_count.max(1.0) * 1.05));
    canvas.frame();
    canvas.y_axis("Count");
    canvas.x_axis(x_label, false);

    for bin in &bins {
        let x0 = canvas.sx(bin.lower);
        let x1 = canvas.sx(bin.upper);
        let y = canvas.sy(bin.count as f64);
        let _ = write!(
            canvas.body,
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}" stroke="white"/>"#,
            x0,
            y,
            (x1 - x0).max(0.5),
            canvas.bottom - y,
            BAR_COLOR
        );
    }
    canvas.finish()
}

/// Horizontal count bars, most frequent on top
pub fn bar_chart(title: &str, counts: &[(String, usize)], axis_label: &str) -> String {
    let max_count = counts.iter().map(|(_, c)| *c).max().unwrap_or(0) as f64;
    let mut canvas = Canvas::new(title, (0.0, max_count.max(1.0) * 1.05), (0.0, counts.len().max(1) as f64))
        .with_area(170.0, WIDTH - 30.0, 50.0, HEIGHT - 60.0);
    canvas.frame();
    canvas.x_axis("count", false);

    let slot = (canvas.bottom - canvas.top) / counts.len().max(1) as f64;
    for (i, (label, count)) in counts.iter().enumerate() {
        let y = canvas.top + i as f64 * slot;
        let w = canvas.sx(*count as f64) - canvas.left;
        let _ = write!(
            canvas.body,
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/><text x="{:.1}" y="{:.1}" text-anchor="end" font-size="12">{}</text>"#,
            canvas.left,
            y + slot * 0.1,
            w,
            slot * 0.8,
            BAR_COLOR,
            canvas.left - 6.0,
            y + slot / 2.0 + 4.0,
            escape(label)
        );
    }
    let _ = write!(
        canvas.body,
        r#"<text transform="translate(18,{:.1}) rotate(-90)" text-anchor="middle" font-size="13">{}</text>"#,
        (canvas.top + canvas.bottom) / 2.0,
        escape(axis_label)
    );
    canvas.finish()
}

/// Values over time, sorted by timestamp
pub fn line_chart(title: &str, points: &[(NaiveDateTime, f64)], x_label: &str, y_label: &str) -> String {
    let mut sorted: Vec<(f64, f64)> = points
        .iter()
        .filter(|(_, y)| y.is_finite())
        .map(|(x, y)| (days(x), *y))
        .collect();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut canvas = Canvas::new(
        title,
        bounds(sorted.iter().map(|p| p.0)),
        bounds(sorted.iter().map(|p| p.1)),
    );
    canvas.frame();
    canvas.y_axis(y_label);
    canvas.x_axis(x_label, true);
    canvas.polyline(&sorted, LINE_COLOR);
    canvas.finish()
}

/// Observed points with the fitted/forecast line and its interval band
pub fn forecast_chart(title: &str, observed: &[(NaiveDateTime, f64)], band: &[BandPoint]) -> String {
    let xs = observed.iter().map(|(x, _)| days(x)).chain(band.iter().map(|b| days(&b.x)));
    let ys = observed
        .iter()
        .map(|(_, y)| *y)
        .chain(band.iter().flat_map(|b| [b.lower, b.upper]));

    let mut canvas = Canvas::new(title, bounds(xs), bounds(ys));
    canvas.frame();
    canvas.y_axis("y");
    canvas.x_axis("ds", true);

    if !band.is_empty() {
        let upper = band.iter().map(|b| (days(&b.x), b.upper));
        let lower = band.iter().rev().map(|b| (days(&b.x), b.lower));
        let coords: Vec<String> = upper
            .chain(lower)
            .map(|(x, y)| format!("{:.1},{:.1}", canvas.sx(x), canvas.sy(y)))
            .collect();
        let _ = write!(
            canvas.body,
            r#"<polygon points="{}" fill="{}" fill-opacity="0.5" stroke="none"/>"#,
            coords.join(" "),
            BAND_COLOR
        );
        let mid: Vec<(f64, f64)> = band.iter().map(|b| (days(&b.x), b.mid)).collect();
        canvas.polyline(&mid, LINE_COLOR);
    }

    for (x, y) in observed {
        let _ = write!(
            canvas.body,
            r#"<circle cx="{:.1}" cy="{:.1}" r="2.5" fill="black"/>"#,
            canvas.sx(days(x)),
            canvas.sy(*y)
        );
    }
    canvas.finish()
}

/// Trend panel and, when fitted, a day-of-week seasonality panel
pub fn components_chart(title: &str, trend: &[(NaiveDateTime, f64)], weekly: Option<&[f64; 7]>) -> String {
    let trend_points: Vec<(f64, f64)> = trend.iter().map(|(x, y)| (days(x), *y)).collect();
    let mut top = Canvas::new(
        title,
        bounds(trend_points.iter().map(|p| p.0)),
        bounds(trend_points.iter().map(|p| p.1)),
    )
    .with_area(80.0, WIDTH - 30.0, 50.0, 215.0);
    top.frame();
    top.y_axis("trend");
    top.polyline(&trend_points, LINE_COLOR);
    for t in nice_ticks(top.x_range.0, top.x_range.1, 6) {
        let _ = write!(
            top.body,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="11">{}</text>"#,
            top.sx(t),
            top.bottom + 16.0,
            date_label(t)
        );
    }

    let mut body = top.body;
    match weekly {
        Some(effects) => {
            let mut bottom = Canvas {
                body: String::new(),
                left: 80.0,
                right: WIDTH - 30.0,
                top: 270.0,
                bottom: HEIGHT - 60.0,
                x_range: (0.0, 7.0),
                y_range: widen(bounds(effects.iter().copied().chain([0.0]))),
            };
            bottom.frame();
            bottom.y_axis("weekly");
            let zero = bottom.sy(0.0);
            let slot = (bottom.right - bottom.left) / 7.0;
            for (i, (day, effect)) in ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"]
                .iter()
                .zip(effects.iter())
                .enumerate()
            {
                let x = bottom.left + i as f64 * slot;
                let y = bottom.sy(*effect);
                let _ = write!(
                    bottom.body,
                    r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}"/><text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="11">{}</text>"#,
                    x + slot * 0.15,
                    y.min(zero),
                    slot * 0.7,
                    (zero - y).abs(),
                    BAR_COLOR,
                    x + slot / 2.0,
                    bottom.bottom + 16.0,
                    day
                );
            }
            body.push_str(&bottom.body);
        }
        None => {
            let _ = write!(
                body,
                r##"<text x="{:.1}" y="{:.1}" text-anchor="middle" font-size="13" fill="#666666">Weekly seasonality not fitted (history shorter than two weeks)</text>"##,
                WIDTH / 2.0,
                HEIGHT - 150.0
            );
        }
    }
    document(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Distribution of Unit Price"), "distribution_of_unit_price");
        assert_eq!(slug("Distribution of revenue/cost"), "distribution_of_revenue_cost");
        assert_eq!(slug("Trend of ../x-y"), "trend_of____x-y");
    }

    #[test]
    fn test_sturges() {
        assert_eq!(sturges_bins(1), 1);
        assert_eq!(sturges_bins(8), 4);
        assert_eq!(sturges_bins(100), 8);
    }

    #[test]
    fn test_histogram_bins_cover_all_values() {
        let values: Vec<f64> = (0..100).map(|v| v as f64).collect();
        let bins = histogram_bins(&values);
        assert_eq!(bins.len(), 8);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), 100);
        assert_eq!(bins.last().unwrap().upper, 99.0);

        let constant = histogram_bins(&[5.0, 5.0]);
        assert_eq!(constant.len(), 1);
        assert_eq!(constant[0].count, 2);
    }

    #[test]
    fn test_coolwarm_endpoints() {
        assert_eq!(coolwarm(0.0), "#dddddd");
        assert_eq!(coolwarm(1.0), "#b40426");
        assert_eq!(coolwarm(-1.0), "#3b4cc0");
    }

    #[test]
    fn test_nice_ticks() {
        assert_eq!(nice_ticks(0.0, 10.0, 5), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        assert_eq!(nice_ticks(3.0, 3.0, 5), vec![3.0]);
    }

    #[test]
    fn test_nice_ticks_large_narrow_range() {
        let ticks = nice_ticks(1e17, 1e17 + 16.0, 5);
        assert!(!ticks.is_empty());
        assert!(ticks.len() <= 20);
        assert!(ticks.windows(2).all(|w| w[0] < w[1]));

        let svg = histogram("Distribution of order_id", &[1e17, 1e17 + 16.0], "order_id");
        assert!(svg.contains("<rect"));
    }

    #[test]
    fn test_heatmap_annotates_cells() {
        let labels = vec!["a".to_string(), "b<c".to_string()];
        let matrix = vec![vec![Some(1.0), Some(-0.25)], vec![Some(-0.25), None]];
        let svg = heatmap("Correlation Matrix", &labels, &matrix);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(">-0.25<"));
        assert!(svg.contains(">nan<"));
        assert!(svg.contains("b&lt;c"));
    }

    #[test]
    fn test_charts_render() {
        let points: Vec<(NaiveDateTime, f64)> = (1..=5).map(|d| (day(d), d as f64)).collect();
        assert!(line_chart("Trend", &points, "Date", "Sales").contains("<polyline"));
        assert!(bar_chart("Count of Region", &[("North".into(), 3)], "Region").contains(">North<"));
        assert!(histogram("Distribution", &[1.0, 2.0, 3.0], "x").contains("<rect"));

        let band = [BandPoint { x: day(6), mid: 6.0, lower: 5.0, upper: 7.0 }];
        assert!(forecast_chart("Forecast", &points, &band).contains("<polygon"));
        let weekly = [0.0; 7];
        assert!(components_chart("Components", &points, Some(&weekly)).contains(">Sun<"));
        assert!(components_chart("Components", &points, None).contains("not fitted"));
    }
}
