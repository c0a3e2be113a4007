//! 结果图表的 SVG 渲染

use std::collections::BTreeMap;
use std::fmt::Write;

const WIDTH: f64 = 640.0;
const HEIGHT: f64 = 420.0;
const MARGIN: f64 = 56.0;
pub const DEFAULT_BINS: usize = 10;

/// 坐标轴范围，零宽度时向两侧各扩展 0.5
#[derive(Debug, Clone, Copy)]
struct Range {
    min: f64,
    max: f64,
}

impl Range {
    fn of(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut range: Option<Range> = None;
        for v in values.filter(|v| v.is_finite()) {
            range = Some(match range {
                None => Range { min: v, max: v },
                Some(r) => Range {
                    min: r.min.min(v),
                    max: r.max.max(v),
                },
            });
        }
        range.map(|r| {
            if r.max > r.min {
                r
            } else {
                Range {
                    min: r.min - 0.5,
                    max: r.max + 0.5,
                }
            }
        })
    }

    fn span(&self) -> f64 {
        self.max - self.min
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn open_svg(title: &str, x_label: &str, y_label: &str) -> String {
    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}">"#
    );
    let _ = write!(
        svg,
        r#"<rect width="{WIDTH}" height="{HEIGHT}" fill="white"/><text x="{}" y="24" text-anchor="middle" font-size="16">{}</text>"#,
        WIDTH / 2.0,
        escape(title)
    );
    let _ = write!(
        svg,
        r#"<line x1="{MARGIN}" y1="{}" x2="{}" y2="{}" stroke="black"/><line x1="{MARGIN}" y1="{MARGIN}" x2="{MARGIN}" y2="{}" stroke="black"/>"#,
        HEIGHT - MARGIN,
        WIDTH - MARGIN,
        HEIGHT - MARGIN,
        HEIGHT - MARGIN
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-size="12">{}</text><text x="16" y="{}" text-anchor="middle" font-size="12" transform="rotate(-90 16 {})">{}</text>"#,
        WIDTH / 2.0,
        HEIGHT - 16.0,
        escape(x_label),
        HEIGHT / 2.0,
        HEIGHT / 2.0,
        escape(y_label)
    );
    svg
}

fn axis_ticks(svg: &mut String, x: Range, y: Range) {
    let _ = write!(
        svg,
        r#"<text x="{MARGIN}" y="{}" font-size="10" text-anchor="middle">{:.3}</text><text x="{}" y="{}" font-size="10" text-anchor="middle">{:.3}</text>"#,
        HEIGHT - MARGIN + 14.0,
        x.min,
        WIDTH - MARGIN,
        HEIGHT - MARGIN + 14.0,
        x.max
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" font-size="10" text-anchor="end">{:.3}</text><text x="{}" y="{MARGIN}" font-size="10" text-anchor="end">{:.3}</text>"#,
        MARGIN - 4.0,
        HEIGHT - MARGIN,
        y.min,
        MARGIN - 4.0,
        y.max
    );
}

/// 等宽分箱计数，最大值落入最后一个箱
pub fn bin_counts(values: &[f64], bins: usize) -> Option<(f64, f64, Vec<usize>)> {
    let range = Range::of(values.iter().copied())?;
    let bins = bins.max(1);
    let mut counts = vec![0usize; bins];
    for v in values.iter().filter(|v| v.is_finite()) {
        let index = (((v - range.min) / range.span()) * bins as f64) as usize;
        counts[index.min(bins - 1)] += 1;
    }
    Some((range.min, range.max, counts))
}

pub fn histogram_svg(title: &str, x_label: &str, values: &[f64], bins: usize) -> Option<String> {
    let (min, max, counts) = bin_counts(values, bins)?;
    let tallest = counts.iter().copied().max().unwrap_or(0).max(1) as f64;
    let plot_width = WIDTH - 2.0 * MARGIN;
    let plot_height = HEIGHT - 2.0 * MARGIN;
    let bar_width = plot_width / counts.len() as f64;

    let mut svg = open_svg(title, x_label, "count");
    for (i, count) in counts.iter().enumerate() {
        let height = *count as f64 / tallest * plot_height;
        let _ = write!(
            svg,
            r##"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="#4c72b0" stroke="white"/>"##,
            MARGIN + i as f64 * bar_width,
            HEIGHT - MARGIN - height,
            bar_width,
            height
        );
    }
    axis_ticks(
        &mut svg,
        Range { min, max },
        Range {
            min: 0.0,
            max: tallest,
        },
    );
    svg.push_str("</svg>");
    Some(svg)
}

pub fn scatter_svg(
    title: &str,
    x_label: &str,
    y_label: &str,
    points: &[(f64, f64)],
) -> Option<String> {
    let points: Vec<(f64, f64)> = points
        .iter()
        .copied()
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .collect();
    let x = Range::of(points.iter().map(|p| p.0))?;
    let y = Range::of(points.iter().map(|p| p.1))?;
    let plot_width = WIDTH - 2.0 * MARGIN;
    let plot_height = HEIGHT - 2.0 * MARGIN;

    let mut svg = open_svg(title, x_label, y_label);
    for (px, py) in &points {
        let _ = write!(
            svg,
            r##"<circle cx="{:.2}" cy="{:.2}" r="3" fill="#dd8452" fill-opacity="0.8"/>"##,
            MARGIN + (px - x.min) / x.span() * plot_width,
            HEIGHT - MARGIN - (py - y.min) / y.span() * plot_height
        );
    }
    axis_ticks(&mut svg, x, y);
    svg.push_str("</svg>");
    Some(svg)
}

/// 按分层列分组后的 (分组, 数量, 均值)，按分组名排序
pub fn stratified_means(pairs: &[(String, f64)]) -> Vec<(String, usize, f64)> {
    let mut groups: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for (group, value) in pairs.iter().filter(|(_, v)| v.is_finite()) {
        let entry = groups.entry(group.as_str()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += value;
    }
    groups
        .into_iter()
        .map(|(group, (count, sum))| (group.to_string(), count, sum / count as f64))
        .collect()
}
