// Text renderings of the exploratory and evaluation charts.
//
// Every function returns the chart as a `String` so callers decide whether to print it.

use std::fmt::Write;

use ndarray::Array2;

const SHADES: [char; 10] = [' ', '.', ':', '-', '=', '+', '*', '#', '%', '@'];
const BAR: char = '█';

fn format_value(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.0}")
    } else {
        format!("{v:.4}")
    }
}

// Horizontal bar chart, one row per `(label, value)`. Negative values are drawn by magnitude.
pub fn bar_chart(title: &str, bars: &[(String, f64)], width: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{title}");
    if bars.is_empty() {
        let _ = writeln!(out, "  (no data)");
        return out;
    }

    let label_width = bars.iter().map(|(l, _)| l.chars().count()).max().unwrap_or(0);
    let max = bars.iter().map(|(_, v)| v.abs()).fold(0.0, f64::max);
    for (label, value) in bars {
        let len = if max > 0.0 {
            ((value.abs() / max) * width as f64).round() as usize
        } else {
            0
        };
        let _ = writeln!(
            out,
            "  {label:>label_width$} |{} {}",
            BAR.to_string().repeat(len),
            format_value(*value)
        );
    }
    out
}

// Equal-width bins between the min and max of `values`; non-finite values are skipped.
pub fn histogram(title: &str, values: &[f64], bins: usize, width: usize) -> String {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return bar_chart(title, &[], width);
    }

    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = if max > min { max - min } else { 1.0 };
    let mut counts = vec![0usize; bins];
    for v in &finite {
        let bin = (((v - min) / span) * bins as f64) as usize;
        counts[bin.min(bins - 1)] += 1;
    }

    let bars: Vec<(String, f64)> = counts
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let lo = min + span * i as f64 / bins as f64;
            let hi = min + span * (i + 1) as f64 / bins as f64;
            (format!("[{lo:>10.2}, {hi:>10.2})"), c as f64)
        })
        .collect();
    bar_chart(title, &bars, width)
}

// Shaded grid for values in [-1, 1], e.g. a correlation matrix.
pub fn heatmap(title: &str, labels: &[String], matrix: &Array2<f64>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{title}");
    let label_width = labels
        .iter()
        .map(|l| l.chars().count().min(10))
        .max()
        .unwrap_or(0);

    let _ = write!(out, "  {:label_width$} ", "");
    for j in 0..matrix.ncols() {
        let _ = write!(out, "{:>2}", j % 100);
    }
    let _ = writeln!(out);

    for (i, row) in matrix.rows().into_iter().enumerate() {
        let label: String = labels
            .get(i)
            .map(|l| l.chars().take(10).collect())
            .unwrap_or_default();
        let _ = write!(out, "  {label:>label_width$} ");
        for &v in row {
            let v = if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
            let idx = (((v + 1.0) / 2.0) * (SHADES.len() - 1) as f64).round() as usize;
            let shade = SHADES[idx];
            let _ = write!(out, "{shade}{shade}");
        }
        let _ = writeln!(out, "  {:>2}", i % 100);
    }
    let _ = writeln!(
        out,
        "  scale: -1 '{}' .. 0 '{}' .. +1 '{}'",
        SHADES[0],
        SHADES[SHADES.len() / 2],
        SHADES[SHADES.len() - 1]
    );
    out
}

// Connected curve on the unit square, as used for ROC and precision-recall plots.
pub fn curve(
    title: &str,
    xs: &[f64],
    ys: &[f64],
    axis_labels: (&str, &str),
    diagonal: bool,
    width: usize,
    height: usize,
) -> String {
    let mut grid = vec![vec![' '; width + 1]; height + 1];
    let cell = |x: f64, y: f64| -> (usize, usize) {
        let col = (x.clamp(0.0, 1.0) * width as f64).round() as usize;
        let row = height - (y.clamp(0.0, 1.0) * height as f64).round() as usize;
        (row, col)
    };

    if diagonal {
        for step in 0..=width {
            let t = step as f64 / width as f64;
            let (r, c) = cell(t, t);
            grid[r][c] = '.';
        }
    }

    let points: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter(|(x, y)| x.is_finite() && y.is_finite())
        .map(|(&x, &y)| (x, y))
        .collect();
    for pair in points.windows(2) {
        let (x0, y0) = pair[0];
        let (x1, y1) = pair[1];
        let steps = (((x1 - x0).abs() * width as f64).max((y1 - y0).abs() * height as f64))
            .ceil()
            .max(1.0) as usize;
        for s in 0..=steps {
            let t = s as f64 / steps as f64;
            let (r, c) = cell(x0 + (x1 - x0) * t, y0 + (y1 - y0) * t);
            grid[r][c] = '*';
        }
    }
    if let Some(&(x, y)) = points.first().filter(|_| points.len() == 1) {
        let (r, c) = cell(x, y);
        grid[r][c] = '*';
    }

    let (x_label, y_label) = axis_labels;
    let mut out = String::new();
    let _ = writeln!(out, "\n{title}");
    let _ = writeln!(out, "  {y_label}");
    for (i, row) in grid.iter().enumerate() {
        let tick = if i == 0 {
            "1.0"
        } else if i == height / 2 {
            "0.5"
        } else if i == height {
            "0.0"
        } else {
            ""
        };
        let line: String = row.iter().collect();
        let _ = writeln!(out, "  {tick:>3} |{line}");
    }
    let _ = writeln!(out, "      +{}", "-".repeat(width + 1));
    let _ = writeln!(out, "      0.0{:>w$}1.0  {x_label}", "", w = width.saturating_sub(5));
    out
}
