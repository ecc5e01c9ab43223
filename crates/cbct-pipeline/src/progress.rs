//! Fixed-width progress table written through `log::info!`.

use chrono::{Local, NaiveTime};
use log::info;
use std::time::{Duration, Instant};

/// One table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<usize> for Cell {
    fn from(v: usize) -> Self {
        Cell::Int(v as i64)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

impl From<&str> for Cell {
    fn from(v: &str) -> Self {
        Cell::Text(v.to_string())
    }
}

impl Cell {
    fn render(&self) -> String {
        match self {
            Cell::Int(v) => v.to_string(),
            Cell::Float(v) => format!("{v:.6}"),
            Cell::Text(s) => s.clone(),
        }
    }
}

/// Columns are `Time | Iteration | <metrics...> | it/s`.
///
/// `Time` is the local wall-clock time of the row and `it/s` is the
/// `Iteration` value of the row over the elapsed run time.
#[derive(Debug, Clone)]
pub struct ProgressTable {
    header: Vec<String>,
    col_width: usize,
    start: Instant,
}

impl ProgressTable {
    pub fn new(metrics: &[&str], col_width: usize) -> Self {
        let mut header: Vec<String> = metrics.iter().map(|m| m.to_string()).collect();
        if !header.iter().any(|h| h == "Iteration") {
            header.insert(0, "Iteration".into());
        }
        if !header.iter().any(|h| h == "Time") {
            header.insert(0, "Time".into());
        }
        if !header.iter().any(|h| h == "it/s") {
            header.push("it/s".into());
        }
        Self {
            header,
            col_width,
            start: Instant::now(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.header
    }

    /// Header line and rule.
    pub fn header_lines(&self) -> [String; 2] {
        let fields: Vec<String> = self.header.iter().map(|h| self.pad(h)).collect();
        let width = (self.col_width + 3) * self.header.len();
        [fields.join(" | "), "-".repeat(width)]
    }

    pub fn log_header(&self) {
        for line in self.header_lines() {
            info!("{line}");
        }
    }

    /// Render a row; columns missing from `values` are left blank.
    pub fn format_row(&self, values: &[(&str, Cell)], clock: NaiveTime, elapsed: Duration) -> String {
        let iteration = values.iter().find_map(|(k, v)| match (k, v) {
            (&"Iteration", Cell::Int(i)) => Some((*i).max(1) as f64),
            _ => None,
        });
        let fields: Vec<String> = self
            .header
            .iter()
            .map(|col| {
                let text = match col.as_str() {
                    "Time" => clock.format("%H:%M:%S").to_string(),
                    "it/s" => match iteration {
                        Some(it) if elapsed.as_secs_f64() > 0.0 => {
                            format!("{:.6}", it / elapsed.as_secs_f64())
                        }
                        _ => String::new(),
                    },
                    name => values
                        .iter()
                        .find(|(k, _)| *k == name)
                        .map(|(_, v)| v.render())
                        .unwrap_or_default(),
                };
                self.pad(&text)
            })
            .collect();
        fields.join(" | ")
    }

    pub fn update(&self, values: &[(&str, Cell)]) {
        let row = self.format_row(values, Local::now().time(), self.start.elapsed());
        info!("{row}");
    }

    fn pad(&self, s: &str) -> String {
        format!("{s:>width$}", width = self.col_width)
    }
}
