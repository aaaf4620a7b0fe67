use std::fmt::Write;

use serde::Serialize;
use tracing::warn;

use crate::matrix::{CohortMatrix, MatrixCell};
use crate::models::RecordExtras;

pub const DEFAULT_PERIOD_COLUMNS: usize = 36;

/// Presentation settings for the chart; none of these constrain the matrix itself.
#[derive(Debug, Clone, PartialEq)]
pub struct RendererConfig {
    pub period_columns: usize,
    pub label_prefix: String,
    pub min_value: f64,
    pub max_value: f64,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            period_columns: DEFAULT_PERIOD_COLUMNS,
            label_prefix: "Q".to_string(),
            min_value: 0.0,
            max_value: 100.0,
        }
    }
}

impl RendererConfig {
    pub fn with_columns(columns: usize) -> Self {
        Self {
            period_columns: columns,
            ..Self::default()
        }
    }

    pub fn column_label(&self, period: usize) -> String {
        format!("{}{period}", self.label_prefix)
    }

    pub fn column_labels(&self) -> Vec<String> {
        (1..=self.period_columns)
            .map(|period| self.column_label(period))
            .collect()
    }
}

/// Tooltip and label data, index-aligned with `HeatmapPayload::data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellDetail {
    pub cohort: String,
    pub period: i64,
    pub active_percentage: f64,
    pub active_count: u64,
    pub label: String,
    pub tooltip: String,
    #[serde(flatten)]
    pub extras: RecordExtras,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapPayload {
    pub x_axis: Vec<String>,
    pub y_axis: Vec<String>,
    /// `[column, row, percentage]` triples.
    pub data: Vec<(i64, usize, f64)>,
    pub details: Vec<CellDetail>,
    pub visual_min: f64,
    pub visual_max: f64,
    pub dropped: usize,
}

pub fn cell_label(cell: &MatrixCell) -> String {
    format!("{}%\n({})", format_percentage(cell.active_percentage), cell.active_count)
}

fn format_percentage(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
            .trim_end_matches('0')
            .trim_end_matches('.')
            .to_string()
    }
}

/// Converts the matrix into what a heatmap widget consumes, dropping cells outside the column window.
pub fn build_payload(matrix: &CohortMatrix, config: &RendererConfig) -> HeatmapPayload {
    let mut data = Vec::with_capacity(matrix.cells.len());
    let mut details = Vec::with_capacity(matrix.cells.len());
    let mut dropped = 0;

    for cell in &matrix.cells {
        if cell.column(config.period_columns).is_none() {
            dropped += 1;
            continue;
        }

        let cohort = matrix.axis.name(cell.cohort_position).unwrap_or_default();
        data.push((cell.period_index0, cell.cohort_position, cell.active_percentage));
        details.push(CellDetail {
            cohort: cohort.to_string(),
            period: cell.period_index(),
            active_percentage: cell.active_percentage,
            active_count: cell.active_count,
            label: cell_label(cell),
            tooltip: tooltip(cohort, cell),
            extras: cell.extras.clone(),
        });
    }

    if dropped > 0 {
        warn!(dropped, columns = config.period_columns, "cells outside the fortnight window were not rendered");
    }

    HeatmapPayload {
        x_axis: config.column_labels(),
        y_axis: matrix.axis.names().to_vec(),
        data,
        details,
        visual_min: config.min_value,
        visual_max: config.max_value,
        dropped,
    }
}

pub fn tooltip(cohort: &str, cell: &MatrixCell) -> String {
    format!(
        "Cohort: {}\nFortnight: {}\nActive: {}%\nActive count: {}",
        cohort,
        cell.period_index(),
        format_percentage(cell.active_percentage),
        cell.active_count
    )
}

/// Plain-text grid, one row per cohort, trimmed to the last populated column.
pub fn render_table(matrix: &CohortMatrix, config: &RendererConfig) -> String {
    let mut output = String::new();
    if matrix.axis.is_empty() {
        let _ = writeln!(output, "No cohort data for these filters.");
        return output;
    }

    let last_period = matrix.max_period().unwrap_or(1).max(1) as usize;
    let columns = last_period.min(config.period_columns);
    let grid = matrix.grid(columns);
    let name_width = matrix
        .axis
        .names()
        .iter()
        .map(|name| name.chars().count())
        .max()
        .unwrap_or(0)
        .max("Cohort".len());

    let _ = write!(output, "{:<name_width$}", "Cohort");
    for period in 1..=columns {
        let _ = write!(output, " {:>6}", config.column_label(period));
    }
    let _ = writeln!(output);

    for (position, row) in grid.iter().enumerate() {
        let name = matrix.axis.name(position).unwrap_or_default();
        let _ = write!(output, "{name:<name_width$}");
        for cell in row {
            match cell {
                Some(cell) => {
                    let _ = write!(output, " {:>6.1}", cell.active_percentage);
                }
                None => {
                    let _ = write!(output, " {:>6}", "-");
                }
            }
        }
        let _ = writeln!(output);
    }

    let dropped = matrix.out_of_window(config.period_columns);
    if dropped > 0 {
        let _ = writeln!(
            output,
            "({dropped} cells outside {}1..{}{} not shown)",
            config.label_prefix, config.label_prefix, config.period_columns
        );
    }

    output
}
