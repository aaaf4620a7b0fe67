use std::fmt::Write;

use chrono::{DateTime, Utc};

use crate::matrix::CohortMatrix;
use crate::models::FilterCriteria;
use crate::render::RendererConfig;

pub fn build_report(
    source: &str,
    criteria: &FilterCriteria,
    generated_at: DateTime<Utc>,
    matrix: &CohortMatrix,
    config: &RendererConfig,
) -> String {
    let summaries = matrix.cohort_summaries();
    let mut output = String::new();

    let _ = writeln!(output, "# Cohort Retention Report");
    let _ = writeln!(
        output,
        "Generated for {} from {} at {}",
        criteria,
        source,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Cohort Summary");

    if summaries.is_empty() {
        let _ = writeln!(output, "No cohort records for these filters.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {:.1}% at start, {:.1}% by Q{} ({} active), mean {:.1}% across {} fortnights",
                summary.cohort,
                summary.first_retention,
                summary.latest_retention,
                summary.latest_period,
                summary.latest_active_count,
                summary.mean_retention,
                summary.cell_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Retention Heatmap");

    let columns = matrix
        .max_period()
        .map_or(0, |period| period.max(0) as usize)
        .min(config.period_columns);

    if matrix.is_empty() || columns == 0 {
        let _ = writeln!(output, "Nothing to chart.");
    } else {
        let _ = write!(output, "| Cohort |");
        for period in 1..=columns {
            let _ = write!(output, " {} |", config.column_label(period));
        }
        let _ = writeln!(output);
        let _ = write!(output, "|---|");
        for _ in 0..columns {
            let _ = write!(output, "---:|");
        }
        let _ = writeln!(output);

        for (position, row) in matrix.grid(columns).iter().enumerate() {
            let _ = write!(output, "| {} |", matrix.axis.name(position).unwrap_or_default());
            for cell in row {
                match cell {
                    Some(cell) => {
                        let _ = write!(
                            output,
                            " {:.1}% ({}) |",
                            cell.active_percentage, cell.active_count
                        );
                    }
                    None => {
                        let _ = write!(output, " |");
                    }
                }
            }
            let _ = writeln!(output);
        }
    }

    let duplicates = matrix.duplicate_keys();
    let outside = matrix.out_of_window(config.period_columns);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Data Quality");

    if duplicates.is_empty() && outside == 0 {
        let _ = writeln!(output, "No issues found.");
    } else {
        for (cohort, period) in duplicates.iter().take(10) {
            let _ = writeln!(
                output,
                "- {cohort} has more than one record for Q{period}; the last one is charted"
            );
        }
        if duplicates.len() > 10 {
            let _ = writeln!(output, "- ... and {} more duplicates", duplicates.len() - 10);
        }
        if outside > 0 {
            let _ = writeln!(
                output,
                "- {outside} records fall outside Q1..Q{} and are not charted",
                config.period_columns
            );
        }
    }

    output
}
