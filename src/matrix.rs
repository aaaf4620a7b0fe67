use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::models::{ActivityRecord, CohortSummary, RecordExtras};

/// Cohort names in first-appearance order; the index is the heatmap row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CohortAxis {
    names: Vec<String>,
    #[serde(skip)]
    positions: HashMap<String, usize>,
}

impl CohortAxis {
    fn position_or_insert(&mut self, name: &str) -> usize {
        if let Some(position) = self.positions.get(name) {
            return *position;
        }
        let position = self.names.len();
        self.names.push(name.to_string());
        self.positions.insert(name.to_string(), position);
        position
    }

    pub fn name(&self, position: usize) -> Option<&str> {
        self.names.get(position).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixCell {
    pub period_index0: i64,
    pub cohort_position: usize,
    pub active_percentage: f64,
    pub active_count: u64,
    #[serde(flatten)]
    pub extras: RecordExtras,
}

impl MatrixCell {
    /// Back to the 1-based fortnight number used in labels.
    pub fn period_index(&self) -> i64 {
        self.period_index0.saturating_add(1)
    }

    /// Zero-based column when the cell falls inside a window of `columns` fortnights.
    pub(crate) fn column(&self, columns: usize) -> Option<usize> {
        usize::try_from(self.period_index0)
            .ok()
            .filter(|column| *column < columns)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CohortMatrix {
    pub axis: CohortAxis,
    pub cells: Vec<MatrixCell>,
}

/// Pivots flat records into an axis plus one cell per record, preserving input order.
///
/// Period indices are shifted to zero-based but not validated; a record with
/// `quincena <= 0` yields a negative column that renderers must drop. The shift
/// saturates at `i64::MIN`.
pub fn build(records: &[ActivityRecord]) -> CohortMatrix {
    let mut axis = CohortAxis::default();
    let mut cells = Vec::with_capacity(records.len());

    for record in records {
        let cohort_position = axis.position_or_insert(&record.cohort_name);
        cells.push(MatrixCell {
            period_index0: record.period_index.saturating_sub(1),
            cohort_position,
            active_percentage: record.active_percentage,
            active_count: record.active_count,
            extras: record.extras.clone(),
        });
    }

    CohortMatrix { axis, cells }
}

impl CohortMatrix {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// `(cohort, quincena)` pairs that occur more than once, in order of first repetition.
    pub fn duplicate_keys(&self) -> Vec<(String, i64)> {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        let mut duplicates = Vec::new();

        for cell in &self.cells {
            let key = (cell.cohort_position, cell.period_index0);
            if !seen.insert(key) && reported.insert(key) {
                let cohort = self.axis.name(cell.cohort_position).unwrap_or_default();
                duplicates.push((cohort.to_string(), cell.period_index()));
            }
        }

        duplicates
    }

    pub fn out_of_window(&self, columns: usize) -> usize {
        self.cells
            .iter()
            .filter(|cell| cell.column(columns).is_none())
            .count()
    }

    /// Dense `cohort × column` view. Later duplicates overwrite earlier ones.
    pub fn grid(&self, columns: usize) -> Vec<Vec<Option<&MatrixCell>>> {
        let mut rows = vec![vec![None; columns]; self.axis.len()];
        for cell in &self.cells {
            if let Some(column) = cell.column(columns) {
                rows[cell.cohort_position][column] = Some(cell);
            }
        }
        rows
    }

    /// Highest 1-based period present, used to size terminal output.
    pub fn max_period(&self) -> Option<i64> {
        self.cells.iter().map(MatrixCell::period_index).max()
    }

    /// One summary per cohort, over one cell per fortnight. Duplicates resolve
    /// last-write-wins like `grid`.
    pub fn cohort_summaries(&self) -> Vec<CohortSummary> {
        let mut by_cohort: Vec<BTreeMap<i64, &MatrixCell>> = vec![BTreeMap::new(); self.axis.len()];
        for cell in &self.cells {
            by_cohort[cell.cohort_position].insert(cell.period_index0, cell);
        }

        by_cohort
            .into_iter()
            .enumerate()
            .filter_map(|(position, periods)| {
                let (_, first) = periods.first_key_value()?;
                let (_, latest) = periods.last_key_value()?;
                let total: f64 = periods.values().map(|cell| cell.active_percentage).sum();

                Some(CohortSummary {
                    cohort: self.axis.name(position).unwrap_or_default().to_string(),
                    cell_count: periods.len(),
                    first_retention: first.active_percentage,
                    latest_period: latest.period_index(),
                    latest_retention: latest.active_percentage,
                    latest_active_count: latest.active_count,
                    mean_retention: total / periods.len() as f64,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(cohort: &str, period: i64, percentage: f64, count: u64) -> ActivityRecord {
        ActivityRecord {
            cohort_name: cohort.to_string(),
            period_index: period,
            active_percentage: percentage,
            active_count: count,
            extras: RecordExtras::default(),
        }
    }

    #[test]
    fn empty_input_builds_empty_matrix() {
        let matrix = build(&[]);
        assert!(matrix.axis.is_empty());
        assert!(matrix.cells.is_empty());
        assert!(matrix.cohort_summaries().is_empty());
    }

    #[test]
    fn pivots_reference_example() {
        let records = vec![
            record("X", 1, 80.0, 8),
            record("X", 2, 70.0, 7),
            record("Y", 1, 90.0, 9),
        ];

        let matrix = build(&records);
        assert_eq!(matrix.axis.names(), ["X", "Y"]);

        let triples: Vec<(i64, usize, f64, u64)> = matrix
            .cells
            .iter()
            .map(|cell| {
                (
                    cell.period_index0,
                    cell.cohort_position,
                    cell.active_percentage,
                    cell.active_count,
                )
            })
            .collect();
        assert_eq!(
            triples,
            vec![(0, 0, 80.0, 8), (1, 0, 70.0, 7), (0, 1, 90.0, 9)]
        );
    }

    #[test]
    fn axis_follows_first_appearance() {
        let matrix = build(&[record("B", 1, 50.0, 5), record("A", 1, 60.0, 6)]);
        assert_eq!(matrix.axis.names(), ["B", "A"]);
        assert_eq!(matrix.axis.name(1), Some("A"));
        assert_eq!(matrix.axis.name(2), None);
    }

    #[test]
    fn carries_passthrough_fields() {
        let mut input = record("X", 4, 55.5, 12);
        input.extras.contract_type = Some("postpago".to_string());
        input.extras.total_sold = Some(40.0);

        let matrix = build(&[input.clone()]);
        assert_eq!(matrix.cells[0].extras, input.extras);
        assert_eq!(matrix.cells[0].period_index(), 4);
    }

    #[test]
    fn non_positive_periods_pass_through_unvalidated() {
        let matrix = build(&[record("X", 0, 10.0, 1), record("X", -2, 10.0, 1)]);
        assert_eq!(matrix.cells[0].period_index0, -1);
        assert_eq!(matrix.cells[1].period_index0, -3);
        assert_eq!(matrix.out_of_window(36), 2);
    }

    #[test]
    fn lowest_period_saturates_instead_of_overflowing() {
        let matrix = build(&[record("X", i64::MIN, 10.0, 1), record("X", i64::MAX, 20.0, 2)]);
        assert_eq!(matrix.cells[0].period_index0, i64::MIN);
        assert_eq!(matrix.cells[1].period_index0, i64::MAX - 1);
        assert_eq!(matrix.cells[1].period_index(), i64::MAX);
        assert_eq!(matrix.out_of_window(36), 2);
        assert_eq!(matrix.cohort_summaries()[0].cell_count, 2);
    }

    #[test]
    fn duplicates_stay_separate_and_are_reported() {
        let records = vec![
            record("X", 1, 80.0, 8),
            record("Y", 1, 90.0, 9),
            record("X", 1, 75.0, 7),
            record("X", 1, 70.0, 6),
        ];

        let matrix = build(&records);
        assert_eq!(matrix.cells.len(), 4);
        assert_eq!(matrix.axis.names(), ["X", "Y"]);
        assert_eq!(matrix.duplicate_keys(), vec![("X".to_string(), 1)]);

        let grid = matrix.grid(36);
        let winner = grid[0][0].expect("cell present");
        assert_eq!(winner.active_percentage, 70.0);
    }

    #[test]
    fn grid_skips_cells_outside_window() {
        let matrix = build(&[record("X", 1, 80.0, 8), record("X", 40, 5.0, 1)]);
        let grid = matrix.grid(36);
        assert_eq!(grid.len(), 1);
        assert_eq!(grid[0].iter().filter(|cell| cell.is_some()).count(), 1);
        assert_eq!(matrix.out_of_window(36), 1);
        assert_eq!(matrix.out_of_window(40), 0);
        assert_eq!(matrix.max_period(), Some(40));
    }

    #[test]
    fn summaries_follow_axis_order() {
        let records = vec![
            record("B", 2, 60.0, 6),
            record("B", 1, 100.0, 10),
            record("A", 1, 90.0, 9),
        ];

        let summaries = build(&records).cohort_summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].cohort, "B");
        assert_eq!(summaries[0].first_retention, 100.0);
        assert_eq!(summaries[0].latest_period, 2);
        assert_eq!(summaries[0].latest_retention, 60.0);
        assert_eq!(summaries[0].latest_active_count, 6);
        assert!((summaries[0].mean_retention - 80.0).abs() < 1e-9);
        assert_eq!(summaries[1].cohort, "A");
        assert_eq!(summaries[1].cell_count, 1);
    }

    #[test]
    fn summaries_count_duplicate_periods_once() {
        let records = vec![
            record("F", 1, 100.0, 20),
            record("F", 1, 95.0, 19),
            record("F", 2, 90.0, 18),
            record("F", 2, 85.0, 17),
        ];

        let summary = &build(&records).cohort_summaries()[0];
        assert_eq!(summary.cell_count, 2);
        assert_eq!(summary.first_retention, 95.0);
        assert_eq!(summary.latest_period, 2);
        assert_eq!(summary.latest_retention, 85.0);
        assert_eq!(summary.latest_active_count, 17);
        assert!((summary.mean_retention - 90.0).abs() < 1e-9);
    }
}
