use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::SourceError;
use crate::filters::FilterState;
use crate::matrix::{self, CohortMatrix};
use crate::models::{ActivityRecord, FilterCriteria};
use crate::source::RecordSource;

/// Handle for one issued fetch. Only the newest ticket may change what is shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub seq: u64,
    pub criteria: FilterCriteria,
}

pub type FetchResult = (u64, Result<Vec<ActivityRecord>, SourceError>);

#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapSnapshot {
    pub seq: u64,
    pub criteria: FilterCriteria,
    pub fetched_at: DateTime<Utc>,
    pub matrix: CohortMatrix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Displayed { seq: u64, cohorts: usize, cells: usize },
    Stale { seq: u64, latest: u64 },
    KeptPrevious { seq: u64 },
}

/// Owns the matrix on display and the filters that produced it.
pub struct HeatmapController {
    source: Arc<dyn RecordSource>,
    filters: FilterState,
    latest_issued: u64,
    latest_criteria: FilterCriteria,
    latest_completed: u64,
    snapshot: Option<Arc<HeatmapSnapshot>>,
    last_error: Option<SourceError>,
}

impl HeatmapController {
    pub fn new(source: Arc<dyn RecordSource>, filters: FilterState) -> Self {
        Self {
            source,
            filters,
            latest_issued: 0,
            latest_criteria: FilterCriteria::default(),
            latest_completed: 0,
            snapshot: None,
            last_error: None,
        }
    }

    pub fn source(&self) -> &Arc<dyn RecordSource> {
        &self.source
    }

    pub fn filters(&self) -> &FilterState {
        &self.filters
    }

    pub fn filters_mut(&mut self) -> &mut FilterState {
        &mut self.filters
    }

    pub fn snapshot(&self) -> Option<&Arc<HeatmapSnapshot>> {
        self.snapshot.as_ref()
    }

    pub fn last_error(&self) -> Option<&SourceError> {
        self.last_error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.latest_issued > self.latest_completed
    }

    /// Loads the selectable date window into the filters.
    pub async fn load_bounds(&mut self) -> Result<(), SourceError> {
        let range = self.source.fetch_date_range().await?;
        self.filters.set_bounds(range);
        Ok(())
    }

    /// Issues a ticket for the currently applied filters.
    pub fn begin(&mut self) -> FetchTicket {
        self.latest_issued += 1;
        let ticket = FetchTicket {
            seq: self.latest_issued,
            criteria: self.filters.applied().clone(),
        };
        self.latest_criteria = ticket.criteria.clone();
        debug!(seq = ticket.seq, filters = %ticket.criteria, "fetch issued");
        ticket
    }

    pub fn apply_filters(&mut self) -> FetchTicket {
        self.filters.apply();
        self.begin()
    }

    pub fn complete(
        &mut self,
        seq: u64,
        result: Result<Vec<ActivityRecord>, SourceError>,
    ) -> FetchOutcome {
        if seq != self.latest_issued {
            warn!(seq, latest = self.latest_issued, "discarding stale response");
            return FetchOutcome::Stale {
                seq,
                latest: self.latest_issued,
            };
        }
        self.latest_completed = seq;

        match result {
            Ok(records) => {
                let matrix = matrix::build(&records);
                let outcome = FetchOutcome::Displayed {
                    seq,
                    cohorts: matrix.axis.len(),
                    cells: matrix.cells.len(),
                };
                let duplicates = matrix.duplicate_keys();
                if !duplicates.is_empty() {
                    warn!(count = duplicates.len(), first = ?duplicates[0], "duplicate cohort/fortnight keys");
                }
                info!(seq, cohorts = matrix.axis.len(), cells = matrix.cells.len(), "matrix replaced");

                self.snapshot = Some(Arc::new(HeatmapSnapshot {
                    seq,
                    criteria: self.latest_criteria.clone(),
                    fetched_at: Utc::now(),
                    matrix,
                }));
                self.last_error = None;
                outcome
            }
            Err(err) => {
                error!(seq, kind = %err.kind(), "fetch failed, keeping previous matrix: {err}");
                self.last_error = Some(err);
                FetchOutcome::KeptPrevious { seq }
            }
        }
    }

    /// Issue, await, and settle one fetch for the applied filters.
    pub async fn refresh(&mut self) -> FetchOutcome {
        let ticket = self.begin();
        let result = self.source.fetch_records(&ticket.criteria).await;
        self.complete(ticket.seq, result)
    }

    /// Runs the fetch on its own task; the result arrives on `tx` tagged with the ticket's sequence.
    pub fn spawn_fetch(&self, ticket: FetchTicket, tx: mpsc::UnboundedSender<FetchResult>) {
        let source = Arc::clone(&self.source);
        tokio::spawn(async move {
            let result = source.fetch_records(&ticket.criteria).await;
            if tx.send((ticket.seq, result)).is_err() {
                debug!(seq = ticket.seq, "receiver gone, dropping fetch result");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DateRange, RecordExtras};
    use async_trait::async_trait;
    use std::time::Duration;

    fn record(cohort: &str, period: i64, percentage: f64) -> ActivityRecord {
        ActivityRecord {
            cohort_name: cohort.to_string(),
            period_index: period,
            active_percentage: percentage,
            active_count: 10,
            extras: RecordExtras::default(),
        }
    }

    fn malformed() -> SourceError {
        SourceError::Malformed {
            origin: "test".to_string(),
            source: serde_json::from_str::<Vec<u8>>("{").unwrap_err(),
        }
    }

    // Answers with one record named after the requested fortnight, after a
    // delay that shrinks as the fortnight grows.
    struct DelayedSource;

    #[async_trait]
    impl RecordSource for DelayedSource {
        async fn fetch_records(
            &self,
            criteria: &FilterCriteria,
        ) -> Result<Vec<ActivityRecord>, SourceError> {
            let period = criteria.period_index.unwrap_or(1);
            tokio::time::sleep(Duration::from_millis(1000 / period as u64)).await;
            Ok(vec![record(&format!("Q{period}"), period, 50.0)])
        }

        async fn fetch_date_range(&self) -> Result<DateRange, SourceError> {
            Ok(DateRange::default())
        }

        fn describe(&self) -> String {
            "delayed".to_string()
        }
    }

    fn controller() -> HeatmapController {
        HeatmapController::new(Arc::new(DelayedSource), FilterState::default())
    }

    #[test]
    fn starts_empty_and_idle() {
        let ctrl = controller();
        assert!(ctrl.snapshot().is_none());
        assert!(ctrl.last_error().is_none());
        assert!(!ctrl.is_loading());
    }

    #[test]
    fn sequence_numbers_increase() {
        let mut ctrl = controller();
        assert_eq!(ctrl.begin().seq, 1);
        assert_eq!(ctrl.apply_filters().seq, 2);
        assert!(ctrl.is_loading());
    }

    #[test]
    fn late_older_response_is_discarded() {
        let mut ctrl = controller();
        let a = ctrl.begin();
        let b = ctrl.begin();

        let outcome = ctrl.complete(b.seq, Ok(vec![record("B", 1, 90.0)]));
        assert!(matches!(outcome, FetchOutcome::Displayed { seq: 2, cohorts: 1, cells: 1 }));

        let outcome = ctrl.complete(a.seq, Ok(vec![record("A", 1, 10.0), record("A", 2, 5.0)]));
        assert_eq!(outcome, FetchOutcome::Stale { seq: 1, latest: 2 });

        let shown = ctrl.snapshot().unwrap();
        assert_eq!(shown.seq, 2);
        assert_eq!(shown.matrix.axis.names(), ["B"]);
        assert!(!ctrl.is_loading());
    }

    #[test]
    fn stale_error_leaves_state_untouched() {
        let mut ctrl = controller();
        let a = ctrl.begin();
        let b = ctrl.begin();
        ctrl.complete(b.seq, Ok(vec![record("B", 1, 90.0)]));

        assert!(matches!(ctrl.complete(a.seq, Err(malformed())), FetchOutcome::Stale { .. }));
        assert!(ctrl.last_error().is_none());
        assert_eq!(ctrl.snapshot().unwrap().seq, 2);
    }

    #[test]
    fn error_keeps_previous_matrix() {
        let mut ctrl = controller();
        let first = ctrl.begin();
        ctrl.complete(first.seq, Ok(vec![record("X", 1, 80.0)]));

        let second = ctrl.begin();
        let outcome = ctrl.complete(second.seq, Err(malformed()));
        assert_eq!(outcome, FetchOutcome::KeptPrevious { seq: 2 });
        assert_eq!(ctrl.snapshot().unwrap().seq, 1);
        assert!(ctrl.last_error().is_some());
        assert!(!ctrl.is_loading());

        let third = ctrl.begin();
        ctrl.complete(third.seq, Ok(vec![]));
        assert!(ctrl.last_error().is_none());
        assert!(ctrl.snapshot().unwrap().matrix.is_empty());
    }

    #[test]
    fn initial_error_leaves_no_snapshot() {
        let mut ctrl = controller();
        let ticket = ctrl.begin();
        ctrl.complete(ticket.seq, Err(malformed()));
        assert!(ctrl.snapshot().is_none());
        assert!(ctrl.last_error().is_some());
    }

    #[test]
    fn snapshot_records_applied_filters() {
        let mut ctrl = controller();
        ctrl.filters_mut().set_period(Some(4)).unwrap();
        let ticket = ctrl.apply_filters();
        assert_eq!(ticket.criteria.period_index, Some(4));
        ctrl.complete(ticket.seq, Ok(vec![record("X", 4, 40.0)]));
        assert_eq!(ctrl.snapshot().unwrap().criteria.period_index, Some(4));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_arrivals_show_the_latest_request() {
        let mut ctrl = controller();
        let (tx, mut rx) = mpsc::unbounded_channel();

        // Q1 takes 1000ms, Q4 takes 250ms: A is issued first but lands last.
        ctrl.filters_mut().set_period(Some(1)).unwrap();
        let a = ctrl.apply_filters();
        ctrl.spawn_fetch(a, tx.clone());

        ctrl.filters_mut().set_period(Some(4)).unwrap();
        let b = ctrl.apply_filters();
        ctrl.spawn_fetch(b, tx);

        let mut arrivals = Vec::new();
        while let Some((seq, result)) = rx.recv().await {
            arrivals.push(seq);
            ctrl.complete(seq, result);
        }

        assert_eq!(arrivals, vec![2, 1]);
        let shown = ctrl.snapshot().unwrap();
        assert_eq!(shown.seq, 2);
        assert_eq!(shown.matrix.axis.names(), ["Q4"]);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_builds_matrix_from_source() {
        let mut ctrl = controller();
        let outcome = ctrl.refresh().await;
        assert!(matches!(outcome, FetchOutcome::Displayed { seq: 1, cohorts: 1, cells: 1 }));
        assert!(ctrl.load_bounds().await.is_ok());
    }
}
