use chrono::NaiveDate;
use tracing::debug;

use crate::error::FilterError;
use crate::models::{DateRange, FilterCriteria};

/// Draft/applied filter pair. Edits only touch the draft; nothing is fetched
/// until `apply` promotes it.
#[derive(Debug, Clone, Default)]
pub struct FilterState {
    draft: FilterCriteria,
    applied: FilterCriteria,
    bounds: Option<DateRange>,
}

impl FilterState {
    pub fn draft(&self) -> &FilterCriteria {
        &self.draft
    }

    pub fn applied(&self) -> &FilterCriteria {
        &self.applied
    }

    pub fn bounds(&self) -> Option<&DateRange> {
        self.bounds.as_ref()
    }

    /// Installs the selectable date window. An empty start date defaults to its minimum.
    pub fn set_bounds(&mut self, range: DateRange) {
        if self.draft.start_date.is_none() {
            self.draft.start_date = range.min;
        }
        debug!(%range, "date bounds set");
        self.bounds = Some(range);
    }

    pub fn set_start_date(&mut self, date: Option<NaiveDate>) -> Result<(), FilterError> {
        self.check_bounds("start date", date)?;
        self.draft.start_date = date;
        Ok(())
    }

    pub fn set_end_date(&mut self, date: Option<NaiveDate>) -> Result<(), FilterError> {
        self.check_bounds("end date", date)?;
        self.draft.end_date = date;
        Ok(())
    }

    pub fn set_period(&mut self, period: Option<i64>) -> Result<(), FilterError> {
        if let Some(value) = period {
            if value < 1 {
                return Err(FilterError::InvalidPeriod(value));
            }
        }
        self.draft.period_index = period;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.draft = FilterCriteria::default();
    }

    pub fn is_dirty(&self) -> bool {
        self.draft != self.applied
    }

    /// Promotes the draft and returns the criteria to fetch with, even when unchanged.
    pub fn apply(&mut self) -> FilterCriteria {
        self.applied = self.draft.clone();
        self.applied.clone()
    }

    fn check_bounds(&self, field: &'static str, date: Option<NaiveDate>) -> Result<(), FilterError> {
        match (date, self.bounds) {
            (Some(date), Some(range)) if !range.contains(date) => Err(FilterError::OutOfBounds {
                field,
                date,
                min: range.min,
                max: range.max,
            }),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn edits_stay_in_draft_until_applied() {
        let mut state = FilterState::default();
        state.set_period(Some(3)).unwrap();
        assert!(state.is_dirty());
        assert_eq!(state.applied().period_index, None);

        let applied = state.apply();
        assert_eq!(applied.period_index, Some(3));
        assert_eq!(state.applied(), &applied);
        assert!(!state.is_dirty());
    }

    #[test]
    fn reapplying_unchanged_draft_still_returns_criteria() {
        let mut state = FilterState::default();
        assert_eq!(state.apply(), FilterCriteria::default());
        assert_eq!(state.apply(), FilterCriteria::default());
    }

    #[test]
    fn bounds_default_the_start_date() {
        let mut state = FilterState::default();
        state.set_bounds(DateRange {
            min: Some(date(2024, 1, 15)),
            max: Some(date(2024, 6, 30)),
        });
        assert_eq!(state.draft().start_date, Some(date(2024, 1, 15)));
    }

    #[test]
    fn bounds_keep_an_existing_start_date() {
        let mut state = FilterState::default();
        state.set_start_date(Some(date(2024, 3, 1))).unwrap();
        state.set_bounds(DateRange {
            min: Some(date(2024, 1, 15)),
            max: None,
        });
        assert_eq!(state.draft().start_date, Some(date(2024, 3, 1)));
    }

    #[test]
    fn rejects_dates_outside_bounds() {
        let mut state = FilterState::default();
        state.set_bounds(DateRange {
            min: Some(date(2024, 1, 15)),
            max: Some(date(2024, 6, 30)),
        });

        let err = state.set_end_date(Some(date(2024, 7, 1))).unwrap_err();
        assert!(matches!(err, FilterError::OutOfBounds { field: "end date", .. }));
        assert!(state.set_start_date(Some(date(2024, 1, 1))).is_err());
        assert!(state.set_start_date(None).is_ok());
    }

    #[test]
    fn start_after_end_is_accepted() {
        let mut state = FilterState::default();
        state.set_start_date(Some(date(2024, 5, 1))).unwrap();
        state.set_end_date(Some(date(2024, 4, 1))).unwrap();
        assert!(state.is_dirty());
    }

    #[test]
    fn rejects_non_positive_period() {
        let mut state = FilterState::default();
        assert_eq!(state.set_period(Some(0)), Err(FilterError::InvalidPeriod(0)));
        assert_eq!(state.draft().period_index, None);
    }

    #[test]
    fn reset_clears_draft_only() {
        let mut state = FilterState::default();
        state.set_period(Some(2)).unwrap();
        state.apply();
        state.reset();
        assert_eq!(state.draft(), &FilterCriteria::default());
        assert_eq!(state.applied().period_index, Some(2));
    }
}
