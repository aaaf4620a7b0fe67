use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// One cohort × fortnight observation as served by `/cohorts_data/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    #[serde(rename = "nombre_cohorte")]
    pub cohort_name: String,
    #[serde(rename = "quincena")]
    pub period_index: i64,
    #[serde(rename = "porcentaje_activas", deserialize_with = "lenient_number")]
    pub active_percentage: f64,
    #[serde(rename = "cantidad_activas")]
    pub active_count: u64,
    #[serde(flatten)]
    pub extras: RecordExtras,
}

/// Optional fields carried from a record onto its matrix cell untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordExtras {
    #[serde(rename = "fecha", default, skip_serializing_if = "Option::is_none")]
    pub period_date: Option<NaiveDate>,
    #[serde(rename = "tipo_linea", default, skip_serializing_if = "Option::is_none")]
    pub contract_type: Option<String>,
    #[serde(
        rename = "total_vendido",
        default,
        deserialize_with = "lenient_optional_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub total_sold: Option<f64>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

// SQL decimals reach us either as JSON numbers or as strings like "80.50".
#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(f64),
    Text(String),
}

impl NumberOrText {
    fn into_f64<E: serde::de::Error>(self) -> Result<f64, E> {
        match self {
            NumberOrText::Number(value) => Ok(value),
            NumberOrText::Text(text) => match text.trim().parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(value),
                _ => Err(E::custom(format!("expected a number, found {text:?}"))),
            },
        }
    }
}

fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    NumberOrText::deserialize(deserializer)?.into_f64()
}

fn lenient_optional_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<NumberOrText>::deserialize(deserializer)? {
        Some(value) => value.into_f64().map(Some),
        None => Ok(None),
    }
}

/// Filters forwarded to the record source. Date order is not checked here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterCriteria {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub period_index: Option<i64>,
}

impl FilterCriteria {
    /// Query parameters for `/cohorts_data/`; unset filters are omitted.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(date) = self.start_date {
            pairs.push(("start_date", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(date) = self.end_date {
            pairs.push(("end_date", date.format("%Y-%m-%d").to_string()));
        }
        if let Some(period) = self.period_index {
            pairs.push(("quincena", period.to_string()));
        }
        pairs
    }

    pub fn is_unfiltered(&self) -> bool {
        self.start_date.is_none() && self.end_date.is_none() && self.period_index.is_none()
    }

    /// Local evaluation used by snapshot sources. Records without a date pass date filters.
    pub fn matches(&self, record: &ActivityRecord) -> bool {
        if let Some(period) = self.period_index {
            if record.period_index != period {
                return false;
            }
        }
        match record.extras.period_date {
            Some(date) => {
                self.start_date.map_or(true, |start| date >= start)
                    && self.end_date.map_or(true, |end| date <= end)
            }
            None => true,
        }
    }
}

impl fmt::Display for FilterCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unfiltered() {
            return write!(f, "all records");
        }

        let mut parts = Vec::new();
        if let Some(date) = self.start_date {
            parts.push(format!("from {date}"));
        }
        if let Some(date) = self.end_date {
            parts.push(format!("until {date}"));
        }
        if let Some(period) = self.period_index {
            parts.push(format!("fortnight Q{period}"));
        }
        write!(f, "{}", parts.join(", "))
    }
}

/// Selectable date window reported by `/cohorts_date_range/`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(rename = "min_fecha", default)]
    pub min: Option<NaiveDate>,
    #[serde(rename = "max_fecha", default)]
    pub max: Option<NaiveDate>,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.min.map_or(true, |min| date >= min) && self.max.map_or(true, |max| date <= max)
    }

    pub fn from_records(records: &[ActivityRecord]) -> Self {
        let dates = records.iter().filter_map(|record| record.extras.period_date);
        let (min, max) = dates.fold((None, None), |(min, max): (Option<NaiveDate>, Option<NaiveDate>), date| {
            (
                Some(min.map_or(date, |current| current.min(date))),
                Some(max.map_or(date, |current| current.max(date))),
            )
        });
        Self { min, max }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) => write!(f, "{min} .. {max}"),
            (Some(min), None) => write!(f, "{min} .. (open)"),
            (None, Some(max)) => write!(f, "(open) .. {max}"),
            (None, None) => write!(f, "no dated records"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortSummary {
    pub cohort: String,
    pub cell_count: usize,
    pub first_retention: f64,
    pub latest_period: i64,
    pub latest_retention: f64,
    pub latest_active_count: u64,
    pub mean_retention: f64,
}
