use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::error::SourceError;
use crate::models::{ActivityRecord, DateRange, FilterCriteria, RecordExtras};

/// Anything that can answer the two backend queries the heatmap needs.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_records(
        &self,
        criteria: &FilterCriteria,
    ) -> Result<Vec<ActivityRecord>, SourceError>;

    async fn fetch_date_range(&self) -> Result<DateRange, SourceError>;

    fn describe(&self) -> String;
}

pub fn decode_records(origin: &str, body: &str) -> Result<Vec<ActivityRecord>, SourceError> {
    serde_json::from_str(body).map_err(|source| SourceError::Malformed {
        origin: origin.to_string(),
        source,
    })
}

pub fn decode_date_range(origin: &str, body: &str) -> Result<DateRange, SourceError> {
    serde_json::from_str(body).map_err(|source| SourceError::Malformed {
        origin: origin.to_string(),
        source,
    })
}

/// Client for the cohort backend (`/cohorts_data/`, `/cohorts_date_range/`).
pub struct HttpRecordSource {
    client: Client,
    config: ApiConfig,
}

impl HttpRecordSource {
    pub fn new(config: ApiConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("cohort-heatmap/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(SourceError::Client)?;

        Ok(Self { client, config })
    }

    async fn get_text(&self, url: &str, query: &[(&'static str, String)]) -> Result<String, SourceError> {
        let request_id = Uuid::new_v4();
        debug!(%request_id, url, ?query, "sending request");

        let response = self
            .client
            .get(url)
            .query(query)
            .header("x-request-id", request_id.to_string())
            .send()
            .await
            .map_err(|source| SourceError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: url.to_string(),
                status,
            });
        }

        let body = response.text().await.map_err(|source| SourceError::Transport {
            url: url.to_string(),
            source,
        })?;
        debug!(%request_id, bytes = body.len(), "response received");
        Ok(body)
    }
}

#[async_trait]
impl RecordSource for HttpRecordSource {
    async fn fetch_records(
        &self,
        criteria: &FilterCriteria,
    ) -> Result<Vec<ActivityRecord>, SourceError> {
        let url = self.config.records_url();
        let body = self.get_text(&url, &criteria.query_pairs()).await?;
        let records = decode_records(&url, &body)?;
        info!(count = records.len(), filters = %criteria, "fetched cohort records");
        Ok(records)
    }

    async fn fetch_date_range(&self) -> Result<DateRange, SourceError> {
        let url = self.config.date_range_url();
        let body = self.get_text(&url, &[]).await?;
        decode_date_range(&url, &body)
    }

    fn describe(&self) -> String {
        self.config.base_url.clone()
    }
}

/// Offline snapshot of `/cohorts_data/`, either its JSON array or a CSV with the same headers.
pub struct FileRecordSource {
    path: PathBuf,
}

impl FileRecordSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn is_csv(&self) -> bool {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"))
    }

    async fn load(&self) -> Result<Vec<ActivityRecord>, SourceError> {
        if self.is_csv() {
            return load_csv(&self.path);
        }

        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;
        decode_records(&self.path.display().to_string(), &body)
    }
}

fn load_csv(path: &Path) -> Result<Vec<ActivityRecord>, SourceError> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        nombre_cohorte: String,
        quincena: i64,
        porcentaje_activas: f64,
        cantidad_activas: u64,
        #[serde(default)]
        fecha: Option<NaiveDate>,
        #[serde(default)]
        tipo_linea: Option<String>,
        #[serde(default)]
        total_vendido: Option<f64>,
    }

    let csv_error = |source: csv::Error| SourceError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
    let mut records = Vec::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result.map_err(csv_error)?;
        records.push(ActivityRecord {
            cohort_name: row.nombre_cohorte,
            period_index: row.quincena,
            active_percentage: row.porcentaje_activas,
            active_count: row.cantidad_activas,
            extras: RecordExtras {
                period_date: row.fecha,
                contract_type: row.tipo_linea.filter(|value| !value.is_empty()),
                total_sold: row.total_vendido,
                ..RecordExtras::default()
            },
        });
    }

    Ok(records)
}

#[async_trait]
impl RecordSource for FileRecordSource {
    async fn fetch_records(
        &self,
        criteria: &FilterCriteria,
    ) -> Result<Vec<ActivityRecord>, SourceError> {
        let records: Vec<ActivityRecord> = self
            .load()
            .await?
            .into_iter()
            .filter(|record| criteria.matches(record))
            .collect();
        info!(count = records.len(), filters = %criteria, path = %self.path.display(), "loaded cohort records");
        Ok(records)
    }

    async fn fetch_date_range(&self) -> Result<DateRange, SourceError> {
        let records = self.load().await?;
        Ok(DateRange::from_records(&records))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
