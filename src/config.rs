use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Where the cohort backend lives and how long a single request may take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl ApiConfig {
    pub fn new(base_url: &str, timeout_secs: u64) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }

    pub fn records_url(&self) -> String {
        format!("{}/cohorts_data/", self.base_url)
    }

    pub fn date_range_url(&self) -> String {
        format!("{}/cohorts_date_range/", self.base_url)
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL, DEFAULT_TIMEOUT_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_urls_tolerate_trailing_slash() {
        let config = ApiConfig::new("http://backend:8000/", 10);
        assert_eq!(config.records_url(), "http://backend:8000/cohorts_data/");
        assert_eq!(
            config.date_range_url(),
            "http://backend:8000/cohorts_date_range/"
        );
    }

    #[test]
    fn zero_timeout_is_raised_to_one_second() {
        assert_eq!(ApiConfig::new(DEFAULT_API_URL, 0).timeout, Duration::from_secs(1));
        assert_eq!(ApiConfig::default().timeout, Duration::from_secs(30));
    }
}
