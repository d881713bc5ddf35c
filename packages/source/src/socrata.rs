//! Socrata SODA API fetcher.
//!
//! Pages through a dataset with `$where`/`$order`/`$limit`/`$offset`,
//! newest records first, until the requested limit is reached or the
//! server returns a short page.

use serde_json::Value;

use crate::progress::ProgressCallback;
use crate::{FetchOptions, SourceError};

/// NYC Open Data "Motor Vehicle Collisions - Crashes" resource.
pub const NYC_COLLISIONS_URL: &str = "https://data.cityofnewyork.us/resource/h9gi-nx95.json";

/// Date column of the NYC collisions dataset.
pub const NYC_COLLISIONS_DATE_COLUMN: &str = "crash_date";

/// Configuration for a Socrata fetch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocrataConfig {
    /// Resource URL (e.g., `"https://data.cityofnewyork.us/resource/h9gi-nx95.json"`).
    pub api_url: String,
    /// Date column used for the `$where` window and `$order`.
    pub date_column: String,
    /// Label for log messages (e.g., `"NYC collisions"`).
    pub label: String,
    /// Records requested per page.
    pub page_size: u64,
}

impl SocrataConfig {
    /// Configuration for the NYC collisions dataset.
    #[must_use]
    pub fn nyc_collisions() -> Self {
        Self {
            api_url: NYC_COLLISIONS_URL.to_string(),
            date_column: NYC_COLLISIONS_DATE_COLUMN.to_string(),
            label: "NYC collisions".to_string(),
            page_size: 1000,
        }
    }

    /// Builds the SoQL query parameters for one page.
    #[must_use]
    pub fn page_query(
        &self,
        options: &FetchOptions,
        offset: u64,
        limit: u64,
    ) -> Vec<(String, String)> {
        vec![
            (
                "$where".to_string(),
                format!(
                    "{} >= '{}'",
                    self.date_column,
                    options.since.format("%Y-%m-%d")
                ),
            ),
            ("$order".to_string(), format!("{} DESC, :id", self.date_column)),
            ("$limit".to_string(), limit.to_string()),
            ("$offset".to_string(), offset.to_string()),
        ]
    }
}

/// Fetches records from a Socrata dataset with pagination and returns them
/// as raw JSON objects, newest first.
///
/// # Errors
///
/// Returns [`SourceError`] if a request fails, the server responds with an
/// error status, or a page is not a JSON array.
pub async fn fetch_socrata(
    client: &reqwest::Client,
    config: &SocrataConfig,
    options: &FetchOptions,
    progress: &dyn ProgressCallback,
) -> Result<Vec<Value>, SourceError> {
    let mut all_records: Vec<Value> = Vec::new();
    let mut offset: u64 = 0;
    let fetch_limit = options.limit.unwrap_or(u64::MAX);
    let page_size = config.page_size.max(1);

    if let Some(limit) = options.limit {
        progress.set_total(limit);
    }

    loop {
        let remaining = fetch_limit.saturating_sub(offset);
        if remaining == 0 {
            break;
        }
        let page_limit = remaining.min(page_size);

        log::info!(
            "Fetching {} data: offset={offset}, limit={page_limit}",
            config.label
        );
        progress.set_message(format!("{} (offset {offset})", config.label));

        let response = client
            .get(&config.api_url)
            .query(&config.page_query(options, offset, page_limit))
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        let page: Value = serde_json::from_str(&body)?;
        let Value::Array(records) = page else {
            return Err(SourceError::UnexpectedResponse {
                message: format!("expected a JSON array from {}", config.api_url),
            });
        };

        let count = records.len() as u64;
        if count == 0 {
            break;
        }

        all_records.extend(records);
        offset += count;
        progress.inc(count);

        if count < page_limit {
            break;
        }
    }

    log::info!(
        "Downloaded {} {} records total",
        all_records.len(),
        config.label
    );
    progress.finish(format!("{}: {} records", config.label, all_records.len()));

    Ok(all_records)
}
