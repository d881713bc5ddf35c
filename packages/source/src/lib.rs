#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Collision data source trait and normalization logic.
//!
//! A [`CollisionSource`] knows how to pull a recent window of raw records
//! from its provider and flatten them into a
//! [`CollisionTable`](collision_digest_collision_models::CollisionTable).

pub mod normalize;
pub mod progress;
pub mod socrata;

use async_trait::async_trait;
use chrono::NaiveDate;
use collision_digest_collision_models::CollisionTable;
use serde_json::Value;

use crate::progress::ProgressCallback;
use crate::socrata::{SocrataConfig, fetch_socrata};

/// Errors that can occur during data source operations.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The provider answered with something other than a record list.
    #[error("Unexpected response: {message}")]
    UnexpectedResponse {
        /// Description of what went wrong.
        message: String,
    },

    /// The provider returned no records for the requested window.
    #[error("No data retrieved from {source_name}")]
    NoData {
        /// Human-readable name of the source.
        source_name: String,
    },
}

/// Configuration for fetching data from a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    /// Only fetch records dated on or after this day.
    pub since: NaiveDate,
    /// Maximum number of records to fetch.
    pub limit: Option<u64>,
}

/// Trait that all collision data sources implement.
#[async_trait]
pub trait CollisionSource: Send + Sync {
    /// Returns the human-readable name of this source.
    fn name(&self) -> &str;

    /// Downloads raw records for the requested window.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the download fails.
    async fn fetch(
        &self,
        options: &FetchOptions,
        progress: &dyn ProgressCallback,
    ) -> Result<Vec<Value>, SourceError>;

    /// Downloads and normalizes records into a table.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NoData`] if the window is empty, or any error
    /// from [`CollisionSource::fetch`].
    async fn fetch_table(
        &self,
        options: &FetchOptions,
        progress: &dyn ProgressCallback,
    ) -> Result<CollisionTable, SourceError> {
        let records = self.fetch(options, progress).await?;
        if records.is_empty() {
            return Err(SourceError::NoData {
                source_name: self.name().to_string(),
            });
        }
        let table = normalize::records_to_table(&records);
        log::info!(
            "Normalized {} records into {} columns",
            table.len(),
            table.columns().len()
        );
        Ok(table)
    }
}

/// A collision source backed by a Socrata dataset.
pub struct SocrataCollisionSource {
    config: SocrataConfig,
    client: reqwest::Client,
}

impl SocrataCollisionSource {
    /// Creates a source for the given Socrata dataset.
    #[must_use]
    pub fn new(config: SocrataConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl CollisionSource for SocrataCollisionSource {
    fn name(&self) -> &str {
        &self.config.label
    }

    async fn fetch(
        &self,
        options: &FetchOptions,
        progress: &dyn ProgressCallback,
    ) -> Result<Vec<Value>, SourceError> {
        fetch_socrata(&self.client, &self.config, options, progress).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgress;

    #[tokio::test]
    async fn empty_window_is_no_data() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/resource/h9gi-nx95.json")
            .match_query(mockito::Matcher::Any)
            .with_body("[]")
            .create_async()
            .await;

        let source = SocrataCollisionSource::new(SocrataConfig {
            api_url: format!("{}/resource/h9gi-nx95.json", server.url()),
            ..SocrataConfig::nyc_collisions()
        });
        let options = FetchOptions {
            since: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            limit: Some(1000),
        };

        let err = source.fetch_table(&options, &NullProgress).await.unwrap_err();
        assert!(matches!(err, SourceError::NoData { .. }));
    }

    #[tokio::test]
    async fn normalizes_fetched_records() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/resource/h9gi-nx95.json")
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"[{"crash_date": "2024-03-02T00:00:00.000", "borough": "BROOKLYN",
                     "latitude": "40.6782", "longitude": "-73.9442"}]"#,
            )
            .create_async()
            .await;

        let source = SocrataCollisionSource::new(SocrataConfig {
            api_url: format!("{}/resource/h9gi-nx95.json", server.url()),
            ..SocrataConfig::nyc_collisions()
        });
        let options = FetchOptions {
            since: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            limit: Some(1000),
        };

        let table = source.fetch_table(&options, &NullProgress).await.unwrap();
        assert_eq!(table.len(), 1);
        assert!(table.records()[0].coordinates.is_some());
    }
}
