//! InfluxDB 1.x HTTP store

use super::query::DEFAULT_DATABASE;
use super::store::{QueryResult, StoreError, TimeSeriesStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Connection settings of an InfluxDB server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8086".to_string(),
            database: DEFAULT_DATABASE.to_string(),
            username: None,
            password: None,
            timeout_ms: 10_000,
        }
    }
}

impl fmt::Debug for InfluxConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfluxConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

impl InfluxConfig {
    pub fn new(url: &str, database: &str) -> Self {
        Self {
            url: url.to_string(),
            database: database.to_string(),
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Endpoint statements are posted to.
    pub fn query_url(&self) -> String {
        format!("{}/query", self.url.trim_end_matches('/'))
    }
}

/// Store speaking the InfluxDB 1.x `/query` API.
pub struct InfluxStore {
    config: InfluxConfig,
    client: reqwest::Client,
}

impl InfluxStore {
    pub fn new(config: InfluxConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }

    fn params(&self) -> Vec<(&'static str, &str)> {
        let mut params = vec![("db", self.config.database.as_str())];
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            params.push(("u", user.as_str()));
            params.push(("p", pass.as_str()));
        }
        params
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxStore {
    async fn execute(&self, statement: &str) -> Result<QueryResult, StoreError> {
        debug!("POST {} ({} bytes)", self.config.query_url(), statement.len());
        let response = self
            .client
            .post(self.config.query_url())
            .query(&self.params())
            .form(&[("q", statement)])
            .send()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Request(e.to_string()))?;

        match serde_json::from_str::<QueryResult>(&body) {
            // Refused statements come back as 4xx with an `error` field.
            Ok(result) if status.is_success() || result.has_error() => Ok(result),
            _ if !status.is_success() => Err(StoreError::Status {
                status: status.as_u16(),
                body,
            }),
            Ok(result) => Ok(result),
            Err(e) => Err(StoreError::Decode(e.to_string())),
        }
    }
}
