//! Time-series store access
//!
//! Statements go to the store as InfluxQL text and come back in the InfluxDB
//! 1.x JSON result shape. A statement the store refuses is not an `Err`: it
//! is a [`QueryResult`] carrying the store's error text, which callers may
//! surface verbatim. `Err` is reserved for failing to talk to the store.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tidewire_core::{RetentionDuration, RetentionPolicy};

/// Errors raised while talking to the store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store request failed: {0}")]
    Request(String),

    #[error("Store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Undecodable store response: {0}")]
    Decode(String),

    #[error("Store response could not be rendered: {0}")]
    Render(String),
}

/// Series of a statement result.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub values: Vec<Vec<serde_json::Value>>,
}

/// Result of one statement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatementResult {
    #[serde(default)]
    pub statement_id: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to a query request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub results: Vec<StatementResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Successful statement without series.
    pub fn empty() -> Self {
        Self::with_series(Vec::new())
    }

    pub fn with_series(series: Vec<Series>) -> Self {
        Self {
            results: vec![StatementResult {
                statement_id: 0,
                series,
                error: None,
            }],
            error: None,
        }
    }

    /// Statement refused by the store.
    pub fn statement_error(message: impl Into<String>) -> Self {
        Self {
            results: vec![StatementResult {
                statement_id: 0,
                series: Vec::new(),
                error: Some(message.into()),
            }],
            error: None,
        }
    }

    pub fn has_error(&self) -> bool {
        self.first_error().is_some()
    }

    /// Request-level error first, then the first statement error.
    pub fn first_error(&self) -> Option<&str> {
        self.error
            .as_deref()
            .or_else(|| self.results.iter().find_map(|r| r.error.as_deref()))
    }

    /// Rows of the first statement as column-name maps.
    pub fn rows(&self) -> Vec<IndexMap<String, serde_json::Value>> {
        let Some(statement) = self.results.first() else {
            return Vec::new();
        };
        statement
            .series
            .iter()
            .flat_map(|series| {
                series.values.iter().map(|row| {
                    series
                        .columns
                        .iter()
                        .cloned()
                        .zip(row.iter().cloned())
                        .collect::<IndexMap<_, _>>()
                })
            })
            .collect()
    }

    /// The response as the store sent it, for operator display.
    pub fn confirmation(&self) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|e| StoreError::Render(e.to_string()))
    }
}

/// Executes InfluxQL statements.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    async fn execute(&self, statement: &str) -> Result<QueryResult, StoreError>;
}

// =============================================================================
// In-memory store
// =============================================================================

const POLICY_COLUMNS: [&str; 5] = ["name", "duration", "shardGroupDuration", "replicaN", "default"];

struct MemoryState {
    policies: Vec<RetentionPolicy>,
    measurements: IndexMap<String, Series>,
    failing_drops: HashSet<String>,
    journal: Vec<String>,
}

/// In-process store interpreting the statements the data lake manager issues.
///
/// Starts like a fresh database: one `autogen` policy, infinite and default.
/// Every statement is appended to a journal before it is interpreted.
pub struct MemoryTimeSeriesStore {
    state: Mutex<MemoryState>,
}

impl Default for MemoryTimeSeriesStore {
    fn default() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                policies: vec![RetentionPolicy::new(
                    "autogen",
                    RetentionDuration::infinite(),
                    true,
                )],
                measurements: IndexMap::new(),
                failing_drops: HashSet::new(),
                journal: Vec::new(),
            }),
        }
    }
}

impl MemoryTimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a measurement holding `rows`; each row needs a `time` (RFC 3339) column.
    pub fn add_measurement(&self, name: &str, columns: &[&str], rows: Vec<Vec<serde_json::Value>>) {
        self.lock().measurements.insert(
            name.to_string(),
            Series {
                name: name.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                values: rows,
            },
        );
    }

    /// Make `DROP MEASUREMENT` of `name` report an error.
    pub fn fail_drop(&self, name: &str) {
        self.lock().failing_drops.insert(name.to_string());
    }

    pub fn policies(&self) -> Vec<RetentionPolicy> {
        self.lock().policies.clone()
    }

    pub fn measurement_names(&self) -> Vec<String> {
        self.lock().measurements.keys().cloned().collect()
    }

    /// Statements received so far, in order.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    fn interpret(state: &mut MemoryState, tokens: &[String]) -> QueryResult {
        let words: Vec<String> = tokens.iter().map(|t| t.to_ascii_uppercase()).collect();
        let words: Vec<&str> = words.iter().map(String::as_str).collect();

        match words.as_slice() {
            ["SHOW", "RETENTION", "POLICIES", ..] => Self::show_policies(state),
            ["SHOW", "MEASUREMENTS", ..] => {
                let values = state
                    .measurements
                    .keys()
                    .map(|name| vec![serde_json::Value::from(name.as_str())])
                    .collect::<Vec<_>>();
                if values.is_empty() {
                    return QueryResult::empty();
                }
                QueryResult::with_series(vec![Series {
                    name: "measurements".to_string(),
                    columns: vec!["name".to_string()],
                    values,
                }])
            }
            [
                op @ ("CREATE" | "ALTER"),
                "RETENTION",
                "POLICY",
                _,
                "ON",
                _,
                "DURATION",
                _,
                rest @ ..,
            ] => {
                let name = &tokens[3];
                let duration = RetentionDuration::new(tokens[7].as_str());
                let make_default = rest.contains(&"DEFAULT");
                Self::write_policy(state, op, name, duration, make_default)
            }
            ["DROP", "RETENTION", "POLICY", _, "ON", _] => {
                let name = &tokens[3];
                state.policies.retain(|p| &p.name != name);
                QueryResult::empty()
            }
            ["DROP", "MEASUREMENT", _] => {
                let name = &tokens[2];
                if state.failing_drops.contains(name) {
                    return QueryResult::statement_error(format!(
                        "failed to drop measurement {}",
                        name
                    ));
                }
                state.measurements.shift_remove(name);
                QueryResult::empty()
            }
            [
                "SELECT", "*", "FROM", _, "WHERE", "TIME", ">", "NOW()", "-", _, "ORDER",
                "BY", "TIME",
            ] => Self::select_recent(state, &tokens[3], &tokens[9]),
            _ => QueryResult::statement_error(format!(
                "error parsing query: unsupported statement {}",
                tokens.join(" ")
            )),
        }
    }

    fn show_policies(state: &MemoryState) -> QueryResult {
        let values = state
            .policies
            .iter()
            .map(|p| {
                vec![
                    serde_json::Value::from(p.name.as_str()),
                    serde_json::Value::from(p.duration.as_str()),
                    serde_json::Value::from("168h0m0s"),
                    serde_json::Value::from(1),
                    serde_json::Value::from(p.is_default),
                ]
            })
            .collect();
        QueryResult::with_series(vec![Series {
            name: String::new(),
            columns: POLICY_COLUMNS.iter().map(|c| c.to_string()).collect(),
            values,
        }])
    }

    fn write_policy(
        state: &mut MemoryState,
        op: &str,
        name: &str,
        duration: RetentionDuration,
        make_default: bool,
    ) -> QueryResult {
        let existing = state.policies.iter().position(|p| p.name == name);
        match (op, existing) {
            ("CREATE", Some(_)) => {
                return QueryResult::statement_error("retention policy already exists")
            }
            ("ALTER", None) => return QueryResult::statement_error("retention policy not found"),
            ("CREATE", None) => state
                .policies
                .push(RetentionPolicy::new(name, duration, false)),
            (_, Some(index)) => state.policies[index].duration = duration,
            _ => {}
        }
        if make_default {
            for policy in &mut state.policies {
                policy.is_default = policy.name == name;
            }
        }
        QueryResult::empty()
    }

    fn select_recent(state: &MemoryState, measure: &str, window: &str) -> QueryResult {
        let Some(window) = parse_window(window) else {
            return QueryResult::statement_error(format!("invalid duration {}", window));
        };
        let Some(series) = state.measurements.get(measure) else {
            return QueryResult::empty();
        };
        let cutoff = Utc::now() - window;
        let time_column = series.columns.iter().position(|c| c == "time");

        let mut values: Vec<(DateTime<Utc>, Vec<serde_json::Value>)> = series
            .values
            .iter()
            .filter_map(|row| {
                let time = row.get(time_column?)?.as_str()?;
                let time = DateTime::parse_from_rfc3339(time).ok()?.with_timezone(&Utc);
                (time > cutoff).then(|| (time, row.clone()))
            })
            .collect();
        values.sort_by_key(|(time, _)| *time);

        if values.is_empty() {
            return QueryResult::empty();
        }
        QueryResult::with_series(vec![Series {
            name: series.name.clone(),
            columns: series.columns.clone(),
            values: values.into_iter().map(|(_, row)| row).collect(),
        }])
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryTimeSeriesStore {
    async fn execute(&self, statement: &str) -> Result<QueryResult, StoreError> {
        let mut state = self.lock();
        state.journal.push(statement.to_string());
        let tokens = tokenize(statement);
        Ok(Self::interpret(&mut state, &tokens))
    }
}

/// Split on whitespace; double-quoted identifiers become one unquoted token.
fn tokenize(statement: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = statement.chars();
    let mut quoted = false;

    while let Some(c) = chars.next() {
        match c {
            '"' => quoted = !quoted,
            '\\' if quoted => {
                if let Some(escaped) = chars.next() {
                    current.push(escaped);
                }
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// Single-unit duration literal such as `10m` or `0s`.
fn parse_window(literal: &str) -> Option<Duration> {
    let split = literal.find(|c: char| !c.is_ascii_digit())?;
    let (value, unit) = literal.split_at(split);
    let value: i64 = value.parse().ok()?;
    match unit {
        "ns" => Some(Duration::nanoseconds(value)),
        "u" => Some(Duration::microseconds(value)),
        "ms" => Some(Duration::milliseconds(value)),
        "s" => Duration::try_seconds(value),
        "m" => Duration::try_minutes(value),
        "h" => Duration::try_hours(value),
        "d" => Duration::try_days(value),
        "w" => Duration::try_weeks(value),
        _ => None,
    }
}
