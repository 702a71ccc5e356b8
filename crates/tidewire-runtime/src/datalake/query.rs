//! InfluxQL statements issued by the data lake manager

use std::fmt;
use tidewire_core::RetentionDuration;

/// Database holding the platform's measurements.
pub const DEFAULT_DATABASE: &str = "sp";

/// Policy created for operator-tuned retention.
pub const CUSTOM_POLICY: &str = "custom";

/// Policy every database starts with.
pub const AUTOGEN_POLICY: &str = "autogen";

/// Time units accepted by duration literals.
pub const TIME_UNITS: [&str; 8] = ["ns", "u", "ms", "s", "m", "h", "d", "w"];

/// Errors raised while building a statement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("Unknown time unit {0:?} (expected one of ns, u, ms, s, m, h, d, w)")]
    InvalidUnit(String),

    #[error("Empty identifier")]
    EmptyIdentifier,
}

/// Quote an identifier when it is not a plain `[A-Za-z_][A-Za-z0-9_]*` word.
pub fn quote_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Kind of retention policy change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionOp {
    Create,
    Alter,
    Drop,
    /// Make the policy the default one, resetting its duration.
    Default,
}

impl RetentionOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetentionOp::Create => "CREATE",
            RetentionOp::Alter => "ALTER",
            RetentionOp::Drop => "DROP",
            RetentionOp::Default => "DEFAULT",
        }
    }
}

impl fmt::Display for RetentionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change to one named retention policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicyCommand {
    pub op: RetentionOp,
    pub name: String,
    /// Ignored by `DROP`.
    pub duration: RetentionDuration,
}

impl RetentionPolicyCommand {
    pub fn new(op: RetentionOp, name: &str, duration: RetentionDuration) -> Self {
        Self {
            op,
            name: name.to_string(),
            duration,
        }
    }

    /// Render against `database`.
    ///
    /// `DEFAULT` has no InfluxQL keyword of its own; it is an `ALTER` carrying
    /// the `DEFAULT` flag.
    pub fn to_influxql(&self, database: &str) -> String {
        let name = quote_ident(&self.name);
        let db = quote_ident(database);
        match self.op {
            RetentionOp::Create | RetentionOp::Alter => format!(
                "{} RETENTION POLICY {} ON {} DURATION {} REPLICATION 1 DEFAULT",
                self.op, name, db, self.duration
            ),
            RetentionOp::Drop => format!("DROP RETENTION POLICY {} ON {}", name, db),
            RetentionOp::Default => format!(
                "ALTER RETENTION POLICY {} ON {} DURATION {} REPLICATION 1 DEFAULT",
                name, db, self.duration
            ),
        }
    }
}

pub fn show_retention_policies(database: &str) -> String {
    format!("SHOW RETENTION POLICIES ON {}", quote_ident(database))
}

pub fn show_measurements(database: &str) -> String {
    format!("SHOW MEASUREMENTS ON {}", quote_ident(database))
}

pub fn drop_measurement(measure: &str) -> String {
    format!("DROP MEASUREMENT {}", quote_ident(measure))
}

/// Read of the most recent events of a measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventsFromNow {
    pub measure: String,
    pub value: u64,
    pub unit: String,
}

impl EventsFromNow {
    pub fn new(measure: &str, value: u64, unit: &str) -> Result<Self, QueryError> {
        if measure.is_empty() {
            return Err(QueryError::EmptyIdentifier);
        }
        if !TIME_UNITS.contains(&unit) {
            return Err(QueryError::InvalidUnit(unit.to_string()));
        }
        Ok(Self {
            measure: measure.to_string(),
            value,
            unit: unit.to_string(),
        })
    }

    pub fn to_influxql(&self) -> String {
        format!(
            "SELECT * FROM {} WHERE time > now() - {}{} ORDER BY time",
            quote_ident(&self.measure),
            self.value,
            self.unit
        )
    }
}
