#![forbid(unsafe_code)]

use serde::Deserialize;

use crate::timeutil;

const MAX_JOB_ID_LEN: usize = 255;

/// One enqueue request as supplied by the caller (CLI argument or file).
///
/// Unknown fields are rejected; optional knobs fall back to the config
/// snapshot captured at enqueue time.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnqueueSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub command: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub run_at: Option<String>,
    #[serde(default)]
    pub timeout_s: Option<i64>,
    #[serde(default)]
    pub max_retries: Option<i64>,
    #[serde(default)]
    pub backoff_base: Option<f64>,
}

#[derive(Debug)]
pub enum PayloadError {
    Json(serde_json::Error),
    Invalid(&'static str),
}

impl std::fmt::Display for PayloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(err) => write!(f, "invalid json: {err}"),
            Self::Invalid(message) => write!(f, "invalid payload: {message}"),
        }
    }
}

impl std::error::Error for PayloadError {}

impl From<serde_json::Error> for PayloadError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

impl EnqueueSpec {
    pub fn validate(&self) -> Result<(), PayloadError> {
        if let Some(id) = self.id.as_deref() {
            let trimmed = id.trim();
            if trimmed.is_empty() {
                return Err(PayloadError::Invalid("id must not be empty"));
            }
            if trimmed.len() > MAX_JOB_ID_LEN {
                return Err(PayloadError::Invalid("id is too long"));
            }
        }
        if self.command.trim().is_empty() {
            return Err(PayloadError::Invalid("command must not be empty"));
        }
        if let Some(timeout_s) = self.timeout_s {
            if timeout_s < 0 {
                return Err(PayloadError::Invalid("timeout_s must be >= 0"));
            }
        }
        if let Some(max_retries) = self.max_retries {
            if max_retries < 0 {
                return Err(PayloadError::Invalid("max_retries must be >= 0"));
            }
        }
        if let Some(base) = self.backoff_base {
            if !base.is_finite() || base <= 1.0 {
                return Err(PayloadError::Invalid("backoff_base must be > 1"));
            }
        }
        if let Some(raw) = self.run_at.as_deref() {
            if timeutil::parse_rfc3339_ms(raw).is_none() {
                return Err(PayloadError::Invalid("run_at must be an RFC 3339 timestamp"));
            }
        }
        Ok(())
    }

    /// Earliest-eligible instant in epoch millis, if the caller supplied one.
    ///
    /// Call after [`validate`](Self::validate); an unparseable value yields
    /// `None` here rather than an error.
    pub fn run_at_ms(&self) -> Option<i64> {
        self.run_at.as_deref().and_then(timeutil::parse_rfc3339_ms)
    }
}

/// Parse an enqueue payload: a single JSON object or an array of them.
pub fn parse_enqueue_payload(text: &str) -> Result<Vec<EnqueueSpec>, PayloadError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let specs: Vec<EnqueueSpec> = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value)?,
        serde_json::Value::Object(_) => vec![serde_json::from_value(value)?],
        _ => return Err(PayloadError::Invalid("payload must be an object or array")),
    };
    if specs.is_empty() {
        return Err(PayloadError::Invalid("payload array must not be empty"));
    }
    for spec in &specs {
        spec.validate()?;
    }
    Ok(specs)
}
