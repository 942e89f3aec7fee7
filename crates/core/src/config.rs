#![forbid(unsafe_code)]

/// The closed set of tunables stored in the `config` table.
///
/// Unknown keys are rejected at the edge; values are coerced to their
/// declared type before they are persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigKey {
    MaxRetries,
    BackoffBase,
    PollIntervalMs,
    LockTimeoutS,
    JobTimeoutS,
    MaxBackoffS,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigValueError {
    pub key: &'static str,
    pub expected: &'static str,
}

impl std::fmt::Display for ConfigValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid value for {} (expected {})", self.key, self.expected)
    }
}

impl std::error::Error for ConfigValueError {}

impl ConfigKey {
    pub const ALL: [ConfigKey; 6] = [
        ConfigKey::MaxRetries,
        ConfigKey::BackoffBase,
        ConfigKey::PollIntervalMs,
        ConfigKey::LockTimeoutS,
        ConfigKey::JobTimeoutS,
        ConfigKey::MaxBackoffS,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::MaxRetries => "max_retries",
            ConfigKey::BackoffBase => "backoff_base",
            ConfigKey::PollIntervalMs => "poll_interval_ms",
            ConfigKey::LockTimeoutS => "lock_timeout_s",
            ConfigKey::JobTimeoutS => "job_timeout_s",
            ConfigKey::MaxBackoffS => "max_backoff_s",
        }
    }

    pub fn parse(raw: &str) -> Option<ConfigKey> {
        let trimmed = raw.trim();
        ConfigKey::ALL.into_iter().find(|k| k.as_str() == trimmed)
    }

    pub fn default_value(self) -> &'static str {
        match self {
            ConfigKey::MaxRetries => "3",
            ConfigKey::BackoffBase => "2.0",
            ConfigKey::PollIntervalMs => "500",
            ConfigKey::LockTimeoutS => "300",
            ConfigKey::JobTimeoutS => "0",
            ConfigKey::MaxBackoffS => "3600",
        }
    }

    fn expected(self) -> &'static str {
        match self {
            ConfigKey::MaxRetries | ConfigKey::JobTimeoutS => "integer >= 0",
            ConfigKey::BackoffBase => "float > 1",
            ConfigKey::PollIntervalMs | ConfigKey::LockTimeoutS | ConfigKey::MaxBackoffS => {
                "integer > 0"
            }
        }
    }

    /// Coerce a raw string to this key's type, returning the canonical form
    /// that gets persisted.
    pub fn coerce(self, raw: &str) -> Result<String, ConfigValueError> {
        let trimmed = raw.trim();
        let err = || ConfigValueError {
            key: self.as_str(),
            expected: self.expected(),
        };
        match self {
            ConfigKey::MaxRetries | ConfigKey::JobTimeoutS => {
                let value: i64 = trimmed.parse().map_err(|_| err())?;
                if value < 0 {
                    return Err(err());
                }
                Ok(value.to_string())
            }
            ConfigKey::PollIntervalMs | ConfigKey::LockTimeoutS | ConfigKey::MaxBackoffS => {
                let value: i64 = trimmed.parse().map_err(|_| err())?;
                if value <= 0 {
                    return Err(err());
                }
                Ok(value.to_string())
            }
            ConfigKey::BackoffBase => {
                let value: f64 = trimmed.parse().map_err(|_| err())?;
                if !value.is_finite() || value <= 1.0 {
                    return Err(err());
                }
                Ok(value.to_string())
            }
        }
    }
}
