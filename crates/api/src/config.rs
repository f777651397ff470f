use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use axum::http::HeaderValue;
use longrun_core::progress::{PersistPolicy, DEFAULT_PERSIST_EVERY};
use longrun_engine::api::EngineConfig;
use longrun_pipeline::orchestrator::OrchestratorConfig;

/// Errors raised while loading [`ServerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Graceful shutdown timeout in seconds (default: `30`).
    pub shutdown_timeout_secs: u64,
    pub database_url: String,
    pub engine_base_url: String,
    pub engine_api_key: String,
    /// Client timeout for engine calls (default: 2 hours).
    pub engine_timeout_secs: u64,
    /// Stream events between intermediate log writes.
    pub stream_persist_every: u64,
    /// Poll interval of the job progress event stream.
    pub sse_poll_interval_ms: u64,
    /// Engine log sync period; `0` disables the background sync.
    pub log_sync_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                 |
    /// |-------------------------|-------------------------|
    /// | `HOST`                  | `0.0.0.0`               |
    /// | `PORT`                  | `3000`                  |
    /// | `CORS_ORIGINS`          | `http://localhost:5173` |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                    |
    /// | `SHUTDOWN_TIMEOUT_SECS` | `30`                    |
    /// | `DATABASE_URL`          | required                |
    /// | `ENGINE_API_BASE_URL`   | required                |
    /// | `ENGINE_API_KEY`        | required                |
    /// | `ENGINE_TIMEOUT_SECS`   | `7200`                  |
    /// | `STREAM_PERSIST_EVERY`  | `100`                   |
    /// | `SSE_POLL_INTERVAL_MS`  | `2000`                  |
    /// | `LOG_SYNC_INTERVAL_SECS`| `300`                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to
    /// its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let cors_origins = parse_origins(
            &lookup("CORS_ORIGINS").unwrap_or_else(|| "http://localhost:5173".into()),
        )?;

        Ok(Self {
            host,
            port: parsed(&lookup, "PORT", 3000)?,
            cors_origins,
            request_timeout_secs: parsed(&lookup, "REQUEST_TIMEOUT_SECS", 30)?,
            shutdown_timeout_secs: parsed(&lookup, "SHUTDOWN_TIMEOUT_SECS", 30)?,
            database_url: required(&lookup, "DATABASE_URL")?,
            engine_base_url: required(&lookup, "ENGINE_API_BASE_URL")?,
            engine_api_key: required(&lookup, "ENGINE_API_KEY")?,
            engine_timeout_secs: parsed(&lookup, "ENGINE_TIMEOUT_SECS", 7200)?,
            stream_persist_every: parsed(&lookup, "STREAM_PERSIST_EVERY", DEFAULT_PERSIST_EVERY)?,
            sse_poll_interval_ms: parsed(&lookup, "SSE_POLL_INTERVAL_MS", 2000)?,
            log_sync_interval_secs: parsed(&lookup, "LOG_SYNC_INTERVAL_SECS", 300)?,
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = EngineConfig::new(&self.engine_base_url, &self.engine_api_key);
        engine.timeout = Duration::from_secs(self.engine_timeout_secs);
        engine
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            persist: PersistPolicy {
                every: self.stream_persist_every,
            },
            ..Default::default()
        }
    }

    pub fn sse_poll_interval(&self) -> Duration {
        Duration::from_millis(self.sse_poll_interval_ms.max(1))
    }

    /// `None` when the background sync is disabled.
    pub fn log_sync_interval(&self) -> Option<Duration> {
        (self.log_sync_interval_secs > 0).then(|| Duration::from_secs(self.log_sync_interval_secs))
    }
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    lookup(name).ok_or(ConfigError::Missing(name))
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(value) => {
            let result: Result<T, T::Err> = value.trim().parse();
            result.map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            })
        }
    }
}

fn parse_origins(raw: &str) -> Result<Vec<String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|origin| {
            HeaderValue::from_str(origin)
                .map(|_| origin.to_string())
                .map_err(|e| ConfigError::Invalid {
                    name: "CORS_ORIGINS",
                    value: origin.to_string(),
                    reason: e.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("DATABASE_URL", "postgres://localhost/longrun"),
        ("ENGINE_API_BASE_URL", "http://engine.local/v1"),
        ("ENGINE_API_KEY", "app-123456789"),
    ];

    #[test]
    fn defaults_apply_when_only_required_vars_are_set() {
        let config = ServerConfig::from_lookup(lookup(&REQUIRED)).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 3000);
        assert_eq!(config.cors_origins, ["http://localhost:5173"]);
        assert_eq!(config.engine_timeout_secs, 7200);
        assert_eq!(config.stream_persist_every, 100);
        assert_eq!(config.sse_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.log_sync_interval(), Some(Duration::from_secs(300)));
        assert_eq!(config.engine_config().timeout, Duration::from_secs(7200));
    }

    #[test]
    fn missing_required_var_is_reported_by_name() {
        let err = ServerConfig::from_lookup(lookup(&REQUIRED[..2])).unwrap_err();
        assert_matches!(err, ConfigError::Missing("ENGINE_API_KEY"));
    }

    #[test]
    fn invalid_number_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("PORT", "eighty"));
        let err = ServerConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { name: "PORT", .. });
    }

    #[test]
    fn zero_sync_interval_disables_sync() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("LOG_SYNC_INTERVAL_SECS", "0"));
        let config = ServerConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.log_sync_interval(), None);
    }

    #[test]
    fn cors_origins_are_split_and_trimmed() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("CORS_ORIGINS", "http://a.test, http://b.test,,"));
        let config = ServerConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.cors_origins, ["http://a.test", "http://b.test"]);
    }

    #[test]
    fn persist_every_flows_into_orchestrator_config() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("STREAM_PERSIST_EVERY", "25"));
        let config = ServerConfig::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.orchestrator_config().persist.every, 25);
    }
}
