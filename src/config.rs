//! Configuration types.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// A remote binding configured at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceBinding {
    pub job_type: String,
    pub url: String,
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bind host for the HTTP API.
    pub host: String,
    /// Bind port for the HTTP API.
    pub port: u16,
    /// Timeout for every remote `/execute` call.
    pub remote_timeout: Duration,
    /// Worker pool size for CPU-bound handler work.
    pub max_local_workers: usize,
    /// Capacity of the job event broadcast channel.
    pub event_capacity: usize,
    /// Register the simulated `ml_experiment` and `backtest` handlers.
    pub builtin_handlers: bool,
    /// Remote bindings registered at startup.
    pub services: Vec<ServiceBinding>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            remote_timeout: Duration::from_secs(30),
            max_local_workers: 4,
            event_capacity: 256,
            builtin_handlers: true,
            services: Vec::new(),
        }
    }
}

impl OrchestratorConfig {
    /// Read configuration from `MCP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let timeout_secs: u64 = parse_var(&lookup, "MCP_REMOTE_TIMEOUT_SECS", 30)?;
        if timeout_secs == 0 {
            return Err(invalid("MCP_REMOTE_TIMEOUT_SECS", "must be at least 1"));
        }
        let max_local_workers = parse_var(&lookup, "MCP_MAX_LOCAL_WORKERS", defaults.max_local_workers)?;
        if max_local_workers == 0 {
            return Err(invalid("MCP_MAX_LOCAL_WORKERS", "must be at least 1"));
        }
        let event_capacity = parse_var(&lookup, "MCP_EVENT_CAPACITY", defaults.event_capacity)?;
        if event_capacity == 0 {
            return Err(invalid("MCP_EVENT_CAPACITY", "must be at least 1"));
        }

        Ok(Self {
            host: lookup("MCP_HOST").unwrap_or(defaults.host),
            port: parse_var(&lookup, "MCP_PORT", defaults.port)?,
            remote_timeout: Duration::from_secs(timeout_secs),
            max_local_workers,
            event_capacity,
            builtin_handlers: parse_var(&lookup, "MCP_BUILTIN_HANDLERS", defaults.builtin_handlers)?,
            services: match lookup("MCP_SERVICES") {
                Some(raw) => parse_services(&raw)?,
                None => defaults.services,
            },
        })
    }

    /// `host:port` for binding the API listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(key, &format!("'{raw}': {e}"))),
    }
}

/// Parse `type=url,type=url`.
fn parse_services(raw: &str) -> Result<Vec<ServiceBinding>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((job_type, url)) if !job_type.trim().is_empty() && !url.trim().is_empty() => {
                Ok(ServiceBinding {
                    job_type: job_type.trim().to_string(),
                    url: url.trim().to_string(),
                })
            }
            _ => Err(invalid("MCP_SERVICES", &format!("expected type=url, got '{entry}'"))),
        })
        .collect()
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from(vars: &[(&str, &str)]) -> Result<OrchestratorConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OrchestratorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from(&[]).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.remote_timeout, Duration::from_secs(30));
        assert_eq!(config.max_local_workers, 4);
        assert!(config.builtin_handlers);
        assert!(config.services.is_empty());
    }

    #[test]
    fn reads_overrides() {
        let config = from(&[
            ("MCP_HOST", "127.0.0.1"),
            ("MCP_PORT", "9100"),
            ("MCP_REMOTE_TIMEOUT_SECS", "5"),
            ("MCP_BUILTIN_HANDLERS", "false"),
            ("MCP_SERVICES", "backtest=http://bt:9000, etl=http://etl:9001"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:9100");
        assert_eq!(config.remote_timeout, Duration::from_secs(5));
        assert!(!config.builtin_handlers);
        assert_eq!(
            config.services,
            vec![
                ServiceBinding {
                    job_type: "backtest".into(),
                    url: "http://bt:9000".into(),
                },
                ServiceBinding {
                    job_type: "etl".into(),
                    url: "http://etl:9001".into(),
                },
            ]
        );
    }

    #[test]
    fn invalid_values_name_the_key() {
        let err = from(&[("MCP_PORT", "eighty")]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "MCP_PORT"));

        let err = from(&[("MCP_REMOTE_TIMEOUT_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("MCP_REMOTE_TIMEOUT_SECS"));

        let err = from(&[("MCP_SERVICES", "backtest")]).unwrap_err();
        assert!(err.to_string().contains("type=url"));
    }
}
