//! Configuration loading and validation.
//!
//! Configuration is a single YAML file selected with `--config`. Environment
//! variables can be spliced into the file with `${VAR}` / `${VAR:-default}`
//! syntax; expansion happens on the raw text before parsing. Durations use
//! short unit-suffixed strings (`500ms`, `5s`, `2m`, `1h`).

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::SpindleError;
use crate::scheduler::Algorithm;

/// Top-level load balancer configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Listen address; `":8080"` binds all interfaces.
    pub listen_addr: String,
    /// Scheduling algorithm name, case-insensitive:
    /// `round_robin`, `least_conn`, `weighted_rr` or `ip_hash`.
    pub algorithm: String,
    /// Upstream backend servers.
    pub servers: Vec<ServerConfig>,
    /// Health checking knobs.
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

/// One upstream backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Absolute URL of the backend (`http://host:port`).
    pub url: String,
    /// Weight, used only by weighted round-robin.
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// Path probed with HTTP GET; when absent the probe is a TCP connect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_path: Option<String>,
}

fn default_weight() -> u32 {
    1
}

/// Health checker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// Tick period of the probe loop.
    #[serde(default = "default_interval", with = "duration_str")]
    pub interval: Duration,
    /// Per-attempt probe deadline.
    #[serde(default = "default_timeout", with = "duration_str")]
    pub timeout: Duration,
    /// Attempts against one backend within a tick before the tick counts
    /// as failed.
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    /// Pause between attempts within a tick.
    #[serde(default = "default_retry_interval", with = "duration_str")]
    pub retry_interval: Duration,
    /// Failed probes (without an intervening success) before eviction.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

fn default_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_failures() -> u32 {
    3
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            timeout: default_timeout(),
            retry_count: default_retry_count(),
            retry_interval: default_retry_interval(),
            max_failures: default_max_failures(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file with environment variable
    /// expansion, then validate it.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SpindleError> {
        let content = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            SpindleError::config(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(content: &str) -> Result<Self, SpindleError> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration.
    pub fn validate(&self) -> Result<(), SpindleError> {
        if self.listen_addr.trim().is_empty() {
            return Err(SpindleError::config("listen_addr must not be empty"));
        }

        self.algorithm.parse::<Algorithm>()?;

        if self.servers.is_empty() {
            return Err(SpindleError::config(
                "at least one backend server must be configured",
            ));
        }

        for server in &self.servers {
            server.validate()?;
        }

        self.health_check.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<(), SpindleError> {
        let uri: hyper::Uri = self.url.parse().map_err(|e| {
            SpindleError::config(format!("invalid backend url {}: {}", self.url, e))
        })?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(SpindleError::config(format!(
                "backend url must be absolute (scheme and host): {}",
                self.url
            )));
        }
        if self.weight == 0 {
            return Err(SpindleError::config(format!(
                "backend weight must be positive: {}",
                self.url
            )));
        }
        Ok(())
    }
}

impl HealthCheckConfig {
    fn validate(&self) -> Result<(), SpindleError> {
        if self.interval.is_zero() {
            return Err(SpindleError::config(
                "health_check.interval must be greater than zero",
            ));
        }
        if self.timeout.is_zero() {
            return Err(SpindleError::config(
                "health_check.timeout must be greater than zero",
            ));
        }
        if self.retry_count == 0 {
            return Err(SpindleError::config(
                "health_check.retry_count must be at least 1",
            ));
        }
        if self.max_failures == 0 {
            return Err(SpindleError::config(
                "health_check.max_failures must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Expand environment variables in configuration content.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn expand_env_vars(content: &str) -> String {
    let mut result = content.to_string();

    while let Some(start) = result.find("${") {
        if let Some(end) = result[start..].find('}') {
            let var_expr = &result[start + 2..start + end];
            let replacement = if let Some(default_pos) = var_expr.find(":-") {
                let var_name = &var_expr[..default_pos];
                let default_value = &var_expr[default_pos + 2..];
                env::var(var_name).unwrap_or_else(|_| default_value.to_string())
            } else {
                env::var(var_expr).unwrap_or_else(|_| {
                    warn!(
                        "environment variable '{}' not found, using empty string",
                        var_expr
                    );
                    String::new()
                })
            };

            result.replace_range(start..start + end + 1, &replacement);
        } else {
            break; // Malformed ${VAR expression
        }
    }

    result
}

/// Parse a Go-style duration string: `300ms`, `5s`, `2m`, `1h`.
pub(crate) fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{}' is missing a unit (ms, s, m, h)", s))?;
    let (value, unit) = s.split_at(split);
    let value: u64 = value
        .parse()
        .map_err(|_| format!("invalid duration value: '{}'", s))?;
    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 3600)),
        _ => Err(format!("unknown duration unit '{}' in '{}'", unit, s)),
    }
}

mod duration_str {
    use super::parse_duration;
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let rendered = if duration.subsec_millis() != 0 {
            format!("{}ms", duration.as_millis())
        } else {
            format!("{}s", duration.as_secs())
        };
        serializer.serialize_str(&rendered)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"
listen_addr: ":8080"
algorithm: round_robin
servers:
  - url: http://127.0.0.1:9001
    weight: 5
    health_check_path: /health
  - url: http://127.0.0.1:9002
health_check:
  interval: 10s
  timeout: 2s
  retry_count: 2
  retry_interval: 500ms
  max_failures: 4
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.listen_addr, ":8080");
        assert_eq!(config.algorithm, "round_robin");
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].weight, 5);
        assert_eq!(
            config.servers[0].health_check_path.as_deref(),
            Some("/health")
        );
        assert_eq!(config.servers[1].weight, 1);
        assert!(config.servers[1].health_check_path.is_none());
        assert_eq!(config.health_check.interval, Duration::from_secs(10));
        assert_eq!(config.health_check.timeout, Duration::from_secs(2));
        assert_eq!(config.health_check.retry_count, 2);
        assert_eq!(
            config.health_check.retry_interval,
            Duration::from_millis(500)
        );
        assert_eq!(config.health_check.max_failures, 4);
    }

    #[test]
    fn test_health_check_defaults() {
        let config = Config::from_yaml(
            r#"
listen_addr: ":8080"
algorithm: least_conn
servers:
  - url: http://127.0.0.1:9001
"#,
        )
        .unwrap();
        assert_eq!(config.health_check.interval, Duration::from_secs(30));
        assert_eq!(config.health_check.timeout, Duration::from_secs(5));
        assert_eq!(config.health_check.retry_count, 3);
        assert_eq!(config.health_check.max_failures, 3);
    }

    #[test]
    fn test_algorithm_case_insensitive() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.algorithm = "Weighted_RR".to_string();
        assert!(config.validate().is_ok());
        config.algorithm = "IP_HASH".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.algorithm = "fastest_first".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_listen_addr() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.listen_addr = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_server_list() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_relative_url() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.servers[0].url = "/not-a-url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_weight() {
        let mut config = Config::from_yaml(SAMPLE).unwrap();
        config.servers[0].weight = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_retry_count() {
        let err = Config::from_yaml(
            r#"
listen_addr: ":8080"
algorithm: round_robin
servers:
  - url: http://127.0.0.1:9001
health_check:
  retry_count: 0
"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert!(parse_duration("30").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn test_env_var_expansion() {
        env::set_var("SPINDLE_TEST_PORT", "9005");
        let expanded = expand_env_vars("url: http://127.0.0.1:${SPINDLE_TEST_PORT}");
        assert_eq!(expanded, "url: http://127.0.0.1:9005");
        env::remove_var("SPINDLE_TEST_PORT");

        let defaulted = expand_env_vars("addr: ${SPINDLE_TEST_MISSING:-:8080}");
        assert_eq!(defaulted, "addr: :8080");
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file.flush().unwrap();

        let config = Config::from_file(file.path()).await.unwrap();
        assert_eq!(config.servers.len(), 2);
    }

    #[tokio::test]
    async fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/spindle.yaml").await;
        assert!(matches!(err, Err(SpindleError::Config { .. })));
    }
}
