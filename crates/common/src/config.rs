//! Harness configuration
//!
//! Everything is read once from the environment into [`HarnessConfig`].
//! Retry defaults optionally come from the `[retry]` table of `apiscope.toml`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::redact::DEFAULT_MAX_BODY_SIZE;
use crate::retry::{RetryPolicy, DEFAULT_RETRYABLE_STATUSES};
use crate::types::TransportKind;

/// Default config file looked up in the working directory
pub const CONFIG_FILE_NAME: &str = "apiscope.toml";

/// Worker id variables, in precedence order
pub const WORKER_ENV_VARS: &[&str] = &["APISCOPE_WORKER", "PYTEST_XDIST_WORKER"];

const MIN_TIMEOUT_SECS: u64 = 1;
const MAX_TIMEOUT_SECS: u64 = 300;
const MIN_BODY_SIZE: usize = 1024;
const MAX_BODY_SIZE: usize = 1_048_576;
const DEV_MIN_BODY_SIZE: usize = 102_400;
const PROD_MAX_BODY_SIZE: usize = 51_200;

/// Environments that force redaction on and cap logged bodies
const PRODUCTION_LIKE: &[&str] = &["prod", "production", "preprod", "staging"];

/// How logged and recorded payloads are scrubbed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionSettings {
    pub enabled: bool,
    /// Treat UUIDs as sensitive
    pub include_uuids: bool,
    /// Serialized size above which bodies are replaced by a truncation envelope
    pub max_body_size: usize,
}

impl Default for RedactionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            include_uuids: false,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }
}

/// `[retry]` table of the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryDefaults {
    pub max_attempts: u32,
    /// Fixed delay for linear policies
    pub delay_ms: u64,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: bool,
    pub timeout_ms: Option<u64>,
    pub retry_on: Vec<u16>,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 1000,
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
            jitter: true,
            timeout_ms: None,
            retry_on: DEFAULT_RETRYABLE_STATUSES.to_vec(),
        }
    }
}

impl RetryDefaults {
    fn finish(&self, policy: RetryPolicy) -> RetryPolicy {
        let policy = policy.retry_on(self.retry_on.iter().copied());
        match self.timeout_ms {
            Some(ms) => policy.with_timeout(Duration::from_millis(ms)),
            None => policy,
        }
    }

    pub fn linear_policy(&self) -> RetryPolicy {
        self.finish(RetryPolicy::linear(
            self.max_attempts,
            Duration::from_millis(self.delay_ms),
        ))
    }

    pub fn exponential_policy(&self) -> RetryPolicy {
        self.finish(RetryPolicy::exponential(
            self.max_attempts,
            Duration::from_millis(self.initial_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.backoff_factor,
            self.jitter,
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    retry: RetryDefaults,
}

/// Load retry defaults from a TOML file
pub fn load_retry_defaults(path: &Path) -> Result<RetryDefaults> {
    let content = std::fs::read_to_string(path)?;
    let file: ConfigFile = toml::from_str(&content)?;
    file.retry.linear_policy().validate()?;
    Ok(file.retry)
}

/// Runtime configuration for the execution core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Prefix for every request path
    pub api_base_url: String,

    /// Per-request timeout in seconds
    pub timeout_secs: u64,

    /// Log full (redacted) requests and responses
    pub debug_api: bool,

    pub redaction: RedactionSettings,

    /// Process-wide transport override (`API_CLIENT`)
    pub transport_override: Option<TransportKind>,

    pub test_env: String,

    /// Credentials accepted by the mock login stub
    pub test_username: String,
    pub test_password: String,

    /// Render PNG artifacts for trace records
    pub render_artifacts: bool,

    /// Where worker files and the combined report go
    pub reports_dir: PathBuf,

    /// Set when running as a parallel worker
    pub worker_id: Option<String>,

    pub retry: RetryDefaults,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            api_base_url: String::new(),
            timeout_secs: 30,
            debug_api: false,
            redaction: RedactionSettings::default(),
            transport_override: None,
            test_env: "dev".to_string(),
            test_username: String::new(),
            test_password: String::new(),
            render_artifacts: false,
            reports_dir: PathBuf::from("reports"),
            worker_id: None,
            retry: RetryDefaults::default(),
        }
    }
}

impl HarnessConfig {
    /// Read from the process environment, plus `apiscope.toml` when present
    pub fn from_env() -> Result<Self> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok())?;
        let file = Path::new(CONFIG_FILE_NAME);
        if file.exists() {
            debug!("Loading retry defaults from {}", file.display());
            config.retry = load_retry_defaults(file)?;
        }
        Ok(config)
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(url) = get("API_BASE_URL") {
            config.api_base_url = url;
        }
        if let Some(raw) = get("API_TIMEOUT") {
            config.timeout_secs = parse_in_range("API_TIMEOUT", &raw, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS)?;
        }
        if let Some(raw) = get("DEBUG_API") {
            config.debug_api = parse_bool("DEBUG_API", &raw)?;
        }
        if let Some(raw) = get("REDACT_SENSITIVE_DATA") {
            config.redaction.enabled = parse_bool("REDACT_SENSITIVE_DATA", &raw)?;
        }
        if let Some(raw) = get("REDACT_UUIDS") {
            config.redaction.include_uuids = parse_bool("REDACT_UUIDS", &raw)?;
        }
        if let Some(raw) = get("MAX_LOG_BODY_SIZE") {
            config.redaction.max_body_size =
                parse_in_range("MAX_LOG_BODY_SIZE", &raw, MIN_BODY_SIZE, MAX_BODY_SIZE)?;
        }
        if let Some(raw) = get("API_CLIENT") {
            config.transport_override = Some(raw.parse()?);
        }
        if let Some(env) = get("TEST_ENV") {
            config.test_env = env.to_ascii_lowercase();
        }
        if let Some(user) = get("TEST_USERNAME") {
            config.test_username = user;
        }
        if let Some(pass) = lookup("TEST_PASSWORD") {
            config.test_password = pass;
        }
        if let Some(raw) = get("APISCOPE_RENDER_ARTIFACTS") {
            config.render_artifacts = parse_bool("APISCOPE_RENDER_ARTIFACTS", &raw)?;
        }
        if let Some(dir) = get("APISCOPE_REPORTS_DIR") {
            config.reports_dir = PathBuf::from(dir);
        }
        config.worker_id = WORKER_ENV_VARS.iter().find_map(|key| get(key));

        config.apply_environment_adjustments();
        Ok(config)
    }

    /// Tighten or relax logging limits for the target environment
    pub fn apply_environment_adjustments(&mut self) {
        if self.test_env == "dev" {
            self.redaction.max_body_size = self.redaction.max_body_size.max(DEV_MIN_BODY_SIZE);
        } else if self.is_production_like() {
            if !self.redaction.enabled {
                warn!("Redaction cannot be disabled in {}", self.test_env);
            }
            self.redaction.enabled = true;
            self.redaction.max_body_size = self.redaction.max_body_size.min(PROD_MAX_BODY_SIZE);
        }
    }

    pub fn is_production_like(&self) -> bool {
        PRODUCTION_LIKE.contains(&self.test_env.as_str())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Whether this process is a parallel worker rather than the coordinator
    pub fn is_worker(&self) -> bool {
        self.worker_id.is_some()
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::InvalidConfig(format!("{} must be a boolean, got '{}'", key, raw))),
    }
}

fn parse_in_range<T>(key: &str, raw: &str, min: T, max: T) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let value: T = raw
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} must be a number, got '{}'", key, raw)))?;
    if value < min || value > max {
        return Err(Error::InvalidConfig(format!(
            "{} must be between {} and {}, got {}",
            key, min, max, value
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use test_case::test_case;

    fn config_from(vars: &[(&str, &str)]) -> Result<HarnessConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HarnessConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[("TEST_ENV", "qa")]).unwrap();
        assert_eq!(config.timeout_secs, 30);
        assert!(config.redaction.enabled);
        assert!(!config.redaction.include_uuids);
        assert_eq!(config.redaction.max_body_size, 51_200);
        assert_eq!(config.transport_override, None);
        assert_eq!(config.reports_dir, PathBuf::from("reports"));
        assert!(!config.is_worker());
    }

    #[test]
    fn test_dev_raises_body_limit() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.test_env, "dev");
        assert_eq!(config.redaction.max_body_size, 102_400);

        let config = config_from(&[("MAX_LOG_BODY_SIZE", "500000")]).unwrap();
        assert_eq!(config.redaction.max_body_size, 500_000);
    }

    #[test_case("prod")]
    #[test_case("production")]
    #[test_case("preprod")]
    #[test_case("STAGING")]
    fn test_production_like_forces_redaction(env: &str) {
        let config = config_from(&[
            ("TEST_ENV", env),
            ("REDACT_SENSITIVE_DATA", "false"),
            ("MAX_LOG_BODY_SIZE", "1048576"),
        ])
        .unwrap();
        assert!(config.redaction.enabled);
        assert_eq!(config.redaction.max_body_size, 51_200);
    }

    #[test_case("API_TIMEOUT", "0")]
    #[test_case("API_TIMEOUT", "301")]
    #[test_case("API_TIMEOUT", "soon")]
    #[test_case("MAX_LOG_BODY_SIZE", "100")]
    #[test_case("DEBUG_API", "maybe")]
    #[test_case("API_CLIENT", "carrier-pigeon")]
    fn test_invalid_values_rejected(key: &str, value: &str) {
        assert!(config_from(&[(key, value)]).is_err());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("API_BASE_URL", "https://api.test"),
            ("API_TIMEOUT", "5"),
            ("DEBUG_API", "1"),
            ("API_CLIENT", "requests"),
            ("TEST_USERNAME", "alice"),
            ("TEST_PASSWORD", "s3cret"),
            ("APISCOPE_WORKER", "gw2"),
            ("PYTEST_XDIST_WORKER", "gw9"),
        ])
        .unwrap();
        assert_eq!(config.api_base_url, "https://api.test");
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert!(config.debug_api);
        assert_eq!(config.transport_override, Some(TransportKind::DirectHttp));
        assert_eq!(config.test_username, "alice");
        assert_eq!(config.test_password, "s3cret");
        assert_eq!(config.worker_id.as_deref(), Some("gw2"));
    }

    #[test]
    fn test_retry_defaults_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[retry]\nmax_attempts = 5\ninitial_delay_ms = 200\nmax_delay_ms = 1000\njitter = false\nretry_on = [503]\ntimeout_ms = 9000"
        )
        .unwrap();

        let defaults = load_retry_defaults(file.path()).unwrap();
        assert_eq!(defaults.max_attempts, 5);
        assert_eq!(defaults.delay_ms, 1000);

        let policy = defaults.exponential_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.timeout, Some(Duration::from_secs(9)));
        assert!(policy.retry_on.contains(&503));
        assert!(!policy.retry_on.contains(&500));
        assert_eq!(
            policy.delay_schedule(),
            vec![
                Duration::from_millis(200),
                Duration::from_millis(400),
                Duration::from_millis(800),
                Duration::from_millis(1000),
            ]
        );
    }

    #[test]
    fn test_retry_defaults_reject_zero_attempts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\nmax_attempts = 0").unwrap();
        assert!(load_retry_defaults(file.path()).is_err());
    }
}
