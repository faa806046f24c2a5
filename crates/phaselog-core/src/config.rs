//! Tunables for log aggregation.
//!
//! Every field has a default, so an empty (or missing) TOML file yields a
//! working configuration. Environment variables override file values.
//! Poll intervals must be non-zero.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Sleep between setup-phase passes that streamed nothing (milliseconds).
    #[serde(default = "default_setup_poll_interval_ms")]
    pub setup_poll_interval_ms: u64,

    /// Poll interval while waiting for the main phase to start (milliseconds).
    #[serde(default = "default_main_phase_poll_interval_ms")]
    pub main_phase_poll_interval_ms: u64,

    /// Upper bound on waiting for the main phase to leave `Waiting` (seconds).
    #[serde(default = "default_main_phase_wait_timeout_secs")]
    pub main_phase_wait_timeout_secs: u64,

    /// Upper bound on waiting for a new execution to start running (seconds).
    #[serde(default = "default_start_wait_timeout_secs")]
    pub start_wait_timeout_secs: u64,

    /// Poll interval while waiting for an execution to start (milliseconds).
    #[serde(default = "default_start_poll_interval_ms")]
    pub start_poll_interval_ms: u64,

    /// Read buffer used when copying a phase's log into the pipe.
    #[serde(default = "default_copy_buffer_bytes")]
    pub copy_buffer_bytes: usize,

    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Well-known main-phase producer names, most preferred first.
    #[serde(default = "default_producer_preference")]
    pub producer_preference: Vec<String>,
}

fn default_setup_poll_interval_ms() -> u64 {
    1_000
}

fn default_main_phase_poll_interval_ms() -> u64 {
    1_000
}

fn default_main_phase_wait_timeout_secs() -> u64 {
    600
}

fn default_start_wait_timeout_secs() -> u64 {
    30
}

fn default_start_poll_interval_ms() -> u64 {
    1_000
}

fn default_copy_buffer_bytes() -> usize {
    16 * 1024
}

fn default_content_type() -> String {
    "text/plain".to_string()
}

fn default_producer_preference() -> Vec<String> {
    vec![
        "sti-build".to_string(),
        "docker-build".to_string(),
        "custom-build".to_string(),
    ]
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            setup_poll_interval_ms: default_setup_poll_interval_ms(),
            main_phase_poll_interval_ms: default_main_phase_poll_interval_ms(),
            main_phase_wait_timeout_secs: default_main_phase_wait_timeout_secs(),
            start_wait_timeout_secs: default_start_wait_timeout_secs(),
            start_poll_interval_ms: default_start_poll_interval_ms(),
            copy_buffer_bytes: default_copy_buffer_bytes(),
            content_type: default_content_type(),
            producer_preference: default_producer_preference(),
        }
    }
}

impl AggregatorConfig {
    pub fn setup_poll_interval(&self) -> Duration {
        Duration::from_millis(self.setup_poll_interval_ms)
    }

    pub fn main_phase_poll_interval(&self) -> Duration {
        Duration::from_millis(self.main_phase_poll_interval_ms)
    }

    pub fn main_phase_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.main_phase_wait_timeout_secs)
    }

    pub fn start_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.start_wait_timeout_secs)
    }

    pub fn start_poll_interval(&self) -> Duration {
        Duration::from_millis(self.start_poll_interval_ms)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would turn a poll loop into a spin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("setup_poll_interval_ms", self.setup_poll_interval_ms),
            ("main_phase_poll_interval_ms", self.main_phase_poll_interval_ms),
            ("start_poll_interval_ms", self.start_poll_interval_ms),
        ];
        for (key, value) in intervals {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Load from an optional TOML file, then apply `PHASELOG_*` overrides.
    ///
    /// A path that does not exist yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(p) if p.exists() => {
                let s = std::fs::read_to_string(p)?;
                Self::from_toml_str(&s)?
            }
            _ => Self::default(),
        };
        cfg.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Apply overrides from a key lookup (the environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("PHASELOG_SETUP_POLL_INTERVAL_MS") {
            self.setup_poll_interval_ms = parse_interval("PHASELOG_SETUP_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("PHASELOG_MAIN_PHASE_POLL_INTERVAL_MS") {
            self.main_phase_poll_interval_ms =
                parse_interval("PHASELOG_MAIN_PHASE_POLL_INTERVAL_MS", &v)?;
        }
        if let Some(v) = get("PHASELOG_MAIN_PHASE_WAIT_TIMEOUT_SECS") {
            self.main_phase_wait_timeout_secs =
                parse_u64("PHASELOG_MAIN_PHASE_WAIT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("PHASELOG_START_WAIT_TIMEOUT_SECS") {
            self.start_wait_timeout_secs = parse_u64("PHASELOG_START_WAIT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("PHASELOG_PRODUCER_PREFERENCE") {
            self.producer_preference = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        self.validate()
    }
}

fn parse_u64(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        })
}

fn parse_interval(key: &'static str, value: &str) -> Result<u64, ConfigError> {
    match parse_u64(key, value)? {
        0 => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
        ms => Ok(ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let cfg = AggregatorConfig::default();
        assert_eq!(cfg.setup_poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.main_phase_poll_interval(), Duration::from_secs(1));
        assert_eq!(cfg.main_phase_wait_timeout(), Duration::from_secs(600));
        assert_eq!(cfg.start_wait_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.content_type, "text/plain");
        assert_eq!(cfg.producer_preference[0], "sti-build");
    }

    #[test]
    fn test_empty_toml_is_default() {
        let cfg = AggregatorConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, AggregatorConfig::default());
    }

    #[test]
    fn test_partial_toml() {
        let cfg = AggregatorConfig::from_toml_str(
            r#"
            main_phase_wait_timeout_secs = 10
            producer_preference = ["worker"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.main_phase_wait_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.producer_preference, vec!["worker"]);
        assert_eq!(cfg.setup_poll_interval_ms, 1_000);
    }

    #[test]
    fn test_bad_toml_is_parse_error() {
        let err = AggregatorConfig::from_toml_str("setup_poll_interval_ms = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PHASELOG_SETUP_POLL_INTERVAL_MS", "250"),
            ("PHASELOG_PRODUCER_PREFERENCE", "main, worker ,"),
            ("PHASELOG_START_WAIT_TIMEOUT_SECS", "  "),
        ]);
        let mut cfg = AggregatorConfig::default();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(cfg.setup_poll_interval_ms, 250);
        assert_eq!(cfg.producer_preference, vec!["main", "worker"]);
        assert_eq!(cfg.start_wait_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_override() {
        let mut cfg = AggregatorConfig::default();
        let err = cfg
            .apply_overrides(|k| {
                (k == "PHASELOG_MAIN_PHASE_WAIT_TIMEOUT_SECS").then(|| "ten".to_string())
            })
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "PHASELOG_MAIN_PHASE_WAIT_TIMEOUT_SECS",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_interval_in_toml_rejected() {
        for field in ["setup_poll_interval_ms", "main_phase_poll_interval_ms"] {
            let err = AggregatorConfig::from_toml_str(&format!("{field} = 0")).unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidValue { key, .. } if key == field),
                "{err}"
            );
        }
    }

    #[test]
    fn test_zero_interval_override_rejected() {
        for key in [
            "PHASELOG_SETUP_POLL_INTERVAL_MS",
            "PHASELOG_MAIN_PHASE_POLL_INTERVAL_MS",
        ] {
            let mut cfg = AggregatorConfig::default();
            let err = cfg
                .apply_overrides(|k| (k == key).then(|| "0".to_string()))
                .unwrap_err();
            assert!(err.to_string().contains(key), "{err}");
            assert_eq!(cfg.setup_poll_interval_ms, 1_000);
            assert_eq!(cfg.main_phase_poll_interval_ms, 1_000);
        }
    }

    #[test]
    fn test_overrides_revalidate_whole_config() {
        let mut cfg = AggregatorConfig {
            main_phase_poll_interval_ms: 0,
            ..AggregatorConfig::default()
        };
        let err = cfg.apply_overrides(|_| None).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "main_phase_poll_interval_ms",
                ..
            }
        ));
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AggregatorConfig::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(cfg.content_type, "text/plain");
    }
}
