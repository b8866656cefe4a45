//! burstgrid.toml configuration parser.
//!
//! Everything except the group name and zone has a default. `validate()`
//! runs once at startup; a configuration that fails it never reaches the
//! controller.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Malformed or contradictory configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid thresholds: {0}")]
    Thresholds(String),

    #[error("invalid limits: {0}")]
    Limits(String),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub group: GroupSection,
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub reconcile: ReconcileSection,
    #[serde(default)]
    pub load: LoadSection,
}

/// The managed instance group the controller drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSection {
    pub name: String,
    pub zone: String,
    pub project: Option<String>,
}

/// Which active node a scale-down removes first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalOrder {
    /// Most recently activated first; long-lived nodes survive.
    #[default]
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub check_interval_secs: u64,
    pub min_nodes: u32,
    pub max_nodes: u32,
    pub min_active_nodes: u32,
    pub removal_order: RemovalOrder,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            check_interval_secs: 10,
            min_nodes: 1,
            max_nodes: 5,
            min_active_nodes: 1,
            removal_order: RemovalOrder::NewestFirst,
        }
    }
}

/// Hysteresis thresholds, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    pub cpu_up: f64,
    pub mem_up: f64,
    pub cpu_down: f64,
    pub mem_down: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_up: 75.0,
            mem_up: 95.0,
            cpu_down: 50.0,
            mem_down: 50.0,
        }
    }
}

impl ThresholdConfig {
    /// Check ranges and the down < up ordering of both metrics.
    pub fn validate(&self) -> ConfigResult<()> {
        for (name, value) in [
            ("cpu_up", self.cpu_up),
            ("mem_up", self.mem_up),
            ("cpu_down", self.cpu_down),
            ("mem_down", self.mem_down),
        ] {
            if !value.is_finite() || !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::Thresholds(format!(
                    "{name} = {value} is outside [0, 100]"
                )));
            }
        }
        if self.cpu_down >= self.cpu_up {
            return Err(ConfigError::Thresholds(format!(
                "cpu_down ({}) must be below cpu_up ({})",
                self.cpu_down, self.cpu_up
            )));
        }
        if self.mem_down >= self.mem_up {
            return Err(ConfigError::Thresholds(format!(
                "mem_down ({}) must be below mem_up ({})",
                self.mem_down, self.mem_up
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileSection {
    pub poll_interval_secs: u64,
    pub timeout_secs: u64,
    pub command_timeout_secs: u64,
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            timeout_secs: 300,
            command_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadSection {
    pub enabled: bool,
    pub threads: u32,
    pub cycle_secs: u64,
    pub subcycle_ms: u64,
}

impl Default for LoadSection {
    fn default() -> Self {
        Self {
            enabled: true,
            threads: 1,
            cycle_secs: 60,
            subcycle_ms: 100,
        }
    }
}

impl ControllerConfig {
    /// Read, parse and validate a config file.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse and validate a TOML document.
    pub fn parse(content: &str) -> ConfigResult<Self> {
        let config: ControllerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.group.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "group.name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.group.zone.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "group.zone",
                reason: "must not be empty".to_string(),
            });
        }

        self.thresholds.validate()?;

        let c = &self.controller;
        if c.max_nodes == 0 {
            return Err(ConfigError::Limits("max_nodes must be at least 1".to_string()));
        }
        if c.min_nodes > c.max_nodes {
            return Err(ConfigError::Limits(format!(
                "min_nodes ({}) exceeds max_nodes ({})",
                c.min_nodes, c.max_nodes
            )));
        }
        if c.min_active_nodes > c.max_nodes {
            return Err(ConfigError::Limits(format!(
                "min_active_nodes ({}) exceeds max_nodes ({})",
                c.min_active_nodes, c.max_nodes
            )));
        }

        non_zero("controller.check_interval_secs", c.check_interval_secs)?;
        non_zero("reconcile.poll_interval_secs", self.reconcile.poll_interval_secs)?;
        non_zero("reconcile.timeout_secs", self.reconcile.timeout_secs)?;
        non_zero("reconcile.command_timeout_secs", self.reconcile.command_timeout_secs)?;
        non_zero("load.cycle_secs", self.load.cycle_secs)?;
        non_zero("load.subcycle_ms", self.load.subcycle_ms)?;
        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.controller.check_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile.poll_interval_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile.timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile.command_timeout_secs)
    }

    pub fn load_cycle(&self) -> Duration {
        Duration::from_secs(self.load.cycle_secs)
    }

    pub fn load_subcycle(&self) -> Duration {
        Duration::from_millis(self.load.subcycle_ms)
    }

    /// Scaffold a config with defaults for the given group.
    pub fn scaffold(name: &str, zone: &str) -> Self {
        ControllerConfig {
            group: GroupSection {
                name: name.to_string(),
                zone: zone.to_string(),
                project: None,
            },
            controller: ControllerSection::default(),
            thresholds: ThresholdConfig::default(),
            reconcile: ReconcileSection::default(),
            load: LoadSection::default(),
        }
    }
}

fn non_zero(field: &'static str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[group]
name = "burst-workers"
zone = "us-central1-a"
"#;

    #[test]
    fn parse_minimal_uses_defaults() {
        let config = ControllerConfig::parse(MINIMAL).unwrap();
        assert_eq!(config.group.name, "burst-workers");
        assert_eq!(config.controller.max_nodes, 5);
        assert_eq!(config.controller.min_nodes, 1);
        assert_eq!(config.thresholds, ThresholdConfig::default());
        assert_eq!(config.reconcile.timeout_secs, 300);
        assert_eq!(config.check_interval(), Duration::from_secs(10));
        assert_eq!(config.load_subcycle(), Duration::from_millis(100));
    }

    #[test]
    fn parse_full() {
        let toml_str = r#"
[group]
name = "g"
zone = "europe-west1-b"
project = "proj"

[controller]
check_interval_secs = 5
min_nodes = 0
max_nodes = 3
min_active_nodes = 0
removal_order = "oldest_first"

[thresholds]
cpu_up = 80.0
mem_up = 90.0
cpu_down = 40.0
mem_down = 45.0

[reconcile]
poll_interval_secs = 2
timeout_secs = 60

[load]
enabled = false
threads = 4
cycle_secs = 30
"#;
        let config = ControllerConfig::parse(toml_str).unwrap();
        assert_eq!(config.group.project.as_deref(), Some("proj"));
        assert_eq!(config.controller.removal_order, RemovalOrder::OldestFirst);
        assert_eq!(config.thresholds.cpu_up, 80.0);
        assert_eq!(config.reconcile.command_timeout_secs, 60);
        assert!(!config.load.enabled);
        assert_eq!(config.load.threads, 4);
    }

    #[test]
    fn inverted_cpu_thresholds_rejected() {
        let mut config = ControllerConfig::scaffold("g", "z");
        config.thresholds.cpu_down = 80.0;
        assert!(matches!(config.validate(), Err(ConfigError::Thresholds(_))));
    }

    #[test]
    fn equal_mem_thresholds_rejected() {
        let mut config = ControllerConfig::scaffold("g", "z");
        config.thresholds.mem_down = config.thresholds.mem_up;
        assert!(matches!(config.validate(), Err(ConfigError::Thresholds(_))));
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let mut config = ControllerConfig::scaffold("g", "z");
        config.thresholds.mem_up = 120.0;
        assert!(matches!(config.validate(), Err(ConfigError::Thresholds(_))));
    }

    #[test]
    fn min_above_max_rejected() {
        let mut config = ControllerConfig::scaffold("g", "z");
        config.controller.min_nodes = 6;
        assert!(matches!(config.validate(), Err(ConfigError::Limits(_))));
    }

    #[test]
    fn zero_interval_rejected() {
        let mut config = ControllerConfig::scaffold("g", "z");
        config.controller.check_interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "controller.check_interval_secs", .. })
        ));
    }

    #[test]
    fn empty_group_name_rejected() {
        let toml_str = r#"
[group]
name = ""
zone = "z"
"#;
        assert!(matches!(
            ControllerConfig::parse(toml_str),
            Err(ConfigError::Invalid { field: "group.name", .. })
        ));
    }

    #[test]
    fn missing_group_is_parse_error() {
        assert!(matches!(
            ControllerConfig::parse("[controller]\nmax_nodes = 3\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn scaffold_round_trips_through_toml() {
        let config = ControllerConfig::scaffold("my-group", "us-east1-b");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("my-group"));
        let parsed = ControllerConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed.group.zone, "us-east1-b");
    }

    #[test]
    fn from_file_reads_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = ControllerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.group.zone, "us-central1-a");
    }

    #[test]
    fn from_file_missing_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(
            ControllerConfig::from_file(&path),
            Err(ConfigError::Read { .. })
        ));
    }
}
