//! Daemon configuration.
//!
//! Every section has a `Default`, and missing keys in a config file fall
//! back to it, so an empty JSON object is a valid configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::broker::BrokerOptions;
use crate::error::ConfigError;

/// Scheduler sizing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Timed events the queue holds before its first growth (0 means 127).
    pub horizon: usize,
}

/// Subscription socket settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NerdConfig {
    /// Start the listener at all.
    pub enabled: bool,
    /// Unix socket clients connect to. Removed and recreated on startup.
    pub socket_path: PathBuf,
    /// Connected clients allowed at once.
    pub max_subscribers: usize,
    /// Max queued listener-to-main-loop messages before new ones are dropped.
    pub control_queue_capacity: usize,
    /// How long one broadcast write may block before the line is skipped for
    /// that subscriber.
    pub write_timeout_ms: u64,
}

impl Default for NerdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            socket_path: PathBuf::from("/tmp/nerd.sock"),
            max_subscribers: 32,
            control_queue_capacity: 1024,
            write_timeout_ms: 5,
        }
    }
}

/// A module to load at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSpec {
    /// Name of a built-in module.
    pub name: String,
    /// Argument string passed to the module's `init`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Event categories the broker broadcasts.
    pub event_broker_options: BrokerOptions,
    /// Timed-event queue sizing.
    pub scheduler: SchedulerConfig,
    /// Subscription socket.
    pub nerd: NerdConfig,
    /// Modules loaded at startup, in order.
    pub modules: Vec<ModuleSpec>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            event_broker_options: BrokerOptions::EVERYTHING,
            scheduler: SchedulerConfig::default(),
            nerd: NerdConfig::default(),
            modules: Vec::new(),
        }
    }
}

impl DaemonConfig {
    /// Parses and validates a JSON document.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reads, parses and validates a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Rejects values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.event_broker_options.bits() > BrokerOptions::EVERYTHING.bits() {
            return Err(ConfigError::Invalid {
                field: "event_broker_options".to_string(),
                reason: format!("{} has bits outside 0..=65535", self.event_broker_options.bits()),
            });
        }
        if self.nerd.enabled {
            if self.nerd.socket_path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "nerd.socket_path".to_string(),
                    reason: "must not be empty".to_string(),
                });
            }
            if self.nerd.max_subscribers == 0 {
                return Err(ConfigError::Invalid {
                    field: "nerd.max_subscribers".to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if let Some(m) = self.modules.iter().find(|m| m.name.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "modules".to_string(),
                reason: format!("module with args {:?} has no name", m.args),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_empty_object_is_default() {
        let cfg = DaemonConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, DaemonConfig::default());
        assert_eq!(cfg.event_broker_options.bits(), 65535);
        assert_eq!(cfg.nerd.max_subscribers, 32);
        assert_eq!(cfg.nerd.socket_path, PathBuf::from("/tmp/nerd.sock"));
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let cfg = DaemonConfig::from_json_str(
            r#"{
                "event_broker_options": 12,
                "nerd": { "socket_path": "/run/neb.sock" },
                "modules": [ { "name": "logger", "args": "hosts" } ]
            }"#,
        )
        .unwrap();
        assert!(cfg.event_broker_options.contains(BrokerOptions::HOST_CHECKS));
        assert!(!cfg.event_broker_options.contains(BrokerOptions::PROGRAM_STATE));
        assert_eq!(cfg.nerd.socket_path, PathBuf::from("/run/neb.sock"));
        assert_eq!(cfg.nerd.control_queue_capacity, 1024);
        assert_eq!(cfg.modules[0].args.as_deref(), Some("hosts"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = DaemonConfig::from_json_str(r#"{"event_broker_options": 70000}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "event_broker_options"));

        let err = DaemonConfig::from_json_str(r#"{"nerd": {"max_subscribers": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        assert!(matches!(DaemonConfig::from_json_str("[1,"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"scheduler": {{"horizon": 512}}}}"#).unwrap();
        let cfg = DaemonConfig::load(file.path()).unwrap();
        assert_eq!(cfg.scheduler.horizon, 512);

        let missing = DaemonConfig::load("/nonexistent/nebcore.json").unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));
    }
}
