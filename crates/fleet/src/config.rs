use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
pub struct FleetConfig {
    pub script_dir: PathBuf,
    #[serde(default = "default_targets_path")]
    pub targets_path: PathBuf,
    #[serde(default = "default_settings_path")]
    pub settings_path: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default)]
    pub ssh_args: Vec<String>,
}

impl FleetConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: FleetConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_secs == 0 {
            anyhow::bail!("timeout_secs must be positive");
        }
        if self.probe_timeout_secs == 0 || self.probe_timeout_secs > self.timeout_secs {
            anyhow::bail!("probe_timeout_secs must be positive and no longer than timeout_secs");
        }
        Ok(())
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn default_targets_path() -> PathBuf {
    PathBuf::from("config/targets.json")
}

fn default_settings_path() -> PathBuf {
    PathBuf::from("config/settings.json")
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_probe_timeout_secs() -> u64 {
    DEFAULT_PROBE_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: FleetConfig = toml::from_str("script_dir = \"scripts\"").expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.probe_timeout_secs, DEFAULT_PROBE_TIMEOUT_SECS);
        assert_eq!(config.targets_path, PathBuf::from("config/targets.json"));
        assert!(config.ssh_args.is_empty());
    }

    #[test]
    fn probe_timeout_must_not_exceed_dispatch_timeout() {
        let config: FleetConfig = toml::from_str(
            "script_dir = \"scripts\"\ntimeout_secs = 5\nprobe_timeout_secs = 30\n",
        )
        .expect("parse");
        assert!(config.validate().is_err());
    }
}
