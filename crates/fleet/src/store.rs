use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One persisted target record. The store is a flat JSON document shared with
/// other operator processes, so field names are part of the on-disk contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TargetRecord {
    pub name: String,
    pub address: String,
    pub principal: String,
    pub secret: String,
    pub install_path: String,
}

pub fn load_targets(path: &Path) -> anyhow::Result<Vec<TargetRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read target store {}", path.display()))?;
    let records: Vec<TargetRecord> = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse target store {}", path.display()))?;
    Ok(records)
}

pub fn save_targets(path: &Path, records: &[TargetRecord]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(records).context("failed to serialize targets")?;
    std::fs::write(path, raw)
        .with_context(|| format!("failed to write target store {}", path.display()))?;
    Ok(())
}

/// Operator settings consumed by the UI/glue layer: login identity for the
/// dashboard and defaults applied when registering targets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperatorSettings {
    #[serde(default = "default_admin_user")]
    pub admin_user: String,
    #[serde(default)]
    pub admin_pass: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default)]
    pub install_path: String,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            admin_user: default_admin_user(),
            admin_pass: String::new(),
            display_name: default_display_name(),
            install_path: String::new(),
        }
    }
}

fn default_admin_user() -> String {
    "admin".to_string()
}

fn default_display_name() -> String {
    "fleet".to_string()
}

/// Missing or partial documents fill in from defaults; unknown fields are
/// ignored so older settings files keep loading.
pub fn load_settings(path: &Path) -> anyhow::Result<OperatorSettings> {
    if !path.exists() {
        return Ok(OperatorSettings::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings {}", path.display()))?;
    let settings: OperatorSettings = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse settings {}", path.display()))?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &OperatorSettings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let raw = serde_json::to_string_pretty(settings).context("failed to serialize settings")?;
    std::fs::write(path, raw)
        .with_context(|| format!("failed to write settings {}", path.display()))?;
    Ok(())
}
