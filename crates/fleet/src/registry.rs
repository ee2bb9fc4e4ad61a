use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::store::{self, TargetRecord};

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub principal: String,
    pub secret: String,
}

// The secret must never leak through logs or error text.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub address: String,
    pub credential: Credential,
    pub install_path: String,
}

/// Credential-free view of a target, safe to serialize back to callers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TargetSummary {
    pub name: String,
    pub address: String,
    pub principal: String,
    pub install_path: String,
}

impl Target {
    fn from_record(record: TargetRecord) -> Self {
        Self {
            name: record.name,
            address: record.address,
            credential: Credential {
                principal: record.principal,
                secret: record.secret,
            },
            install_path: record.install_path,
        }
    }

    fn to_record(&self) -> TargetRecord {
        TargetRecord {
            name: self.name.clone(),
            address: self.address.clone(),
            principal: self.credential.principal.clone(),
            secret: self.credential.secret.clone(),
            install_path: self.install_path.clone(),
        }
    }

    pub fn summary(&self) -> TargetSummary {
        TargetSummary {
            name: self.name.clone(),
            address: self.address.clone(),
            principal: self.credential.principal.clone(),
            install_path: self.install_path.clone(),
        }
    }
}

/// In-memory registry keyed by target name, backed by the JSON store. Other
/// operator processes may share the store, so every mutation reloads from
/// disk first and persists afterwards. Reads serve the in-memory snapshot.
pub struct TargetRegistry {
    store_path: PathBuf,
    targets: HashMap<String, Target>,
    order: Vec<String>,
}

impl TargetRegistry {
    pub fn open(store_path: PathBuf) -> anyhow::Result<Self> {
        let mut registry = Self {
            store_path,
            targets: HashMap::new(),
            order: Vec::new(),
        };
        registry.reload()?;
        Ok(registry)
    }

    /// Registers a target. An existing target with the same name is replaced
    /// (last-write-wins) and keeps its position in the listing order.
    pub fn add(&mut self, target: Target) -> anyhow::Result<()> {
        if target.name.trim().is_empty() {
            anyhow::bail!("target name cannot be empty");
        }
        if target.name == fleet_protocol::LOCAL_TARGET {
            anyhow::bail!("target name {} is reserved", fleet_protocol::LOCAL_TARGET);
        }
        self.reload()?;
        if !target.credential.secret.is_empty() {
            tracing::warn!(
                target = %target.name,
                "stored secret present; prefer SSH key auth"
            );
        }
        if self.targets.insert(target.name.clone(), target.clone()).is_none() {
            self.order.push(target.name);
        }
        self.persist()
    }

    pub fn remove(&mut self, name: &str) -> anyhow::Result<bool> {
        self.reload()?;
        let removed = self.targets.remove(name).is_some();
        if removed {
            self.order.retain(|entry| entry != name);
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn get(&self, name: &str) -> Option<Target> {
        self.targets.get(name).cloned()
    }

    /// Targets in insertion order.
    pub fn list(&self) -> Vec<Target> {
        self.order
            .iter()
            .filter_map(|name| self.targets.get(name).cloned())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.order.clone()
    }

    fn reload(&mut self) -> anyhow::Result<()> {
        let records = store::load_targets(&self.store_path)?;
        self.targets.clear();
        self.order.clear();
        for record in records {
            let target = Target::from_record(record);
            if self.targets.insert(target.name.clone(), target.clone()).is_none() {
                self.order.push(target.name);
            }
        }
        Ok(())
    }

    fn persist(&self) -> anyhow::Result<()> {
        let records: Vec<TargetRecord> = self
            .order
            .iter()
            .filter_map(|name| self.targets.get(name))
            .map(Target::to_record)
            .collect();
        store::save_targets(&self.store_path, &records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_target, temp_dir};

    #[test]
    fn add_get_list_in_insertion_order() {
        let dir = temp_dir("fleet-registry");
        let mut registry = TargetRegistry::open(dir.join("targets.json")).expect("open");
        registry.add(sample_target("kids-pc")).expect("add");
        registry.add(sample_target("den-pc")).expect("add");

        let listed = registry.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "kids-pc");
        assert_eq!(listed[1].name, "den-pc");
        assert!(registry.get("kids-pc").is_some());
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn add_replaces_existing_name() {
        let dir = temp_dir("fleet-registry");
        let mut registry = TargetRegistry::open(dir.join("targets.json")).expect("open");
        registry.add(sample_target("kids-pc")).expect("add");

        let mut updated = sample_target("kids-pc");
        updated.address = "10.0.0.9".to_string();
        registry.add(updated).expect("replace");

        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].address, "10.0.0.9");
    }

    #[test]
    fn remove_then_get_is_none() {
        let dir = temp_dir("fleet-registry");
        let mut registry = TargetRegistry::open(dir.join("targets.json")).expect("open");
        registry.add(sample_target("kids-pc")).expect("add");
        assert!(registry.remove("kids-pc").expect("remove"));
        assert!(!registry.remove("kids-pc").expect("second remove"));
        assert!(registry.get("kids-pc").is_none());
    }

    #[test]
    fn reserved_local_name_is_rejected() {
        let dir = temp_dir("fleet-registry");
        let mut registry = TargetRegistry::open(dir.join("targets.json")).expect("open");
        assert!(registry.add(sample_target("local")).is_err());
    }

    #[test]
    fn mutation_picks_up_external_store_writes() {
        let dir = temp_dir("fleet-registry");
        let path = dir.join("targets.json");
        let mut first = TargetRegistry::open(path.clone()).expect("open");
        let mut second = TargetRegistry::open(path).expect("open");

        first.add(sample_target("kids-pc")).expect("add");
        // The second registry opened before the write; its next mutation
        // reloads, so the external target survives.
        second.add(sample_target("den-pc")).expect("add");
        let listed = second.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].name, "kids-pc");
        assert_eq!(listed[1].name, "den-pc");
    }

    #[test]
    fn debug_redacts_secret() {
        let target = sample_target("kids-pc");
        let rendered = format!("{:?}", target.credential);
        assert!(rendered.contains("redacted"));
        assert!(!rendered.contains("pw"));
    }

    #[test]
    fn summary_omits_secret() {
        let target = sample_target("kids-pc");
        let json = serde_json::to_string(&target.summary()).expect("serialize");
        assert!(!json.contains("pw"));
        assert!(json.contains("kids-pc"));
    }
}
