//! Manifest input for the banner generator.
//!
//! Only the `dependencies` list is modeled; schema validation of the full
//! manifest belongs to the JS CLI. Dependency entries either name an engine
//! module (and feed the alias table) or reference a companion pack by UUID
//! (and are ignored here).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::BuildError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDependency {
    pub module_name: String,
    pub version: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

impl ModuleDependency {
    /// Key this module is exposed under in the run-time alias object.
    pub fn alias_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.module_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackDependency {
    pub uuid: String,
    pub version: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dependency {
    Module(ModuleDependency),
    Pack(PackDependency),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl Manifest {
    /// Module-type dependencies only; companion-pack UUID entries never
    /// contribute to the alias table.
    pub fn module_dependencies(&self) -> impl Iterator<Item = &ModuleDependency> {
        self.dependencies.iter().filter_map(|dep| match dep {
            Dependency::Module(module) => Some(module),
            Dependency::Pack(_) => None,
        })
    }
}

pub fn load_manifest(path: &Path) -> Result<Manifest, BuildError> {
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| BuildError::Manifest {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mixed_dependency_list() {
        let manifest: Manifest = serde_json::from_str(
            r#"{
                "dependencies": [
                    { "module_name": "engine.core", "version": "1.2.0", "alias": "core" },
                    { "uuid": "0d9f6e9e-63f4-4a1e-9f7a-2f4c3a1b5d6e", "version": [1, 0, 0] },
                    { "module_name": "engine.ui", "version": "0.4.0" }
                ]
            }"#,
        )
        .unwrap();

        let modules: Vec<_> = manifest.module_dependencies().collect();
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].alias_key(), "core");
        assert_eq!(modules[1].alias_key(), "engine.ui");
    }

    #[test]
    fn test_missing_dependencies_defaults_empty() {
        let manifest: Manifest = serde_json::from_str("{}").unwrap();
        assert!(manifest.dependencies.is_empty());
    }
}
