//! registry.rs
//! Name → asset lookup owned by the composition root.
//!
//! Populated once while the system is assembled; `freeze` consumes the builder
//! so the resulting [`Registry`] can only be read.

use std::collections::HashMap;

use serde::Serialize;

use crate::asset::{Asset, AssetProfile};
use crate::error::ConfigError;
use crate::owner::AssetHandle;

pub struct RegisteredAsset {
    pub profile: AssetProfile,
    pub handle: AssetHandle,
}

impl Asset for RegisteredAsset {
    fn profile(&self) -> &AssetProfile {
        &self.profile
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    assets: HashMap<String, RegisteredAsset>,
    order: Vec<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, profile: AssetProfile, handle: AssetHandle) -> Result<(), ConfigError> {
        if self.assets.contains_key(&profile.name) {
            return Err(ConfigError::DuplicateAsset(profile.name));
        }
        self.order.push(profile.name.clone());
        self.assets
            .insert(profile.name.clone(), RegisteredAsset { profile, handle });
        Ok(())
    }

    pub fn freeze(self) -> Registry {
        Registry {
            assets: self.assets,
            order: self.order,
        }
    }
}

/// Read-only after startup.
pub struct Registry {
    assets: HashMap<String, RegisteredAsset>,
    order: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RegistryListing<'a> {
    pub system: &'a str,
    pub assets: Vec<&'a AssetProfile>,
}

impl Registry {
    pub fn get(&self, name: &str) -> Option<&RegisteredAsset> {
        self.assets.get(name)
    }

    /// Assets in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisteredAsset> {
        self.order.iter().filter_map(|name| self.assets.get(name))
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    pub fn listing<'a>(&'a self, system: &'a str) -> RegistryListing<'a> {
        RegistryListing {
            system,
            assets: self.iter().map(|a| &a.profile).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::AssetHandle;

    fn profile(name: &str) -> AssetProfile {
        AssetProfile {
            name: name.into(),
            details: Default::default(),
            services: vec![],
            consumed: vec![],
        }
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut builder = RegistryBuilder::new();
        builder.insert(profile("pump"), AssetHandle::detached("pump")).unwrap();

        let err = builder
            .insert(profile("pump"), AssetHandle::detached("pump"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateAsset(name) if name == "pump"));
    }

    #[test]
    fn iterates_in_insertion_order() {
        let mut builder = RegistryBuilder::new();
        for name in ["tank", "pump", "heater"] {
            builder.insert(profile(name), AssetHandle::detached(name)).unwrap();
        }
        let registry = builder.freeze();

        let names: Vec<_> = registry.iter().map(|a| a.name().to_string()).collect();
        assert_eq!(names, ["tank", "pump", "heater"]);
        assert!(registry.get("pump").is_some());
        assert!(registry.get("valve").is_none());
    }
}
