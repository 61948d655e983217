//! Asset capability interface.
//!
//! An asset is one device or topic instance. What the outside world may know
//! about it (name, descriptive details, offered and consumed services) is its
//! [`AssetProfile`]; everything mutable lives in the owning task.

pub mod registry;
pub mod signal;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use registry::{RegisteredAsset, Registry, RegistryBuilder};
pub use signal::Signal;

/// Descriptive metadata: key → list of values (`Location: [Kitchen]`).
pub type Details = BTreeMap<String, Vec<String>>;

/// A capability offered on `/{system}/{asset}/{sub_path}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDef {
    pub definition: String,
    pub sub_path: String,
    #[serde(default)]
    pub details: Details,
    /// Registration period in seconds, forwarded to the directory service.
    #[serde(default)]
    pub reg_period: u64,
    #[serde(default)]
    pub description: String,
}

impl ServiceDef {
    pub fn new(definition: &str, sub_path: &str, unit: &str, description: &str) -> Self {
        let mut details = Details::new();
        details.insert("Unit".into(), vec![unit.to_string()]);
        details.insert("Forms".into(), vec!["SignalA_v1a".into()]);
        Self {
            definition: definition.to_string(),
            sub_path: sub_path.to_string(),
            details,
            reg_period: 30,
            description: description.to_string(),
        }
    }
}

/// A capability of another asset this one calls. `url` is the endpoint the
/// directory lookup resolved to; `local://asset/sub_path` addresses an asset
/// of this same process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumedService {
    pub definition: String,
    pub url: String,
    #[serde(default)]
    pub details: Details,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetProfile {
    pub name: String,
    pub details: Details,
    pub services: Vec<ServiceDef>,
    pub consumed: Vec<ConsumedService>,
}

/// Capability interface every asset variant implements. Variants only supply
/// [`Asset::profile`]; the accessors are derived from it.
pub trait Asset {
    fn profile(&self) -> &AssetProfile;

    fn name(&self) -> &str {
        &self.profile().name
    }

    fn services(&self) -> &[ServiceDef] {
        &self.profile().services
    }

    fn consumed(&self) -> &[ConsumedService] {
        &self.profile().consumed
    }

    fn details(&self) -> &Details {
        &self.profile().details
    }

    fn offers(&self, sub_path: &str) -> bool {
        self.services().iter().any(|s| s.sub_path == sub_path)
    }

    fn consumes(&self, definition: &str) -> Option<&ConsumedService> {
        self.consumed().iter().find(|c| c.definition == definition)
    }
}

impl Asset for AssetProfile {
    fn profile(&self) -> &AssetProfile {
        self
    }
}
