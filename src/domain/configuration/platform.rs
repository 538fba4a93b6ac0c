use std::collections::{BTreeMap, BTreeSet};

use crate::domain::configuration::configuration::Configuration;
use crate::domain::utils::id::PlatformId;
use crate::error::ConversionError;

/// Identifier of the wildcard platform. A VM requiring it can run on any node,
/// which makes it a convenient stub for homogeneous clusters.
pub const ANY_PLATFORM: &str = "any";

/// A named capability bundle: flags (`hvm`, `pae`, ...) and key/value options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub id: PlatformId,
    pub flags: BTreeSet<String>,
    pub options: BTreeMap<String, String>,
}

impl Platform {
    pub fn new(id: impl Into<PlatformId>) -> Self {
        Platform { id: id.into(), flags: BTreeSet::new(), options: BTreeMap::new() }
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn is_wildcard(&self) -> bool {
        self.id.as_str() == ANY_PLATFORM
    }
}

/// Read-only lookup of the platforms known to the process. Built once at
/// startup and passed to the components that need it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformRegistry {
    platforms: BTreeMap<PlatformId, Platform>,
}

impl Default for PlatformRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformRegistry {
    pub fn new() -> Self {
        let mut platforms = BTreeMap::new();
        platforms.insert(PlatformId::new(ANY_PLATFORM), Platform::new(ANY_PLATFORM));
        PlatformRegistry { platforms }
    }

    /// Builds a registry holding the wildcard and one bare platform per id.
    pub fn with_ids<I, S>(ids: I) -> Result<Self, ConversionError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = PlatformRegistry::new();
        for id in ids {
            registry.register(Platform::new(id.as_ref()))?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, platform: Platform) -> Result<(), ConversionError> {
        if self.platforms.contains_key(&platform.id) {
            return Err(ConversionError::DuplicatePlatform(platform.id.to_string()));
        }
        self.platforms.insert(platform.id.clone(), platform);
        Ok(())
    }

    /// Hands out a copy, the registry itself stays untouched.
    pub fn get(&self, id: &PlatformId) -> Option<Platform> {
        self.platforms.get(id).cloned()
    }

    pub fn contains(&self, id: &PlatformId) -> bool {
        self.platforms.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &PlatformId> {
        self.platforms.keys()
    }

    /// Checks that every platform referenced by the configuration is registered.
    pub fn validate(&self, configuration: &Configuration) -> Result<(), ConversionError> {
        for node in configuration.nodes() {
            let referenced = node.platform.iter().chain(node.available_platforms.iter());
            for platform in referenced {
                if !self.contains(platform) {
                    return Err(ConversionError::UnknownPlatform(platform.to_string()));
                }
            }
        }

        for vm in configuration.vms() {
            if let Some(platform) = &vm.platform {
                if !self.contains(platform) {
                    return Err(ConversionError::UnknownPlatform(platform.to_string()));
                }
            }
        }
        Ok(())
    }
}

/// Whether a node running `node_platform` may host a VM requiring `vm_platform`.
pub fn platform_matches(node_platform: Option<&PlatformId>, vm_platform: Option<&PlatformId>) -> bool {
    match (node_platform, vm_platform) {
        (_, Some(required)) if required.as_str() == ANY_PLATFORM => true,
        (Some(current), Some(required)) => current == required,
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_platform_only_matches_null_requirement() {
        let kvm = PlatformId::new("kvm");
        assert!(platform_matches(None, None));
        assert!(!platform_matches(Some(&kvm), None));
        assert!(!platform_matches(None, Some(&kvm)));
    }

    #[test]
    fn wildcard_matches_every_node() {
        let any = PlatformId::new(ANY_PLATFORM);
        let xen = PlatformId::new("xen");
        assert!(platform_matches(None, Some(&any)));
        assert!(platform_matches(Some(&xen), Some(&any)));
    }

    #[test]
    fn registry_rejects_duplicates_and_hands_out_copies() {
        let mut registry = PlatformRegistry::with_ids(["xen", "kvm"]).unwrap();
        assert!(registry.register(Platform::new("xen")).is_err());

        let mut copy = registry.get(&PlatformId::new("kvm")).unwrap();
        copy.flags.insert("hvm".to_string());
        assert!(registry.get(&PlatformId::new("kvm")).unwrap().flags.is_empty());
        assert!(registry.contains(&PlatformId::new(ANY_PLATFORM)));
    }
}
