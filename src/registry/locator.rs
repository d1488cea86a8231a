use thiserror::Error;

use crate::host::environment::NODE_CLASS_MAPPINGS;
use crate::host::{HostEnvironment, SharedNodeRegistry};

pub const MODULE_SCAN_NEEDLES: [&str; 2] = ["execution", "nodes"];

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("host state is unavailable (lock poisoned)")]
    HostUnavailable,
}

pub trait RegistryLocator: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` means this strategy found nothing; an empty registry counts
    /// as nothing.
    fn locate(&self, host: &HostEnvironment) -> Result<Option<SharedNodeRegistry>, LocatorError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ExecutionRegistryLocator;

impl RegistryLocator for ExecutionRegistryLocator {
    fn name(&self) -> &'static str {
        "execution_registry"
    }

    fn locate(&self, host: &HostEnvironment) -> Result<Option<SharedNodeRegistry>, LocatorError> {
        let registry = host
            .execution_registry()
            .map_err(|_| LocatorError::HostUnavailable)?;
        Ok(registry.filter(|registry| !registry.is_empty()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ServerRegistryLocator;

impl RegistryLocator for ServerRegistryLocator {
    fn name(&self) -> &'static str {
        "server_instance"
    }

    fn locate(&self, host: &HostEnvironment) -> Result<Option<SharedNodeRegistry>, LocatorError> {
        let Some(server) = host.server().map_err(|_| LocatorError::HostUnavailable)? else {
            return Ok(None);
        };
        if let Some(registry) = server
            .node_class_mappings
            .as_ref()
            .filter(|registry| !registry.is_empty())
        {
            return Ok(Some(registry.clone()));
        }
        Ok(server
            .nodes
            .as_ref()
            .and_then(|nodes| nodes.get(NODE_CLASS_MAPPINGS))
            .filter(|registry| !registry.is_empty())
            .cloned())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ModuleScanLocator;

impl RegistryLocator for ModuleScanLocator {
    fn name(&self) -> &'static str {
        "module_scan"
    }

    fn locate(&self, host: &HostEnvironment) -> Result<Option<SharedNodeRegistry>, LocatorError> {
        let modules = host.modules().map_err(|_| LocatorError::HostUnavailable)?;
        Ok(modules
            .into_iter()
            .filter(|module| {
                MODULE_SCAN_NEEDLES
                    .iter()
                    .any(|needle| module.name.contains(needle))
            })
            .find_map(|module| {
                module
                    .node_class_mappings
                    .filter(|registry| !registry.is_empty())
            }))
    }
}

pub fn default_locators() -> Vec<Box<dyn RegistryLocator>> {
    vec![
        Box::new(ExecutionRegistryLocator),
        Box::new(ServerRegistryLocator),
        Box::new(ModuleScanLocator),
    ]
}
