use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::SharedNodeRegistry;

pub const NODE_CLASS_MAPPINGS: &str = "NODE_CLASS_MAPPINGS";

#[derive(Clone, Default)]
pub struct ServerInstance {
    pub node_class_mappings: Option<SharedNodeRegistry>,
    pub nodes: Option<HashMap<String, SharedNodeRegistry>>,
}

impl ServerInstance {
    pub fn with_node_class_mappings(registry: SharedNodeRegistry) -> Self {
        Self {
            node_class_mappings: Some(registry),
            nodes: None,
        }
    }

    pub fn with_nodes_attribute(registry: SharedNodeRegistry) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(String::from(NODE_CLASS_MAPPINGS), registry);
        Self {
            node_class_mappings: None,
            nodes: Some(nodes),
        }
    }
}

#[derive(Clone)]
pub struct LoadedModule {
    pub name: String,
    pub node_class_mappings: Option<SharedNodeRegistry>,
}

impl LoadedModule {
    pub fn new(name: impl Into<String>, node_class_mappings: Option<SharedNodeRegistry>) -> Self {
        Self {
            name: name.into(),
            node_class_mappings,
        }
    }
}

#[derive(Default)]
pub struct HostEnvironment {
    execution_registry: RwLock<Option<SharedNodeRegistry>>,
    server: RwLock<Option<Arc<ServerInstance>>>,
    modules: RwLock<Vec<LoadedModule>>,
}

pub type SharedHostEnvironment = Arc<HostEnvironment>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLockPoisoned;

impl HostEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_execution_registry(&self, registry: Option<SharedNodeRegistry>) {
        overwrite(&self.execution_registry, |slot| *slot = registry);
    }

    pub fn publish_server(&self, server: Option<ServerInstance>) {
        overwrite(&self.server, |slot| *slot = server.map(Arc::new));
    }

    pub fn load_module(&self, module: LoadedModule) {
        overwrite(&self.modules, |modules| {
            modules.retain(|existing| existing.name != module.name);
            modules.push(module);
        });
    }

    pub fn execution_registry(&self) -> Result<Option<SharedNodeRegistry>, HostLockPoisoned> {
        self.execution_registry
            .read()
            .map(|slot| slot.clone())
            .map_err(|_| HostLockPoisoned)
    }

    pub fn server(&self) -> Result<Option<Arc<ServerInstance>>, HostLockPoisoned> {
        self.server
            .read()
            .map(|slot| slot.clone())
            .map_err(|_| HostLockPoisoned)
    }

    pub fn modules(&self) -> Result<Vec<LoadedModule>, HostLockPoisoned> {
        self.modules
            .read()
            .map(|modules| modules.clone())
            .map_err(|_| HostLockPoisoned)
    }
}

// A writer that panicked leaves the slot poisoned; the next publish replaces
// its contents, so the poison is cleared once the update lands.
fn overwrite<T>(lock: &RwLock<T>, update: impl FnOnce(&mut T)) {
    {
        let mut guard = lock.write().unwrap_or_else(PoisonError::into_inner);
        update(&mut guard);
    }
    lock.clear_poison();
}
