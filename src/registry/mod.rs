pub mod locator;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::adapter::AdaptedArguments;
use crate::host::{HostNode, InputSchema, NodeError, NodeOutput, SharedHostEnvironment, SharedNodeRegistry};

pub use locator::{
    default_locators, ExecutionRegistryLocator, LocatorError, ModuleScanLocator,
    RegistryLocator, ServerRegistryLocator,
};

pub const ENTRY_POINT_PROBE: [&str; 5] = ["execute", "process", "run", "apply", "transform"];

type EntryFn = dyn Fn(AdaptedArguments) -> Result<NodeOutput, NodeError> + Send + Sync;

#[derive(Clone)]
pub struct EntryPoint {
    name: String,
    call: Arc<EntryFn>,
}

impl EntryPoint {
    pub fn new<F>(name: impl Into<String>, call: F) -> Self
    where
        F: Fn(AdaptedArguments) -> Result<NodeOutput, NodeError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            call: Arc::new(call),
        }
    }

    fn bound_to(node: Arc<dyn HostNode>, name: String) -> Self {
        let method = name.clone();
        Self::new(name, move |args| node.call(method.as_str(), args))
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn call(&self, args: AdaptedArguments) -> Result<NodeOutput, NodeError> {
        (self.call)(args)
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryPoint").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub struct NodeDescriptor {
    type_name: String,
    schema: InputSchema,
    entry_point: EntryPoint,
}

impl NodeDescriptor {
    pub fn new(type_name: impl Into<String>, schema: InputSchema, entry_point: EntryPoint) -> Self {
        Self {
            type_name: type_name.into(),
            schema,
            entry_point,
        }
    }

    pub fn type_name(&self) -> &str {
        self.type_name.as_str()
    }

    pub fn schema(&self) -> &InputSchema {
        &self.schema
    }

    pub fn entry_point(&self) -> &EntryPoint {
        &self.entry_point
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotFound {
    #[error("node type '{0}' is not registered")]
    UnknownType(String),
    #[error("node type '{type_name}' could not be constructed: {detail}")]
    Construction { type_name: String, detail: String },
    #[error("node type '{0}' does not report an input schema")]
    MissingSchema(String),
    #[error("node type '{type_name}' has no callable entry point")]
    MissingEntryPoint {
        type_name: String,
        declared: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeSummary {
    pub type_name: String,
    pub entry_point: Option<String>,
    pub input_types: Value,
}

pub struct NodeResolver {
    host: SharedHostEnvironment,
    locators: Vec<Box<dyn RegistryLocator>>,
}

impl NodeResolver {
    pub fn new(host: SharedHostEnvironment) -> Self {
        Self::with_locators(host, default_locators())
    }

    pub fn with_locators(
        host: SharedHostEnvironment,
        locators: Vec<Box<dyn RegistryLocator>>,
    ) -> Self {
        Self { host, locators }
    }

    pub fn host(&self) -> &SharedHostEnvironment {
        &self.host
    }

    pub fn visible_registries(&self) -> Vec<SharedNodeRegistry> {
        self.locators
            .iter()
            .filter_map(|locator| match locator.locate(self.host.as_ref()) {
                Ok(found) => found,
                Err(error) => {
                    debug!(locator = locator.name(), %error, "registry locator failed");
                    None
                }
            })
            .collect()
    }

    pub fn registry_for(&self, type_name: &str) -> Option<SharedNodeRegistry> {
        for locator in &self.locators {
            match locator.locate(self.host.as_ref()) {
                Ok(Some(registry)) if registry.contains(type_name) => {
                    debug!(locator = locator.name(), node_type = type_name, "node type located");
                    return Some(registry);
                }
                Ok(Some(_)) => {
                    debug!(
                        locator = locator.name(),
                        node_type = type_name,
                        "registry found without node type"
                    );
                }
                Ok(None) => {}
                Err(error) => {
                    debug!(locator = locator.name(), %error, "registry locator failed");
                }
            }
        }
        None
    }

    pub fn resolve(&self, type_name: &str) -> Result<NodeDescriptor, NotFound> {
        let unknown = || NotFound::UnknownType(type_name.to_string());
        if type_name.is_empty() {
            return Err(unknown());
        }
        let class = self
            .registry_for(type_name)
            .and_then(|registry| registry.get(type_name))
            .ok_or_else(unknown)?;
        let node = class
            .instantiate()
            .map_err(|error| NotFound::Construction {
                type_name: type_name.to_string(),
                detail: error.to_string(),
            })?;
        let schema = node
            .input_types()
            .ok_or_else(|| NotFound::MissingSchema(type_name.to_string()))?;
        let entry_point = resolve_entry_point(type_name, node)?;
        Ok(NodeDescriptor::new(type_name, schema, entry_point))
    }

    pub fn list_nodes(&self) -> Vec<NodeSummary> {
        let mut seen = BTreeMap::new();
        for registry in self.visible_registries() {
            for type_name in registry.type_names() {
                if seen.contains_key(&type_name) {
                    continue;
                }
                let Some(node) = registry
                    .get(type_name.as_str())
                    .and_then(|class| class.instantiate().ok())
                else {
                    continue;
                };
                let entry_point = declared_or_probed_entry(node.as_ref());
                let input_types = node
                    .input_types()
                    .map(|schema| schema.to_json())
                    .unwrap_or(Value::Null);
                seen.insert(
                    type_name.clone(),
                    NodeSummary {
                        type_name,
                        entry_point,
                        input_types,
                    },
                );
            }
        }
        seen.into_values().collect()
    }
}

fn declared_or_probed_entry(node: &dyn HostNode) -> Option<String> {
    node.function().or_else(|| {
        ENTRY_POINT_PROBE
            .iter()
            .find(|candidate| node.has_method(candidate))
            .map(|candidate| candidate.to_string())
    })
}

fn resolve_entry_point(type_name: &str, node: Arc<dyn HostNode>) -> Result<EntryPoint, NotFound> {
    let declared = node.function();
    match declared_or_probed_entry(node.as_ref()) {
        Some(name) if node.has_method(name.as_str()) => Ok(EntryPoint::bound_to(node, name)),
        _ => Err(NotFound::MissingEntryPoint {
            type_name: type_name.to_string(),
            declared,
        }),
    }
}
