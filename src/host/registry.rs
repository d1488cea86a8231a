use std::collections::HashMap;
use std::sync::Arc;

use super::{HostNode, NodeError};

pub trait NodeClass: Send + Sync {
    fn instantiate(&self) -> Result<Arc<dyn HostNode>, NodeError>;
}

impl<F> NodeClass for F
where
    F: Fn() -> Result<Arc<dyn HostNode>, NodeError> + Send + Sync,
{
    fn instantiate(&self) -> Result<Arc<dyn HostNode>, NodeError> {
        self()
    }
}

struct SharedInstanceClass {
    node: Arc<dyn HostNode>,
}

impl NodeClass for SharedInstanceClass {
    fn instantiate(&self) -> Result<Arc<dyn HostNode>, NodeError> {
        Ok(self.node.clone())
    }
}

#[derive(Clone, Default)]
pub struct NodeRegistry {
    classes: HashMap<String, Arc<dyn NodeClass>>,
}

pub type SharedNodeRegistry = Arc<NodeRegistry>;

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_class(&mut self, type_name: impl Into<String>, class: Arc<dyn NodeClass>) {
        self.classes.insert(type_name.into(), class);
    }

    pub fn register_node(&mut self, type_name: impl Into<String>, node: Arc<dyn HostNode>) {
        self.register_class(type_name, Arc::new(SharedInstanceClass { node }));
    }

    pub fn with_node(mut self, type_name: impl Into<String>, node: Arc<dyn HostNode>) -> Self {
        self.register_node(type_name, node);
        self
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<dyn NodeClass>> {
        self.classes.get(type_name).cloned()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.classes.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn type_names(&self) -> Vec<String> {
        let mut names = self.classes.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn into_shared(self) -> SharedNodeRegistry {
        Arc::new(self)
    }
}
