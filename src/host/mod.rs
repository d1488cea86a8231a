pub mod environment;
pub mod nodes;
pub mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use ndarray::ArrayD;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::adapter::AdaptedArguments;

pub use environment::{HostEnvironment, LoadedModule, ServerInstance, SharedHostEnvironment};
pub use registry::{NodeClass, NodeRegistry, SharedNodeRegistry};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("missing argument '{0}'")]
    MissingArgument(String),
    #[error("argument '{name}' has an unexpected type: {detail}")]
    InvalidArgument { name: String, detail: String },
    #[error("node construction failed: {0}")]
    Construction(String),
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputSpec {
    pub name: String,
    pub type_tag: String,
    pub options: Map<String, Value>,
}

impl InputSpec {
    pub fn new(name: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_tag: type_tag.into(),
            options: Map::new(),
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.options.insert(String::from("default"), default.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.options.get("default")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputSchema {
    pub required: Vec<InputSpec>,
    pub optional: Vec<InputSpec>,
    pub hidden: Vec<InputSpec>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn required(mut self, spec: InputSpec) -> Self {
        self.required.push(spec);
        self
    }

    pub fn optional(mut self, spec: InputSpec) -> Self {
        self.optional.push(spec);
        self
    }

    pub fn hidden(mut self, spec: InputSpec) -> Self {
        self.hidden.push(spec);
        self
    }

    /// Parses the nested mapping form:
    /// `{"required": {"name": ["FLOAT", {"default": 1.0}]}, ...}`.
    ///
    /// A bare string entry (`"unique_id": "UNIQUE_ID"`) is read as a tag with
    /// no options. Entries of any other shape keep an empty tag.
    pub fn from_json(value: &Value) -> Self {
        let section = |key: &str| -> Vec<InputSpec> {
            value
                .get(key)
                .and_then(Value::as_object)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|(name, raw)| parse_input_spec(name, raw))
                        .collect()
                })
                .unwrap_or_default()
        };
        Self {
            required: section("required"),
            optional: section("optional"),
            hidden: section("hidden"),
        }
    }

    pub fn to_json(&self) -> Value {
        let section = |specs: &[InputSpec]| -> Value {
            let mut out = Map::new();
            for spec in specs {
                let entry = if spec.options.is_empty() {
                    json!([spec.type_tag])
                } else {
                    json!([spec.type_tag, spec.options])
                };
                out.insert(spec.name.clone(), entry);
            }
            Value::Object(out)
        };
        let mut root = Map::new();
        root.insert(String::from("required"), section(&self.required));
        if !self.optional.is_empty() {
            root.insert(String::from("optional"), section(&self.optional));
        }
        if !self.hidden.is_empty() {
            root.insert(String::from("hidden"), section(&self.hidden));
        }
        Value::Object(root)
    }
}

fn parse_input_spec(name: &str, raw: &Value) -> InputSpec {
    match raw {
        Value::String(tag) => InputSpec::new(name, tag.as_str()),
        Value::Array(items) => {
            let type_tag = match items.first() {
                Some(Value::String(tag)) => tag.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            let options = items
                .get(1)
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            InputSpec {
                name: name.to_string(),
                type_tag,
                options,
            }
        }
        _ => InputSpec::new(name, ""),
    }
}

pub trait TensorSource: Send {
    fn to_float_tensor(&self) -> Result<ArrayD<f32>, NodeError>;
}

pub enum NodeOutput {
    Tuple(Vec<NodeOutput>),
    Tensor(ArrayD<f32>),
    Convertible(Box<dyn TensorSource>),
    Value(Value),
    None,
}

impl fmt::Debug for NodeOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tuple(items) => f.debug_tuple("Tuple").field(items).finish(),
            Self::Tensor(array) => f.debug_tuple("Tensor").field(&array.shape()).finish(),
            Self::Convertible(_) => f.write_str("Convertible(..)"),
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::None => f.write_str("None"),
        }
    }
}

pub trait HostNode: Send + Sync + 'static {
    fn input_types(&self) -> Option<InputSchema>;

    fn function(&self) -> Option<String> {
        None
    }

    fn has_method(&self, name: &str) -> bool;

    fn call(&self, method: &str, args: AdaptedArguments) -> Result<NodeOutput, NodeError>;
}

pub type NodeMethod = Arc<dyn Fn(AdaptedArguments) -> Result<NodeOutput, NodeError> + Send + Sync>;

#[derive(Clone, Default)]
pub struct FnNode {
    schema: Option<InputSchema>,
    function: Option<String>,
    methods: BTreeMap<String, NodeMethod>,
}

impl FnNode {
    pub fn new(schema: InputSchema) -> Self {
        Self {
            schema: Some(schema),
            function: None,
            methods: BTreeMap::new(),
        }
    }

    pub fn without_schema() -> Self {
        Self::default()
    }

    pub fn function(mut self, name: impl Into<String>) -> Self {
        self.function = Some(name.into());
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(AdaptedArguments) -> Result<NodeOutput, NodeError> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(method));
        self
    }

    pub fn into_shared(self) -> Arc<dyn HostNode> {
        Arc::new(self)
    }
}

impl HostNode for FnNode {
    fn input_types(&self) -> Option<InputSchema> {
        self.schema.clone()
    }

    fn function(&self) -> Option<String> {
        self.function.clone()
    }

    fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    fn call(&self, method: &str, args: AdaptedArguments) -> Result<NodeOutput, NodeError> {
        let handler = self
            .methods
            .get(method)
            .ok_or_else(|| NodeError::Failed(format!("no method named '{method}'")))?;
        handler(args)
    }
}
