mod coerce;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::codec::ImageTensor;
use crate::host::{InputSchema, InputSpec, NodeError};
use crate::registry::NodeDescriptor;

pub use coerce::{coerce, CoercionFailure};

pub const IMAGE_PARAM: &str = "image";
const HIDDEN_IDENTITY_PARAM: &str = "unique_id";
const HIDDEN_IDENTITY_TAG: &str = "UNIQUE_ID";
const IMAGE_TAG: &str = "IMAGE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Image,
    Float,
    Int,
    Bool,
    String,
    Unknown,
}

impl TypeTag {
    /// Decodes a raw schema tag. Matching is by substring, first rule wins.
    pub fn decode(raw: &str) -> Self {
        if raw.contains(IMAGE_TAG) {
            Self::Image
        } else if raw.contains("FLOAT") || raw.contains("float") {
            Self::Float
        } else if raw.contains("INT") || raw.contains("int") {
            Self::Int
        } else if raw.contains("BOOLEAN") || raw.contains("bool") {
            Self::Bool
        } else if raw.contains("STRING") || raw.contains("str") {
            Self::String
        } else {
            Self::Unknown
        }
    }

    pub fn for_spec(spec: &InputSpec) -> Self {
        if spec.name == IMAGE_PARAM {
            Self::Image
        } else {
            Self::decode(spec.type_tag.as_str())
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Float => "float",
            Self::Int => "int",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Unknown => "unknown",
        }
    }
}

fn is_hidden_identity(spec: &InputSpec) -> bool {
    spec.name == HIDDEN_IDENTITY_PARAM || spec.type_tag.contains(HIDDEN_IDENTITY_TAG)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterBag(Map<String, Value>);

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Exact match first; otherwise the first key equal ignoring case, in
    /// iteration order. `null` counts as not supplied.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        match self.0.get(key) {
            Some(value) => non_null(value),
            None => {
                let wanted = key.to_lowercase();
                self.0
                    .iter()
                    .find(|(candidate, _)| candidate.to_lowercase() == wanted)
                    .and_then(|(_, value)| non_null(value))
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn non_null(value: &Value) -> Option<&Value> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    Image(ImageTensor),
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
    Raw(Value),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdaptedArguments {
    entries: Vec<(String, ArgValue)>,
}

impl AdaptedArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: ArgValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(key, _)| key.as_str()).collect()
    }

    pub fn image(&self, name: &str) -> Result<&ImageTensor, NodeError> {
        match self.get(name) {
            Some(ArgValue::Image(image)) => Ok(image),
            Some(other) => Err(NodeError::InvalidArgument {
                name: name.to_string(),
                detail: format!("expected image, got {other:?}"),
            }),
            None => Err(NodeError::MissingArgument(name.to_string())),
        }
    }

    pub fn float(&self, name: &str) -> Result<f64, NodeError> {
        match self.get(name) {
            Some(ArgValue::Float(value)) => Ok(*value),
            Some(ArgValue::Int(value)) => Ok(*value as f64),
            Some(other) => Err(NodeError::InvalidArgument {
                name: name.to_string(),
                detail: format!("expected number, got {other:?}"),
            }),
            None => Err(NodeError::MissingArgument(name.to_string())),
        }
    }
}

pub fn adapt(
    descriptor: &NodeDescriptor,
    image: &ImageTensor,
    params: &ParameterBag,
) -> AdaptedArguments {
    adapt_to_schema(descriptor.schema(), image, params)
}

pub fn adapt_to_schema(
    schema: &InputSchema,
    image: &ImageTensor,
    params: &ParameterBag,
) -> AdaptedArguments {
    let mut args = AdaptedArguments::new();

    for spec in &schema.required {
        if is_hidden_identity(spec) {
            continue;
        }
        let tag = TypeTag::for_spec(spec);
        if tag == TypeTag::Image {
            args.insert(spec.name.as_str(), ArgValue::Image(image.clone()));
            continue;
        }

        let Some(raw) = params
            .lookup(spec.name.as_str())
            .or_else(|| spec.default_value().and_then(non_null))
        else {
            debug!(param = %spec.name, "required parameter unresolved; leaving it unbound");
            continue;
        };
        args.insert(spec.name.as_str(), coerce_or_pass_through(spec, tag, raw));
    }

    for spec in &schema.optional {
        if is_hidden_identity(spec) || args.contains(spec.name.as_str()) {
            continue;
        }
        let Some(raw) = params.get(spec.name.as_str()).and_then(non_null) else {
            continue;
        };
        let tag = TypeTag::for_spec(spec);
        let value = if tag == TypeTag::Image {
            ArgValue::Image(image.clone())
        } else {
            coerce_or_pass_through(spec, tag, raw)
        };
        args.insert(spec.name.as_str(), value);
    }

    if !args.contains(IMAGE_PARAM) && params.contains_key(IMAGE_PARAM) {
        args.insert(IMAGE_PARAM, ArgValue::Image(image.clone()));
    }

    args
}

fn coerce_or_pass_through(spec: &InputSpec, tag: TypeTag, raw: &Value) -> ArgValue {
    match coerce(tag, raw) {
        Ok(value) => value,
        Err(failure) => {
            debug!(
                param = %spec.name,
                tag = tag.as_str(),
                raw = %failure.raw,
                "coercion failed; passing value through"
            );
            ArgValue::Raw(failure.raw)
        }
    }
}
