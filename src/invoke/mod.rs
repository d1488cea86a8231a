use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use ndarray::{Array4, ArrayD, Axis, Ix4, IxDyn};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::adapter::AdaptedArguments;
use crate::codec::ImageTensor;
use crate::host::{NodeError, NodeOutput};
use crate::registry::NodeDescriptor;

const MIN_IMAGE_RANK: usize = 3;
const MAX_IMAGE_RANK: usize = 4;

#[derive(Debug, Error)]
pub enum InvocationFailed {
    #[error("node '{node_type}' failed: {source}")]
    Raised {
        node_type: String,
        #[source]
        source: NodeError,
    },
    #[error("node '{node_type}' panicked: {message}")]
    Panicked { node_type: String, message: String },
    #[error("node '{node_type}' returned an unusable result: {detail}")]
    UnusableOutput { node_type: String, detail: String },
}

impl InvocationFailed {
    pub fn node_type(&self) -> &str {
        match self {
            Self::Raised { node_type, .. }
            | Self::Panicked { node_type, .. }
            | Self::UnusableOutput { node_type, .. } => node_type.as_str(),
        }
    }
}

pub fn invoke_and_normalize(
    descriptor: &NodeDescriptor,
    args: AdaptedArguments,
) -> Result<ImageTensor, InvocationFailed> {
    let node_type = descriptor.type_name();
    let entry_point = descriptor.entry_point();
    debug!(
        node_type,
        entry_point = entry_point.name(),
        args = ?args.keys(),
        "invoking node"
    );

    let output = catch_unwind(AssertUnwindSafe(|| entry_point.call(args)))
        .map_err(|payload| InvocationFailed::Panicked {
            node_type: node_type.to_string(),
            message: panic_message(payload.as_ref()),
        })?
        .map_err(|source| InvocationFailed::Raised {
            node_type: node_type.to_string(),
            source,
        })?;

    let unusable = |detail: String| InvocationFailed::UnusableOutput {
        node_type: node_type.to_string(),
        detail,
    };
    let array = classify_output(output).map_err(unusable)?;
    normalize_tensor(array).map_err(unusable)
}

pub fn classify_output(output: NodeOutput) -> Result<ArrayD<f32>, String> {
    match output {
        NodeOutput::Tuple(items) => {
            let first = items
                .into_iter()
                .next()
                .ok_or_else(|| String::from("node returned an empty tuple"))?;
            convert_to_tensor(first)
        }
        other => convert_to_tensor(other),
    }
}

fn convert_to_tensor(output: NodeOutput) -> Result<ArrayD<f32>, String> {
    match output {
        NodeOutput::Tensor(array) => Ok(array),
        NodeOutput::Convertible(source) => source.to_float_tensor().map_err(|e| e.to_string()),
        NodeOutput::Value(value) => array_from_json(&value),
        NodeOutput::Tuple(_) => Err(String::from("nested tuple is not a tensor")),
        NodeOutput::None => Err(String::from("node returned nothing")),
    }
}

pub fn array_from_json(value: &Value) -> Result<ArrayD<f32>, String> {
    let mut shape = Vec::new();
    let mut cursor = value;
    while let Value::Array(items) = cursor {
        shape.push(items.len());
        match items.first() {
            Some(first) => cursor = first,
            None => break,
        }
    }

    let mut flat = Vec::new();
    flatten_json(value, shape.as_slice(), &mut flat)?;
    ArrayD::from_shape_vec(IxDyn(shape.as_slice()), flat).map_err(|e| e.to_string())
}

fn flatten_json(value: &Value, shape: &[usize], out: &mut Vec<f32>) -> Result<(), String> {
    match (value, shape.split_first()) {
        (Value::Array(items), Some((&len, rest))) => {
            if items.len() != len {
                return Err(format!("ragged array: expected {len} items, got {}", items.len()));
            }
            items.iter().try_for_each(|item| flatten_json(item, rest, out))
        }
        (Value::Number(number), None) => {
            let value = number
                .as_f64()
                .ok_or_else(|| format!("non-finite number {number}"))?;
            out.push(value as f32);
            Ok(())
        }
        (Value::Bool(flag), None) => {
            out.push(if *flag { 1.0 } else { 0.0 });
            Ok(())
        }
        (other, _) => Err(format!("cannot convert {other} to a float tensor")),
    }
}

/// Brings a raw array to `[1, H, W, 3]`.
///
/// Rank 3 gains a batch axis, rank 4 keeps batch 0. Single-channel data is
/// replicated to RGB and four channels are composited onto white.
pub fn normalize_tensor(array: ArrayD<f32>) -> Result<ImageTensor, String> {
    let rank = array.ndim();
    if rank < MIN_IMAGE_RANK {
        return Err(format!(
            "expected at least {MIN_IMAGE_RANK} dimensions, got shape {:?}",
            array.shape()
        ));
    }
    if rank > MAX_IMAGE_RANK {
        return Err(format!("unsupported tensor rank {rank}"));
    }

    let batched = if rank == MIN_IMAGE_RANK {
        array.insert_axis(Axis(0))
    } else {
        if array.shape()[0] == 0 {
            return Err(String::from("tensor batch is empty"));
        }
        array.index_axis(Axis(0), 0).insert_axis(Axis(0)).to_owned()
    };
    let batched = batched
        .into_dimensionality::<Ix4>()
        .map_err(|e| e.to_string())?;

    let batched = match batched.shape()[3] {
        1 => replicate_gray(&batched),
        _ => batched,
    };
    ImageTensor::try_from_array(batched).map_err(|e| e.to_string())
}

fn replicate_gray(data: &Array4<f32>) -> Array4<f32> {
    let shape = data.shape();
    Array4::from_shape_fn((shape[0], shape[1], shape[2], 3), |(b, y, x, _)| {
        data[[b, y, x, 0]]
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("non-string panic payload")
    }
}
