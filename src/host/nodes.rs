use std::sync::Arc;

use image::RgbImage;

use super::{HostNode, InputSchema, InputSpec, NodeError, NodeOutput, NodeRegistry};
use crate::adapter::AdaptedArguments;
use crate::codec::ImageTensor;

pub const COLOR_ADJUST: &str = "ColorAdjust";

#[derive(Debug, Clone, Copy, PartialEq)]
struct ColorAdjustment {
    brightness: f32,
    contrast: f32,
    saturation: f32,
    gamma: f32,
}

impl Default for ColorAdjustment {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            gamma: 1.0,
        }
    }
}

impl ColorAdjustment {
    fn from_args(args: &AdaptedArguments) -> Result<Self, NodeError> {
        let factor = |name: &str, default: f32| -> Result<f32, NodeError> {
            if args.contains(name) {
                args.float(name).map(|value| value as f32)
            } else {
                Ok(default)
            }
        };
        let base = Self::default();
        Ok(Self {
            brightness: factor("brightness", base.brightness)?,
            contrast: factor("contrast", base.contrast)?,
            saturation: factor("saturation", base.saturation)?,
            gamma: factor("gamma", base.gamma)?,
        })
    }

    fn apply(&self, image: &mut RgbImage) {
        if (self.brightness - 1.0).abs() > f32::EPSILON {
            apply_brightness_in_place(image, self.brightness);
        }
        if (self.contrast - 1.0).abs() > f32::EPSILON {
            apply_contrast_in_place(image, self.contrast);
        }
        if (self.saturation - 1.0).abs() > f32::EPSILON {
            apply_saturation_in_place(image, self.saturation);
        }
        if self.gamma > 0.0 && (self.gamma - 1.0).abs() > f32::EPSILON {
            apply_gamma_in_place(image, self.gamma);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ColorAdjustNode;

impl ColorAdjustNode {
    fn factor_spec(name: &str) -> InputSpec {
        InputSpec::new(name, "FLOAT")
            .with_default(1.0)
            .with_option("min", 0.0)
            .with_option("max", 10.0)
            .with_option("step", 0.01)
    }
}

impl HostNode for ColorAdjustNode {
    fn input_types(&self) -> Option<InputSchema> {
        Some(
            InputSchema::new()
                .required(InputSpec::new("image", "IMAGE"))
                .required(Self::factor_spec("brightness"))
                .required(Self::factor_spec("contrast"))
                .required(Self::factor_spec("saturation"))
                .required(Self::factor_spec("gamma")),
        )
    }

    fn function(&self) -> Option<String> {
        Some(String::from("apply"))
    }

    fn has_method(&self, name: &str) -> bool {
        name == "apply"
    }

    fn call(&self, method: &str, args: AdaptedArguments) -> Result<NodeOutput, NodeError> {
        if method != "apply" {
            return Err(NodeError::Failed(format!("no method named '{method}'")));
        }
        let adjustment = ColorAdjustment::from_args(&args)?;
        let mut rgb = args.image("image")?.to_rgb8();
        adjustment.apply(&mut rgb);
        let adjusted = ImageTensor::from_rgb8(&rgb).into_array().into_dyn();
        Ok(NodeOutput::Tuple(vec![NodeOutput::Tensor(adjusted)]))
    }
}

pub fn stock_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register_class(
        COLOR_ADJUST,
        Arc::new(|| -> Result<Arc<dyn HostNode>, NodeError> { Ok(Arc::new(ColorAdjustNode)) }),
    );
    registry
}

fn apply_brightness_in_place(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        for i in 0..3 {
            pixel[i] = clamp_u8(f32::from(pixel[i]) * factor);
        }
    }
}

fn apply_contrast_in_place(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        for i in 0..3 {
            let centered = f32::from(pixel[i]) - 128.0;
            pixel[i] = clamp_u8(centered * factor + 128.0);
        }
    }
}

fn apply_saturation_in_place(image: &mut RgbImage, factor: f32) {
    for pixel in image.pixels_mut() {
        let r = f32::from(pixel[0]);
        let g = f32::from(pixel[1]);
        let b = f32::from(pixel[2]);
        let gray = 0.299 * r + 0.587 * g + 0.114 * b;
        pixel[0] = clamp_u8(gray + (r - gray) * factor);
        pixel[1] = clamp_u8(gray + (g - gray) * factor);
        pixel[2] = clamp_u8(gray + (b - gray) * factor);
    }
}

fn apply_gamma_in_place(image: &mut RgbImage, gamma: f32) {
    let inv_gamma = 1.0 / gamma.max(f32::EPSILON);
    let mut lut = [0_u8; 256];
    for (i, out) in lut.iter_mut().enumerate() {
        *out = clamp_u8((((i as f32) / 255.0).powf(inv_gamma)) * 255.0);
    }
    for pixel in image.pixels_mut() {
        for i in 0..3 {
            pixel[i] = lut[pixel[i] as usize];
        }
    }
}

fn clamp_u8(value: f32) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.clamp(0.0, 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::ArgValue;

    fn gray_tensor(level: u8) -> ImageTensor {
        ImageTensor::from_rgb8(&RgbImage::from_pixel(4, 3, image::Rgb([level, level, level])))
    }

    fn first_tensor(output: NodeOutput) -> ndarray::ArrayD<f32> {
        match output {
            NodeOutput::Tuple(mut items) => match items.remove(0) {
                NodeOutput::Tensor(array) => array,
                other => panic!("expected tensor, got {other:?}"),
            },
            other => panic!("expected tuple, got {other:?}"),
        }
    }

    #[test]
    fn brightness_scales_pixel_values() {
        let mut args = AdaptedArguments::new();
        args.insert("image", ArgValue::Image(gray_tensor(100)));
        args.insert("brightness", ArgValue::Float(1.5));

        let output = ColorAdjustNode.call("apply", args).expect("apply");
        let array = first_tensor(output);
        assert_eq!(array.shape(), &[1, 3, 4, 3]);
        assert!((array[[0, 0, 0, 0]] - 150.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn neutral_factors_leave_the_image_alone() {
        let mut args = AdaptedArguments::new();
        args.insert("image", ArgValue::Image(gray_tensor(77)));
        for name in ["brightness", "contrast", "saturation", "gamma"] {
            args.insert(name, ArgValue::Float(1.0));
        }
        let array = first_tensor(ColorAdjustNode.call("apply", args).expect("apply"));
        assert!(array.iter().all(|value| (value - 77.0 / 255.0).abs() < 1e-6));
    }

    #[test]
    fn uncoerced_factor_is_a_node_error() {
        let mut args = AdaptedArguments::new();
        args.insert("image", ArgValue::Image(gray_tensor(10)));
        args.insert("contrast", ArgValue::Raw(serde_json::json!("loud")));
        assert!(matches!(
            ColorAdjustNode.call("apply", args),
            Err(NodeError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn stock_registry_builds_fresh_color_adjust_nodes() {
        let registry = stock_registry();
        let node = registry
            .get(COLOR_ADJUST)
            .expect("registered")
            .instantiate()
            .expect("instantiate");
        assert_eq!(node.function().as_deref(), Some("apply"));
        assert_eq!(node.input_types().expect("schema").required.len(), 5);
    }
}
