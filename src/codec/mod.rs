use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, RgbImage, RgbaImage};
use ndarray::{Array3, Array4, ArrayView3, Axis};
use thiserror::Error;

pub const DATA_URI_JPEG_PREFIX: &str = "data:image/jpeg;base64,";
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_PREVIEW_MAX_EDGE: u32 = 1024;

const RGB_CHANNELS: usize = 3;
const RGBA_CHANNELS: usize = 4;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unsupported image data format")]
    UnsupportedPayload,
    #[error("invalid base64 image data: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
    #[error("unsupported image layout: {0}")]
    UnsupportedLayout(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Array4<f32>,
}

impl ImageTensor {
    pub fn from_rgb8(image: &RgbImage) -> Self {
        let (width, height) = image.dimensions();
        let data = Array4::from_shape_fn(
            (1, height as usize, width as usize, RGB_CHANNELS),
            |(_, y, x, c)| f32::from(image.get_pixel(x as u32, y as u32)[c]) / 255.0,
        );
        Self { data }
    }

    pub fn from_rgba8(image: &RgbaImage) -> Self {
        Self::from_rgb8(&flatten_on_white(image))
    }

    pub fn from_dynamic(image: &DynamicImage) -> Self {
        if image.color().has_alpha() {
            Self::from_rgba8(&image.to_rgba8())
        } else {
            Self::from_rgb8(&image.to_rgb8())
        }
    }

    pub fn try_from_array(data: Array4<f32>) -> Result<Self, CodecError> {
        let shape = data.shape().to_vec();
        if shape[0] != 1 {
            return Err(CodecError::UnsupportedLayout(format!(
                "expected batch of 1, got shape {shape:?}"
            )));
        }
        if shape[1] == 0 || shape[2] == 0 {
            return Err(CodecError::UnsupportedLayout(format!(
                "empty image with shape {shape:?}"
            )));
        }
        match shape[3] {
            RGB_CHANNELS => Ok(Self { data }),
            RGBA_CHANNELS => Ok(Self {
                data: composite_alpha_on_white(&data),
            }),
            other => Err(CodecError::UnsupportedLayout(format!(
                "expected 3 or 4 channels, got {other}"
            ))),
        }
    }

    pub fn try_from_frame(frame: Array3<f32>) -> Result<Self, CodecError> {
        Self::try_from_array(frame.insert_axis(Axis(0)))
    }

    pub fn height(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn width(&self) -> usize {
        self.data.shape()[2]
    }

    pub fn channels(&self) -> usize {
        self.data.shape()[3]
    }

    pub fn as_array(&self) -> &Array4<f32> {
        &self.data
    }

    pub fn into_array(self) -> Array4<f32> {
        self.data
    }

    pub fn frame(&self) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(0), 0)
    }

    pub fn mean(&self) -> f32 {
        self.data.mean().unwrap_or(0.0)
    }

    pub fn to_rgb8(&self) -> RgbImage {
        let frame = self.frame();
        RgbImage::from_fn(self.width() as u32, self.height() as u32, |x, y| {
            let (x, y) = (x as usize, y as usize);
            image::Rgb([
                quantize(frame[[y, x, 0]]),
                quantize(frame[[y, x, 1]]),
                quantize(frame[[y, x, 2]]),
            ])
        })
    }
}

pub fn decode_wire_image(payload: &str) -> Result<ImageTensor, CodecError> {
    let encoded = if payload.starts_with("data:image") {
        payload
            .split_once(',')
            .map(|(_, body)| body)
            .ok_or(CodecError::UnsupportedPayload)?
    } else {
        payload
    };
    let compact = encoded
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect::<String>();
    let bytes = STANDARD.decode(compact.as_bytes())?;
    let image = image::load_from_memory(bytes.as_slice()).map_err(CodecError::Decode)?;
    Ok(ImageTensor::from_dynamic(&image))
}

pub fn encode_wire_image(tensor: &ImageTensor, quality: u8) -> Result<String, CodecError> {
    encode_jpeg_data_uri(&tensor.to_rgb8(), quality)
}

pub fn encode_preview_image(
    tensor: &ImageTensor,
    max_edge: u32,
    quality: u8,
) -> Result<String, CodecError> {
    encode_jpeg_data_uri(&preview_thumbnail(&tensor.to_rgb8(), max_edge), quality)
}

pub fn preview_thumbnail(image: &RgbImage, max_edge: u32) -> RgbImage {
    let (width, height) = image.dimensions();
    if max_edge == 0 || (width <= max_edge && height <= max_edge) {
        return image.clone();
    }
    let ratio = f64::min(
        f64::from(max_edge) / f64::from(width),
        f64::from(max_edge) / f64::from(height),
    );
    let new_width = ((f64::from(width) * ratio) as u32).max(1);
    let new_height = ((f64::from(height) * ratio) as u32).max(1);
    image::imageops::resize(image, new_width, new_height, FilterType::Lanczos3)
}

fn encode_jpeg_data_uri(image: &RgbImage, quality: u8) -> Result<String, CodecError> {
    let mut buffer = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
    DynamicImage::ImageRgb8(image.clone())
        .write_with_encoder(encoder)
        .map_err(CodecError::Encode)?;
    Ok(format!(
        "{DATA_URI_JPEG_PREFIX}{}",
        STANDARD.encode(buffer.into_inner())
    ))
}

fn flatten_on_white(image: &RgbaImage) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        let alpha = u32::from(px[3]);
        let blend = |c: u8| ((u32::from(c) * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        image::Rgb([blend(px[0]), blend(px[1]), blend(px[2])])
    })
}

fn composite_alpha_on_white(data: &Array4<f32>) -> Array4<f32> {
    let shape = data.shape();
    Array4::from_shape_fn((shape[0], shape[1], shape[2], RGB_CHANNELS), |(b, y, x, c)| {
        let alpha = data[[b, y, x, 3]].clamp(0.0, 1.0);
        data[[b, y, x, c]] * alpha + (1.0 - alpha)
    })
}

fn quantize(value: f32) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}
