use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::adapter::ParameterBag;
use crate::codec::ImageTensor;

const NO_OP_TOLERANCE: f64 = 1e-4;
const MIN_BRIGHTNESS: f64 = 0.1;
const MAX_BRIGHTNESS: f64 = 10.0;
const CONTRAST_THRESHOLD: f64 = 0.01;
const CONTRAST_GAIN: f64 = 0.3;
const SHARPEN_THRESHOLD: f64 = 0.1;
const SHARPEN_KERNEL: [[f64; 3]; 3] = [[0.0, -0.3, 0.0], [-0.3, 2.2, -0.3], [0.0, -0.3, 0.0]];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackOptions {
    pub color_space: bool,
}

pub fn apply_fallback(
    image: &ImageTensor,
    params: &ParameterBag,
    options: &FallbackOptions,
) -> ImageTensor {
    let mut pixels = image
        .frame()
        .mapv(|value| f64::from((value.clamp(0.0, 1.0) * 255.0).round()));

    for (name, raw) in params.iter() {
        let Some(value) = numeric_value(raw) else {
            continue;
        };
        if value.abs() < NO_OP_TOLERANCE || (value - 1.0).abs() < NO_OP_TOLERANCE {
            continue;
        }
        apply_step(&mut pixels, value, options);
        debug!(param = %name, value, "fallback adjustment applied");
    }

    let frame = pixels.mapv(|value| f32::from(truncate_u8(value)) / 255.0);
    ImageTensor::try_from_frame(frame).unwrap_or_else(|_| image.clone())
}

fn numeric_value(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Bool(flag) => Some(if *flag { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn apply_step(pixels: &mut Array3<f64>, value: f64, options: &FallbackOptions) {
    let magnitude = value.abs();

    if (MIN_BRIGHTNESS..=MAX_BRIGHTNESS).contains(&magnitude) {
        let factor = if value > 0.0 { value } else { 1.0 / magnitude };
        let factor = factor.clamp(MIN_BRIGHTNESS, MAX_BRIGHTNESS);
        pixels.mapv_inplace(|px| px * factor);
    }

    if magnitude > CONTRAST_THRESHOLD {
        let offset = value * CONTRAST_GAIN;
        pixels.mapv_inplace(|px| px + offset);
    }

    if options.color_space && magnitude > CONTRAST_THRESHOLD {
        shift_hue_and_saturation(pixels, value);
    }

    if options.color_space && magnitude > SHARPEN_THRESHOLD {
        sharpen(pixels, (magnitude * 0.05).min(0.5));
    }

    pixels.mapv_inplace(|px| px.clamp(0.0, 255.0));
}

fn shift_hue_and_saturation(pixels: &mut Array3<f64>, value: f64) {
    let saturation_factor = 1.0 + value.rem_euclid(2.0) * 0.15;
    let hue_shift = value.rem_euclid(180.0) * 0.1;
    for mut pixel in pixels.lanes_mut(Axis(2)) {
        let [h, s, v] = rgb_to_hsv([
            truncate_u8(pixel[0]),
            truncate_u8(pixel[1]),
            truncate_u8(pixel[2]),
        ]);
        let s = (f64::from(s) * saturation_factor).clamp(0.0, 255.0);
        let h = (f64::from(h) + hue_shift).rem_euclid(180.0);
        let rgb = hsv_to_rgb([h as u8, s as u8, v]);
        for (channel, out) in rgb.iter().enumerate() {
            pixel[channel] = f64::from(*out);
        }
    }
}

fn sharpen(pixels: &mut Array3<f64>, strength: f64) {
    let source = pixels.mapv(|px| f64::from(truncate_u8(px)));
    let (height, width, channels) = source.dim();
    for y in 0..height {
        for x in 0..width {
            for c in 0..channels {
                let mut acc = 0.0;
                for (ky, row) in SHARPEN_KERNEL.iter().enumerate() {
                    for (kx, weight) in row.iter().enumerate() {
                        if *weight == 0.0 {
                            continue;
                        }
                        let sy = reflect_101(y as isize + ky as isize - 1, height);
                        let sx = reflect_101(x as isize + kx as isize - 1, width);
                        acc += weight * strength * source[[sy, sx, c]];
                    }
                }
                pixels[[y, x, c]] = acc.round().clamp(0.0, 255.0);
            }
        }
    }
}

/// Border index mirroring without repeating the edge sample (`gfedcb|abcdefgh|gfedcba`).
fn reflect_101(index: isize, len: usize) -> usize {
    if len <= 1 {
        return 0;
    }
    let last = len as isize - 1;
    let mut i = index;
    while i < 0 || i > last {
        i = if i < 0 { -i } else { 2 * last - i };
    }
    i as usize
}

fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let saturation = if max > 0.0 { delta * 255.0 / max } else { 0.0 };
    let mut hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }
    [
        ((hue / 2.0).round() as u16 % 180) as u8,
        saturation.round() as u8,
        max as u8,
    ]
}

fn hsv_to_rgb([h, s, v]: [u8; 3]) -> [u8; 3] {
    let sector_pos = f64::from(h) * 2.0 / 60.0;
    let s = f64::from(s) / 255.0;
    let v = f64::from(v) / 255.0;
    let sector = sector_pos.floor();
    let f = sector_pos - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match (sector as i64).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let to_u8 = |channel: f64| (channel * 255.0).round().clamp(0.0, 255.0) as u8;
    [to_u8(r), to_u8(g), to_u8(b)]
}

fn truncate_u8(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use serde_json::json;

    fn gray_image(level: u8) -> ImageTensor {
        ImageTensor::from_rgb8(&RgbImage::from_pixel(6, 4, image::Rgb([level, level, level])))
    }

    fn gradient() -> ImageTensor {
        ImageTensor::from_rgb8(&RgbImage::from_fn(8, 5, |x, y| {
            image::Rgb([(x * 30) as u8, (y * 50) as u8, 90])
        }))
    }

    #[test]
    fn no_op_values_leave_the_image_unchanged() {
        let image = gradient();
        let params = ParameterBag::new()
            .with("zero", 0.0)
            .with("one", 1)
            .with("one_text", "1.0")
            .with("flag", true)
            .with("label", "sharp")
            .with("nothing", Value::Null);
        for options in [FallbackOptions::default(), FallbackOptions { color_space: true }] {
            assert_eq!(apply_fallback(&image, &params, &options), image);
        }
    }

    #[test]
    fn positive_value_brightens_and_keeps_dimensions() {
        let image = gradient();
        let params = ParameterBag::new().with("brightness", 2.0);
        let out = apply_fallback(&image, &params, &FallbackOptions::default());

        assert_eq!(out.as_array().shape(), image.as_array().shape());
        assert!(out.mean() > image.mean());
    }

    #[test]
    fn brightness_then_contrast_offset_on_gray() {
        let out = apply_fallback(
            &gray_image(100),
            &ParameterBag::new().with("amount", json!("2")),
            &FallbackOptions::default(),
        );
        // 100 * 2 + 0.6, truncated
        assert!((out.frame()[[0, 0, 0]] - 200.0 / 255.0).abs() < 1e-6);

        let out = apply_fallback(
            &gray_image(100),
            &ParameterBag::new().with("amount", -2.0),
            &FallbackOptions::default(),
        );
        // 100 * 0.5 - 0.6
        assert!((out.frame()[[0, 0, 0]] - 49.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn small_values_skip_brightness_but_still_offset() {
        let out = apply_fallback(
            &gray_image(100),
            &ParameterBag::new().with("tiny", 0.05),
            &FallbackOptions::default(),
        );
        // 100 + 0.015 truncates back to 100
        assert_eq!(out, gray_image(100));

        let out = apply_fallback(
            &gray_image(100),
            &ParameterBag::new().with("big", 40.0),
            &FallbackOptions::default(),
        );
        // out of brightness range, offset 12
        assert!((out.frame()[[1, 1, 1]] - 112.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn color_space_steps_apply_unnormalized_sharpen_kernel() {
        let out = apply_fallback(
            &gray_image(100),
            &ParameterBag::new().with("brightness", 2.0),
            &FallbackOptions { color_space: true },
        );
        // gray survives the HSV shift at 200; the kernel sums to 0.1 at strength 0.1
        assert!((out.frame()[[2, 3, 0]] - 20.0 / 255.0).abs() < 1e-6);
        assert_eq!(out.as_array().shape(), &[1, 4, 6, 3]);
    }

    #[test]
    fn hsv_conversion_round_trips_primaries() {
        for rgb in [[255, 0, 0], [0, 255, 0], [0, 0, 255], [128, 128, 128]] {
            assert_eq!(hsv_to_rgb(rgb_to_hsv(rgb)), rgb);
        }
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
    }

    #[test]
    fn reflect_101_mirrors_without_edge_repeat() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(2, 5), 2);
        assert_eq!(reflect_101(-1, 1), 0);
    }
}
