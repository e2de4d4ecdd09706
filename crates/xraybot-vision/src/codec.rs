/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Tensor codec: image bytes to model input, raw model output to a
//! probability distribution.

use image::imageops::{self, FilterType};
use tract_onnx::prelude::tract_ndarray::Array4;

use crate::tensor::{ElementType, ImageTensor, InputScaling, Quantization, RawOutput, TensorSpec};
use crate::VisionError;

/// A distribution whose sum is within this distance of 1.0 is taken as
/// already normalized.
pub const SUM_TOLERANCE: f32 = 0.01;

// ---------------------------------------------------------------------------
// Encode
// ---------------------------------------------------------------------------

/// Decode `image_bytes` and shape it into the tensor described by `spec`.
///
/// The image is always converted to RGB first (palette, RGBA and gray
/// sources included), resized to `spec.width x spec.height`, then reduced to
/// the plain mean of R, G and B when the model takes a single channel.
///
/// # Errors
///
/// - `VisionError::Decode` if the bytes are not a supported image
/// - `VisionError::ShapeMismatch` if `spec` asks for neither 1 nor 3 channels
pub fn encode(
    image_bytes: &[u8],
    spec: &TensorSpec,
    scaling: InputScaling,
) -> Result<ImageTensor, VisionError> {
    let (width, height) = match (u32::try_from(spec.width), u32::try_from(spec.height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(shape_error(spec, "unrepresentable image size")),
    };

    let rgb = image::load_from_memory(image_bytes)?.to_rgb8();
    let resized = imageops::resize(&rgb, width, height, FilterType::Triangle);

    // Samples stay in the 0..=255 domain until the final cast.
    let samples: Vec<f32> = match spec.channels {
        1 => resized
            .pixels()
            .map(|p| (f32::from(p[0]) + f32::from(p[1]) + f32::from(p[2])) / 3.0)
            .collect(),
        3 => resized.as_raw().iter().map(|&v| f32::from(v)).collect(),
        n => return Err(shape_error(spec, &format!("{n} channels"))),
    };

    let shape = (1, spec.height, spec.width, spec.channels);
    let tensor = match spec.dtype {
        ElementType::F32 => Array4::from_shape_vec(
            shape,
            samples.into_iter().map(|v| v / 255.0).collect(),
        )
        .map(ImageTensor::F32),
        ElementType::U8 => {
            let affine = match scaling {
                InputScaling::Affine => spec.quantization.filter(Quantization::is_meaningful),
                InputScaling::FullRange => None,
            };
            let values = samples
                .into_iter()
                .map(|v| match affine {
                    Some(q) => quantize_affine(v / 255.0, q),
                    None => truncate_u8(v),
                })
                .collect();
            Array4::from_shape_vec(shape, values).map(ImageTensor::U8)
        }
    };

    tensor.map_err(|e| shape_error(spec, &e.to_string()))
}

fn shape_error(spec: &TensorSpec, actual: &str) -> VisionError {
    VisionError::ShapeMismatch {
        expected: format!("{:?} {}", spec.shape(), spec.dtype),
        actual: actual.to_string(),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn truncate_u8(value: f32) -> u8 {
    value.clamp(0.0, 255.0) as u8
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn quantize_affine(real: f32, q: Quantization) -> u8 {
    let quantized = (real / q.scale).round() + q.zero_point as f32;
    quantized.clamp(0.0, 255.0) as u8
}

// ---------------------------------------------------------------------------
// Decode
// ---------------------------------------------------------------------------

/// Turn the raw model output into a probability distribution.
///
/// Quantized `u8` outputs are dequantized first. The result is then passed
/// through softmax unless it already sums to 1 within [`SUM_TOLERANCE`].
/// That check is a heuristic for telling softmax-terminated models from
/// logit-terminated ones without per-model configuration; a logit vector
/// that happens to sum to ~1 is returned as is.
///
/// # Errors
///
/// Returns `VisionError::EmptyOutput` for a zero-length output.
pub fn decode(raw: &RawOutput) -> Result<Vec<f32>, VisionError> {
    if raw.is_empty() {
        return Err(VisionError::EmptyOutput);
    }
    let values = dequantize(raw);
    if is_normalized(&values) {
        Ok(values)
    } else {
        Ok(softmax(&values))
    }
}

/// `(raw - zero_point) * scale` for quantized outputs; plain widening
/// otherwise, including when the scale is zero.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn dequantize(raw: &RawOutput) -> Vec<f32> {
    match raw {
        RawOutput::F32(values) => values.clone(),
        RawOutput::U8 {
            values,
            quantization,
        } => match quantization.filter(Quantization::is_meaningful) {
            Some(q) => values
                .iter()
                .map(|&v| (i32::from(v) - q.zero_point) as f32 * q.scale)
                .collect(),
            None => values.iter().map(|&v| f32::from(v)).collect(),
        },
    }
}

fn is_normalized(values: &[f32]) -> bool {
    if !values.iter().all(|v| (0.0..=1.0).contains(v)) {
        return false;
    }
    let sum: f32 = values.iter().sum();
    (sum - 1.0).abs() <= SUM_TOLERANCE
}

/// Softmax with the maximum subtracted before exponentiation.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn softmax(values: &[f32]) -> Vec<f32> {
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if is_pos_inf(max) {
        // Infinite logits split the whole mass between them.
        let hits = values.iter().filter(|&&v| is_pos_inf(v)).count() as f32;
        return values
            .iter()
            .map(|&v| if is_pos_inf(v) { 1.0 / hits } else { 0.0 })
            .collect();
    }
    let exps: Vec<f32> = values.iter().map(|&v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    if total > 0.0 && total.is_finite() {
        exps.into_iter().map(|e| e / total).collect()
    } else {
        // All inputs non-finite: fall back to uniform.
        let n = values.len() as f32;
        vec![1.0 / n; values.len()]
    }
}

fn is_pos_inf(v: f32) -> bool {
    v.is_infinite() && v.is_sign_positive()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn solid_rgb(w: u32, h: u32, px: [u8; 3]) -> Vec<u8> {
        png_bytes(&DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb(px))))
    }

    fn spec(h: usize, w: usize, c: usize, dtype: ElementType) -> TensorSpec {
        TensorSpec {
            height: h,
            width: w,
            channels: c,
            dtype,
            quantization: None,
        }
    }

    // --- encode ---

    #[test]
    fn test_encode_grayscale_f32_shape_and_mean() {
        let bytes = solid_rgb(40, 30, [10, 20, 30]);
        let tensor = encode(&bytes, &spec(8, 6, 1, ElementType::F32), InputScaling::FullRange)
            .unwrap();
        assert_eq!(tensor.shape(), [1, 8, 6, 1]);
        let ImageTensor::F32(arr) = tensor else {
            panic!("expected f32 tensor");
        };
        // Plain mean (20), not perceptual luminance.
        for v in &arr {
            assert!((v - 20.0 / 255.0).abs() < 1e-6, "got {v}");
        }
    }

    #[test]
    fn test_encode_rgb_f32_keeps_channels() {
        let bytes = solid_rgb(16, 16, [255, 0, 51]);
        let tensor =
            encode(&bytes, &spec(4, 4, 3, ElementType::F32), InputScaling::FullRange).unwrap();
        let ImageTensor::F32(arr) = tensor else {
            panic!("expected f32 tensor");
        };
        assert_eq!(arr.dim(), (1, 4, 4, 3));
        assert!((arr[[0, 2, 2, 0]] - 1.0).abs() < 1e-6);
        assert!(arr[[0, 2, 2, 1]].abs() < 1e-6);
        assert!((arr[[0, 2, 2, 2]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_encode_u8_full_range_truncates_mean() {
        // mean(10, 20, 31) = 20.33 → 20
        let bytes = solid_rgb(10, 10, [10, 20, 31]);
        let tensor =
            encode(&bytes, &spec(5, 5, 1, ElementType::U8), InputScaling::FullRange).unwrap();
        assert_eq!(tensor.dtype(), ElementType::U8);
        let ImageTensor::U8(arr) = tensor else {
            panic!("expected u8 tensor");
        };
        assert!(arr.iter().all(|&v| v == 20));
    }

    #[test]
    fn test_encode_u8_ignores_quantization_by_default() {
        let bytes = solid_rgb(10, 10, [200, 200, 200]);
        let mut s = spec(2, 2, 1, ElementType::U8);
        s.quantization = Some(Quantization {
            scale: 0.5,
            zero_point: 10,
        });
        let ImageTensor::U8(arr) = encode(&bytes, &s, InputScaling::FullRange).unwrap() else {
            panic!("expected u8 tensor");
        };
        assert!(arr.iter().all(|&v| v == 200));
    }

    #[test]
    fn test_encode_u8_affine_uses_model_quantization() {
        let bytes = solid_rgb(10, 10, [255, 255, 255]);
        let mut s = spec(2, 2, 1, ElementType::U8);
        s.quantization = Some(Quantization {
            scale: 1.0 / 128.0,
            zero_point: 64,
        });
        let ImageTensor::U8(arr) = encode(&bytes, &s, InputScaling::Affine).unwrap() else {
            panic!("expected u8 tensor");
        };
        // 1.0 / (1/128) + 64 = 192
        assert!(arr.iter().all(|&v| v == 192));
    }

    #[test]
    fn test_encode_affine_without_params_falls_back_to_full_range() {
        let bytes = solid_rgb(10, 10, [90, 90, 90]);
        let ImageTensor::U8(arr) =
            encode(&bytes, &spec(2, 2, 1, ElementType::U8), InputScaling::Affine).unwrap()
        else {
            panic!("expected u8 tensor");
        };
        assert!(arr.iter().all(|&v| v == 90));
    }

    #[test]
    fn test_encode_accepts_rgba_source() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(12, 12, Rgba([60, 60, 60, 0])));
        let tensor = encode(
            &png_bytes(&img),
            &spec(3, 3, 1, ElementType::F32),
            InputScaling::FullRange,
        )
        .unwrap();
        assert_eq!(tensor.shape(), [1, 3, 3, 1]);
    }

    #[test]
    fn test_encode_rejects_non_image_bytes() {
        let err = encode(
            b"definitely not an image",
            &spec(4, 4, 1, ElementType::F32),
            InputScaling::FullRange,
        )
        .unwrap_err();
        assert!(matches!(err, VisionError::Decode(_)));
    }

    #[test]
    fn test_encode_rejects_unsupported_channel_count() {
        let bytes = solid_rgb(4, 4, [0, 0, 0]);
        let err = encode(&bytes, &spec(4, 4, 4, ElementType::F32), InputScaling::FullRange)
            .unwrap_err();
        assert!(matches!(err, VisionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_encode_shape_matches_spec_for_various_sizes() {
        let bytes = solid_rgb(33, 17, [1, 2, 3]);
        for (h, w, c) in [(1, 1, 1), (224, 224, 1), (7, 13, 3), (64, 32, 3)] {
            for dtype in [ElementType::F32, ElementType::U8] {
                let s = spec(h, w, c, dtype);
                let tensor = encode(&bytes, &s, InputScaling::FullRange).unwrap();
                assert_eq!(tensor.shape(), [1, h, w, c]);
                assert_eq!(tensor.dtype(), dtype);
            }
        }
    }

    // --- decode ---

    #[test]
    fn test_decode_normalized_output_skips_softmax() {
        let probs = decode(&RawOutput::F32(vec![0.1, 0.7, 0.2])).unwrap();
        assert_eq!(probs, vec![0.1, 0.7, 0.2]);
    }

    #[test]
    fn test_decode_logits_apply_softmax() {
        let probs = decode(&RawOutput::F32(vec![2.0, 1.0, 0.1])).unwrap();
        assert!((probs[0] - 0.659).abs() < 1e-3, "got {}", probs[0]);
        assert!((probs[1] - 0.242).abs() < 1e-3);
        assert!((probs[2] - 0.099).abs() < 1e-3);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_decode_within_tolerance_is_left_alone() {
        let probs = decode(&RawOutput::F32(vec![0.5, 0.505])).unwrap();
        assert_eq!(probs, vec![0.5, 0.505]);
    }

    #[test]
    fn test_decode_dequantizes_u8_output() {
        // (raw - 0) / 256 → 0.25, 0.5, 0.25 sums to 1 so no softmax
        let raw = RawOutput::U8 {
            values: vec![64, 128, 64],
            quantization: Some(Quantization {
                scale: 1.0 / 256.0,
                zero_point: 0,
            }),
        };
        let probs = decode(&raw).unwrap();
        assert!((probs[0] - 0.25).abs() < 1e-6);
        assert!((probs[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_dequantize_with_zero_point() {
        let raw = RawOutput::U8 {
            values: vec![138, 128],
            quantization: Some(Quantization {
                scale: 0.1,
                zero_point: 128,
            }),
        };
        let values = dequantize(&raw);
        assert!((values[0] - 1.0).abs() < 1e-6);
        assert!(values[1].abs() < 1e-6);
    }

    #[test]
    fn test_dequantize_zero_scale_uses_raw_values() {
        let raw = RawOutput::U8 {
            values: vec![3, 7],
            quantization: Some(Quantization {
                scale: 0.0,
                zero_point: 5,
            }),
        };
        assert_eq!(dequantize(&raw), vec![3.0, 7.0]);
    }

    #[test]
    fn test_decode_u8_without_quantization_gets_softmax() {
        let raw = RawOutput::U8 {
            values: vec![0, 255],
            quantization: None,
        };
        let probs = decode(&raw).unwrap();
        assert!(probs[1] > 0.99);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_decode_always_sums_to_one() {
        let cases = [
            vec![0.3, 0.3, 0.4],
            vec![10.0, -10.0, 3.0, 0.0],
            vec![-1.0, -2.0],
            vec![1000.0, 999.0],
            vec![0.0],
        ];
        for case in cases {
            let probs = decode(&RawOutput::F32(case.clone())).unwrap();
            let sum: f32 = probs.iter().sum();
            assert!((sum - 1.0).abs() <= SUM_TOLERANCE, "{case:?} → {probs:?}");
        }
    }

    #[test]
    fn test_softmax_is_numerically_stable() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
        assert!(probs.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_softmax_positive_infinity_takes_all_mass() {
        assert_eq!(softmax(&[f32::INFINITY, 0.0, 0.0]), vec![1.0, 0.0, 0.0]);
        assert_eq!(
            softmax(&[f32::INFINITY, -3.0, f32::INFINITY]),
            vec![0.5, 0.0, 0.5]
        );

        let probs = decode(&RawOutput::F32(vec![0.0, f32::INFINITY, 1.0])).unwrap();
        assert_eq!(probs, vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_decode_out_of_range_values_get_softmax() {
        // Sums to one but is not a distribution.
        let probs = decode(&RawOutput::F32(vec![1.5, -0.5, 0.0])).unwrap();
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)), "{probs:?}");
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[0] > probs[2] && probs[2] > probs[1]);
        assert!((probs[0] - 0.736).abs() < 1e-3, "got {}", probs[0]);
    }

    #[test]
    fn test_decode_empty_output_is_error() {
        assert!(matches!(
            decode(&RawOutput::F32(Vec::new())),
            Err(VisionError::EmptyOutput)
        ));
    }
}
