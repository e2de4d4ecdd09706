/*
 * Xraybot - Chat-triggered X-ray classification relay
 * Copyright (C) 2025–2026 Neven Kordic <neven@broodlink.ai>
 * SPDX-License-Identifier: AGPL-3.0-or-later
 */

//! Model loading and invocation.
//!
//! [`TractEngine`] loads `.onnx` graphs through `tract-onnx` and anything
//! else as a TFLite flatbuffer through `tract-tflite`. The input contract is
//! read from the model itself, so the rest of the pipeline never hard-codes
//! a resolution or element type.

use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, warn};
use tract_onnx::prelude::*;
use tract_tflite::internal::DimLike;

use crate::tensor::{ElementType, ImageTensor, Quantization, RawOutput, TensorSpec};
use crate::VisionError;

/// A loaded model that maps one preprocessed image onto a raw output vector.
///
/// Implementations must be callable from several threads at once.
pub trait InferenceEngine: Send + Sync {
    /// Input contract discovered at load time.
    fn input_spec(&self) -> &TensorSpec;

    /// Run the model on `tensor`.
    ///
    /// # Errors
    ///
    /// `VisionError::ShapeMismatch` if `tensor` does not match
    /// [`input_spec`](Self::input_spec); `VisionError::Inference` or
    /// `VisionError::UnsupportedTensor` if the run fails.
    fn invoke(&self, tensor: ImageTensor) -> Result<RawOutput, VisionError>;
}

/// Load-time knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Square size used when the model leaves its spatial dims symbolic.
    pub img_size: Option<usize>,
}

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct TractEngine {
    plan: Plan,
    input_spec: TensorSpec,
    input_datum: DatumType,
    output_quantization: Option<Quantization>,
}

impl std::fmt::Debug for TractEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TractEngine")
            .field("input_spec", &self.input_spec)
            .field("input_datum", &self.input_datum)
            .field("output_quantization", &self.output_quantization)
            .finish_non_exhaustive()
    }
}

fn load_error(e: &TractError) -> VisionError {
    VisionError::ModelLoad(format!("{e:#}"))
}

impl TractEngine {
    /// Load the model at `path` and prepare it for repeated runs.
    ///
    /// # Errors
    ///
    /// - `VisionError::ModelNotFound` if `path` is not a file
    /// - `VisionError::ModelLoad` if the model cannot be parsed or its input
    ///   is not a single NHWC image of `f32` or `u8`
    pub fn load(path: &Path, options: &EngineOptions) -> Result<Self, VisionError> {
        if !path.is_file() {
            return Err(VisionError::ModelNotFound(path.to_path_buf()));
        }
        let started = Instant::now();
        let model = read_model(path)?;
        let engine = Self::from_typed_model(model, options)?;
        info!(
            path = %path.display(),
            shape = ?engine.input_spec.shape(),
            dtype = %engine.input_spec.dtype,
            quantized_input = engine.input_spec.quantization.is_some(),
            elapsed_ms = started.elapsed().as_millis(),
            "model loaded"
        );
        Ok(engine)
    }

    /// Build an engine from an already-parsed graph.
    ///
    /// # Errors
    ///
    /// Same input checks as [`load`](Self::load).
    pub fn from_typed_model(
        mut model: TypedModel,
        options: &EngineOptions,
    ) -> Result<Self, VisionError> {
        let input_fact = model.input_fact(0).map_err(|e| load_error(&e))?.clone();
        let output_fact = model.output_fact(0).map_err(|e| load_error(&e))?.clone();

        let input_datum = input_fact.datum_type;
        let dtype = element_type(input_datum).ok_or_else(|| {
            VisionError::ModelLoad(format!("unsupported input element type {input_datum:?}"))
        })?;
        let quantization = quantization_of(input_datum);
        let dims: Vec<Option<usize>> = input_fact
            .shape
            .iter()
            .map(|d| d.to_usize().ok())
            .collect();
        let input_spec = tensor_spec_from_dims(&dims, dtype, quantization, options.img_size)?;

        // Pin symbolic dims so the optimizer sees a concrete graph.
        if dims.iter().any(Option::is_none) {
            model
                .set_input_fact(0, TypedFact::dt_shape(input_datum, input_spec.shape()))
                .map_err(|e| load_error(&e))?;
        }

        let plan = model
            .into_optimized()
            .and_then(|m| m.into_runnable())
            .map_err(|e| load_error(&e))?;

        Ok(Self {
            plan,
            input_spec,
            input_datum,
            output_quantization: quantization_of(output_fact.datum_type),
        })
    }
}

fn read_model(path: &Path) -> Result<TypedModel, VisionError> {
    let is_onnx = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("onnx"));
    let model = if is_onnx {
        tract_onnx::onnx()
            .model_for_path(path)
            .and_then(|m| m.into_typed())
    } else {
        tract_tflite::tflite().model_for_path(path)
    };
    model.map_err(|e| load_error(&e))
}

fn element_type(dt: DatumType) -> Option<ElementType> {
    match dt.unquantized() {
        DatumType::F32 => Some(ElementType::F32),
        DatumType::U8 => Some(ElementType::U8),
        _ => None,
    }
}

fn quantization_of(dt: DatumType) -> Option<Quantization> {
    dt.qparams().map(|q| {
        let (zero_point, scale) = q.zp_scale();
        Quantization { scale, zero_point }
    })
}

/// Derive the input contract from the model's declared input dims.
///
/// `dims` is the raw NHWC shape with `None` for symbolic entries. Batch must
/// be 1 or symbolic. A concrete spatial dim always wins over `img_size`;
/// a symbolic one requires it.
///
/// # Errors
///
/// Returns `VisionError::ModelLoad` when the shape cannot be used.
pub fn tensor_spec_from_dims(
    dims: &[Option<usize>],
    dtype: ElementType,
    quantization: Option<Quantization>,
    img_size: Option<usize>,
) -> Result<TensorSpec, VisionError> {
    let [batch, height, width, channels] = dims else {
        return Err(VisionError::ModelLoad(format!(
            "expected a rank-4 NHWC input, got rank {}",
            dims.len()
        )));
    };
    if !matches!(batch, None | Some(1)) {
        return Err(VisionError::ModelLoad(format!(
            "input batch must be 1, got {batch:?}"
        )));
    }
    let channels = match channels {
        Some(c @ (1 | 3)) => *c,
        other => {
            return Err(VisionError::ModelLoad(format!(
                "input must have 1 or 3 channels, got {other:?}"
            )))
        }
    };

    let spatial = |declared: &Option<usize>, axis: &str| match (declared, img_size) {
        (Some(n), Some(wanted)) => {
            if *n != wanted {
                warn!(axis, model = n, configured = wanted, "ignoring img_size for fixed model dim");
            }
            Ok(*n)
        }
        (Some(n), None) => Ok(*n),
        (None, Some(wanted)) => Ok(wanted),
        (None, None) => Err(VisionError::ModelLoad(format!(
            "input {axis} is symbolic; set img_size"
        ))),
    };

    let height = spatial(height, "height")?;
    let width = spatial(width, "width")?;
    if height == 0 || width == 0 {
        return Err(VisionError::ModelLoad("input has a zero spatial dim".to_string()));
    }

    Ok(TensorSpec {
        height,
        width,
        channels,
        dtype,
        quantization,
    })
}

impl InferenceEngine for TractEngine {
    fn input_spec(&self) -> &TensorSpec {
        &self.input_spec
    }

    fn invoke(&self, tensor: ImageTensor) -> Result<RawOutput, VisionError> {
        self.input_spec.check(&tensor)?;

        let input: Tensor = match tensor {
            ImageTensor::F32(a) => a.into(),
            ImageTensor::U8(a) => a.into(),
        };
        let input = input
            .cast_to_dt(self.input_datum)
            .map_err(|e| VisionError::Inference(format!("{e:#}")))?
            .into_owned();

        let started = Instant::now();
        let outputs = self
            .plan
            .run(tvec!(input.into()))
            .map_err(|e| VisionError::Inference(format!("{e:#}")))?;
        debug!(elapsed_ms = started.elapsed().as_millis(), "model invoked");

        let first = outputs.first().ok_or(VisionError::EmptyOutput)?;
        let dt = first.datum_type();
        let access = |e: TractError| VisionError::Inference(format!("{e:#}"));
        match dt.unquantized() {
            DatumType::F32 => Ok(RawOutput::F32(
                first.as_slice::<f32>().map_err(access)?.to_vec(),
            )),
            DatumType::U8 => Ok(RawOutput::U8 {
                values: first.as_slice::<u8>().map_err(access)?.to_vec(),
                quantization: quantization_of(dt).or(self.output_quantization),
            }),
            other => Err(VisionError::UnsupportedTensor(format!("{other:?}"))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tract_onnx::prelude::tract_ndarray::Array4;

    fn identity_model(shape: [usize; 4]) -> TypedModel {
        let mut model = TypedModel::default();
        let src = model.add_source("input", f32::fact(shape)).unwrap();
        model.set_output_outlets(&[src]).unwrap();
        model
    }

    #[test]
    fn test_load_missing_file() {
        let err = TractEngine::load(Path::new("/nonexistent/model.tflite"), &EngineOptions::default())
            .unwrap_err();
        assert!(matches!(err, VisionError::ModelNotFound(_)));
    }

    #[test]
    fn test_load_garbage_onnx_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.onnx");
        std::fs::write(&path, b"definitely not an onnx graph").unwrap();
        let err = TractEngine::load(&path, &EngineOptions::default()).unwrap_err();
        assert!(matches!(err, VisionError::ModelLoad(_)), "{err}");
    }

    #[test]
    fn test_load_garbage_tflite_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.tflite");
        std::fs::write(&path, b"definitely not a flatbuffer").unwrap();
        let err = TractEngine::load(&path, &EngineOptions::default()).unwrap_err();
        assert!(matches!(err, VisionError::ModelLoad(_)), "{err}");
    }

    #[test]
    fn test_engine_discovers_input_spec() {
        let engine =
            TractEngine::from_typed_model(identity_model([1, 2, 3, 1]), &EngineOptions::default())
                .unwrap();
        let spec = engine.input_spec();
        assert_eq!(spec.shape(), [1, 2, 3, 1]);
        assert_eq!(spec.dtype, ElementType::F32);
        assert!(spec.quantization.is_none());
    }

    #[test]
    fn test_invoke_returns_flattened_output() {
        let engine =
            TractEngine::from_typed_model(identity_model([1, 2, 2, 1]), &EngineOptions::default())
                .unwrap();
        let input = Array4::from_shape_vec((1, 2, 2, 1), vec![0.1f32, 0.2, 0.3, 0.4]).unwrap();
        let out = engine.invoke(ImageTensor::F32(input)).unwrap();
        assert_eq!(out, RawOutput::F32(vec![0.1, 0.2, 0.3, 0.4]));
    }

    #[test]
    fn test_quantized_model_carries_quantization_through_invoke() {
        let dt = DatumType::QU8(QParams::ZpScale {
            zero_point: 0,
            scale: 1.0 / 256.0,
        });
        let mut model = TypedModel::default();
        let src = model
            .add_source("input", TypedFact::dt_shape(dt, [1, 1, 3, 1]))
            .unwrap();
        model.set_output_outlets(&[src]).unwrap();

        let engine = TractEngine::from_typed_model(model, &EngineOptions::default()).unwrap();
        let expected = Quantization {
            scale: 1.0 / 256.0,
            zero_point: 0,
        };
        assert_eq!(engine.input_spec().dtype, ElementType::U8);
        assert_eq!(engine.input_spec().quantization, Some(expected));

        let input = Array4::from_shape_vec((1, 1, 3, 1), vec![64u8, 128, 64]).unwrap();
        let out = engine.invoke(ImageTensor::U8(input)).unwrap();
        assert_eq!(
            out,
            RawOutput::U8 {
                values: vec![64, 128, 64],
                quantization: Some(expected),
            }
        );

        let probs = crate::codec::decode(&out).unwrap();
        for (got, want) in probs.iter().zip([0.25f32, 0.5, 0.25]) {
            assert!((got - want).abs() < 1e-6, "{probs:?}");
        }
    }

    #[test]
    fn test_invoke_rejects_wrong_shape_before_running() {
        let engine =
            TractEngine::from_typed_model(identity_model([1, 2, 2, 1]), &EngineOptions::default())
                .unwrap();
        let err = engine
            .invoke(ImageTensor::F32(Array4::zeros((1, 3, 3, 1))))
            .unwrap_err();
        assert!(matches!(err, VisionError::ShapeMismatch { .. }));
        let err = engine
            .invoke(ImageTensor::U8(Array4::zeros((1, 2, 2, 1))))
            .unwrap_err();
        assert!(matches!(err, VisionError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_engine_rejects_four_channel_input() {
        let err =
            TractEngine::from_typed_model(identity_model([1, 2, 2, 4]), &EngineOptions::default())
                .unwrap_err();
        assert!(matches!(err, VisionError::ModelLoad(_)));
    }

    #[test]
    fn test_spec_from_concrete_dims() {
        let spec = tensor_spec_from_dims(
            &[Some(1), Some(224), Some(224), Some(1)],
            ElementType::U8,
            None,
            None,
        )
        .unwrap();
        assert_eq!(spec.shape(), [1, 224, 224, 1]);
        assert_eq!(spec.dtype, ElementType::U8);
    }

    #[test]
    fn test_spec_symbolic_dims_use_img_size() {
        let spec = tensor_spec_from_dims(
            &[None, None, None, Some(3)],
            ElementType::F32,
            None,
            Some(128),
        )
        .unwrap();
        assert_eq!(spec.shape(), [1, 128, 128, 3]);
    }

    #[test]
    fn test_spec_symbolic_dims_without_img_size_fail() {
        let err = tensor_spec_from_dims(&[Some(1), None, None, Some(1)], ElementType::F32, None, None)
            .unwrap_err();
        assert!(err.to_string().contains("img_size"), "{err}");
    }

    #[test]
    fn test_spec_concrete_dims_win_over_img_size() {
        let spec = tensor_spec_from_dims(
            &[Some(1), Some(64), Some(32), Some(1)],
            ElementType::F32,
            None,
            Some(224),
        )
        .unwrap();
        assert_eq!(spec.shape(), [1, 64, 32, 1]);
    }

    #[test]
    fn test_spec_rejects_bad_batch_rank_and_channels() {
        let bad = [
            vec![Some(2), Some(8), Some(8), Some(1)],
            vec![Some(1), Some(8), Some(8)],
            vec![Some(1), Some(8), Some(8), Some(2)],
            vec![Some(1), Some(8), Some(8), None],
            vec![Some(1), Some(0), Some(8), Some(1)],
        ];
        for dims in bad {
            let err = tensor_spec_from_dims(&dims, ElementType::F32, None, None).unwrap_err();
            assert!(matches!(err, VisionError::ModelLoad(_)), "{dims:?}");
        }
    }

    #[test]
    fn test_spec_keeps_quantization() {
        let q = Quantization {
            scale: 0.5,
            zero_point: 3,
        };
        let spec =
            tensor_spec_from_dims(&[Some(1), Some(4), Some(4), Some(1)], ElementType::U8, Some(q), None)
                .unwrap();
        assert_eq!(spec.quantization, Some(q));
    }
}
