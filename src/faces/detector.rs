use anyhow::{anyhow, Result};
use image::{DynamicImage, GenericImageView};
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::config::{ComputeDelegate, DetectionConfig, FaceModel};
use crate::db::BoundingBox;
use crate::error::DetectionError;

const NMS_THRESHOLD: f32 = 0.3;

/// Result of one detection call.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Face boxes in source-image pixels, highest confidence first.
    pub matches: Vec<BoundingBox>,
    pub timing_ms: u64,
    pub image_width: u32,
    pub image_height: u32,
}

/// A face detection engine.
///
/// Implementations are called from the blocking pool and may block.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Detection, DetectionError>;

    /// Release engine resources. Later `detect` calls must fail.
    fn close(&self) {}
}

impl FaceModel {
    pub fn file_name(&self) -> &'static str {
        match self {
            FaceModel::UltraFace320 => "ultraface-320.onnx",
            FaceModel::UltraFace640 => "ultraface-640.onnx",
        }
    }

    pub fn url(&self) -> &'static str {
        match self {
            FaceModel::UltraFace320 => {
                "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-320.onnx"
            }
            FaceModel::UltraFace640 => {
                "https://github.com/onnx/models/raw/main/validated/vision/body_analysis/ultraface/models/version-RFB-640.onnx"
            }
        }
    }

    /// Model input as (width, height).
    pub fn input_size(&self) -> (u32, u32) {
        match self {
            FaceModel::UltraFace320 => (320, 240),
            FaceModel::UltraFace640 => (640, 480),
        }
    }
}

/// UltraFace detector running on ONNX Runtime.
pub struct OnnxFaceDetector {
    session: Mutex<Option<Session>>,
    model: FaceModel,
    threshold: f32,
}

impl OnnxFaceDetector {
    /// Load (downloading if needed) the configured model and build a session.
    pub fn open(config: &DetectionConfig) -> Result<Self, DetectionError> {
        if config.delegate == ComputeDelegate::Accelerator {
            return Err(DetectionError::InitFailed(
                "accelerator delegate is not available in this build".to_string(),
            ));
        }

        let session = ensure_model(&config.model_dir(), config.model)
            .and_then(|path| build_session(&path, config.intra_threads))
            .map_err(|e| DetectionError::InitFailed(format!("{e:#}")))?;

        tracing::info!(
            model = config.model.file_name(),
            threshold = config.threshold,
            "face detector ready"
        );

        Ok(Self {
            session: Mutex::new(Some(session)),
            model: config.model,
            threshold: config.threshold,
        })
    }
}

impl FaceDetector for OnnxFaceDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Detection, DetectionError> {
        let started = Instant::now();
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let session = guard.as_mut().ok_or(DetectionError::Closed)?;

        let (image_width, image_height) = image.dimensions();
        let boxes = run_ultraface(session, image, self.model, self.threshold)
            .map_err(|e| DetectionError::Inference(format!("{e:#}")))?;

        Ok(Detection {
            matches: boxes.into_iter().map(|(bbox, _)| bbox).collect(),
            timing_ms: started.elapsed().as_millis() as u64,
            image_width,
            image_height,
        })
    }

    fn close(&self) {
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            tracing::info!("face detector session released");
        }
    }
}

/// Download a model file if it doesn't exist
fn ensure_model(models_dir: &Path, model: FaceModel) -> Result<PathBuf> {
    std::fs::create_dir_all(models_dir)?;
    let model_path = models_dir.join(model.file_name());

    if !model_path.exists() {
        tracing::info!(model = model.file_name(), "Downloading model...");
        let response = ureq::get(model.url())
            .call()
            .map_err(|e| anyhow!("Failed to download model: {}", e))?;

        // Write to a partial file so an interrupted download is not mistaken for a model.
        let partial = model_path.with_extension("part");
        let mut file = std::fs::File::create(&partial)?;
        std::io::copy(&mut response.into_reader(), &mut file)?;
        std::fs::rename(&partial, &model_path)?;
        tracing::info!(model = model.file_name(), path = ?model_path, "Model downloaded");
    }

    Ok(model_path)
}

fn build_session(model_path: &Path, intra_threads: usize) -> Result<Session> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)?;
    Ok(session)
}

fn run_ultraface(
    session: &mut Session,
    img: &DynamicImage,
    model: FaceModel,
    threshold: f32,
) -> Result<Vec<(BoundingBox, f32)>> {
    let (input_width, input_height) = model.input_size();
    let (orig_width, orig_height) = img.dimensions();

    let resized = img.resize_exact(input_width, input_height, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // NCHW, normalized to roughly [-1, 1]
    let plane = (input_width * input_height) as usize;
    let mut input_data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let idx = y as usize * input_width as usize + x as usize;
        input_data[idx] = (pixel[0] as f32 - 127.0) / 128.0;
        input_data[plane + idx] = (pixel[1] as f32 - 127.0) / 128.0;
        input_data[2 * plane + idx] = (pixel[2] as f32 - 127.0) / 128.0;
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, input_height as usize, input_width as usize],
        input_data.into_boxed_slice(),
    ))?;

    let outputs = session.run(ort::inputs!["input" => input_tensor])?;

    let scores_value = outputs.get("scores").ok_or_else(|| anyhow!("No scores output"))?;
    let boxes_value = outputs.get("boxes").ok_or_else(|| anyhow!("No boxes output"))?;

    let (scores_shape, scores_data) = scores_value.try_extract_tensor::<f32>()?;
    let (_boxes_shape, boxes_data) = boxes_value.try_extract_tensor::<f32>()?;

    // scores: [1, anchors, 2] (background, face); boxes: [1, anchors, 4] normalized corners
    let num_anchors = scores_shape[1] as usize;
    let candidates = decode_boxes(
        scores_data,
        boxes_data,
        num_anchors,
        orig_width,
        orig_height,
        threshold,
    );

    Ok(nms(candidates, NMS_THRESHOLD))
}

/// Turn raw anchor outputs into pixel boxes above `threshold`, clamped to the image.
fn decode_boxes(
    scores: &[f32],
    boxes: &[f32],
    num_anchors: usize,
    width: u32,
    height: u32,
    threshold: f32,
) -> Vec<(BoundingBox, f32)> {
    let (w, h) = (width as f32, height as f32);
    let available = num_anchors.min(scores.len() / 2).min(boxes.len() / 4);

    (0..available)
        .filter_map(|i| {
            let confidence = scores[i * 2 + 1];
            if confidence <= threshold {
                return None;
            }
            let bbox = BoundingBox::new(
                (boxes[i * 4] * w).clamp(0.0, w),
                (boxes[i * 4 + 1] * h).clamp(0.0, h),
                (boxes[i * 4 + 2] * w).clamp(0.0, w),
                (boxes[i * 4 + 3] * h).clamp(0.0, h),
            );
            (bbox.area() > 0.0).then_some((bbox, confidence))
        })
        .collect()
}

/// Non-maximum suppression to remove overlapping detections
fn nms(mut boxes: Vec<(BoundingBox, f32)>, threshold: f32) -> Vec<(BoundingBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(BoundingBox, f32)> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|(kept, _)| kept.iou(&candidate.0) <= threshold) {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nms_drops_overlapping_lower_scores() {
        let boxes = vec![
            (BoundingBox::new(0.0, 0.0, 10.0, 10.0), 0.8),
            (BoundingBox::new(1.0, 1.0, 11.0, 11.0), 0.9),
            (BoundingBox::new(50.0, 50.0, 60.0, 60.0), 0.6),
        ];

        let kept = nms(boxes, NMS_THRESHOLD);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].1, 0.9);
        assert_eq!(kept[1].0.left, 50.0);
    }

    #[test]
    fn test_decode_boxes_thresholds_and_scales() {
        // Two anchors: one confident face, one background.
        let scores = [0.1, 0.9, 0.7, 0.3];
        let boxes = [0.1, 0.2, 0.5, 0.6, 0.0, 0.0, 1.0, 1.0];

        let decoded = decode_boxes(&scores, &boxes, 2, 200, 100, 0.5);
        assert_eq!(decoded.len(), 1);
        let (bbox, confidence) = decoded[0];
        assert_eq!(confidence, 0.9);
        assert!((bbox.left - 20.0).abs() < 1e-4);
        assert!((bbox.top - 20.0).abs() < 1e-4);
        assert!((bbox.right - 100.0).abs() < 1e-4);
        assert!((bbox.bottom - 60.0).abs() < 1e-4);
    }

    #[test]
    fn test_decode_boxes_clamps_to_image() {
        let scores = [0.0, 0.99];
        let boxes = [-0.2, -0.1, 1.3, 1.5];

        let decoded = decode_boxes(&scores, &boxes, 1, 100, 50, 0.5);
        assert_eq!(decoded[0].0, BoundingBox::new(0.0, 0.0, 100.0, 50.0));
    }

    #[test]
    fn test_decode_boxes_skips_degenerate() {
        let scores = [0.0, 0.99];
        let boxes = [0.5, 0.5, 0.5, 0.9];
        assert!(decode_boxes(&scores, &boxes, 1, 100, 100, 0.5).is_empty());
    }

    #[test]
    fn test_model_metadata() {
        assert_eq!(FaceModel::UltraFace320.input_size(), (320, 240));
        assert_eq!(FaceModel::UltraFace640.input_size(), (640, 480));
        assert!(FaceModel::UltraFace640.url().ends_with("version-RFB-640.onnx"));
    }

    #[test]
    fn test_accelerator_delegate_fails_to_open() {
        let config = DetectionConfig {
            delegate: ComputeDelegate::Accelerator,
            ..DetectionConfig::default()
        };
        let err = OnnxFaceDetector::open(&config).err().unwrap();
        assert!(matches!(err, DetectionError::InitFailed(_)));
    }
}
