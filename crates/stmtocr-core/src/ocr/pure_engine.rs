//! Text recognizer backed by `pure-onnx-ocr` (pure Rust, no external ONNX Runtime).
//!
//! The engine lives on its own OCR thread, so the recognizer
//! can be shared by concurrent batch workers. Pages are recognized one at a
//! time.

use std::path::Path;
use std::time::Instant;

use image::{DynamicImage, GenericImageView};
use tracing::{debug, info};

use crate::error::OcrError;
use crate::models::config::{ModelConfig, OcrConfig};

use super::worker::OcrWorker;
use super::{join_lines, sort_reading_order, TextBox, TextRecognizer};

/// PaddleOCR detection + recognition models run through `pure-onnx-ocr`.
pub struct PureOcrRecognizer {
    worker: OcrWorker,
    keep_unk: bool,
}

impl PureOcrRecognizer {
    /// Load the models named in `models` from `model_dir`.
    pub fn from_dir(model_dir: &Path, models: &ModelConfig, config: &OcrConfig) -> Result<Self, OcrError> {
        let det_path = model_dir.join(&models.detection_model);
        let rec_path = model_dir.join(&models.recognition_model);
        let dict_path = model_dir.join(&models.dictionary);

        for path in [&det_path, &rec_path, &dict_path] {
            if !path.exists() {
                return Err(OcrError::ModelLoad(format!(
                    "missing model file {} (run `stmtocr models download`)",
                    path.display()
                )));
            }
        }

        let worker = OcrWorker::spawn(
            "stmtocr-ocr",
            move || {
                pure_onnx_ocr::engine::OcrEngineBuilder::new()
                    .det_model_path(&det_path)
                    .rec_model_path(&rec_path)
                    .dictionary_path(&dict_path)
                    .build()
                    .map_err(|e| OcrError::ModelLoad(format!("pure-onnx-ocr: {}", e)))
            },
            detect,
        )?;

        info!("Loaded pure-onnx-ocr engine from {}", model_dir.display());

        Ok(Self {
            worker,
            keep_unk: config.keep_unk,
        })
    }

    /// Detect and recognize text regions, in reading order.
    pub fn boxes(&self, image: &DynamicImage) -> Result<Vec<TextBox>, OcrError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(OcrError::InvalidImage(format!("{}x{}", width, height)));
        }

        let mut boxes = self.worker.run(image)?;
        if !self.keep_unk {
            for b in &mut boxes {
                b.text = b.text.replace("[UNK]", " ");
            }
        }

        sort_reading_order(&mut boxes);
        Ok(boxes)
    }
}

/// Runs on the OCR thread.
fn detect(engine: &pure_onnx_ocr::engine::OcrEngine, image: &DynamicImage) -> Result<Vec<TextBox>, OcrError> {
    let results = engine
        .run_from_image(image)
        .map_err(|e| OcrError::Recognition(format!("pure-onnx-ocr: {}", e)))?;

    debug!("pure-onnx-ocr returned {} text regions", results.len());

    Ok(results
        .iter()
        .map(|r| TextBox {
            bbox: polygon_to_bbox(&r.bounding_box),
            text: r.text.clone(),
            confidence: r.confidence,
        })
        .collect())
}

impl TextRecognizer for PureOcrRecognizer {
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let start = Instant::now();
        let boxes = self.boxes(image)?;

        debug!(
            "OCR complete: {} text boxes in {}ms",
            boxes.len(),
            start.elapsed().as_millis()
        );

        Ok(join_lines(&boxes))
    }
}

/// Convert a `Polygon<f64>` to the `[f32; 8]` bbox format.
fn polygon_to_bbox(polygon: &pure_onnx_ocr::Polygon<f64>) -> [f32; 8] {
    let mut bbox = [0.0f32; 8];
    for (i, coord) in polygon.exterior().coords().take(4).enumerate() {
        bbox[i * 2] = coord.x as f32;
        bbox[i * 2 + 1] = coord.y as f32;
    }
    bbox
}
