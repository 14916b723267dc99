//! Page-level text recognition: skew correction, OCR and token bounding.

mod deskew;
#[cfg(feature = "native")]
mod pure_engine;
mod text;
mod tokens;
#[cfg(feature = "native")]
mod worker;

pub use deskew::{DeskewAdapter, Deskewer, PageCorrection, ProjectionDeskewer};
#[cfg(feature = "native")]
pub use pure_engine::PureOcrRecognizer;
pub use text::TextExtractor;
pub use tokens::{
    tokenizer_for, ApproximateTokenCounter, BoundedText, BpeTokenCounter, TokenBounder, TokenCounter,
};

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::OcrError;

/// Reads the text of one page image.
pub trait TextRecognizer: Send + Sync {
    /// Recognize all text on the image, lines in reading order.
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError>;
}

/// A recognized text fragment with its position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBox {
    /// Quadrilateral corners (x1, y1, x2, y2, x3, y3, x4, y4).
    pub bbox: [f32; 8],

    /// Recognized text content.
    pub text: String,

    /// Recognition confidence (0.0 - 1.0).
    pub confidence: f32,
}

impl TextBox {
    /// Get the axis-aligned bounding rectangle.
    pub fn rect(&self) -> (f32, f32, f32, f32) {
        let xs = [self.bbox[0], self.bbox[2], self.bbox[4], self.bbox[6]];
        let ys = [self.bbox[1], self.bbox[3], self.bbox[5], self.bbox[7]];

        let min_x = xs.iter().cloned().fold(f32::INFINITY, f32::min);
        let max_x = xs.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        let min_y = ys.iter().cloned().fold(f32::INFINITY, f32::min);
        let max_y = ys.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

        (min_x, min_y, max_x, max_y)
    }
}

/// Height of the bands used to group boxes into lines, in pixels.
const ROW_BAND: f32 = 20.0;

/// Sort boxes top-to-bottom, then left-to-right within a band.
pub fn sort_reading_order(boxes: &mut [TextBox]) {
    boxes.sort_by(|a, b| {
        let (ax, ay, _, _) = a.rect();
        let (bx, by, _, _) = b.rect();

        let row_a = (ay / ROW_BAND) as i32;
        let row_b = (by / ROW_BAND) as i32;

        row_a
            .cmp(&row_b)
            .then_with(|| ax.partial_cmp(&bx).unwrap_or(std::cmp::Ordering::Equal))
    });
}

/// Join box texts with newlines, in their current order.
pub fn join_lines(boxes: &[TextBox]) -> String {
    boxes
        .iter()
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
