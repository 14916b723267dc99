//! PDF page rasterization and page splitting.

mod extractor;
mod splitter;

pub use extractor::LopdfRasterizer;
pub use splitter::{PageSource, PageSplitter, ScratchDir, SplitPages};

use std::path::{Path, PathBuf};

use crate::error::PdfError;

/// Result type for PDF operations.
pub type Result<T> = std::result::Result<T, PdfError>;

/// Options for turning PDF pages into images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterOptions {
    /// Target resolution.
    pub dpi: u32,
    /// Maximum pages to produce (0 = all).
    pub max_pages: usize,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            dpi: 300,
            max_pages: 0,
        }
    }
}

/// Turns the pages of a PDF into image files.
pub trait PageRasterizer: Send + Sync {
    /// Write one image per page into `out_dir`, returning their paths in
    /// page order.
    ///
    /// Either every requested page is produced or an error is returned.
    fn rasterize(&self, pdf: &Path, options: &RasterOptions, out_dir: &Path) -> Result<Vec<PathBuf>>;
}

/// File name of a rasterized page: `<stem>_page_<n>.jpg`.
pub fn page_file_name(stem: &str, page: u32) -> String {
    format!("{stem}_page_{page}.jpg")
}
