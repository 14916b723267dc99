//! Turning a document into an ordered list of page images.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use super::{PageRasterizer, RasterOptions};
use crate::models::{DocumentKind, DocumentRef};

/// One raw page image, before deskewing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSource {
    /// 1-based, contiguous within a document.
    pub index: u32,
    pub path: PathBuf,
}

/// Pages of one document plus the scratch directory holding them.
///
/// The scratch directory is removed when this value (or the
/// [`ScratchDir`] taken out of it) is dropped.
#[derive(Debug)]
pub struct SplitPages {
    pub pages: Vec<PageSource>,
    pub scratch: Option<ScratchDir>,
    /// Why no pages were produced, when rasterization failed.
    pub error: Option<String>,
}

impl SplitPages {
    fn single(path: &Path) -> Self {
        Self {
            pages: vec![PageSource {
                index: 1,
                path: path.to_path_buf(),
            }],
            scratch: None,
            error: None,
        }
    }

    fn failed(reason: String, scratch: Option<ScratchDir>) -> Self {
        Self {
            pages: Vec::new(),
            scratch,
            error: Some(reason),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Per-document scratch directory under a shared root.
///
/// Removes itself on drop; removal failures are logged and otherwise
/// ignored. The shared root is removed as well once it is empty.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    root: PathBuf,
}

impl ScratchDir {
    /// Create `<root>/<prefix>-XXXX`.
    pub fn create(root: &Path, prefix: &str) -> io::Result<Self> {
        let mut attempts = 0;
        loop {
            fs::create_dir_all(root)?;
            match tempfile::Builder::new()
                .prefix(&format!("{prefix}-"))
                .tempdir_in(root)
            {
                Ok(dir) => {
                    return Ok(Self {
                        dir: Some(dir),
                        root: root.to_path_buf(),
                    });
                }
                // The root can vanish between the two calls when another
                // document finishes and removes it.
                Err(e) if e.kind() == io::ErrorKind::NotFound && attempts < 3 => attempts += 1,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.as_ref().map(TempDir::path).unwrap_or(self.root.as_path())
    }

    /// Remove the directory now instead of on drop.
    pub fn close(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => debug!("Removed scratch directory {}", path.display()),
            Err(e) => warn!("Could not remove scratch directory {}: {}", path.display(), e),
        }
        // Fails harmlessly while other documents still use the root.
        let _ = fs::remove_dir(&self.root);
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Splits documents into page images.
pub struct PageSplitter {
    rasterizer: Box<dyn PageRasterizer>,
    options: RasterOptions,
}

impl PageSplitter {
    pub fn new(rasterizer: Box<dyn PageRasterizer>, options: RasterOptions) -> Self {
        Self { rasterizer, options }
    }

    /// Produce the pages of `doc` in order.
    ///
    /// Images yield themselves. PDFs are rasterized into a fresh directory
    /// under `scratch_root`; if that fails no pages are returned and
    /// [`SplitPages::error`] says why.
    pub fn split(&self, doc: &DocumentRef, scratch_root: &Path) -> SplitPages {
        match doc.kind() {
            DocumentKind::Image => SplitPages::single(doc.path()),
            DocumentKind::Pdf => self.split_pdf(doc, scratch_root),
            DocumentKind::Unknown => {
                SplitPages::failed(format!("unsupported file type: {}", doc.filename()), None)
            }
        }
    }

    fn split_pdf(&self, doc: &DocumentRef, scratch_root: &Path) -> SplitPages {
        let scratch = match ScratchDir::create(scratch_root, &doc.stem()) {
            Ok(scratch) => scratch,
            Err(e) => {
                warn!("Could not create scratch directory under {}: {}", scratch_root.display(), e);
                return SplitPages::failed(format!("scratch directory: {e}"), None);
            }
        };

        debug!(
            "Rasterizing {} at {} DPI into {}",
            doc.filename(),
            self.options.dpi,
            scratch.path().display()
        );

        match self.rasterizer.rasterize(doc.path(), &self.options, scratch.path()) {
            Ok(paths) if paths.is_empty() => {
                warn!("No pages rasterized from {}", doc.filename());
                SplitPages::failed("PDF produced no pages".to_string(), Some(scratch))
            }
            Ok(paths) => {
                debug!("Converted {} pages from {}", paths.len(), doc.filename());
                let pages = paths
                    .into_iter()
                    .zip(1u32..)
                    .map(|(path, index)| PageSource { index, path })
                    .collect();
                SplitPages {
                    pages,
                    scratch: Some(scratch),
                    error: None,
                }
            }
            Err(e) => {
                warn!("Error converting PDF {} to images: {}", doc.filename(), e);
                SplitPages::failed(e.to_string(), Some(scratch))
            }
        }
    }
}
