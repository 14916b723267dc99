//! Input documents and their classification.

use std::fmt;
use std::path::{Path, PathBuf};

/// Image extensions accepted as single-page documents.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tiff", "bmp", "gif"];

/// Kind of an input document, decided by its extension alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// A single scanned page.
    Image,
    /// A multi-page PDF that must be rasterized.
    Pdf,
    /// Anything else. Never enters the pipeline.
    Unknown,
}

impl DocumentKind {
    /// Classify a path by its extension (case-insensitive). No I/O.
    pub fn classify(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        if extension == "pdf" {
            DocumentKind::Pdf
        } else if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
            DocumentKind::Image
        } else {
            DocumentKind::Unknown
        }
    }

    /// Whether documents of this kind can be processed.
    pub fn is_supported(&self) -> bool {
        !matches!(self, DocumentKind::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Image => "image",
            DocumentKind::Pdf => "pdf",
            DocumentKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a path. Shorthand for [`DocumentKind::classify`].
pub fn classify(path: &Path) -> DocumentKind {
    DocumentKind::classify(path)
}

/// One input document found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentRef {
    path: PathBuf,
    bank: String,
    filename: String,
    kind: DocumentKind,
}

impl DocumentRef {
    /// Build a reference for `path`, labelled with `bank`.
    pub fn new(path: impl Into<PathBuf>, bank: impl Into<String>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let kind = DocumentKind::classify(&path);
        Self {
            path,
            bank: bank.into(),
            filename,
            kind,
        }
    }

    /// Build a reference labelled with the name of the containing directory.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let bank = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());
        Self::new(path, bank)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bank(&self) -> &str {
        &self.bank
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    /// File name without extension, used to name outputs.
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.filename.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_supported_extensions() {
        for ext in ["jpg", "jpeg", "png", "tiff", "bmp", "gif"] {
            assert_eq!(classify(Path::new(&format!("scan.{ext}"))), DocumentKind::Image);
            let upper = ext.to_uppercase();
            assert_eq!(classify(Path::new(&format!("scan.{upper}"))), DocumentKind::Image);
        }
        assert_eq!(classify(Path::new("statement.pdf")), DocumentKind::Pdf);
        assert_eq!(classify(Path::new("statement.PdF")), DocumentKind::Pdf);
    }

    #[test]
    fn test_classify_unknown() {
        for name in ["notes.txt", "scan.webp", "scan.tif", "archive.pdf.zip", "README", ".jpg", ""] {
            assert_eq!(classify(Path::new(name)), DocumentKind::Unknown, "{name}");
        }
    }

    #[test]
    fn test_document_ref_from_path() {
        let doc = DocumentRef::from_path("/data/banquepopulaire/avril6BP.jpg");
        assert_eq!(doc.bank(), "banquepopulaire");
        assert_eq!(doc.filename(), "avril6BP.jpg");
        assert_eq!(doc.stem(), "avril6BP");
        assert_eq!(doc.kind(), DocumentKind::Image);
    }
}
