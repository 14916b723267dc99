//! The per-document pipeline and the batch driver around it.
//!
//! A document is split into pages; every page is deskewed, read, bounded,
//! sent for structured extraction and persisted on its own. Failures stay
//! with the page (or document) they happened in.

mod assembler;
mod batch;

pub use assembler::PageAssembler;
pub use batch::{list_banks, BatchOrchestrator, BatchProgress, BatchScope, NoProgress};

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::error::{PipelineError, StmtError};
use crate::extraction::{ExtractionService, StructuredExtractor};
use crate::models::{DocumentOutcome, DocumentRef, ExtractedRecord, PageOutcome, StmtConfig, TextStats};
use crate::ocr::{
    tokenizer_for, BoundedText, DeskewAdapter, Deskewer, ProjectionDeskewer, TextExtractor, TextRecognizer,
    TokenBounder, TokenCounter,
};
use crate::pdf::{LopdfRasterizer, PageRasterizer, PageSource, PageSplitter, RasterOptions};

/// Runs documents through split, deskew, OCR, extraction and persistence.
pub struct DocumentPipeline {
    splitter: PageSplitter,
    deskew: DeskewAdapter,
    text: TextExtractor,
    extractor: StructuredExtractor,
    assembler: PageAssembler,
    corrected_dir: String,
    scratch_dir: String,
    max_retries: u32,
    retry_backoff: Duration,
}

/// Builder for [`DocumentPipeline`].
///
/// A recognizer and an extraction service are required; the rest default to
/// the built-in implementations.
pub struct DocumentPipelineBuilder {
    config: StmtConfig,
    rasterizer: Option<Box<dyn PageRasterizer>>,
    recognizer: Option<Box<dyn TextRecognizer>>,
    deskewer: Option<Box<dyn Deskewer>>,
    tokenizer: Option<Box<dyn TokenCounter>>,
    service: Option<Box<dyn ExtractionService>>,
}

impl DocumentPipelineBuilder {
    pub fn new(config: StmtConfig) -> Self {
        Self {
            config,
            rasterizer: None,
            recognizer: None,
            deskewer: None,
            tokenizer: None,
            service: None,
        }
    }

    pub fn with_rasterizer(mut self, rasterizer: Box<dyn PageRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn with_recognizer(mut self, recognizer: Box<dyn TextRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn with_deskewer(mut self, deskewer: Box<dyn Deskewer>) -> Self {
        self.deskewer = Some(deskewer);
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: Box<dyn TokenCounter>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn with_service(mut self, service: Box<dyn ExtractionService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn build(self) -> Result<DocumentPipeline, StmtError> {
        let config = self.config;

        let recognizer = self
            .recognizer
            .ok_or_else(|| StmtError::Config("no text recognizer configured".to_string()))?;
        let service = self
            .service
            .ok_or_else(|| StmtError::Config("no extraction service configured".to_string()))?;

        let rasterizer = self.rasterizer.unwrap_or_else(|| Box::new(LopdfRasterizer::new()));
        let deskewer = self
            .deskewer
            .unwrap_or_else(|| Box::new(ProjectionDeskewer::new(config.ocr.deskew.clone())));
        let tokenizer = self
            .tokenizer
            .unwrap_or_else(|| tokenizer_for(config.text.tokenizer));

        let raster_options = RasterOptions {
            dpi: config.pdf.render_dpi,
            max_pages: config.pdf.max_pages,
        };

        Ok(DocumentPipeline {
            splitter: PageSplitter::new(rasterizer, raster_options),
            deskew: DeskewAdapter::new(deskewer, config.ocr.deskew.enabled),
            text: TextExtractor::new(recognizer, TokenBounder::new(tokenizer, config.text.token_budget)),
            extractor: StructuredExtractor::new(service, config.service.max_output_tokens),
            assembler: PageAssembler::new(),
            corrected_dir: config.batch.corrected_dir,
            scratch_dir: config.batch.scratch_dir,
            max_retries: config.service.max_retries,
            retry_backoff: Duration::from_millis(config.service.retry_backoff_ms),
        })
    }
}

impl DocumentPipeline {
    pub fn builder(config: StmtConfig) -> DocumentPipelineBuilder {
        DocumentPipelineBuilder::new(config)
    }

    /// Pipeline with the built-in OCR models and the Gemini client.
    ///
    /// `config.models.model_dir` must point at the model files and the API
    /// key must already be resolved.
    #[cfg(feature = "native")]
    pub fn from_config(config: &StmtConfig) -> Result<Self, StmtError> {
        use crate::extraction::GeminiClient;
        use crate::ocr::PureOcrRecognizer;

        let service = GeminiClient::from_config(&config.service)?;
        let model_dir = config
            .models
            .model_dir
            .as_deref()
            .ok_or_else(|| StmtError::Config("no OCR model directory configured".to_string()))?;
        let recognizer = PureOcrRecognizer::from_dir(model_dir, &config.models, &config.ocr)?;

        Self::builder(config.clone())
            .with_recognizer(Box::new(recognizer))
            .with_service(Box::new(service))
            .build()
    }

    /// Process one document, writing outputs under `output_dir`.
    ///
    /// Never fails as a whole: every problem ends up in the outcome.
    pub fn process(&self, doc: &DocumentRef, output_dir: &Path, instructions: &str) -> DocumentOutcome {
        let start = Instant::now();
        info!("Processing {} ({}, bank {})", doc.filename(), doc.kind(), doc.bank());

        let split = self.splitter.split(doc, &output_dir.join(&self.scratch_dir));
        if split.is_empty() {
            let reason = split
                .error
                .clone()
                .unwrap_or_else(|| "no pages produced".to_string());
            let error = PipelineError::Rasterization(reason);
            warn!("Failed to process {}: {}", doc.filename(), error);
            return DocumentOutcome::failed(doc.clone(), &error, start.elapsed());
        }

        let pages: Vec<PageOutcome> = split
            .pages
            .iter()
            .map(|page| self.process_page(doc, page, output_dir, instructions))
            .collect();

        let outcome = self.assembler.assemble(doc, pages, split, start.elapsed());
        info!(
            "Finished {}: {} ({}/{} pages)",
            doc.filename(),
            outcome.status,
            outcome.pages_succeeded(),
            outcome.pages.len()
        );
        outcome
    }

    fn process_page(&self, doc: &DocumentRef, page: &PageSource, output_dir: &Path, instructions: &str) -> PageOutcome {
        let mut outcome = PageOutcome::new(page.index, &page.path);
        if let Err(e) = self.run_page(doc, page, output_dir, instructions, &mut outcome) {
            warn!("{} page {}: {}", doc.filename(), page.index, e);
            outcome.failure = Some((&e).into());
        }
        outcome
    }

    fn run_page(
        &self,
        doc: &DocumentRef,
        page: &PageSource,
        output_dir: &Path,
        instructions: &str,
        outcome: &mut PageOutcome,
    ) -> Result<(), PipelineError> {
        let image = image::open(&page.path).map_err(|e| PipelineError::ImageDecode {
            path: page.path.clone(),
            reason: e.to_string(),
        })?;

        let correction = self.deskew.correct(image);
        outcome.angle = correction.angle;
        outcome.corrected_image =
            Some(self.deskew.save(&correction, &output_dir.join(&self.corrected_dir), &page.path)?);

        let text = self.text.extract(&correction.image)?;
        outcome.text = Some(TextStats {
            token_estimate: text.token_estimate,
            truncated: text.truncated,
            approximate: text.approximate,
        });
        if text.is_empty() {
            return Err(PipelineError::EmptyText);
        }

        let record = self.extract_with_retry(&text, instructions)?;

        let path = self.assembler.record_path(output_dir, doc, page.index);
        outcome.output = Some(self.assembler.persist(&record, &path)?);
        Ok(())
    }

    /// Retry remote failures up to the configured count.
    fn extract_with_retry(&self, text: &BoundedText, instructions: &str) -> Result<ExtractedRecord, PipelineError> {
        let mut attempt = 0;
        loop {
            match self.extractor.extract(text, instructions) {
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "Extraction attempt {} failed: {}; retrying in {}ms",
                        attempt,
                        e,
                        self.retry_backoff.as_millis()
                    );
                    std::thread::sleep(self.retry_backoff);
                }
                result => return result,
            }
        }
    }
}
