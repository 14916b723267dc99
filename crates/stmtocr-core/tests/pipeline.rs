//! End-to-end pipeline and batch behavior with in-process collaborators.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use image::{DynamicImage, Rgb, RgbImage};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use stmtocr_core::error::{OcrError, PdfError, ServiceError};
use stmtocr_core::extraction::{ExtractionRequest, ExtractionService};
use stmtocr_core::ocr::{ApproximateTokenCounter, TextRecognizer};
use stmtocr_core::pdf::{page_file_name, PageRasterizer, RasterOptions};
use stmtocr_core::{
    BatchOrchestrator, BatchScope, DocumentPipeline, DocumentRef, DocumentStatus, FailureKind, NoProgress,
    StmtConfig, StmtError,
};

/// Gray level that encodes page `n` in test images.
fn shade(page: u32) -> u8 {
    (page * 40) as u8
}

fn write_page(path: &Path, page: u32) {
    let l = shade(page);
    RgbImage::from_pixel(32, 32, Rgb([l, l, l])).save(path).unwrap();
}

/// PDFs are text files `fake-pdf:<pages>`; anything else is corrupt.
struct FakeRasterizer;

impl PageRasterizer for FakeRasterizer {
    fn rasterize(&self, pdf: &Path, _: &RasterOptions, out_dir: &Path) -> Result<Vec<PathBuf>, PdfError> {
        let content = fs::read_to_string(pdf).map_err(|e| PdfError::Parse(e.to_string()))?;
        let pages: u32 = content
            .strip_prefix("fake-pdf:")
            .and_then(|n| n.trim().parse().ok())
            .ok_or_else(|| PdfError::Parse("not a PDF".to_string()))?;

        let stem = pdf.file_stem().unwrap().to_string_lossy().into_owned();
        Ok((1..=pages)
            .map(|n| {
                let path = out_dir.join(page_file_name(&stem, n));
                write_page(&path, n);
                path
            })
            .collect())
    }
}

/// Reads the page number back from the gray level; page 2 is blank.
struct ShadeRecognizer;

impl TextRecognizer for ShadeRecognizer {
    fn recognize(&self, image: &DynamicImage) -> Result<String, OcrError> {
        let level = image.to_luma8().get_pixel(0, 0).0[0];
        let page = (level as f32 / 40.0).round() as u32;
        Ok(match page {
            2 => "   ".to_string(),
            n => format!("RELEVE DE COMPTE\nPage {n}\n01/04 CB CARREFOUR 42,10"),
        })
    }
}

/// Replays scripted responses, repeating the last one.
struct ScriptedService {
    responses: Mutex<Vec<Result<String, ServiceError>>>,
    calls: AtomicUsize,
}

impl ScriptedService {
    fn new(responses: Vec<Result<String, ServiceError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            calls: AtomicUsize::new(0),
        })
    }

    fn answering(response: &str) -> Arc<Self> {
        Self::new(vec![Ok(response.to_string())])
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ExtractionService for ScriptedService {
    fn generate(&self, request: &ExtractionRequest) -> Result<String, ServiceError> {
        assert_eq!(request.temperature, 0.0);
        assert!(request.payload().ends_with('\n'));
        self.calls.fetch_add(1, Ordering::SeqCst);

        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.remove(0)
        } else {
            match &responses[0] {
                Ok(text) => Ok(text.clone()),
                Err(_) => Err(ServiceError::Transport("connection reset".to_string())),
            }
        }
    }
}

fn config() -> StmtConfig {
    let mut config = StmtConfig::default();
    config.service.api_key = Some("test-key".to_string());
    config.service.retry_backoff_ms = 0;
    config.ocr.deskew.enabled = false;
    config
}

fn pipeline(config: &StmtConfig, service: Arc<ScriptedService>) -> DocumentPipeline {
    DocumentPipeline::builder(config.clone())
        .with_rasterizer(Box::new(FakeRasterizer))
        .with_recognizer(Box::new(ShadeRecognizer))
        .with_tokenizer(Box::new(ApproximateTokenCounter))
        .with_service(Box::new(service))
        .build()
        .unwrap()
}

const RECORD: &str = "Here is the JSON: {\"bank\":\"X\",\"transactions\":[]} thanks";

fn read_json(path: &Path) -> Value {
    serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn test_single_image_record_is_isolated_and_persisted() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let scan = input.path().join("scan.png");
    write_page(&scan, 1);

    let service = ScriptedService::answering(RECORD);
    let pipeline = pipeline(&config(), service.clone());
    let outcome = pipeline.process(&DocumentRef::new(&scan, "X"), output.path(), "Extract");

    assert_eq!(outcome.status, DocumentStatus::Succeeded);
    let record_path = output.path().join("scan.json");
    assert_eq!(outcome.outputs(), [&record_path]);
    assert_eq!(read_json(&record_path), json!({"bank": "X", "transactions": []}));
    assert_eq!(
        fs::read_to_string(&record_path).unwrap(),
        "{\n    \"bank\": \"X\",\n    \"transactions\": []\n}"
    );
    assert!(output.path().join("corrected_images/corrected_scan.png").exists());
    assert_eq!(service.calls(), 1);
}

#[test]
fn test_pdf_with_blank_page_is_partial() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let pdf = input.path().join("releve.pdf");
    fs::write(&pdf, "fake-pdf:3").unwrap();

    let service = ScriptedService::answering(RECORD);
    let pipeline = pipeline(&config(), service.clone());
    let outcome = pipeline.process(&DocumentRef::new(&pdf, "cic"), output.path(), "Extract");

    assert_eq!(outcome.status, DocumentStatus::PartiallyProcessed);
    assert_eq!(outcome.pages.len(), 3);
    assert_eq!(outcome.outputs().len(), 2);
    assert_eq!(outcome.pages[1].failure.as_ref().unwrap().kind, FailureKind::EmptyText);

    assert!(output.path().join("releve_page_1.json").exists());
    assert!(!output.path().join("releve_page_2.json").exists());
    assert!(output.path().join("releve_page_3.json").exists());
    assert!(output.path().join("corrected_images/corrected_releve_page_2.jpg").exists());

    // The blank page never reached the service.
    assert_eq!(service.calls(), 2);
    assert!(!output.path().join("temp_pdf_images").exists());
}

#[test]
fn test_corrupt_pdf_fails_whole_document() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let pdf = input.path().join("broken.pdf");
    fs::write(&pdf, "garbage").unwrap();

    let service = ScriptedService::answering(RECORD);
    let outcome = pipeline(&config(), service.clone()).process(&DocumentRef::new(&pdf, "cic"), output.path(), "x");

    assert_eq!(outcome.status, DocumentStatus::Failed);
    assert!(outcome.pages.is_empty());
    assert_eq!(outcome.first_failure().unwrap().kind, FailureKind::Rasterization);
    assert_eq!(service.calls(), 0);
    assert!(!output.path().join("temp_pdf_images").exists());
}

#[test]
fn test_malformed_response_fails_page() {
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let scan = input.path().join("scan.jpg");
    write_page(&scan, 1);

    let service = ScriptedService::answering("I could not find any statement data.");
    let outcome = pipeline(&config(), service.clone()).process(&DocumentRef::new(&scan, "X"), output.path(), "x");

    assert_eq!(outcome.status, DocumentStatus::Failed);
    assert_eq!(outcome.first_failure().unwrap().kind, FailureKind::MalformedExtraction);
    assert_eq!(service.calls(), 1);
}

#[test]
fn test_remote_failures_are_retried_when_configured() {
    let input = tempfile::tempdir().unwrap();
    let scan = input.path().join("scan.jpg");
    write_page(&scan, 1);
    let doc = DocumentRef::new(&scan, "X");

    let flaky = || {
        ScriptedService::new(vec![
            Err(ServiceError::Timeout(120)),
            Ok(RECORD.to_string()),
        ])
    };

    let output = tempfile::tempdir().unwrap();
    let service = flaky();
    let outcome = pipeline(&config(), service.clone()).process(&doc, output.path(), "x");
    assert_eq!(outcome.first_failure().unwrap().kind, FailureKind::RemoteService);
    assert_eq!(service.calls(), 1);

    let mut retrying = config();
    retrying.service.max_retries = 2;
    let output = tempfile::tempdir().unwrap();
    let service = flaky();
    let outcome = pipeline(&retrying, service.clone()).process(&doc, output.path(), "x");
    assert_eq!(outcome.status, DocumentStatus::Succeeded);
    assert_eq!(service.calls(), 2);
}

/// `bank_a/{1.png, 2.pdf (corrupt), 3.png}`, `bank_b/{4.pdf, 5.jpg}`.
fn input_tree() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    let a = root.path().join("bank_a");
    let b = root.path().join("bank_b");
    fs::create_dir_all(&a).unwrap();
    fs::create_dir_all(&b).unwrap();

    write_page(&a.join("1.png"), 1);
    fs::write(a.join("2.pdf"), "corrupt").unwrap();
    write_page(&a.join("3.png"), 1);
    fs::write(a.join("notes.txt"), "ignored").unwrap();
    fs::write(b.join("4.pdf"), "fake-pdf:1").unwrap();
    write_page(&b.join("5.jpg"), 3);
    root
}

fn orchestrator(input: &Path, output: &Path, config: &StmtConfig, service: Arc<ScriptedService>) -> BatchOrchestrator {
    BatchOrchestrator::new(config, pipeline(config, service), input, output).unwrap()
}

#[test]
fn test_batch_isolates_failing_document() {
    let input = input_tree();
    let output = tempfile::tempdir().unwrap();
    let config = config();
    let batch = orchestrator(input.path(), output.path(), &config, ScriptedService::answering(RECORD));

    let outcome = batch.run(&BatchScope::All, None, &NoProgress).unwrap();

    assert_eq!(outcome.seen, 5);
    assert_eq!(outcome.attempted, 5);
    assert_eq!(outcome.succeeded, 4);
    assert_eq!(outcome.failed, 1);
    assert_eq!((outcome.images, outcome.pdfs), (3, 2));

    let failed: Vec<&str> = outcome.failures().map(|d| d.document.filename()).collect();
    assert_eq!(failed, ["2.pdf"]);

    assert!(output.path().join("bank_a/3.json").exists());
    assert!(output.path().join("bank_b/4_page_1.json").exists());
    assert!(output.path().join("bank_b/5.json").exists());
}

#[test]
fn test_max_files_takes_prefix() {
    let input = input_tree();
    let output = tempfile::tempdir().unwrap();
    let config = config();
    let batch = orchestrator(input.path(), output.path(), &config, ScriptedService::answering(RECORD));

    let discovered = batch.discover(&BatchScope::All).unwrap();
    let outcome = batch.run(&BatchScope::All, Some(2), &NoProgress).unwrap();

    assert_eq!(outcome.seen, 5);
    assert_eq!(outcome.attempted, 2);
    let attempted: Vec<&DocumentRef> = outcome.documents.iter().map(|d| &d.document).collect();
    let prefix: Vec<&DocumentRef> = discovered.iter().take(2).collect();
    assert_eq!(attempted, prefix);
}

#[test]
fn test_single_bank_scope() {
    let input = input_tree();
    let output = tempfile::tempdir().unwrap();
    let config = config();
    let batch = orchestrator(input.path(), output.path(), &config, ScriptedService::answering(RECORD));

    assert_eq!(batch.list_banks().unwrap(), ["bank_a", "bank_b"]);

    let outcome = batch.run(&BatchScope::Bank("bank_b".to_string()), None, &NoProgress).unwrap();
    assert_eq!(outcome.attempted, 2);
    assert_eq!(outcome.succeeded, 2);
    assert!(!output.path().join("bank_a").exists());
}

#[test]
fn test_missing_credential_aborts_before_processing() {
    let input = input_tree();
    let output = tempfile::tempdir().unwrap();
    let out_dir = output.path().join("results");

    let mut without_key = config();
    without_key.service.api_key = None;
    let service = ScriptedService::answering(RECORD);

    let result = BatchOrchestrator::new(&without_key, pipeline(&config(), service.clone()), input.path(), &out_dir);
    assert!(matches!(result, Err(StmtError::Config(_))));
    assert_eq!(service.calls(), 0);
    assert!(!out_dir.exists());
}

#[test]
fn test_missing_input_root_is_config_error() {
    let output = tempfile::tempdir().unwrap();
    let config = config();
    let result = BatchOrchestrator::new(
        &config,
        pipeline(&config, ScriptedService::answering(RECORD)),
        output.path().join("nowhere"),
        output.path(),
    );
    assert!(matches!(result, Err(StmtError::Config(_))));
}

#[tokio::test]
async fn test_concurrent_run_matches_sequential_counts() {
    let input = input_tree();
    let output = tempfile::tempdir().unwrap();
    let mut config = config();
    config.batch.jobs = 4;

    let service = ScriptedService::answering(RECORD);
    let batch = Arc::new(orchestrator(input.path(), output.path(), &config, service.clone()));
    let expected: Vec<DocumentRef> = batch.discover(&BatchScope::All).unwrap();

    let outcome = batch
        .run_concurrent(BatchScope::All, None, Arc::new(NoProgress))
        .await
        .unwrap();

    assert_eq!((outcome.attempted, outcome.succeeded, outcome.failed), (5, 4, 1));
    let order: Vec<&DocumentRef> = outcome.documents.iter().map(|d| &d.document).collect();
    assert_eq!(order, expected.iter().collect::<Vec<_>>());
    assert_eq!(service.calls(), 4);
}

/// Records how many calls overlap.
#[derive(Default)]
struct PeakService {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ExtractionService for PeakService {
    fn generate(&self, _: &ExtractionRequest) -> Result<String, ServiceError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(50));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(RECORD.to_string())
    }
}

#[tokio::test]
async fn test_concurrent_calls_stay_within_request_limit() {
    let input = tempfile::tempdir().unwrap();
    let bank = input.path().join("bank_a");
    fs::create_dir_all(&bank).unwrap();
    for n in 0..8 {
        write_page(&bank.join(format!("{n}.png")), 1);
    }
    let output = tempfile::tempdir().unwrap();

    let mut config = config();
    config.batch.jobs = 8;
    config.service.max_concurrent_requests = 2;

    let service = Arc::new(PeakService::default());
    let pipeline = DocumentPipeline::builder(config.clone())
        .with_rasterizer(Box::new(FakeRasterizer))
        .with_recognizer(Box::new(ShadeRecognizer))
        .with_tokenizer(Box::new(ApproximateTokenCounter))
        .with_service(Box::new(service.clone()))
        .build()
        .unwrap();
    let batch = Arc::new(BatchOrchestrator::new(&config, pipeline, input.path(), output.path()).unwrap());
    assert_eq!(batch.input_root(), input.path());
    assert_eq!(batch.output_dir(), output.path());

    let outcome = batch
        .run_concurrent(BatchScope::All, None, Arc::new(NoProgress))
        .await
        .unwrap();

    assert_eq!(outcome.succeeded, 8);
    let peak = service.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak of {peak} simultaneous calls");
}
