//! CLI subcommands.

pub mod banks;
pub mod batch;
pub mod config;
pub mod models;
pub mod process;

use std::path::{Path, PathBuf};

use tracing::debug;

use stmtocr_core::{DocumentPipeline, StmtConfig};

use models::{get_active_variant, get_variant_dir};

/// Load the configuration: an explicit file, the default file, or defaults.
pub fn load_config(config_path: Option<&str>) -> anyhow::Result<StmtConfig> {
    if let Some(path) = config_path {
        return Ok(StmtConfig::from_file(Path::new(path))?);
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        debug!("Using configuration from {}", default_path.display());
        Ok(StmtConfig::from_file(&default_path)?)
    } else {
        Ok(StmtConfig::default())
    }
}

/// Check the credential, locate the OCR models and build the pipeline.
///
/// Runs before any document is touched.
pub fn prepare_pipeline(config: &mut StmtConfig, model_dir: Option<PathBuf>) -> anyhow::Result<DocumentPipeline> {
    config.resolve_credentials()?;

    let model_dir = model_dir
        .or_else(|| config.models.model_dir.clone())
        .unwrap_or_else(|| get_variant_dir(get_active_variant()));
    debug!("Using OCR models from {}", model_dir.display());
    config.models.model_dir = Some(model_dir);

    Ok(DocumentPipeline::from_config(config)?)
}
