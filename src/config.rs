//! Tabscribe configuration loaded from `tabscribe.toml`.
//!
//! Every field has a default, so a partial file (or none at all) works.
//! `TABSCRIBE_ENGINE_PATH` takes precedence over the file for the engine path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "tabscribe.toml";

pub const ENGINE_PATH_ENV: &str = "TABSCRIBE_ENGINE_PATH";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TabscribeConfig {
    /// Recognition engine launcher.
    #[serde(default = "default_engine_path")]
    pub engine_path: String,

    /// Hard wall-clock limit for one engine run.
    #[serde(default = "default_engine_timeout_secs")]
    pub engine_timeout_secs: u64,

    /// Images above this many pixels are downsampled before recognition.
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,

    /// Resolution used when rendering PDF pages.
    #[serde(default = "default_pdf_dpi")]
    pub pdf_dpi: u32,

    /// Jobs allowed to process at the same time.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,

    /// Root for per-job output directories.
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: PathBuf,

    /// Root for uploaded files, swept by retention.
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,

    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Directory searched for stale temp output directories.
    #[serde(default = "default_temp_base_dir")]
    pub temp_base_dir: PathBuf,

    /// Name patterns (`*` wildcard) of temp directories to sweep.
    #[serde(default = "default_temp_patterns")]
    pub temp_patterns: Vec<String>,
}

fn default_engine_path() -> String {
    if cfg!(target_os = "linux") {
        "/opt/audiveris/bin/Audiveris".to_string()
    } else if cfg!(target_os = "macos") {
        "/Applications/Audiveris.app/Contents/MacOS/Audiveris".to_string()
    } else {
        "audiveris".to_string()
    }
}

fn default_engine_timeout_secs() -> u64 {
    600
}

// The engine refuses images above roughly this size.
fn default_max_pixels() -> u64 {
    20_000_000
}

fn default_pdf_dpi() -> u32 {
    200
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_jobs_dir() -> PathBuf {
    PathBuf::from("omr_jobs")
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_retention_days() -> u64 {
    7
}

fn default_temp_base_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_temp_patterns() -> Vec<String> {
    vec!["omr_output_*".to_string(), "omr_pipeline_*".to_string()]
}

impl Default for TabscribeConfig {
    fn default() -> Self {
        Self {
            engine_path: default_engine_path(),
            engine_timeout_secs: default_engine_timeout_secs(),
            max_pixels: default_max_pixels(),
            pdf_dpi: default_pdf_dpi(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            jobs_dir: default_jobs_dir(),
            uploads_dir: default_uploads_dir(),
            retention_days: default_retention_days(),
            temp_base_dir: default_temp_base_dir(),
            temp_patterns: default_temp_patterns(),
        }
    }
}

impl TabscribeConfig {
    /// Loads `tabscribe.toml` from the working directory.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Loads the given file, using defaults when it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str::<TabscribeConfig>(&contents)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else {
            Self::default()
        };

        if let Ok(engine) = std::env::var(ENGINE_PATH_ENV)
            && !engine.is_empty()
        {
            config.engine_path = engine;
        }

        Ok(config)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn retention_horizon(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 60 * 60)
    }
}
