//! Recognition engine invocation.
//!
//! The engine runs as a child process per page with a hard timeout. Its exit
//! status and console output are mapped onto [`EngineFailure`].

use std::ffi::OsStr;
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::process::Command;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::EngineFailure;

/// File extensions of score artifacts the engine may produce.
pub const SCORE_EXTENSIONS: &[&str] = &["mxl", "musicxml"];

/// Something that turns one page image into a symbolic score file.
pub trait OmrEngine: Send + Sync + 'static {
    fn recognize(
        &self,
        image: &Path,
        output_dir: &Path,
    ) -> impl Future<Output = Result<PathBuf, EngineFailure>> + Send;
}

/// Runs Audiveris in batch export mode.
#[derive(Debug, Clone)]
pub struct AudiverisEngine {
    program: PathBuf,
    timeout: Duration,
}

impl AudiverisEngine {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl OmrEngine for AudiverisEngine {
    async fn recognize(&self, image: &Path, output_dir: &Path) -> Result<PathBuf, EngineFailure> {
        debug!(image = %image.display(), "Running recognition engine");

        let mut cmd = Command::new(&self.program);
        cmd.arg("-batch")
            .arg("-export")
            .arg("-output")
            .arg(output_dir)
            .arg(image)
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => return Err(EngineFailure::Timeout(self.timeout.as_secs())),
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => {
                return Err(EngineFailure::EngineMissing);
            }
            Ok(Err(e)) => return Err(EngineFailure::Generic(e.to_string())),
            Ok(Ok(output)) => output,
        };

        if !output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let failure = classify_diagnostics(&format!("{stdout}\n{stderr}"));
            warn!(status = %output.status, %failure, "Recognition engine failed");
            return Err(failure);
        }

        locate_artifact(image, output_dir)
            .ok_or_else(|| EngineFailure::Generic("No MusicXML output generated".to_string()))
    }
}

/// Maps the engine's console output after a non-zero exit onto a failure kind.
pub fn classify_diagnostics(text: &str) -> EngineFailure {
    if text.contains("No system found") {
        EngineFailure::NoNotationDetected
    } else if text.contains("Too large image") {
        EngineFailure::ImageTooLarge
    } else {
        EngineFailure::Generic("Audiveris processing failed".to_string())
    }
}

fn is_score_file(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .is_some_and(|ext| SCORE_EXTENSIONS.iter().any(|s| ext.eq_ignore_ascii_case(s)))
}

/// Finds the artifact produced for `image`.
///
/// Looks for `<stem>.mxl` / `<stem>.musicxml` first, then falls back to the
/// most recently modified score file anywhere under `output_dir`.
pub fn locate_artifact(image: &Path, output_dir: &Path) -> Option<PathBuf> {
    let stem = image.file_stem()?.to_string_lossy();
    for ext in SCORE_EXTENSIONS {
        let candidate = output_dir.join(format!("{stem}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    WalkDir::new(output_dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && is_score_file(entry.path()))
        .filter_map(|entry| {
            let modified = entry.metadata().ok()?.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            Some((modified, entry.into_path()))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}
