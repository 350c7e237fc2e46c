//! Drives jobs from submission to a terminal state.
//!
//! A job is validated, rasterised into page images, and each page goes
//! through downsampling, recognition and transcoding in order. Page failures
//! are recorded and skipped; only a job with no usable page fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::config::TabscribeConfig;
use crate::error::{JobError, PageFailure, PrepareError};
use crate::omr::prepare::{self, downsample, rasterize};
use crate::omr::{AudiverisEngine, OmrEngine, PageRenderer, PdftoppmRenderer};
use crate::state_machine::{Job, JobStatus, JobStore};
use crate::tab::{
    Composition, ProcessingSummary, check_measures, merge_pages, resolve_title, transcode_file,
};

/// File name of the persisted result inside a job's output directory.
pub const COMPOSITION_FILE: &str = "composition.json";

/// Subdirectory of a job's output directory that receives engine artifacts.
pub const ARTIFACT_DIR: &str = "mxl";

const SCRATCH_PREFIX: &str = "omr_";

/// Runs transcription jobs against a shared [`JobStore`].
pub struct JobOrchestrator<E, R> {
    store: JobStore,
    config: Arc<TabscribeConfig>,
    engine: Arc<E>,
    renderer: Arc<R>,
    permits: Arc<Semaphore>,
}

impl<E, R> Clone for JobOrchestrator<E, R> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: Arc::clone(&self.config),
            engine: Arc::clone(&self.engine),
            renderer: Arc::clone(&self.renderer),
            permits: Arc::clone(&self.permits),
        }
    }
}

impl JobOrchestrator<AudiverisEngine, PdftoppmRenderer> {
    /// Orchestrator backed by the Audiveris engine and pdftoppm.
    pub fn from_config(config: TabscribeConfig, store: JobStore) -> Self {
        let engine = AudiverisEngine::new(&config.engine_path, config.engine_timeout());
        Self::new(config, store, engine, PdftoppmRenderer::default())
    }
}

impl<E: OmrEngine, R: PageRenderer> JobOrchestrator<E, R> {
    pub fn new(config: TabscribeConfig, store: JobStore, engine: E, renderer: R) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            store,
            config: Arc::new(config),
            engine: Arc::new(engine),
            renderer: Arc::new(renderer),
            permits,
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn config(&self) -> &TabscribeConfig {
        &self.config
    }

    /// Creates a pending job and registers it.
    ///
    /// Without an explicit output directory the job writes under
    /// `<jobs_dir>/<job id>`.
    async fn register(&self, input: PathBuf, output_dir: Option<PathBuf>) -> String {
        let mut job = Job::new(input, PathBuf::new());
        job.output_dir = output_dir.unwrap_or_else(|| self.config.jobs_dir.join(&job.id));
        let id = job.id.clone();
        debug!(job_id = %id, input = %job.input_path.display(), "Job registered");
        self.store.insert(job).await;
        id
    }

    /// Registers a job and schedules it on the worker pool.
    ///
    /// At most `max_concurrent_jobs` jobs process at once; the rest wait in
    /// `pending` for a permit. The handle resolves once the job is terminal.
    pub async fn submit(
        &self,
        input: impl Into<PathBuf>,
        output_dir: Option<PathBuf>,
    ) -> (String, JoinHandle<()>) {
        let id = self.register(input.into(), output_dir).await;
        let this = self.clone();
        let job_id = id.clone();
        let handle = tokio::spawn(async move {
            let _permit = match Arc::clone(&this.permits).acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    this.fail(&job_id, &JobError::Worker(e.to_string())).await;
                    return;
                }
            };
            // The outcome is recorded on the job itself.
            let _ = this.process_guarded(&job_id).await;
        });
        (id, handle)
    }

    /// Runs the same pipeline as [`submit`](Self::submit) inline.
    pub async fn run_sync(
        &self,
        input: impl Into<PathBuf>,
        output_dir: Option<PathBuf>,
    ) -> Result<(String, Composition), JobError> {
        let id = self.register(input.into(), output_dir).await;
        let composition = self.process_guarded(&id).await?;
        Ok((id, composition))
    }

    /// Runs [`process`](Self::process) on its own task so that a panic in the
    /// engine, renderer or pipeline still leaves the job failed.
    async fn process_guarded(&self, job_id: &str) -> Result<Composition, JobError> {
        let this = self.clone();
        let id = job_id.to_string();
        match tokio::spawn(async move { this.process(&id).await }).await {
            Ok(result) => result,
            Err(join_error) => {
                let err = worker_error(join_error);
                self.fail(job_id, &err).await;
                Err(err)
            }
        }
    }

    /// Executes a registered job, failing it on any error that escapes.
    async fn process(&self, job_id: &str) -> Result<Composition, JobError> {
        let result = self.execute(job_id).await;
        if let Err(err) = &result {
            self.fail(job_id, err).await;
        }
        result
    }

    async fn fail(&self, job_id: &str, err: &JobError) {
        error!(job_id, error = %err, "Job failed");
        let message = err.to_string();
        if let Err(e) = self.store.update(job_id, |job| job.fail(message)).await {
            warn!(job_id, error = %e, "Could not record job failure");
        }
    }

    async fn set_progress(&self, job_id: &str, progress: String) -> Result<(), JobError> {
        self.store
            .update(job_id, |job| job.set_progress(progress))
            .await
    }

    async fn execute(&self, job_id: &str) -> Result<Composition, JobError> {
        let job = self
            .store
            .update(job_id, |job| {
                job.transition(JobStatus::Processing)?;
                job.set_progress("Validating input...");
                Ok::<_, JobError>(job.clone())
            })
            .await??;
        info!(job_id, input = %job.input_path.display(), "Job started");

        prepare::validate(&job.input_path)?;

        // Removed on drop, whichever way this function returns.
        let scratch = tempfile::Builder::new().prefix(SCRATCH_PREFIX).tempdir()?;
        let artifact_dir = job.output_dir.join(ARTIFACT_DIR);
        tokio::fs::create_dir_all(&artifact_dir).await?;

        if prepare::is_pdf(&job.input_path) {
            self.set_progress(job_id, "Converting PDF to images...".to_string())
                .await?;
        }
        let pages = rasterize(
            self.renderer.as_ref(),
            &job.input_path,
            scratch.path(),
            self.config.pdf_dpi,
        )
        .await?;
        let total = pages.len();
        self.store
            .update(job_id, |job| {
                job.pages_total = total;
                job.set_progress(format!("Processing {total} page(s)..."));
            })
            .await?;

        let mut compositions = Vec::with_capacity(total);
        let mut failed_pages = Vec::new();
        for (index, page) in pages.iter().enumerate() {
            let number = index + 1;
            self.set_progress(job_id, format!("Processing page {number} of {total}..."))
                .await?;
            match self.process_page(page, &artifact_dir).await {
                Ok(composition) => compositions.push(composition),
                Err(failure) => {
                    warn!(job_id, page = number, error = %failure, "Page failed");
                    failed_pages.push(number);
                }
            }
            self.store.update(job_id, Job::complete_page).await?;
        }

        if compositions.is_empty() {
            return Err(JobError::NothingRecognized);
        }
        self.set_progress(job_id, "Merging pages...".to_string()).await?;
        let pages_processed = compositions.len();
        let mut composition = merge_pages(compositions).ok_or(JobError::NothingRecognized)?;
        composition.title = resolve_title(&composition.title, &file_stem(&job.input_path));
        composition.processing = Some(ProcessingSummary {
            pages_total: total,
            pages_processed,
            failed_pages,
        });

        let mismatches = check_measures(&composition);
        if !mismatches.is_empty() {
            debug!(job_id, measures = mismatches.len(), "Measures with inconsistent beat counts");
        }
        composition.validate()?;

        let path = job.output_dir.join(COMPOSITION_FILE);
        tokio::fs::write(&path, serde_json::to_vec_pretty(&composition)?).await?;

        let result = composition.clone();
        self.store
            .update(job_id, |job| {
                job.result = Some(result);
                job.set_progress("Done");
                job.transition(JobStatus::Completed)
            })
            .await??;
        info!(
            job_id,
            measures = composition.measures.len(),
            pages_total = total,
            pages_processed,
            output = %path.display(),
            "Job completed"
        );
        Ok(composition)
    }

    /// Downsample, recognise and transcode one page image.
    async fn process_page(
        &self,
        page: &Path,
        artifact_dir: &Path,
    ) -> Result<Composition, PageFailure> {
        let ceiling = self.config.max_pixels;
        let source = page.to_path_buf();
        let image = tokio::task::spawn_blocking(move || downsample(&source, ceiling))
            .await
            .map_err(|e| PrepareError::Io(std::io::Error::other(e)))??;

        let artifact = self.engine.recognize(&image, artifact_dir).await;
        if image != page
            && let Err(e) = tokio::fs::remove_file(&image).await
        {
            debug!(image = %image.display(), error = %e, "Could not remove downsampled copy");
        }
        let artifact = artifact?;

        let composition = tokio::task::spawn_blocking(move || transcode_file(&artifact))
            .await
            .map_err(|e| PrepareError::Io(std::io::Error::other(e)))??;
        Ok(composition)
    }
}

fn worker_error(err: JoinError) -> JobError {
    if !err.is_panic() {
        return JobError::Worker(err.to_string());
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    JobError::Worker(format!("job worker panicked: {message}"))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
