//! Retention sweep over the job registry, job outputs, uploads and temp dirs.
//!
//! Nothing here is fatal: filesystem errors are collected into the report
//! and the sweep moves on to the next item.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::TabscribeConfig;
use crate::state_machine::JobStore;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// What a sweep removed, or would remove in dry-run mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetentionReport {
    pub dry_run: bool,
    pub jobs_removed: usize,
    pub directories_removed: usize,
    pub files_removed: usize,
    pub space_freed_mb: f64,
    pub errors: Vec<String>,
    /// Removed job-output and upload directories.
    pub removed_directories: Vec<String>,
    /// Stale files removed per temp directory.
    pub temp_dirs: BTreeMap<String, usize>,
    #[serde(skip)]
    bytes_freed: u64,
}

impl RetentionReport {
    fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    fn finish(&mut self) {
        self.space_freed_mb = (self.bytes_freed as f64 / BYTES_PER_MB * 100.0).round() / 100.0;
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Applies the retention horizon to every kind of stored artefact.
pub struct RetentionManager {
    store: JobStore,
    config: TabscribeConfig,
}

impl RetentionManager {
    pub fn new(store: JobStore, config: TabscribeConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(&self, dry_run: bool) -> RetentionReport {
        let horizon = self.config.retention_horizon();
        let mut report = RetentionReport::new(dry_run);

        report.jobs_removed = self
            .store
            .remove_expired(Utc::now(), horizon, dry_run)
            .await
            .len();

        // Output directories of unfinished jobs are left alone whatever their age.
        let active: HashSet<String> = self.store.active().await.into_iter().collect();
        let config = self.config.clone();
        let fs_report = tokio::task::spawn_blocking(move || {
            let mut report = RetentionReport::new(dry_run);
            let cutoff = cutoff_for(horizon);
            sweep_directories(&config.jobs_dir, cutoff, &active, dry_run, &mut report);
            sweep_directories(&config.uploads_dir, cutoff, &HashSet::new(), dry_run, &mut report);
            sweep_temp_dirs(
                &config.temp_base_dir,
                &config.temp_patterns,
                cutoff,
                dry_run,
                &mut report,
            );
            report
        })
        .await;

        match fs_report {
            Ok(fs) => {
                report.directories_removed = fs.directories_removed;
                report.files_removed = fs.files_removed;
                report.errors = fs.errors;
                report.removed_directories = fs.removed_directories;
                report.temp_dirs = fs.temp_dirs;
                report.bytes_freed = fs.bytes_freed;
            }
            Err(e) => report.errors.push(format!("Filesystem sweep aborted: {e}")),
        }
        report.finish();

        info!(
            dry_run,
            jobs = report.jobs_removed,
            directories = report.directories_removed,
            files = report.files_removed,
            space_freed_mb = report.space_freed_mb,
            errors = report.errors.len(),
            "Retention sweep finished"
        );
        report
    }
}

fn cutoff_for(horizon: Duration) -> SystemTime {
    SystemTime::now()
        .checked_sub(horizon)
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

fn is_stale(path: &Path, cutoff: SystemTime) -> std::io::Result<bool> {
    Ok(std::fs::metadata(path)?.modified()? < cutoff)
}

/// Total size of the files under `dir`.
fn dir_size(dir: &Path) -> Result<u64, walkdir::Error> {
    let mut total = 0;
    for entry in WalkDir::new(dir) {
        let entry = entry?;
        if entry.file_type().is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

/// Removes subdirectories of `root` last modified before `cutoff`.
///
/// Directories named in `keep` are skipped. A missing root is not an error.
pub fn sweep_directories(
    root: &Path,
    cutoff: SystemTime,
    keep: &HashSet<String>,
    dry_run: bool,
    report: &mut RetentionReport,
) {
    if !root.is_dir() {
        return;
    }
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            report
                .errors
                .push(format!("Error reading {}: {e}", root.display()));
            return;
        }
    };

    for entry in entries {
        let path = match entry {
            Ok(entry) => entry.path(),
            Err(e) => {
                report
                    .errors
                    .push(format!("Error reading {}: {e}", root.display()));
                continue;
            }
        };
        if !path.is_dir() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if keep.contains(&name) {
            continue;
        }
        match is_stale(&path, cutoff) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(e) => {
                report
                    .errors
                    .push(format!("Error checking {}: {e}", path.display()));
                continue;
            }
        }

        let size = dir_size(&path).unwrap_or_else(|e| {
            report
                .errors
                .push(format!("Error calculating size for {name}: {e}"));
            0
        });

        if !dry_run && let Err(e) = std::fs::remove_dir_all(&path) {
            warn!(path = %path.display(), error = %e, "Could not remove directory");
            report
                .errors
                .push(format!("Error removing {}: {e}", path.display()));
            continue;
        }
        debug!(path = %path.display(), size, dry_run, "Removed expired directory");
        report.directories_removed += 1;
        report.bytes_freed += size;
        report.removed_directories.push(path.display().to_string());
    }
}

/// Compiles a `*`-wildcard name pattern into an anchored regex.
pub fn pattern_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$"))
}

/// Removes stale files inside directories of `base` whose names match one of
/// `patterns`. The directories themselves are kept.
pub fn sweep_temp_dirs(
    base: &Path,
    patterns: &[String],
    cutoff: SystemTime,
    dry_run: bool,
    report: &mut RetentionReport,
) {
    let mut matchers = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        match pattern_to_regex(pattern) {
            Ok(re) => matchers.push(re),
            Err(e) => report
                .errors
                .push(format!("Invalid temp pattern {pattern:?}: {e}")),
        }
    }
    if matchers.is_empty() || !base.is_dir() {
        return;
    }

    let entries = match std::fs::read_dir(base) {
        Ok(entries) => entries,
        Err(e) => {
            report
                .errors
                .push(format!("Error reading {}: {e}", base.display()));
            return;
        }
    };

    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if !path.is_dir() || !matchers.iter().any(|re| re.is_match(&name)) {
            continue;
        }

        let mut removed = 0;
        for file in WalkDir::new(&path).into_iter() {
            let file = match file {
                Ok(file) => file,
                Err(e) => {
                    report.errors.push(format!("Error walking {name}: {e}"));
                    continue;
                }
            };
            if !file.file_type().is_file() {
                continue;
            }
            let metadata = match file.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    report.errors.push(format!("Error reading {name}: {e}"));
                    continue;
                }
            };
            if metadata.modified().is_ok_and(|modified| modified >= cutoff) {
                continue;
            }
            if !dry_run && let Err(e) = std::fs::remove_file(file.path()) {
                report
                    .errors
                    .push(format!("Error removing {}: {e}", file.path().display()));
                continue;
            }
            removed += 1;
            report.bytes_freed += metadata.len();
        }

        if removed > 0 {
            debug!(dir = %name, files = removed, dry_run, "Swept temp directory");
            report.files_removed += removed;
            report.temp_dirs.insert(name, removed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::{Job, JobStatus};
    use std::fs::File;

    const DAY: u64 = 86_400;

    fn age(path: &Path, days: u64) {
        let when = SystemTime::now() - Duration::from_secs(days * DAY);
        File::open(path).unwrap().set_modified(when).unwrap();
    }

    fn write(path: &Path, len: usize) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![0u8; len]).unwrap();
    }

    /// jobs/old (10 days, 1 MiB), jobs/young, uploads/old (10 days),
    /// omr_output_x with one stale and one fresh file, and a stale file in
    /// a directory that matches no pattern.
    fn layout(root: &Path) -> TabscribeConfig {
        write(&root.join("jobs/old/composition.json"), 1024 * 1024);
        write(&root.join("jobs/young/composition.json"), 10);
        write(&root.join("uploads/old/score.pdf"), 10);
        write(&root.join("omr_output_x/stale.mxl"), 10);
        write(&root.join("omr_output_x/fresh.mxl"), 10);
        write(&root.join("keep_me/stale.txt"), 10);

        age(&root.join("jobs/old/composition.json"), 10);
        age(&root.join("jobs/old"), 10);
        age(&root.join("uploads/old"), 10);
        age(&root.join("omr_output_x/stale.mxl"), 10);
        age(&root.join("keep_me/stale.txt"), 10);

        TabscribeConfig {
            jobs_dir: root.join("jobs"),
            uploads_dir: root.join("uploads"),
            temp_base_dir: root.to_path_buf(),
            retention_days: 7,
            ..TabscribeConfig::default()
        }
    }

    #[tokio::test]
    async fn old_entries_go_and_young_ones_stay() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let manager = RetentionManager::new(JobStore::new(), layout(root));

        let report = manager.run(false).await;

        assert!(report.is_clean(), "{:?}", report.errors);
        assert_eq!(report.directories_removed, 2);
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.space_freed_mb, 1.0);
        assert_eq!(report.temp_dirs.get("omr_output_x"), Some(&1));

        assert!(!root.join("jobs/old").exists());
        assert!(!root.join("uploads/old").exists());
        assert!(root.join("jobs/young").exists());
        assert!(!root.join("omr_output_x/stale.mxl").exists());
        assert!(root.join("omr_output_x/fresh.mxl").exists());
        assert!(root.join("keep_me/stale.txt").exists());
    }

    #[tokio::test]
    async fn dry_run_matches_live_run_without_deleting() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let config = layout(root);

        let store = JobStore::new();
        let mut job = Job::new("in.png", "out");
        job.created_at = Utc::now() - chrono::Duration::days(30);
        job.transition(JobStatus::Processing).unwrap();
        job.transition(JobStatus::Completed).unwrap();
        store.insert(job).await;

        let manager = RetentionManager::new(store.clone(), config);
        let dry = manager.run(true).await;
        assert!(dry.dry_run);
        assert_eq!(store.len().await, 1);
        assert!(root.join("jobs/old").exists());
        assert!(root.join("omr_output_x/stale.mxl").exists());

        let live = manager.run(false).await;
        assert_eq!(dry.jobs_removed, 1);
        assert_eq!(dry.jobs_removed, live.jobs_removed);
        assert_eq!(dry.directories_removed, live.directories_removed);
        assert_eq!(dry.files_removed, live.files_removed);
        assert_eq!(dry.space_freed_mb, live.space_freed_mb);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn active_job_output_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let config = layout(root);

        let store = JobStore::new();
        let mut job = Job::new("in.png", root.join("jobs/old"));
        job.created_at = Utc::now() - chrono::Duration::days(30);
        job.transition(JobStatus::Processing).unwrap();
        let id = job.id.clone();
        store.insert(job).await;

        let active_dir = root.join("jobs").join(&id);
        write(&active_dir.join("mxl/page.mxl"), 10);
        age(&active_dir, 30);

        let report = RetentionManager::new(store.clone(), config).run(false).await;
        assert_eq!(report.jobs_removed, 0);
        assert!(store.get(&id).await.is_some());
        assert!(active_dir.exists());
        assert!(!root.join("jobs/old").exists());
    }

    #[test]
    fn missing_roots_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = RetentionReport::new(false);
        let cutoff = SystemTime::now();
        sweep_directories(&dir.path().join("nope"), cutoff, &HashSet::new(), false, &mut report);
        let patterns = ["omr_*".to_string()];
        sweep_temp_dirs(&dir.path().join("nope"), &patterns, cutoff, false, &mut report);
        assert_eq!(report, RetentionReport::new(false));
    }

    #[test]
    fn wildcard_patterns_are_anchored() {
        let re = pattern_to_regex("omr_output_*").unwrap();
        assert!(re.is_match("omr_output_123"));
        assert!(!re.is_match("x_omr_output_1"));
        let literal = pattern_to_regex("cache.d").unwrap();
        assert!(literal.is_match("cache.d"));
        assert!(!literal.is_match("cachexd"));
    }
}
