use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::MultiProgress;

use tabscribe::cli::{Cli, Command, batch_output_dirs};
use tabscribe::tab::{check_measures, transcode_file};
use tabscribe::ui::{self, JobProgress};
use tabscribe::{JobOrchestrator, JobStatus, JobStore, RetentionManager, TabscribeConfig, logging};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = match &cli.config {
        Some(path) => TabscribeConfig::load_from(path)?,
        None => TabscribeConfig::load()?,
    };

    match cli.command {
        Command::Transcribe { input, output } => transcribe(config, input, output).await,
        Command::Batch { inputs, output } => batch(config, inputs, output).await,
        Command::Convert {
            score,
            output,
            check,
        } => convert(&score, output.as_deref(), check),
        Command::Cleanup {
            retention_days,
            dry_run,
            json,
        } => cleanup(config, retention_days, dry_run, json).await,
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn transcribe(
    config: TabscribeConfig,
    input: PathBuf,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let orchestrator = JobOrchestrator::from_config(config, JobStore::new());
    let store = orchestrator.store().clone();
    let progress = JobProgress::start(&display_name(&input));

    let run = orchestrator.run_sync(&input, output);
    tokio::pin!(run);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let result = loop {
        tokio::select! {
            result = &mut run => break result,
            _ = ticker.tick() => {
                // The store only ever holds this one job.
                let ids = store.ids().await;
                if let Some(id) = ids.first()
                    && let Ok(report) = store.status(id).await
                {
                    progress.update(&report);
                }
            }
        }
    };

    match result {
        Ok((id, composition)) => {
            let report = store.status(&id).await?;
            progress.finish(&report);
            ui::print_composition(&composition);
            if let Some(job) = store.get(&id).await {
                println!(
                    "\n  Written to {}",
                    job.output_dir
                        .join(tabscribe::orchestrator::COMPOSITION_FILE)
                        .display()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            progress.fail(&e.to_string());
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn batch(
    config: TabscribeConfig,
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
) -> Result<ExitCode> {
    let orchestrator = JobOrchestrator::from_config(config, JobStore::new());
    let store = orchestrator.store().clone();
    let multi = MultiProgress::new();

    let outputs: Vec<Option<PathBuf>> = match &output {
        Some(root) => batch_output_dirs(root, &inputs).into_iter().map(Some).collect(),
        None => vec![None; inputs.len()],
    };

    let mut tracked = Vec::with_capacity(inputs.len());
    let mut handles = Vec::with_capacity(inputs.len());
    for (input, job_output) in inputs.iter().zip(outputs) {
        let (id, handle) = orchestrator.submit(input, job_output).await;
        tracked.push((id, JobProgress::start_in(&multi, &display_name(input)), false));
        handles.push(handle);
    }

    let mut failures = 0;
    loop {
        let mut running = false;
        for (id, progress, done) in tracked.iter_mut() {
            if *done {
                continue;
            }
            let report = store.status(id).await?;
            if report.status.is_terminal() {
                if report.status == JobStatus::Failed {
                    failures += 1;
                }
                progress.finish(&report);
                *done = true;
            } else {
                progress.update(&report);
                running = true;
            }
        }
        if !running {
            break;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    for handle in handles {
        handle.await.context("job worker panicked")?;
    }

    println!("\n  {} of {} job(s) completed", inputs.len() - failures, inputs.len());
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn convert(score: &Path, output: Option<&Path>, check: bool) -> Result<ExitCode> {
    let composition = transcode_file(score)
        .with_context(|| format!("failed to transcode {}", score.display()))?;
    let json = serde_json::to_string_pretty(&composition)?;

    match output {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("failed to write {}", path.display()))?;
            ui::print_composition(&composition);
        }
        None => println!("{json}"),
    }

    if check {
        ui::print_mismatches(&check_measures(&composition));
    }
    Ok(ExitCode::SUCCESS)
}

async fn cleanup(
    mut config: TabscribeConfig,
    retention_days: Option<u64>,
    dry_run: bool,
    json: bool,
) -> Result<ExitCode> {
    if let Some(days) = retention_days {
        config.retention_days = days;
    }
    let report = RetentionManager::new(JobStore::new(), config).run(dry_run).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        ui::print_retention(&report);
    }
    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
