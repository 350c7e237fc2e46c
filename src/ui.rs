//! Terminal output for the tabscribe binary: spinners and coloured summaries.
//!
//! Uses `indicatif` for the progress spinner and `console` for colours.
//! [`JobProgress`] follows one job while it runs.

use console::Style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::retention::RetentionReport;
use crate::state_machine::{JobStatus, JobStatusReport};
use crate::tab::{BeatMismatch, Composition};

const SPINNER_TEMPLATE: &str = "{spinner:.cyan} {prefix:.bold} {msg}";
const SETTLED_TEMPLATE: &str = "  {prefix:.bold} {msg}";

/// Spinner that mirrors a job's progress text.
pub struct JobProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
}

impl JobProgress {
    pub fn start(label: &str) -> Self {
        Self::with_bar(ProgressBar::new_spinner(), label)
    }

    /// Spinner drawn as one line of a [`MultiProgress`].
    pub fn start_in(multi: &MultiProgress, label: &str) -> Self {
        Self::with_bar(multi.add(ProgressBar::new_spinner()), label)
    }

    fn with_bar(pb: ProgressBar, label: &str) -> Self {
        let template = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE);
        if let Ok(style) = template {
            pb.set_style(style);
        }
        pb.set_prefix(label.to_string());
        pb.set_message("Queued");
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Shows the latest status report, with a page counter once pages are known.
    pub fn update(&self, report: &JobStatusReport) {
        if report.pages_total > 0 {
            self.pb.set_message(format!(
                "[{}/{}] {}",
                report.pages_completed, report.pages_total, report.progress
            ));
        } else {
            self.pb.set_message(report.progress.clone());
        }
    }

    /// Replaces the spinner with the job's final outcome.
    pub fn finish(&self, report: &JobStatusReport) {
        let line = match report.status {
            JobStatus::Completed => format!(
                "{} {} completed ({} page(s))",
                self.green.apply_to("✓"),
                report.job_id,
                report.pages_total
            ),
            _ => format!(
                "{} {} failed: {}",
                self.red.apply_to("✗"),
                report.job_id,
                report.error.as_deref().unwrap_or("unknown error")
            ),
        };
        self.settle(line);
    }

    pub fn fail(&self, message: &str) {
        self.settle(format!("{} {message}", self.red.apply_to("✗")));
    }

    fn settle(&self, line: String) {
        if let Ok(style) = ProgressStyle::default_spinner().template(SETTLED_TEMPLATE) {
            self.pb.set_style(style);
        }
        self.pb.finish_with_message(line);
    }
}

/// Prints a short summary of a finished composition.
pub fn print_composition(composition: &Composition) {
    let heading = Style::new().cyan().bold();
    let yellow = Style::new().yellow();
    println!();
    println!("{}", heading.apply_to(format!("─── {} ───", composition.title)));
    println!("  Tempo:          {} BPM", composition.tempo);
    println!("  Time signature: {}", composition.time_signature);
    println!("  Measures:       {}", composition.measures.len());
    println!("  Notes:          {}", composition.note_count());
    if let Some(summary) = &composition.processing {
        println!(
            "  Pages:          {}/{} recognised",
            summary.pages_processed, summary.pages_total
        );
        if !summary.failed_pages.is_empty() {
            let pages: Vec<String> =
                summary.failed_pages.iter().map(usize::to_string).collect();
            let line = format!("Failed pages:   {}", pages.join(", "));
            println!("  {}", yellow.apply_to(line));
        }
    }
}

pub fn print_mismatches(mismatches: &[BeatMismatch]) {
    let green = Style::new().green();
    let yellow = Style::new().yellow();
    if mismatches.is_empty() {
        println!("  {} All measures match their time signature", green.apply_to("✓"));
        return;
    }
    println!(
        "  {} {} measure(s) do not fill their time signature:",
        yellow.apply_to("!"),
        mismatches.len()
    );
    for m in mismatches {
        println!(
            "    measure {}: expected {:.3}, found {:.3}",
            m.measure, m.expected, m.actual
        );
    }
}

pub fn print_retention(report: &RetentionReport) {
    let heading = Style::new().cyan().bold();
    let red = Style::new().red();
    let title = if report.dry_run {
        "─── Retention (dry run) ───"
    } else {
        "─── Retention ───"
    };
    println!("{}", heading.apply_to(title));
    println!("  Jobs removed:        {}", report.jobs_removed);
    println!("  Directories removed: {}", report.directories_removed);
    for dir in &report.removed_directories {
        println!("    - {dir}");
    }
    println!("  Temp files removed:  {}", report.files_removed);
    for (dir, count) in &report.temp_dirs {
        println!("    - {dir}: {count} files");
    }
    println!("  Space freed:         {:.2} MB", report.space_freed_mb);
    if !report.errors.is_empty() {
        println!("  {}", red.apply_to(format!("Errors: {}", report.errors.len())));
        for err in &report.errors {
            println!("    - {err}");
        }
    }
}
