//! Command-line interface built on clap.
//!
//! Defines [`Cli`] with its [`Command`] subcommands (transcribe, batch,
//! convert, cleanup) and the global `--config` / `--verbose` flags.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

/// Tabscribe: sheet music scans to guitar tablature.
#[derive(Debug, Parser)]
#[command(name = "tabscribe", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file to load instead of ./tabscribe.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Transcribe one document, waiting for the result.
    Transcribe {
        /// Image or PDF of the sheet music.
        input: PathBuf,

        /// Output directory (defaults to <jobs_dir>/<job id>).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Submit several documents to the worker pool.
    Batch {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Parent directory; each job writes to <output>/<input stem>, with a
        /// numeric suffix when stems repeat.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Convert a MusicXML score (.musicxml, .xml or .mxl) to tablature JSON.
    Convert {
        score: PathBuf,

        /// Write JSON here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Report measures whose notes do not fill the time signature.
        #[arg(long)]
        check: bool,
    },

    /// Remove jobs, outputs, uploads and temp files past the retention horizon.
    Cleanup {
        /// Override the configured retention in days.
        #[arg(long)]
        retention_days: Option<u64>,

        /// Report what would be removed without deleting anything.
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },
}

/// One output directory per batch input under `root`, named after the input
/// stem. Repeated stems get `_2`, `_3`, ... so no two jobs share a directory.
pub fn batch_output_dirs(root: &Path, inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut taken = HashSet::new();
    inputs
        .iter()
        .map(|input| {
            let stem = input
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "job".to_string());
            let mut name = stem.clone();
            let mut n = 1;
            while !taken.insert(name.clone()) {
                n += 1;
                name = format!("{stem}_{n}");
            }
            root.join(name)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_transcribe_subcommand() {
        let cli = Cli::parse_from(["tabscribe", "transcribe", "song.pdf", "-o", "out"]);
        match cli.command {
            Command::Transcribe { input, output } => {
                assert_eq!(input, PathBuf::from("song.pdf"));
                assert_eq!(output, Some(PathBuf::from("out")));
            }
            _ => panic!("expected Transcribe command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "tabscribe",
            "--config",
            "alt.toml",
            "--verbose",
            "cleanup",
            "--dry-run",
            "--retention-days",
            "3",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        match cli.command {
            Command::Cleanup {
                retention_days,
                dry_run,
                json,
            } => {
                assert_eq!(retention_days, Some(3));
                assert!(dry_run);
                assert!(!json);
            }
            _ => panic!("expected Cleanup command"),
        }
    }

    #[test]
    fn batch_requires_inputs() {
        assert!(Cli::try_parse_from(["tabscribe", "batch"]).is_err());
        let cli = Cli::parse_from(["tabscribe", "batch", "a.png", "b.pdf"]);
        match cli.command {
            Command::Batch { inputs, output } => {
                assert_eq!(inputs.len(), 2);
                assert!(output.is_none());
            }
            _ => panic!("expected Batch command"),
        }
    }

    #[test]
    fn batch_outputs_never_collide() {
        let inputs = [
            PathBuf::from("a/song.pdf"),
            PathBuf::from("b/song.png"),
            PathBuf::from("etude.png"),
            PathBuf::from("c/song.tif"),
        ];
        let dirs = batch_output_dirs(Path::new("out"), &inputs);
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("out/song"),
                PathBuf::from("out/song_2"),
                PathBuf::from("out/etude"),
                PathBuf::from("out/song_3"),
            ]
        );
    }

    #[test]
    fn cli_parses_convert_check() {
        let cli = Cli::parse_from(["tabscribe", "convert", "page.mxl", "--check"]);
        assert!(matches!(cli.command, Command::Convert { check: true, .. }));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
