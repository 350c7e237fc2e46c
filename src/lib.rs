//! Tabscribe turns scanned sheet music into guitar tablature.
//!
//! Page images go through an external optical music recognition engine; the
//! resulting MusicXML is transcoded onto a six-string fretboard. The
//! [`orchestrator`] sequences this per job, [`retention`] expires old jobs.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod omr;
pub mod orchestrator;
pub mod retention;
pub mod state_machine;
pub mod tab;
pub mod ui;

pub use config::TabscribeConfig;
pub use error::{EngineFailure, JobError, PageFailure, PrepareError, TranscodeError};
pub use orchestrator::JobOrchestrator;
pub use retention::{RetentionManager, RetentionReport};
pub use state_machine::{Job, JobStatus, JobStatusReport, JobStore};
