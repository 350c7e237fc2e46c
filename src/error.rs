use std::path::PathBuf;

use thiserror::Error;

/// Failures while checking or preparing the uploaded document.
#[derive(Debug, Error)]
pub enum PrepareError {
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    #[error("PDF rendering failed: {0}")]
    Render(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PrepareError {
    /// True for the errors that reject the input outright.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, PrepareError::NotFound(_) | PrepareError::UnsupportedType(_))
    }
}

/// Classified failure of one recognition-engine run. Always page-level.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineFailure {
    #[error("Could not detect music notation in this image")]
    NoNotationDetected,

    #[error("Image too large for processing")]
    ImageTooLarge,

    #[error("Recognition engine not installed")]
    EngineMissing,

    #[error("Processing timeout ({0}s)")]
    Timeout(u64),

    #[error("{0}")]
    Generic(String),
}

/// A symbolic score that could not be turned into tablature.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("No score document found")]
    MissingScore,

    #[error("No parts found in score")]
    NoParts,

    #[error("Invalid number in <{element}>: {value:?}")]
    InvalidNumber { element: String, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A structural rule broken by an assembled composition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompositionError {
    #[error("measure {measure}: string {string} out of range")]
    StringOutOfRange { measure: usize, string: u8 },

    #[error("measure {measure}: fret {fret} out of range")]
    FretOutOfRange { measure: usize, fret: u8 },

    #[error("measure {measure}: event ({time}, string {string}) is out of order")]
    Unordered { measure: usize, time: f64, string: u8 },
}

/// Why a page contributed nothing to the result.
#[derive(Debug, Error)]
pub enum PageFailure {
    #[error("image preparation failed: {0}")]
    Prepare(#[from] PrepareError),

    #[error("recognition failed: {0}")]
    Engine(#[from] EngineFailure),

    #[error("transcoding failed: {0}")]
    Transcode(#[from] TranscodeError),
}

/// Terminal failure of a whole job; its message becomes the job's error text.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("{0}")]
    InvalidInput(PrepareError),

    #[error("{0}")]
    Prepare(PrepareError),

    #[error("No music notation could be recognized in the uploaded file")]
    NothingRecognized,

    #[error("Invalid composition: {0}")]
    InvalidComposition(#[from] CompositionError),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Illegal status transition: {from} -> {to}")]
    IllegalTransition {
        from: crate::state_machine::JobStatus,
        to: crate::state_machine::JobStatus,
    },

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<PrepareError> for JobError {
    fn from(err: PrepareError) -> Self {
        if err.is_invalid_input() {
            JobError::InvalidInput(err)
        } else {
            JobError::Prepare(err)
        }
    }
}
