pub mod fretboard;
pub mod merge;
pub mod model;
pub mod musicxml;
pub mod transcoder;
pub mod validation;

pub use merge::{merge_pages, resolve_title};
pub use model::{ChordAnnotation, Composition, Event, Measure, ProcessingSummary};
pub use transcoder::{transcode_file, transcode_str};
pub use validation::{BeatMismatch, check_measures};
