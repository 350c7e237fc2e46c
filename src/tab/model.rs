//! Tablature composition types and their JSON schema.
//!
//! Field names follow the persisted schema (`timeSignature`, `leftFinger`,
//! `_processing`), so a [`Composition`] serialises straight to the file the
//! front ends read.

use serde::{Deserialize, Serialize};

use super::fretboard::{MAX_FRET, STRING_COUNT};
use crate::error::CompositionError;

/// Schema version written into every composition.
pub const FORMAT_VERSION: &str = "1.0";

/// Title used when nothing better is known.
pub const UNTITLED: &str = "Untitled";

/// A complete tablature piece, possibly merged from several pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    pub title: String,
    pub tempo: u32,
    pub time_signature: String,
    pub measures: Vec<Measure>,
    pub version: String,
    #[serde(
        rename = "_processing",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub processing: Option<ProcessingSummary>,
}

impl Composition {
    pub fn new(title: impl Into<String>, tempo: u32, time_signature: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            tempo,
            time_signature: time_signature.into(),
            measures: Vec::new(),
            version: FORMAT_VERSION.to_string(),
            processing: None,
        }
    }

    /// Total number of fretted events across all measures.
    pub fn note_count(&self) -> usize {
        self.measures.iter().map(|m| m.events.len()).sum()
    }

    /// Checks the structural invariants every emitted composition must hold.
    pub fn validate(&self) -> Result<(), CompositionError> {
        for (index, measure) in self.measures.iter().enumerate() {
            measure.validate(index + 1)?;
        }
        Ok(())
    }
}

/// One bar of tablature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measure {
    pub time_signature: String,
    pub events: Vec<Event>,
    pub chords: Vec<ChordAnnotation>,
}

impl Measure {
    pub fn empty(time_signature: impl Into<String>) -> Self {
        Self {
            time_signature: time_signature.into(),
            events: Vec::new(),
            chords: Vec::new(),
        }
    }

    /// Sorts events by (time, string) ascending.
    pub fn sort_events(&mut self) {
        self.events.sort_by(|a, b| {
            a.time
                .total_cmp(&b.time)
                .then_with(|| a.string.cmp(&b.string))
        });
    }

    /// `number` is the 1-based position used in error reports.
    fn validate(&self, number: usize) -> Result<(), CompositionError> {
        for event in &self.events {
            if !(1..=STRING_COUNT).contains(&event.string) {
                return Err(CompositionError::StringOutOfRange {
                    measure: number,
                    string: event.string,
                });
            }
            if event.fret > MAX_FRET {
                return Err(CompositionError::FretOutOfRange {
                    measure: number,
                    fret: event.fret,
                });
            }
        }
        for pair in self.events.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let order = a.time.total_cmp(&b.time).then(a.string.cmp(&b.string));
            if order == std::cmp::Ordering::Greater {
                return Err(CompositionError::Unordered {
                    measure: number,
                    time: b.time,
                    string: b.string,
                });
            }
        }
        Ok(())
    }
}

/// A single fretted note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Offset from the start of the measure, in whole notes.
    pub time: f64,
    /// 1 is the high E string, 6 the low E.
    pub string: u8,
    pub fret: u8,
    /// Length in whole notes.
    pub duration: f64,
    pub left_finger: Option<u8>,
}

/// A chord symbol placed above the staff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordAnnotation {
    pub time: f64,
    pub name: String,
}

/// Auxiliary metadata describing how a multi-page job went.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub pages_total: usize,
    pub pages_processed: usize,
    pub failed_pages: Vec<usize>,
}
