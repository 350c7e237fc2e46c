//! Beat-count consistency checks for transcoded measures.
//!
//! Recognition errors often drop or duplicate a note, leaving a bar that no
//! longer adds up to its time signature. These helpers flag such bars; they
//! never modify the composition.

use serde::Serialize;

use super::model::{Composition, Measure};

const TOLERANCE: f64 = 0.01;

/// Splits `"beats/beat-type"`, falling back to 4/4 when malformed.
pub fn parse_time_signature(time_signature: &str) -> (u32, u32) {
    time_signature
        .split_once('/')
        .and_then(|(beats, beat_type)| {
            let beats = beats.trim().parse::<u32>().ok()?;
            let beat_type = beat_type.trim().parse::<u32>().ok()?;
            (beats > 0 && beat_type > 0).then_some((beats, beat_type))
        })
        .unwrap_or((4, 4))
}

/// Expected length of a measure in whole notes.
pub fn measure_duration(time_signature: &str) -> f64 {
    let (beats, beat_type) = parse_time_signature(time_signature);
    f64::from(beats) / f64::from(beat_type)
}

/// Latest point any event in the measure still sounds.
pub fn event_extent(measure: &Measure) -> f64 {
    measure
        .events
        .iter()
        .map(|e| e.time + e.duration)
        .fold(0.0, f64::max)
}

/// A measure whose notes do not fill its time signature.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeatMismatch {
    /// 1-based measure number.
    pub measure: usize,
    pub expected: f64,
    pub actual: f64,
}

/// Lists measures whose event extent differs from the time signature.
///
/// Empty measures are skipped: a bar with no fretted notes (all rests, or
/// notes outside the guitar range) has nothing to measure.
pub fn check_measures(composition: &Composition) -> Vec<BeatMismatch> {
    composition
        .measures
        .iter()
        .enumerate()
        .filter(|(_, m)| !m.events.is_empty())
        .filter_map(|(index, measure)| {
            let expected = measure_duration(&measure.time_signature);
            let actual = event_extent(measure);
            ((actual - expected).abs() >= TOLERANCE).then_some(BeatMismatch {
                measure: index + 1,
                expected,
                actual,
            })
        })
        .collect()
}
