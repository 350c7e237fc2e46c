//! MusicXML → tablature transcoding.
//!
//! Each `<measure>` of the first part is reduced to a flat list of
//! [`MeasureElement`]s, which a per-measure [`MeasureState`] replays to place
//! notes on the fretboard. Durations are whole-note fractions throughout.

use std::path::Path;

use tracing::debug;

use super::fretboard::{assign_chord, pitch_to_midi};
use super::model::{ChordAnnotation, Composition, Event, Measure, UNTITLED};
use super::musicxml::{Element, load_score, parse_document};
use crate::error::TranscodeError;

pub const DEFAULT_TEMPO: u32 = 120;
pub const DEFAULT_TIME_SIGNATURE: &str = "4/4";

// Applied to pitched notes that carry no <duration> (grace notes).
const FALLBACK_NOTE_DURATION: f64 = 0.25;

/// Octaves MusicXML can express.
const OCTAVE_RANGE: std::ops::RangeInclusive<i32> = 0..=9;

/// At most an octave of alteration either way.
const ALTER_RANGE: std::ops::RangeInclusive<i32> = -12..=12;

/// A pitched note as read from the score, before it is placed on a string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PitchEvent {
    pub midi: i32,
    pub duration: f64,
    /// Sounds together with the preceding note (`<chord/>`).
    pub simultaneous: bool,
}

/// The measure-level vocabulary the transcoder understands.
#[derive(Debug, Clone, PartialEq)]
pub enum MeasureElement {
    Note(PitchEvent),
    /// A note without `<pitch>` (percussion); it emits nothing and does not
    /// move the cursor, but still closes an open chord group.
    Unpitched { simultaneous: bool },
    Rest { duration: f64 },
    Harmony { name: String },
    Forward { duration: f64 },
    Backup { duration: f64 },
}

/// Converts a duration in score divisions to whole notes.
pub fn whole_notes(duration_units: i64, divisions: i64) -> f64 {
    let divisions = if divisions <= 0 { 1 } else { divisions };
    (duration_units as f64 / divisions as f64) / 4.0
}

/// Cursor and chord buffer for one measure.
#[derive(Debug, Default)]
pub struct MeasureState {
    current_time: f64,
    chord_time: f64,
    pending: Vec<(i32, f64)>,
    events: Vec<Event>,
    chords: Vec<ChordAnnotation>,
}

impl MeasureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn apply(&mut self, element: MeasureElement) {
        match element {
            MeasureElement::Note(note) => {
                if !note.simultaneous {
                    self.flush();
                    self.chord_time = self.current_time;
                }
                self.pending.push((note.midi, note.duration));
                if !note.simultaneous {
                    self.current_time += note.duration;
                }
            }
            MeasureElement::Unpitched { simultaneous } => {
                if !simultaneous {
                    self.flush();
                    self.chord_time = self.current_time;
                }
            }
            MeasureElement::Rest { duration } => {
                self.flush();
                self.current_time += duration;
            }
            MeasureElement::Harmony { name } => {
                self.chords.push(ChordAnnotation {
                    time: self.current_time,
                    name,
                });
            }
            MeasureElement::Forward { duration } => {
                self.flush();
                self.current_time += duration;
            }
            MeasureElement::Backup { duration } => {
                self.flush();
                self.current_time = (self.current_time - duration).max(0.0);
            }
        }
    }

    /// Voices the buffered group at `chord_time` and empties the buffer.
    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let duration = self.pending[0].1;
        let pitches: Vec<i32> = self.pending.iter().map(|(midi, _)| *midi).collect();
        for (_, position) in assign_chord(&pitches) {
            self.events.push(Event {
                time: self.chord_time,
                string: position.string,
                fret: position.fret,
                duration,
                left_finger: None,
            });
        }
        self.pending.clear();
    }

    /// Closes the measure: flushes the trailing group and sorts the events.
    pub fn finish(mut self, time_signature: &str) -> Measure {
        self.flush();
        let mut measure = Measure {
            time_signature: time_signature.to_string(),
            events: self.events,
            chords: self.chords,
        };
        measure.sort_events();
        measure
    }
}

/// Transcodes a score file; the file stem is the last-resort title.
pub fn transcode_file(path: &Path) -> Result<Composition, TranscodeError> {
    let root = load_score(path)?;
    let fallback = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| UNTITLED.to_string());
    let composition = transcode_document(&root, &fallback)?;
    debug!(
        path = %path.display(),
        measures = composition.measures.len(),
        notes = composition.note_count(),
        "Transcoded score"
    );
    Ok(composition)
}

/// Transcodes an in-memory MusicXML document.
pub fn transcode_str(xml: &str, fallback_title: &str) -> Result<Composition, TranscodeError> {
    let root = parse_document(xml)?;
    transcode_document(&root, fallback_title)
}

pub fn transcode_document(
    root: &Element,
    fallback_title: &str,
) -> Result<Composition, TranscodeError> {
    let part = root
        .descendants("part")
        .into_iter()
        .next()
        .ok_or(TranscodeError::NoParts)?;

    let mut composition = Composition::new(
        extract_title(root, fallback_title),
        extract_tempo(root),
        DEFAULT_TIME_SIGNATURE,
    );

    let mut divisions: i64 = 1;
    let mut time_signature = DEFAULT_TIME_SIGNATURE.to_string();

    for measure_elem in part.children_named("measure") {
        if let Some(ts) = extract_time_signature(measure_elem) {
            time_signature = ts;
        }
        if composition.measures.is_empty() {
            composition.time_signature = time_signature.clone();
        }

        let mut state = MeasureState::new();
        for child in &measure_elem.children {
            if child.name == "attributes" {
                if let Some(value) = parse_int(child, "divisions")? {
                    divisions = value;
                }
                continue;
            }
            if let Some(element) = read_element(child, divisions)? {
                state.apply(element);
            }
        }
        composition.measures.push(state.finish(&time_signature));
    }

    if composition.measures.is_empty() {
        composition
            .measures
            .push(Measure::empty(composition.time_signature.clone()));
    }

    Ok(composition)
}

fn read_element(elem: &Element, divisions: i64) -> Result<Option<MeasureElement>, TranscodeError> {
    let element = match elem.name.as_str() {
        "note" => {
            let duration = parse_int(elem, "duration")?.map(|d| whole_notes(d, divisions));
            if elem.has_child("rest") {
                MeasureElement::Rest {
                    duration: duration.unwrap_or(0.0),
                }
            } else {
                let simultaneous = elem.has_child("chord");
                match read_pitch(elem)? {
                    Some(midi) => MeasureElement::Note(PitchEvent {
                        midi,
                        duration: duration.unwrap_or(FALLBACK_NOTE_DURATION),
                        simultaneous,
                    }),
                    None => MeasureElement::Unpitched { simultaneous },
                }
            }
        }
        "harmony" => match chord_name(elem)? {
            Some(name) => MeasureElement::Harmony { name },
            None => return Ok(None),
        },
        "forward" => MeasureElement::Forward {
            duration: parse_int(elem, "duration")?
                .map(|d| whole_notes(d, divisions))
                .unwrap_or(0.0),
        },
        "backup" => MeasureElement::Backup {
            duration: parse_int(elem, "duration")?
                .map(|d| whole_notes(d, divisions))
                .unwrap_or(0.0),
        },
        _ => return Ok(None),
    };
    Ok(Some(element))
}

fn read_pitch(note: &Element) -> Result<Option<i32>, TranscodeError> {
    let Some(pitch) = note.child("pitch") else {
        return Ok(None);
    };
    let (Some(step), Some(octave)) = (pitch.child_text("step"), pitch.child_text("octave")) else {
        return Ok(None);
    };
    let octave = octave
        .parse::<i32>()
        .ok()
        .filter(|o| OCTAVE_RANGE.contains(o))
        .ok_or_else(|| invalid_number("octave", octave))?;
    let alter = match pitch.child_text("alter") {
        Some(text) => parse_alter(text)?,
        None => 0,
    };
    let step = step.chars().next().unwrap_or('C');
    Ok(Some(pitch_to_midi(step, octave, alter)))
}

/// Builds a chord symbol such as `F#m7` from a `<harmony>` element.
///
/// Only four qualities carry a suffix; any other `<kind>` yields the bare root.
pub fn chord_name(harmony: &Element) -> Result<Option<String>, TranscodeError> {
    let Some(step) = harmony.child_text("root/root-step") else {
        return Ok(None);
    };
    let mut name = step.to_string();

    if let Some(alter) = harmony.child_text("root/root-alter") {
        match parse_alter(alter)? {
            1 => name.push('#'),
            -1 => name.push('b'),
            _ => {}
        }
    }

    if let Some(kind) = harmony.child_text("kind") {
        name.push_str(quality_suffix(kind));
    }
    Ok(Some(name))
}

fn quality_suffix(kind: &str) -> &'static str {
    match kind {
        "minor" => "m",
        "dominant" => "7",
        "major-seventh" => "maj7",
        "minor-seventh" => "m7",
        _ => "",
    }
}

fn extract_title(root: &Element, fallback: &str) -> String {
    let from_tag = |tag: &str| {
        root.descendants(tag)
            .into_iter()
            .next()
            .and_then(Element::text)
            .map(str::to_string)
    };

    from_tag("work-title")
        .or_else(|| from_tag("movement-title"))
        .or_else(|| {
            root.descendants("credit")
                .into_iter()
                .filter(|credit| credit.child_text("credit-type") == Some("title"))
                .find_map(|credit| credit.child_text("credit-words").map(str::to_string))
        })
        .unwrap_or_else(|| fallback.to_string())
}

fn extract_tempo(root: &Element) -> u32 {
    let from_sound = root
        .descendants("sound")
        .into_iter()
        .filter_map(|sound| sound.attr("tempo"))
        .find_map(parse_bpm);
    let from_metronome = || {
        root.descendants("metronome")
            .into_iter()
            .filter_map(|m| m.child_text("per-minute"))
            .find_map(parse_bpm)
    };
    from_sound.or_else(from_metronome).unwrap_or(DEFAULT_TEMPO)
}

fn parse_bpm(text: &str) -> Option<u32> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|bpm| bpm.is_finite() && *bpm >= 0.0)
        .map(|bpm| bpm as u32)
}

/// Time signature from the first `<attributes><time>` of a measure, if any.
fn extract_time_signature(measure: &Element) -> Option<String> {
    let time = measure.children_named("attributes").find_map(|a| a.child("time"))?;
    let beats = time.child_text("beats")?;
    let beat_type = time.child_text("beat-type")?;
    Some(format!("{beats}/{beat_type}"))
}

fn parse_int(parent: &Element, tag: &str) -> Result<Option<i64>, TranscodeError> {
    match parent.child_text(tag) {
        Some(text) => text
            .parse::<i64>()
            .map(Some)
            .map_err(|_| invalid_number(tag, text)),
        None => Ok(None),
    }
}

/// Alterations are usually integral but the format allows decimals (microtones).
fn parse_alter(text: &str) -> Result<i32, TranscodeError> {
    text.parse::<i32>()
        .or_else(|_| text.parse::<f64>().map(|v| v.round() as i32))
        .ok()
        .filter(|a| ALTER_RANGE.contains(a))
        .ok_or_else(|| invalid_number("alter", text))
}

fn invalid_number(element: &str, value: &str) -> TranscodeError {
    TranscodeError::InvalidNumber {
        element: element.to_string(),
        value: value.to_string(),
    }
}
