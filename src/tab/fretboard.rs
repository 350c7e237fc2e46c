//! Pitch arithmetic and the lowest-fret voicing heuristic.

/// Open-string MIDI pitches in standard tuning, indexed by string number - 1.
/// String 1 is the high E (E4), string 6 the low E (E2).
pub const STANDARD_TUNING: [u8; 6] = [64, 59, 55, 50, 45, 40];

pub const STRING_COUNT: u8 = 6;

pub const MAX_FRET: u8 = 24;

/// Semitone offset of a natural step above C.
fn step_semitone(step: char) -> Option<i32> {
    match step.to_ascii_uppercase() {
        'C' => Some(0),
        'D' => Some(2),
        'E' => Some(4),
        'F' => Some(5),
        'G' => Some(7),
        'A' => Some(9),
        'B' => Some(11),
        _ => None,
    }
}

/// Converts a written pitch to a MIDI note number.
///
/// Uses `12 * octave` rather than `12 * (octave + 1)`: the recognition engine
/// labels octaves one higher than printed, and this cancels that offset.
/// Unknown steps count as C.
pub fn pitch_to_midi(step: char, octave: i32, alter: i32) -> i32 {
    12 * octave + step_semitone(step).unwrap_or(0) + alter
}

/// A fretboard coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub string: u8,
    pub fret: u8,
}

/// Finds the lowest-fret position for `midi` among strings not in `used`.
///
/// Ties go to the lower-numbered (higher-pitched) string.
pub fn lowest_position(midi: i32, used: &[bool; STRING_COUNT as usize]) -> Option<Position> {
    let mut best: Option<Position> = None;
    for (index, &open) in STANDARD_TUNING.iter().enumerate() {
        if used[index] {
            continue;
        }
        let fret = midi - i32::from(open);
        if !(0..=i32::from(MAX_FRET)).contains(&fret) {
            continue;
        }
        let fret = fret as u8;
        if best.is_none_or(|b| fret < b.fret) {
            best = Some(Position {
                string: index as u8 + 1,
                fret,
            });
        }
    }
    best
}

/// Voices a group of simultaneous notes.
///
/// Notes are taken highest first, each claiming the lowest available fret on
/// a string not already claimed in this group. Notes that fit nowhere are
/// dropped. The returned pairs keep that highest-first order.
pub fn assign_chord(midi_notes: &[i32]) -> Vec<(i32, Position)> {
    let mut sorted = midi_notes.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));

    let mut used = [false; STRING_COUNT as usize];
    let mut assigned = Vec::with_capacity(sorted.len());
    for midi in sorted {
        if let Some(position) = lowest_position(midi, &used) {
            used[usize::from(position.string - 1)] = true;
            assigned.push((midi, position));
        }
    }
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pitch_to_midi_uses_unshifted_octave() {
        assert_eq!(pitch_to_midi('C', 4, 0), 48);
        assert_eq!(pitch_to_midi('E', 5, 0), 64);
        assert_eq!(pitch_to_midi('F', 4, 1), 54);
        assert_eq!(pitch_to_midi('b', 3, -1), 46);
    }

    #[test]
    fn pitch_to_midi_is_monotonic_in_octave() {
        for step in ['C', 'D', 'E', 'F', 'G', 'A', 'B'] {
            for alter in -1..=1 {
                let mut previous = pitch_to_midi(step, 0, alter);
                for octave in 1..9 {
                    let next = pitch_to_midi(step, octave, alter);
                    assert_eq!(next - previous, 12);
                    assert_eq!(next, pitch_to_midi(step, octave, alter));
                    previous = next;
                }
            }
        }
    }

    #[test]
    fn single_note_takes_lowest_fret() {
        let free = [false; 6];
        // E4 is open on string 1.
        assert_eq!(
            lowest_position(64, &free),
            Some(Position { string: 1, fret: 0 })
        );
        // A3 (57): string 3 fret 2 beats string 4 fret 7.
        assert_eq!(
            lowest_position(57, &free),
            Some(Position { string: 3, fret: 2 })
        );
    }

    #[test]
    fn out_of_range_notes_have_no_position() {
        let free = [false; 6];
        assert_eq!(lowest_position(39, &free), None);
        assert_eq!(lowest_position(64 + 25, &free), None);
    }

    #[test]
    fn chord_never_reuses_a_string() {
        let assigned = assign_chord(&[64, 64, 64, 64, 64, 64, 64]);
        let mut strings: Vec<u8> = assigned.iter().map(|(_, p)| p.string).collect();
        strings.sort_unstable();
        strings.dedup();
        assert_eq!(strings.len(), assigned.len());
        assert!(assigned.iter().all(|(_, p)| p.fret <= MAX_FRET));
    }

    #[test]
    fn chord_puts_highest_note_first_on_best_string() {
        // Open E major shape, written pitches under the unshifted mapping.
        let assigned = assign_chord(&[40, 47, 52, 56, 59, 64]);
        let first = assigned[0];
        assert_eq!(first.0, 64);
        assert_eq!(first.1, Position { string: 1, fret: 0 });
        assert_eq!(assigned.len(), 6);
    }

    #[test]
    fn chord_drops_notes_with_no_remaining_string() {
        // Two low E2s: only string 6 can sound E2.
        let assigned = assign_chord(&[40, 40]);
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].1, Position { string: 6, fret: 0 });
    }

    #[test]
    fn chord_fret_is_minimal_among_remaining_strings() {
        let assigned = assign_chord(&[59, 59]);
        assert_eq!(assigned[0].1, Position { string: 2, fret: 0 });
        assert_eq!(assigned[1].1, Position { string: 3, fret: 4 });
    }
}
