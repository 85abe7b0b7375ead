//! Note — the unit the reconciler diffs.
//!
//! A note is identified by its name (`"C4"`, `"F#3"`, `"Bb5"`). The
//! structured fields are optional decoration supplied by the host; the
//! reconciler only ever compares names.

use serde::{Deserialize, Serialize};

/// A note currently held by the host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Note {
    /// Pitch + octave, e.g. "C4". Identity for reconciliation.
    pub name: String,
    /// Pitch class letter, e.g. "C".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub octave: Option<i32>,
    /// "#" or "b".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accidental: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub midi: Option<i32>,
}

/// Pitch class, accidental and octave pulled out of a note name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteParts {
    pub pitch: char,
    pub accidental: Option<char>,
    pub octave: i32,
}

impl Note {
    /// A note carrying only its name.
    pub fn named(name: impl Into<String>) -> Self {
        Note {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Build a note from its name, filling the structured fields.
    /// Returns `None` if the name is not pitch + octave.
    pub fn parse(name: &str) -> Option<Self> {
        let parts = parse_note_name(name)?;
        Some(Note {
            name: name.to_string(),
            pitch: Some(parts.pitch.to_string()),
            octave: Some(parts.octave),
            accidental: parts.accidental.map(|a| a.to_string()),
            midi: Some(parts.midi()),
        })
    }

    /// MIDI number: the explicit `midi` field, else derived from the name.
    pub fn midi_number(&self) -> Option<i32> {
        self.midi.or_else(|| note_to_midi(&self.name))
    }
}

/// Notes compare by name only; the structured fields are ignored.
impl PartialEq for Note {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Note {}

impl NoteParts {
    /// MIDI note number (C4 = 60).
    pub fn midi(&self) -> i32 {
        let base = match self.pitch {
            'C' => 0,
            'D' => 2,
            'E' => 4,
            'F' => 5,
            'G' => 7,
            'A' => 9,
            _ => 11,
        };
        let shift = match self.accidental {
            Some('#') => 1,
            Some('b') => -1,
            _ => 0,
        };
        (self.octave + 1) * 12 + base + shift
    }
}

/// Lowest and highest octave a note name may carry (MIDI range).
const OCTAVES: std::ops::RangeInclusive<i32> = -1..=9;

/// Split a note name ("C4", "F#3", "Bb5", "C-1") into its parts.
pub fn parse_note_name(name: &str) -> Option<NoteParts> {
    let mut chars = name.chars();
    let pitch = chars.next()?;
    if !matches!(pitch, 'A'..='G') {
        return None;
    }

    let rest = chars.as_str();
    let (accidental, octave_str) = match rest.chars().next() {
        Some(c @ ('#' | 'b')) => (Some(c), &rest[1..]),
        _ => (None, rest),
    };

    let octave: i32 = octave_str.parse().ok()?;
    if !OCTAVES.contains(&octave) {
        return None;
    }
    Some(NoteParts {
        pitch,
        accidental,
        octave,
    })
}

/// Parse a note name into a MIDI note number.
pub fn note_to_midi(name: &str) -> Option<i32> {
    parse_note_name(name).map(|p| p.midi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_to_midi_basic() {
        assert_eq!(note_to_midi("A4"), Some(69));
        assert_eq!(note_to_midi("C4"), Some(60));
        assert_eq!(note_to_midi("C0"), Some(12));
        assert_eq!(note_to_midi("C-1"), Some(0));
    }

    #[test]
    fn accidentals_are_enharmonic() {
        assert_eq!(note_to_midi("F#4"), note_to_midi("Gb4"));
        assert_eq!(note_to_midi("Bb3"), Some(58));
    }

    #[test]
    fn rejects_malformed_names() {
        assert_eq!(note_to_midi(""), None);
        assert_eq!(note_to_midi("H4"), None);
        assert_eq!(note_to_midi("C"), None);
        assert_eq!(note_to_midi("c4"), None);
        assert_eq!(note_to_midi("C#x"), None);
    }

    #[test]
    fn rejects_octaves_outside_midi_range() {
        assert_eq!(note_to_midi("C999999999"), None);
        assert_eq!(note_to_midi("C-999999999"), None);
        assert_eq!(note_to_midi("C10"), None);
        assert_eq!(note_to_midi("C-2"), None);
        assert_eq!(note_to_midi("G9"), Some(127));
        assert!(Note::parse("B#999999999").is_none());
    }

    #[test]
    fn parse_fills_structured_fields() {
        let n = Note::parse("Eb5").unwrap();
        assert_eq!(n.pitch.as_deref(), Some("E"));
        assert_eq!(n.accidental.as_deref(), Some("b"));
        assert_eq!(n.octave, Some(5));
        assert_eq!(n.midi, Some(75));
    }

    #[test]
    fn equality_is_by_name_only() {
        let mut a = Note::parse("C4").unwrap();
        let b = Note::named("C4");
        assert_eq!(a, b);
        a.midi = Some(0);
        assert_eq!(a, b, "structured fields must not affect equality");
        assert_ne!(a, Note::named("C5"));
    }

    #[test]
    fn explicit_midi_wins() {
        let mut n = Note::named("C4");
        assert_eq!(n.midi_number(), Some(60));
        n.midi = Some(61);
        assert_eq!(n.midi_number(), Some(61));
    }

    #[test]
    fn deserializes_host_shape() {
        let notes: Vec<Note> =
            serde_json::from_str(r#"[{"name":"C4"},{"name":"E4","pitch":"E","octave":4,"midi":64}]"#)
                .unwrap();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[1].midi, Some(64));
        assert!(notes[0].pitch.is_none());
    }
}
