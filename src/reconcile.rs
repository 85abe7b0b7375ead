//! Note reconciliation — keep the voice bank in step with the host's
//! "should be sounding" set without redundant attack/release calls.

use std::collections::HashSet;

use log::{debug, warn};

use crate::backend::AudioBackend;
use crate::error::VoiceError;
use crate::note::Note;

/// Commands needed to move from one note set to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteDiff {
    /// Distinct names in `current` but not in `previous`, in `current` order.
    pub attacks: Vec<String>,
    /// Distinct names in `previous` but not in `current`, in `previous` order.
    pub releases: Vec<String>,
}

impl NoteDiff {
    pub fn is_empty(&self) -> bool {
        self.attacks.is_empty() && self.releases.is_empty()
    }
}

/// Stateless diff-and-apply over two note sets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoteReconciler;

impl NoteReconciler {
    pub fn diff(previous: &[Note], current: &[Note]) -> NoteDiff {
        NoteDiff {
            attacks: missing_from(current, previous),
            releases: missing_from(previous, current),
        }
    }

    /// Issue the diff against `bank`: attacks first, then releases.
    ///
    /// Voice errors are logged and returned; they never abort the pass.
    pub fn apply<B: AudioBackend>(
        backend: &mut B,
        bank: &B::Bank,
        diff: &NoteDiff,
    ) -> Vec<VoiceError> {
        let mut errors = Vec::new();

        for note in &diff.attacks {
            if let Err(e) = backend.attack(bank, note) {
                warn!("attack dropped: {e}");
                errors.push(e);
            }
        }

        for note in &diff.releases {
            match backend.release(bank, note) {
                Ok(()) => {}
                Err(e @ VoiceError::UnknownNote { .. }) => {
                    debug!("release ignored: {e}");
                    errors.push(e);
                }
                Err(e) => {
                    warn!("release dropped: {e}");
                    errors.push(e);
                }
            }
        }

        errors
    }

    /// Diff and apply in one step.
    pub fn reconcile<B: AudioBackend>(
        backend: &mut B,
        bank: &B::Bank,
        previous: &[Note],
        current: &[Note],
    ) -> (NoteDiff, Vec<VoiceError>) {
        let diff = Self::diff(previous, current);
        if !diff.is_empty() {
            debug!(
                "reconcile notes: +{:?} -{:?}",
                diff.attacks, diff.releases
            );
        }
        let errors = Self::apply(backend, bank, &diff);
        (diff, errors)
    }
}

/// Distinct names of `from` that do not appear anywhere in `other`.
fn missing_from(from: &[Note], other: &[Note]) -> Vec<String> {
    let present: HashSet<&str> = other.iter().map(|n| n.name.as_str()).collect();
    let mut seen = HashSet::new();
    from.iter()
        .map(|n| n.name.as_str())
        .filter(|name| !present.contains(name) && seen.insert(*name))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SynthOptions, VoiceKind};
    use crate::graph::{Command, GraphBackend};

    fn notes(names: &[&str]) -> Vec<Note> {
        names.iter().map(|n| Note::named(*n)).collect()
    }

    fn strings(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn adds_one_note() {
        let diff = NoteReconciler::diff(&notes(&["C4"]), &notes(&["C4", "E4"]));
        assert_eq!(diff.attacks, strings(&["E4"]));
        assert!(diff.releases.is_empty());
    }

    #[test]
    fn identical_sets_issue_nothing() {
        let set = notes(&["C4", "E4", "G4"]);
        assert!(NoteReconciler::diff(&set, &set).is_empty());
        assert!(NoteReconciler::diff(&[], &[]).is_empty());
    }

    #[test]
    fn empty_previous_attacks_every_distinct_name() {
        let diff = NoteReconciler::diff(&[], &notes(&["C4", "E4", "C4", "G4"]));
        assert_eq!(diff.attacks, strings(&["C4", "E4", "G4"]));
        assert!(diff.releases.is_empty());
    }

    #[test]
    fn empty_current_releases_every_distinct_name() {
        let diff = NoteReconciler::diff(&notes(&["G4", "C4", "G4"]), &[]);
        assert!(diff.attacks.is_empty());
        assert_eq!(diff.releases, strings(&["G4", "C4"]));
    }

    #[test]
    fn mixed_change_partitions_names() {
        let prev = notes(&["C4", "E4", "G4"]);
        let cur = notes(&["E4", "A4", "B4"]);
        let diff = NoteReconciler::diff(&prev, &cur);
        assert_eq!(diff.attacks, strings(&["A4", "B4"]));
        assert_eq!(diff.releases, strings(&["C4", "G4"]));
    }

    #[test]
    fn structured_fields_do_not_count() {
        let prev = vec![Note::parse("C4").unwrap()];
        let cur = notes(&["C4"]);
        assert!(NoteReconciler::diff(&prev, &cur).is_empty());
    }

    #[test]
    fn apply_issues_attacks_then_releases() {
        let mut backend = GraphBackend::new();
        let bank = backend
            .create_voice_bank(4, VoiceKind::Synth, &SynthOptions::default())
            .unwrap();
        NoteReconciler::reconcile(&mut backend, &bank, &[], &notes(&["C4", "E4"]));
        backend.clear_log();

        let (diff, errors) =
            NoteReconciler::reconcile(&mut backend, &bank, &notes(&["C4", "E4"]), &notes(&["E4", "G4"]));
        assert!(errors.is_empty());
        assert_eq!(diff.attacks, strings(&["G4"]));
        assert_eq!(
            backend.log(),
            &[
                Command::Attack { bank, note: "G4".into() },
                Command::Release { bank, note: "C4".into() },
            ]
        );
        assert_eq!(backend.sounding(bank), strings(&["E4", "G4"]));
    }

    #[test]
    fn unknown_release_is_tolerated() {
        let mut backend = GraphBackend::new();
        let bank = backend
            .create_voice_bank(4, VoiceKind::Synth, &SynthOptions::default())
            .unwrap();
        let (diff, errors) = NoteReconciler::reconcile(&mut backend, &bank, &notes(&["D4"]), &[]);
        assert_eq!(diff.releases, strings(&["D4"]));
        assert_eq!(errors, vec![VoiceError::UnknownNote { note: "D4".into() }]);
    }

    #[test]
    fn malformed_name_does_not_stop_the_pass() {
        let mut backend = GraphBackend::new();
        let bank = backend
            .create_voice_bank(4, VoiceKind::Synth, &SynthOptions::default())
            .unwrap();
        let (_, errors) =
            NoteReconciler::reconcile(&mut backend, &bank, &[], &notes(&["nope", "A4"]));
        assert_eq!(errors, vec![VoiceError::InvalidNote { note: "nope".into() }]);
        assert_eq!(backend.sounding(bank), strings(&["A4"]));
    }

    #[test]
    fn huge_octave_is_an_invalid_note() {
        let mut backend = GraphBackend::new();
        let bank = backend
            .create_voice_bank(4, VoiceKind::Synth, &SynthOptions::default())
            .unwrap();
        let (diff, errors) =
            NoteReconciler::reconcile(&mut backend, &bank, &[], &notes(&["C999999999"]));
        assert_eq!(diff.attacks, strings(&["C999999999"]));
        assert_eq!(
            errors,
            vec![VoiceError::InvalidNote {
                note: "C999999999".into()
            }]
        );
        assert!(backend.sounding(bank).is_empty());
    }
}
