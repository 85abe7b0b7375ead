//! Instrument — one polyphonic voice bank mounted in a track.
//!
//! Lifecycle: `Uninitialized → Mounted → Routed → … → Disposed`.
//! The host drives it with one [`update`](Instrument::update) per property
//! change; each update is processed completely before the next.

use log::{debug, info};
use serde::Serialize;

use crate::backend::{AudioBackend, InstrumentRegistry};
use crate::config::InstrumentConfig;
use crate::error::{InstrumentError, VoiceError};
use crate::note::Note;
use crate::reconcile::NoteReconciler;
use crate::routing::{EffectsChain, Route, SignalRouter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentState {
    Uninitialized,
    /// Connected straight to master (empty chain).
    Mounted,
    /// Connected through the pre stage and `stages` effect stages.
    Routed { stages: usize },
    Disposed,
}

/// Property change delivered by the host.
pub struct InstrumentUpdate<'a, S> {
    pub previous_notes: &'a [Note],
    pub current_notes: &'a [Note],
    pub previous_chain: &'a EffectsChain<S>,
    pub current_chain: &'a EffectsChain<S>,
}

/// What an update did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReport {
    pub attacks: Vec<String>,
    pub releases: Vec<String>,
    pub rebuilt: bool,
    /// Note commands the bank refused; logged, never fatal.
    pub voice_errors: Vec<VoiceError>,
}

pub struct Instrument<B: AudioBackend> {
    backend: B,
    config: InstrumentConfig,
    bank: Option<B::Bank>,
    router: SignalRouter<B::Stage>,
    /// Names believed to be sounding, in attack order.
    sounding: Vec<String>,
    state: InstrumentState,
}

impl<B: AudioBackend> Instrument<B> {
    pub fn new(backend: B, config: InstrumentConfig) -> Self {
        let router = SignalRouter::new(config.chain_policy, config.pan, config.volume);
        Instrument {
            backend,
            config,
            bank: None,
            router,
            sounding: Vec::new(),
            state: InstrumentState::Uninitialized,
        }
    }

    /// Create and mount in one step.
    pub fn mounted<R>(backend: B, config: InstrumentConfig, registry: &mut R) -> Result<Self, InstrumentError>
    where
        R: InstrumentRegistry<B::Bank>,
    {
        let mut instrument = Self::new(backend, config);
        instrument.mount(registry)?;
        Ok(instrument)
    }

    pub fn state(&self) -> InstrumentState {
        self.state
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn bank(&self) -> Option<&B::Bank> {
        self.bank.as_ref()
    }

    pub fn route(&self) -> &Route<B::Stage> {
        self.router.route()
    }

    /// Notes the instrument has attacked and not yet released.
    pub fn sounding(&self) -> &[String] {
        &self.sounding
    }

    /// Build the voice bank, connect it to master and hand it to `registry`.
    pub fn mount<R>(&mut self, registry: &mut R) -> Result<(), InstrumentError>
    where
        R: InstrumentRegistry<B::Bank>,
    {
        match self.state {
            InstrumentState::Uninitialized => {}
            InstrumentState::Disposed => return Err(InstrumentError::Disposed),
            _ => return Err(InstrumentError::AlreadyMounted),
        }
        self.config.validate()?;

        let bank = self.backend.create_voice_bank(
            self.config.polyphony,
            self.config.voice,
            &self.config.options,
        )?;
        if let Err(e) = self.router.connect_direct(&mut self.backend, &bank) {
            self.backend.dispose_bank(bank);
            return Err(e.into());
        }

        info!(
            "instrument mounted: {} x {} voice(s)",
            self.config.polyphony,
            self.config.voice.class_name()
        );
        registry.register(std::slice::from_ref(&bank));
        self.bank = Some(bank);
        self.state = InstrumentState::Mounted;
        Ok(())
    }

    /// Apply one property change: reroute if the chain changed, then
    /// attack and release notes.
    ///
    /// A routing failure fails the update before any note is touched and
    /// leaves the previous routing in place.
    pub fn update(&mut self, update: &InstrumentUpdate<'_, B::Stage>) -> Result<UpdateReport, InstrumentError> {
        let bank = self.live_bank()?.clone();

        let rebuilt = self.router.update(
            &mut self.backend,
            &bank,
            update.previous_chain,
            update.current_chain,
        )?;
        if rebuilt {
            self.state = InstrumentState::Routed {
                stages: self.router.route().stages().len(),
            };
        }

        let (diff, voice_errors) = NoteReconciler::reconcile(
            &mut self.backend,
            &bank,
            update.previous_notes,
            update.current_notes,
        );
        self.track_sounding(&diff.attacks, &diff.releases, &voice_errors);

        Ok(UpdateReport {
            attacks: diff.attacks,
            releases: diff.releases,
            rebuilt,
            voice_errors,
        })
    }

    /// Release everything the instrument believes is sounding.
    pub fn all_notes_off(&mut self) -> Result<Vec<VoiceError>, InstrumentError> {
        let bank = self.live_bank()?.clone();
        Ok(self.release_sounding(&bank))
    }

    /// Release notes, disconnect and free the voice bank. Safe to call
    /// more than once; also runs on drop.
    pub fn dispose(&mut self) {
        if self.state == InstrumentState::Disposed {
            return;
        }
        if let Some(bank) = self.bank.take() {
            self.release_sounding(&bank);
            self.router.teardown(&mut self.backend, &bank);
            self.backend.dispose_bank(bank);
            info!("instrument disposed");
        }
        self.state = InstrumentState::Disposed;
    }

    fn live_bank(&self) -> Result<&B::Bank, InstrumentError> {
        match (self.state, self.bank.as_ref()) {
            (InstrumentState::Disposed, _) => Err(InstrumentError::Disposed),
            (_, Some(bank)) => Ok(bank),
            (_, None) => Err(InstrumentError::NotMounted),
        }
    }

    fn release_sounding(&mut self, bank: &B::Bank) -> Vec<VoiceError> {
        let mut errors = Vec::new();
        for note in std::mem::take(&mut self.sounding) {
            if let Err(e) = self.backend.release(bank, &note) {
                debug!("release on teardown ignored: {e}");
                errors.push(e);
            }
        }
        errors
    }

    fn track_sounding(&mut self, attacks: &[String], releases: &[String], errors: &[VoiceError]) {
        self.sounding.retain(|n| !releases.contains(n));
        for note in attacks {
            let refused = errors
                .iter()
                .any(|e| !matches!(e, VoiceError::UnknownNote { .. }) && e.note() == note.as_str());
            if !refused && !self.sounding.contains(note) {
                self.sounding.push(note.clone());
            }
        }
    }
}

impl<B: AudioBackend> Drop for Instrument<B> {
    fn drop(&mut self) {
        self.dispose();
    }
}
