//! The narrow seam between the instrument and the audio library.
//!
//! The instrument never touches library objects directly; it only calls
//! through [`AudioBackend`]. Hosts plug in the Tone.js bridge in the
//! browser or the in-memory [`GraphBackend`](crate::graph::GraphBackend)
//! natively and in tests.

use crate::config::{SynthOptions, VoiceKind};
use crate::error::{RoutingError, VoiceError};

/// Operations the instrument needs from a synthesis / audio-graph library.
pub trait AudioBackend {
    /// Handle to a polyphonic voice bank.
    type Bank: Clone;
    /// Handle to a routable node (pre-chain stage, effect, master).
    type Stage: Clone;

    fn create_voice_bank(
        &mut self,
        polyphony: usize,
        voice: VoiceKind,
        options: &SynthOptions,
    ) -> Result<Self::Bank, RoutingError>;

    fn attack(&mut self, bank: &Self::Bank, note: &str) -> Result<(), VoiceError>;

    fn release(&mut self, bank: &Self::Bank, note: &str) -> Result<(), VoiceError>;

    /// Drop every outgoing connection of the bank.
    fn disconnect_all(&mut self, bank: &Self::Bank);

    /// Build the pan/volume stage that heads every chain.
    fn create_pre_stage(&mut self, pan: f64, volume: f64) -> Result<Self::Stage, RoutingError>;

    /// The master output sink.
    fn master(&self) -> Self::Stage;

    /// Check that a stage handed in by the host is a live node.
    fn validate_stage(&self, stage: &Self::Stage) -> bool;

    /// Connect `bank → stages[0] → … → sink`. Afterwards every stage feeds
    /// only its successor: outputs left over from an earlier route are
    /// dropped, so reordering a chain cannot leave a feedback loop.
    fn connect_serial(
        &mut self,
        bank: &Self::Bank,
        stages: &[Self::Stage],
        sink: &Self::Stage,
    ) -> Result<(), RoutingError>;

    fn dispose_stage(&mut self, stage: Self::Stage);

    fn dispose_bank(&mut self, bank: Self::Bank);
}

/// Receiver of the handles created at mount, e.g. the owning track's mixer.
pub trait InstrumentRegistry<H> {
    fn register(&mut self, handles: &[H]);
}

impl<H, F> InstrumentRegistry<H> for F
where
    F: FnMut(&[H]),
{
    fn register(&mut self, handles: &[H]) {
        self(handles)
    }
}
