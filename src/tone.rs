//! Tone.js bridge — [`AudioBackend`] over the browser's `Tone` global.
//!
//! Every library call that can throw is imported with `catch` so a JS
//! exception becomes a `VoiceError` / `RoutingError` instead of unwinding
//! through the host.

use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use crate::backend::AudioBackend;
use crate::config::{SynthOptions, VoiceKind};
use crate::error::{RoutingError, VoiceError};

#[wasm_bindgen]
extern "C" {
    /// Any Tone.js audio node.
    #[derive(Debug, Clone, PartialEq)]
    pub type ToneNode;

    #[wasm_bindgen(method, catch)]
    fn connect(this: &ToneNode, destination: &ToneNode) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method)]
    fn disconnect(this: &ToneNode);

    #[wasm_bindgen(method)]
    fn dispose(this: &ToneNode);

    #[wasm_bindgen(thread_local_v2, js_namespace = Tone, js_name = Master)]
    static MASTER: ToneNode;

    #[wasm_bindgen(thread_local_v2, js_namespace = Tone, js_name = Synth)]
    static SYNTH_CLASS: JsValue;

    #[wasm_bindgen(thread_local_v2, js_namespace = Tone, js_name = FMSynth)]
    static FM_SYNTH_CLASS: JsValue;

    #[wasm_bindgen(thread_local_v2, js_namespace = Tone, js_name = AMSynth)]
    static AM_SYNTH_CLASS: JsValue;

    #[wasm_bindgen(thread_local_v2, js_namespace = Tone, js_name = MonoSynth)]
    static MONO_SYNTH_CLASS: JsValue;
}

#[wasm_bindgen]
extern "C" {
    /// `Tone.PolySynth`: a bank of voices sharing one output.
    #[wasm_bindgen(extends = ToneNode, js_namespace = Tone)]
    #[derive(Debug, Clone, PartialEq)]
    pub type PolySynth;

    #[wasm_bindgen(constructor, js_namespace = Tone, catch)]
    fn new(polyphony: u32, voice: &JsValue, options: &JsValue) -> Result<PolySynth, JsValue>;

    #[wasm_bindgen(method, js_name = triggerAttack, catch)]
    fn trigger_attack(this: &PolySynth, note: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(method, js_name = triggerRelease, catch)]
    fn trigger_release(this: &PolySynth, note: &str) -> Result<JsValue, JsValue>;
}

#[wasm_bindgen]
extern "C" {
    /// `Tone.PanVol`: the pan/volume stage heading every chain.
    #[wasm_bindgen(extends = ToneNode, js_namespace = Tone)]
    #[derive(Debug, Clone, PartialEq)]
    pub type PanVol;

    #[wasm_bindgen(constructor, js_namespace = Tone, catch)]
    fn new(pan: f64, volume: f64) -> Result<PanVol, JsValue>;
}

/// A JS value carried through serde untouched (effect nodes, synth handles).
#[derive(Serialize, Deserialize)]
pub(crate) struct Opaque(#[serde(with = "serde_wasm_bindgen::preserve")] pub JsValue);

fn voice_class(voice: VoiceKind) -> JsValue {
    match voice {
        VoiceKind::Synth => SYNTH_CLASS.with(JsValue::clone),
        VoiceKind::FmSynth => FM_SYNTH_CLASS.with(JsValue::clone),
        VoiceKind::AmSynth => AM_SYNTH_CLASS.with(JsValue::clone),
        VoiceKind::MonoSynth => MONO_SYNTH_CLASS.with(JsValue::clone),
    }
}

/// Readable text for a thrown JS value.
fn describe(err: &JsValue) -> String {
    err.as_string().unwrap_or_else(|| format!("{err:?}"))
}

/// Backend driving Tone.js objects; stateless, the library owns the graph.
#[derive(Debug, Default)]
pub struct ToneBackend;

impl AudioBackend for ToneBackend {
    type Bank = PolySynth;
    type Stage = ToneNode;

    fn create_voice_bank(
        &mut self,
        polyphony: usize,
        voice: VoiceKind,
        options: &SynthOptions,
    ) -> Result<PolySynth, RoutingError> {
        let options = serde_wasm_bindgen::to_value(options).map_err(|e| RoutingError::VoiceBank {
            reason: e.to_string(),
        })?;
        PolySynth::new(polyphony as u32, &voice_class(voice), &options)
            .map_err(|e| RoutingError::VoiceBank { reason: describe(&e) })
    }

    fn attack(&mut self, bank: &PolySynth, note: &str) -> Result<(), VoiceError> {
        bank.trigger_attack(note)
            .map(drop)
            .map_err(|e| VoiceError::Backend {
                note: note.to_string(),
                reason: describe(&e),
            })
    }

    fn release(&mut self, bank: &PolySynth, note: &str) -> Result<(), VoiceError> {
        bank.trigger_release(note)
            .map(drop)
            .map_err(|e| VoiceError::Backend {
                note: note.to_string(),
                reason: describe(&e),
            })
    }

    fn disconnect_all(&mut self, bank: &PolySynth) {
        bank.disconnect();
    }

    fn create_pre_stage(&mut self, pan: f64, volume: f64) -> Result<ToneNode, RoutingError> {
        PanVol::new(pan, volume)
            .map(ToneNode::from)
            .map_err(|e| RoutingError::ConnectFailed { reason: describe(&e) })
    }

    fn master(&self) -> ToneNode {
        MASTER.with(ToneNode::clone)
    }

    fn validate_stage(&self, stage: &ToneNode) -> bool {
        !stage.is_undefined() && !stage.is_null()
    }

    fn connect_serial(
        &mut self,
        bank: &PolySynth,
        stages: &[ToneNode],
        sink: &ToneNode,
    ) -> Result<(), RoutingError> {
        // Tone's `connect` adds a fan-out edge, so each hop is cut loose
        // from its old outputs first.
        let mut from: &ToneNode = bank;
        for next in stages.iter().chain(std::iter::once(sink)) {
            from.disconnect();
            from.connect(next)
                .map_err(|e| RoutingError::ConnectFailed { reason: describe(&e) })?;
            from = next;
        }
        Ok(())
    }

    fn dispose_stage(&mut self, stage: ToneNode) {
        stage.dispose();
    }

    fn dispose_bank(&mut self, bank: PolySynth) {
        bank.dispose();
    }
}
