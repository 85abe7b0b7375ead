pub mod backend;
pub mod config;
pub mod error;
pub mod graph;
pub mod instrument;
pub mod note;
pub mod reconcile;
pub mod routing;
pub mod tone;

use log::warn;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;

use crate::config::InstrumentConfig;
use crate::instrument::{Instrument, InstrumentState, InstrumentUpdate};
use crate::note::Note;
use crate::tone::{Opaque, PolySynth, ToneBackend, ToneNode};

pub use crate::backend::{AudioBackend, InstrumentRegistry};
pub use crate::error::{ConfigError, InstrumentError, RoutingError, VoiceError};
pub use crate::instrument::UpdateReport;
pub use crate::reconcile::{NoteDiff, NoteReconciler};
pub use crate::routing::{ChainCache, ChainPolicy, SignalRouter};

/// The crate version, read from Cargo.toml at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// WASM-exposed: return the songwalker-instrument version string.
#[wasm_bindgen]
pub fn core_version() -> String {
    VERSION.to_string()
}

#[wasm_bindgen]
extern "C" {
    /// JS function receiving the created synth handles, e.g. the track's
    /// `updateInstruments`.
    pub type RegisterCallback;

    #[wasm_bindgen(method, js_name = call)]
    fn call1(this: &RegisterCallback, context: &JsValue, handles: &JsValue);
}

fn js_err(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

/// WASM-exposed instrument: one Tone.js PolySynth driven by note and
/// effects-chain props from the host view.
#[wasm_bindgen]
pub struct WasmInstrument {
    inner: Instrument<ToneBackend>,
    /// Chains seen in the last update, keyed by their JS array.
    chains: ChainCache<JsValue, ToneNode>,
}

#[wasm_bindgen]
impl WasmInstrument {
    /// Create and mount. `config` may be `undefined` for defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config: JsValue, register: &RegisterCallback) -> Result<WasmInstrument, JsValue> {
        let config: InstrumentConfig = if config.is_undefined() || config.is_null() {
            InstrumentConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config)?
        };
        config.validate_for_js_host().map_err(js_err)?;

        let mut registry = |handles: &[PolySynth]| {
            let handles: Vec<Opaque> = handles.iter().map(|h| Opaque(h.clone().into())).collect();
            match serde_wasm_bindgen::to_value(&handles) {
                Ok(array) => register.call1(&JsValue::NULL, &array),
                Err(e) => warn!("could not pass instrument handles to host: {e}"),
            }
        };
        let inner = Instrument::mounted(ToneBackend, config, &mut registry).map_err(js_err)?;

        Ok(WasmInstrument {
            inner,
            chains: ChainCache::new(),
        })
    }

    /// Apply a props change. Notes are arrays of `{ name, ... }`; chains are
    /// arrays of Tone nodes, compared by identity.
    pub fn update(
        &mut self,
        previous_notes: JsValue,
        current_notes: JsValue,
        previous_chain: JsValue,
        current_chain: JsValue,
    ) -> Result<JsValue, JsValue> {
        let previous_notes = notes_from_js(previous_notes)?;
        let current_notes = notes_from_js(current_notes)?;
        let (previous, current) = self
            .chains
            .resolve(&previous_chain, &current_chain, stages_from_js)?;

        let report = self
            .inner
            .update(&InstrumentUpdate {
                previous_notes: &previous_notes,
                current_notes: &current_notes,
                previous_chain: &previous,
                current_chain: &current,
            })
            .map_err(js_err)?;
        serde_wasm_bindgen::to_value(&report).map_err(JsValue::from)
    }

    #[wasm_bindgen(js_name = allNotesOff)]
    pub fn all_notes_off(&mut self) -> Result<(), JsValue> {
        self.inner.all_notes_off().map(drop).map_err(js_err)
    }

    pub fn dispose(&mut self) {
        self.inner.dispose();
        self.chains.clear();
    }

    /// "uninitialized", "mounted", "routed" or "disposed".
    pub fn state(&self) -> String {
        match self.inner.state() {
            InstrumentState::Uninitialized => "uninitialized",
            InstrumentState::Mounted => "mounted",
            InstrumentState::Routed { .. } => "routed",
            InstrumentState::Disposed => "disposed",
        }
        .to_string()
    }
}

/// Effect nodes of a JS chain array; `undefined`/`null` is the empty chain.
fn stages_from_js(js: &JsValue) -> Result<Vec<ToneNode>, JsValue> {
    if js.is_undefined() || js.is_null() {
        return Ok(Vec::new());
    }
    let stages: Vec<Opaque> = serde_wasm_bindgen::from_value(js.clone())?;
    Ok(stages
        .into_iter()
        .map(|s| s.0.unchecked_into::<ToneNode>())
        .collect())
}

fn notes_from_js(js: JsValue) -> Result<Vec<Note>, JsValue> {
    if js.is_undefined() || js.is_null() {
        return Ok(Vec::new());
    }
    serde_wasm_bindgen::from_value(js).map_err(JsValue::from)
}
