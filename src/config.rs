//! Instrument configuration supplied once at creation.
//!
//! Field names follow the host's JSON (camelCase); every field has a
//! default so `{}` is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::routing::ChainPolicy;

/// Voice type each slot of the polyphonic bank is built from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VoiceKind {
    #[default]
    Synth,
    FmSynth,
    AmSynth,
    MonoSynth,
}

impl VoiceKind {
    /// Class name of the voice in the synthesis library.
    pub fn class_name(self) -> &'static str {
        match self {
            VoiceKind::Synth => "Synth",
            VoiceKind::FmSynth => "FMSynth",
            VoiceKind::AmSynth => "AMSynth",
            VoiceKind::MonoSynth => "MonoSynth",
        }
    }
}

/// Oscillator section of the synthesis options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OscillatorOptions {
    /// Waveform name passed through to the library ("sine", "square", ...).
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    /// Harmonic partial amplitudes.
    #[serde(default)]
    pub partials: Vec<f64>,
}

impl Default for OscillatorOptions {
    fn default() -> Self {
        OscillatorOptions {
            kind: None,
            partials: vec![0.0, 2.0, 3.0, 4.0],
        }
    }
}

/// ADSR section, times in seconds, sustain in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeOptions {
    pub attack: Option<f64>,
    pub decay: Option<f64>,
    pub sustain: Option<f64>,
    pub release: Option<f64>,
}

/// Opaque-to-us synthesis options, forwarded to the voice constructor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthOptions {
    #[serde(default)]
    pub oscillator: OscillatorOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope: Option<EnvelopeOptions>,
}

/// Creation-time configuration of an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstrumentConfig {
    /// Number of simultaneous voices (≥ 1).
    pub polyphony: usize,
    pub voice: VoiceKind,
    pub options: SynthOptions,
    /// Pan of the pre-chain stage, -1 (left) to 1 (right).
    pub pan: f64,
    /// Volume of the pre-chain stage in dB.
    pub volume: f64,
    /// How effects-chain changes are detected.
    pub chain_policy: ChainPolicy,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        InstrumentConfig {
            polyphony: 4,
            voice: VoiceKind::Synth,
            options: SynthOptions::default(),
            pan: 1.0,
            volume: 0.0,
            chain_policy: ChainPolicy::Identity,
        }
    }
}

impl InstrumentConfig {
    /// Parse and validate a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: InstrumentConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.polyphony == 0 {
            return Err(ConfigError::InvalidPolyphony(self.polyphony));
        }
        if !self.pan.is_finite() || !(-1.0..=1.0).contains(&self.pan) {
            return Err(ConfigError::InvalidPan(self.pan));
        }
        if !self.volume.is_finite() {
            return Err(ConfigError::InvalidVolume(self.volume));
        }
        Ok(())
    }

    /// Checks for hosts whose chains are plain arrays. Such chains carry no
    /// revision counter, so only identity triggering can ever reroute.
    pub fn validate_for_js_host(&self) -> Result<(), ConfigError> {
        self.validate()?;
        match self.chain_policy {
            ChainPolicy::Identity => Ok(()),
            policy => Err(ConfigError::UnsupportedChainPolicy(policy)),
        }
    }
}
