use std::fmt;

use serde::Serialize;

use crate::routing::ChainPolicy;

/// Top-level error returned by instrument lifecycle operations.
#[derive(Debug)]
pub enum InstrumentError {
    Config(ConfigError),
    Routing(RoutingError),
    NotMounted,
    AlreadyMounted,
    Disposed,
}

/// A note command the voice bank could not honour.
///
/// Voice errors never fail an update: the reconciler logs them and carries on.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum VoiceError {
    /// Release of a note that has no sounding voice.
    UnknownNote { note: String },
    /// Note name that does not parse as pitch + octave.
    InvalidNote { note: String },
    /// The synthesis layer rejected the command.
    Backend { note: String, reason: String },
}

/// Output routing could not be (re)built.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingError {
    /// Stage at `index` of the new chain is not a live node.
    InvalidStage { index: usize },
    ConnectFailed { reason: String },
    VoiceBank { reason: String },
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPolyphony(usize),
    InvalidPan(f64),
    InvalidVolume(f64),
    /// Policy the host cannot drive, e.g. `revision` for plain JS arrays.
    UnsupportedChainPolicy(ChainPolicy),
    Json(serde_json::Error),
}

impl VoiceError {
    /// Name of the note the failed command targeted.
    pub fn note(&self) -> &str {
        match self {
            VoiceError::UnknownNote { note }
            | VoiceError::InvalidNote { note }
            | VoiceError::Backend { note, .. } => note,
        }
    }
}

impl fmt::Display for InstrumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentError::Config(e) => write!(f, "Config error: {e}"),
            InstrumentError::Routing(e) => write!(f, "Routing error: {e}"),
            InstrumentError::NotMounted => write!(f, "Instrument is not mounted"),
            InstrumentError::AlreadyMounted => write!(f, "Instrument is already mounted"),
            InstrumentError::Disposed => write!(f, "Instrument has been disposed"),
        }
    }
}

impl std::error::Error for InstrumentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InstrumentError::Config(e) => Some(e),
            InstrumentError::Routing(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceError::UnknownNote { note } => write!(f, "No sounding voice for note '{note}'"),
            VoiceError::InvalidNote { note } => write!(f, "Invalid note name '{note}'"),
            VoiceError::Backend { note, reason } => {
                write!(f, "Voice command for '{note}' failed: {reason}")
            }
        }
    }
}

impl std::error::Error for VoiceError {}

impl fmt::Display for RoutingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingError::InvalidStage { index } => {
                write!(f, "Effect stage {index} is not a live audio node")
            }
            RoutingError::ConnectFailed { reason } => write!(f, "Connect failed: {reason}"),
            RoutingError::VoiceBank { reason } => {
                write!(f, "Could not create voice bank: {reason}")
            }
        }
    }
}

impl std::error::Error for RoutingError {}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPolyphony(n) => write!(f, "Polyphony must be at least 1, got {n}"),
            ConfigError::InvalidPan(p) => write!(f, "Pan must be within [-1, 1], got {p}"),
            ConfigError::InvalidVolume(v) => write!(f, "Volume must be a finite dB value, got {v}"),
            ConfigError::UnsupportedChainPolicy(p) => {
                write!(f, "Chain policy {p:?} is not supported by this host")
            }
            ConfigError::Json(e) => write!(f, "Invalid instrument JSON: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for InstrumentError {
    fn from(e: ConfigError) -> Self {
        InstrumentError::Config(e)
    }
}

impl From<RoutingError> for InstrumentError {
    fn from(e: RoutingError) -> Self {
        InstrumentError::Routing(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Json(e)
    }
}
