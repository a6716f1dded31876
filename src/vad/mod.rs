//! Voice-activity gating for carrier-without-speech rejection

pub mod gate;
pub mod silero;

pub use gate::{GateBank, GateConfig, GateVerdict, VoiceClassifier};
pub use silero::SileroVad;
