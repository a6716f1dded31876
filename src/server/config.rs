//! Server configuration
//!
//! The on-disk form is a TOML document whose tables and keys mirror the
//! classic reflector configuration sections (`[GLOBAL]`,
//! `[VAD_SETTINGS]`, `[USERS]`, `[TALKGROUPS]`). Parsing is split from
//! validation: [`ConfigFile`] is the raw deserialized document,
//! [`ServerConfig`] the checked runtime form.
//!
//! Illegal values either refuse service (a port of 0) or are ignored
//! with a warning when a safe default exists (a malformed
//! `RANDOM_QSY_RANGE`), preferring partial operation.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::protocol::constants::DEFAULT_LISTEN_PORT;
use crate::vad::GateConfig;

/// Raw configuration document
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(rename = "GLOBAL", default)]
    pub global: GlobalSection,
    #[serde(rename = "VAD_SETTINGS", default)]
    pub vad_settings: VadSection,
    /// Callsign to shared secret
    #[serde(rename = "USERS", default)]
    pub users: HashMap<String, String>,
    #[serde(rename = "TALKGROUPS", default)]
    pub talkgroups: TalkgroupSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSection {
    #[serde(rename = "LISTEN_PORT", default = "default_listen_port")]
    pub listen_port: u16,
    /// Seconds of talker silence before auto-deposition; 0 disables
    #[serde(rename = "SQL_TIMEOUT", default)]
    pub sql_timeout: u64,
    /// Seconds the deposed talker is blocked from retaking the slot
    #[serde(rename = "SQL_TIMEOUT_BLOCKTIME", default = "default_blocktime")]
    pub sql_timeout_blocktime: u64,
    #[serde(rename = "TG_FOR_V1_CLIENTS", default = "default_v1_tg")]
    pub tg_for_v1_clients: u32,
    /// `low:count`, the inclusive talkgroup range used for random QSY
    #[serde(rename = "RANDOM_QSY_RANGE", default)]
    pub random_qsy_range: Option<String>,
    #[serde(rename = "HTTP_SRV_PORT", default)]
    pub http_srv_port: Option<u16>,
    #[serde(rename = "COMMAND_PTY", default)]
    pub command_pty: Option<PathBuf>,
}

impl Default for GlobalSection {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            sql_timeout: 0,
            sql_timeout_blocktime: default_blocktime(),
            tg_for_v1_clients: default_v1_tg(),
            random_qsy_range: None,
            http_srv_port: None,
            command_pty: None,
        }
    }
}

fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

fn default_blocktime() -> u64 {
    60
}

fn default_v1_tg() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VadSection {
    #[serde(rename = "IS_VAD_ENABLED", default)]
    pub is_vad_enabled: bool,
    /// Comma-separated list of callsigns subject to gating
    #[serde(rename = "VAD_ENABLED_CALLSIGNS", default)]
    pub vad_enabled_callsigns: String,
    #[serde(rename = "SILERO_MODEL_PATH", default)]
    pub silero_model_path: Option<PathBuf>,
    #[serde(rename = "SAMPLE_RATE", default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(rename = "WINDOW_SIZE_SAMPLES", default = "default_window")]
    pub window_size_samples: usize,
    #[serde(rename = "THRESHOLD", default = "default_threshold")]
    pub threshold: f32,
    #[serde(rename = "PROCESSED_SAMPLE_BUFFER_SIZE", default = "default_buffer")]
    pub processed_sample_buffer_size: usize,
    #[serde(rename = "VAD_GATE_SAMPLE_SIZE", default = "default_gate_size")]
    pub vad_gate_sample_size: usize,
    #[serde(rename = "START_SILENCE_REPLACEMENT_BUFFER_MS", default)]
    pub start_silence_replacement_buffer_ms: u32,
}

impl Default for VadSection {
    fn default() -> Self {
        Self {
            is_vad_enabled: false,
            vad_enabled_callsigns: String::new(),
            silero_model_path: None,
            sample_rate: default_sample_rate(),
            window_size_samples: default_window(),
            threshold: default_threshold(),
            processed_sample_buffer_size: default_buffer(),
            vad_gate_sample_size: default_gate_size(),
            start_silence_replacement_buffer_ms: 0,
        }
    }
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_window() -> usize {
    1536
}

fn default_threshold() -> f32 {
    0.5
}

fn default_buffer() -> usize {
    1536
}

fn default_gate_size() -> usize {
    48000
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TalkgroupSection {
    /// Talkgroups whose activity is hidden from the status endpoint
    #[serde(rename = "RESTRICTED", default)]
    pub restricted: Vec<u32>,
}

/// Voice-gate runtime settings
#[derive(Debug, Clone)]
pub struct VadSettings {
    pub callsigns: HashSet<String>,
    pub model_path: PathBuf,
    pub threshold: f32,
    pub gate: GateConfig,
}

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Stream and datagram port
    pub listen_port: u16,
    pub sql_timeout: Option<Duration>,
    pub sql_timeout_blocktime: Duration,
    pub tg_for_v1_clients: u32,
    /// Inclusive talkgroup range for random QSY
    pub random_qsy_range: Option<(u32, u32)>,
    pub http_srv_port: Option<u16>,
    pub command_socket: Option<PathBuf>,
    /// Disconnect a stream that stays silent this long
    pub idle_timeout: Duration,
    pub users: HashMap<String, String>,
    pub restricted_tgs: HashSet<u32>,
    pub vad: Option<VadSettings>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            sql_timeout: None,
            sql_timeout_blocktime: Duration::from_secs(default_blocktime()),
            tg_for_v1_clients: default_v1_tg(),
            random_qsy_range: None,
            http_srv_port: None,
            command_socket: None,
            idle_timeout: Duration::from_secs(300),
            users: HashMap::new(),
            restricted_tgs: HashSet::new(),
            vad: None,
        }
    }
}

impl ServerConfig {
    /// Read and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&raw)
            .map_err(|e| Error::ConfigInvalid(format!("{}: {e}", path.display())))?;
        Self::from_file(file)
    }

    pub fn from_file(file: ConfigFile) -> Result<Self> {
        if file.global.listen_port == 0 {
            return Err(Error::ConfigInvalid("LISTEN_PORT must not be 0".into()));
        }

        let random_qsy_range = match file.global.random_qsy_range.as_deref() {
            None => None,
            Some(spec) => match parse_qsy_range(spec) {
                Some(range) => Some(range),
                None => {
                    tracing::warn!(spec, "illegal RANDOM_QSY_RANGE, ignored");
                    None
                }
            },
        };

        let vad = if file.vad_settings.is_vad_enabled {
            let section = &file.vad_settings;
            let model_path = section.silero_model_path.clone().ok_or_else(|| {
                Error::ConfigInvalid("IS_VAD_ENABLED requires SILERO_MODEL_PATH".into())
            })?;
            if section.window_size_samples == 0 || section.processed_sample_buffer_size == 0 {
                return Err(Error::ConfigInvalid(
                    "VAD window and buffer sizes must not be 0".into(),
                ));
            }
            Some(VadSettings {
                callsigns: section
                    .vad_enabled_callsigns
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect(),
                model_path,
                threshold: section.threshold,
                gate: GateConfig {
                    sample_rate: section.sample_rate,
                    window_size_samples: section.window_size_samples,
                    buffer_size: section.processed_sample_buffer_size,
                    gate_sample_size: section.vad_gate_sample_size,
                    start_silence_ms: section.start_silence_replacement_buffer_ms,
                },
            })
        } else {
            None
        };

        Ok(Self {
            listen_port: file.global.listen_port,
            sql_timeout: (file.global.sql_timeout > 0)
                .then(|| Duration::from_secs(file.global.sql_timeout)),
            sql_timeout_blocktime: Duration::from_secs(file.global.sql_timeout_blocktime),
            tg_for_v1_clients: file.global.tg_for_v1_clients,
            random_qsy_range,
            http_srv_port: file.global.http_srv_port,
            command_socket: file.global.command_pty,
            idle_timeout: Duration::from_secs(300),
            users: file.users,
            restricted_tgs: file.talkgroups.restricted.into_iter().collect(),
            vad,
        })
    }
}

/// Parse `low:count` into an inclusive `(low, high)` range
fn parse_qsy_range(spec: &str) -> Option<(u32, u32)> {
    let (lo, count) = spec.split_once(':')?;
    let lo: u32 = lo.trim().parse().ok()?;
    let count: u32 = count.trim().parse().ok()?;
    if lo < 1 || count < 1 {
        return None;
    }
    let hi = lo.checked_add(count - 1)?;
    Some((lo, hi))
}
