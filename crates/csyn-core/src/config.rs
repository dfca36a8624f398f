//! Runtime configuration, deserializable from the config file the binary
//! loads at startup and overridable by a handful of CLI flags.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::feature::FeatureSubset;

fn default_history_size() -> usize {
    10
}
fn default_mfcc_count() -> usize {
    13
}
fn default_true() -> bool {
    true
}
fn default_bus() -> i32 {
    0
}
fn default_input_bus() -> i32 {
    8
}
fn default_channel_count() -> u32 {
    8
}
fn default_pitch_min() -> f64 {
    60.0
}
fn default_pitch_max() -> f64 {
    3000.0
}
fn default_silence_threshold_db() -> f64 {
    -60.0
}
fn default_reverb_mix() -> f64 {
    0.1
}
fn default_server_host() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    57110
}

/// Effects documented in SPEC_FULL.md §6.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub analysis_path: PathBuf,

    #[serde(default = "default_history_size")]
    pub history_size: usize,

    #[serde(default = "default_mfcc_count")]
    pub mfcc_count: usize,

    #[serde(default = "default_true")]
    pub use_mfcc: bool,
    #[serde(default = "default_true")]
    pub use_pitch: bool,
    #[serde(default = "default_true")]
    pub use_spectral: bool,

    #[serde(default = "default_pitch_min")]
    pub pitch_detection_min_frequency: f64,
    #[serde(default = "default_pitch_max")]
    pub pitch_detection_max_frequency: f64,

    /// Unused at runtime; retained for the offline pipeline's benefit.
    #[serde(default = "default_silence_threshold_db")]
    pub silence_threshold_db: f64,

    #[serde(default = "default_input_bus")]
    pub input_bus: i32,
    #[serde(default = "default_bus")]
    pub output_bus: i32,
    #[serde(default = "default_channel_count")]
    pub input_count: u32,
    #[serde(default = "default_channel_count")]
    pub output_count: u32,
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,

    /// Soft cap on concurrent voices. 0 means unbounded.
    #[serde(default)]
    pub polyphony: usize,

    #[serde(default = "default_reverb_mix")]
    pub reverb_mix: f64,

    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    #[serde(default)]
    pub log_level: Option<String>,
}

impl EngineConfig {
    pub fn root_path(&self) -> PathBuf {
        self.analysis_path
            .parent()
            .map(PathBuf::from)
            .unwrap_or_default()
    }

    pub fn feature_subset(&self) -> FeatureSubset {
        FeatureSubset {
            use_pitch: self.use_pitch,
            use_spectral: self.use_spectral,
            use_mfcc: self.use_mfcc,
            mfcc_count: self.mfcc_count,
        }
    }

    pub fn new(analysis_path: PathBuf) -> Self {
        Self {
            analysis_path,
            history_size: default_history_size(),
            mfcc_count: default_mfcc_count(),
            use_mfcc: true,
            use_pitch: true,
            use_spectral: true,
            pitch_detection_min_frequency: default_pitch_min(),
            pitch_detection_max_frequency: default_pitch_max(),
            silence_threshold_db: default_silence_threshold_db(),
            input_bus: default_input_bus(),
            output_bus: default_bus(),
            input_count: default_channel_count(),
            output_count: default_channel_count(),
            input_device: None,
            output_device: None,
            polyphony: 0,
            reverb_mix: default_reverb_mix(),
            server_host: default_server_host(),
            server_port: default_server_port(),
            log_level: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = EngineConfig::new(PathBuf::from("/corpus/analysis.json"));
        assert_eq!(config.history_size, 10);
        assert_eq!(config.mfcc_count, 13);
        assert!(config.use_mfcc && config.use_pitch && config.use_spectral);
        assert_eq!(config.polyphony, 0);
        assert_eq!(config.root_path(), PathBuf::from("/corpus"));
    }
}
