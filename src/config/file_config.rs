use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub public_dir: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub cleanup_max_age_days: Option<u64>,

    // Feature configs
    pub providers: Option<ProvidersFileConfig>,
    pub polling: Option<PollingConfig>,
    pub conversion: Option<ConversionConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ProvidersFileConfig {
    pub goapi: Option<EndpointConfig>,
    pub piapi: Option<EndpointConfig>,
    pub fal: Option<EndpointConfig>,
    pub ai_mastering: Option<EndpointConfig>,
    pub landr: Option<EndpointConfig>,
    /// Model name sent to the GoAPI/PiAPI task endpoint.
    pub task_model: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EndpointConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub initial_interval_secs: Option<f64>,
    pub max_interval_secs: Option<f64>,
    pub multiplier: Option<f64>,
    pub max_attempts: Option<u32>,
    pub max_consecutive_errors: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ConversionConfig {
    pub ffmpeg_path: Option<String>,
    pub wav_bit_depth: Option<u16>,
    pub wav_sample_rate: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
