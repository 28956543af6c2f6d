mod file_config;

pub use file_config::{
    ConversionConfig, EndpointConfig, FileConfig, PollingConfig, ProvidersFileConfig,
};

use crate::conversion::WavOptions;
use crate::generation::{MusicProvider, PollPolicy};
use crate::mastering::MasteringProvider;
use crate::providers::DEFAULT_TASK_MODEL;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_CLEANUP_MAX_AGE_DAYS: u64 = 30;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// `days` as a duration, saturating instead of overflowing.
pub fn days_to_duration(days: u64) -> Duration {
    Duration::from_secs(days.saturating_mul(SECS_PER_DAY))
}

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub public_dir: Option<PathBuf>,
    /// 0 disables the timeout.
    pub request_timeout_secs: u64,
    pub cleanup_max_age_days: u64,
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_dir: None,
            public_dir: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cleanup_max_age_days: DEFAULT_CLEANUP_MAX_AGE_DAYS,
            ffmpeg_path: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    /// Root served to clients; audio lands in `generated-music/` below it.
    pub public_dir: PathBuf,
    pub cleanup_max_age: Duration,

    // Feature configs (with defaults)
    pub providers: ProvidersConfig,
    pub polling: PollPolicy,
    pub conversion: ConversionSettings,
}

/// Key and base URL of one remote API.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl ProviderEndpoint {
    /// The API key, ignoring blank values.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }

    pub fn base_url_or(&self, default: &str) -> String {
        self.base_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .unwrap_or(default)
            .trim_end_matches('/')
            .to_string()
    }
}

#[derive(Debug, Clone)]
pub struct ProvidersConfig {
    pub goapi: ProviderEndpoint,
    pub piapi: ProviderEndpoint,
    pub fal: ProviderEndpoint,
    pub ai_mastering: ProviderEndpoint,
    pub landr: ProviderEndpoint,
    pub task_model: String,
    pub request_timeout: Option<Duration>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            goapi: ProviderEndpoint::default(),
            piapi: ProviderEndpoint::default(),
            fal: ProviderEndpoint::default(),
            ai_mastering: ProviderEndpoint::default(),
            landr: ProviderEndpoint::default(),
            task_model: DEFAULT_TASK_MODEL.to_string(),
            request_timeout: Some(Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub ffmpeg_path: PathBuf,
    pub wav: WavOptions,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            wav: WavOptions::default(),
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments, optional TOML file config
    /// and the process environment.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        Self::resolve_with_env(cli, file_config, |name| std::env::var(name).ok())
    }

    /// Like `resolve`, reading environment variables through `env`.
    /// TOML values override CLI values where present; API keys come from
    /// TOML first, then the environment.
    pub fn resolve_with_env<E>(cli: &CliConfig, file_config: Option<FileConfig>, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let public_dir = file
            .public_dir
            .map(PathBuf::from)
            .or_else(|| cli.public_dir.clone())
            .unwrap_or_else(|| db_dir.join("public"));

        let request_timeout_secs = file
            .request_timeout_secs
            .unwrap_or(cli.request_timeout_secs);
        let request_timeout =
            (request_timeout_secs > 0).then(|| Duration::from_secs(request_timeout_secs));

        let cleanup_max_age_days = file
            .cleanup_max_age_days
            .unwrap_or(cli.cleanup_max_age_days);
        if cleanup_max_age_days == 0 {
            bail!("cleanup_max_age_days must be at least 1");
        }

        let providers_file = file.providers.unwrap_or_default();
        let endpoint = |section: Option<EndpointConfig>, env_var: &str| {
            let section = section.unwrap_or_default();
            ProviderEndpoint {
                api_key: section
                    .api_key
                    .filter(|k| !k.trim().is_empty())
                    .or_else(|| env(env_var)),
                base_url: section.base_url,
            }
        };
        let providers = ProvidersConfig {
            goapi: endpoint(providers_file.goapi, MusicProvider::Suno.api_key_env()),
            piapi: endpoint(providers_file.piapi, MusicProvider::PiApi.api_key_env()),
            fal: endpoint(providers_file.fal, MusicProvider::Fal.api_key_env()),
            ai_mastering: endpoint(
                providers_file.ai_mastering,
                MasteringProvider::AiMastering.api_key_env(),
            ),
            landr: endpoint(providers_file.landr, MasteringProvider::Landr.api_key_env()),
            task_model: providers_file
                .task_model
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TASK_MODEL.to_string()),
            request_timeout,
        };

        // Polling settings - merge file config with defaults
        let polling_file = file.polling.unwrap_or_default();
        let defaults = PollPolicy::default();
        let polling = PollPolicy {
            initial_interval: polling_file
                .initial_interval_secs
                .map(secs_f64)
                .transpose()?
                .unwrap_or(defaults.initial_interval),
            max_interval: polling_file
                .max_interval_secs
                .map(secs_f64)
                .transpose()?
                .unwrap_or(defaults.max_interval),
            multiplier: polling_file.multiplier.unwrap_or(defaults.multiplier),
            max_attempts: polling_file.max_attempts.unwrap_or(defaults.max_attempts),
            max_consecutive_errors: polling_file
                .max_consecutive_errors
                .unwrap_or(defaults.max_consecutive_errors),
        };
        if !(polling.multiplier.is_finite() && polling.multiplier >= 1.0) {
            bail!("polling.multiplier must be at least 1.0");
        }
        if polling.max_attempts == 0 {
            bail!("polling.max_attempts must be at least 1");
        }

        let conversion_file = file.conversion.unwrap_or_default();
        let default_wav = WavOptions::default();
        let conversion = ConversionSettings {
            ffmpeg_path: conversion_file
                .ffmpeg_path
                .map(PathBuf::from)
                .or_else(|| cli.ffmpeg_path.clone())
                .unwrap_or_else(|| PathBuf::from("ffmpeg")),
            wav: WavOptions {
                bit_depth: conversion_file
                    .wav_bit_depth
                    .unwrap_or(default_wav.bit_depth),
                sample_rate: conversion_file
                    .wav_sample_rate
                    .unwrap_or(default_wav.sample_rate),
            },
        };
        if !matches!(conversion.wav.bit_depth, 16 | 24 | 32) {
            bail!(
                "conversion.wav_bit_depth must be 16, 24 or 32, got {}",
                conversion.wav.bit_depth
            );
        }
        if conversion.wav.sample_rate == 0 {
            bail!("conversion.wav_sample_rate must be positive");
        }

        Ok(Self {
            db_dir,
            public_dir,
            cleanup_max_age: days_to_duration(cleanup_max_age_days),
            providers,
            polling,
            conversion,
        })
    }

    pub fn music_db_path(&self) -> PathBuf {
        self.db_dir.join("music.db")
    }
}

fn secs_f64(secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow::anyhow!("Invalid polling interval: {} seconds", secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn make_temp_db_dir() -> TempDir {
        TempDir::new().unwrap()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn cli_for(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        }
    }

    #[test]
    fn test_days_to_duration_saturates() {
        assert_eq!(days_to_duration(2), Duration::from_secs(2 * 86400));
        assert_eq!(days_to_duration(u64::MAX), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(temp_dir.path().to_path_buf()),
            public_dir: Some(PathBuf::from("/srv/public")),
            request_timeout_secs: 30,
            cleanup_max_age_days: 7,
            ffmpeg_path: Some(PathBuf::from("/opt/ffmpeg")),
        };

        let config = AppConfig::resolve_with_env(&cli, None, no_env).unwrap();

        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.public_dir, PathBuf::from("/srv/public"));
        assert_eq!(
            config.providers.request_timeout,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.cleanup_max_age, Duration::from_secs(7 * 86400));
        assert_eq!(config.conversion.ffmpeg_path, PathBuf::from("/opt/ffmpeg"));
        assert_eq!(config.providers.task_model, DEFAULT_TASK_MODEL);
        assert_eq!(config.polling, PollPolicy::default());
        assert!(config.providers.goapi.api_key().is_none());
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = make_temp_db_dir();
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/should/be/overridden")),
            public_dir: Some(PathBuf::from("/cli/public")),
            request_timeout_secs: 30,
            ..Default::default()
        };

        let file_config: FileConfig = toml::from_str(&format!(
            r#"
            db_dir = "{}"
            public_dir = "/toml/public"
            request_timeout_secs = 0

            [providers]
            task_model = "music-s"

            [providers.fal]
            api_key = "fal-from-toml"
            base_url = "http://localhost:9000/"

            [polling]
            initial_interval_secs = 0.5
            max_attempts = 10

            [conversion]
            wav_bit_depth = 24
            "#,
            temp_dir.path().display()
        ))
        .unwrap();

        let config = AppConfig::resolve_with_env(&cli, Some(file_config), no_env).unwrap();

        // TOML values should override CLI
        assert_eq!(config.db_dir, temp_dir.path());
        assert_eq!(config.public_dir, PathBuf::from("/toml/public"));
        assert_eq!(config.providers.request_timeout, None);
        assert_eq!(config.providers.task_model, "music-s");
        assert_eq!(config.providers.fal.api_key(), Some("fal-from-toml"));
        assert_eq!(
            config.providers.fal.base_url_or("unused"),
            "http://localhost:9000"
        );
        assert_eq!(config.polling.initial_interval, Duration::from_millis(500));
        assert_eq!(config.polling.max_attempts, 10);
        // Defaults used when TOML doesn't specify
        assert_eq!(config.polling.multiplier, 1.5);
        assert_eq!(config.conversion.wav.bit_depth, 24);
        assert_eq!(config.conversion.wav.sample_rate, 44_100);
    }

    #[test]
    fn test_api_keys_fall_back_to_environment() {
        let temp_dir = make_temp_db_dir();
        let env: HashMap<&str, &str> = [
            ("GOAPI_API_KEY", "goapi-env"),
            ("FAL_API_KEY", "fal-env"),
            ("LANDR_API_KEY", "landr-env"),
        ]
        .into_iter()
        .collect();

        let file_config = FileConfig {
            providers: Some(ProvidersFileConfig {
                fal: Some(EndpointConfig {
                    api_key: Some("fal-toml".to_string()),
                    base_url: None,
                }),
                goapi: Some(EndpointConfig {
                    api_key: Some("  ".to_string()),
                    base_url: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve_with_env(&cli_for(&temp_dir), Some(file_config), |k| {
            env.get(k).map(|v| v.to_string())
        })
        .unwrap();

        assert_eq!(config.providers.goapi.api_key(), Some("goapi-env"));
        assert_eq!(config.providers.fal.api_key(), Some("fal-toml"));
        assert_eq!(config.providers.landr.api_key(), Some("landr-env"));
        assert!(config.providers.piapi.api_key().is_none());
        assert!(config.providers.ai_mastering.api_key().is_none());
    }

    #[test]
    fn test_resolve_missing_db_dir_error() {
        let cli = CliConfig::default();
        let result = AppConfig::resolve_with_env(&cli, None, no_env);
        assert!(result.is_err());
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("db_dir must be specified"));
    }

    #[test]
    fn test_resolve_nonexistent_db_dir_error() {
        let cli = CliConfig {
            db_dir: Some(PathBuf::from("/nonexistent/path/that/should/not/exist")),
            ..Default::default()
        };
        let result = AppConfig::resolve_with_env(&cli, None, no_env);
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_resolve_db_dir_not_directory_error() {
        let temp_file = tempfile::NamedTempFile::new().unwrap();
        let cli = CliConfig {
            db_dir: Some(temp_file.path().to_path_buf()),
            ..Default::default()
        };
        let result = AppConfig::resolve_with_env(&cli, None, no_env);
        assert!(result.unwrap_err().to_string().contains("not a directory"));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let temp_dir = make_temp_db_dir();
        let bad_depth = FileConfig {
            conversion: Some(ConversionConfig {
                wav_bit_depth: Some(8),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve_with_env(&cli_for(&temp_dir), Some(bad_depth), no_env).is_err());

        let bad_multiplier = FileConfig {
            polling: Some(PollingConfig {
                multiplier: Some(0.5),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(
            AppConfig::resolve_with_env(&cli_for(&temp_dir), Some(bad_multiplier), no_env)
                .is_err()
        );

        let negative_interval = FileConfig {
            polling: Some(PollingConfig {
                initial_interval_secs: Some(-1.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(
            AppConfig::resolve_with_env(&cli_for(&temp_dir), Some(negative_interval), no_env)
                .is_err()
        );
    }

    #[test]
    fn test_public_dir_defaults_under_db_dir() {
        let temp_dir = make_temp_db_dir();
        let config = AppConfig::resolve_with_env(&cli_for(&temp_dir), None, no_env).unwrap();
        assert_eq!(config.public_dir, temp_dir.path().join("public"));
        assert_eq!(config.music_db_path(), temp_dir.path().join("music.db"));
    }

    #[test]
    fn test_endpoint_helpers() {
        let endpoint = ProviderEndpoint {
            api_key: Some(" key ".to_string()),
            base_url: Some("  ".to_string()),
        };
        assert_eq!(endpoint.api_key(), Some("key"));
        assert_eq!(endpoint.base_url_or("https://api.goapi.ai/"), "https://api.goapi.ai");
    }
}
