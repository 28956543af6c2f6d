use ai_music_orchestrator::config::{
    days_to_duration, AppConfig, CliConfig, FileConfig, DEFAULT_CLEANUP_MAX_AGE_DAYS,
    DEFAULT_REQUEST_TIMEOUT_SECS,
};
use ai_music_orchestrator::conversion::TargetFormat;
use ai_music_orchestrator::generation::{
    poll_until_terminal, JobStatus, MusicGenerationInput, MusicModel, MusicProvider,
};
use ai_music_orchestrator::mastering::{MasteringIntensity, MasteringProvider};
use ai_music_orchestrator::music_store::{FolderFilter, ListOptions, MusicSort};
use ai_music_orchestrator::service::MusicService;
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_provider(s: &str) -> Result<MusicProvider, String> {
    MusicProvider::from_str(s).ok_or_else(|| format!("unknown provider '{}'", s))
}

fn parse_model(s: &str) -> Result<MusicModel, String> {
    MusicModel::from_str(s).ok_or_else(|| format!("unknown model '{}'", s))
}

fn parse_intensity(s: &str) -> Result<MasteringIntensity, String> {
    MasteringIntensity::from_str(s).ok_or_else(|| format!("unknown intensity '{}'", s))
}

fn parse_status(s: &str) -> Result<JobStatus, String> {
    JobStatus::from_db_str(s).ok_or_else(|| format!("unknown status '{}'", s))
}

fn parse_sort(s: &str) -> Result<MusicSort, String> {
    MusicSort::from_str(s).ok_or_else(|| format!("unknown sort '{}'", s))
}

fn parse_format(s: &str) -> Result<TargetFormat, String> {
    TargetFormat::from_str(s).ok_or_else(|| format!("unsupported format '{}'", s))
}

#[derive(Parser, Debug)]
#[command(
    name = "ai-music",
    version = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH")),
    about = "Generate, master and organize AI music"
)]
struct CliArgs {
    /// Directory holding music.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Public directory generated audio is written under. Defaults to
    /// `<db-dir>/public`.
    #[clap(long, value_parser = parse_path)]
    pub public_dir: Option<PathBuf>,

    /// TOML config file. Its values override command line flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Timeout in seconds for provider requests, 0 disables it.
    #[clap(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    /// Age in days after which `cleanup` removes stored files.
    #[clap(
        long,
        default_value_t = DEFAULT_CLEANUP_MAX_AGE_DAYS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub cleanup_max_age_days: u64,

    /// ffmpeg binary used for conversion and waveforms.
    #[clap(long)]
    pub ffmpeg: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which generation and mastering providers are configured.
    Providers,

    /// Start a generation job.
    Generate {
        prompt: String,
        #[clap(long, default_value = "local")]
        user: String,
        #[clap(long)]
        style: Option<String>,
        #[clap(long)]
        mood: Option<String>,
        #[clap(long)]
        title: Option<String>,
        #[clap(long)]
        lyrics: Option<String>,
        #[clap(long)]
        instrumental: bool,
        #[clap(long, default_value = "standard", value_parser = parse_model)]
        model: MusicModel,
        #[clap(long, default_value_t = 30)]
        duration: u32,
        #[clap(long, value_parser = parse_provider)]
        provider: Option<MusicProvider>,
        /// Wait for the job to finish.
        #[clap(long)]
        wait: bool,
    },

    /// Check a record's generation job once.
    Status { record_id: String },

    /// Wait for a record's job to finish. With --provider, ID is a raw
    /// provider job id instead.
    Wait {
        id: String,
        #[clap(long, value_parser = parse_provider)]
        provider: Option<MusicProvider>,
    },

    /// Send a completed track to mastering.
    Master {
        record_id: String,
        #[clap(long, default_value = "med", value_parser = parse_intensity)]
        intensity: MasteringIntensity,
        /// Use LANDR instead of AI Mastering.
        #[clap(long)]
        premium: bool,
    },

    /// Check a record's mastering job once.
    MasteringStatus { record_id: String },

    /// List generated tracks.
    List {
        #[clap(long)]
        user: Option<String>,
        #[clap(long, value_parser = parse_status)]
        status: Option<JobStatus>,
        #[clap(long, conflicts_with = "unfiled")]
        folder: Option<String>,
        /// Only tracks outside any folder.
        #[clap(long)]
        unfiled: bool,
        #[clap(long)]
        search: Option<String>,
        #[clap(long, default_value = "newest", value_parser = parse_sort)]
        sort: MusicSort,
        #[clap(long, default_value_t = 20)]
        limit: usize,
        #[clap(long, default_value_t = 0)]
        offset: usize,
    },

    /// Toggle a user's like on a track.
    Like {
        record_id: String,
        #[clap(long, default_value = "local")]
        user: String,
    },

    /// Count a play.
    Play { record_id: String },

    /// Per-user totals.
    Stats {
        #[clap(long, default_value = "local")]
        user: String,
    },

    /// Move a track into a folder, or out of any folder without FOLDER_ID.
    Move {
        record_id: String,
        folder_id: Option<String>,
    },

    /// Manage folders.
    Folders {
        #[command(subcommand)]
        action: FolderCommand,
    },

    /// Transcode a stored track to WAV or FLAC.
    Convert {
        record_id: String,
        #[clap(long, default_value = "wav", value_parser = parse_format)]
        format: TargetFormat,
    },

    /// Render a track's waveform picture.
    Waveform { record_id: String },

    /// Delete a track and its files.
    Delete { record_id: String },

    /// Remove stored files older than the configured age.
    Cleanup {
        /// At least 1; defaults to the configured age.
        #[clap(long, value_parser = clap::value_parser!(u64).range(1..))]
        max_age_days: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
enum FolderCommand {
    List {
        #[clap(long, default_value = "local")]
        user: String,
    },
    Create {
        name: String,
        #[clap(long, default_value = "local")]
        user: String,
    },
    Delete {
        folder_id: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

async fn run(cli_args: CliArgs) -> Result<()> {
    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir,
        public_dir: cli_args.public_dir,
        request_timeout_secs: cli_args.request_timeout_secs,
        cleanup_max_age_days: cli_args.cleanup_max_age_days,
        ffmpeg_path: cli_args.ffmpeg,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening music database at {:?}...", config.music_db_path());
    let service = MusicService::from_config(&config)?;

    match cli_args.command {
        Command::Providers => {
            let providers = service.router().configured_providers();
            let mastering: Vec<MasteringProvider> =
                [MasteringProvider::AiMastering, MasteringProvider::Landr]
                    .into_iter()
                    .filter(|p| service.mastering().is_available(*p))
                    .collect();
            print_json(&serde_json::json!({
                "generation": providers,
                "mastering": mastering,
                "ffmpeg": service.converter().is_available().await,
            }))?;
        }

        Command::Generate {
            prompt,
            user,
            style,
            mood,
            title,
            lyrics,
            instrumental,
            model,
            duration,
            provider,
            wait,
        } => {
            let input = MusicGenerationInput {
                prompt,
                style,
                title,
                lyrics,
                instrumental,
                mood,
                model,
                duration_secs: duration,
                provider,
            };
            let outcome = service.start_generation(&user, &input).await?;
            match (&outcome.record, wait) {
                (Some(record), true) => {
                    let progress = spinner(format!("Generating {}", record.id));
                    let finished = service.wait_for_generation(&record.id, &config.polling).await;
                    progress.finish_and_clear();
                    print_json(&finished?)?;
                }
                _ => print_json(&outcome)?,
            }
            if !outcome.result.success {
                bail!(
                    "Generation failed: {}",
                    outcome.result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        Command::Status { record_id } => {
            print_json(&service.refresh_generation(&record_id).await?)?;
        }

        Command::Wait { id, provider } => {
            let progress = spinner(format!("Waiting for {}", id));
            match provider {
                Some(provider) => {
                    let result =
                        poll_until_terminal(service.router(), &id, provider, &config.polling)
                            .await;
                    progress.finish_and_clear();
                    print_json(&result)?;
                }
                None => {
                    let record = service.wait_for_generation(&id, &config.polling).await;
                    progress.finish_and_clear();
                    print_json(&record?)?;
                }
            }
        }

        Command::Master {
            record_id,
            intensity,
            premium,
        } => {
            let result = service
                .start_mastering(&record_id, intensity, premium)
                .await?;
            print_json(&result)?;
            if !result.success {
                bail!(
                    "Mastering failed: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }

        Command::MasteringStatus { record_id } => {
            print_json(&service.refresh_mastering(&record_id).await?)?;
        }

        Command::List {
            user,
            status,
            folder,
            unfiled,
            search,
            sort,
            limit,
            offset,
        } => {
            let folder = match (folder, unfiled) {
                (Some(id), _) => FolderFilter::Folder(id),
                (None, true) => FolderFilter::Unfiled,
                (None, false) => FolderFilter::Any,
            };
            let page = service.store().list_music(&ListOptions {
                user_id: user,
                status,
                folder,
                search,
                sort,
                limit,
                offset,
            })?;
            print_json(&page)?;
        }

        Command::Like { record_id, user } => {
            print_json(&service.store().like_music(&record_id, &user)?)?;
        }

        Command::Play { record_id } => {
            let plays = service.store().increment_plays(&record_id)?;
            print_json(&serde_json::json!({ "id": record_id, "plays": plays }))?;
        }

        Command::Stats { user } => {
            let stats = service.store().get_user_stats(&user)?;
            let on_disk = service.storage().user_storage_usage(&user).await?;
            print_json(&stats)?;
            println!(
                "Recorded size: {:#}, on disk: {:#}",
                byte_unit::Byte::from(stats.total_bytes),
                byte_unit::Byte::from(on_disk)
            );
        }

        Command::Move {
            record_id,
            folder_id,
        } => {
            service
                .store()
                .move_to_folder(&record_id, folder_id.as_deref())?;
            print_json(&service.store().get_music(&record_id)?)?;
        }

        Command::Folders { action } => match action {
            FolderCommand::List { user } => print_json(&service.store().list_folders(&user)?)?,
            FolderCommand::Create { name, user } => {
                print_json(&service.store().create_folder(&user, &name)?)?
            }
            FolderCommand::Delete { folder_id } => {
                if !service.store().delete_folder(&folder_id)? {
                    bail!("Folder {} not found", folder_id);
                }
            }
        },

        Command::Convert { record_id, format } => {
            let converted = service.convert_record(&record_id, format).await?;
            print_json(&converted)?;
            println!("Size: {:#}", byte_unit::Byte::from(converted.file_size));
        }

        Command::Waveform { record_id } => {
            print_json(&service.render_waveform(&record_id).await?)?;
        }

        Command::Delete { record_id } => {
            if !service.delete_record(&record_id).await? {
                bail!("Music {} not found", record_id);
            }
        }

        Command::Cleanup { max_age_days } => {
            let max_age = max_age_days
                .map(days_to_duration)
                .unwrap_or(config.cleanup_max_age);
            let report = service.cleanup(max_age).await?;
            print_json(&report)?;
            println!("Freed {:#}", byte_unit::Byte::from(report.bytes_freed));
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    if let Err(e) = run(cli_args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
