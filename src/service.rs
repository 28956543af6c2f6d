//! Ties generation, mastering, storage, conversion and persistence together
//! into the record lifecycle.

use crate::config::AppConfig;
use crate::conversion::{AudioConverter, TargetFormat};
use crate::generation::{
    calculate_music_cost, poll_until, GenerationResult, JobStatus, MusicGenerationInput,
    MusicRouter, PollError, PollPolicy,
};
use crate::mastering::{MasteringInput, MasteringIntensity, MasteringResult, MasteringService};
use crate::music_store::{MusicRecord, MusicStore, MusicUpdate, NewMusicRecord, SqliteMusicStore};
use crate::providers::build_client;
use crate::storage::{CleanupReport, MusicStorage, StoredFile};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// What `start_generation` produced. `record` is `None` when the request
/// was rejected before any provider accepted it.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationOutcome {
    pub result: GenerationResult,
    pub record: Option<MusicRecord>,
}

pub struct MusicService {
    router: MusicRouter,
    mastering: MasteringService,
    storage: MusicStorage,
    converter: AudioConverter,
    store: Arc<dyn MusicStore>,
}

impl MusicService {
    pub fn new(
        router: MusicRouter,
        mastering: MasteringService,
        storage: MusicStorage,
        converter: AudioConverter,
        store: Arc<dyn MusicStore>,
    ) -> Self {
        Self {
            router,
            mastering,
            storage,
            converter,
            store,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let router = MusicRouter::from_config(&config.providers)?;
        let mastering = MasteringService::from_config(&config.providers)?;
        let storage = MusicStorage::new(
            &config.public_dir,
            build_client(config.providers.request_timeout)?,
        );
        let converter = AudioConverter::new(&config.conversion.ffmpeg_path, config.conversion.wav);
        let store = SqliteMusicStore::new(config.music_db_path())
            .with_context(|| format!("Failed to open {}", config.music_db_path().display()))?;
        Ok(Self::new(
            router,
            mastering,
            storage,
            converter,
            Arc::new(store),
        ))
    }

    pub fn router(&self) -> &MusicRouter {
        &self.router
    }

    pub fn mastering(&self) -> &MasteringService {
        &self.mastering
    }

    pub fn storage(&self) -> &MusicStorage {
        &self.storage
    }

    pub fn converter(&self) -> &AudioConverter {
        &self.converter
    }

    pub fn store(&self) -> &dyn MusicStore {
        self.store.as_ref()
    }

    fn record(&self, record_id: &str) -> Result<MusicRecord> {
        self.store
            .get_music(record_id)?
            .with_context(|| format!("Music {} not found", record_id))
    }

    /// Submit a generation request and persist a record for the accepted
    /// job. The record starts out pending, whatever the provider answered;
    /// only status checks move it forward.
    pub async fn start_generation(
        &self,
        user_id: &str,
        input: &MusicGenerationInput,
    ) -> Result<GenerationOutcome> {
        let result = self.router.generate(input).await;
        let (Some(provider), true) = (result.provider, result.success) else {
            return Ok(GenerationOutcome {
                result,
                record: None,
            });
        };

        let record = self.store.create_music(NewMusicRecord {
            user_id: user_id.to_string(),
            job_id: result.job_id.clone(),
            provider,
            title: input.title.clone(),
            prompt: input.prompt.clone(),
            style: input.style.clone(),
            mood: input.mood.clone(),
            lyrics: input.lyrics.clone(),
            model: input.model,
            duration_secs: input.duration_secs,
            instrumental: input.instrumental,
            credits_used: calculate_music_cost(input.model, input.duration_secs),
        })?;
        info!(
            record_id = %record.id,
            user_id = %user_id,
            provider = %provider,
            credits = record.credits_used,
            "Generation started"
        );

        Ok(GenerationOutcome {
            result,
            record: Some(record),
        })
    }

    /// Record what a provider reported. A completed job is downloaded into
    /// storage first; failing to store it fails the record but keeps the
    /// remote URL.
    pub async fn apply_generation_result(
        &self,
        record: MusicRecord,
        result: &GenerationResult,
    ) -> Result<MusicRecord> {
        if record.status.is_terminal() || !record.status.can_transition_to(result.status) {
            return Ok(record);
        }

        let update = match result.status {
            JobStatus::Pending => return Ok(record),
            JobStatus::Processing if record.status == JobStatus::Processing => return Ok(record),
            JobStatus::Processing => MusicUpdate {
                status: Some(JobStatus::Processing),
                ..Default::default()
            },
            JobStatus::Failed => MusicUpdate {
                status: Some(JobStatus::Failed),
                error: Some(
                    result
                        .error
                        .clone()
                        .unwrap_or_else(|| "Generation failed".to_string()),
                ),
                ..Default::default()
            },
            JobStatus::Completed => self.store_generated_audio(&record, result).await,
        };

        match self.store.update_music(&record.id, &update) {
            Ok(updated) => {
                info!(record_id = %updated.id, status = %updated.status, "Generation status recorded");
                Ok(updated)
            }
            Err(e) => match self.store.get_music(&record.id)? {
                // Another refresh finished the record first; drop our copy.
                Some(current) if current.status.is_terminal() => {
                    if let Some(url) = update
                        .public_url
                        .as_ref()
                        .filter(|url| current.public_url.as_ref() != Some(*url))
                    {
                        info!(record_id = %record.id, url = %url, "Discarding duplicate download");
                        if let Err(e) = self.storage.delete_music_file(url).await {
                            warn!(record_id = %record.id, url = %url, error = %e, "Failed to delete duplicate download");
                        }
                    }
                    Ok(current)
                }
                _ => Err(e),
            },
        }
    }

    async fn store_generated_audio(
        &self,
        record: &MusicRecord,
        result: &GenerationResult,
    ) -> MusicUpdate {
        let Some(audio_url) = result.audio_urls.first() else {
            return MusicUpdate {
                status: Some(JobStatus::Failed),
                error: Some("Provider reported completion without audio".to_string()),
                ..Default::default()
            };
        };

        match self
            .storage
            .download_and_save_music(audio_url, &record.user_id, None)
            .await
        {
            Ok(stored) => MusicUpdate {
                status: Some(JobStatus::Completed),
                audio_url: Some(audio_url.clone()),
                image_url: result.image_url.clone(),
                local_path: Some(stored.local_path.to_string_lossy().to_string()),
                public_url: Some(stored.public_url),
                file_size: Some(stored.file_size),
                format: Some(stored.format),
                ..Default::default()
            },
            Err(e) => {
                warn!(record_id = %record.id, url = %audio_url, error = %e, "Failed to store generated audio");
                MusicUpdate {
                    status: Some(JobStatus::Failed),
                    audio_url: Some(audio_url.clone()),
                    image_url: result.image_url.clone(),
                    error: Some(format!("Failed to store generated audio: {}", e)),
                    ..Default::default()
                }
            }
        }
    }

    fn generation_job(record: &MusicRecord) -> Result<&str> {
        record
            .job_id
            .as_deref()
            .with_context(|| format!("Music {} has no provider job", record.id))
    }

    /// Check the provider once and record the answer. Provider errors are
    /// returned and leave the record untouched.
    pub async fn refresh_generation(&self, record_id: &str) -> Result<MusicRecord> {
        let record = self.record(record_id)?;
        if record.status.is_terminal() {
            return Ok(record);
        }
        let job_id = Self::generation_job(&record)?;
        let result = self
            .router
            .try_check_status(job_id, record.provider)
            .await
            .with_context(|| format!("Status check for job {} failed", job_id))?;
        self.apply_generation_result(record, &result).await
    }

    /// Poll until the job is terminal. Running out of attempts is an error
    /// and leaves the record as it was, since the job may still finish.
    pub async fn wait_for_generation(
        &self,
        record_id: &str,
        policy: &PollPolicy,
    ) -> Result<MusicRecord> {
        let record = self.record(record_id)?;
        if record.status.is_terminal() {
            return Ok(record);
        }
        let job_id = Self::generation_job(&record)?.to_string();
        let provider = record.provider;
        let router = &self.router;
        let job = job_id.as_str();

        let polled = poll_until(
            policy,
            move || router.try_check_status(job, provider),
            |result: &GenerationResult| result.status.is_terminal(),
        )
        .await;

        match polled {
            Ok(result) => self.apply_generation_result(record, &result).await,
            Err(PollError::Exhausted { attempts }) => bail!(
                "Job {} still running after {} status checks",
                job_id,
                attempts
            ),
            Err(e) => Err(e).with_context(|| format!("Polling job {} failed", job_id)),
        }
    }

    /// Send a completed track to mastering.
    pub async fn start_mastering(
        &self,
        record_id: &str,
        intensity: MasteringIntensity,
        use_premium: bool,
    ) -> Result<MasteringResult> {
        let record = self.record(record_id)?;
        if record.status != JobStatus::Completed {
            bail!(
                "Music {} is {}, only completed tracks can be mastered",
                record.id,
                record.status
            );
        }
        let source = record
            .audio_url
            .clone()
            .or_else(|| record.public_url.clone())
            .with_context(|| format!("Music {} has no audio", record.id))?;

        let mut input = MasteringInput::new(source, intensity);
        input.title = record.title.clone();
        let result = self.mastering.master_audio(&input, use_premium).await;

        if let (true, Some(job_id)) = (result.success, &result.job_id) {
            self.store.update_music(
                &record.id,
                &MusicUpdate {
                    mastering_status: Some(JobStatus::Pending),
                    mastering_job_id: Some(job_id.clone()),
                    mastering_provider: Some(result.provider),
                    mastering_intensity: Some(intensity),
                    ..Default::default()
                },
            )?;
        }
        Ok(result)
    }

    /// Check the mastering job once. A finished master is downloaded next to
    /// the original; a failure is recorded in `mastering_error`.
    pub async fn refresh_mastering(&self, record_id: &str) -> Result<MusicRecord> {
        let record = self.record(record_id)?;
        let (Some(job_id), Some(provider)) =
            (record.mastering_job_id.clone(), record.mastering_provider)
        else {
            bail!("Music {} has not been sent to mastering", record.id);
        };
        let current = record.mastering_status.unwrap_or(JobStatus::Pending);
        if current.is_terminal() {
            return Ok(record);
        }

        let result = self
            .mastering
            .try_check_status(&job_id, provider)
            .await
            .with_context(|| format!("Mastering status check for job {} failed", job_id))?;

        let update = match (result.status, &result.mastered_url) {
            (JobStatus::Completed, Some(url)) => {
                match self
                    .storage
                    .download_and_save_mastered(url, &record.user_id, &record.id)
                    .await
                {
                    Ok(stored) => MusicUpdate {
                        mastering_status: Some(JobStatus::Completed),
                        mastered_path: Some(stored.local_path.to_string_lossy().to_string()),
                        mastered_url: Some(stored.public_url),
                        ..Default::default()
                    },
                    Err(e) => {
                        warn!(record_id = %record.id, url = %url, error = %e, "Failed to store mastered audio");
                        MusicUpdate {
                            mastering_status: Some(JobStatus::Failed),
                            mastering_error: Some(format!("Failed to store mastered audio: {}", e)),
                            ..Default::default()
                        }
                    }
                }
            }
            (JobStatus::Completed, None) | (JobStatus::Failed, _) => {
                let error = result
                    .error
                    .clone()
                    .unwrap_or_else(|| "Mastering finished without audio".to_string());
                warn!(record_id = %record.id, job_id = %job_id, error = %error, "Mastering failed");
                MusicUpdate {
                    mastering_status: Some(JobStatus::Failed),
                    mastering_error: Some(error),
                    ..Default::default()
                }
            }
            (status, _) if status != current => MusicUpdate {
                mastering_status: Some(current.advance(status)),
                ..Default::default()
            },
            _ => return Ok(record),
        };
        self.store.update_music(&record.id, &update)
    }

    /// Transcode the stored track next to the original. The record keeps
    /// pointing at the original file.
    pub async fn convert_record(&self, record_id: &str, format: TargetFormat) -> Result<StoredFile> {
        let record = self.record(record_id)?;
        let (Some(local_path), Some(public_url)) = (&record.local_path, &record.public_url) else {
            bail!("Music {} has no stored audio", record.id);
        };

        let output = self
            .converter
            .convert_alongside(Path::new(local_path), format)
            .await?;
        let file_size = self.storage.file_size(&output).await?;
        Ok(StoredFile {
            local_path: output,
            public_url: swap_extension(public_url, format.extension()),
            file_size,
            format: format.extension().to_string(),
        })
    }

    /// Render the waveform picture of a stored track.
    pub async fn render_waveform(&self, record_id: &str) -> Result<MusicRecord> {
        let record = self.record(record_id)?;
        let local_path = record
            .local_path
            .as_deref()
            .with_context(|| format!("Music {} has no stored audio", record.id))?;
        let target = self.storage.waveform_path(&record.user_id, &record.id);
        self.converter
            .render_waveform(Path::new(local_path), &target.local_path)
            .await?;
        self.store.update_music(
            &record.id,
            &MusicUpdate {
                waveform_url: Some(target.public_url),
                ..Default::default()
            },
        )
    }

    /// Delete the record, then its files. A file that cannot be removed is
    /// logged and left for `cleanup`.
    pub async fn delete_record(&self, record_id: &str) -> Result<bool> {
        let Some(record) = self.store.delete_music(record_id)? else {
            return Ok(false);
        };
        let urls = [&record.public_url, &record.mastered_url, &record.waveform_url];
        for url in urls.into_iter().flatten() {
            if let Err(e) = self.storage.delete_music_file(url).await {
                warn!(record_id = %record.id, url = %url, error = %e, "Failed to delete music file");
            }
        }
        Ok(true)
    }

    pub async fn cleanup(&self, max_age: Duration) -> Result<CleanupReport> {
        Ok(self.storage.cleanup_old_files(max_age).await?)
    }
}

fn swap_extension(public_url: &str, ext: &str) -> String {
    PathBuf::from(public_url)
        .with_extension(ext)
        .to_string_lossy()
        .to_string()
}
