//! Client for the GoAPI (Suno) and PiAPI (Udio) task endpoints.
//!
//! Both services expose the same "unified task" API: `POST /api/v1/task`
//! creates a job, `GET /api/v1/task/{id}` reports on it.

use super::error::{CancellationError, ProviderError};
use super::http::{first_key, first_string, join_url, read_json};
use super::MusicProviderClient;
use crate::generation::status::{normalize_status, TASK_API_STATUS_TABLE};
use crate::generation::{
    CancelOutcome, JobSnapshot, JobStatus, MusicGenerationInput, MusicProvider, SubmittedJob,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

pub const GOAPI_BASE_URL: &str = "https://api.goapi.ai";
pub const PIAPI_BASE_URL: &str = "https://api.piapi.ai";
pub const DEFAULT_TASK_MODEL: &str = "music-u";

const TASK_TYPE: &str = "generate_music";

const TASK_ERROR_POINTERS: &[&str] = &[
    "/data/error/message",
    "/data/error/raw_message",
    "/message",
];

/// How the provider should treat lyrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum LyricsType {
    Instrumental,
    /// Sing the lyrics the user supplied.
    User,
    /// Let the provider write lyrics from the description.
    Generate,
}

#[derive(Debug, Serialize)]
struct TaskRequest<'a> {
    model: &'a str,
    task_type: &'static str,
    input: TaskInput,
}

#[derive(Debug, Serialize)]
struct TaskInput {
    #[serde(rename = "prompt", skip_serializing_if = "Option::is_none")]
    style_tags: Option<String>,
    #[serde(
        rename = "gpt_description_prompt",
        skip_serializing_if = "Option::is_none"
    )]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lyrics: Option<String>,
    lyrics_type: LyricsType,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

impl TaskInput {
    fn from_input(input: &MusicGenerationInput) -> Self {
        let style_tags = input.style_tags();
        let title = input.title.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let description = Some(input.prompt.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        if input.instrumental {
            return Self {
                description: description.or_else(|| style_tags.clone()),
                style_tags,
                lyrics: None,
                lyrics_type: LyricsType::Instrumental,
                title: title.map(str::to_string),
            };
        }

        match input.user_lyrics() {
            Some(lyrics) => Self {
                style_tags: style_tags.or(description),
                description: None,
                lyrics: Some(lyrics.to_string()),
                lyrics_type: LyricsType::User,
                title: title.map(str::to_string),
            },
            None => Self {
                style_tags,
                description,
                lyrics: None,
                lyrics_type: LyricsType::Generate,
                title: title.map(str::to_string),
            },
        }
    }
}

/// Adapter for one of the task-API providers.
pub struct TaskApiClient {
    provider: MusicProvider,
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl TaskApiClient {
    pub fn new(
        provider: MusicProvider,
        client: Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            provider,
            client,
            base_url: base_url.into(),
            model: model.into(),
            api_key,
        }
    }

    /// GoAPI's Suno endpoint with default settings.
    pub fn goapi(client: Client, api_key: Option<String>) -> Self {
        Self::new(
            MusicProvider::Suno,
            client,
            GOAPI_BASE_URL,
            DEFAULT_TASK_MODEL,
            api_key,
        )
    }

    /// PiAPI's Udio endpoint with default settings.
    pub fn piapi(client: Client, api_key: Option<String>) -> Self {
        Self::new(
            MusicProvider::PiApi,
            client,
            PIAPI_BASE_URL,
            DEFAULT_TASK_MODEL,
            api_key,
        )
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or(ProviderError::MissingApiKey {
                provider: self.provider.as_str(),
                env_var: self.provider.api_key_env(),
            })
    }

    fn task_url(&self) -> String {
        join_url(&self.base_url, "api/v1/task")
    }
}

#[async_trait]
impl MusicProviderClient for TaskApiClient {
    fn provider(&self) -> MusicProvider {
        self.provider
    }

    async fn submit(&self, input: &MusicGenerationInput) -> Result<SubmittedJob, ProviderError> {
        let api_key = self.api_key()?;
        let request = TaskRequest {
            model: &self.model,
            task_type: TASK_TYPE,
            input: TaskInput::from_input(input),
        };

        debug!(
            provider = %self.provider,
            model = %self.model,
            lyrics_type = ?request.input.lyrics_type,
            "Submitting music task"
        );

        let response = self
            .client
            .post(self.task_url())
            .header("X-API-Key", api_key)
            .json(&request)
            .send()
            .await?;
        let body = read_json(response).await?;

        let data = body.get("data").unwrap_or(&body);
        let raw_status = first_key(data, &["status"]).unwrap_or_default();
        if normalize_status(&raw_status, TASK_API_STATUS_TABLE) == JobStatus::Failed {
            let message = first_string(&body, TASK_ERROR_POINTERS)
                .unwrap_or_else(|| format!("task rejected with status {}", raw_status));
            warn!(provider = %self.provider, %message, "Provider rejected music task");
            return Err(ProviderError::InvalidRequest(message));
        }

        let job_id = first_string(&body, &["/data/task_id", "/task_id"]).ok_or_else(|| {
            let message = first_string(&body, TASK_ERROR_POINTERS)
                .unwrap_or_else(|| "no task_id in response".to_string());
            ProviderError::InvalidResponse(message)
        })?;

        info!(provider = %self.provider, job_id = %job_id, "Music task submitted");

        Ok(SubmittedJob {
            job_id,
            status: JobStatus::Processing,
        })
    }

    async fn check_status(&self, job_id: &str) -> Result<JobSnapshot, ProviderError> {
        let api_key = self.api_key()?;
        let url = join_url(&self.task_url(), &urlencoding::encode(job_id));

        debug!(provider = %self.provider, job_id = %job_id, "Checking music task");

        let response = self
            .client
            .get(&url)
            .header("X-API-Key", api_key)
            .send()
            .await?;
        let body = read_json(response).await?;
        Ok(snapshot_from_task(&body))
    }

    async fn cancel(&self, _job_id: &str) -> Result<CancelOutcome, CancellationError> {
        Err(CancellationError::Unsupported(self.provider.as_str()))
    }
}

/// Interpret a task payload. A "completed" task without any audio is still
/// treated as processing; the provider sometimes flips status before the
/// files are attached.
fn snapshot_from_task(body: &Value) -> JobSnapshot {
    let data = body.get("data").unwrap_or(body);
    let raw_status = first_key(data, &["status"]).unwrap_or_default();

    match normalize_status(&raw_status, TASK_API_STATUS_TABLE) {
        JobStatus::Failed => JobSnapshot::failed(
            first_string(body, TASK_ERROR_POINTERS)
                .unwrap_or_else(|| format!("Task ended with status {}", raw_status)),
        ),
        JobStatus::Completed => {
            let output = data.get("output").unwrap_or(&Value::Null);
            let audio_urls = extract_audio_urls(output);
            if audio_urls.is_empty() {
                debug!(status = %raw_status, "Task reported done without audio");
                JobSnapshot::processing()
            } else {
                JobSnapshot::completed(audio_urls, extract_image_url(output))
            }
        }
        _ => JobSnapshot::processing(),
    }
}

/// Collect clip objects from `output.clips`, which is either an array or a
/// map keyed by clip id.
fn clip_values(output: &Value) -> Vec<&Value> {
    match output.get("clips") {
        Some(Value::Array(clips)) => clips.iter().collect(),
        Some(Value::Object(clips)) => clips.values().collect(),
        _ => Vec::new(),
    }
}

fn song_values(output: &Value) -> Vec<&Value> {
    output
        .get("songs")
        .and_then(Value::as_array)
        .map(|songs| songs.iter().collect())
        .unwrap_or_default()
}

fn extract_audio_urls(output: &Value) -> Vec<String> {
    let mut urls: Vec<String> = song_values(output)
        .into_iter()
        .filter_map(|song| first_key(song, &["song_path", "audio_url"]))
        .collect();

    if urls.is_empty() {
        urls = clip_values(output)
            .into_iter()
            .filter_map(|clip| first_key(clip, &["audio_url"]))
            .collect();
    }

    if urls.is_empty() {
        urls.extend(first_key(output, &["audio_url", "song_path"]));
    }

    urls.dedup();
    urls
}

fn extract_image_url(output: &Value) -> Option<String> {
    const IMAGE_KEYS: &[&str] = &["image_path", "image_url"];
    song_values(output)
        .into_iter()
        .chain(clip_values(output))
        .find_map(|item| first_key(item, IMAGE_KEYS))
        .or_else(|| first_key(output, IMAGE_KEYS))
}
