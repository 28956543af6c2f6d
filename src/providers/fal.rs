//! fal.ai queue client for the MiniMax music model.

use super::error::{CancellationError, ProviderError};
use super::http::{extract_error_message, first_key, first_string, join_url, read_json};
use super::MusicProviderClient;
use crate::generation::models::non_blank;
use crate::generation::status::{normalize_status, FAL_STATUS_TABLE};
use crate::generation::{
    CancelOutcome, JobSnapshot, JobStatus, MusicGenerationInput, MusicProvider, SubmittedJob,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use unicode_segmentation::UnicodeSegmentation;

pub const FAL_QUEUE_URL: &str = "https://queue.fal.run";
pub const FAL_MUSIC_ENDPOINT: &str = "fal-ai/minimax-music/v1.5";

pub const PROMPT_MIN_CHARS: usize = 10;
pub const PROMPT_MAX_CHARS: usize = 600;
pub const LYRICS_MIN_CHARS: usize = 10;
pub const LYRICS_MAX_CHARS: usize = 3000;

const INSTRUMENTAL_LYRICS: &str = "[Instrumental]";
const PROMPT_FILLER: &str = " music";
const LYRICS_FILLER: &str = "\nla la la";

/// Pad `text` with `filler` up to `min` graphemes and cut it at `max`.
fn fit_graphemes(text: &str, min: usize, max: usize, filler: &str) -> String {
    let mut fitted = text.trim().to_string();
    if fitted.is_empty() {
        fitted = filler.trim().to_string();
    }
    while fitted.graphemes(true).count() < min {
        fitted.push_str(filler);
    }
    if fitted.graphemes(true).count() > max {
        fitted = fitted.graphemes(true).take(max).collect();
    }
    fitted
}

/// Bound a style prompt to what MiniMax accepts (10 to 600 characters).
pub fn sanitize_prompt(prompt: &str) -> String {
    fit_graphemes(prompt, PROMPT_MIN_CHARS, PROMPT_MAX_CHARS, PROMPT_FILLER)
}

/// Bound lyrics to what MiniMax accepts (10 to 3000 characters).
pub fn sanitize_lyrics(lyrics: &str) -> String {
    fit_graphemes(lyrics, LYRICS_MIN_CHARS, LYRICS_MAX_CHARS, LYRICS_FILLER)
}

#[derive(Debug, Serialize)]
struct FalMusicRequest {
    prompt: String,
    lyrics_prompt: String,
}

impl FalMusicRequest {
    fn from_input(input: &MusicGenerationInput) -> Self {
        let description = non_blank(Some(input.prompt.as_str()));
        let prompt = match (input.style_tags(), description) {
            (Some(tags), Some(description)) => format!("{}. {}", tags, description),
            (Some(tags), None) => tags,
            (None, Some(description)) => description.to_string(),
            (None, None) => String::new(),
        };

        let lyrics = if input.instrumental {
            INSTRUMENTAL_LYRICS.to_string()
        } else {
            input
                .user_lyrics()
                .or(description)
                .unwrap_or(INSTRUMENTAL_LYRICS)
                .to_string()
        };

        Self {
            prompt: sanitize_prompt(&prompt),
            lyrics_prompt: sanitize_lyrics(&lyrics),
        }
    }
}

/// Adapter for fal.ai's queue API.
pub struct FalClient {
    client: Client,
    base_url: String,
    endpoint: String,
    api_key: Option<String>,
}

impl FalClient {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            endpoint: endpoint.into(),
            api_key,
        }
    }

    pub fn with_defaults(client: Client, api_key: Option<String>) -> Self {
        Self::new(client, FAL_QUEUE_URL, FAL_MUSIC_ENDPOINT, api_key)
    }

    fn auth_header(&self) -> Result<String, ProviderError> {
        self.api_key
            .as_deref()
            .map(|key| format!("Key {}", key))
            .ok_or(ProviderError::MissingApiKey {
                provider: MusicProvider::Fal.as_str(),
                env_var: MusicProvider::Fal.api_key_env(),
            })
    }

    /// Queue requests live under the application id (`owner/app`), without
    /// the version suffix of the submit endpoint.
    fn request_url(&self, job_id: &str, suffix: &str) -> String {
        let app: Vec<&str> = self
            .endpoint
            .trim_matches('/')
            .split('/')
            .take(2)
            .collect();
        let path = format!(
            "{}/requests/{}{}",
            app.join("/"),
            urlencoding::encode(job_id),
            suffix
        );
        join_url(&self.base_url, &path)
    }

    async fn fetch_result(&self, job_id: &str, auth: &str) -> Result<JobSnapshot, ProviderError> {
        let response = self
            .client
            .get(self.request_url(job_id, ""))
            .header("Authorization", auth)
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            let message = extract_error_message(&body);
            warn!(job_id = %job_id, status = status.as_u16(), %message, "fal result unavailable");
            return Ok(JobSnapshot::failed(message));
        }

        let body = read_json(response).await?;
        Ok(snapshot_from_result(&body))
    }
}

fn snapshot_from_result(body: &Value) -> JobSnapshot {
    match first_string(body, &["/audio/url", "/audio_url", "/output/audio/url"]) {
        Some(url) => JobSnapshot::completed(vec![url], None),
        None => JobSnapshot::failed("Generation completed without audio output"),
    }
}

#[async_trait]
impl MusicProviderClient for FalClient {
    fn provider(&self) -> MusicProvider {
        MusicProvider::Fal
    }

    async fn submit(&self, input: &MusicGenerationInput) -> Result<SubmittedJob, ProviderError> {
        let auth = self.auth_header()?;
        let request = FalMusicRequest::from_input(input);

        debug!(
            endpoint = %self.endpoint,
            prompt_len = request.prompt.len(),
            lyrics_len = request.lyrics_prompt.len(),
            "Submitting fal music request"
        );

        let response = self
            .client
            .post(join_url(&self.base_url, &self.endpoint))
            .header("Authorization", auth)
            .json(&request)
            .send()
            .await?;
        let body = read_json(response).await?;

        let job_id = first_key(&body, &["request_id"]).ok_or_else(|| {
            ProviderError::InvalidResponse("no request_id in fal response".to_string())
        })?;

        info!(job_id = %job_id, "fal music request queued");

        Ok(SubmittedJob {
            job_id,
            status: JobStatus::Processing,
        })
    }

    async fn check_status(&self, job_id: &str) -> Result<JobSnapshot, ProviderError> {
        let auth = self.auth_header()?;

        debug!(job_id = %job_id, "Checking fal request");

        let response = self
            .client
            .get(self.request_url(job_id, "/status"))
            .header("Authorization", &auth)
            .send()
            .await?;
        let body = read_json(response).await?;

        let raw_status = first_key(&body, &["status"]).unwrap_or_default();
        match normalize_status(&raw_status, FAL_STATUS_TABLE) {
            JobStatus::Completed => {
                // The queue reports errors on a COMPLETED status entry.
                if let Some(error) = first_key(&body, &["error"]) {
                    return Ok(JobSnapshot::failed(error));
                }
                self.fetch_result(job_id, &auth).await
            }
            JobStatus::Failed => Ok(JobSnapshot::failed(
                first_key(&body, &["error"])
                    .unwrap_or_else(|| format!("Request ended with status {}", raw_status)),
            )),
            _ => Ok(JobSnapshot::processing()),
        }
    }

    async fn cancel(&self, job_id: &str) -> Result<CancelOutcome, CancellationError> {
        let auth = self.auth_header()?;

        let response = self
            .client
            .put(self.request_url(job_id, "/cancel"))
            .header("Authorization", auth)
            .send()
            .await
            .map_err(ProviderError::from)?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            info!(job_id = %job_id, "fal request cancellation acknowledged");
            return Ok(CancelOutcome::Acknowledged);
        }

        if status.as_u16() == 400 && body.to_ascii_uppercase().contains("ALREADY_COMPLETED") {
            return Ok(CancelOutcome::AlreadyFinished);
        }

        let message = extract_error_message(&body);
        warn!(job_id = %job_id, status = status.as_u16(), %message, "fal cancellation rejected");
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            }
            .into());
        }
        Err(CancellationError::Rejected(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_short_prompt_is_padded() {
        let prompt = sanitize_prompt("jazzy");
        assert!(prompt.graphemes(true).count() >= PROMPT_MIN_CHARS);
        assert!(prompt.starts_with("jazzy"));

        assert!(sanitize_prompt("").graphemes(true).count() >= PROMPT_MIN_CHARS);
    }

    #[test]
    fn test_long_prompt_is_truncated() {
        let prompt = sanitize_prompt(&"a".repeat(700));
        assert_eq!(prompt.graphemes(true).count(), PROMPT_MAX_CHARS);

        let lyrics = sanitize_lyrics(&"la ".repeat(2000));
        assert!(lyrics.graphemes(true).count() <= LYRICS_MAX_CHARS);
    }

    #[test]
    fn test_truncation_keeps_graphemes_whole() {
        // Family emoji is one grapheme made of several code points.
        let family = "\u{1F468}\u{200D}\u{1F469}\u{200D}\u{1F467}";
        let prompt = sanitize_prompt(&family.repeat(700));
        assert_eq!(prompt.graphemes(true).count(), PROMPT_MAX_CHARS);
        assert!(prompt.graphemes(true).all(|g| g == family));
    }

    #[test]
    fn test_request_combines_style_and_description() {
        let mut input = MusicGenerationInput::new("a song about rain");
        input.style = Some("lofi".to_string());
        let request = FalMusicRequest::from_input(&input);
        assert_eq!(request.prompt, "lofi. a song about rain");
        assert_eq!(request.lyrics_prompt, "a song about rain");

        input.instrumental = true;
        input.lyrics = Some("ignored lyrics".to_string());
        let request = FalMusicRequest::from_input(&input);
        assert_eq!(request.lyrics_prompt, INSTRUMENTAL_LYRICS);
    }

    #[test]
    fn test_request_url_strips_version() {
        let client = FalClient::with_defaults(Client::new(), None);
        assert_eq!(
            client.request_url("abc", "/status"),
            "https://queue.fal.run/fal-ai/minimax-music/requests/abc/status"
        );
    }

    #[test]
    fn test_result_without_audio_fails() {
        assert_eq!(
            snapshot_from_result(&json!({"audio": {"url": "https://fal/x.mp3"}})).audio_urls,
            vec!["https://fal/x.mp3"]
        );
        assert_eq!(
            snapshot_from_result(&json!({"audio": null})).status,
            JobStatus::Failed
        );
    }

    #[tokio::test]
    async fn test_missing_key() {
        let client = FalClient::with_defaults(Client::new(), None);
        let err = client.check_status("abc").await.unwrap_err();
        assert!(err.to_string().contains("FAL_API_KEY"));
    }
}
