//! LANDR mastering client (premium, key required).

use super::models::{
    MasteringClient, MasteringInput, MasteringIntensity, MasteringProvider, MasteringSnapshot,
};
use crate::generation::status::{normalize_status, LANDR_STATUS_TABLE};
use crate::generation::{JobStatus, SubmittedJob};
use crate::providers::http::{first_key, first_string, join_url, read_json};
use crate::providers::ProviderError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

pub const LANDR_BASE_URL: &str = "https://api.landr.com/mastering/v1";

#[derive(Debug, Serialize)]
struct TrackRequest<'a> {
    source_url: &'a str,
    intensity: &'static str,
    target_lufs: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

fn landr_intensity(intensity: MasteringIntensity) -> &'static str {
    match intensity {
        MasteringIntensity::Lo => "low",
        MasteringIntensity::Med => "medium",
        MasteringIntensity::Hi => "high",
    }
}

pub struct LandrClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl LandrClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or(ProviderError::MissingApiKey {
            provider: MasteringProvider::Landr.as_str(),
            env_var: MasteringProvider::Landr.api_key_env(),
        })
    }
}

fn snapshot_from_track(body: &Value) -> MasteringSnapshot {
    let raw_status = first_key(body, &["status", "state"]).unwrap_or_default();
    match normalize_status(&raw_status, LANDR_STATUS_TABLE) {
        JobStatus::Completed => match first_string(
            body,
            &["/mastered_url", "/download_url", "/output/url"],
        ) {
            Some(url) => MasteringSnapshot::completed(url),
            None => MasteringSnapshot::failed("Mastering completed without a download URL"),
        },
        JobStatus::Failed => MasteringSnapshot::failed(
            first_string(body, &["/error/message", "/error", "/message"])
                .unwrap_or_else(|| format!("Mastering ended with status {}", raw_status)),
        ),
        _ => MasteringSnapshot::processing(),
    }
}

#[async_trait]
impl MasteringClient for LandrClient {
    fn provider(&self) -> MasteringProvider {
        MasteringProvider::Landr
    }

    async fn submit(&self, input: &MasteringInput) -> Result<SubmittedJob, ProviderError> {
        let api_key = self.api_key()?;
        let request = TrackRequest {
            source_url: &input.audio_url,
            intensity: landr_intensity(input.intensity),
            target_lufs: input.intensity.target_lufs(),
            title: input.title(),
        };

        debug!(intensity = request.intensity, "Submitting LANDR track");

        let response = self
            .client
            .post(join_url(&self.base_url, "tracks"))
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;
        let body = read_json(response).await?;

        let job_id = first_string(&body, &["/id", "/track_id", "/data/id"]).ok_or_else(|| {
            ProviderError::InvalidResponse("no track id in LANDR response".to_string())
        })?;

        info!(job_id = %job_id, "LANDR track submitted");
        Ok(SubmittedJob {
            job_id,
            status: JobStatus::Processing,
        })
    }

    async fn check_status(&self, job_id: &str) -> Result<MasteringSnapshot, ProviderError> {
        let api_key = self.api_key()?;
        let url = join_url(
            &self.base_url,
            &format!("tracks/{}", urlencoding::encode(job_id)),
        );
        let response = self.client.get(url).bearer_auth(api_key).send().await?;
        let body = read_json(response).await?;
        Ok(snapshot_from_track(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_track_snapshot() {
        let done = json!({"id": "t", "status": "DONE", "download_url": "https://l/m.wav"});
        assert_eq!(
            snapshot_from_track(&done).mastered_url.as_deref(),
            Some("https://l/m.wav")
        );

        let rejected = json!({"status": "rejected", "message": "unsupported codec"});
        assert_eq!(
            snapshot_from_track(&rejected).error.as_deref(),
            Some("unsupported codec")
        );

        assert_eq!(
            snapshot_from_track(&json!({"status": "uploading"})).status,
            JobStatus::Processing
        );
    }

    #[tokio::test]
    async fn test_requires_key() {
        let client = LandrClient::new(Client::new(), LANDR_BASE_URL, None);
        let err = client
            .submit(&MasteringInput::new("https://x/a.mp3", MasteringIntensity::Lo))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("LANDR_API_KEY"));
    }
}
