//! Bakuage AI Mastering client. Works without a key on the free tier; a key,
//! when present, is sent as a bearer token.

use super::models::{MasteringClient, MasteringInput, MasteringProvider, MasteringSnapshot};
use crate::generation::status::{normalize_status, AI_MASTERING_STATUS_TABLE};
use crate::generation::{JobStatus, SubmittedJob};
use crate::providers::http::{first_key, first_string, join_url, read_json};
use crate::providers::ProviderError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

pub const AI_MASTERING_BASE_URL: &str = "https://api.bakuage.com";

#[derive(Debug, Serialize)]
struct MasteringRequest<'a> {
    input_audio_url: &'a str,
    target_loudness: i32,
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
}

pub struct AiMasteringClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl AiMasteringClient {
    pub fn new(client: Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn snapshot_from_mastering(body: &Value) -> MasteringSnapshot {
    let raw_status = first_key(body, &["status"]).unwrap_or_default();
    match normalize_status(&raw_status, AI_MASTERING_STATUS_TABLE) {
        JobStatus::Completed => {
            match first_string(
                body,
                &["/output_audio_url", "/output_url", "/output/url", "/download_url"],
            ) {
                Some(url) => MasteringSnapshot::completed(url),
                // Finished but the download link is not published yet.
                None => MasteringSnapshot::processing(),
            }
        }
        JobStatus::Failed => MasteringSnapshot::failed(
            first_string(body, &["/failure_reason", "/error/message", "/error"])
                .unwrap_or_else(|| format!("Mastering ended with status {}", raw_status)),
        ),
        _ => MasteringSnapshot::processing(),
    }
}

#[async_trait]
impl MasteringClient for AiMasteringClient {
    fn provider(&self) -> MasteringProvider {
        MasteringProvider::AiMastering
    }

    async fn submit(&self, input: &MasteringInput) -> Result<SubmittedJob, ProviderError> {
        let request = MasteringRequest {
            input_audio_url: &input.audio_url,
            target_loudness: input.intensity.target_lufs(),
            mode: "default",
            title: input.title(),
        };

        debug!(
            intensity = %input.intensity,
            target_lufs = request.target_loudness,
            "Submitting AI Mastering job"
        );

        let response = self
            .authorize(self.client.post(join_url(&self.base_url, "masterings")))
            .json(&request)
            .send()
            .await?;
        let body = read_json(response).await?;

        // Ids come back as numbers.
        let job_id = first_string(&body, &["/id", "/mastering_id"]).ok_or_else(|| {
            ProviderError::InvalidResponse("no mastering id in response".to_string())
        })?;

        info!(job_id = %job_id, "AI Mastering job submitted");
        Ok(SubmittedJob {
            job_id,
            status: JobStatus::Processing,
        })
    }

    async fn check_status(&self, job_id: &str) -> Result<MasteringSnapshot, ProviderError> {
        let url = join_url(
            &self.base_url,
            &format!("masterings/{}", urlencoding::encode(job_id)),
        );
        let response = self.authorize(self.client.get(url)).send().await?;
        let body = read_json(response).await?;
        Ok(snapshot_from_mastering(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mastering::MasteringIntensity;
    use serde_json::json;

    #[test]
    fn test_snapshot_states() {
        let done = json!({"id": 12, "status": "succeeded", "output_audio_url": "https://b/o.wav"});
        assert_eq!(
            snapshot_from_mastering(&done),
            MasteringSnapshot::completed("https://b/o.wav".to_string())
        );

        let failed = json!({"status": "failed", "failure_reason": "clipping"});
        assert_eq!(
            snapshot_from_mastering(&failed).error.as_deref(),
            Some("clipping")
        );

        let waiting = json!({"status": "waiting"});
        assert_eq!(snapshot_from_mastering(&waiting).status, JobStatus::Processing);

        let done_no_url = json!({"status": "succeeded"});
        assert_eq!(
            snapshot_from_mastering(&done_no_url).status,
            JobStatus::Processing
        );
    }

    #[test]
    fn test_request_payload() {
        let mut input = MasteringInput::new("https://x/a.mp3", MasteringIntensity::Hi);
        input.title = Some(" ".to_string());
        let request = MasteringRequest {
            input_audio_url: &input.audio_url,
            target_loudness: input.intensity.target_lufs(),
            mode: "default",
            title: input.title(),
        };
        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["target_loudness"], -8);
        assert!(body.get("title").is_none());
    }
}
