//! Types shared by every music generation provider.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized lifecycle of a provider job.
///
/// Every provider vocabulary ("queued", "IN_PROGRESS", "succeeded", ...) is
/// folded into these four states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed, // terminal
    Failed,    // terminal
}

impl JobStatus {
    /// Returns true if this is a terminal state (Completed or Failed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` respects
    /// pending → processing → {completed | failed}.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if *self == next {
            return true;
        }
        match self {
            JobStatus::Pending => next != JobStatus::Pending,
            JobStatus::Processing => next.is_terminal(),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }

    /// Status to keep after observing `next`: `next` when the move is
    /// allowed, otherwise the current one.
    pub fn advance(self, next: JobStatus) -> JobStatus {
        if self.can_transition_to(next) {
            next
        } else {
            self
        }
    }

    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

/// External services able to generate music.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MusicProvider {
    /// Suno through GoAPI's task endpoint.
    Suno,
    /// Udio through PiAPI's task endpoint.
    PiApi,
    /// MiniMax music through the fal.ai queue.
    Fal,
}

impl MusicProvider {
    /// Preference order used when the caller does not pick a provider.
    pub const PRIORITY: [MusicProvider; 3] =
        [MusicProvider::Suno, MusicProvider::PiApi, MusicProvider::Fal];

    pub fn as_str(&self) -> &'static str {
        match self {
            MusicProvider::Suno => "suno",
            MusicProvider::PiApi => "piapi",
            MusicProvider::Fal => "fal",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "suno" | "goapi" => Some(MusicProvider::Suno),
            "piapi" | "udio" => Some(MusicProvider::PiApi),
            "fal" | "minimax" => Some(MusicProvider::Fal),
            _ => None,
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn api_key_env(&self) -> &'static str {
        match self {
            MusicProvider::Suno => "GOAPI_API_KEY",
            MusicProvider::PiApi => "PIAPI_API_KEY",
            MusicProvider::Fal => "FAL_API_KEY",
        }
    }
}

impl fmt::Display for MusicProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pricing tier of a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MusicModel {
    /// Short jingles and loops.
    Short,
    #[default]
    Standard,
    /// Long-form tracks.
    Pro,
}

impl MusicModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MusicModel::Short => "short",
            MusicModel::Standard => "standard",
            MusicModel::Pro => "pro",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "short" => Some(MusicModel::Short),
            "standard" => Some(MusicModel::Standard),
            "pro" => Some(MusicModel::Pro),
            _ => None,
        }
    }
}

/// A caller's generation request, provider independent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MusicGenerationInput {
    /// Free-text description of the song.
    pub prompt: String,
    /// Style tags ("lofi, jazz, mellow").
    pub style: Option<String>,
    pub title: Option<String>,
    /// User supplied lyrics. When present the provider must sing these.
    pub lyrics: Option<String>,
    pub instrumental: bool,
    pub mood: Option<String>,
    pub model: MusicModel,
    pub duration_secs: u32,
    /// Explicit provider choice; `None` lets the router decide.
    pub provider: Option<MusicProvider>,
}

impl MusicGenerationInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            duration_secs: 30,
            ..Default::default()
        }
    }

    /// Lyrics trimmed, or `None` if absent or blank.
    pub fn user_lyrics(&self) -> Option<&str> {
        non_blank(self.lyrics.as_deref())
    }

    /// Style and mood merged into one comma separated tag list.
    pub fn style_tags(&self) -> Option<String> {
        let tags: Vec<&str> = [self.style.as_deref(), self.mood.as_deref()]
            .into_iter()
            .filter_map(non_blank)
            .collect();
        if tags.is_empty() {
            None
        } else {
            Some(tags.join(", "))
        }
    }
}

pub(crate) fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// What a provider reported for one status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    pub status: JobStatus,
    pub audio_urls: Vec<String>,
    pub image_url: Option<String>,
    pub error: Option<String>,
}

impl JobSnapshot {
    pub fn processing() -> Self {
        Self {
            status: JobStatus::Processing,
            audio_urls: Vec::new(),
            image_url: None,
            error: None,
        }
    }

    pub fn completed(audio_urls: Vec<String>, image_url: Option<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            audio_urls,
            image_url,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            audio_urls: Vec::new(),
            image_url: None,
            error: Some(error.into()),
        }
    }
}

/// A job accepted by a provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub job_id: String,
    pub status: JobStatus,
}

/// Outcome of a cancellation the provider accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The provider acknowledged the cancellation request.
    Acknowledged,
    /// The job had already reached a terminal state.
    AlreadyFinished,
}

/// Router level result. Failures are values, not errors: callers branch on
/// `success` / `status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    pub job_id: Option<String>,
    pub provider: Option<MusicProvider>,
    pub status: JobStatus,
    pub audio_urls: Vec<String>,
    pub image_url: Option<String>,
    pub error: Option<String>,
}

impl GenerationResult {
    pub fn failed(
        provider: Option<MusicProvider>,
        job_id: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            job_id,
            provider,
            status: JobStatus::Failed,
            audio_urls: Vec::new(),
            image_url: None,
            error: Some(error.into()),
        }
    }

    /// The job could not be checked right now but may still finish.
    pub fn still_running(
        provider: MusicProvider,
        job_id: &str,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            job_id: Some(job_id.to_string()),
            provider: Some(provider),
            status: JobStatus::Processing,
            audio_urls: Vec::new(),
            image_url: None,
            error: Some(error.into()),
        }
    }

    pub fn submitted(provider: MusicProvider, job: SubmittedJob) -> Self {
        Self {
            success: job.status != JobStatus::Failed,
            job_id: Some(job.job_id),
            provider: Some(provider),
            status: job.status,
            audio_urls: Vec::new(),
            image_url: None,
            error: None,
        }
    }

    pub fn from_snapshot(provider: MusicProvider, job_id: &str, snapshot: JobSnapshot) -> Self {
        let failed = snapshot.status == JobStatus::Failed;
        Self {
            success: !failed,
            job_id: Some(job_id.to_string()),
            provider: Some(provider),
            status: snapshot.status,
            audio_urls: if snapshot.status == JobStatus::Completed {
                snapshot.audio_urls
            } else {
                Vec::new()
            },
            image_url: snapshot.image_url,
            error: if failed {
                Some(
                    snapshot
                        .error
                        .unwrap_or_else(|| "Generation failed".to_string()),
                )
            } else {
                None
            },
        }
    }
}
