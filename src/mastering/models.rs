use crate::generation::models::non_blank;
use crate::generation::{JobStatus, SubmittedJob};
use crate::providers::ProviderError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Extra credits charged when mastering through the premium provider.
pub const PREMIUM_SURCHARGE: u32 = 5;

/// How hard the master is pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteringIntensity {
    Lo,
    #[default]
    Med,
    Hi,
}

impl MasteringIntensity {
    /// Integrated loudness target in LUFS.
    pub fn target_lufs(&self) -> i32 {
        match self {
            MasteringIntensity::Lo => -14,
            MasteringIntensity::Med => -11,
            MasteringIntensity::Hi => -8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MasteringIntensity::Lo => "lo",
            MasteringIntensity::Med => "med",
            MasteringIntensity::Hi => "hi",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lo" | "low" => Some(MasteringIntensity::Lo),
            "med" | "medium" => Some(MasteringIntensity::Med),
            "hi" | "high" => Some(MasteringIntensity::Hi),
            _ => None,
        }
    }
}

impl fmt::Display for MasteringIntensity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credits for mastering at `intensity` with the free provider.
pub fn get_mastering_cost(intensity: MasteringIntensity) -> u32 {
    match intensity {
        MasteringIntensity::Lo => 2,
        MasteringIntensity::Med => 3,
        MasteringIntensity::Hi => 5,
    }
}

/// Credits for a mastering request, premium surcharge included.
pub fn total_mastering_cost(intensity: MasteringIntensity, premium: bool) -> u32 {
    get_mastering_cost(intensity) + if premium { PREMIUM_SURCHARGE } else { 0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MasteringProvider {
    /// Bakuage AI Mastering, free tier.
    AiMastering,
    /// LANDR, premium.
    Landr,
}

impl MasteringProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasteringProvider::AiMastering => "ai-mastering",
            MasteringProvider::Landr => "landr",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ai-mastering" | "aimastering" | "bakuage" => Some(MasteringProvider::AiMastering),
            "landr" => Some(MasteringProvider::Landr),
            _ => None,
        }
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            MasteringProvider::AiMastering => "AI_MASTERING_API_KEY",
            MasteringProvider::Landr => "LANDR_API_KEY",
        }
    }

    pub fn is_premium(&self) -> bool {
        matches!(self, MasteringProvider::Landr)
    }
}

impl fmt::Display for MasteringProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasteringInput {
    /// Publicly reachable URL of the track to master.
    pub audio_url: String,
    pub intensity: MasteringIntensity,
    pub title: Option<String>,
}

impl MasteringInput {
    pub fn new(audio_url: impl Into<String>, intensity: MasteringIntensity) -> Self {
        Self {
            audio_url: audio_url.into(),
            intensity,
            title: None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        non_blank(self.title.as_deref())
    }
}

/// Provider view of a mastering job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasteringSnapshot {
    pub status: JobStatus,
    pub mastered_url: Option<String>,
    pub error: Option<String>,
}

impl MasteringSnapshot {
    pub fn processing() -> Self {
        Self {
            status: JobStatus::Processing,
            mastered_url: None,
            error: None,
        }
    }

    pub fn completed(mastered_url: String) -> Self {
        Self {
            status: JobStatus::Completed,
            mastered_url: Some(mastered_url),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            mastered_url: None,
            error: Some(error.into()),
        }
    }
}

/// Service level mastering outcome, mirroring `GenerationResult`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MasteringResult {
    pub success: bool,
    pub job_id: Option<String>,
    pub provider: MasteringProvider,
    pub status: JobStatus,
    pub mastered_url: Option<String>,
    /// Credits charged; only set on submission.
    pub credits: Option<u32>,
    pub error: Option<String>,
}

impl MasteringResult {
    pub fn failed(
        provider: MasteringProvider,
        job_id: Option<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            job_id,
            provider,
            status: JobStatus::Failed,
            mastered_url: None,
            credits: None,
            error: Some(error.into()),
        }
    }

    /// The job could not be checked right now but may still finish.
    pub fn still_running(
        provider: MasteringProvider,
        job_id: &str,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            job_id: Some(job_id.to_string()),
            provider,
            status: JobStatus::Processing,
            mastered_url: None,
            credits: None,
            error: Some(error.into()),
        }
    }

    pub fn submitted(provider: MasteringProvider, job: SubmittedJob, credits: u32) -> Self {
        Self {
            success: true,
            job_id: Some(job.job_id),
            provider,
            status: job.status,
            mastered_url: None,
            credits: Some(credits),
            error: None,
        }
    }

    pub fn from_snapshot(
        provider: MasteringProvider,
        job_id: &str,
        snapshot: MasteringSnapshot,
    ) -> Self {
        match snapshot.status {
            JobStatus::Failed => Self::failed(
                provider,
                Some(job_id.to_string()),
                snapshot
                    .error
                    .unwrap_or_else(|| "Mastering failed".to_string()),
            ),
            status => Self {
                success: true,
                job_id: Some(job_id.to_string()),
                provider,
                status,
                mastered_url: if status == JobStatus::Completed {
                    snapshot.mastered_url
                } else {
                    None
                },
                credits: None,
                error: None,
            },
        }
    }
}

/// A mastering backend.
#[async_trait]
pub trait MasteringClient: Send + Sync {
    fn provider(&self) -> MasteringProvider;

    async fn submit(&self, input: &MasteringInput) -> Result<SubmittedJob, ProviderError>;

    async fn check_status(&self, job_id: &str) -> Result<MasteringSnapshot, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mastering_cost_strictly_increasing() {
        let lo = get_mastering_cost(MasteringIntensity::Lo);
        let med = get_mastering_cost(MasteringIntensity::Med);
        let hi = get_mastering_cost(MasteringIntensity::Hi);
        assert!(lo < med && med < hi);
        assert_eq!(
            total_mastering_cost(MasteringIntensity::Med, true),
            med + PREMIUM_SURCHARGE
        );
    }

    #[test]
    fn test_target_lufs() {
        assert_eq!(MasteringIntensity::Lo.target_lufs(), -14);
        assert_eq!(MasteringIntensity::Med.target_lufs(), -11);
        assert_eq!(MasteringIntensity::Hi.target_lufs(), -8);
    }

    #[test]
    fn test_provider_names() {
        assert_eq!(
            serde_json::to_string(&MasteringProvider::AiMastering).unwrap(),
            "\"ai-mastering\""
        );
        assert_eq!(
            MasteringProvider::from_str("LANDR"),
            Some(MasteringProvider::Landr)
        );
        assert_eq!(
            MasteringIntensity::from_str("high"),
            Some(MasteringIntensity::Hi)
        );
    }

    #[test]
    fn test_url_only_on_completion() {
        let result = MasteringResult::from_snapshot(
            MasteringProvider::Landr,
            "m-1",
            MasteringSnapshot {
                status: JobStatus::Processing,
                mastered_url: Some("https://x/m.wav".to_string()),
                error: None,
            },
        );
        assert!(result.success);
        assert_eq!(result.mastered_url, None);
    }
}
