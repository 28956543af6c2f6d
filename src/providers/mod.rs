//! HTTP adapters for the music generation providers.
//!
//! Every provider runs asynchronous jobs: a submit call hands back a job id,
//! which is then polled until it reaches a terminal state. The adapters hide
//! each provider's wire format behind [`MusicProviderClient`].

mod error;
mod fal;
pub(crate) mod http;
mod task_api;

pub use error::{CancellationError, ProviderError};
pub use fal::{sanitize_lyrics, sanitize_prompt, FalClient, FAL_MUSIC_ENDPOINT, FAL_QUEUE_URL};
pub use http::build_client;
pub use task_api::{TaskApiClient, DEFAULT_TASK_MODEL, GOAPI_BASE_URL, PIAPI_BASE_URL};

use crate::generation::{
    CancelOutcome, JobSnapshot, MusicGenerationInput, MusicProvider, SubmittedJob,
};
use async_trait::async_trait;

/// A music generation backend.
///
/// Implementations never report `Pending`: once a job was accepted, from
/// `submit` on, it is at least processing.
#[async_trait]
pub trait MusicProviderClient: Send + Sync {
    fn provider(&self) -> MusicProvider;

    /// Submit a new generation job.
    async fn submit(&self, input: &MusicGenerationInput) -> Result<SubmittedJob, ProviderError>;

    /// Ask the provider where `job_id` stands.
    async fn check_status(&self, job_id: &str) -> Result<JobSnapshot, ProviderError>;

    /// Request cancellation of `job_id`.
    async fn cancel(&self, job_id: &str) -> Result<CancelOutcome, CancellationError>;
}
