//! Second stage processing: mastering a generated track through Bakuage AI
//! Mastering (free) or LANDR (premium).

mod ai_mastering;
mod landr;
mod models;

pub use ai_mastering::{AiMasteringClient, AI_MASTERING_BASE_URL};
pub use landr::{LandrClient, LANDR_BASE_URL};
pub use models::{
    get_mastering_cost, total_mastering_cost, MasteringClient, MasteringInput,
    MasteringIntensity, MasteringProvider, MasteringResult, MasteringSnapshot, PREMIUM_SURCHARGE,
};

use crate::config::ProvidersConfig;
use crate::providers::{build_client, ProviderError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

type MemoKey = (MasteringProvider, String);

/// Dispatches mastering jobs to the configured backends.
///
/// Like the generation router, the first terminal result per
/// `(provider, job_id)` is kept and returned for every later check.
pub struct MasteringService {
    clients: HashMap<MasteringProvider, Arc<dyn MasteringClient>>,
    terminal: Mutex<HashMap<MemoKey, MasteringResult>>,
}

impl MasteringService {
    /// AI Mastering is always available; LANDR only with a key.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let http = build_client(config.request_timeout)?;
        let mut clients: Vec<Arc<dyn MasteringClient>> = vec![Arc::new(AiMasteringClient::new(
            http.clone(),
            config.ai_mastering.base_url_or(AI_MASTERING_BASE_URL),
            config.ai_mastering.api_key().map(str::to_string),
        ))];
        if let Some(key) = config.landr.api_key() {
            clients.push(Arc::new(LandrClient::new(
                http,
                config.landr.base_url_or(LANDR_BASE_URL),
                Some(key.to_string()),
            )));
        }
        Ok(Self::with_clients(clients))
    }

    pub fn with_clients(clients: Vec<Arc<dyn MasteringClient>>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|client| (client.provider(), client))
                .collect(),
            terminal: Mutex::new(HashMap::new()),
        }
    }

    fn memo(&self) -> MutexGuard<'_, HashMap<MemoKey, MasteringResult>> {
        self.terminal.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Keep `result` if it is the first terminal one seen for the job and
    /// return whichever result is kept.
    fn settle(&self, job_id: &str, result: MasteringResult) -> MasteringResult {
        if !result.status.is_terminal() {
            return result;
        }
        self.memo()
            .entry((result.provider, job_id.to_string()))
            .or_insert(result)
            .clone()
    }

    pub fn is_available(&self, provider: MasteringProvider) -> bool {
        self.clients.contains_key(&provider)
    }

    fn client(
        &self,
        provider: MasteringProvider,
    ) -> Result<&Arc<dyn MasteringClient>, ProviderError> {
        self.clients
            .get(&provider)
            .ok_or(ProviderError::MissingApiKey {
                provider: provider.as_str(),
                env_var: provider.api_key_env(),
            })
    }

    /// Submit `input` for mastering. Premium requests go to LANDR and fail
    /// outright when it is not configured.
    pub async fn master_audio(&self, input: &MasteringInput, use_premium: bool) -> MasteringResult {
        let provider = if use_premium {
            MasteringProvider::Landr
        } else {
            MasteringProvider::AiMastering
        };

        if input.audio_url.trim().is_empty() {
            return MasteringResult::failed(provider, None, "An audio URL is required");
        }

        let client = match self.client(provider) {
            Ok(client) => client,
            Err(e) => {
                warn!(provider = %provider, error = %e, "Mastering provider unavailable");
                return MasteringResult::failed(provider, None, e.to_string());
            }
        };

        match client.submit(input).await {
            Ok(job) => {
                info!(provider = %provider, job_id = %job.job_id, intensity = %input.intensity, "Mastering submitted");
                MasteringResult::submitted(
                    provider,
                    job,
                    total_mastering_cost(input.intensity, use_premium),
                )
            }
            Err(e) => {
                warn!(provider = %provider, error = %e, "Mastering submission failed");
                MasteringResult::failed(provider, None, e.to_string())
            }
        }
    }

    pub async fn try_check_status(
        &self,
        job_id: &str,
        provider: MasteringProvider,
    ) -> Result<MasteringResult, ProviderError> {
        if let Some(result) = self.memo().get(&(provider, job_id.to_string())).cloned() {
            debug!(provider = %provider, job_id = %job_id, "Mastering result served from memo");
            return Ok(result);
        }

        let snapshot = self.client(provider)?.check_status(job_id).await?;
        let result = MasteringResult::from_snapshot(provider, job_id, snapshot);
        if result.status.is_terminal() {
            info!(provider = %provider, job_id = %job_id, status = %result.status, "Mastering finished");
        }
        Ok(self.settle(job_id, result))
    }

    pub async fn check_mastering_status(
        &self,
        job_id: &str,
        provider: MasteringProvider,
    ) -> MasteringResult {
        match self.try_check_status(job_id, provider).await {
            Ok(result) => result,
            Err(e) if e.is_retryable() => {
                warn!(provider = %provider, job_id = %job_id, error = %e, "Mastering status check failed, job still counts as running");
                MasteringResult::still_running(provider, job_id, e.to_string())
            }
            Err(e) => {
                warn!(provider = %provider, job_id = %job_id, error = %e, "Mastering status check failed");
                let failed =
                    MasteringResult::failed(provider, Some(job_id.to_string()), e.to_string());
                self.settle(job_id, failed)
            }
        }
    }
}
