//! Routes generation requests to the configured providers.

use super::models::{CancelOutcome, GenerationResult, MusicGenerationInput, MusicProvider};
use crate::config::ProvidersConfig;
use crate::providers::{
    build_client, CancellationError, FalClient, MusicProviderClient, ProviderError, TaskApiClient,
    FAL_MUSIC_ENDPOINT, FAL_QUEUE_URL, GOAPI_BASE_URL, PIAPI_BASE_URL,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

type MemoKey = (MusicProvider, String);

/// Entry point for generation jobs.
///
/// Holds one client per configured provider. Terminal results are memoized
/// per `(provider, job_id)` so a job that finished stays finished, whatever
/// the provider reports later.
pub struct MusicRouter {
    clients: HashMap<MusicProvider, Arc<dyn MusicProviderClient>>,
    terminal: Mutex<HashMap<MemoKey, GenerationResult>>,
}

impl MusicRouter {
    /// Build the router from resolved provider settings. Providers without
    /// an API key are left out.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        let http = build_client(config.request_timeout)?;
        let mut clients: Vec<Arc<dyn MusicProviderClient>> = Vec::new();

        if let Some(key) = config.goapi.api_key() {
            clients.push(Arc::new(TaskApiClient::new(
                MusicProvider::Suno,
                http.clone(),
                config.goapi.base_url_or(GOAPI_BASE_URL),
                config.task_model.clone(),
                Some(key.to_string()),
            )));
        }
        if let Some(key) = config.piapi.api_key() {
            clients.push(Arc::new(TaskApiClient::new(
                MusicProvider::PiApi,
                http.clone(),
                config.piapi.base_url_or(PIAPI_BASE_URL),
                config.task_model.clone(),
                Some(key.to_string()),
            )));
        }
        if let Some(key) = config.fal.api_key() {
            clients.push(Arc::new(FalClient::new(
                http,
                config.fal.base_url_or(FAL_QUEUE_URL),
                FAL_MUSIC_ENDPOINT,
                Some(key.to_string()),
            )));
        }

        Ok(Self::with_clients(clients))
    }

    pub fn with_clients(clients: Vec<Arc<dyn MusicProviderClient>>) -> Self {
        let clients = clients
            .into_iter()
            .map(|client| (client.provider(), client))
            .collect();
        Self {
            clients,
            terminal: Mutex::new(HashMap::new()),
        }
    }

    /// Configured providers, in preference order.
    pub fn configured_providers(&self) -> Vec<MusicProvider> {
        MusicProvider::PRIORITY
            .into_iter()
            .filter(|p| self.clients.contains_key(p))
            .collect()
    }

    fn memo(&self) -> MutexGuard<'_, HashMap<MemoKey, GenerationResult>> {
        // The map only ever holds complete entries, a poisoned lock is still usable.
        self.terminal.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Keep `result` if it is the first terminal one seen for the job and
    /// return whichever result is kept.
    fn settle(
        &self,
        provider: MusicProvider,
        job_id: &str,
        result: GenerationResult,
    ) -> GenerationResult {
        if !result.status.is_terminal() {
            return result;
        }
        self.memo()
            .entry((provider, job_id.to_string()))
            .or_insert(result)
            .clone()
    }

    fn memoized(&self, provider: MusicProvider, job_id: &str) -> Option<GenerationResult> {
        self.memo().get(&(provider, job_id.to_string())).cloned()
    }

    fn client_for(
        &self,
        requested: Option<MusicProvider>,
    ) -> Result<&Arc<dyn MusicProviderClient>, String> {
        match requested {
            Some(provider) => self.clients.get(&provider).ok_or_else(|| {
                ProviderError::MissingApiKey {
                    provider: provider.as_str(),
                    env_var: provider.api_key_env(),
                }
                .to_string()
            }),
            None => MusicProvider::PRIORITY
                .iter()
                .find_map(|p| self.clients.get(p))
                .ok_or_else(|| {
                    let vars: Vec<&str> = MusicProvider::PRIORITY
                        .iter()
                        .map(|p| p.api_key_env())
                        .collect();
                    format!(
                        "missing API key: no music provider is configured, set one of {}",
                        vars.join(", ")
                    )
                }),
        }
    }

    /// Submit a generation job. Never errors: failures come back as a
    /// `failed` result.
    pub async fn generate(&self, input: &MusicGenerationInput) -> GenerationResult {
        if input.prompt.trim().is_empty()
            && input.user_lyrics().is_none()
            && input.style_tags().is_none()
        {
            return GenerationResult::failed(
                input.provider,
                None,
                "A prompt, style or lyrics are required",
            );
        }

        let client = match self.client_for(input.provider) {
            Ok(client) => client,
            Err(message) => {
                warn!(requested = ?input.provider, %message, "No usable music provider");
                return GenerationResult::failed(input.provider, None, message);
            }
        };
        let provider = client.provider();

        match client.submit(input).await {
            Ok(job) => {
                info!(provider = %provider, job_id = %job.job_id, "Generation submitted");
                GenerationResult::submitted(provider, job)
            }
            Err(e) => {
                warn!(provider = %provider, error = %e, "Generation submission failed");
                GenerationResult::failed(Some(provider), None, e.to_string())
            }
        }
    }

    /// Like [`check_status`](Self::check_status) but hands provider errors
    /// back to the caller, so transient failures can be told apart from a
    /// job that actually failed.
    pub async fn try_check_status(
        &self,
        job_id: &str,
        provider: MusicProvider,
    ) -> Result<GenerationResult, ProviderError> {
        if let Some(result) = self.memoized(provider, job_id) {
            debug!(provider = %provider, job_id = %job_id, "Terminal result served from memo");
            return Ok(result);
        }

        let client = self
            .clients
            .get(&provider)
            .ok_or(ProviderError::MissingApiKey {
                provider: provider.as_str(),
                env_var: provider.api_key_env(),
            })?;

        let snapshot = client.check_status(job_id).await?;
        let result = GenerationResult::from_snapshot(provider, job_id, snapshot);
        if result.status.is_terminal() {
            info!(provider = %provider, job_id = %job_id, status = %result.status, "Generation finished");
        }
        // Another caller may have settled the job first.
        Ok(self.settle(provider, job_id, result))
    }

    /// Current state of a job, never an error.
    ///
    /// A transient provider error reports the job as still processing, with
    /// the error attached. A permanent one fails the job for good, so a
    /// caller never sees a failure that later turns into something else.
    pub async fn check_status(&self, job_id: &str, provider: MusicProvider) -> GenerationResult {
        match self.try_check_status(job_id, provider).await {
            Ok(result) => result,
            Err(e) if e.is_retryable() => {
                warn!(provider = %provider, job_id = %job_id, error = %e, "Status check failed, job still counts as running");
                GenerationResult::still_running(provider, job_id, e.to_string())
            }
            Err(e) => {
                warn!(provider = %provider, job_id = %job_id, error = %e, "Status check failed");
                let failed =
                    GenerationResult::failed(Some(provider), Some(job_id.to_string()), e.to_string());
                self.settle(provider, job_id, failed)
            }
        }
    }

    /// Ask the provider to cancel a job. An acknowledged cancellation marks
    /// the job as failed for later status checks.
    pub async fn cancel(
        &self,
        job_id: &str,
        provider: MusicProvider,
    ) -> Result<CancelOutcome, CancellationError> {
        if let Some(result) = self.memoized(provider, job_id) {
            if result.status.is_terminal() {
                return Ok(CancelOutcome::AlreadyFinished);
            }
        }

        let client = self
            .clients
            .get(&provider)
            .ok_or(ProviderError::MissingApiKey {
                provider: provider.as_str(),
                env_var: provider.api_key_env(),
            })?;

        let outcome = client.cancel(job_id).await?;
        if outcome == CancelOutcome::Acknowledged {
            let cancelled =
                GenerationResult::failed(Some(provider), Some(job_id.to_string()), "Cancelled");
            self.settle(provider, job_id, cancelled);
        }
        Ok(outcome)
    }
}
