//! Test fixtures: an isolated music library wired to the mock providers.

use super::mock_providers::MockProviders;
use ai_music_orchestrator::conversion::AudioConverter;
use ai_music_orchestrator::generation::PollPolicy;
use ai_music_orchestrator::storage::MusicStorage;
use ai_music_orchestrator::{MusicService, SqliteMusicStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Polling that finishes within milliseconds.
pub fn fast_polling() -> PollPolicy {
    PollPolicy {
        initial_interval: Duration::from_millis(5),
        max_interval: Duration::from_millis(20),
        multiplier: 2.0,
        max_attempts: 10,
        max_consecutive_errors: 3,
    }
}

/// A `MusicService` with its own database and public directory.
pub struct TestLibrary {
    pub service: MusicService,
    pub public_dir: PathBuf,
    _temp_dir: TempDir,
}

impl TestLibrary {
    pub fn new(mock: &MockProviders) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let public_dir = temp_dir.path().join("public");
        let store = SqliteMusicStore::new(temp_dir.path().join("music.db"))
            .expect("Failed to open music store");

        let service = MusicService::new(
            mock.router(),
            mock.mastering(),
            MusicStorage::new(&public_dir, reqwest::Client::new()),
            AudioConverter::default(),
            Arc::new(store),
        );

        Self {
            service,
            public_dir,
            _temp_dir: temp_dir,
        }
    }
}
