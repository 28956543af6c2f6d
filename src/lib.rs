//! AI music generation orchestration library
//!
//! Routes generation requests to GoAPI (Suno), PiAPI (Udio) or fal.ai
//! (MiniMax), masters finished tracks, stores the audio and keeps a SQLite
//! library of everything generated.

pub mod config;
pub mod conversion;
pub mod generation;
pub mod mastering;
pub mod music_store;
pub mod providers;
pub mod service;
pub mod sqlite_persistence;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{AppConfig, CliConfig, FileConfig};
pub use generation::{GenerationResult, JobStatus, MusicGenerationInput, MusicProvider, MusicRouter};
pub use music_store::{MusicStore, SqliteMusicStore};
pub use service::{GenerationOutcome, MusicService};
