//! Provider independent music generation: shared types, status
//! normalization, pricing, routing and polling.

pub mod cost;
pub mod models;
mod poller;
pub(crate) mod router;
pub mod status;

pub use cost::{calculate_music_cost, model_pricing, ModelPricing};
pub use models::{
    CancelOutcome, GenerationResult, JobSnapshot, JobStatus, MusicGenerationInput, MusicModel,
    MusicProvider, SubmittedJob,
};
pub use poller::{poll_until, poll_until_terminal, PollError, PollPolicy};
pub use router::MusicRouter;
