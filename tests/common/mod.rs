//! Common test infrastructure
//!
//! Spawns a local mock of the provider APIs and builds routers, mastering
//! services and music services wired to it. Tests should only import from
//! this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::MockProviders;
//!
//! #[tokio::test]
//! async fn test_generate() {
//!     let mock = MockProviders::spawn().await;
//!     let router = mock.router();
//!     // ...
//! }
//! ```

#![allow(dead_code, unused_imports)]

mod fixtures;
mod mock_providers;

pub use fixtures::{fast_polling, TestLibrary};
pub use mock_providers::{
    MockProviders, RecordedRequest, FAL_FINISHED_REQUEST_ID, FAL_KEY, FAL_REQUEST_ID, GOAPI_KEY,
    MASTERING_ID, MP3_BYTES, TASK_ID, WAV_BYTES,
};
