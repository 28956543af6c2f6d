//! SQLite-backed library of generated tracks.

mod models;
mod schema;
mod store;

pub use models::{
    FolderFilter, LikeOutcome, ListOptions, MusicFolder, MusicPage, MusicRecord, MusicSort,
    MusicStats, MusicUpdate, NewMusicRecord,
};
pub use schema::MUSIC_VERSIONED_SCHEMAS;
pub use store::{MusicStore, SqliteMusicStore};
