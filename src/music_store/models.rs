use crate::generation::{JobStatus, MusicModel, MusicProvider};
use crate::mastering::{MasteringIntensity, MasteringProvider};
use serde::Serialize;

/// A generated track as persisted in `generated_music`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MusicRecord {
    pub id: String,
    pub user_id: String,
    /// Provider job id, once the provider accepted the request.
    pub job_id: Option<String>,
    pub provider: MusicProvider,
    pub status: JobStatus,
    pub title: Option<String>,
    pub prompt: String,
    pub style: Option<String>,
    pub mood: Option<String>,
    pub lyrics: Option<String>,
    pub model: MusicModel,
    pub duration_secs: u32,
    pub instrumental: bool,
    /// Remote URL reported by the provider.
    pub audio_url: Option<String>,
    pub image_url: Option<String>,
    pub local_path: Option<String>,
    pub public_url: Option<String>,
    pub file_size: Option<u64>,
    pub format: Option<String>,
    pub credits_used: u32,
    pub error: Option<String>,
    pub mastering_status: Option<JobStatus>,
    pub mastering_job_id: Option<String>,
    pub mastering_provider: Option<MasteringProvider>,
    pub mastering_intensity: Option<MasteringIntensity>,
    pub mastered_path: Option<String>,
    pub mastered_url: Option<String>,
    /// Why the last mastering job failed.
    pub mastering_error: Option<String>,
    pub waveform_url: Option<String>,
    pub likes: u32,
    pub plays: u32,
    pub views: u32,
    pub folder_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl MusicRecord {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.prompt)
    }
}

/// Values needed to create a record for an accepted request.
#[derive(Debug, Clone)]
pub struct NewMusicRecord {
    pub user_id: String,
    pub job_id: Option<String>,
    pub provider: MusicProvider,
    pub title: Option<String>,
    pub prompt: String,
    pub style: Option<String>,
    pub mood: Option<String>,
    pub lyrics: Option<String>,
    pub model: MusicModel,
    pub duration_secs: u32,
    pub instrumental: bool,
    pub credits_used: u32,
}

/// Partial update: every `Some` field is written, `None` leaves the column
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct MusicUpdate {
    pub status: Option<JobStatus>,
    pub title: Option<String>,
    pub audio_url: Option<String>,
    pub image_url: Option<String>,
    pub local_path: Option<String>,
    pub public_url: Option<String>,
    pub file_size: Option<u64>,
    pub format: Option<String>,
    pub error: Option<String>,
    pub mastering_status: Option<JobStatus>,
    pub mastering_job_id: Option<String>,
    pub mastering_provider: Option<MasteringProvider>,
    pub mastering_intensity: Option<MasteringIntensity>,
    pub mastered_path: Option<String>,
    pub mastered_url: Option<String>,
    pub mastering_error: Option<String>,
    pub waveform_url: Option<String>,
}

impl MusicUpdate {
    pub fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.title.is_none()
            && self.audio_url.is_none()
            && self.image_url.is_none()
            && self.local_path.is_none()
            && self.public_url.is_none()
            && self.file_size.is_none()
            && self.format.is_none()
            && self.error.is_none()
            && self.mastering_status.is_none()
            && self.mastering_job_id.is_none()
            && self.mastering_provider.is_none()
            && self.mastering_intensity.is_none()
            && self.mastered_path.is_none()
            && self.mastered_url.is_none()
            && self.mastering_error.is_none()
            && self.waveform_url.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FolderFilter {
    #[default]
    Any,
    /// Records not in any folder.
    Unfiled,
    Folder(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MusicSort {
    #[default]
    Newest,
    Oldest,
    MostLiked,
    MostPlayed,
    Title,
}

impl MusicSort {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "newest" => Some(MusicSort::Newest),
            "oldest" => Some(MusicSort::Oldest),
            "most_liked" | "likes" => Some(MusicSort::MostLiked),
            "most_played" | "plays" => Some(MusicSort::MostPlayed),
            "title" => Some(MusicSort::Title),
            _ => None,
        }
    }

    pub(crate) fn order_by(&self) -> &'static str {
        match self {
            MusicSort::Newest => "created_at DESC, id ASC",
            MusicSort::Oldest => "created_at ASC, id ASC",
            MusicSort::MostLiked => "likes DESC, created_at DESC, id ASC",
            MusicSort::MostPlayed => "plays DESC, created_at DESC, id ASC",
            MusicSort::Title => "COALESCE(title, prompt) COLLATE NOCASE ASC, id ASC",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub user_id: Option<String>,
    pub status: Option<JobStatus>,
    pub folder: FolderFilter,
    /// Case-insensitive match over title, prompt, style and mood.
    pub search: Option<String>,
    pub sort: MusicSort,
    pub limit: usize,
    pub offset: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            user_id: None,
            status: None,
            folder: FolderFilter::Any,
            search: None,
            sort: MusicSort::Newest,
            limit: 20,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MusicPage {
    pub items: Vec<MusicRecord>,
    /// Matching records ignoring limit and offset.
    pub total: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LikeOutcome {
    /// Whether the user likes the record after the toggle.
    pub liked: bool,
    pub likes: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MusicStats {
    pub total_tracks: u64,
    pub completed: u64,
    pub failed: u64,
    pub in_progress: u64,
    pub mastered: u64,
    pub total_plays: u64,
    pub total_views: u64,
    pub total_likes: u64,
    pub credits_used: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MusicFolder {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub created_at: i64,
    pub track_count: u64,
}
