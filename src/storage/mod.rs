//! Local file storage for generated, mastered and rendered audio assets.
//!
//! Everything lives under `{public_dir}/generated-music`, served to clients
//! as `/generated-music/...`.

use reqwest::Client;
use serde::Serialize;
use std::path::{Component, Path, PathBuf};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const MUSIC_DIR: &str = "generated-music";
pub const WAVEFORM_DIR: &str = "waveforms";

const DEFAULT_AUDIO_EXT: &str = "mp3";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Download returned HTTP {0}")]
    Http(u16),

    #[error("Downloaded file is empty")]
    EmptyBody,

    #[error("Downloaded file is not audio ({0})")]
    NotAudio(String),

    #[error("Path is outside of music storage: {0}")]
    InvalidPath(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        StorageError::Download(e.to_string())
    }
}

/// Where an asset goes on disk and how clients reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath {
    pub local_path: PathBuf,
    pub public_url: String,
}

/// An asset that was written to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub local_path: PathBuf,
    pub public_url: String,
    pub file_size: u64,
    pub format: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub scanned: usize,
    pub removed: usize,
    pub bytes_freed: u64,
    pub failures: usize,
}

/// Encode a user id for use as a file name prefix.
///
/// Percent-encodes the id, then swaps `%` for `_` and escapes the few
/// characters that survive percent-encoding but carry meaning in a file
/// name. The result never contains `-` (the name separator), `%` or `/`,
/// and distinct ids always encode differently.
pub fn encode_user_id(user_id: &str) -> String {
    if user_id.is_empty() {
        return "_".to_string();
    }
    let mut encoded = String::with_capacity(user_id.len());
    for c in urlencoding::encode(user_id).chars() {
        match c {
            '%' => encoded.push('_'),
            '_' => encoded.push_str("_5F"),
            '-' => encoded.push_str("_2D"),
            '~' => encoded.push_str("_7E"),
            c => encoded.push(c),
        }
    }
    encoded
}

/// Record ids are uuids; anything else is flattened to `_`.
fn sanitize_record_id(record_id: &str) -> String {
    record_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn sanitize_ext(ext: &str) -> String {
    let ext: String = ext
        .trim()
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    if ext.is_empty() {
        DEFAULT_AUDIO_EXT.to_string()
    } else {
        ext
    }
}

pub struct MusicStorage {
    public_dir: PathBuf,
    client: Client,
}

impl MusicStorage {
    pub fn new(public_dir: impl Into<PathBuf>, client: Client) -> Self {
        Self {
            public_dir: public_dir.into(),
            client,
        }
    }

    pub fn music_dir(&self) -> PathBuf {
        self.public_dir.join(MUSIC_DIR)
    }

    fn path_for(&self, relative: &str) -> StoragePath {
        StoragePath {
            local_path: self.music_dir().join(relative),
            public_url: format!("/{}/{}", MUSIC_DIR, relative),
        }
    }

    /// Fresh, unique path for a generated track.
    pub fn generate_music_path(&self, user_id: &str, ext: &str) -> StoragePath {
        self.path_for(&format!(
            "{}-{}.{}",
            encode_user_id(user_id),
            uuid::Uuid::new_v4(),
            sanitize_ext(ext)
        ))
    }

    /// Deterministic path for the mastered version of a record. Mastering
    /// the same record again overwrites it.
    pub fn mastered_music_path(&self, user_id: &str, record_id: &str, ext: &str) -> StoragePath {
        self.path_for(&format!(
            "{}-{}-mastered.{}",
            encode_user_id(user_id),
            sanitize_record_id(record_id),
            sanitize_ext(ext)
        ))
    }

    pub fn waveform_path(&self, user_id: &str, record_id: &str) -> StoragePath {
        self.path_for(&format!(
            "{}/{}-{}-waveform.png",
            WAVEFORM_DIR,
            encode_user_id(user_id),
            sanitize_record_id(record_id)
        ))
    }

    /// Map a public URL back to its file, refusing anything that would
    /// escape the music directory.
    pub fn local_path_for_url(&self, public_url: &str) -> Result<PathBuf, StorageError> {
        let prefix = format!("/{}/", MUSIC_DIR);
        let relative = public_url
            .strip_prefix(&prefix)
            .ok_or_else(|| StorageError::InvalidPath(public_url.to_string()))?;

        let relative_path = Path::new(relative);
        let only_normal = relative_path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if relative.is_empty() || !only_normal {
            return Err(StorageError::InvalidPath(public_url.to_string()));
        }
        Ok(self.music_dir().join(relative_path))
    }

    async fn fetch_audio(&self, url: &str) -> Result<Vec<u8>, StorageError> {
        debug!(url = %url, "Downloading audio");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Http(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }

    /// Detected audio extension for `bytes`. Unknown content is accepted,
    /// recognizable non-audio content is not.
    fn audio_extension(bytes: &[u8]) -> Result<Option<&'static str>, StorageError> {
        if bytes.is_empty() {
            return Err(StorageError::EmptyBody);
        }
        match infer::get(bytes) {
            Some(kind) if kind.mime_type().starts_with("audio/") => Ok(Some(kind.extension())),
            Some(kind) => Err(StorageError::NotAudio(kind.mime_type().to_string())),
            None => Ok(None),
        }
    }

    pub(crate) async fn write_asset(
        &self,
        target: StoragePath,
        bytes: &[u8],
        format: String,
    ) -> Result<StoredFile, StorageError> {
        if let Some(parent) = target.local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target.local_path, bytes).await?;
        info!(path = %target.local_path.display(), bytes = bytes.len(), "Stored audio file");
        Ok(StoredFile {
            local_path: target.local_path,
            public_url: target.public_url,
            file_size: bytes.len() as u64,
            format,
        })
    }

    /// Download a generated track into a fresh file. `format` wins over the
    /// sniffed type when given.
    pub async fn download_and_save_music(
        &self,
        url: &str,
        user_id: &str,
        format: Option<&str>,
    ) -> Result<StoredFile, StorageError> {
        let bytes = self.fetch_audio(url).await?;
        let detected = Self::audio_extension(&bytes)?;
        let ext = sanitize_ext(format.or(detected).unwrap_or(DEFAULT_AUDIO_EXT));
        let target = self.generate_music_path(user_id, &ext);
        self.write_asset(target, &bytes, ext).await
    }

    /// Download a mastered track to the record's deterministic path.
    pub async fn download_and_save_mastered(
        &self,
        url: &str,
        user_id: &str,
        record_id: &str,
    ) -> Result<StoredFile, StorageError> {
        let bytes = self.fetch_audio(url).await?;
        let ext = sanitize_ext(Self::audio_extension(&bytes)?.unwrap_or("wav"));
        let target = self.mastered_music_path(user_id, record_id, &ext);
        self.write_asset(target, &bytes, ext).await
    }

    /// Delete the file behind `public_url`. Returns false if it was already
    /// gone.
    pub async fn delete_music_file(&self, public_url: &str) -> Result<bool, StorageError> {
        let path = self.local_path_for_url(public_url)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted music file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn file_size(&self, path: &Path) -> Result<u64, StorageError> {
        Ok(tokio::fs::metadata(path).await?.len())
    }

    /// Remove every stored file whose modification time is at least
    /// `max_age` old.
    pub async fn cleanup_old_files(&self, max_age: Duration) -> Result<CleanupReport, StorageError> {
        let root = self.music_dir();
        let report = tokio::task::spawn_blocking(move || cleanup_dir(&root, max_age))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        info!(
            scanned = report.scanned,
            removed = report.removed,
            bytes_freed = report.bytes_freed,
            "Storage cleanup finished"
        );
        Ok(report)
    }

    /// Bytes stored on disk for `user_id`, waveforms included. Encoded ids
    /// never contain `-`, so the prefix cannot match another user's files.
    pub async fn user_storage_usage(&self, user_id: &str) -> Result<u64, StorageError> {
        let root = self.music_dir();
        let prefix = format!("{}-", encode_user_id(user_id));
        let total = tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .max_depth(2)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
                .filter_map(|e| e.metadata().ok())
                .map(|m| m.len())
                .sum::<u64>()
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e)))?;
        Ok(total)
    }
}

fn cleanup_dir(root: &Path, max_age: Duration) -> CleanupReport {
    let mut report = CleanupReport::default();
    if !root.exists() {
        return report;
    }
    let now = SystemTime::now();

    for entry in WalkDir::new(root)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        report.scanned += 1;
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .unwrap_or_default();
        if age < max_age {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => {
                report.removed += 1;
                report.bytes_freed += metadata.len();
            }
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "Failed to remove old file");
                report.failures += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MP3_BYTES: &[u8] = b"ID3\x04\x00\x00\x00\x00\x00\x00fake mp3 payload";

    fn storage() -> (TempDir, MusicStorage) {
        let dir = TempDir::new().unwrap();
        let storage = MusicStorage::new(dir.path(), Client::new());
        (dir, storage)
    }

    #[test]
    fn test_generated_path_layout() {
        let (_dir, storage) = storage();
        let path = storage.generate_music_path("user123", "mp3");

        assert!(path.public_url.starts_with("/generated-music/"));
        let name = path.local_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.contains("user123"));
        assert!(name.ends_with(".mp3"));
        assert_eq!(storage.local_path_for_url(&path.public_url).unwrap(), path.local_path);

        let other = storage.generate_music_path("user123", "mp3");
        assert_ne!(path, other);
    }

    #[test]
    fn test_mastered_and_waveform_paths_are_deterministic() {
        let (_dir, storage) = storage();
        assert_eq!(
            storage.mastered_music_path("u", "r1", "wav"),
            storage.mastered_music_path("u", "r1", "wav")
        );
        let waveform = storage.waveform_path("u", "r1");
        assert_eq!(
            waveform.public_url,
            "/generated-music/waveforms/u-r1-waveform.png"
        );
    }

    #[test]
    fn test_record_ids_keep_their_dashes() {
        let (_dir, storage) = storage();
        let record_id = "0f8fad5b-d9cb-469f-a165-70867728950e";

        let mastered = storage.mastered_music_path("u1", record_id, "wav");
        assert_eq!(
            mastered.public_url,
            format!("/generated-music/u1-{}-mastered.wav", record_id)
        );
        let waveform = storage.waveform_path("u1", record_id);
        assert!(waveform
            .public_url
            .ends_with(&format!("/u1-{}-waveform.png", record_id)));
    }

    #[tokio::test]
    async fn test_usage_does_not_mix_similar_user_ids() {
        let (_dir, storage) = storage();
        for (user, bytes) in [("a", 1usize), ("a-b", 10), ("a_b", 100)] {
            let target = storage.generate_music_path(user, "mp3");
            storage
                .write_asset(target, &vec![0u8; bytes], "mp3".to_string())
                .await
                .unwrap();
        }

        assert_eq!(storage.user_storage_usage("a").await.unwrap(), 1);
        assert_eq!(storage.user_storage_usage("a-b").await.unwrap(), 10);
        assert_eq!(storage.user_storage_usage("a_b").await.unwrap(), 100);
    }

    #[test]
    fn test_user_ids_are_encoded() {
        assert_eq!(encode_user_id("user123"), "user123");
        assert_eq!(encode_user_id("user@example.com"), "user_40example.com");
        assert_eq!(encode_user_id("../../etc"), ".._2F.._2Fetc");
        assert_eq!(encode_user_id(""), "_");
        assert_eq!(encode_user_id("a-b"), "a_2Db");
        assert_eq!(encode_user_id("a_b"), "a_5Fb");
        for id in ["a-b", "a_b", "a b", "a/b", "a~b", "a%2Db"] {
            let encoded = encode_user_id(id);
            assert!(!encoded.contains(['-', '/', '%']), "{} -> {}", id, encoded);
        }
        assert_ne!(encode_user_id("a-b"), encode_user_id("a_b"));
        assert_eq!(sanitize_record_id("0b7e-41aa"), "0b7e-41aa");
        assert_eq!(sanitize_record_id("../x"), "___x");
        assert_eq!(sanitize_ext(".MP3"), "mp3");
        assert_eq!(sanitize_ext(""), "mp3");
    }

    #[test]
    fn test_url_traversal_is_rejected() {
        let (_dir, storage) = storage();
        for url in [
            "/generated-music/../secret",
            "/other/file.mp3",
            "/generated-music/",
            "generated-music/a.mp3",
        ] {
            assert!(matches!(
                storage.local_path_for_url(url),
                Err(StorageError::InvalidPath(_))
            ));
        }
    }

    #[test]
    fn test_audio_sniffing() {
        assert_eq!(MusicStorage::audio_extension(MP3_BYTES).unwrap(), Some("mp3"));
        assert_eq!(MusicStorage::audio_extension(b"just some bytes").unwrap(), None);
        assert!(matches!(
            MusicStorage::audio_extension(b""),
            Err(StorageError::EmptyBody)
        ));
        let png = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDR";
        assert!(matches!(
            MusicStorage::audio_extension(png),
            Err(StorageError::NotAudio(_))
        ));
    }

    #[tokio::test]
    async fn test_write_delete_and_usage() {
        let (_dir, storage) = storage();
        let target = storage.generate_music_path("alice", "mp3");
        let stored = storage
            .write_asset(target, MP3_BYTES, "mp3".to_string())
            .await
            .unwrap();
        assert_eq!(stored.file_size, MP3_BYTES.len() as u64);
        assert_eq!(
            storage.file_size(&stored.local_path).await.unwrap(),
            MP3_BYTES.len() as u64
        );

        let waveform = storage.waveform_path("alice", "r1");
        storage
            .write_asset(waveform, b"png", "png".to_string())
            .await
            .unwrap();
        let bob = storage.generate_music_path("bob", "mp3");
        storage
            .write_asset(bob, b"bob audio", "mp3".to_string())
            .await
            .unwrap();

        assert_eq!(
            storage.user_storage_usage("alice").await.unwrap(),
            MP3_BYTES.len() as u64 + 3
        );

        assert!(storage.delete_music_file(&stored.public_url).await.unwrap());
        assert!(!storage.delete_music_file(&stored.public_url).await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_respects_age() {
        let (_dir, storage) = storage();
        let target = storage.generate_music_path("alice", "mp3");
        let stored = storage
            .write_asset(target, MP3_BYTES, "mp3".to_string())
            .await
            .unwrap();

        let report = storage
            .cleanup_old_files(Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.removed, 0);
        assert!(stored.local_path.exists());

        let report = storage.cleanup_old_files(Duration::ZERO).await.unwrap();
        assert_eq!(report.removed, 1);
        assert_eq!(report.bytes_freed, MP3_BYTES.len() as u64);
        assert!(!stored.local_path.exists());
    }

    #[tokio::test]
    async fn test_cleanup_of_missing_dir_is_empty() {
        let (_dir, storage) = storage();
        let report = storage.cleanup_old_files(Duration::ZERO).await.unwrap();
        assert_eq!(report, CleanupReport::default());
    }
}
