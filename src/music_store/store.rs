use super::models::{
    FolderFilter, LikeOutcome, ListOptions, MusicFolder, MusicPage, MusicRecord, MusicStats,
    MusicUpdate, NewMusicRecord,
};
use super::schema::MUSIC_VERSIONED_SCHEMAS;
use crate::generation::{JobStatus, MusicModel, MusicProvider};
use crate::mastering::{MasteringIntensity, MasteringProvider};
use crate::sqlite_persistence::open_versioned;
use anyhow::{anyhow, bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Persistence of generated tracks, their likes and folders.
pub trait MusicStore: Send + Sync {
    fn create_music(&self, record: NewMusicRecord) -> Result<MusicRecord>;

    /// Apply a partial update. Status changes must follow
    /// pending → processing → {completed | failed}.
    fn update_music(&self, id: &str, update: &MusicUpdate) -> Result<MusicRecord>;

    fn get_music(&self, id: &str) -> Result<Option<MusicRecord>>;

    /// Look a record up by its generation or mastering job id.
    fn get_music_by_job_id(&self, job_id: &str) -> Result<Option<MusicRecord>>;

    fn list_music(&self, options: &ListOptions) -> Result<MusicPage>;

    /// Toggle `user_id`'s like on a record.
    fn like_music(&self, id: &str, user_id: &str) -> Result<LikeOutcome>;

    fn get_liked_by(&self, id: &str) -> Result<Vec<String>>;

    fn increment_plays(&self, id: &str) -> Result<u32>;

    fn increment_views(&self, id: &str) -> Result<u32>;

    /// Move a record into `folder_id`, or out of any folder with `None`.
    fn move_to_folder(&self, id: &str, folder_id: Option<&str>) -> Result<()>;

    fn get_user_stats(&self, user_id: &str) -> Result<MusicStats>;

    /// Delete a record, returning it so the caller can remove its files.
    fn delete_music(&self, id: &str) -> Result<Option<MusicRecord>>;

    fn create_folder(&self, user_id: &str, name: &str) -> Result<MusicFolder>;

    fn list_folders(&self, user_id: &str) -> Result<Vec<MusicFolder>>;

    /// Delete a folder. Its records stay, detached from any folder.
    fn delete_folder(&self, id: &str) -> Result<bool>;
}

/// SQL assignments collected for an UPDATE.
#[derive(Default)]
struct Assignments {
    sets: Vec<String>,
    values: Vec<Box<dyn ToSql>>,
}

impl Assignments {
    fn push<T: ToSql + 'static>(&mut self, column: &str, value: T) {
        self.values.push(Box::new(value));
        self.sets.push(format!("{} = ?{}", column, self.values.len()));
    }

    fn push_opt<T: ToSql + Clone + 'static>(&mut self, column: &str, value: &Option<T>) {
        if let Some(value) = value {
            self.push(column, value.clone());
        }
    }
}

fn invalid_column(column: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("invalid {} '{}'", column, value).into(),
    )
}

/// Escape `%`, `_` and `\` for a LIKE pattern using `\` as escape.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub struct SqliteMusicStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMusicStore {
    /// Open the music database at `db_path`, creating or migrating it as
    /// needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = open_versioned(db_path.as_ref(), MUSIC_VERSIONED_SCHEMAS, "music")?;
        Ok(SqliteMusicStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON;", [])?;
        MUSIC_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;
        Ok(SqliteMusicStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("music store connection lock poisoned"))
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn row_to_music(row: &rusqlite::Row) -> rusqlite::Result<MusicRecord> {
        let provider: String = row.get("provider")?;
        let status: String = row.get("status")?;
        let model: String = row.get("model")?;
        let mastering_status: Option<String> = row.get("mastering_status")?;
        let mastering_provider: Option<String> = row.get("mastering_provider")?;
        let mastering_intensity: Option<String> = row.get("mastering_intensity")?;
        let file_size: Option<i64> = row.get("file_size")?;

        Ok(MusicRecord {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            job_id: row.get("job_id")?,
            provider: MusicProvider::from_str(&provider)
                .ok_or_else(|| invalid_column("provider", &provider))?,
            status: JobStatus::from_db_str(&status)
                .ok_or_else(|| invalid_column("status", &status))?,
            title: row.get("title")?,
            prompt: row.get("prompt")?,
            style: row.get("style")?,
            mood: row.get("mood")?,
            lyrics: row.get("lyrics")?,
            model: MusicModel::from_str(&model).unwrap_or_default(),
            duration_secs: row.get("duration_secs")?,
            instrumental: row.get("instrumental")?,
            audio_url: row.get("audio_url")?,
            image_url: row.get("image_url")?,
            local_path: row.get("local_path")?,
            public_url: row.get("public_url")?,
            file_size: file_size.map(|size| size.max(0) as u64),
            format: row.get("format")?,
            credits_used: row.get("credits_used")?,
            error: row.get("error")?,
            mastering_status: mastering_status.as_deref().and_then(JobStatus::from_db_str),
            mastering_job_id: row.get("mastering_job_id")?,
            mastering_provider: mastering_provider
                .as_deref()
                .and_then(MasteringProvider::from_str),
            mastering_intensity: mastering_intensity
                .as_deref()
                .and_then(MasteringIntensity::from_str),
            mastered_path: row.get("mastered_path")?,
            mastered_url: row.get("mastered_url")?,
            mastering_error: row.get("mastering_error")?,
            waveform_url: row.get("waveform_url")?,
            likes: row.get("likes")?,
            plays: row.get("plays")?,
            views: row.get("views")?,
            folder_id: row.get("folder_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn row_to_folder(row: &rusqlite::Row) -> rusqlite::Result<MusicFolder> {
        Ok(MusicFolder {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            name: row.get("name")?,
            created_at: row.get("created_at")?,
            track_count: row.get::<_, i64>("track_count")?.max(0) as u64,
        })
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<MusicRecord>> {
        Ok(conn
            .query_row(
                "SELECT * FROM generated_music WHERE id = ?1",
                params![id],
                Self::row_to_music,
            )
            .optional()?)
    }

    fn increment_counter(&self, id: &str, column: &'static str) -> Result<u32> {
        let conn = self.lock()?;
        let value: Option<u32> = conn
            .query_row(
                &format!(
                    "UPDATE generated_music SET {column} = {column} + 1 WHERE id = ?1 RETURNING {column}"
                ),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        value.with_context(|| format!("Music {} not found", id))
    }
}

impl MusicStore for SqliteMusicStore {
    fn create_music(&self, record: NewMusicRecord) -> Result<MusicRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Self::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO generated_music (
                id, user_id, job_id, provider, status, title, prompt, style, mood, lyrics,
                model, duration_secs, instrumental, credits_used, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                id,
                record.user_id,
                record.job_id,
                record.provider.as_str(),
                JobStatus::Pending.as_db_str(),
                record.title,
                record.prompt,
                record.style,
                record.mood,
                record.lyrics,
                record.model.as_str(),
                record.duration_secs,
                record.instrumental,
                record.credits_used,
                now,
            ],
        )
        .context("Failed to insert music record")?;

        debug!(id = %id, user_id = %record.user_id, provider = %record.provider, "Created music record");
        Self::fetch(&conn, &id)?.context("Inserted music record disappeared")
    }

    fn update_music(&self, id: &str, update: &MusicUpdate) -> Result<MusicRecord> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let current = Self::fetch(&tx, id)?.with_context(|| format!("Music {} not found", id))?;

        if update.is_empty() {
            return Ok(current);
        }

        if let Some(next) = update.status {
            if current.status.is_terminal() {
                bail!("Music {} already finished as {}", id, current.status);
            }
            if !current.status.can_transition_to(next) {
                bail!(
                    "Invalid status transition {} -> {} for music {}",
                    current.status,
                    next,
                    id
                );
            }
        }
        // A new mastering job restarts the mastering lifecycle.
        if let (Some(next), None, Some(current_mastering)) = (
            update.mastering_status,
            &update.mastering_job_id,
            current.mastering_status,
        ) {
            if !current_mastering.can_transition_to(next) {
                bail!(
                    "Invalid mastering status transition {} -> {} for music {}",
                    current_mastering,
                    next,
                    id
                );
            }
        }

        let now = Self::now();
        let mut assignments = Assignments::default();
        if let Some(status) = update.status {
            assignments.push("status", status.as_db_str());
            if status.is_terminal() && current.completed_at.is_none() {
                assignments.push("completed_at", now);
            }
        }
        assignments.push_opt("title", &update.title);
        assignments.push_opt("audio_url", &update.audio_url);
        assignments.push_opt("image_url", &update.image_url);
        assignments.push_opt("local_path", &update.local_path);
        assignments.push_opt("public_url", &update.public_url);
        assignments.push_opt("file_size", &update.file_size.map(|size| size as i64));
        assignments.push_opt("format", &update.format);
        assignments.push_opt("error", &update.error);
        assignments.push_opt(
            "mastering_status",
            &update.mastering_status.map(|s| s.as_db_str()),
        );
        assignments.push_opt("mastering_job_id", &update.mastering_job_id);
        assignments.push_opt(
            "mastering_provider",
            &update.mastering_provider.map(|p| p.as_str()),
        );
        assignments.push_opt(
            "mastering_intensity",
            &update.mastering_intensity.map(|i| i.as_str()),
        );
        assignments.push_opt("mastered_path", &update.mastered_path);
        assignments.push_opt("mastered_url", &update.mastered_url);
        match (&update.mastering_error, &update.mastering_job_id) {
            (Some(error), _) => assignments.push("mastering_error", error.clone()),
            // A new mastering job starts without the previous one's error.
            (None, Some(_)) => assignments.push("mastering_error", None::<String>),
            (None, None) => {}
        }
        assignments.push_opt("waveform_url", &update.waveform_url);
        assignments.push("updated_at", now);
        assignments.values.push(Box::new(id.to_string()));

        let sql = format!(
            "UPDATE generated_music SET {} WHERE id = ?{}",
            assignments.sets.join(", "),
            assignments.values.len()
        );
        let params_refs: Vec<&dyn ToSql> =
            assignments.values.iter().map(|p| p.as_ref()).collect();
        tx.execute(&sql, params_refs.as_slice())?;

        let updated = Self::fetch(&tx, id)?.with_context(|| format!("Music {} not found", id))?;
        tx.commit()?;
        Ok(updated)
    }

    fn get_music(&self, id: &str) -> Result<Option<MusicRecord>> {
        let conn = self.lock()?;
        Self::fetch(&conn, id)
    }

    fn get_music_by_job_id(&self, job_id: &str) -> Result<Option<MusicRecord>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT * FROM generated_music
                 WHERE job_id = ?1 OR mastering_job_id = ?1
                 ORDER BY created_at DESC
                 LIMIT 1",
                params![job_id],
                Self::row_to_music,
            )
            .optional()?)
    }

    fn list_music(&self, options: &ListOptions) -> Result<MusicPage> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(user_id) = &options.user_id {
            params.push(Box::new(user_id.clone()));
            clauses.push(format!("user_id = ?{}", params.len()));
        }
        if let Some(status) = options.status {
            params.push(Box::new(status.as_db_str()));
            clauses.push(format!("status = ?{}", params.len()));
        }
        match &options.folder {
            FolderFilter::Any => {}
            FolderFilter::Unfiled => clauses.push("folder_id IS NULL".to_string()),
            FolderFilter::Folder(folder_id) => {
                params.push(Box::new(folder_id.clone()));
                clauses.push(format!("folder_id = ?{}", params.len()));
            }
        }
        if let Some(search) = options.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            params.push(Box::new(format!("%{}%", escape_like(&search.to_lowercase()))));
            let n = params.len();
            clauses.push(format!(
                "(LOWER(COALESCE(title, '')) LIKE ?{n} ESCAPE '\\'
                  OR LOWER(prompt) LIKE ?{n} ESCAPE '\\'
                  OR LOWER(COALESCE(style, '')) LIKE ?{n} ESCAPE '\\'
                  OR LOWER(COALESCE(mood, '')) LIKE ?{n} ESCAPE '\\')"
            ));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let conn = self.lock()?;

        let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM generated_music {}", where_sql),
            params_refs.as_slice(),
            |row| row.get(0),
        )?;

        params.push(Box::new(options.limit as i64));
        let limit_idx = params.len();
        params.push(Box::new(options.offset as i64));
        let offset_idx = params.len();

        let sql = format!(
            "SELECT * FROM generated_music {} ORDER BY {} LIMIT ?{} OFFSET ?{}",
            where_sql,
            options.sort.order_by(),
            limit_idx,
            offset_idx
        );
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let items = stmt
            .query_map(params_refs.as_slice(), Self::row_to_music)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(MusicPage {
            items,
            total: total.max(0) as usize,
        })
    }

    fn like_music(&self, id: &str, user_id: &str) -> Result<LikeOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM generated_music WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        if !exists {
            bail!("Music {} not found", id);
        }

        let removed = tx.execute(
            "DELETE FROM music_likes WHERE music_id = ?1 AND user_id = ?2",
            params![id, user_id],
        )?;
        let liked = removed == 0;
        if liked {
            tx.execute(
                "INSERT INTO music_likes (music_id, user_id, created_at) VALUES (?1, ?2, ?3)",
                params![id, user_id, Self::now()],
            )?;
        }

        let likes: u32 = tx.query_row(
            "UPDATE generated_music
             SET likes = (SELECT COUNT(*) FROM music_likes WHERE music_id = ?1)
             WHERE id = ?1
             RETURNING likes",
            params![id],
            |row| row.get(0),
        )?;
        tx.commit()?;

        debug!(id = %id, user_id = %user_id, liked, likes, "Toggled like");
        Ok(LikeOutcome { liked, likes })
    }

    fn get_liked_by(&self, id: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT user_id FROM music_likes WHERE music_id = ?1 ORDER BY created_at, user_id",
        )?;
        let users = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(users)
    }

    fn increment_plays(&self, id: &str) -> Result<u32> {
        self.increment_counter(id, "plays")
    }

    fn increment_views(&self, id: &str) -> Result<u32> {
        self.increment_counter(id, "views")
    }

    fn move_to_folder(&self, id: &str, folder_id: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        let owner: String = conn
            .query_row(
                "SELECT user_id FROM generated_music WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .with_context(|| format!("Music {} not found", id))?;

        if let Some(folder_id) = folder_id {
            let folder_owner: String = conn
                .query_row(
                    "SELECT user_id FROM music_folders WHERE id = ?1",
                    params![folder_id],
                    |row| row.get(0),
                )
                .optional()?
                .with_context(|| format!("Folder {} not found", folder_id))?;
            if folder_owner != owner {
                bail!("Folder {} belongs to another user", folder_id);
            }
        }

        conn.execute(
            "UPDATE generated_music SET folder_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![folder_id, Self::now(), id],
        )?;
        Ok(())
    }

    fn get_user_stats(&self, user_id: &str) -> Result<MusicStats> {
        let conn = self.lock()?;
        let stats = conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status IN ('pending', 'processing') THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN mastered_url IS NOT NULL THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(plays), 0),
                COALESCE(SUM(views), 0),
                COALESCE(SUM(likes), 0),
                COALESCE(SUM(credits_used), 0),
                COALESCE(SUM(file_size), 0)
             FROM generated_music WHERE user_id = ?1",
            params![user_id],
            |row| {
                let get = |idx: usize| -> rusqlite::Result<u64> {
                    Ok(row.get::<_, i64>(idx)?.max(0) as u64)
                };
                Ok(MusicStats {
                    total_tracks: get(0)?,
                    completed: get(1)?,
                    failed: get(2)?,
                    in_progress: get(3)?,
                    mastered: get(4)?,
                    total_plays: get(5)?,
                    total_views: get(6)?,
                    total_likes: get(7)?,
                    credits_used: get(8)?,
                    total_bytes: get(9)?,
                })
            },
        )?;
        Ok(stats)
    }

    fn delete_music(&self, id: &str) -> Result<Option<MusicRecord>> {
        let conn = self.lock()?;
        let Some(record) = Self::fetch(&conn, id)? else {
            return Ok(None);
        };
        conn.execute("DELETE FROM generated_music WHERE id = ?1", params![id])?;
        info!(id = %id, user_id = %record.user_id, "Deleted music record");
        Ok(Some(record))
    }

    fn create_folder(&self, user_id: &str, name: &str) -> Result<MusicFolder> {
        let name = name.trim();
        if name.is_empty() {
            bail!("Folder name cannot be empty");
        }
        let id = uuid::Uuid::new_v4().to_string();
        let now = Self::now();
        let conn = self.lock()?;
        match conn.execute(
            "INSERT INTO music_folders (id, user_id, name, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, user_id, name, now],
        ) {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                bail!("Folder '{}' already exists", name);
            }
            Err(e) => return Err(e.into()),
        }
        Ok(MusicFolder {
            id,
            user_id: user_id.to_string(),
            name: name.to_string(),
            created_at: now,
            track_count: 0,
        })
    }

    fn list_folders(&self, user_id: &str) -> Result<Vec<MusicFolder>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT f.id, f.user_id, f.name, f.created_at,
                (SELECT COUNT(*) FROM generated_music m WHERE m.folder_id = f.id) AS track_count
             FROM music_folders f
             WHERE f.user_id = ?1
             ORDER BY f.name COLLATE NOCASE",
        )?;
        let folders = stmt
            .query_map(params![user_id], Self::row_to_folder)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(folders)
    }

    fn delete_folder(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM music_folders WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}
