//! Database schema for music.db.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP,
};
use anyhow::{Context, Result};
use rusqlite::Connection;

// =============================================================================
// Folders
// =============================================================================

const MUSIC_FOLDERS_TABLE_V0: Table = Table {
    name: "music_folders",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("name", SqlType::Text, non_null = true),
        sqlite_column!(
            "created_at",
            SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_music_folders_user", "user_id")],
    unique_constraints: &[&["user_id", "name"]],
};

const FOLDER_FK: ForeignKey = ForeignKey {
    foreign_table: "music_folders",
    foreign_column: "id",
    on_delete: ForeignKeyOnChange::SetNull,
};

// =============================================================================
// Generated music - Version 0
// =============================================================================

/// Likes were kept as a JSON array of user ids next to the counter.
const GENERATED_MUSIC_TABLE_V0: Table = Table {
    name: "generated_music",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("job_id", SqlType::Text),
        sqlite_column!("provider", SqlType::Text, non_null = true),
        sqlite_column!("status", SqlType::Text, non_null = true),
        sqlite_column!("title", SqlType::Text),
        sqlite_column!("prompt", SqlType::Text, non_null = true),
        sqlite_column!("style", SqlType::Text),
        sqlite_column!("mood", SqlType::Text),
        sqlite_column!("lyrics", SqlType::Text),
        sqlite_column!("model", SqlType::Text, non_null = true),
        sqlite_column!("duration_secs", SqlType::Integer, non_null = true),
        sqlite_column!(
            "instrumental",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("audio_url", SqlType::Text),
        sqlite_column!("image_url", SqlType::Text),
        sqlite_column!("local_path", SqlType::Text),
        sqlite_column!("public_url", SqlType::Text),
        sqlite_column!("file_size", SqlType::Integer),
        sqlite_column!("format", SqlType::Text),
        sqlite_column!(
            "credits_used",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("error", SqlType::Text),
        sqlite_column!("mastering_status", SqlType::Text),
        sqlite_column!("mastering_job_id", SqlType::Text),
        sqlite_column!("mastering_provider", SqlType::Text),
        sqlite_column!("mastering_intensity", SqlType::Text),
        sqlite_column!("mastered_path", SqlType::Text),
        sqlite_column!("mastered_url", SqlType::Text),
        sqlite_column!("likes", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("liked_by", SqlType::Text),
        sqlite_column!("plays", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("views", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("folder_id", SqlType::Text, foreign_key = Some(&FOLDER_FK)),
        sqlite_column!("created_at", SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", SqlType::Integer),
    ],
    indices: &[
        ("idx_music_user_created", "user_id, created_at"),
        ("idx_music_job", "job_id"),
        ("idx_music_mastering_job", "mastering_job_id"),
        ("idx_music_folder", "folder_id"),
        ("idx_music_status", "status"),
    ],
    unique_constraints: &[],
};

// =============================================================================
// Generated music - Version 1
// =============================================================================

/// `liked_by` moved to `music_likes`; `waveform_url` added.
const GENERATED_MUSIC_TABLE_V1: Table = Table {
    name: "generated_music",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("job_id", SqlType::Text),
        sqlite_column!("provider", SqlType::Text, non_null = true),
        sqlite_column!("status", SqlType::Text, non_null = true),
        sqlite_column!("title", SqlType::Text),
        sqlite_column!("prompt", SqlType::Text, non_null = true),
        sqlite_column!("style", SqlType::Text),
        sqlite_column!("mood", SqlType::Text),
        sqlite_column!("lyrics", SqlType::Text),
        sqlite_column!("model", SqlType::Text, non_null = true),
        sqlite_column!("duration_secs", SqlType::Integer, non_null = true),
        sqlite_column!(
            "instrumental",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("audio_url", SqlType::Text),
        sqlite_column!("image_url", SqlType::Text),
        sqlite_column!("local_path", SqlType::Text),
        sqlite_column!("public_url", SqlType::Text),
        sqlite_column!("file_size", SqlType::Integer),
        sqlite_column!("format", SqlType::Text),
        sqlite_column!(
            "credits_used",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("error", SqlType::Text),
        sqlite_column!("mastering_status", SqlType::Text),
        sqlite_column!("mastering_job_id", SqlType::Text),
        sqlite_column!("mastering_provider", SqlType::Text),
        sqlite_column!("mastering_intensity", SqlType::Text),
        sqlite_column!("mastered_path", SqlType::Text),
        sqlite_column!("mastered_url", SqlType::Text),
        sqlite_column!("likes", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("plays", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("views", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("folder_id", SqlType::Text, foreign_key = Some(&FOLDER_FK)),
        sqlite_column!("created_at", SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", SqlType::Integer),
        sqlite_column!("waveform_url", SqlType::Text),
    ],
    indices: &[
        ("idx_music_user_created", "user_id, created_at"),
        ("idx_music_job", "job_id"),
        ("idx_music_mastering_job", "mastering_job_id"),
        ("idx_music_folder", "folder_id"),
        ("idx_music_status", "status"),
    ],
    unique_constraints: &[],
};

const MUSIC_LIKES_TABLE_V1: Table = Table {
    name: "music_likes",
    columns: &[
        sqlite_column!(
            "music_id",
            SqlType::Text,
            non_null = true,
            foreign_key = Some(&ForeignKey {
                foreign_table: "generated_music",
                foreign_column: "id",
                on_delete: ForeignKeyOnChange::Cascade,
            })
        ),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!(
            "created_at",
            SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
    ],
    indices: &[("idx_music_likes_user", "user_id")],
    unique_constraints: &[&["music_id", "user_id"]],
};

/// Move the JSON `liked_by` arrays into `music_likes` and recompute the
/// counters from it.
fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    MUSIC_LIKES_TABLE_V1.create(conn)?;
    conn.execute_batch(
        "INSERT OR IGNORE INTO music_likes (music_id, user_id)
            SELECT generated_music.id, json_each.value
            FROM generated_music, json_each(generated_music.liked_by)
            WHERE generated_music.liked_by IS NOT NULL
              AND json_valid(generated_music.liked_by);
         UPDATE generated_music SET likes =
            (SELECT COUNT(*) FROM music_likes WHERE music_likes.music_id = generated_music.id);
         ALTER TABLE generated_music DROP COLUMN liked_by;
         ALTER TABLE generated_music ADD COLUMN waveform_url TEXT;",
    )
    .context("Failed to move likes into music_likes")?;
    Ok(())
}

// =============================================================================
// Generated music - Version 2
// =============================================================================

/// Adds `mastering_error`.
const GENERATED_MUSIC_TABLE_V2: Table = Table {
    name: "generated_music",
    columns: &[
        sqlite_column!("id", SqlType::Text, is_primary_key = true),
        sqlite_column!("user_id", SqlType::Text, non_null = true),
        sqlite_column!("job_id", SqlType::Text),
        sqlite_column!("provider", SqlType::Text, non_null = true),
        sqlite_column!("status", SqlType::Text, non_null = true),
        sqlite_column!("title", SqlType::Text),
        sqlite_column!("prompt", SqlType::Text, non_null = true),
        sqlite_column!("style", SqlType::Text),
        sqlite_column!("mood", SqlType::Text),
        sqlite_column!("lyrics", SqlType::Text),
        sqlite_column!("model", SqlType::Text, non_null = true),
        sqlite_column!("duration_secs", SqlType::Integer, non_null = true),
        sqlite_column!(
            "instrumental",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("audio_url", SqlType::Text),
        sqlite_column!("image_url", SqlType::Text),
        sqlite_column!("local_path", SqlType::Text),
        sqlite_column!("public_url", SqlType::Text),
        sqlite_column!("file_size", SqlType::Integer),
        sqlite_column!("format", SqlType::Text),
        sqlite_column!(
            "credits_used",
            SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("error", SqlType::Text),
        sqlite_column!("mastering_status", SqlType::Text),
        sqlite_column!("mastering_job_id", SqlType::Text),
        sqlite_column!("mastering_provider", SqlType::Text),
        sqlite_column!("mastering_intensity", SqlType::Text),
        sqlite_column!("mastered_path", SqlType::Text),
        sqlite_column!("mastered_url", SqlType::Text),
        sqlite_column!("likes", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("plays", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("views", SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("folder_id", SqlType::Text, foreign_key = Some(&FOLDER_FK)),
        sqlite_column!("created_at", SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", SqlType::Integer, non_null = true),
        sqlite_column!("completed_at", SqlType::Integer),
        sqlite_column!("waveform_url", SqlType::Text),
        sqlite_column!("mastering_error", SqlType::Text),
    ],
    indices: &[
        ("idx_music_user_created", "user_id, created_at"),
        ("idx_music_job", "job_id"),
        ("idx_music_mastering_job", "mastering_job_id"),
        ("idx_music_folder", "folder_id"),
        ("idx_music_status", "status"),
    ],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "ALTER TABLE generated_music ADD COLUMN mastering_error TEXT",
        [],
    )
    .context("Failed to add mastering_error")?;
    Ok(())
}

pub const MUSIC_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[MUSIC_FOLDERS_TABLE_V0, GENERATED_MUSIC_TABLE_V0],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[
            MUSIC_FOLDERS_TABLE_V0,
            GENERATED_MUSIC_TABLE_V1,
            MUSIC_LIKES_TABLE_V1,
        ],
        migration: Some(migrate_v0_to_v1),
    },
    VersionedSchema {
        version: 2,
        tables: &[
            MUSIC_FOLDERS_TABLE_V0,
            GENERATED_MUSIC_TABLE_V2,
            MUSIC_LIKES_TABLE_V1,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
