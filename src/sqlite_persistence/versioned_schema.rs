use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OpenFlags};
use std::path::Path;
use tracing::info;

/// Offset added to `PRAGMA user_version` so that databases not created by us
/// are never mistaken for version 0.
pub const BASE_DB_VERSION: usize = 99999;

#[macro_export]
macro_rules! sqlite_column {
    ($name:expr, $sql_type:expr $(, $field:ident = $value:expr)*) => {
        {
            #[allow(unused_mut)]
            let mut column = $crate::sqlite_persistence::Column {
                name: $name,
                sql_type: $sql_type,
                is_primary_key: false,
                non_null: false,
                default_value: None,
                foreign_key: None,
            };
            $(
                column.$field = $value;
            )*
            column
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
    Real,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
            SqlType::Real => "REAL",
        }
    }
}

#[allow(unused)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyOnChange {
    NoAction,
    SetNull,
    Cascade,
}

impl ForeignKeyOnChange {
    fn as_sql(&self) -> &'static str {
        match self {
            ForeignKeyOnChange::NoAction => "NO ACTION",
            ForeignKeyOnChange::SetNull => "SET NULL",
            ForeignKeyOnChange::Cascade => "CASCADE",
        }
    }
}

pub struct ForeignKey {
    pub foreign_table: &'static str,
    pub foreign_column: &'static str,
    pub on_delete: ForeignKeyOnChange,
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub is_primary_key: bool,
    pub non_null: bool,
    pub default_value: Option<&'static str>,
    pub foreign_key: Option<&'static ForeignKey>,
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub indices: &'static [(&'static str, &'static str)],
    pub unique_constraints: &'static [&'static [&'static str]],
}

impl Table {
    fn create_sql(&self) -> String {
        let mut definitions: Vec<String> = self
            .columns
            .iter()
            .map(|column| {
                let mut def = format!("{} {}", column.name, column.sql_type.as_sql());
                if column.is_primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                if column.non_null {
                    def.push_str(" NOT NULL");
                }
                if let Some(default_value) = column.default_value {
                    def.push_str(&format!(" DEFAULT {}", default_value));
                }
                if let Some(fk) = column.foreign_key {
                    def.push_str(&format!(
                        " REFERENCES {}({}) ON DELETE {}",
                        fk.foreign_table,
                        fk.foreign_column,
                        fk.on_delete.as_sql()
                    ));
                }
                def
            })
            .collect();

        for unique in self.unique_constraints {
            definitions.push(format!("UNIQUE ({})", unique.join(", ")));
        }

        format!("CREATE TABLE {} ({});", self.name, definitions.join(", "))
    }

    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute(&self.create_sql(), params![])
            .with_context(|| format!("Failed to create table {}", self.name))?;
        for (index_name, columns) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, columns),
                params![],
            )?;
        }
        Ok(())
    }

    /// Checks column names, types, nullability and primary keys, and that
    /// every declared index exists on this table.
    pub fn validate(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual: Vec<(String, String, bool, bool)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i32>(3)? == 1,
                    row.get::<_, i32>(5)? > 0,
                ))
            })?
            .collect::<rusqlite::Result<_>>()?;

        if actual.is_empty() {
            bail!("Table {} does not exist", self.name);
        }
        if actual.len() != self.columns.len() {
            bail!(
                "Table {} has {} columns, expected {} ({})",
                self.name,
                actual.len(),
                self.columns.len(),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        for ((name, sql_type, non_null, is_pk), expected) in actual.iter().zip(self.columns) {
            if name != expected.name {
                bail!(
                    "Table {} column name mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    name
                );
            }
            if sql_type != expected.sql_type.as_sql() {
                bail!(
                    "Table {} column {} type mismatch: expected {}, got {}",
                    self.name,
                    expected.name,
                    expected.sql_type.as_sql(),
                    sql_type
                );
            }
            if *non_null != expected.non_null || *is_pk != expected.is_primary_key {
                bail!(
                    "Table {} column {} constraint mismatch",
                    self.name,
                    expected.name
                );
            }
        }

        for (index_name, _) in self.indices {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM sqlite_master WHERE type='index' AND name=?1 AND tbl_name=?2",
                    params![index_name, self.name],
                    |_| Ok(()),
                )
                .is_ok();
            if !exists {
                bail!("Table {} is missing index '{}'", self.name, index_name);
            }
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        conn.execute("PRAGMA foreign_keys = ON;", params![])?;
        for table in self.tables {
            table.create(conn)?;
        }
        set_user_version(conn, self.version)
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

fn set_user_version(conn: &Connection, version: usize) -> Result<()> {
    conn.execute(
        &format!("PRAGMA user_version = {}", BASE_DB_VERSION + version),
        [],
    )?;
    Ok(())
}

/// Opens (or creates) a database file against a list of schema versions.
///
/// A fresh file gets the latest schema. An existing file is validated against
/// the schema of its recorded version and then migrated forward.
pub fn open_versioned(
    db_path: &Path,
    schemas: &'static [VersionedSchema],
    label: &str,
) -> Result<Connection> {
    let latest = schemas.last().context("No schemas defined")?;

    let mut conn = if db_path.exists() {
        Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?
    } else {
        let conn = Connection::open(db_path)?;
        latest.create(&conn)?;
        info!("Created new {} database at {:?}", label, db_path);
        conn
    };
    conn.execute("PRAGMA foreign_keys = ON;", [])?;

    let raw_version: i64 = conn
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .context("Failed to read database version")?;
    let version = raw_version - BASE_DB_VERSION as i64;
    if version < 0 {
        bail!(
            "{} database at {:?} was not created by this application (user_version {})",
            label,
            db_path,
            raw_version
        );
    }
    let version = version as usize;
    if version >= schemas.len() {
        bail!(
            "{} database version {} is too new (max supported: {})",
            label,
            version,
            schemas.len() - 1
        );
    }

    schemas[version].validate(&conn)?;

    if version < latest.version {
        info!(
            "Migrating {} database from version {} to {}",
            label, version, latest.version
        );
        // One transaction per step: a failed migration leaves the database
        // at the last version that fully applied.
        for schema in schemas.iter().skip(version + 1) {
            let tx = conn.transaction()?;
            if let Some(migration) = schema.migration {
                migration(&tx)
                    .with_context(|| format!("Migration to version {} failed", schema.version))?;
            }
            set_user_version(&tx, schema.version)?;
            tx.commit()?;
        }
    }

    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const NOTES_TABLE: Table = Table {
        name: "notes",
        columns: &[
            sqlite_column!("id", SqlType::Text, is_primary_key = true),
            sqlite_column!("body", SqlType::Text, non_null = true),
        ],
        indices: &[("idx_notes_body", "body")],
        unique_constraints: &[],
    };

    const NOTES_TABLE_V1: Table = Table {
        name: "notes",
        columns: &[
            sqlite_column!("id", SqlType::Text, is_primary_key = true),
            sqlite_column!("body", SqlType::Text, non_null = true),
            sqlite_column!("pinned", SqlType::Integer, non_null = true, default_value = Some("0")),
        ],
        indices: &[("idx_notes_body", "body")],
        unique_constraints: &[],
    };

    fn add_pinned(conn: &Connection) -> Result<()> {
        conn.execute(
            "ALTER TABLE notes ADD COLUMN pinned INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
        Ok(())
    }

    static SCHEMAS: &[VersionedSchema] = &[
        VersionedSchema {
            version: 0,
            tables: &[NOTES_TABLE],
            migration: None,
        },
        VersionedSchema {
            version: 1,
            tables: &[NOTES_TABLE_V1],
            migration: Some(add_pinned),
        },
    ];

    #[test]
    fn test_create_then_validate() {
        let conn = Connection::open_in_memory().unwrap();
        SCHEMAS[1].create(&conn).unwrap();
        SCHEMAS[1].validate(&conn).unwrap();
    }

    #[test]
    fn test_validate_detects_missing_index() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE notes (id TEXT PRIMARY KEY, body TEXT NOT NULL)", [])
            .unwrap();

        let err = SCHEMAS[0].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("missing index"));
    }

    #[test]
    fn test_validate_detects_type_mismatch() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE notes (id TEXT PRIMARY KEY, body INTEGER NOT NULL)", [])
            .unwrap();

        let err = SCHEMAS[0].validate(&conn).unwrap_err().to_string();
        assert!(err.contains("type mismatch"));
    }

    #[test]
    fn test_open_versioned_migrates_old_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("notes.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            SCHEMAS[0].create(&conn).unwrap();
            conn.execute("INSERT INTO notes (id, body) VALUES ('a', 'hello')", [])
                .unwrap();
        }

        let conn = open_versioned(&db_path, SCHEMAS, "notes").unwrap();
        let (version, pinned): (i64, i64) = conn
            .query_row(
                "SELECT (SELECT user_version FROM pragma_user_version), pinned FROM notes WHERE id = 'a'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(version, (BASE_DB_VERSION + 1) as i64);
        assert_eq!(pinned, 0);
        SCHEMAS[1].validate(&conn).unwrap();
    }

    fn add_pinned_then_fail(conn: &Connection) -> Result<()> {
        add_pinned(conn)?;
        conn.execute("UPDATE notes SET body = 'changed'", [])?;
        bail!("disk on fire")
    }

    static FAILING_SCHEMAS: &[VersionedSchema] = &[
        VersionedSchema {
            version: 0,
            tables: &[NOTES_TABLE],
            migration: None,
        },
        VersionedSchema {
            version: 1,
            tables: &[NOTES_TABLE_V1],
            migration: Some(add_pinned_then_fail),
        },
    ];

    #[test]
    fn test_failed_migration_leaves_database_untouched() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("notes.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            SCHEMAS[0].create(&conn).unwrap();
            conn.execute("INSERT INTO notes (id, body) VALUES ('a', 'hello')", [])
                .unwrap();
        }

        let err = open_versioned(&db_path, FAILING_SCHEMAS, "notes").unwrap_err();
        assert!(format!("{:#}", err).contains("disk on fire"));

        let conn = Connection::open(&db_path).unwrap();
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, BASE_DB_VERSION as i64);
        let body: String = conn
            .query_row("SELECT body FROM notes WHERE id = 'a'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(body, "hello");
        SCHEMAS[0].validate(&conn).unwrap();

        // The intact file still migrates with a working migration.
        drop(conn);
        open_versioned(&db_path, SCHEMAS, "notes").unwrap();
    }

    #[test]
    fn test_open_versioned_rejects_foreign_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("foreign.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("CREATE TABLE other (x INTEGER)", []).unwrap();
        }

        let err = open_versioned(&db_path, SCHEMAS, "notes")
            .unwrap_err()
            .to_string();
        assert!(err.contains("not created by this application"));
    }
}
