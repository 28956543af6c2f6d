//! Small declarative layer over rusqlite: tables are described as constants,
//! created from those descriptions, validated on open and migrated forward.

mod versioned_schema;

pub use versioned_schema::{
    open_versioned, Column, ForeignKey, ForeignKeyOnChange, SqlType, Table, VersionedSchema,
    BASE_DB_VERSION,
};

pub const DEFAULT_TIMESTAMP: &str = "(cast(strftime('%s','now') as int))";
