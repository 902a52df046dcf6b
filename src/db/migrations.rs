// Database migrations
// Migrations are forward-only. Never edit or delete a migration after it ships.

use anyhow::Result;
use rusqlite::Connection;

/// All migrations in order. Each migration is a SQL string.
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    -- Clips: one logical recording
    CREATE TABLE clips (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        start_time TEXT NOT NULL,              -- UTC, RFC 3339
        start_offset_min INTEGER NOT NULL DEFAULT 0,
        event_time TEXT,                       -- RFC 3339 with offset
        kind TEXT NOT NULL CHECK (kind IN ('Sentry', 'Saved', 'Recent')),
        city TEXT NOT NULL DEFAULT '',
        reason TEXT NOT NULL DEFAULT '',
        telemetry_id INTEGER,
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(start_time, kind)
    );
    CREATE INDEX idx_clips_start_time ON clips(start_time);

    -- Video files: one MP4 on disk, belongs to exactly one clip
    CREATE TABLE video_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        clip_id INTEGER NOT NULL REFERENCES clips(id),
        camera TEXT NOT NULL,
        file_path TEXT NOT NULL,
        segment_time TEXT NOT NULL,            -- UTC, RFC 3339
        created_at TEXT NOT NULL DEFAULT (datetime('now')),
        UNIQUE(clip_id, file_path)
    );
    CREATE INDEX idx_video_files_clip ON video_files(clip_id);
    CREATE INDEX idx_video_files_segment_time ON video_files(segment_time);

    -- Telemetry: at most one row per clip
    CREATE TABLE telemetry (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        clip_id INTEGER NOT NULL REFERENCES clips(id),
        speed_mph REAL NOT NULL DEFAULT 0,
        gear TEXT NOT NULL DEFAULT '',
        latitude REAL NOT NULL DEFAULT 0,
        longitude REAL NOT NULL DEFAULT 0,
        steering_angle REAL NOT NULL DEFAULT 0,
        autopilot_state TEXT NOT NULL DEFAULT '',
        full_series_json TEXT NOT NULL DEFAULT ''
    );
    CREATE INDEX idx_telemetry_clip ON telemetry(clip_id);
    "#,
];

fn get_schema_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    Ok(version)
}

/// Run all pending migrations (crash-safe)
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    let target_version = MIGRATIONS.len() as u32;

    // Refuse to open a DB created by a newer build
    if current_version > target_version {
        anyhow::bail!(
            "Database schema version {} is newer than this build supports (max {})",
            current_version,
            target_version
        );
    }

    if current_version == target_version {
        return Ok(());
    }

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let migration_version = (i + 1) as u32;
        if migration_version <= current_version {
            continue;
        }

        conn.execute_batch(migration)?;
        conn.execute_batch(&format!("PRAGMA user_version = {}", migration_version))?;

        log::info!("Applied migration {}", migration_version);
    }

    Ok(())
}
