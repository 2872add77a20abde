//! SQLite catalog of downloaded videos and their renditions.
//!
//! A `video` row exists once per remote URL. Its `format` rows are the
//! renditions known when the video was first seen and are never refreshed.
//! Every operation opens its own short-lived connection, so a `Catalog` can be
//! shared freely between threads.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::humanize;
use crate::provider::VideoMetadata;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const VIDEO_COLUMNS: &str = "id, title, duration, url, file_path, created_at";

#[derive(Debug, Clone, PartialEq)]
pub struct Video {
    pub id: i64,
    pub title: String,
    /// `HH:MM:SS`.
    pub duration: String,
    pub url: String,
    /// Last file written by a download; not re-checked on read.
    pub file_path: Option<String>,
    /// RFC 3339, UTC.
    pub created_at: String,
    pub formats: Vec<Format>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Format {
    pub id: i64,
    pub resolution: String,
    /// Human readable size, or `Unknown`.
    pub size: String,
    pub video_id: i64,
}

/// A video about to be inserted.
#[derive(Debug, Clone)]
pub struct NewVideo {
    pub title: String,
    pub duration: String,
    pub url: String,
    /// `(resolution, size)` pairs.
    pub formats: Vec<(String, String)>,
}

impl NewVideo {
    pub fn from_metadata(url: &str, metadata: &VideoMetadata) -> Self {
        Self {
            title: metadata.title.clone(),
            duration: humanize::readable_duration(metadata.duration_seconds),
            url: url.to_owned(),
            formats: metadata
                .renditions
                .iter()
                .map(|rendition| {
                    (
                        rendition.resolution.clone(),
                        humanize::readable_size_or_unknown(rendition.size_bytes),
                    )
                })
                .collect(),
        }
    }
}

/// Outcome of [`Catalog::delete_format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatRemoval {
    Removed,
    NoVideo,
    NoFormat,
}

/// Row counts removed by [`Catalog::clear`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClearedRows {
    pub videos: usize,
    pub formats: usize,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    db_path: PathBuf,
}

impl Catalog {
    /// Opens (and if necessary creates) the database and its schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog directory {}", parent.display()))?;
        }

        let mut conn = Connection::open(path)
            .with_context(|| format!("opening catalog DB {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .context("enabling WAL mode for catalog DB")?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .context("setting catalog DB synchronous mode")?;
        ensure_tables(&mut conn)?;

        Ok(Self {
            db_path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = Connection::open(&self.db_path)
            .with_context(|| format!("opening catalog DB {}", self.db_path.display()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        f(&mut conn)
    }

    pub fn find_by_url(&self, url: &str) -> Result<Option<Video>> {
        self.with_connection(|conn| select_one(conn, "url = ?1", params![url]))
    }

    /// The oldest video carrying `title`.
    pub fn find_by_title(&self, title: &str) -> Result<Option<Video>> {
        self.with_connection(|conn| select_one(conn, "title = ?1", params![title]))
    }

    pub fn find_by_id(&self, id: i64) -> Result<Option<Video>> {
        self.with_connection(|conn| select_one(conn, "id = ?1", params![id]))
    }

    /// Inserts the video and its formats in one transaction. When the URL is
    /// already catalogued nothing is written and the existing row is returned.
    pub fn insert_video(&self, video: &NewVideo) -> Result<Video> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                r#"
                INSERT INTO video (title, duration, url, file_path, created_at)
                VALUES (?1, ?2, ?3, NULL, ?4)
                ON CONFLICT(url) DO NOTHING
                "#,
                params![
                    video.title,
                    video.duration,
                    video.url,
                    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )?;

            if inserted == 1 {
                let video_id = tx.last_insert_rowid();
                for (resolution, size) in &video.formats {
                    tx.execute(
                        "INSERT INTO format (resolution, size, video_id) VALUES (?1, ?2, ?3)",
                        params![resolution, size, video_id],
                    )?;
                }
            }
            tx.commit().context("committing new video")?;

            select_one(conn, "url = ?1", params![video.url])?
                .ok_or_else(|| anyhow!("video {} vanished after insert", video.url))
        })
    }

    /// Stores the path of the latest download and returns the re-read row.
    pub fn set_file_path(&self, id: i64, file_path: &str) -> Result<Option<Video>> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE video SET file_path = ?1 WHERE id = ?2",
                params![file_path, id],
            )?;
            select_one(conn, "id = ?1", params![id])
        })
    }

    /// Renames the oldest video titled `title`.
    pub fn rename(&self, title: &str, new_title: &str) -> Result<Option<Video>> {
        self.with_connection(|conn| {
            let Some(video) = select_one(conn, "title = ?1", params![title])? else {
                return Ok(None);
            };
            conn.execute(
                "UPDATE video SET title = ?1 WHERE id = ?2",
                params![new_title, video.id],
            )?;
            select_one(conn, "id = ?1", params![video.id])
        })
    }

    pub fn delete_format(&self, title: &str, resolution: &str) -> Result<FormatRemoval> {
        self.with_connection(|conn| {
            let Some(video) = select_one(conn, "title = ?1", params![title])? else {
                return Ok(FormatRemoval::NoVideo);
            };
            let removed = conn.execute(
                "DELETE FROM format WHERE video_id = ?1 AND resolution = ?2",
                params![video.id, resolution],
            )?;
            Ok(if removed == 0 {
                FormatRemoval::NoFormat
            } else {
                FormatRemoval::Removed
            })
        })
    }

    /// Removes the video and its formats together. Returns the deleted row.
    pub fn delete_video(&self, id: i64) -> Result<Option<Video>> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let Some(video) = select_one(&tx, "id = ?1", params![id])? else {
                return Ok(None);
            };
            tx.execute("DELETE FROM format WHERE video_id = ?1", params![id])?;
            tx.execute("DELETE FROM video WHERE id = ?1", params![id])?;
            tx.commit().context("committing video deletion")?;
            Ok(Some(video))
        })
    }

    /// Empties both tables in one transaction; on error nothing is removed.
    pub fn clear(&self) -> Result<ClearedRows> {
        self.with_connection(|conn| {
            let tx = conn.transaction()?;
            let formats = tx.execute("DELETE FROM format", [])?;
            let videos = tx.execute("DELETE FROM video", [])?;
            tx.commit().context("committing catalog clear")?;
            Ok(ClearedRows { videos, formats })
        })
    }

    /// Every video, oldest first.
    pub fn list(&self) -> Result<Vec<Video>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {VIDEO_COLUMNS} FROM video ORDER BY created_at ASC, id ASC"
            ))?;
            let mut rows = stmt.query([])?;
            let mut videos = Vec::new();
            while let Some(row) = rows.next()? {
                videos.push(row_to_video(row)?);
            }
            for video in &mut videos {
                video.formats = load_formats(conn, video.id)?;
            }
            Ok(videos)
        })
    }
}

/// Creates the tables if they do not exist yet, all or nothing.
fn ensure_tables(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS video (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            title TEXT NOT NULL,
            duration TEXT NOT NULL,
            url TEXT NOT NULL,
            file_path TEXT,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS format (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            resolution TEXT NOT NULL,
            size TEXT NOT NULL,
            video_id INTEGER NOT NULL,
            FOREIGN KEY (video_id) REFERENCES video(id) ON DELETE CASCADE
        );

        CREATE UNIQUE INDEX IF NOT EXISTS idx_video_url ON video(url);
        CREATE INDEX IF NOT EXISTS idx_video_title ON video(title);
        CREATE INDEX IF NOT EXISTS idx_format_video_id ON format(video_id);
        "#,
    )
    .context("creating catalog schema")?;

    tx.commit()?;
    Ok(())
}

/// First match for `filter` in insertion order, with its formats.
fn select_one(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Video>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {VIDEO_COLUMNS} FROM video WHERE {filter} ORDER BY id ASC LIMIT 1"
    ))?;
    let Some(mut video) = stmt.query_row(params, row_to_video).optional()? else {
        return Ok(None);
    };
    video.formats = load_formats(conn, video.id)?;
    Ok(Some(video))
}

fn load_formats(conn: &Connection, video_id: i64) -> Result<Vec<Format>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, resolution, size, video_id
        FROM format
        WHERE video_id = ?1
        ORDER BY id ASC
        "#,
    )?;
    let formats = stmt
        .query_map([video_id], |row| {
            Ok(Format {
                id: row.get("id")?,
                resolution: row.get("resolution")?,
                size: row.get("size")?,
                video_id: row.get("video_id")?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(formats)
}

fn row_to_video(row: &Row<'_>) -> rusqlite::Result<Video> {
    Ok(Video {
        id: row.get("id")?,
        title: row.get("title")?,
        duration: row.get("duration")?,
        url: row.get("url")?,
        file_path: row.get("file_path")?,
        created_at: row.get("created_at")?,
        formats: Vec::new(),
    })
}
