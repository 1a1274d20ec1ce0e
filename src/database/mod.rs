pub mod models;

use crate::core::duplicate::{DuplicateGroup, DuplicateType, ImageInfo};
use chrono::{DateTime, SecondsFormat, Utc};
use models::{ImageRow, ScanRecord};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database query error: {0}")]
    Query(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Migration {version} failed: {message}")]
    Migration { version: i64, message: String },

    #[error("Corrupt row for {path}: {message}")]
    Corrupt { path: String, message: String },
}

/// Latest schema version this build knows how to produce.
pub const SCHEMA_VERSION: i64 = 3;

struct Migration {
    version: i64,
    description: &'static str,
    /// Column the migration adds; its presence means the step already ran.
    adds_column: (&'static str, &'static str),
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 2,
        description: "Add file_hash column for exact matching",
        adds_column: ("images", "file_hash"),
        up: "ALTER TABLE images ADD COLUMN file_hash TEXT DEFAULT '';
             CREATE INDEX IF NOT EXISTS idx_images_file_hash ON images(file_hash);",
    },
    Migration {
        version: 3,
        description: "Record which matcher produced each group",
        adds_column: ("images", "group_type"),
        up: "ALTER TABLE images ADD COLUMN group_type TEXT NOT NULL DEFAULT 'similar';",
    },
];

const BASE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY,
        applied_at TEXT DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        path TEXT UNIQUE NOT NULL,
        hash INTEGER NOT NULL,
        width INTEGER NOT NULL,
        height INTEGER NOT NULL,
        format TEXT NOT NULL,
        file_size INTEGER NOT NULL,
        mod_time TEXT NOT NULL,
        has_exif INTEGER DEFAULT 0,
        score REAL NOT NULL,
        group_id INTEGER DEFAULT 0,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS idx_images_hash ON images(hash);
    CREATE INDEX IF NOT EXISTS idx_images_group_id ON images(group_id);

    CREATE TABLE IF NOT EXISTS scan_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        folder TEXT NOT NULL,
        scanned_at TEXT NOT NULL,
        total_images INTEGER NOT NULL,
        total_groups INTEGER NOT NULL,
        total_duplicates INTEGER NOT NULL
    );
";

const IMAGE_COLUMNS: &str = "path, hash, file_hash, width, height, format, file_size, \
                             mod_time, has_exif, score, group_id, group_type";

/// SQLite store for scanned images, their group assignments and scan history.
pub struct Storage {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Storage {
    /// Open (or create) the database at `db_path`, creating parent
    /// directories and applying pending migrations.
    pub fn open(db_path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(db_path)?;
        let storage = Self {
            conn,
            path: Some(db_path.to_path_buf()),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let storage = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn initialize_schema(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(BASE_SCHEMA)?;
        self.migrate()
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        let current = self.schema_version()?;

        for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
            let (table, column) = migration.adds_column;
            if !self.column_exists(table, column)? {
                self.conn
                    .execute_batch(migration.up)
                    .map_err(|e| DatabaseError::Migration {
                        version: migration.version,
                        message: format!("{}: {}", migration.description, e),
                    })?;
                log::info!(
                    "Applied migration {}: {}",
                    migration.version,
                    migration.description
                );
            }
            self.conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![migration.version],
            )?;
        }

        Ok(())
    }

    pub fn schema_version(&self) -> Result<i64, DatabaseError> {
        Ok(self.conn.query_row(
            "SELECT COALESCE(MAX(version), 1) FROM schema_version",
            [],
            |row| row.get(0),
        )?)
    }

    fn column_exists(&self, table: &str, column: &str) -> Result<bool, DatabaseError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
            params![table, column],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Insert or replace every image by path, in one transaction. Replaced
    /// rows lose their group assignment.
    pub fn save_images(&mut self, images: &[ImageInfo]) -> Result<(), DatabaseError> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO images
                 (path, hash, file_hash, width, height, format, file_size, mod_time, has_exif, score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for image in images {
                stmt.execute(params![
                    image.path.to_string_lossy(),
                    image.hash as i64,
                    image.file_hash.as_deref().unwrap_or(""),
                    image.width,
                    image.height,
                    image.format,
                    image.file_size as i64,
                    image.mod_time.to_rfc3339_opts(SecondsFormat::Nanos, true),
                    image.has_exif,
                    image.score,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Every stored image, ordered by path.
    pub fn get_all_images(&self) -> Result<Vec<ImageInfo>, DatabaseError> {
        let rows = self.query_rows(
            &format!("SELECT {} FROM images ORDER BY path", IMAGE_COLUMNS),
            [],
        )?;
        rows.into_iter()
            .map(|row| into_image(row).map(|(image, _, _)| image))
            .collect()
    }

    /// Replace all group assignments with `groups`, atomically.
    pub fn update_groups(&mut self, groups: &[DuplicateGroup]) -> Result<(), DatabaseError> {
        let tx = self.conn.transaction()?;
        tx.execute("UPDATE images SET group_id = 0, group_type = 'similar'", [])?;
        {
            let mut stmt =
                tx.prepare("UPDATE images SET group_id = ?1, group_type = ?2 WHERE path = ?3")?;
            for group in groups {
                for image in group.images() {
                    stmt.execute(params![
                        group.id as i64,
                        group.group_type.as_str(),
                        image.path.to_string_lossy(),
                    ])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Members of group `group_id`, ordered by path.
    pub fn get_images_by_group_id(&self, group_id: usize) -> Result<Vec<ImageInfo>, DatabaseError> {
        let rows = self.query_rows(
            &format!(
                "SELECT {} FROM images WHERE group_id = ?1 ORDER BY path",
                IMAGE_COLUMNS
            ),
            params![group_id as i64],
        )?;
        rows.into_iter()
            .map(|row| into_image(row).map(|(image, _, _)| image))
            .collect()
    }

    /// Rebuild the stored groups, ordered by ID. Keep and Remove are derived
    /// again from the stored attributes; groups left with a single member
    /// (after deletions) are skipped.
    pub fn get_duplicate_groups(&self) -> Result<Vec<DuplicateGroup>, DatabaseError> {
        let rows = self.query_rows(
            &format!(
                "SELECT {} FROM images WHERE group_id > 0 ORDER BY group_id, path",
                IMAGE_COLUMNS
            ),
            [],
        )?;

        let mut by_id: BTreeMap<i64, (DuplicateType, Vec<ImageInfo>)> = BTreeMap::new();
        for row in rows {
            let (image, group_id, group_type) = into_image(row)?;
            by_id
                .entry(group_id)
                .or_insert_with(|| (group_type, Vec::new()))
                .1
                .push(image);
        }

        Ok(by_id
            .into_iter()
            .filter_map(|(id, (group_type, images))| {
                DuplicateGroup::new(id as usize, group_type, images)
            })
            .collect())
    }

    /// Remove the row for `path`. Returns whether a row existed.
    pub fn delete_image(&self, path: &Path) -> Result<bool, DatabaseError> {
        let affected = self.conn.execute(
            "DELETE FROM images WHERE path = ?1",
            params![path.to_string_lossy()],
        )?;
        Ok(affected > 0)
    }

    pub fn get_image(&self, path: &Path) -> Result<Option<ImageInfo>, DatabaseError> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {} FROM images WHERE path = ?1", IMAGE_COLUMNS),
                params![path.to_string_lossy()],
                read_image_row,
            )
            .optional()?;
        row.map(|row| into_image(row).map(|(image, _, _)| image))
            .transpose()
    }

    pub fn record_scan(
        &self,
        folder: &str,
        total_images: usize,
        total_groups: usize,
        total_duplicates: usize,
    ) -> Result<i64, DatabaseError> {
        self.conn.execute(
            "INSERT INTO scan_history (folder, scanned_at, total_images, total_groups, total_duplicates)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                folder,
                Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
                total_images as i64,
                total_groups as i64,
                total_duplicates as i64,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent scans first.
    pub fn scan_history(&self, limit: usize) -> Result<Vec<ScanRecord>, DatabaseError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, folder, scanned_at, total_images, total_groups, total_duplicates
             FROM scan_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, folder, scanned_at, images, groups, duplicates)| {
                Ok(ScanRecord {
                    scanned_at: parse_timestamp(&folder, &scanned_at)?,
                    id,
                    folder,
                    total_images: images.max(0) as usize,
                    total_groups: groups.max(0) as usize,
                    total_duplicates: duplicates.max(0) as usize,
                })
            })
            .collect()
    }

    /// Number of distinct non-zero group IDs currently stored.
    pub fn group_count(&self) -> Result<usize, DatabaseError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT group_id) FROM images WHERE group_id > 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn query_rows<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<ImageRow>, DatabaseError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, read_image_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn read_image_row(row: &Row<'_>) -> rusqlite::Result<ImageRow> {
    Ok(ImageRow {
        path: row.get(0)?,
        hash: row.get(1)?,
        file_hash: row.get(2)?,
        width: row.get(3)?,
        height: row.get(4)?,
        format: row.get(5)?,
        file_size: row.get(6)?,
        mod_time: row.get(7)?,
        has_exif: row.get(8)?,
        score: row.get(9)?,
        group_id: row.get(10)?,
        group_type: row.get(11)?,
    })
}

fn into_image(row: ImageRow) -> Result<(ImageInfo, i64, DuplicateType), DatabaseError> {
    let mod_time = parse_timestamp(&row.path, &row.mod_time)?;
    let corrupt = |what: &str| DatabaseError::Corrupt {
        path: row.path.clone(),
        message: format!("{} out of range", what),
    };
    let width = u32::try_from(row.width).map_err(|_| corrupt("width"))?;
    let height = u32::try_from(row.height).map_err(|_| corrupt("height"))?;
    let file_size = u64::try_from(row.file_size).map_err(|_| corrupt("file_size"))?;
    let group_type =
        DuplicateType::parse(&row.group_type).ok_or_else(|| DatabaseError::Corrupt {
            path: row.path.clone(),
            message: format!("unknown group type {:?}", row.group_type),
        })?;

    let image = ImageInfo {
        path: PathBuf::from(&row.path),
        // Stored bit-for-bit as a signed integer.
        hash: row.hash as u64,
        file_hash: row.file_hash.filter(|h| !h.is_empty()),
        width,
        height,
        format: row.format,
        file_size,
        mod_time,
        has_exif: row.has_exif,
        score: row.score,
    };
    Ok((image, row.group_id, group_type))
}

fn parse_timestamp(owner: &str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Corrupt {
            path: owner.to_string(),
            message: format!("bad timestamp {:?}: {}", value, e),
        })
}
