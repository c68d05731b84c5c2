//! Media store implementation

use crate::StorageError;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Suffixes tried after the bare timestamp name is taken
const MAX_NAME_SUFFIX: u32 = 1000;

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Media root directory
    pub root: PathBuf,
    /// Photo directory, relative to root
    pub photo_dir: String,
    /// Video directory, relative to root
    pub video_dir: String,
    /// Detection frame directory, relative to root
    pub detection_dir: String,
    /// Detection log file, relative to root
    pub detection_log: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("static"),
            photo_dir: "photos".to_string(),
            video_dir: "videos".to_string(),
            detection_dir: "detections".to_string(),
            detection_log: "detection_log.txt".to_string(),
        }
    }
}

/// Kind of persisted media artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Detection,
}

impl MediaKind {
    /// Filename prefix
    pub fn prefix(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Detection => "detection",
        }
    }

    /// Filename extension (without dot)
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Photo | MediaKind::Detection => "jpg",
            MediaKind::Video => "avi",
        }
    }

    /// `<kind>_<YYYYMMDD_HHMMSS>[_<n>].<ext>`
    pub fn filename(&self, at: DateTime<Local>, suffix: u32) -> String {
        let stamp = at.format("%Y%m%d_%H%M%S");
        if suffix == 0 {
            format!("{}_{}.{}", self.prefix(), stamp, self.extension())
        } else {
            format!("{}_{}_{}.{}", self.prefix(), stamp, suffix, self.extension())
        }
    }
}

/// A newly created, empty artifact file owned by the caller
#[derive(Debug)]
pub struct ReservedFile {
    pub filename: String,
    pub path: PathBuf,
    pub file: File,
}

/// Photo and video filenames, newest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaListing {
    pub photos: Vec<String>,
    pub videos: Vec<String>,
}

/// Media store rooted at a single directory
#[derive(Debug)]
pub struct MediaStore {
    photos: PathBuf,
    videos: PathBuf,
    detections: PathBuf,
    log_path: PathBuf,
}

impl MediaStore {
    /// Create the media directories if needed and open the store
    pub fn open(config: &StorageConfig) -> Result<Self, StorageError> {
        let store = Self {
            photos: config.root.join(&config.photo_dir),
            videos: config.root.join(&config.video_dir),
            detections: config.root.join(&config.detection_dir),
            log_path: config.root.join(&config.detection_log),
        };

        for dir in [&store.photos, &store.videos, &store.detections] {
            fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;
        }

        info!("Media store ready at {}", config.root.display());
        Ok(store)
    }

    fn dir(&self, kind: MediaKind) -> &Path {
        match kind {
            MediaKind::Photo => &self.photos,
            MediaKind::Video => &self.videos,
            MediaKind::Detection => &self.detections,
        }
    }

    /// Path of the append-only detection log
    pub fn detection_log_path(&self) -> &Path {
        &self.log_path
    }

    /// Create a fresh, uniquely named file for an artifact.
    ///
    /// Uses create-new semantics, so concurrent callers within the same
    /// second get distinct suffixed names instead of clobbering each other.
    pub fn reserve(
        &self,
        kind: MediaKind,
        at: DateTime<Local>,
    ) -> Result<ReservedFile, StorageError> {
        let dir = self.dir(kind);
        for suffix in 0..=MAX_NAME_SUFFIX {
            let filename = kind.filename(at, suffix);
            let path = dir.join(&filename);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    debug!("Reserved {}", path.display());
                    return Ok(ReservedFile { filename, path, file });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_error(&path, e)),
            }
        }
        Err(StorageError::NameExhausted(kind.filename(at, 0)))
    }

    /// Write a complete artifact in one go and return its filename
    pub fn save(
        &self,
        kind: MediaKind,
        at: DateTime<Local>,
        bytes: &[u8],
    ) -> Result<String, StorageError> {
        let mut reserved = self.reserve(kind, at)?;
        if let Err(e) = reserved.file.write_all(bytes).and_then(|_| reserved.file.sync_data()) {
            // Leave no truncated artifact behind for listings to pick up
            if let Err(rm) = fs::remove_file(&reserved.path) {
                warn!("Failed to remove partial {}: {}", reserved.path.display(), rm);
            }
            return Err(io_error(&reserved.path, e));
        }
        Ok(reserved.filename)
    }

    /// Append one line to the detection log
    pub fn append_detection_log(&self, line: &str) -> Result<(), StorageError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| io_error(&self.log_path, e))?;

        let mut entry = line.trim_end_matches('\n').to_string();
        entry.push('\n');
        // One write call per entry so readers see whole lines or nothing new
        file.write_all(entry.as_bytes())
            .map_err(|e| io_error(&self.log_path, e))
    }

    /// Detection log lines, oldest first. A missing log reads as empty.
    pub fn detection_log(&self) -> Result<Vec<String>, StorageError> {
        let mut contents = String::new();
        match File::open(&self.log_path) {
            Ok(mut file) => {
                file.read_to_string(&mut contents)
                    .map_err(|e| io_error(&self.log_path, e))?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.log_path, e)),
        }
        Ok(contents.lines().map(|l| format!("{}\n", l)).collect())
    }

    /// Artifact filenames of one kind, newest first.
    ///
    /// A snapshot of the directory at call time; entries that vanish or fail
    /// to stat mid-listing are skipped.
    pub fn list(&self, kind: MediaKind) -> Result<Vec<String>, StorageError> {
        let dir = self.dir(kind);
        let entries = fs::read_dir(dir).map_err(|e| io_error(dir, e))?;
        let suffix = format!(".{}", kind.extension());

        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.ends_with(&suffix))
            .collect();

        names.sort_unstable_by(|a, b| b.cmp(a));
        Ok(names)
    }

    /// Photos and videos, newest first
    pub fn list_media(&self) -> Result<MediaListing, StorageError> {
        Ok(MediaListing {
            photos: self.list(MediaKind::Photo)?,
            videos: self.list(MediaKind::Video)?,
        })
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.display().to_string(),
        source,
    }
}
