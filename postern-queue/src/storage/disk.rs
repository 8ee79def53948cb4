use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use postern_common::{ComponentOptions, ConfigError, Envelope, internal};
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::Storage;
use crate::{QueueEntry, QueueId, StorageError};

const ENVELOPE_EXTENSION: &str = "env";
const META_EXTENSION: &str = "meta";
const TEMP_PREFIX: &str = ".tmp_";
const DELETED_SUFFIX: &str = ".deleted";

/// Scheduling state kept apart from the message so retries rewrite little.
#[derive(Debug, Serialize, Deserialize)]
struct Meta {
    attempts: u32,
    next_attempt: DateTime<Utc>,
}

/// Entries stored as files, one envelope file and one metadata file each.
///
/// Both are bincode-encoded and named after the entry's id:
///
/// ```text
/// <envelope_dir>/<id>.env
/// <meta_dir>/<id>.meta
/// ```
///
/// Files are written to a temporary name (inside `tmp_dir` when configured,
/// otherwise with a `.tmp_` prefix next to the target) and renamed into place,
/// so a crash never leaves a half-written entry visible. Deletion renames to
/// a `.deleted` suffix first; leftovers are cleaned up on construction.
#[derive(Debug, Clone)]
pub struct DiskStorage {
    envelope_dir: PathBuf,
    meta_dir: PathBuf,
    tmp_dir: Option<PathBuf>,
}

impl DiskStorage {
    /// Build from a `disk` queue section, creating the directories.
    ///
    /// # Errors
    /// If `envelope_dir` or `meta_dir` is missing, or a directory cannot be
    /// created.
    pub fn from_options(options: &ComponentOptions) -> Result<Self, ConfigError> {
        let envelope_dir = options.require_path("envelope_dir")?;
        let meta_dir = options.require_path("meta_dir")?;
        let tmp_dir = options.path("tmp_dir")?;

        let unwritable = |field: &str| ConfigError::InvalidValue {
            scope: options.scope().to_string(),
            field: field.to_string(),
            expected: "a writable directory",
        };

        for (field, dir) in [
            ("envelope_dir", Some(&envelope_dir)),
            ("meta_dir", Some(&meta_dir)),
            ("tmp_dir", tmp_dir.as_ref()),
        ] {
            if let Some(dir) = dir
                && let Err(err) = std::fs::create_dir_all(dir)
            {
                internal!(level = ERROR, "Unable to create {}: {err}", dir.display());
                return Err(unwritable(field));
            }
        }

        Self::new(envelope_dir, meta_dir, tmp_dir).map_err(|_| unwritable("envelope_dir"))
    }

    /// # Errors
    /// If any of the directories cannot be created.
    pub fn new(
        envelope_dir: PathBuf,
        meta_dir: PathBuf,
        tmp_dir: Option<PathBuf>,
    ) -> Result<Self, StorageError> {
        for dir in [Some(&envelope_dir), Some(&meta_dir), tmp_dir.as_ref()]
            .into_iter()
            .flatten()
        {
            std::fs::create_dir_all(dir).map_err(StorageError::io(dir))?;
        }

        let storage = Self {
            envelope_dir,
            meta_dir,
            tmp_dir,
        };
        storage.cleanup_deleted_files();

        Ok(storage)
    }

    #[must_use]
    pub fn envelope_dir(&self) -> &Path {
        &self.envelope_dir
    }

    #[must_use]
    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    fn envelope_path(&self, id: &QueueId) -> PathBuf {
        self.envelope_dir.join(format!("{id}.{ENVELOPE_EXTENSION}"))
    }

    fn meta_path(&self, id: &QueueId) -> PathBuf {
        self.meta_dir.join(format!("{id}.{META_EXTENSION}"))
    }

    /// Remove `.deleted` files left by a delete interrupted by a crash.
    fn cleanup_deleted_files(&self) {
        let mut cleaned = 0;

        for dir in [&self.envelope_dir, &self.meta_dir] {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };

            for entry in entries.flatten() {
                if entry.file_name().to_string_lossy().ends_with(DELETED_SUFFIX)
                    && std::fs::remove_file(entry.path()).is_ok()
                {
                    cleaned += 1;
                }
            }
        }

        if cleaned > 0 {
            internal!(level = INFO, "Cleaned up {cleaned} orphaned .deleted files");
        }
    }

    /// Write `bytes` to `target` through a temporary file and a rename.
    async fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let filename = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let temp = match &self.tmp_dir {
            Some(dir) => dir.join(&filename),
            None => target.with_file_name(format!("{TEMP_PREFIX}{filename}")),
        };

        fs::write(&temp, bytes).await.map_err(StorageError::io(&temp))?;
        fs::rename(&temp, target).await.map_err(StorageError::io(target))
    }

    async fn read_meta(&self, id: &QueueId) -> Result<Option<Meta>, StorageError> {
        let path = self.meta_path(id);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(decode(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::io(path)(err)),
        }
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::standard(),
    )?)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
    Ok(value)
}

#[async_trait]
impl Storage for DiskStorage {
    async fn write(&self, entry: &QueueEntry) -> Result<(), StorageError> {
        let envelope = encode(&entry.envelope)?;
        let meta = encode(&Meta {
            attempts: entry.attempts,
            next_attempt: entry.next_attempt,
        })?;

        // Metadata last: an envelope without metadata is still loadable.
        self.write_atomic(&self.envelope_path(&entry.id), &envelope)
            .await?;
        self.write_atomic(&self.meta_path(&entry.id), &meta).await
    }

    async fn read(&self, id: &QueueId) -> Result<QueueEntry, StorageError> {
        let path = self.envelope_path(id);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(*id));
            }
            Err(err) => return Err(StorageError::io(path)(err)),
        };

        let envelope: Envelope = decode(&bytes)?;
        let meta = self.read_meta(id).await?.unwrap_or_else(|| Meta {
            attempts: 0,
            next_attempt: Utc::now(),
        });

        Ok(QueueEntry {
            id: *id,
            envelope,
            attempts: meta.attempts,
            next_attempt: meta.next_attempt,
        })
    }

    async fn remove(&self, id: &QueueId) -> Result<(), StorageError> {
        let envelope_path = self.envelope_path(id);
        let meta_path = self.meta_path(id);
        let deleted_envelope = PathBuf::from(format!("{}{DELETED_SUFFIX}", envelope_path.display()));
        let deleted_meta = PathBuf::from(format!("{}{DELETED_SUFFIX}", meta_path.display()));

        match fs::rename(&envelope_path, &deleted_envelope).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(*id));
            }
            Err(err) => return Err(StorageError::io(envelope_path)(err)),
        }
        let has_meta = fs::rename(&meta_path, &deleted_meta).await.is_ok();

        fs::remove_file(&deleted_envelope)
            .await
            .map_err(StorageError::io(&deleted_envelope))?;
        if has_meta {
            fs::remove_file(&deleted_meta)
                .await
                .map_err(StorageError::io(&deleted_meta))?;
        }

        Ok(())
    }

    async fn load(&self) -> Result<Vec<QueueEntry>, StorageError> {
        let mut dir = fs::read_dir(&self.envelope_dir)
            .await
            .map_err(StorageError::io(&self.envelope_dir))?;
        let mut ids = Vec::new();

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(StorageError::io(&self.envelope_dir))?
        {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(TEMP_PREFIX) || name.ends_with(DELETED_SUFFIX) {
                continue;
            }

            match QueueId::from_filename(&name, ENVELOPE_EXTENSION) {
                Some(id) => ids.push(id),
                None => internal!(level = WARN, "Ignoring unexpected file in queue: {name}"),
            }
        }

        ids.sort();

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read(&id).await {
                Ok(entry) => entries.push(entry),
                Err(err) => internal!(level = WARN, "Skipping unreadable queue entry {id}: {err}"),
            }
        }

        Ok(entries)
    }
}
