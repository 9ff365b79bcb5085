use std::fs;
use std::path::{Path, PathBuf};

use dqa_core::error::AppError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::snapshot::IndexEntry;

pub const INDEX_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexStatus {
    pub ready: bool,
    pub model: Option<String>,
    pub dims: Option<u32>,
    pub chunk_count: u32,
    #[serde(default)]
    pub documents: u32,
    /// Bumped on every publish.
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub format: u32,
    #[serde(default)]
    pub entries_sha256: Option<String>,
    pub updated_at: Option<String>,
}

impl IndexStatus {
    pub fn not_ready() -> Self {
        Self {
            ready: false,
            model: None,
            dims: None,
            chunk_count: 0,
            documents: 0,
            version: 0,
            format: INDEX_FORMAT_VERSION,
            entries_sha256: None,
            updated_at: None,
        }
    }
}

/// On-disk index: `index_entries.json` plus `index_status.json`, each replaced via tmp → rename.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn open(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn status_path(&self) -> PathBuf {
        self.dir.join("index_status.json")
    }

    fn entries_path(&self) -> PathBuf {
        self.dir.join("index_entries.json")
    }

    fn ensure_dirs(&self) -> Result<(), AppError> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            AppError::new("INDEX_BUILD_FAILED", "Failed to create index directory")
                .with_details(format!("path={}; err={}", self.dir.display(), e))
        })
    }

    pub fn read_status(&self) -> Result<IndexStatus, AppError> {
        let path = self.status_path();
        if !path.exists() {
            return Ok(IndexStatus::not_ready());
        }
        let bytes = read_bytes(&path)?;
        decode(&path, &bytes)
    }

    /// Entries matching `status`; a checksum mismatch means a torn or foreign write.
    pub fn read_entries(&self, status: &IndexStatus) -> Result<Vec<IndexEntry>, AppError> {
        let path = self.entries_path();
        if !path.exists() {
            return Err(AppError::new("INDEX_CORRUPT", "Index entries file missing")
                .with_details(format!("path={}", path.display())));
        }
        let bytes = read_bytes(&path)?;
        let actual = hex::encode(Sha256::digest(&bytes));
        if status.entries_sha256.as_deref() != Some(actual.as_str()) {
            return Err(AppError::new(
                "INDEX_CORRUPT",
                "Index entries do not match index status",
            )
            .with_details(format!(
                "expected={}; actual={}",
                status.entries_sha256.as_deref().unwrap_or("none"),
                actual
            )));
        }
        decode(&path, &bytes)
    }

    /// Entries are written before the status that vouches for them.
    pub fn write(&self, entries: &[IndexEntry], mut status: IndexStatus) -> Result<IndexStatus, AppError> {
        self.ensure_dirs()?;
        let json = serde_json::to_vec(entries).map_err(|e| {
            AppError::new("INDEX_BUILD_FAILED", "Failed to encode index entries")
                .with_details(e.to_string())
        })?;
        status.entries_sha256 = Some(hex::encode(Sha256::digest(&json)));
        write_atomic(&self.entries_path(), &json)?;

        let json = serde_json::to_vec_pretty(&status).map_err(|e| {
            AppError::new("INDEX_BUILD_FAILED", "Failed to encode index status")
                .with_details(e.to_string())
        })?;
        write_atomic(&self.status_path(), &json)?;
        Ok(status)
    }
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, AppError> {
    fs::read(path).map_err(|e| {
        AppError::new("INDEX_READ_FAILED", "Failed to read index file")
            .with_details(format!("path={}; err={}", path.display(), e))
    })
}

fn decode<T: DeserializeOwned>(path: &Path, bytes: &[u8]) -> Result<T, AppError> {
    serde_json::from_slice(bytes).map_err(|e| {
        AppError::new("INDEX_CORRUPT", "Failed to decode index file")
            .with_details(format!("path={}; err={}", path.display(), e))
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| {
        AppError::new("INDEX_BUILD_FAILED", "Failed to write index file")
            .with_details(format!("path={}; err={}", tmp.display(), e))
    })?;
    fs::rename(&tmp, path).map_err(|e| {
        AppError::new("INDEX_BUILD_FAILED", "Failed to finalize index file write")
            .with_details(format!("tmp={}; dest={}; err={}", tmp.display(), path.display(), e))
    })
}
