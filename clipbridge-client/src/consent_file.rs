use std::{
    collections::BTreeMap,
    fs, io,
    path::{Path, PathBuf},
};

use clipbridge_core::{ConsentStore, CoreError};
use tracing::warn;

use crate::config::{CONSENT_FILE_NAME, config_dir};

/// `consent.json` only ever holds a handful of flags.
pub const MAX_CONSENT_FILE_BYTES: u64 = 64 * 1024;

#[derive(Debug)]
pub enum ConsentLoadError {
    Metadata(io::Error),
    TooLarge { size: u64, max: u64 },
    Read(io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for ConsentLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsentLoadError::Metadata(e) => write!(f, "metadata read failed: {e}"),
            ConsentLoadError::TooLarge { size, max } => {
                write!(f, "file too large: {size} bytes (max {max})")
            }
            ConsentLoadError::Read(e) => write!(f, "read failed: {e}"),
            ConsentLoadError::Parse(e) => write!(f, "parse failed: {e}"),
        }
    }
}

impl std::error::Error for ConsentLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConsentLoadError::Metadata(e) | ConsentLoadError::Read(e) => Some(e),
            ConsentLoadError::Parse(e) => Some(e),
            ConsentLoadError::TooLarge { .. } => None,
        }
    }
}

#[derive(Debug)]
pub enum ConsentSaveError {
    Serialize(serde_json::Error),
    WriteTmp(io::Error),
    Rename(io::Error),
}

impl std::fmt::Display for ConsentSaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsentSaveError::Serialize(e) => write!(f, "serialize failed: {e}"),
            ConsentSaveError::WriteTmp(e) => write!(f, "tmp write failed: {e}"),
            ConsentSaveError::Rename(e) => write!(f, "rename failed: {e}"),
        }
    }
}

impl std::error::Error for ConsentSaveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConsentSaveError::Serialize(e) => Some(e),
            ConsentSaveError::WriteTmp(e) | ConsentSaveError::Rename(e) => Some(e),
        }
    }
}

/// Consent flags persisted as a flat JSON object, rewritten on every change.
#[derive(Debug, Clone)]
pub struct FileConsentStore {
    path: PathBuf,
    entries: BTreeMap<String, String>,
}

impl FileConsentStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConsentLoadError> {
        let path = path.into();
        let entries = if path.exists() {
            load_entries(&path)?
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, entries })
    }

    /// Opens the default store, starting empty if the file is unreadable.
    pub fn open_default() -> Self {
        let path = config_dir().join(CONSENT_FILE_NAME);
        Self::open(&path).unwrap_or_else(|err| {
            warn!(path = %path.display(), "consent file unusable, starting empty: {err}");
            Self {
                path,
                entries: BTreeMap::new(),
            }
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), ConsentSaveError> {
        let tmp = self.path.with_extension("json.tmp");
        let payload =
            serde_json::to_string_pretty(&self.entries).map_err(ConsentSaveError::Serialize)?;
        fs::write(&tmp, payload.as_bytes()).map_err(ConsentSaveError::WriteTmp)?;

        if self.path.exists() {
            let _ = fs::remove_file(&self.path);
        }

        fs::rename(&tmp, &self.path).map_err(ConsentSaveError::Rename)
    }
}

impl ConsentStore for FileConsentStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), CoreError> {
        if self.entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        self.entries.insert(key.to_owned(), value.to_owned());
        self.save()
            .map_err(|err| CoreError::Storage(format!("{}: {err}", self.path.display())))
    }
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, String>, ConsentLoadError> {
    let meta = fs::metadata(path).map_err(ConsentLoadError::Metadata)?;
    if meta.len() > MAX_CONSENT_FILE_BYTES {
        return Err(ConsentLoadError::TooLarge {
            size: meta.len(),
            max: MAX_CONSENT_FILE_BYTES,
        });
    }

    let data = fs::read_to_string(path).map_err(ConsentLoadError::Read)?;
    serde_json::from_str(&data).map_err(ConsentLoadError::Parse)
}
