//! Attachment storage.
//!
//! Attachments live under `<root>/<incident_id>/step_<n>/<file_name>`. The
//! engine only keeps the relative reference (`<incident_id>/step_<n>/<name>`)
//! in the step record.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::{NamedTempFile, TempPath};
use thiserror::Error;
use tracing::{debug, warn};

/// Characters kept by [`secure_filename`]
static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid file name pattern"));

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("invalid attachment name: {0:?}")]
    InvalidName(String),

    #[error("invalid attachment reference: {0:?}")]
    InvalidReference(String),

    #[error("attachment I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BlobError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        BlobError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An upload written beside its target but not yet visible under its
/// reference. Dropping it discards the bytes and leaves the target untouched.
#[derive(Debug)]
pub struct StagedBlob {
    reference: String,
    target: PathBuf,
    file: TempPath,
}

impl StagedBlob {
    /// Reference the attachment will have once published
    pub fn reference(&self) -> &str {
        &self.reference
    }
}

/// Storage for step attachments
pub trait BlobStore: Send + Sync {
    /// Write `bytes` without replacing anything stored under the same reference
    fn stage(
        &self,
        incident_id: u64,
        step_index: usize,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StagedBlob, BlobError>;

    /// Move a staged upload onto its reference and return that reference
    fn publish(&self, staged: StagedBlob) -> Result<String, BlobError>;

    /// Persist `bytes` and return the reference to keep in the step record
    fn store(
        &self,
        incident_id: u64,
        step_index: usize,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<String, BlobError> {
        let staged = self.stage(incident_id, step_index, file_name, bytes)?;
        self.publish(staged)
    }

    /// Absolute path of an existing attachment
    fn resolve(&self, reference: &str) -> Option<PathBuf>;

    fn remove(&self, reference: &str) -> Result<(), BlobError>;

    /// Remove every attachment of an incident
    fn remove_incident(&self, incident_id: u64) -> Result<(), BlobError>;
}

/// Reduce an uploaded file name to a safe single path component.
///
/// Directory parts are dropped, spaces become underscores and anything outside
/// `[A-Za-z0-9._-]` is removed. Returns `None` when nothing usable is left.
pub fn secure_filename(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let spaced = base.trim().replace(char::is_whitespace, "_");
    let cleaned = UNSAFE_CHARS.replace_all(&spaced, "");
    let cleaned = cleaned.trim_matches(|c| c == '.' || c == '_');

    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Filesystem-backed [`BlobStore`]
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn step_dir(&self, incident_id: u64, step_index: usize) -> PathBuf {
        self.root
            .join(incident_id.to_string())
            .join(format!("step_{step_index}"))
    }

    /// Join a reference onto the root, rejecting anything that escapes it
    fn reference_path(&self, reference: &str) -> Option<PathBuf> {
        let relative = Path::new(reference);
        let safe = !reference.trim().is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        safe.then(|| self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn stage(
        &self,
        incident_id: u64,
        step_index: usize,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<StagedBlob, BlobError> {
        let name =
            secure_filename(file_name).ok_or_else(|| BlobError::InvalidName(file_name.to_string()))?;
        let dir = self.step_dir(incident_id, step_index);
        fs::create_dir_all(&dir).map_err(|e| BlobError::io(&dir, e))?;

        let target = dir.join(&name);
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| BlobError::io(&dir, e))?;
        tmp.write_all(bytes).map_err(|e| BlobError::io(&target, e))?;

        debug!(
            incident_id,
            step_index,
            size = bytes.len(),
            "Staged attachment {}",
            target.display()
        );
        Ok(StagedBlob {
            reference: format!("{incident_id}/step_{step_index}/{name}"),
            target,
            file: tmp.into_temp_path(),
        })
    }

    fn publish(&self, staged: StagedBlob) -> Result<String, BlobError> {
        let StagedBlob {
            reference,
            target,
            file,
        } = staged;
        file.persist(&target)
            .map_err(|e| BlobError::io(&target, e.error))?;

        debug!("Stored attachment {}", target.display());
        Ok(reference)
    }

    fn resolve(&self, reference: &str) -> Option<PathBuf> {
        self.reference_path(reference).filter(|p| p.is_file())
    }

    fn remove(&self, reference: &str) -> Result<(), BlobError> {
        let path = self
            .reference_path(reference)
            .ok_or_else(|| BlobError::InvalidReference(reference.to_string()))?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::io(&path, e)),
        }
    }

    fn remove_incident(&self, incident_id: u64) -> Result<(), BlobError> {
        let dir = self.root.join(incident_id.to_string());
        if !dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&dir).map_err(|e| {
            warn!("Failed to remove attachments in {}: {}", dir.display(), e);
            BlobError::io(&dir, e)
        })
    }
}
