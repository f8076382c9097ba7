//! File attachments and the size policy applied before they reach the core

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Upload limit advertised by the widget ("не более 5 Mb")
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 5 * 1024 * 1024;

/// Reference to a file the user picked or dropped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Display name, without directories
    pub name: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default = "default_media_type")]
    pub media_type: String,
}

fn default_media_type() -> String {
    mime_guess::mime::APPLICATION_OCTET_STREAM.to_string()
}

impl FileRef {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        let name = name.into();
        let media_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .to_string();
        Self {
            name,
            size_bytes,
            media_type,
        }
    }

    /// Build a reference from file metadata on disk
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, AttachmentError> {
        let path = path.as_ref();
        let metadata = std::fs::metadata(path).map_err(|e| AttachmentError::Unreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        if !metadata.is_file() {
            return Err(AttachmentError::NotAFile(path.display().to_string()));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| AttachmentError::NotAFile(path.display().to_string()))?;
        Ok(Self::new(name, metadata.len()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("File {name} is {size_bytes} bytes, the limit is {max_bytes} bytes")]
    TooLarge {
        name: String,
        size_bytes: u64,
        max_bytes: u64,
    },
    #[error("Not a regular file: {0}")]
    NotAFile(String),
    #[error("Cannot read {path}: {reason}")]
    Unreadable { path: String, reason: String },
    #[error("No file was dropped")]
    NothingDropped,
}

/// Checks applied by the caller before a file is handed to the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentPolicy {
    pub max_bytes: u64,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
        }
    }
}

impl AttachmentPolicy {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn check(&self, file: &FileRef) -> Result<(), AttachmentError> {
        if file.size_bytes > self.max_bytes {
            return Err(AttachmentError::TooLarge {
                name: file.name.clone(),
                size_bytes: file.size_bytes,
                max_bytes: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Drag-and-drop accepts one file at a time: the first one wins
    pub fn pick_dropped(&self, files: Vec<FileRef>) -> Result<FileRef, AttachmentError> {
        let first = files
            .into_iter()
            .next()
            .ok_or(AttachmentError::NothingDropped)?;
        self.check(&first)?;
        Ok(first)
    }
}
