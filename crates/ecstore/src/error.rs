// Copyright 2025 FerriteFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use ferrite_disk::error::DiskError;

pub type Result<T> = core::result::Result<T, StorageError>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum StorageError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Volume not found")]
    VolumeNotFound,

    #[error("File not found")]
    FileNotFound,

    #[error("File corrupt")]
    FileCorrupt,

    #[error("Remote backend is unreachable: {0}")]
    BackendDown(String),

    #[error("Operation timed out")]
    Timeout,

    /// Internal end-of-listing sentinel, never surfaced to clients.
    #[error("Unexpected")]
    Unexpected,

    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    pub fn other<E>(error: E) -> StorageError
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StorageError::Io(error.into().to_string())
    }
}

impl PartialEq for StorageError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StorageError::VolumeNotFound, StorageError::VolumeNotFound) => true,
            (StorageError::FileNotFound, StorageError::FileNotFound) => true,
            (StorageError::FileCorrupt, StorageError::FileCorrupt) => true,
            (StorageError::Timeout, StorageError::Timeout) => true,
            (StorageError::Unexpected, StorageError::Unexpected) => true,
            (a, b) => a.to_string() == b.to_string(),
        }
    }
}

impl From<DiskError> for StorageError {
    fn from(e: DiskError) -> Self {
        match e {
            DiskError::FileNotFound => StorageError::FileNotFound,
            DiskError::VolumeNotFound => StorageError::VolumeNotFound,
            DiskError::FileCorrupt => StorageError::FileCorrupt,
            other => StorageError::Io(other.to_string()),
        }
    }
}

impl From<ferrite_filemeta::Error> for StorageError {
    fn from(e: ferrite_filemeta::Error) -> Self {
        match e {
            ferrite_filemeta::Error::FileNotFound => StorageError::FileNotFound,
            ferrite_filemeta::Error::VolumeNotFound => StorageError::VolumeNotFound,
            ferrite_filemeta::Error::FileCorrupt => StorageError::FileCorrupt,
            ferrite_filemeta::Error::Unexpected => StorageError::Unexpected,
            other => StorageError::Io(other.to_string()),
        }
    }
}

impl From<StorageError> for ferrite_filemeta::Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::FileNotFound => ferrite_filemeta::Error::FileNotFound,
            StorageError::VolumeNotFound => ferrite_filemeta::Error::VolumeNotFound,
            StorageError::FileCorrupt => ferrite_filemeta::Error::FileCorrupt,
            StorageError::Unexpected => ferrite_filemeta::Error::Unexpected,
            other => ferrite_filemeta::Error::Io(other.to_string()),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::Io(e.to_string())
    }
}

pub fn is_err_not_found(err: &StorageError) -> bool {
    matches!(err, StorageError::FileNotFound | StorageError::VolumeNotFound)
}

pub fn is_err_bucket_not_found(err: &StorageError) -> bool {
    matches!(err, StorageError::BucketNotFound(_) | StorageError::VolumeNotFound)
}

/// True when every slot either succeeded with nothing or failed with a
/// NotFound class error.
pub fn is_all_not_found(errs: &[Option<StorageError>]) -> bool {
    if errs.is_empty() {
        return false;
    }
    errs.iter().all(|e| match e {
        Some(err) => is_err_not_found(err),
        None => false,
    })
}

pub fn is_all_volume_not_found(errs: &[Option<StorageError>]) -> bool {
    if errs.is_empty() {
        return false;
    }
    errs.iter().all(|e| matches!(e, Some(StorageError::VolumeNotFound)))
}
