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

pub type Result<T> = core::result::Result<T, DiskError>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum DiskError {
    #[error("File not found")]
    FileNotFound,

    #[error("Volume not found")]
    VolumeNotFound,

    #[error("Volume access denied")]
    VolumeAccessDenied,

    #[error("File is not a regular file")]
    IsNotRegular,

    #[error("File corrupt")]
    FileCorrupt,

    #[error("Drive is faulty")]
    FaultyDisk,

    #[error("Drive not found")]
    DiskNotFound,

    #[error("File name too long")]
    FileNameTooLong,

    #[error("I/O error: {0}")]
    Io(String),
}

impl DiskError {
    pub fn other<E>(error: E) -> DiskError
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        DiskError::Io(error.into().to_string())
    }
}

impl PartialEq for DiskError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (DiskError::FileNotFound, DiskError::FileNotFound) => true,
            (DiskError::VolumeNotFound, DiskError::VolumeNotFound) => true,
            (DiskError::VolumeAccessDenied, DiskError::VolumeAccessDenied) => true,
            (DiskError::IsNotRegular, DiskError::IsNotRegular) => true,
            (DiskError::FileCorrupt, DiskError::FileCorrupt) => true,
            (DiskError::FaultyDisk, DiskError::FaultyDisk) => true,
            (DiskError::DiskNotFound, DiskError::DiskNotFound) => true,
            (DiskError::FileNameTooLong, DiskError::FileNameTooLong) => true,
            (a, b) => a.to_string() == b.to_string(),
        }
    }
}

impl From<std::io::Error> for DiskError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => DiskError::FileNotFound,
            std::io::ErrorKind::PermissionDenied => DiskError::VolumeAccessDenied,
            _ => DiskError::Io(e.to_string()),
        }
    }
}

impl From<ferrite_filemeta::Error> for DiskError {
    fn from(e: ferrite_filemeta::Error) -> Self {
        match e {
            ferrite_filemeta::Error::FileNotFound => DiskError::FileNotFound,
            ferrite_filemeta::Error::VolumeNotFound => DiskError::VolumeNotFound,
            ferrite_filemeta::Error::FileCorrupt => DiskError::FileCorrupt,
            other => DiskError::Io(other.to_string()),
        }
    }
}

impl From<DiskError> for ferrite_filemeta::Error {
    fn from(e: DiskError) -> Self {
        match e {
            DiskError::FileNotFound => ferrite_filemeta::Error::FileNotFound,
            DiskError::VolumeNotFound => ferrite_filemeta::Error::VolumeNotFound,
            DiskError::FileCorrupt => ferrite_filemeta::Error::FileCorrupt,
            other => ferrite_filemeta::Error::Io(other.to_string()),
        }
    }
}
