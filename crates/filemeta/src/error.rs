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

pub type Result<T> = core::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("File not found")]
    FileNotFound,

    #[error("Volume not found")]
    VolumeNotFound,

    #[error("File version not found")]
    FileVersionNotFound,

    #[error("File corrupt")]
    FileCorrupt,

    #[error("Unexpected")]
    Unexpected,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("msgpack decode error: {0}")]
    MsgDecode(String),

    #[error("msgpack encode error: {0}")]
    MsgEncode(String),

    #[error("Invalid UTF-8: {0}")]
    FromUtf8(String),

    #[error("time component range error: {0}")]
    TimeComponentRange(String),

    #[error("uuid parse error: {0}")]
    UuidParse(String),
}

impl Error {
    pub fn other<E>(error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        std::io::Error::other(error).into()
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::FileNotFound, Error::FileNotFound) => true,
            (Error::VolumeNotFound, Error::VolumeNotFound) => true,
            (Error::FileVersionNotFound, Error::FileVersionNotFound) => true,
            (Error::FileCorrupt, Error::FileCorrupt) => true,
            (Error::Unexpected, Error::Unexpected) => true,
            (a, b) => a.to_string() == b.to_string(),
        }
    }
}

/// An I/O level end-of-stream, as opposed to the codec's own trailer.
pub fn is_io_eof(err: &Error) -> bool {
    match err {
        Error::Io(msg) => msg.contains("unexpected end of file") || msg.contains("early eof"),
        _ => false,
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            return Error::Io("unexpected end of file".to_string());
        }
        Error::Io(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::MsgDecode(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::MsgEncode(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(e: std::string::FromUtf8Error) -> Self {
        Error::FromUtf8(e.to_string())
    }
}

impl From<rmp::decode::ValueReadError> for Error {
    fn from(e: rmp::decode::ValueReadError) -> Self {
        Error::MsgDecode(e.to_string())
    }
}

impl From<rmp::encode::ValueWriteError> for Error {
    fn from(e: rmp::encode::ValueWriteError) -> Self {
        Error::MsgEncode(e.to_string())
    }
}

impl From<rmp::decode::NumValueReadError> for Error {
    fn from(e: rmp::decode::NumValueReadError) -> Self {
        Error::MsgDecode(e.to_string())
    }
}

impl From<rmp::decode::MarkerReadError> for Error {
    fn from(e: rmp::decode::MarkerReadError) -> Self {
        Error::MsgDecode(format!("{:?}", e.0))
    }
}

impl From<time::error::ComponentRange> for Error {
    fn from(e: time::error::ComponentRange) -> Self {
        Error::TimeComponentRange(e.to_string())
    }
}

impl From<uuid::Error> for Error {
    fn from(e: uuid::Error) -> Self {
        Error::UuidParse(e.to_string())
    }
}
