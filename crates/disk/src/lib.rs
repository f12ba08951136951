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

pub mod api;
pub mod error;
mod local;

pub use api::*;
pub use local::*;

/// Reserved bucket holding server internal state, metacaches included.
pub const FERRITE_META_BUCKET: &str = ".ferritefs.sys";

/// Scratch space below the meta bucket.
pub const FERRITE_META_TMP_BUCKET: &str = ".ferritefs.sys/tmp";

/// Deleted trees are parked here for asynchronous removal.
pub const FERRITE_META_TMP_DELETED_BUCKET: &str = ".ferritefs.sys/tmp/.trash";

/// Name of the per-object manifest file.
pub const STORAGE_FORMAT_FILE: &str = "fm.meta";

/// Prefix below the meta bucket where per-bucket state is kept.
pub const BUCKET_META_PREFIX: &str = "buckets";
