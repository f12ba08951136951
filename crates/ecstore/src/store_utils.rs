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

use crate::error::{Result, StorageError};
use ferrite_disk::FERRITE_META_BUCKET;

/// Buckets with invalid DNS style names or below the reserved
/// namespace never get a persisted listing cache.
pub fn is_reserved_or_invalid_bucket(bucket: &str, strict: bool) -> bool {
    if bucket.is_empty() {
        return true;
    }
    if is_meta_bucket(bucket) {
        return true;
    }
    if strict {
        !is_valid_bucket_name_strict(bucket)
    } else {
        !is_valid_bucket_name(bucket)
    }
}

pub fn is_meta_bucket(bucket: &str) -> bool {
    bucket == FERRITE_META_BUCKET || bucket.starts_with(&format!("{FERRITE_META_BUCKET}/"))
}

fn is_valid_bucket_name(bucket: &str) -> bool {
    if bucket.len() < 3 || bucket.len() > 63 {
        return false;
    }
    bucket
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
        && !bucket.starts_with('-')
        && !bucket.ends_with('-')
}

fn is_valid_bucket_name_strict(bucket: &str) -> bool {
    is_valid_bucket_name(bucket) && !bucket.contains('.')
}

/// Validates the user supplied listing arguments.
pub fn check_list_objs_args(bucket: &str, _prefix: &str, marker: &Option<String>) -> Result<()> {
    if bucket.is_empty() {
        return Err(StorageError::InvalidArgument("bucket name cannot be empty".to_string()));
    }
    if !is_valid_bucket_name(bucket) && !is_meta_bucket(bucket) {
        return Err(StorageError::BucketNotFound(bucket.to_string()));
    }
    if let Some(marker) = marker {
        if marker.starts_with('/') {
            return Err(StorageError::InvalidArgument("marker cannot start with a slash".to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_bucket() {
        assert!(is_reserved_or_invalid_bucket(FERRITE_META_BUCKET, false));
        assert!(is_reserved_or_invalid_bucket("", false));
        assert!(is_reserved_or_invalid_bucket("ab", false));
        assert!(is_reserved_or_invalid_bucket("UPPER", false));
        assert!(!is_reserved_or_invalid_bucket("my-bucket", false));
        assert!(is_reserved_or_invalid_bucket("dot.name", true));
        assert!(!is_reserved_or_invalid_bucket("dot.name", false));
    }

    #[test]
    fn test_check_list_objs_args() {
        assert!(check_list_objs_args("my-bucket", "", &None).is_ok());
        assert!(check_list_objs_args("", "", &None).is_err());
        assert!(check_list_objs_args("my-bucket", "", &Some("/abs".to_string())).is_err());
    }
}
