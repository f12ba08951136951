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

pub const SLASH_SEPARATOR: &str = "/";

/// Directory objects are stored with this suffix so that a directory
/// and an object of the same name can coexist on disk.
pub const GLOBAL_DIR_SUFFIX: &str = "__XLDIR__";

pub const GLOBAL_DIR_SUFFIX_WITH_SLASH: &str = "__XLDIR__/";

pub fn encode_dir_object(object: &str) -> String {
    if object.ends_with(SLASH_SEPARATOR) {
        format!("{}{}", object.trim_end_matches(SLASH_SEPARATOR), GLOBAL_DIR_SUFFIX)
    } else {
        object.to_string()
    }
}

pub fn decode_dir_object(object: &str) -> String {
    if object.ends_with(GLOBAL_DIR_SUFFIX) {
        format!("{}{}", object.trim_end_matches(GLOBAL_DIR_SUFFIX), SLASH_SEPARATOR)
    } else {
        object.to_string()
    }
}

pub fn is_dir_object(object: &str) -> bool {
    encode_dir_object(object).ends_with(GLOBAL_DIR_SUFFIX)
}

/// appends a trailing slash unless one is already present.
pub fn retain_slash(s: &str) -> String {
    if s.is_empty() || s.ends_with(SLASH_SEPARATOR) {
        s.to_string()
    } else {
        format!("{s}{SLASH_SEPARATOR}")
    }
}

/// Lexical cleanup of a slash separated path: collapses repeated
/// separators, resolves `.` and `..` elements, drops the trailing
/// slash. The empty path cleans to ".".
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with(SLASH_SEPARATOR);
    let mut out: Vec<&str> = Vec::new();

    for elem in path.split('/') {
        match elem {
            "" | "." => {}
            ".." => {
                if let Some(last) = out.last() {
                    if *last != ".." {
                        out.pop();
                    } else if !rooted {
                        out.push("..");
                    }
                } else if !rooted {
                    out.push("..");
                }
            }
            _ => out.push(elem),
        }
    }

    let joined = out.join(SLASH_SEPARATOR);
    match (rooted, joined.is_empty()) {
        (true, true) => SLASH_SEPARATOR.to_string(),
        (true, false) => format!("{SLASH_SEPARATOR}{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Joins path elements with single slashes and cleans the result,
/// keeping a trailing slash when the last element carries one.
pub fn path_join_buf(elements: &[&str]) -> String {
    let trailing_slash = elements.last().is_some_and(|v| v.ends_with(SLASH_SEPARATOR));

    let joined = elements.iter().filter(|v| !v.is_empty()).copied().collect::<Vec<&str>>().join(SLASH_SEPARATOR);

    let cleaned = clean(&joined);
    if trailing_slash {
        return format!("{cleaned}{SLASH_SEPARATOR}");
    }
    cleaned
}

/// returns everything up to and including the final slash of `path`.
pub fn dir(path: &str) -> String {
    match path.rfind('/') {
        Some(idx) => path[..=idx].to_string(),
        None => String::new(),
    }
}

/// Derives the directory a prefix listing starts scanning at. A prefix
/// without a slash scans the bucket root; otherwise the scan begins at
/// the deepest complete directory of the prefix.
pub fn base_dir_from_prefix(prefix: &str) -> String {
    let mut base_dir = dir(prefix);
    if base_dir == "." || base_dir == "./" || base_dir == "/" {
        base_dir = String::new();
    }
    if !prefix.contains('/') {
        base_dir = String::new();
    }
    if !base_dir.is_empty() && !base_dir.ends_with(SLASH_SEPARATOR) {
        base_dir.push_str(SLASH_SEPARATOR);
    }
    base_dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        assert_eq!(clean(""), ".");
        assert_eq!(clean("a/b/c"), "a/b/c");
        assert_eq!(clean("a//b//c/"), "a/b/c");
        assert_eq!(clean("/a/b/../c"), "/a/c");
        assert_eq!(clean("./a/./b"), "a/b");
        assert_eq!(clean("/../a"), "/a");
        assert_eq!(clean("../a"), "../a");
    }

    #[test]
    fn test_base_dir_from_prefix() {
        assert_eq!(base_dir_from_prefix("photos/2024/jan"), "photos/2024/");
        assert_eq!(base_dir_from_prefix("photos/"), "photos/");
        assert_eq!(base_dir_from_prefix("photos"), "");
        assert_eq!(base_dir_from_prefix(""), "");
    }

    #[test]
    fn test_dir_object_roundtrip() {
        assert_eq!(encode_dir_object("a/b/"), "a/b__XLDIR__");
        assert_eq!(decode_dir_object("a/b__XLDIR__"), "a/b/");
        assert_eq!(encode_dir_object("a/b"), "a/b");
        assert!(is_dir_object("a/b/"));
        assert!(!is_dir_object("a/b"));
    }

    #[test]
    fn test_path_join_buf() {
        assert_eq!(path_join_buf(&["a", "b"]), "a/b");
        assert_eq!(path_join_buf(&["a/", "b/"]), "a/b/");
        assert_eq!(path_join_buf(&["", "a", "b"]), "a/b");
    }
}
