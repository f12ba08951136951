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

use regex::Regex;
use std::io::{Error, Result};
use std::sync::LazyLock;

const OPEN_BRACES: &str = "{";
const CLOSE_BRACES: &str = "}";
const ELLIPSES: &str = "...";

static ELLIPSES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(.*)(\{[0-9a-z]*\.\.\.[0-9a-z]*\})(.*)").unwrap());

/// One ellipses pattern together with the prefix and suffix
/// surrounding it in the original argument.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub prefix: String,
    pub suffix: String,
    pub seq: Vec<String>,
}

impl Pattern {
    /// expands the pattern into its concrete strings.
    pub fn expand(&self) -> Vec<String> {
        self.seq
            .iter()
            .map(|v| match (self.prefix.is_empty(), self.suffix.is_empty()) {
                (false, true) => format!("{}{}", self.prefix, v),
                (true, false) => format!("{}{}", v, self.suffix),
                (true, true) => v.clone(),
                (false, false) => format!("{}{}{}", self.prefix, v, self.suffix),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }
}

/// All ellipses patterns found in a single input argument.
#[derive(Debug, PartialEq, Eq)]
pub struct ArgPattern {
    inner: Vec<Pattern>,
}

impl AsRef<Vec<Pattern>> for ArgPattern {
    fn as_ref(&self) -> &Vec<Pattern> {
        &self.inner
    }
}

impl ArgPattern {
    pub fn new(inner: Vec<Pattern>) -> Self {
        Self { inner }
    }

    /// expands all patterns, producing the cartesian product of the
    /// individual sequences. Each element of the result joins to one
    /// endpoint string.
    pub fn expand(&self) -> Vec<Vec<String>> {
        let expanded: Vec<Vec<String>> = self.inner.iter().map(|v| v.expand()).collect();
        Self::arg_expander(&expanded)
    }

    fn arg_expander(lbs: &[Vec<String>]) -> Vec<Vec<String>> {
        if lbs.len() == 1 {
            return lbs[0].iter().map(|v| vec![v.clone()]).collect();
        }

        let mut ret = Vec::new();
        let (first, others) = lbs.split_at(1);
        for bs in first[0].iter() {
            for mut obs in Self::arg_expander(others) {
                obs.push(bs.clone());
                ret.push(obs);
            }
        }
        ret
    }

    /// total number of expansions this argument produces.
    pub fn total_sizes(&self) -> usize {
        self.inner.iter().fold(1, |acc, v| acc * v.seq.len())
    }
}

/// Finds all ellipses patterns in `arg`, parsing the ranges numerically.
///
/// # Examples
/// ```no_run
/// use ferrite_utils::string::find_ellipses_patterns;
///
/// let pattern = find_ellipses_patterns("http://node{1...4}/disk{1...8}").unwrap();
/// assert_eq!(pattern.total_sizes(), 32);
/// ```
pub fn find_ellipses_patterns(arg: &str) -> Result<ArgPattern> {
    let mut parts = match ELLIPSES_RE.captures(arg) {
        Some(caps) => caps,
        None => {
            return Err(Error::other(format!(
                "Invalid ellipsis format in ({arg}), ranges must be of the form {{N...M}} with N and M positive integers, M greater than N"
            )));
        }
    };

    let mut patterns = Vec::new();
    while let Some(prefix) = parts.get(1) {
        let seq = parse_ellipses_range(&parts[2])?;

        match ELLIPSES_RE.captures(prefix.as_str()) {
            Some(cs) => {
                patterns.push(Pattern {
                    seq,
                    prefix: String::new(),
                    suffix: parts[3].to_owned(),
                });
                parts = cs;
            }
            None => {
                patterns.push(Pattern {
                    seq,
                    prefix: prefix.as_str().to_owned(),
                    suffix: parts[3].to_owned(),
                });
                break;
            }
        }
    }

    // Flower braces left over in a prefix or suffix point at a typo in
    // the input, refuse the argument instead of expanding it halfway.
    for p in patterns.iter() {
        if p.prefix.contains(OPEN_BRACES)
            || p.prefix.contains(CLOSE_BRACES)
            || p.suffix.contains(OPEN_BRACES)
            || p.suffix.contains(CLOSE_BRACES)
        {
            return Err(Error::other(format!(
                "Invalid ellipsis format in ({arg}), ranges must be of the form {{N...M}} with N and M positive integers, M greater than N"
            )));
        }
    }

    Ok(ArgPattern::new(patterns))
}

/// returns true if any input argument carries an ellipses pattern.
pub fn has_ellipses<T: AsRef<str>>(args: &[T]) -> bool {
    let tokens = [ELLIPSES, OPEN_BRACES, CLOSE_BRACES];
    args.iter().any(|v| tokens.iter().any(|t| v.as_ref().contains(t)))
}

/// Parses one ellipses range of the style `{1...64}` or `{01...32}`.
/// A leading zero on the start bound pads every produced element to the
/// width of the end bound.
pub fn parse_ellipses_range(pattern: &str) -> Result<Vec<String>> {
    if !pattern.contains(OPEN_BRACES) || !pattern.contains(CLOSE_BRACES) {
        return Err(Error::other("Invalid argument"));
    }

    let bounds: Vec<&str> = pattern
        .trim_start_matches(OPEN_BRACES)
        .trim_end_matches(CLOSE_BRACES)
        .split(ELLIPSES)
        .collect();
    if bounds.len() != 2 {
        return Err(Error::other("Invalid argument"));
    }

    let start = bounds[0].parse::<usize>().map_err(Error::other)?;
    let end = bounds[1].parse::<usize>().map_err(Error::other)?;
    if start > end {
        return Err(Error::other("Invalid argument: range start cannot be bigger than end"));
    }

    let mut ret = Vec::with_capacity(end - start + 1);
    for i in start..=end {
        if bounds[0].starts_with('0') && bounds[0].len() > 1 {
            ret.push(format!("{:0width$}", i, width = bounds[1].len()));
        } else {
            ret.push(format!("{i}"));
        }
    }

    Ok(ret)
}
