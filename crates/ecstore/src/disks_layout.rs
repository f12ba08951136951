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

use ferrite_utils::string::{ArgPattern, find_ellipses_patterns, has_ellipses};
use std::collections::HashSet;
use std::env;
use tracing::debug;

/// Supported erasure set sizes, used to find the optimal single set size.
const SET_SIZES: [usize; 15] = [2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];

pub const ENV_ERASURE_SET_DRIVE_COUNT: &str = "FERRITE_ERASURE_SET_DRIVE_COUNT";

pub type Result<T> = core::result::Result<T, LayoutError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LayoutError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Incorrect number of endpoints provided: {0}")]
    InvalidNumberOfEndpoints(String),

    #[error("Duplicate endpoint: {0}")]
    DuplicateEndpoint(String),

    #[error("No symmetric distribution detected: {0}")]
    AsymmetricLayout(String),

    #[error("Invalid erasure set size: {0}")]
    InvalidErasureSetSize(String),
}

impl LayoutError {
    /// Planner process exit codes: unsupported set sizes exit 2, every
    /// other layout problem exits 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            LayoutError::InvalidErasureSetSize(_) => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct PoolDisksLayout {
    cmd_line: String,
    layout: Vec<Vec<String>>,
}

impl PoolDisksLayout {
    fn new(args: impl Into<String>, layout: Vec<Vec<String>>) -> Self {
        PoolDisksLayout {
            cmd_line: args.into(),
            layout,
        }
    }

    fn count(&self) -> usize {
        self.layout.len()
    }

    pub fn get_cmd_line(&self) -> &str {
        &self.cmd_line
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vec<String>> {
        self.layout.iter()
    }
}

/// The planned endpoint grid: per pool, an even list of equally sized
/// erasure sets.
#[derive(Debug, Default)]
pub struct DisksLayout {
    pub legacy: bool,
    pub pools: Vec<PoolDisksLayout>,
}

impl DisksLayout {
    pub fn from_volumes<T: AsRef<str>>(args: &[T]) -> Result<Self> {
        if args.is_empty() {
            return Err(LayoutError::InvalidArgument("no endpoints provided".to_string()));
        }

        let is_ellipses = args.iter().any(|v| has_ellipses(&[v]));

        let set_drive_count: usize = match env::var(ENV_ERASURE_SET_DRIVE_COUNT) {
            Ok(v) => v
                .parse()
                .map_err(|e| LayoutError::InvalidErasureSetSize(format!("{}: {e}", ENV_ERASURE_SET_DRIVE_COUNT)))?,
            Err(_) => {
                debug!("{} not set, computing set size", ENV_ERASURE_SET_DRIVE_COUNT);
                0
            }
        };

        // None of the args have ellipses, use the older single pool style.
        if !is_ellipses {
            let set_args = get_all_sets(set_drive_count, is_ellipses, args)?;

            return Ok(DisksLayout {
                legacy: true,
                pools: vec![PoolDisksLayout::new(
                    args.iter().map(AsRef::as_ref).collect::<Vec<&str>>().join(" "),
                    set_args,
                )],
            });
        }

        let mut layout = Vec::with_capacity(args.len());
        for arg in args.iter() {
            if !has_ellipses(&[arg]) && args.len() > 1 {
                return Err(LayoutError::InvalidArgument(
                    "all args must have ellipses for pool expansion".to_string(),
                ));
            }

            let set_args = get_all_sets(set_drive_count, is_ellipses, &[arg])?;
            layout.push(PoolDisksLayout::new(arg.as_ref(), set_args));
        }

        Ok(DisksLayout {
            legacy: false,
            pools: layout,
        })
    }

    pub fn is_empty_layout(&self) -> bool {
        self.pools.is_empty()
            || self.pools[0].layout.is_empty()
            || self.pools[0].layout[0].is_empty()
            || self.pools[0].layout[0][0].is_empty()
    }

    pub fn is_single_drive_layout(&self) -> bool {
        self.pools.len() == 1 && self.pools[0].layout.len() == 1 && self.pools[0].layout[0].len() == 1
    }

    pub fn get_set_count(&self, i: usize) -> usize {
        self.pools.get(i).map_or(0, |v| v.count())
    }

    pub fn get_drives_per_set(&self, i: usize) -> usize {
        self.pools.get(i).map_or(0, |v| v.layout.first().map_or(0, |v| v.len()))
    }

    pub fn get_cmd_line(&self, i: usize) -> String {
        self.pools.get(i).map_or(String::new(), |v| v.get_cmd_line().to_owned())
    }

    pub fn get_single_drive_layout(&self) -> &str {
        &self.pools[0].layout[0][0]
    }
}

/// Parses all ellipses input arguments and expands them into the list
/// of endpoints chunked evenly by the chosen set size.
///
/// For example: {1...64} is divided into 4 sets each of size 16.
fn get_all_sets<T: AsRef<str>>(set_drive_count: usize, is_ellipses: bool, args: &[T]) -> Result<Vec<Vec<String>>> {
    let endpoint_set = if is_ellipses {
        EndpointSet::from_volumes(args, set_drive_count)?
    } else {
        let set_indexes = if args.len() > 1 {
            get_set_indexes(args, &[args.len()], set_drive_count, &[])?
        } else {
            vec![vec![args.len()]]
        };
        let endpoints = args.iter().map(|v| v.as_ref().to_string()).collect();
        EndpointSet::new(endpoints, set_indexes)
    };

    let set_args = endpoint_set.get();

    let mut unique_args = HashSet::with_capacity(set_args.len());
    for args in set_args.iter() {
        for arg in args {
            if unique_args.contains(arg) {
                return Err(LayoutError::DuplicateEndpoint(arg.clone()));
            }
            unique_args.insert(arg);
        }
    }

    Ok(set_args)
}

/// Parsed ellipses values with the computed set split.
#[derive(Debug, Default)]
struct EndpointSet {
    _arg_patterns: Vec<ArgPattern>,
    endpoints: Vec<String>,
    set_indexes: Vec<Vec<usize>>,
}

impl EndpointSet {
    fn new(endpoints: Vec<String>, set_indexes: Vec<Vec<usize>>) -> Self {
        Self {
            endpoints,
            set_indexes,
            ..Default::default()
        }
    }

    fn from_volumes<T: AsRef<str>>(args: &[T], set_drive_count: usize) -> Result<Self> {
        let mut arg_patterns = Vec::with_capacity(args.len());
        for arg in args {
            let pattern =
                find_ellipses_patterns(arg.as_ref()).map_err(|e| LayoutError::InvalidArgument(e.to_string()))?;
            arg_patterns.push(pattern);
        }

        let total_sizes = get_total_sizes(&arg_patterns);
        let set_indexes = get_set_indexes(args, &total_sizes, set_drive_count, &arg_patterns)?;

        let mut endpoints = Vec::new();
        for ap in arg_patterns.iter() {
            for bs in ap.expand() {
                endpoints.push(bs.join(""));
            }
        }

        Ok(EndpointSet {
            set_indexes,
            _arg_patterns: arg_patterns,
            endpoints,
        })
    }

    /// chunks the flat expansion into consecutive sets of the chosen size.
    fn get(&self) -> Vec<Vec<String>> {
        let mut sets: Vec<Vec<String>> = Vec::new();
        let mut start = 0;
        for set_idx in self.set_indexes.iter() {
            for idx in set_idx {
                let end = idx + start;
                sets.push(self.endpoints[start..end].to_vec());
                start = end;
            }
        }
        sets
    }
}

/// greatest common divisor of all the ellipses totals.
fn get_divisible_size(total_sizes: &[usize]) -> usize {
    fn gcd(mut x: usize, mut y: usize) -> usize {
        while y != 0 {
            std::mem::swap(&mut x, &mut y);
            y %= x;
        }
        x
    }

    total_sizes.iter().skip(1).fold(total_sizes[0], |acc, &y| gcd(acc, y))
}

fn possible_set_counts(set_size: usize) -> Vec<usize> {
    SET_SIZES.iter().copied().filter(|s| set_size % s == 0).collect()
}

fn is_valid_set_size(count: usize) -> bool {
    count >= SET_SIZES[0] && count <= SET_SIZES[SET_SIZES.len() - 1]
}

/// Final set size with all the symmetry accounted for: the candidate
/// producing the fewest sets wins, ties fall to the larger size.
fn common_set_drive_count(divisible_size: usize, set_counts: &[usize]) -> usize {
    // set_counts is sorted ascending.
    if divisible_size < set_counts[set_counts.len() - 1] {
        return divisible_size;
    }

    let mut prev_d = divisible_size / set_counts[0];
    let mut set_size = 0;
    for &cnt in set_counts {
        if divisible_size % cnt == 0 {
            let d = divisible_size / cnt;
            if d <= prev_d {
                prev_d = d;
                set_size = cnt;
            }
        }
    }
    set_size
}

/// Filters candidate set sizes down to the symmetric ones: every
/// pattern length must divide the set size or be divided by it, so
/// hosts and racks line up with erasure sets.
fn possible_set_counts_with_symmetry(set_counts: &[usize], arg_patterns: &[ArgPattern]) -> Vec<usize> {
    let mut new_set_counts: HashSet<usize> = HashSet::new();

    for &ss in set_counts {
        let mut symmetry = false;
        for arg_pattern in arg_patterns {
            for p in arg_pattern.as_ref().iter() {
                if p.len() > ss {
                    symmetry = p.len() % ss == 0;
                } else {
                    symmetry = ss % p.len() == 0;
                }
            }
        }

        if !new_set_counts.contains(&ss) && (symmetry || arg_patterns.is_empty()) {
            new_set_counts.insert(ss);
        }
    }

    let mut set_counts: Vec<usize> = new_set_counts.into_iter().collect();
    set_counts.sort_unstable();
    set_counts
}

/// Returns, per argument, the list of set sizes that chunk its total.
/// Also decides the final set size, preferring fewer total sets.
fn get_set_indexes<T: AsRef<str>>(
    args: &[T],
    total_sizes: &[usize],
    set_drive_count: usize,
    arg_patterns: &[ArgPattern],
) -> Result<Vec<Vec<usize>>> {
    if args.is_empty() || total_sizes.is_empty() {
        return Err(LayoutError::InvalidArgument("no patterns to compute sets from".to_string()));
    }

    for &size in total_sizes {
        if size < SET_SIZES[0] || size < set_drive_count {
            return Err(LayoutError::InvalidNumberOfEndpoints(format!(
                "lesser number of drives {size} than supported minimum {}",
                SET_SIZES[0]
            )));
        }
    }

    let common_size = get_divisible_size(total_sizes);
    let set_counts = possible_set_counts(common_size);
    if set_counts.is_empty() {
        return Err(LayoutError::InvalidNumberOfEndpoints(format!(
            "number of drives {common_size} is not divisible by any supported erasure set size"
        )));
    }

    // Restrict to the candidates symmetric over every input pattern.
    let set_counts = possible_set_counts_with_symmetry(&set_counts, arg_patterns);
    if set_counts.is_empty() {
        return Err(LayoutError::AsymmetricLayout(format!(
            "drives {common_size} cannot be spread symmetrically across the input patterns"
        )));
    }

    let set_size = if set_drive_count > 0 {
        if !set_counts.contains(&set_drive_count) {
            return Err(LayoutError::InvalidErasureSetSize(format!(
                "set drive count {set_drive_count} is not accepted, acceptable values for {common_size} drives are {set_counts:?}"
            )));
        }
        set_drive_count
    } else {
        common_set_drive_count(common_size, &set_counts)
    };

    if !is_valid_set_size(set_size) {
        return Err(LayoutError::InvalidErasureSetSize(format!(
            "chosen set size {set_size} outside supported range"
        )));
    }

    Ok(total_sizes
        .iter()
        .map(|&size| (0..(size / set_size)).map(|_| set_size).collect())
        .collect())
}

fn get_total_sizes(arg_patterns: &[ArgPattern]) -> Vec<usize> {
    arg_patterns.iter().map(|v| v.total_sizes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_divisible_size() {
        struct TestCase {
            total_sizes: Vec<usize>,
            result: usize,
        }

        let test_cases = [
            TestCase {
                total_sizes: vec![24, 32, 16],
                result: 8,
            },
            TestCase {
                total_sizes: vec![32, 8, 4],
                result: 4,
            },
            TestCase {
                total_sizes: vec![8, 8, 8],
                result: 8,
            },
            TestCase {
                total_sizes: vec![24],
                result: 24,
            },
        ];

        for (i, tc) in test_cases.iter().enumerate() {
            let ret = get_divisible_size(&tc.total_sizes);
            assert_eq!(ret, tc.result, "Test{}: expected {}, got {}", i + 1, tc.result, ret);
        }
    }

    #[test]
    fn test_get_set_indexes() {
        #[derive(Default)]
        struct TestCase<'a> {
            num: usize,
            args: Vec<&'a str>,
            total_sizes: Vec<usize>,
            indexes: Vec<Vec<usize>>,
            success: bool,
        }

        let test_cases = [
            TestCase {
                num: 1,
                args: vec!["data{1...17}/export{1...52}"],
                total_sizes: vec![14144],
                ..Default::default()
            },
            TestCase {
                num: 2,
                args: vec!["data{1...3}"],
                total_sizes: vec![3],
                indexes: vec![vec![3]],
                success: true,
            },
            TestCase {
                num: 3,
                args: vec!["data{1...27}"],
                total_sizes: vec![27],
                indexes: vec![vec![9, 9, 9]],
                success: true,
            },
            TestCase {
                num: 4,
                args: vec!["http://host{1...3}/data{1...180}"],
                total_sizes: vec![540],
                indexes: vec![vec![15; 36]],
                success: true,
            },
            TestCase {
                num: 5,
                args: vec!["http://host{1...2}.rack{1...4}/data{1...180}"],
                total_sizes: vec![1440],
                indexes: vec![vec![16; 90]],
                success: true,
            },
            TestCase {
                num: 6,
                args: vec!["http://host{1...2}/data{1...180}"],
                total_sizes: vec![360],
                indexes: vec![vec![12; 30]],
                success: true,
            },
            TestCase {
                num: 7,
                args: vec!["data{1...64}"],
                total_sizes: vec![64],
                indexes: vec![vec![16, 16, 16, 16]],
                success: true,
            },
            TestCase {
                num: 8,
                args: vec!["data{1...24}"],
                total_sizes: vec![24],
                indexes: vec![vec![12, 12]],
                success: true,
            },
            TestCase {
                num: 9,
                args: vec!["data/controller{1...11}/export{1...8}"],
                total_sizes: vec![88],
                indexes: vec![vec![11; 8]],
                success: true,
            },
            TestCase {
                num: 10,
                args: vec!["data{1...4}"],
                total_sizes: vec![4],
                indexes: vec![vec![4]],
                success: true,
            },
            TestCase {
                num: 11,
                args: vec!["data{1...16}/export{1...52}"],
                total_sizes: vec![832],
                indexes: vec![vec![16; 52]],
                success: true,
            },
            TestCase {
                num: 12,
                args: vec!["https://node{1...3}.example.net/mnt/drive{1...8}"],
                total_sizes: vec![24],
                indexes: vec![vec![12, 12]],
                success: true,
            },
        ];

        for tc in test_cases {
            let mut arg_patterns = Vec::new();
            for v in tc.args.iter() {
                match find_ellipses_patterns(v) {
                    Ok(p) => arg_patterns.push(p),
                    Err(err) => panic!("Test{}: unexpected parse failure {err:?}", tc.num),
                }
            }

            match get_set_indexes(tc.args.as_slice(), tc.total_sizes.as_slice(), 0, arg_patterns.as_slice()) {
                Ok(got) => {
                    assert!(tc.success, "Test{}: expected failure but passed", tc.num);
                    assert_eq!(tc.indexes, got, "Test{}: expected {:?}, got {:?}", tc.num, tc.indexes, got);
                }
                Err(err) => {
                    assert!(!tc.success, "Test{}: expected success but failed: {err:?}", tc.num);
                }
            }
        }
    }

    #[test]
    fn test_set_drive_count_override() {
        let args = ["http://h{1...4}/d{1...4}"];
        let patterns = vec![find_ellipses_patterns(args[0]).unwrap()];

        // Without an override 16 drives give one set of 16.
        let indexes = get_set_indexes(&args, &[16], 0, &patterns).unwrap();
        assert_eq!(indexes, vec![vec![16]]);

        // Forced set size of 8 gives 2 sets of 8.
        let indexes = get_set_indexes(&args, &[16], 8, &patterns).unwrap();
        assert_eq!(indexes, vec![vec![8, 8]]);

        // 5 does not divide 16: unsupported set size.
        let err = get_set_indexes(&args, &[16], 5, &patterns).unwrap_err();
        assert!(matches!(err, LayoutError::InvalidErasureSetSize(_)));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_from_volumes_single_drive() {
        let layout = DisksLayout::from_volumes(&["/mnt/single"]).unwrap();
        assert!(layout.legacy);
        assert!(layout.is_single_drive_layout());
        assert_eq!(layout.get_single_drive_layout(), "/mnt/single");
    }

    #[test]
    fn test_from_volumes_pools() {
        let layout = DisksLayout::from_volumes(&["/p1/d{1...8}", "/p2/d{1...32}"]).unwrap();
        assert!(!layout.legacy);
        assert_eq!(layout.pools.len(), 2);
        assert_eq!(layout.get_drives_per_set(0), 8);
        assert_eq!(layout.get_set_count(0), 1);
        assert_eq!(layout.get_drives_per_set(1), 16);
        assert_eq!(layout.get_set_count(1), 2);
    }

    #[test]
    fn test_from_volumes_too_few_drives() {
        let err = DisksLayout::from_volumes(&["/d{1...17}"]).unwrap_err();
        assert!(matches!(err, LayoutError::InvalidNumberOfEndpoints(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_from_volumes_duplicate() {
        let err = DisksLayout::from_volumes(&["/d{1...4}/x{1...1}"]);
        // {1...1} expands to a single element, no duplicates here; force
        // duplication through repeated plain args instead.
        assert!(err.is_ok());

        let err = DisksLayout::from_volumes(&["/a", "/a", "/b", "/c"]).unwrap_err();
        assert!(matches!(err, LayoutError::DuplicateEndpoint(_)));
    }

    #[test]
    fn test_get_single_drive_layout_sets() {
        // E1: 4 hosts x 4 drives gives a single set of 16.
        let layout = DisksLayout::from_volumes(&["http://h{1...4}/d{1...4}"]).unwrap();
        assert_eq!(layout.get_set_count(0), 1);
        assert_eq!(layout.get_drives_per_set(0), 16);
    }
}
