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

use clap::Parser;
use clap::builder::NonEmptyStringValueParser;

#[derive(Parser, Clone, Debug)]
#[command(name = "ferritefs", version, about = "FerriteFS distributed object storage server")]
pub struct Opt {
    /// DIR points to a directory on a filesystem. Ellipses patterns
    /// like `/mnt/disk{1...16}` expand into whole erasure sets.
    #[arg(
        required = true,
        env = "FERRITE_VOLUMES",
        value_delimiter = ' ',
        value_parser = NonEmptyStringValueParser::new()
    )]
    pub volumes: Vec<String>,

    /// Bind to a specific ADDRESS:PORT, ADDRESS can be an IP or hostname.
    #[arg(long, default_value = "0.0.0.0:9000", env = "FERRITE_ADDRESS")]
    pub address: String,

    /// Entries per persisted metacache block.
    #[arg(long, default_value_t = 5000, env = "FERRITE_METACACHE_BLOCK_SIZE")]
    pub metacache_block_size: usize,

    /// Seconds a finished listing cache is kept after its last handout.
    #[arg(long, default_value_t = 900, env = "FERRITE_METACACHE_FINISHED_TTL")]
    pub metacache_finished_ttl: u64,
}
