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

pub mod bucket;
pub mod cache_value;
pub mod disks_layout;
pub mod endpoints;
pub mod error;
pub mod rpc;
pub mod set_disk;
pub mod sets;
pub mod store;
pub mod store_api;
pub mod store_list_objects;
pub mod store_utils;

pub use store::ECStore;
