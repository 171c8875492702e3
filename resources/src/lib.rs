// Copyright 2023 The Amphitheatre Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::Serialize;
use serde_json::to_string;
use sha2::{Digest, Sha256};

use self::error::{Error, Result};

pub mod client;
pub mod config_map;
pub mod diff;
pub mod error;
pub mod finalizer;
pub mod labels;
pub mod namespace;
pub mod object;
pub mod proxy;
pub mod role_binding;
pub mod secret;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Content hash of any serializable value.
pub fn hash<T>(resource: &T) -> Result<String>
where
    T: Serialize + ?Sized,
{
    let data = to_string(resource).map_err(Error::SerializationError)?;
    let hash = Sha256::digest(data);

    Ok(format!("{:x}", hash))
}
