// Copyright 2024 Google LLC
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

use std::{fmt, str::FromStr};

use repack_common::{RepackError, Result};
use serde::Serialize;

/// A `(bucket, key)` pair naming one object.
///
/// Parsed from `"bucket/key"`; everything after the first slash is the key,
/// so keys may contain further slashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StorageLocation {
    bucket: String,
    key: String
}

impl StorageLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let bucket = bucket.into();
        let key = key.into();
        if bucket.is_empty() || key.is_empty() {
            return Err(RepackError::InvalidLocation(format!("{bucket}/{key}")));
        }
        Ok(StorageLocation { bucket, key })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl FromStr for StorageLocation {
    type Err = RepackError;

    fn from_str(location: &str) -> Result<Self> {
        let (bucket, key) = location
            .split_once('/')
            .ok_or_else(|| RepackError::InvalidLocation(location.to_string()))?;
        if bucket.is_empty() || key.is_empty() {
            return Err(RepackError::InvalidLocation(location.to_string()));
        }
        Ok(StorageLocation {
            bucket: bucket.to_string(),
            key: key.to_string()
        })
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}
