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

use std::path::PathBuf;

use repack_common::*;
use repack_store::{StorageLocation, UploadConfig};
use serde::Serialize;

/// Path of the added entry when none is configured.
pub const DEFAULT_ENTRY_PATH: &str = "cpid";

/// Everything one [repack](crate::repack) run needs. Built once and passed
/// by reference.
#[derive(Debug, Clone, Serialize)]
pub struct RepackConfig {
    pub source: StorageLocation,
    pub destination: StorageLocation,
    /// Short name of the signer, as in `META-INF/<name>.SF`. Taken from the
    /// source archive when `None`.
    pub cert_name: Option<String>,
    /// PEM file holding the RSA private key, PKCS#1 or PKCS#8
    pub private_key_path: PathBuf,
    /// Archive path of the added entry
    pub entry_path: String,
    pub entry_content: String,
    /// Where the manifest, signature file and signature block are staged
    pub work_dir: PathBuf,
    pub upload: UploadConfig
}

impl RepackConfig {
    /// Rejects names that would not stay inside `META-INF/` or the work dir.
    pub(crate) fn check_cert_name(name: &str) -> Result<()> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(RepackError::Config(format!("unusable certificate name {name:?}")));
        }
        Ok(())
    }
}
