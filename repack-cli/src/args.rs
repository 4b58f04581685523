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

use clap::{builder::RangedU64ValueParser, Parser};
use repack_api::{RepackConfig, StorageLocation, UploadConfig, DEFAULT_ENTRY_PATH};
use repack_store::{s3::S3Config, COPY_CHUNK_SIZE, COPY_PART_WORKERS, S3_MIN_PART_SIZE};

/// Copies a signed APK or JAR within an S3-compatible store, adding one entry
/// and re-signing it. Every flag can also be set through its REPACK_*
/// environment variable.
#[derive(Parser)]
#[command(name = "repack", version)]
pub struct Args {
    /// Source archive as bucket/key
    #[arg(long, env = "REPACK_SOURCE")]
    pub source: StorageLocation,

    /// Destination archive as bucket/key
    #[arg(long, env = "REPACK_DEST")]
    pub dest: StorageLocation,

    /// Signer name for META-INF/<name>.SF and .RSA. Defaults to the source
    /// archive's existing signer
    #[arg(long, env = "REPACK_CERT_NAME")]
    pub cert_name: Option<String>,

    /// PEM file with the RSA private key to sign with
    #[arg(long, env = "REPACK_PRIV_PEM")]
    pub priv_pem: PathBuf,

    /// Content of the added entry
    #[arg(long, env = "REPACK_CPID")]
    pub cpid: String,

    /// Archive path of the added entry
    #[arg(long, env = "REPACK_ENTRY_PATH", default_value = DEFAULT_ENTRY_PATH)]
    pub entry_path: String,

    /// Directory for the staged manifest and signature files
    #[arg(long, env = "REPACK_WORK_DIR")]
    pub work_dir: PathBuf,

    /// Object store endpoint. AWS S3 when unset
    #[arg(long, env = "REPACK_ENDPOINT")]
    pub endpoint: Option<String>,

    #[arg(long, env = "REPACK_REGION", default_value = "us-east-1")]
    pub region: String,

    #[arg(long, env = "REPACK_ACCESS_KEY_ID")]
    pub access_key_id: String,

    #[arg(long, env = "REPACK_ACCESS_KEY_SECRET", hide_env_values = true)]
    pub access_key_secret: String,

    #[arg(long, env = "REPACK_SECURITY_TOKEN", hide_env_values = true)]
    pub security_token: Option<String>,

    /// Size in bytes of each server-side copied part
    #[arg(long, env = "REPACK_COPY_CHUNK_SIZE", default_value_t = COPY_CHUNK_SIZE,
          value_parser = RangedU64ValueParser::<u64>::new().range(1..))]
    pub copy_chunk_size: u64,

    /// Smallest part the store accepts before the last one. Archives whose
    /// kept prefix is at most this many bytes are uploaded in a single put.
    /// Must not exceed --copy-chunk-size
    #[arg(long, env = "REPACK_MIN_PART_SIZE", default_value_t = S3_MIN_PART_SIZE)]
    pub min_part_size: u64,

    /// Copy-part requests in flight at once
    #[arg(long, env = "REPACK_COPY_WORKERS", default_value_t = COPY_PART_WORKERS,
          value_parser = RangedU64ValueParser::<usize>::new().range(1..))]
    pub copy_workers: usize
}

impl Args {
    pub fn repack_config(&self) -> RepackConfig {
        RepackConfig {
            source: self.source.clone(),
            destination: self.dest.clone(),
            cert_name: self.cert_name.clone(),
            private_key_path: self.priv_pem.clone(),
            entry_path: self.entry_path.clone(),
            entry_content: self.cpid.clone(),
            work_dir: self.work_dir.clone(),
            upload: UploadConfig {
                copy_chunk_size: self.copy_chunk_size,
                min_part_size: self.min_part_size,
                copy_workers: self.copy_workers
            }
        }
    }

    pub fn s3_config(&self) -> S3Config {
        S3Config {
            endpoint: self.endpoint.clone(),
            region: self.region.clone(),
            access_key_id: self.access_key_id.clone(),
            access_key_secret: self.access_key_secret.clone(),
            security_token: self.security_token.clone()
        }
    }
}
