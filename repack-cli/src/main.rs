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

use args::Args;
use clap::Parser;
use repack_api::{repack, Result};
use repack_store::{s3::S3Store, RetryingObjectStore};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub mod args;

/// Adds a channel id to a signed APK stored in S3 without downloading it.
///
/// ```
/// $ repack --source apps/release/app.apk --dest apps/channels/42/app.apk \
///     --cpid 42 --priv-pem ./signing.pem --work-dir /tmp/repack \
///     --access-key-id ... --access-key-secret ...
/// ```
///
/// Log verbosity follows `RUST_LOG` and defaults to `info`.
fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let config = args.repack_config();
    let s3_config = args.s3_config();
    info!(config = %as_json(&config), s3 = %as_json(&s3_config), "Starting repack");
    config.upload.validate()?;

    let store = RetryingObjectStore::new(S3Store::new(&s3_config)?);
    repack(&store, &config)?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn as_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| format!("<unserialisable: {err}>"))
}
