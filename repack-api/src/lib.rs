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

//! # REPACK API
//!
//! This crate exposes the pipeline that copies a signed APK or JAR inside an
//! object store while adding one entry to it.
//!
//! The source archive is never downloaded in full. Its central directory and
//! manifest are read with ranged requests, the unmodified prefix is copied
//! server-side, and only the new entries and central directory are uploaded.
//!
//! ```ignore
//! let config = RepackConfig {
//!     source: "apps/release/app.apk".parse()?,
//!     destination: "apps/channels/42/app.apk".parse()?,
//!     cert_name: None,
//!     private_key_path: "signing.pem".into(),
//!     entry_path: DEFAULT_ENTRY_PATH.into(),
//!     entry_content: "42".into(),
//!     work_dir: "/tmp/repack".into(),
//!     upload: UploadConfig::default()
//! };
//! let summary = repack(&store, &config)?;
//! ```

use std::{fs, path::PathBuf};

use repack_sign::{
    rewrite_manifest, sign_signature_file, signature_block_path, signature_file_path, SigningKey,
    MANIFEST_PATH
};
use repack_store::{MultipartAppendWriter, RangeReader};
use repack_zip::{append_entries, detect_signature_name, read_entry, CentralDirectory, File};
use tracing::info;

mod config;

pub use config::{RepackConfig, DEFAULT_ENTRY_PATH};
pub use repack_common::{RepackError, Result};
pub use repack_store::{ObjectStore, StorageLocation, UploadConfig, UploadOutcome};

/// What a successful [repack] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepackSummary {
    pub cert_name: String,
    /// Bytes of the source kept as they were
    pub append_offset: u64,
    /// Bytes written after the kept prefix
    pub appended_bytes: u64,
    pub outcome: UploadOutcome
}

/// Writes `config.destination` as the source archive plus the configured
/// entry, re-signed so the signature covers it.
///
/// In order:
///
///  - Reads the source's central directory and `META-INF/MANIFEST.MF`
///  - Adds or updates the entry's digest in the manifest and regenerates the
///    signature file
///  - Signs the signature file with a fresh carrier certificate
///  - Appends the entry, manifest, signature file and signature block after
///    the source's last local entry, replacing any earlier versions of them
///
/// The manifest, signature file and signature block are staged in
/// `config.work_dir` and the archive gets exactly the staged bytes. Nothing
/// exists at the destination unless every step succeeds.
pub fn repack<S: ObjectStore + ?Sized>(store: &S, config: &RepackConfig) -> Result<RepackSummary> {
    // Bad settings and key material should fail before any request is made
    config.upload.validate()?;
    let key = SigningKey::from_pem_file(&config.private_key_path)?;

    let reader = RangeReader::new(store, config.source.clone());
    let directory = CentralDirectory::read(&reader)?;
    let cert_name = match &config.cert_name {
        Some(name) => name.clone(),
        None => detect_signature_name(&directory).ok_or_else(|| {
            RepackError::Config(format!(
                "no certificate name given and {} has no META-INF/*.SF file",
                config.source
            ))
        })?
    };
    RepackConfig::check_cert_name(&cert_name)?;
    info!(
        source = %config.source,
        cert_name = %cert_name,
        append_offset = directory.append_offset(),
        entries = directory.entries.len(),
        "Read source archive"
    );

    let manifest = read_entry(&reader, MANIFEST_PATH)?.ok_or(RepackError::ManifestNotFound)?;
    let rewritten = rewrite_manifest(&manifest, &config.entry_path, config.entry_content.as_bytes())?;

    let staging = Staging::new(config, &cert_name)?;
    fs::write(&staging.manifest, &rewritten.manifest)?;
    fs::write(&staging.signature_file, &rewritten.signature_file)?;
    // Sign what is on disk, since that is what goes into the archive
    let signature_block = sign_signature_file(&fs::read(&staging.signature_file)?, &key)?;
    fs::write(&staging.signature_block, signature_block)?;

    let files = vec![
        File {
            path: config.entry_path.clone(),
            data: config.entry_content.clone().into_bytes()
        },
        File {
            path: MANIFEST_PATH.into(),
            data: fs::read(&staging.manifest)?
        },
        File {
            path: signature_file_path(&cert_name),
            data: fs::read(&staging.signature_file)?
        },
        File {
            path: signature_block_path(&cert_name),
            data: fs::read(&staging.signature_block)?
        },
    ];

    let mut writer = MultipartAppendWriter::new(
        store,
        config.destination.clone(),
        config.source.clone(),
        directory.append_offset(),
        config.upload
    );
    let appended_bytes = append_entries(&directory, &files, &mut writer)?;
    let outcome = writer.finish()?;

    let summary = RepackSummary {
        cert_name,
        append_offset: directory.append_offset(),
        appended_bytes,
        outcome
    };
    info!(
        destination = %config.destination,
        entry = %config.entry_path,
        cert_name = %summary.cert_name,
        append_offset = summary.append_offset,
        appended_bytes,
        outcome = ?summary.outcome,
        "Repacked archive"
    );
    Ok(summary)
}

/// Work dir paths of the three signing artifacts.
struct Staging {
    manifest: PathBuf,
    signature_file: PathBuf,
    signature_block: PathBuf
}

impl Staging {
    fn new(config: &RepackConfig, cert_name: &str) -> Result<Staging> {
        fs::create_dir_all(&config.work_dir)?;
        Ok(Staging {
            manifest: config.work_dir.join("MANIFEST.MF"),
            signature_file: config.work_dir.join(format!("{cert_name}.SF")),
            signature_block: config.work_dir.join(format!("{cert_name}.RSA"))
        })
    }
}
