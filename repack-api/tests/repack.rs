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

use std::{
    fs,
    io::{Cursor, Read, Write},
    path::Path
};

use rand::RngCore;
use repack_api::*;
use repack_sign::manifest::{parse_entries, sha1_base64};
use repack_store::{
    memory::{MemoryStore, Operation},
    plan_copy_parts
};
use rsa::{
    pkcs1::{EncodeRsaPrivateKey, LineEnding},
    RsaPrivateKey
};
use tempfile::TempDir;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipArchive, ZipWriter};

const CPID: &str = "channel-1024";

/// A signed-looking archive: manifest, an existing CERT signer and a dex file
/// of `dex_len` incompressible bytes.
fn signed_archive(dex_len: usize, with_signer: bool) -> Vec<u8> {
    let mut dex = vec![0; dex_len];
    rand::thread_rng().fill_bytes(&mut dex);
    let manifest = format!(
        "Manifest-Version: 1.0\r\nCreated-By: 1.0 (repack tests)\r\n\r\nName: classes.dex\r\nSHA1-Digest: {}\r\n\r\n",
        sha1_base64(&dex)
    );

    let mut zip = ZipWriter::new(Cursor::new(vec![]));
    let stored = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zip.start_file("META-INF/MANIFEST.MF", stored).unwrap();
    zip.write_all(manifest.as_bytes()).unwrap();
    if with_signer {
        zip.start_file("META-INF/CERT.SF", stored).unwrap();
        zip.write_all(b"Signature-Version: 1.0\r\n\r\n").unwrap();
        zip.start_file("META-INF/CERT.RSA", stored).unwrap();
        zip.write_all(&[0x30, 0x00]).unwrap();
    }
    zip.start_file("classes.dex", stored).unwrap();
    zip.write_all(&dex).unwrap();
    zip.finish().unwrap().into_inner()
}

fn write_private_key(dir: &Path) -> std::path::PathBuf {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let path = dir.join("signing.pem");
    fs::write(&path, key.to_pkcs1_pem(LineEnding::LF).unwrap().as_bytes()).unwrap();
    path
}

struct Fixture {
    store: MemoryStore,
    config: RepackConfig,
    _dir: TempDir
}

fn fixture(source_archive: Vec<u8>, upload: UploadConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = MemoryStore::with_min_part_size(upload.min_part_size);
    let source: StorageLocation = "apps/release/app.apk".parse().unwrap();
    store.insert(&source, source_archive);
    let config = RepackConfig {
        source,
        destination: "apps/channels/1024/app.apk".parse().unwrap(),
        cert_name: None,
        private_key_path: write_private_key(dir.path()),
        entry_path: DEFAULT_ENTRY_PATH.into(),
        entry_content: CPID.into(),
        work_dir: dir.path().join("work"),
        upload
    };
    Fixture {
        store,
        config,
        _dir: dir
    }
}

fn small_parts() -> UploadConfig {
    UploadConfig {
        copy_chunk_size: 64 * 1024,
        min_part_size: 16 * 1024,
        copy_workers: 4
    }
}

fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Vec<u8> {
    let mut data = vec![];
    archive.by_name(name).unwrap().read_to_end(&mut data).unwrap();
    data
}

fn destination(fixture: &Fixture) -> Vec<u8> {
    fixture.store.object(&fixture.config.destination).unwrap()
}

#[test]
fn small_archives_are_put_in_one_request() {
    let fixture = fixture(signed_archive(2_000, true), UploadConfig::default());
    let summary = repack(&fixture.store, &fixture.config).unwrap();

    assert_eq!(summary.cert_name, "CERT");
    let total = summary.append_offset + summary.appended_bytes;
    assert_eq!(summary.outcome, UploadOutcome::SinglePut { bytes: total });
    assert!(!fixture
        .store
        .operations()
        .iter()
        .any(|op| matches!(op, Operation::CreateMultipartUpload(_))));

    let output = destination(&fixture);
    assert_eq!(output.len() as u64, total);
    let mut archive = ZipArchive::new(Cursor::new(output)).unwrap();
    assert_eq!(read_entry(&mut archive, "cpid"), CPID.as_bytes());
}

#[test]
fn large_archives_copy_their_prefix_server_side() {
    let fixture = fixture(signed_archive(300_000, true), small_parts());
    let source = fixture.store.object(&fixture.config.source).unwrap();
    let summary = repack(&fixture.store, &fixture.config).unwrap();

    let plan = plan_copy_parts(summary.append_offset, 64 * 1024, 16 * 1024);
    assert_eq!(
        summary.outcome,
        UploadOutcome::Multipart {
            copy_parts: plan.len(),
            bytes: summary.append_offset + summary.appended_bytes
        }
    );

    let operations = fixture.store.operations();
    let copies = operations
        .iter()
        .filter(|op| matches!(op, Operation::UploadPartCopy { .. }))
        .count();
    assert_eq!(copies, plan.len());
    let expected_parts: Vec<u32> = (1..=plan.len() as u32 + 1).collect();
    assert!(operations.contains(&Operation::CompleteMultipartUpload {
        part_numbers: expected_parts
    }));
    // The source itself was only ever read in ranges
    assert!(!operations.iter().any(|op| matches!(
        op,
        Operation::Get { range: None, .. }
    )));

    let output = destination(&fixture);
    let prefix = summary.append_offset as usize;
    assert_eq!(&output[..prefix], &source[..prefix]);
    let mut archive = ZipArchive::new(Cursor::new(output)).unwrap();
    assert_eq!(read_entry(&mut archive, "cpid"), CPID.as_bytes());
    let mut original = ZipArchive::new(Cursor::new(source)).unwrap();
    assert_eq!(
        read_entry(&mut archive, "classes.dex"),
        read_entry(&mut original, "classes.dex")
    );
}

#[test]
fn signature_file_describes_the_new_manifest() {
    let fixture = fixture(signed_archive(5_000, true), UploadConfig::default());
    repack(&fixture.store, &fixture.config).unwrap();

    let mut archive = ZipArchive::new(Cursor::new(destination(&fixture))).unwrap();
    let manifest = read_entry(&mut archive, "META-INF/MANIFEST.MF");
    let signature_file = String::from_utf8(read_entry(&mut archive, "META-INF/CERT.SF")).unwrap();

    let manifest_text = String::from_utf8(manifest.clone()).unwrap();
    assert!(manifest_text.ends_with(&format!(
        "Name: cpid\r\nSHA1-Digest: {}\r\n\r\n",
        sha1_base64(CPID)
    )));
    assert!(signature_file.starts_with(&format!(
        "Signature-Version: 1.0\r\nSHA1-Digest-Manifest: {}\r\n\r\n",
        sha1_base64(&manifest)
    )));
    for entry in parse_entries(&manifest).unwrap() {
        let block = format!(
            "Name: {}\r\nSHA1-Digest: {}\r\n\r\n",
            entry.name,
            sha1_base64(entry.canonical_text())
        );
        assert!(signature_file.contains(&block), "missing {block:?}");
    }
}

#[test]
fn archive_holds_exactly_the_staged_files() {
    let fixture = fixture(signed_archive(5_000, true), UploadConfig::default());
    repack(&fixture.store, &fixture.config).unwrap();

    let work_dir = &fixture.config.work_dir;
    let mut archive = ZipArchive::new(Cursor::new(destination(&fixture))).unwrap();
    for (staged, entry) in [
        ("MANIFEST.MF", "META-INF/MANIFEST.MF"),
        ("CERT.SF", "META-INF/CERT.SF"),
        ("CERT.RSA", "META-INF/CERT.RSA")
    ] {
        assert_eq!(
            fs::read(work_dir.join(staged)).unwrap(),
            read_entry(&mut archive, entry),
            "{entry}"
        );
    }
    // A DER SEQUENCE, not the two-byte placeholder it replaced
    let block = read_entry(&mut archive, "META-INF/CERT.RSA");
    assert_eq!(block[0], 0x30);
    assert!(block.len() > 2);
}

#[test]
fn earlier_signer_files_are_replaced_not_duplicated() {
    let fixture = fixture(signed_archive(5_000, true), UploadConfig::default());
    repack(&fixture.store, &fixture.config).unwrap();

    let archive = ZipArchive::new(Cursor::new(destination(&fixture))).unwrap();
    let mut names: Vec<&str> = archive.file_names().collect();
    names.sort();
    assert_eq!(
        names,
        vec![
            "META-INF/CERT.RSA",
            "META-INF/CERT.SF",
            "META-INF/MANIFEST.MF",
            "classes.dex",
            "cpid"
        ]
    );
}

#[test]
fn repacking_again_only_changes_the_entry_digest() {
    let mut fixture = fixture(signed_archive(5_000, true), UploadConfig::default());
    repack(&fixture.store, &fixture.config).unwrap();
    let first = destination(&fixture);

    fixture.config.source = fixture.config.destination.clone();
    fixture.config.destination = "apps/channels/2048/app.apk".parse().unwrap();
    fixture.config.entry_content = "channel-2048".into();
    repack(&fixture.store, &fixture.config).unwrap();

    let mut before = ZipArchive::new(Cursor::new(first)).unwrap();
    let mut after = ZipArchive::new(Cursor::new(destination(&fixture))).unwrap();
    let before = String::from_utf8(read_entry(&mut before, "META-INF/MANIFEST.MF")).unwrap();
    let after = String::from_utf8(read_entry(&mut after, "META-INF/MANIFEST.MF")).unwrap();

    let changed: Vec<(&str, &str)> = before
        .split("\r\n")
        .zip(after.split("\r\n"))
        .filter(|(a, b)| a != b)
        .collect();
    assert_eq!(before.split("\r\n").count(), after.split("\r\n").count());
    let old_digest = format!("SHA1-Digest: {}", sha1_base64(CPID));
    let new_digest = format!("SHA1-Digest: {}", sha1_base64("channel-2048"));
    assert_eq!(changed, vec![(old_digest.as_str(), new_digest.as_str())]);
}

#[test]
fn explicit_certificate_name_adds_a_signer() {
    let mut fixture = fixture(signed_archive(5_000, false), UploadConfig::default());
    fixture.config.cert_name = Some("CHANNEL".into());
    let summary = repack(&fixture.store, &fixture.config).unwrap();
    assert_eq!(summary.cert_name, "CHANNEL");

    let archive = ZipArchive::new(Cursor::new(destination(&fixture))).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert!(names.contains(&"META-INF/CHANNEL.SF"));
    assert!(names.contains(&"META-INF/CHANNEL.RSA"));
}

#[test]
fn missing_signer_without_a_name_is_a_config_error() {
    let fixture = fixture(signed_archive(5_000, false), UploadConfig::default());
    let err = repack(&fixture.store, &fixture.config).unwrap_err();
    assert!(matches!(err, RepackError::Config(_)));
    assert!(fixture.store.object(&fixture.config.destination).is_none());
}

#[test]
fn archives_without_a_manifest_are_rejected() {
    let mut zip = ZipWriter::new(Cursor::new(vec![]));
    zip.start_file("classes.dex", SimpleFileOptions::default()).unwrap();
    zip.write_all(b"dex").unwrap();
    let archive = zip.finish().unwrap().into_inner();

    let mut fixture = fixture(archive, UploadConfig::default());
    fixture.config.cert_name = Some("CERT".into());
    let err = repack(&fixture.store, &fixture.config).unwrap_err();
    assert!(matches!(err, RepackError::ManifestNotFound));
    assert!(fixture.store.object(&fixture.config.destination).is_none());
}

#[test]
fn unreadable_keys_fail_before_touching_the_store() {
    let fixture = fixture(signed_archive(5_000, true), UploadConfig::default());
    fs::write(&fixture.config.private_key_path, "not a key").unwrap();
    assert!(repack(&fixture.store, &fixture.config).is_err());
    assert!(fixture.store.operations().is_empty());
}

#[test]
fn copy_chunks_below_the_part_minimum_fail_before_touching_the_store() {
    let fixture = fixture(
        signed_archive(300_000, true),
        UploadConfig {
            copy_chunk_size: 8 * 1024,
            min_part_size: 16 * 1024,
            copy_workers: 4
        }
    );
    let err = repack(&fixture.store, &fixture.config).unwrap_err();
    assert!(matches!(err, RepackError::Config(_)));
    assert!(fixture.store.operations().is_empty());
    assert!(!fixture.config.work_dir.exists());
}
