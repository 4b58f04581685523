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
    collections::HashSet,
    io::{Cursor, Write}
};

use deku::DekuContainerWrite;
use repack_common::*;
use tracing::info;
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::{
    central_directory::CentralDirectory,
    records::{CentralDirectoryHeader, EndOfCentralDirectory}
};

/// A file to add to an archive.
pub struct File {
    pub path: String,
    pub data: Vec<u8>
}

/// Writes the tail of an archive whose first
/// [append_offset](CentralDirectory::append_offset) bytes are those of the
/// archive `directory` was read from.
///
/// The tail holds `files` as new deflated entries, then a central directory
/// listing every existing entry except those `files` replace, then the new
/// ones. The archive comment is kept. Returns the number of bytes written.
pub fn append_entries<W: Write>(directory: &CentralDirectory, files: &[File], output: &mut W) -> Result<u64> {
    let append_offset = directory.append_offset();

    // Let zip lay out the new entries, then lift them out of its archive
    let staged = zip_files(files)?;
    let staged_directory = CentralDirectory::read(staged.as_slice())?;
    let local_section = &staged[..staged_directory.append_offset() as usize];
    output.write_all(local_section)?;

    let replaced: HashSet<&str> = files.iter().map(|file| file.path.as_str()).collect();
    let kept: Vec<&CentralDirectoryHeader> = directory
        .entries
        .iter()
        .filter(|entry| !replaced.contains(entry.name().as_str()))
        .collect();

    let mut directory_bytes = vec![];
    for entry in &kept {
        directory_bytes.extend(entry.to_bytes()?);
    }
    for entry in &staged_directory.entries {
        let mut relocated = entry.clone();
        relocated.local_header_offset = zip32(entry.local_header_offset as u64 + append_offset)?;
        directory_bytes.extend(relocated.to_bytes()?);
    }

    let entry_count = kept.len() + staged_directory.entries.len();
    let entry_count = u16::try_from(entry_count)
        .ok()
        .filter(|count| *count != u16::MAX)
        .ok_or(RepackError::Zip64Unsupported)?;
    let end_record = EndOfCentralDirectory {
        disk_number: 0,
        central_directory_disk: 0,
        disk_entries: entry_count,
        total_entries: entry_count,
        central_directory_size: zip32(directory_bytes.len() as u64)?,
        central_directory_offset: zip32(append_offset + local_section.len() as u64)?,
        comment_len: directory.end_record.comment_len,
        comment: directory.end_record.comment.clone()
    };
    let end_record_bytes = end_record.to_bytes()?;
    output.write_all(&directory_bytes)?;
    output.write_all(&end_record_bytes)?;

    info!(
        added = files.len(),
        replaced = directory.entries.len() - kept.len(),
        total_entries = entry_count,
        "Appended archive entries"
    );
    Ok((local_section.len() + directory_bytes.len() + end_record_bytes.len()) as u64)
}

// Output can be a file *or* a buffer in memory
fn zip_files(files: &[File]) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(vec![]));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for file in files {
        zip.start_file(file.path.as_str(), options)?;
        zip.write_all(&file.data)?;
    }
    Ok(zip.finish()?.into_inner())
}

/// Narrows an offset or size to its 32-bit field. The all-ones value is
/// reserved as the ZIP64 marker.
fn zip32(value: u64) -> Result<u32> {
    u32::try_from(value)
        .ok()
        .filter(|value| *value != u32::MAX)
        .ok_or(RepackError::Zip64Unsupported)
}
