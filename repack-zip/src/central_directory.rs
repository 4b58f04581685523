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

use deku::DekuContainerRead;
use repack_common::*;
use tracing::debug;

use crate::records::*;

/// The central directory of an archive, parsed in full.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectory {
    pub end_record: EndOfCentralDirectory,
    /// Offset of the end of central directory record from the start of the file
    pub end_record_offset: u64,
    pub entries: Vec<CentralDirectoryHeader>
}

impl CentralDirectory {
    /// Locates and parses the central directory with two reads: one for the
    /// tail of the file holding the end record, one for the directory itself.
    pub fn read<R: ReadAt + ?Sized>(source: &R) -> Result<CentralDirectory> {
        let size = source.size()?;
        // The end record is followed by at most a 64 KiB comment
        let tail_len = size.min((EOCD_LEN + u16::MAX as usize) as u64);
        let tail_start = size - tail_len;
        let mut tail = vec![0; tail_len as usize];
        source.read_at(&mut tail, tail_start)?;

        let position = find_end_record(&tail)
            .ok_or_else(|| RepackError::ZipParsingFailed("no end of central directory record".into()))?;
        let (_, end_record) = EndOfCentralDirectory::from_bytes((&tail[position..], 0))?;
        let end_record_offset = tail_start + position as u64;

        let has_zip64_locator = position >= ZIP64_LOCATOR_LEN
            && &tail[position - ZIP64_LOCATOR_LEN..position - ZIP64_LOCATOR_LEN + 4] == ZIP64_LOCATOR_MAGIC;
        if end_record.needs_zip64() || has_zip64_locator {
            return Err(RepackError::Zip64Unsupported);
        }
        if end_record.disk_number != 0 || end_record.central_directory_disk != 0 {
            return Err(RepackError::ZipParsingFailed("multi-disk archives are not supported".into()));
        }

        let directory_start = end_record.central_directory_offset as u64;
        let directory_len = end_record.central_directory_size as u64;
        if directory_start + directory_len > end_record_offset {
            return Err(RepackError::ZipParsingFailed(format!(
                "central directory {directory_start}+{directory_len} overlaps its end record at {end_record_offset}"
            )));
        }
        let mut directory = vec![0; directory_len as usize];
        source.read_at(&mut directory, directory_start)?;

        let mut entries = Vec::with_capacity(end_record.total_entries as usize);
        let mut rest = &directory[..];
        for _ in 0..end_record.total_entries {
            let ((remaining, _), header) = CentralDirectoryHeader::from_bytes((rest, 0))?;
            entries.push(header);
            rest = remaining;
        }
        if !rest.is_empty() {
            return Err(RepackError::ZipParsingFailed(format!(
                "{} unexpected bytes after {} central directory entries",
                rest.len(),
                entries.len()
            )));
        }

        debug!(
            entries = entries.len(),
            central_directory_offset = directory_start,
            "Read central directory"
        );
        Ok(CentralDirectory {
            end_record,
            end_record_offset,
            entries
        })
    }

    /// Where new entries go: everything before the central directory stays as is.
    pub fn append_offset(&self) -> u64 {
        self.end_record.central_directory_offset as u64
    }

    pub fn names(&self) -> impl Iterator<Item = String> + '_ {
        self.entries.iter().map(CentralDirectoryHeader::name)
    }
}

/// Scans back from the end for the last end record whose comment fits
/// exactly in the remaining bytes.
fn find_end_record(tail: &[u8]) -> Option<usize> {
    if tail.len() < EOCD_LEN {
        return None;
    }
    (0..=tail.len() - EOCD_LEN).rev().find(|&i| {
        let comment_len = u16::from_le_bytes([tail[i + 20], tail[i + 21]]) as usize;
        &tail[i..i + 4] == EOCD_MAGIC && i + EOCD_LEN + comment_len == tail.len()
    })
}

/// The `<name>` of the first `META-INF/<name>.SF` signature file, if any.
pub fn detect_signature_name(directory: &CentralDirectory) -> Option<String> {
    directory.names().find_map(|path| {
        let name = path.strip_prefix("META-INF/")?.strip_suffix(".SF")?;
        (!name.is_empty() && !name.contains('/')).then(|| name.to_string())
    })
}
