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

//! Just enough zip handling to add entries to an archive without rewriting
//! it: find where its central directory starts, read single entries, and
//! produce the bytes that follow the untouched prefix.

use std::io::{BufReader, Read};

use repack_common::*;
use zip::{result::ZipError, ZipArchive};

mod append;
mod central_directory;
mod read_at_cursor;
pub mod records;

pub use append::{append_entries, File};
pub use central_directory::{detect_signature_name, CentralDirectory};
pub use read_at_cursor::ReadAtCursor;

/// Read-ahead for entry reads. Each refill is one `read_at` on the source.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Reads and decompresses the entry at `path`, or `None` when the archive
/// has no such entry.
pub fn read_entry<R: ReadAt + ?Sized>(source: &R, path: &str) -> Result<Option<Vec<u8>>> {
    let reader = BufReader::with_capacity(READ_BUFFER_SIZE, ReadAtCursor::new(source)?);
    let mut archive = ZipArchive::new(reader)?;
    let mut entry = match archive.by_name(path) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(err) => return Err(err.into())
    };
    let mut contents = vec![];
    entry.read_to_end(&mut contents)?;
    Ok(Some(contents))
}

#[cfg(test)]
pub(crate) fn test_archive(files: &[(&str, &str)], comment: &str) -> Vec<u8> {
    use std::io::{Cursor, Write};

    use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

    let mut zip = ZipWriter::new(Cursor::new(vec![]));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (path, data) in files {
        zip.start_file(*path, options).unwrap();
        zip.write_all(data.as_bytes()).unwrap();
    }
    zip.set_comment(comment);
    zip.finish().unwrap().into_inner()
}
