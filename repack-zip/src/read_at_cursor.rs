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

use std::io::{self, Read, Seek, SeekFrom};

use repack_common::{ReadAt, Result};

/// `Read + Seek` over a [ReadAt] source, so stream-oriented readers such as
/// [zip::ZipArchive] can work on it.
///
/// Every `read` is one `read_at` call. Wrap it in a [io::BufReader] when the
/// source is remote.
pub struct ReadAtCursor<'a, R: ReadAt + ?Sized> {
    source: &'a R,
    position: u64,
    size: u64
}

impl<'a, R: ReadAt + ?Sized> ReadAtCursor<'a, R> {
    pub fn new(source: &'a R) -> Result<Self> {
        Ok(ReadAtCursor {
            source,
            position: 0,
            size: source.size()?
        })
    }
}

impl<R: ReadAt + ?Sized> Read for ReadAtCursor<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.size.saturating_sub(self.position);
        let len = remaining.min(buf.len() as u64) as usize;
        if len == 0 {
            return Ok(0);
        }
        self.source
            .read_at(&mut buf[..len], self.position)
            .map_err(io::Error::other)?;
        self.position += len as u64;
        Ok(len)
    }
}

impl<R: ReadAt + ?Sized> Seek for ReadAtCursor<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta)
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek to a negative or overflowing position")
        })?;
        self.position = target;
        Ok(target)
    }
}
