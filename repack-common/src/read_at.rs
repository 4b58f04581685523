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

use crate::{RepackError, Result};

/// A byte source that can be read at arbitrary offsets without a cursor.
///
/// Remote objects implement this with one ranged GET per call, in-memory
/// buffers with a slice copy.
pub trait ReadAt {
    /// Total length of the source in bytes.
    fn size(&self) -> Result<u64>;

    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// Either the whole buffer is filled or an error is returned. A source
    /// that comes up short reports [RepackError::ShortRead].
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()>;
}

impl ReadAt for [u8] {
    fn size(&self) -> Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.len());
        let available = &self[start..];
        if available.len() < buf.len() {
            return Err(RepackError::ShortRead {
                expected: buf.len() as u64,
                actual: available.len() as u64
            });
        }
        buf.copy_from_slice(&available[..buf.len()]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_inside_the_slice() {
        let data: &[u8] = b"0123456789";
        let mut buf = [0; 4];
        data.read_at(&mut buf, 3).unwrap();
        assert_eq!(&buf, b"3456");
    }

    #[test]
    fn reading_past_the_end_is_a_short_read() {
        let data: &[u8] = b"0123456789";
        let mut buf = [0; 4];
        match data.read_at(&mut buf, 8) {
            Err(RepackError::ShortRead { expected, actual }) => {
                assert_eq!(expected, 4);
                assert_eq!(actual, 2);
            }
            other => panic!("expected a short read, got {other:?}")
        }
    }
}
