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

use repack_common::{ReadAt, RepackError, Result};
use tracing::debug;

use crate::{location::StorageLocation, store::ObjectStore};

/// Presents a stored object as a random-access byte source.
///
/// There is no caching or read-ahead, every call is one request to the store.
pub struct RangeReader<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    location: StorageLocation
}

impl<'a, S: ObjectStore + ?Sized> RangeReader<'a, S> {
    pub fn new(store: &'a S, location: StorageLocation) -> Self {
        RangeReader { store, location }
    }

    pub fn location(&self) -> &StorageLocation {
        &self.location
    }
}

impl<S: ObjectStore + ?Sized> ReadAt for RangeReader<'_, S> {
    fn size(&self) -> Result<u64> {
        let metadata = self.store.head_object(&self.location)?;
        let content_length = metadata
            .get("Content-Length")
            .filter(|value| !value.is_empty())
            .ok_or(RepackError::MissingContentLength)?;
        Ok(content_length.trim().parse::<u64>()?)
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(RepackError::ShortRead {
                expected: buf.len() as u64,
                actual: 0
            })?;
        let body = self.store.get_object(&self.location, Some(offset..end))?;
        if body.len() != buf.len() {
            return Err(RepackError::ShortRead {
                expected: buf.len() as u64,
                actual: body.len() as u64
            });
        }
        buf.copy_from_slice(&body);
        debug!(location = %self.location, offset, len = buf.len(), "Ranged read");
        Ok(())
    }
}
