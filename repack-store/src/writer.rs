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

use std::{io, ops::Range};

use rayon::prelude::*;
use repack_common::{RepackError, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    location::StorageLocation,
    store::{ObjectStore, UploadSession, UploadedPart}
};

pub const COPY_PART_WORKERS: usize = 8;
pub const COPY_CHUNK_SIZE: u64 = 50 * 1024 * 1024;
/// Smallest non-final part of the storage service REPACK was first built
/// against. Stores with a larger minimum need their own setting.
pub const MIN_PART_SIZE: u64 = 100 * 1024;
/// Smallest part AWS S3 accepts for anything but the last part of an upload.
pub const S3_MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
/// Buffered bytes past which [MultipartAppendWriter::write] starts warning.
pub const MAX_WRITE_BUFFER: usize = 100 * 1024 * 1024;

/// Tuning for [MultipartAppendWriter::finish].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UploadConfig {
    /// Size of each server-side copied part of the unmodified prefix
    pub copy_chunk_size: u64,
    /// Prefixes up to this size are re-uploaded with a single put instead
    pub min_part_size: u64,
    /// Number of copy-part requests in flight at once
    pub copy_workers: usize
}

impl UploadConfig {
    /// Defaults sized for AWS S3 and stores with the same part limits.
    pub fn s3() -> Self {
        UploadConfig {
            min_part_size: S3_MIN_PART_SIZE,
            ..Default::default()
        }
    }

    /// Rejects settings that could only fail once an upload is under way.
    /// Copy parts other than the last are `copy_chunk_size` bytes, so that
    /// must be at least `min_part_size`.
    pub fn validate(&self) -> Result<()> {
        if self.copy_workers == 0 {
            return Err(RepackError::Config("copy_workers must be at least 1".into()));
        }
        if self.copy_chunk_size == 0 || self.copy_chunk_size < self.min_part_size {
            return Err(RepackError::Config(format!(
                "copy_chunk_size {} is smaller than min_part_size {}",
                self.copy_chunk_size, self.min_part_size
            )));
        }
        Ok(())
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            copy_chunk_size: COPY_CHUNK_SIZE,
            min_part_size: MIN_PART_SIZE,
            copy_workers: COPY_PART_WORKERS
        }
    }
}

/// One server-side copied part of the source prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartDescriptor {
    /// 1-based part number
    pub index: u32,
    pub start: u64,
    pub size: u64
}

impl PartDescriptor {
    pub fn range(&self) -> Range<u64> {
        self.start..self.start + self.size
    }
}

/// What [MultipartAppendWriter::finish] ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The prefix was downloaded and written back with the tail in one put.
    SinglePut { bytes: u64 },
    /// The prefix was copied inside the store as `copy_parts` parts, followed
    /// by the tail as one more part.
    Multipart { copy_parts: usize, bytes: u64 }
}

/// Splits `[0, append_offset)` into copy parts of `chunk_size` bytes.
///
/// A remainder that would itself be at most `min_part_size` is folded into
/// the last full chunk, since only the final part of an upload may be
/// undersized and the buffered tail always comes after these parts.
pub fn plan_copy_parts(append_offset: u64, chunk_size: u64, min_part_size: u64) -> Vec<PartDescriptor> {
    let chunk_size = chunk_size.max(1);
    let full_chunks = append_offset / chunk_size;
    let remainder = append_offset % chunk_size;
    let count = if remainder == 0 || (full_chunks > 0 && remainder <= min_part_size) {
        full_chunks
    } else {
        full_chunks + 1
    };

    (0..count)
        .map(|i| {
            let start = i * chunk_size;
            let size = if i == count - 1 {
                append_offset - start
            } else {
                chunk_size
            };
            PartDescriptor {
                index: i as u32 + 1,
                start,
                size
            }
        })
        .collect()
}

/// Produces `destination` as the first `append_offset` bytes of `source`
/// followed by everything written to it.
///
/// Writes only ever land in memory. Nothing exists at the destination until
/// [finish](MultipartAppendWriter::finish) succeeds.
pub struct MultipartAppendWriter<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    destination: StorageLocation,
    source: StorageLocation,
    append_offset: u64,
    config: UploadConfig,
    buffer: Vec<u8>,
    warned_buffer_size: bool
}

impl<'a, S: ObjectStore + ?Sized> MultipartAppendWriter<'a, S> {
    pub fn new(
        store: &'a S,
        destination: StorageLocation,
        source: StorageLocation,
        append_offset: u64,
        config: UploadConfig
    ) -> Self {
        MultipartAppendWriter {
            store,
            destination,
            source,
            append_offset,
            config,
            buffer: vec![],
            warned_buffer_size: false
        }
    }

    /// Bytes written so far.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Writes the destination object. Consumes the writer, so it runs once.
    ///
    /// Small prefixes are downloaded and re-uploaded with the tail in one put.
    /// Larger ones become a multipart upload: the prefix is copied inside the
    /// store by a fixed pool of workers, then the tail is uploaded as the
    /// final part. Any failed part fails the whole call with that part's
    /// error. An upload abandoned this way is left for the store to expire.
    pub fn finish(self) -> Result<UploadOutcome> {
        self.config.validate()?;
        if self.append_offset <= self.config.min_part_size {
            self.put_whole_object()
        } else {
            self.multipart_copy()
        }
    }

    fn put_whole_object(self) -> Result<UploadOutcome> {
        info!(
            destination = %self.destination,
            append_offset = self.append_offset,
            "Small object, writing with a single put"
        );
        let mut body = if self.append_offset > 0 {
            self.store
                .get_object(&self.source, Some(0..self.append_offset))?
        } else {
            vec![]
        };
        if body.len() as u64 != self.append_offset {
            return Err(RepackError::ShortRead {
                expected: self.append_offset,
                actual: body.len() as u64
            });
        }
        body.extend_from_slice(&self.buffer);
        self.store.put_object(&self.destination, &body)?;
        Ok(UploadOutcome::SinglePut {
            bytes: body.len() as u64
        })
    }

    fn multipart_copy(self) -> Result<UploadOutcome> {
        let plan = plan_copy_parts(
            self.append_offset,
            self.config.copy_chunk_size,
            self.config.min_part_size
        );
        info!(
            destination = %self.destination,
            append_offset = self.append_offset,
            copy_parts = plan.len(),
            tail_bytes = self.buffer.len(),
            "Beginning multipart copy"
        );

        let session = self.store.create_multipart_upload(&self.destination)?;
        let mut parts = self.copy_parts(&session, &plan)?;

        let tail_number = plan.len() as u32 + 1;
        let tail = self.store.upload_part(&session, &self.buffer, tail_number)?;
        parts.push(tail);

        parts.sort_by_key(|part| part.part_number);
        let expected = plan.len() + 1;
        let contiguous = parts
            .iter()
            .enumerate()
            .all(|(i, part)| part.part_number as usize == i + 1);
        if parts.len() != expected || !contiguous {
            return Err(RepackError::PartCountMismatch {
                expected,
                actual: parts.len()
            });
        }

        self.store.complete_multipart_upload(&session, &parts)?;
        Ok(UploadOutcome::Multipart {
            copy_parts: plan.len(),
            bytes: self.append_offset + self.buffer.len() as u64
        })
    }

    /// Copies every planned part on a dedicated pool of `copy_workers`
    /// threads. Returns once all of them have finished.
    fn copy_parts(&self, session: &UploadSession, plan: &[PartDescriptor]) -> Result<Vec<UploadedPart>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.copy_workers.max(1))
            .thread_name(|i| format!("copy-part-{i}"))
            .build()
            .map_err(|e| RepackError::WorkerPool(e.to_string()))?;

        let store = self.store;
        let source = &self.source;
        pool.install(|| {
            plan.par_iter()
                .map(|part| copy_part(store, session, source, part))
                .collect::<Result<Vec<_>>>()
        })
    }
}

fn copy_part<S: ObjectStore + ?Sized>(
    store: &S,
    session: &UploadSession,
    source: &StorageLocation,
    part: &PartDescriptor
) -> Result<UploadedPart> {
    match store.upload_part_copy(session, source, part.range(), part.index) {
        Ok(uploaded) => {
            debug!(part = part.index, start = part.start, size = part.size, "Copied part");
            Ok(uploaded)
        }
        Err(err) => {
            warn!(part = part.index, error = %err, "Copy part failed");
            Err(err)
        }
    }
}

impl<S: ObjectStore + ?Sized> io::Write for MultipartAppendWriter<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() > MAX_WRITE_BUFFER && !self.warned_buffer_size {
            warn!(buffered = self.buffer.len(), "Append buffer exceeds {MAX_WRITE_BUFFER} bytes");
            self.warned_buffer_size = true;
        }
        Ok(buf.len())
    }

    // Nothing leaves memory before finish()
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
