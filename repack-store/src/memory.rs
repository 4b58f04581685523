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

//! An [ObjectStore] kept entirely in process memory.
//!
//! It follows the multipart rules of S3-like services closely enough to
//! catch assembly mistakes: parts must be listed in ascending order with the
//! entity tags the store handed out, and every part but the last has to meet
//! the configured minimum size.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Range,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard
    }
};

use repack_common::{RepackError, Result};

use crate::{
    location::StorageLocation,
    store::{ObjectMetadata, ObjectStore, UploadSession, UploadedPart}
};

/// One call made against a [MemoryStore], in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Get { location: StorageLocation, range: Option<Range<u64>> },
    Head(StorageLocation),
    Put { location: StorageLocation, len: usize },
    CreateMultipartUpload(StorageLocation),
    UploadPartCopy { part_number: u32, range: Range<u64> },
    UploadPart { part_number: u32, len: usize },
    CompleteMultipartUpload { part_numbers: Vec<u32> }
}

struct StoredPart {
    etag: String,
    data: Vec<u8>
}

struct PendingUpload {
    location: StorageLocation,
    parts: BTreeMap<u32, StoredPart>
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<StorageLocation, Vec<u8>>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    operations: Mutex<Vec<Operation>>,
    next_upload_id: AtomicU64,
    min_part_size: u64
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects completion when a part other than the last is
    /// smaller than `min_part_size`.
    pub fn with_min_part_size(min_part_size: u64) -> Self {
        MemoryStore {
            min_part_size,
            ..Default::default()
        }
    }

    pub fn insert(&self, location: &StorageLocation, data: Vec<u8>) {
        lock(&self.objects).insert(location.clone(), data);
    }

    pub fn object(&self, location: &StorageLocation) -> Option<Vec<u8>> {
        lock(&self.objects).get(location).cloned()
    }

    pub fn operations(&self) -> Vec<Operation> {
        lock(&self.operations).clone()
    }

    /// Number of multipart uploads that were started but never completed.
    pub fn pending_uploads(&self) -> usize {
        lock(&self.uploads).len()
    }

    fn record(&self, operation: Operation) {
        lock(&self.operations).push(operation);
    }

    fn read(&self, location: &StorageLocation, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        let objects = lock(&self.objects);
        let data = objects.get(location).ok_or_else(|| RepackError::Service {
            status: 404,
            message: format!("NoSuchKey: {location}")
        })?;
        let Some(range) = range else {
            return Ok(data.clone());
        };
        let len = data.len() as u64;
        if range.start >= len || range.start >= range.end {
            return Err(RepackError::Service {
                status: 416,
                message: format!("InvalidRange: {}-{} of {len}", range.start, range.end)
            });
        }
        // Like S3, a range running past the end is truncated rather than rejected
        let end = range.end.min(len);
        Ok(data[range.start as usize..end as usize].to_vec())
    }

    fn store_part(&self, session: &UploadSession, part_number: u32, data: Vec<u8>) -> Result<UploadedPart> {
        let mut uploads = lock(&self.uploads);
        let upload = uploads
            .get_mut(&session.upload_id)
            .ok_or_else(|| no_such_upload(session))?;
        let etag = format!("\"{}-{part_number}-{}\"", session.upload_id, data.len());
        upload.parts.insert(
            part_number,
            StoredPart {
                etag: etag.clone(),
                data
            }
        );
        Ok(UploadedPart { part_number, etag })
    }
}

impl ObjectStore for MemoryStore {
    fn get_object(&self, location: &StorageLocation, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        self.record(Operation::Get {
            location: location.clone(),
            range: range.clone()
        });
        self.read(location, range)
    }

    fn head_object(&self, location: &StorageLocation) -> Result<ObjectMetadata> {
        self.record(Operation::Head(location.clone()));
        let objects = lock(&self.objects);
        let data = objects.get(location).ok_or_else(|| RepackError::Service {
            status: 404,
            message: format!("NoSuchKey: {location}")
        })?;
        let mut metadata = ObjectMetadata::default();
        metadata.insert("Content-Length", data.len().to_string());
        Ok(metadata)
    }

    fn put_object(&self, location: &StorageLocation, body: &[u8]) -> Result<()> {
        self.record(Operation::Put {
            location: location.clone(),
            len: body.len()
        });
        self.insert(location, body.to_vec());
        Ok(())
    }

    fn create_multipart_upload(&self, location: &StorageLocation) -> Result<UploadSession> {
        self.record(Operation::CreateMultipartUpload(location.clone()));
        let upload_id = format!("upload-{}", self.next_upload_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.uploads).insert(
            upload_id.clone(),
            PendingUpload {
                location: location.clone(),
                parts: BTreeMap::new()
            }
        );
        Ok(UploadSession {
            location: location.clone(),
            upload_id
        })
    }

    fn upload_part_copy(
        &self,
        session: &UploadSession,
        source: &StorageLocation,
        range: Range<u64>,
        part_number: u32
    ) -> Result<UploadedPart> {
        self.record(Operation::UploadPartCopy {
            part_number,
            range: range.clone()
        });
        let data = self.read(source, Some(range.clone()))?;
        if data.len() as u64 != range.end - range.start {
            return Err(RepackError::Service {
                status: 416,
                message: format!("InvalidRange: {}-{} of {source}", range.start, range.end)
            });
        }
        self.store_part(session, part_number, data)
    }

    fn upload_part(&self, session: &UploadSession, body: &[u8], part_number: u32) -> Result<UploadedPart> {
        self.record(Operation::UploadPart {
            part_number,
            len: body.len()
        });
        self.store_part(session, part_number, body.to_vec())
    }

    fn complete_multipart_upload(&self, session: &UploadSession, parts: &[UploadedPart]) -> Result<()> {
        self.record(Operation::CompleteMultipartUpload {
            part_numbers: parts.iter().map(|p| p.part_number).collect()
        });
        let mut uploads = lock(&self.uploads);
        let upload = uploads
            .get(&session.upload_id)
            .ok_or_else(|| no_such_upload(session))?;
        if parts.is_empty() {
            return Err(invalid_part("no parts listed".into()));
        }

        let mut assembled = vec![];
        let mut previous = 0;
        for (i, part) in parts.iter().enumerate() {
            if part.part_number <= previous {
                return Err(RepackError::Service {
                    status: 400,
                    message: format!("InvalidPartOrder: {} after {previous}", part.part_number)
                });
            }
            previous = part.part_number;
            let stored = upload
                .parts
                .get(&part.part_number)
                .filter(|stored| stored.etag == part.etag)
                .ok_or_else(|| invalid_part(format!("part {} not uploaded", part.part_number)))?;
            let is_last = i == parts.len() - 1;
            if !is_last && (stored.data.len() as u64) < self.min_part_size {
                return Err(RepackError::Service {
                    status: 400,
                    message: format!(
                        "EntityTooSmall: part {} is {} bytes",
                        part.part_number,
                        stored.data.len()
                    )
                });
            }
            assembled.extend_from_slice(&stored.data);
        }

        let location = upload.location.clone();
        uploads.remove(&session.upload_id);
        drop(uploads);
        self.insert(&location, assembled);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn no_such_upload(session: &UploadSession) -> RepackError {
    RepackError::Service {
        status: 404,
        message: format!("NoSuchUpload: {}", session.upload_id)
    }
}

fn invalid_part(message: String) -> RepackError {
    RepackError::Service {
        status: 400,
        message: format!("InvalidPart: {message}")
    }
}
