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

//! Reading and rewriting archives that live in object storage.
//!
//! [RangeReader] gives random access to a stored object. A
//! [MultipartAppendWriter] produces a new object from an unmodified prefix of
//! an existing one plus freshly written bytes, copying the prefix inside the
//! store. Wrap any backend in a [RetryingObjectStore] before use.

mod location;
pub mod memory;
mod range_reader;
mod retry;
#[cfg(feature = "s3")]
pub mod s3;
mod store;
mod writer;

pub use location::StorageLocation;
pub use range_reader::RangeReader;
pub use retry::{DoublingBackoff, RetryPolicy, RetryingObjectStore, INITIAL_RETRY_DELAY, MAX_RETRIES};
pub use store::{ObjectMetadata, ObjectStore, UploadSession, UploadedPart};
pub use writer::{
    plan_copy_parts, MultipartAppendWriter, PartDescriptor, UploadConfig, UploadOutcome, COPY_CHUNK_SIZE,
    COPY_PART_WORKERS, MAX_WRITE_BUFFER, MIN_PART_SIZE, S3_MIN_PART_SIZE
};
