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

use std::{collections::BTreeMap, ops::Range};

use repack_common::Result;

use crate::location::StorageLocation;

/// Metadata headers returned by [ObjectStore::head_object].
///
/// Header names are stored lower-cased, lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    headers: BTreeMap<String, String>
}

impl ObjectMetadata {
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// An open multipart upload. Only valid for the destination it was created for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub location: StorageLocation,
    pub upload_id: String
}

/// Handle for one uploaded part, as needed by the completion call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    /// 1-based part number
    pub part_number: u32,
    /// Entity tag the store returned for the part
    pub etag: String
}

/// The object storage primitives the repacker needs.
///
/// Every call blocks until the store has answered. Implementations must be
/// shareable across the copy-part workers. Byte ranges are half-open.
pub trait ObjectStore: Send + Sync {
    /// Reads the whole object, or only `range` when given.
    fn get_object(&self, location: &StorageLocation, range: Option<Range<u64>>) -> Result<Vec<u8>>;

    /// Fetches the object's metadata headers, including `Content-Length`.
    fn head_object(&self, location: &StorageLocation) -> Result<ObjectMetadata>;

    fn put_object(&self, location: &StorageLocation, body: &[u8]) -> Result<()>;

    fn create_multipart_upload(&self, location: &StorageLocation) -> Result<UploadSession>;

    /// Registers `range` of `source` as part `part_number`, copied inside the store.
    fn upload_part_copy(
        &self,
        session: &UploadSession,
        source: &StorageLocation,
        range: Range<u64>,
        part_number: u32
    ) -> Result<UploadedPart>;

    fn upload_part(&self, session: &UploadSession, body: &[u8], part_number: u32) -> Result<UploadedPart>;

    /// Assembles the object from `parts`, which must be sorted by part number.
    fn complete_multipart_upload(&self, session: &UploadSession, parts: &[UploadedPart]) -> Result<()>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for &S {
    fn get_object(&self, location: &StorageLocation, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        (**self).get_object(location, range)
    }

    fn head_object(&self, location: &StorageLocation) -> Result<ObjectMetadata> {
        (**self).head_object(location)
    }

    fn put_object(&self, location: &StorageLocation, body: &[u8]) -> Result<()> {
        (**self).put_object(location, body)
    }

    fn create_multipart_upload(&self, location: &StorageLocation) -> Result<UploadSession> {
        (**self).create_multipart_upload(location)
    }

    fn upload_part_copy(
        &self,
        session: &UploadSession,
        source: &StorageLocation,
        range: Range<u64>,
        part_number: u32
    ) -> Result<UploadedPart> {
        (**self).upload_part_copy(session, source, range, part_number)
    }

    fn upload_part(&self, session: &UploadSession, body: &[u8], part_number: u32) -> Result<UploadedPart> {
        (**self).upload_part(session, body, part_number)
    }

    fn complete_multipart_upload(&self, session: &UploadSession, parts: &[UploadedPart]) -> Result<()> {
        (**self).complete_multipart_upload(session, parts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_lookup_ignores_case() {
        let mut metadata = ObjectMetadata::default();
        metadata.insert("Content-Length", "42");
        assert_eq!(metadata.get("content-length"), Some("42"));
        assert_eq!(metadata.get("CONTENT-LENGTH"), Some("42"));
        assert_eq!(metadata.get("etag"), None);
    }
}
