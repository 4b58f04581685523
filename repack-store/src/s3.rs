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

//! [ObjectStore] backed by any S3-compatible service.
//!
//! The SDK is asynchronous, the repacker is not. Each call is driven to
//! completion on a private tokio runtime, which copy-part workers may share.

use std::ops::Range;

use aws_sdk_s3::{
    config::{http::HttpResponse, BehaviorVersion, Credentials, Region, SharedCredentialsProvider},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client, Config
};
use repack_common::{RepackError, Result};
use serde::Serialize;
use tokio::runtime::Runtime;
use tracing::debug;

use crate::{
    location::StorageLocation,
    store::{ObjectMetadata, ObjectStore, UploadSession, UploadedPart}
};

/// Connection settings for [S3Store].
#[derive(Debug, Clone, Serialize)]
pub struct S3Config {
    /// Service endpoint, addressed path-style. `None` uses AWS itself.
    pub endpoint: Option<String>,
    pub region: String,
    pub access_key_id: String,
    #[serde(skip_serializing)]
    pub access_key_secret: String,
    #[serde(skip_serializing)]
    pub security_token: Option<String>
}

pub struct S3Store {
    client: Client,
    runtime: Runtime
}

impl S3Store {
    pub fn new(config: &S3Config) -> Result<Self> {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.access_key_secret,
            config.security_token.clone(),
            None,
            "repack"
        );
        let mut builder = Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(SharedCredentialsProvider::new(credentials));
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("repack-s3")
            .build()?;

        Ok(S3Store {
            client: Client::from_conf(builder.build()),
            runtime
        })
    }
}

impl ObjectStore for S3Store {
    fn get_object(&self, location: &StorageLocation, range: Option<Range<u64>>) -> Result<Vec<u8>> {
        self.runtime.block_on(async {
            let mut request = self
                .client
                .get_object()
                .bucket(location.bucket())
                .key(location.key());
            if let Some(range) = &range {
                request = request.range(http_range(range)?);
            }
            let output = request
                .send()
                .await
                .map_err(|err| sdk_error("GetObject", err))?;
            let body = output
                .body
                .collect()
                .await
                .map_err(|err| RepackError::Storage(format!("GetObject body: {err}")))?;
            Ok(body.into_bytes().to_vec())
        })
    }

    fn head_object(&self, location: &StorageLocation) -> Result<ObjectMetadata> {
        self.runtime.block_on(async {
            let output = self
                .client
                .head_object()
                .bucket(location.bucket())
                .key(location.key())
                .send()
                .await
                .map_err(|err| sdk_error("HeadObject", err))?;
            let mut metadata = ObjectMetadata::default();
            if let Some(length) = output.content_length() {
                metadata.insert("Content-Length", length.to_string());
            }
            if let Some(etag) = output.e_tag() {
                metadata.insert("ETag", etag);
            }
            Ok(metadata)
        })
    }

    fn put_object(&self, location: &StorageLocation, body: &[u8]) -> Result<()> {
        self.runtime.block_on(async {
            self.client
                .put_object()
                .bucket(location.bucket())
                .key(location.key())
                .body(ByteStream::from(body.to_vec()))
                .send()
                .await
                .map_err(|err| sdk_error("PutObject", err))?;
            Ok(())
        })
    }

    fn create_multipart_upload(&self, location: &StorageLocation) -> Result<UploadSession> {
        self.runtime.block_on(async {
            let output = self
                .client
                .create_multipart_upload()
                .bucket(location.bucket())
                .key(location.key())
                .send()
                .await
                .map_err(|err| sdk_error("CreateMultipartUpload", err))?;
            let upload_id = output
                .upload_id()
                .ok_or_else(|| RepackError::Storage("CreateMultipartUpload returned no upload id".into()))?;
            debug!(location = %location, upload_id, "Created multipart upload");
            Ok(UploadSession {
                location: location.clone(),
                upload_id: upload_id.to_owned()
            })
        })
    }

    fn upload_part_copy(
        &self,
        session: &UploadSession,
        source: &StorageLocation,
        range: Range<u64>,
        part_number: u32
    ) -> Result<UploadedPart> {
        self.runtime.block_on(async {
            let output = self
                .client
                .upload_part_copy()
                .bucket(session.location.bucket())
                .key(session.location.key())
                .upload_id(&session.upload_id)
                .part_number(sdk_part_number(part_number)?)
                .copy_source(source.to_string())
                .copy_source_range(http_range(&range)?)
                .send()
                .await
                .map_err(|err| sdk_error("UploadPartCopy", err))?;
            let etag = output
                .copy_part_result()
                .and_then(|result| result.e_tag())
                .ok_or_else(|| RepackError::Storage(format!("UploadPartCopy part {part_number} returned no ETag")))?;
            Ok(UploadedPart {
                part_number,
                etag: etag.to_owned()
            })
        })
    }

    fn upload_part(&self, session: &UploadSession, body: &[u8], part_number: u32) -> Result<UploadedPart> {
        self.runtime.block_on(async {
            let output = self
                .client
                .upload_part()
                .bucket(session.location.bucket())
                .key(session.location.key())
                .upload_id(&session.upload_id)
                .part_number(sdk_part_number(part_number)?)
                .body(ByteStream::from(body.to_vec()))
                .send()
                .await
                .map_err(|err| sdk_error("UploadPart", err))?;
            let etag = output
                .e_tag()
                .ok_or_else(|| RepackError::Storage(format!("UploadPart part {part_number} returned no ETag")))?;
            Ok(UploadedPart {
                part_number,
                etag: etag.to_owned()
            })
        })
    }

    fn complete_multipart_upload(&self, session: &UploadSession, parts: &[UploadedPart]) -> Result<()> {
        let completed = parts
            .iter()
            .map(|part| {
                Ok(CompletedPart::builder()
                    .e_tag(&part.etag)
                    .part_number(sdk_part_number(part.part_number)?)
                    .build())
            })
            .collect::<Result<Vec<_>>>()?;
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed))
            .build();

        self.runtime.block_on(async {
            self.client
                .complete_multipart_upload()
                .bucket(session.location.bucket())
                .key(session.location.key())
                .upload_id(&session.upload_id)
                .multipart_upload(upload)
                .send()
                .await
                .map_err(|err| sdk_error("CompleteMultipartUpload", err))?;
            Ok(())
        })
    }
}

/// `bytes=first-last` with an inclusive end, as HTTP expects.
fn http_range(range: &Range<u64>) -> Result<String> {
    if range.start >= range.end {
        return Err(RepackError::Storage(format!(
            "empty byte range {}..{}",
            range.start, range.end
        )));
    }
    Ok(format!("bytes={}-{}", range.start, range.end - 1))
}

fn sdk_part_number(part_number: u32) -> Result<i32> {
    i32::try_from(part_number).map_err(|_| RepackError::Storage(format!("part number {part_number} out of range")))
}

/// Keeps the HTTP status when the service answered, so retries can see 503s.
fn sdk_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> RepackError
where
    E: std::error::Error + Send + Sync + 'static
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    let message = format!("{operation}: {}", DisplayErrorContext(err));
    match status {
        Some(status) => RepackError::Service { status, message },
        None => RepackError::Storage(message)
    }
}
