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

use std::{io, num::ParseIntError};

use deku::DekuError;
use rsa::{pkcs1, pkcs8};
use zip::result::ZipError;

mod read_at;

pub use read_at::ReadAt;

/// HTTP status an object store reports when it is temporarily unavailable.
pub const SERVICE_UNAVAILABLE: u16 = 503;

/// Common error type making it easier to share `Result`s between REPACK crates.
///
/// In general designed to avoid needing utilities like `map_err`. Every
/// variant is `Send + Sync` so copy-part results can cross worker threads.
#[derive(Debug, thiserror::Error)]
pub enum RepackError {
    /// A configuration value was missing or unusable. For example, no
    /// certificate name was given and the source archive has no `.SF` file
    /// to take one from.
    #[error("configuration error: {0}")]
    Config(String),
    /// A storage location did not have the `bucket/key` shape.
    #[error("invalid location: {0:?}")]
    InvalidLocation(String),
    /// The object store answered with an HTTP status. `503` is retried, see
    /// [RepackError::is_transient].
    #[error("object store returned status {status}: {message}")]
    Service { status: u16, message: String },
    /// The object store failed without a structured status (transport
    /// errors, opaque SDK errors).
    #[error("object store error: {0}")]
    Storage(String),
    /// A metadata request came back without a `Content-Length`.
    #[error("object metadata has no content length")]
    MissingContentLength,
    /// The `Content-Length` header was not a valid integer.
    #[error("invalid content length: {0}")]
    InvalidContentLength(ParseIntError),
    /// A ranged read returned a different number of bytes than requested.
    #[error("expected {expected} bytes, got {actual}")]
    ShortRead { expected: u64, actual: u64 },
    /// The parts about to be completed do not form the contiguous sequence
    /// `1..=expected`.
    #[error("multipart upload expected {expected} parts, got {actual}")]
    PartCountMismatch { expected: usize, actual: usize },
    /// The copy-part worker pool could not be started.
    #[error("failed to start copy workers: {0}")]
    WorkerPool(String),
    /// The source archive has no `META-INF/MANIFEST.MF`.
    #[error("manifest file not found")]
    ManifestNotFound,
    /// The manifest is not valid UTF-8 with CRLF line endings, or an entry
    /// section is cut short.
    #[error("malformed manifest: {0}")]
    MalformedManifest(String),
    /// No end of central directory record, or the central directory it
    /// points at is inconsistent with the object size.
    #[error("zip parsing failed: {0}")]
    ZipParsingFailed(String),
    /// Archives that need ZIP64 records (over 65535 entries or 4 GiB of
    /// offsets) are not supported.
    #[error("zip64 archives are not supported")]
    Zip64Unsupported,
    /// `zip` failed to read the source manifest or write the new entries.
    #[error("zip error: {0}")]
    ZipFailed(#[from] ZipError),
    /// Binary (de)serialisation of a zip record failed. See [DekuError].
    #[error("zip record serialisation failed: {0}")]
    ByteSerialisationFailed(String),
    /// An error occurred while reading or writing the working directory.
    #[error("file i/o error: {0}")]
    FileIoError(#[from] io::Error),
    /// An error occurred while parsing the private key `.pem` file.
    #[error("failed to parse pem: {0}")]
    PemParsingFailed(#[from] pem::PemError),
    /// The `.pem` file was valid but held neither a `RSA PRIVATE KEY` nor a
    /// `PRIVATE KEY` section.
    #[error("no RSA private key found in pem")]
    NoPrivateKey,
    /// The private key section was present but wasn't an RSA private key.
    #[error("failed to parse RSA private key: {0}")]
    RsaPrivateKeyParsingFailed(String),
    /// An error occurred while signing a hash, see [rsa::Error].
    #[error("RSA signing failed: {0}")]
    RsaSigningFailed(#[from] rsa::Error),
    /// An error occurred while serialising the RSA public key.
    #[error("RSA key serialisation failed: {0}")]
    RsaKeySerialisationFailed(String),
    /// The carrier certificate could not be built.
    #[error("certificate issuance failed: {0}")]
    CertificateIssuanceFailed(String),
    /// A DER structure could not be decoded.
    #[error("certificate decoding failed: {0}")]
    CertificateDecodingFailed(String),
    /// The certificate or PKCS#7 SignedData could not be DER encoded.
    #[error("PKCS#7 encoding failed: {0}")]
    Pkcs7EncodingFailed(String)
}

/// Result type where the error is always [RepackError].
pub type Result<T> = std::result::Result<T, RepackError>;

impl RepackError {
    /// Whether the object store reported temporary unavailability.
    ///
    /// Structured errors are matched on their status code. Opaque errors fall
    /// back to looking for the literal status in their message.
    pub fn is_transient(&self) -> bool {
        match self {
            RepackError::Service { status, .. } => *status == SERVICE_UNAVAILABLE,
            RepackError::Storage(message) => message.contains("503"),
            _ => false
        }
    }
}

// Automatic conversion from other types of error to RepackError makes the rest of the code cleaner
impl From<ParseIntError> for RepackError {
    fn from(value: ParseIntError) -> Self {
        RepackError::InvalidContentLength(value)
    }
}

impl From<DekuError> for RepackError {
    fn from(value: DekuError) -> Self {
        RepackError::ByteSerialisationFailed(value.to_string())
    }
}

impl From<pkcs1::Error> for RepackError {
    fn from(value: pkcs1::Error) -> Self {
        RepackError::RsaPrivateKeyParsingFailed(value.to_string())
    }
}

impl From<pkcs8::Error> for RepackError {
    fn from(value: pkcs8::Error) -> Self {
        RepackError::RsaPrivateKeyParsingFailed(value.to_string())
    }
}

impl From<pkcs8::spki::Error> for RepackError {
    fn from(value: pkcs8::spki::Error) -> Self {
        RepackError::RsaKeySerialisationFailed(value.to_string())
    }
}

impl From<rasn::error::DecodeError> for RepackError {
    fn from(value: rasn::error::DecodeError) -> Self {
        RepackError::CertificateDecodingFailed(value.to_string())
    }
}

impl From<rasn::error::EncodeError> for RepackError {
    fn from(value: rasn::error::EncodeError) -> Self {
        RepackError::Pkcs7EncodingFailed(value.to_string())
    }
}
