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

//! JAR signing (APK Signature Scheme v1) with RSA and SHA-1: the manifest,
//! the `.SF` signature file and the PKCS#7 `.RSA` block.

mod certificate;
pub mod crypto_keys;
pub mod manifest;
pub mod pkcs7;

pub use certificate::{carrier_name, issue_carrier_certificate, CARRIER_COMMON_NAME, CARRIER_SERIAL_NUMBER};
pub use crypto_keys::SigningKey;
pub use manifest::{rewrite_manifest, ManifestEntry, RewrittenManifest, MANIFEST_PATH};
pub use pkcs7::sign_signature_file;

/// Archive path of the signature file for `cert_name`.
pub fn signature_file_path(cert_name: &str) -> String {
    format!("META-INF/{cert_name}.SF")
}

/// Archive path of the signature block for `cert_name`.
pub fn signature_block_path(cert_name: &str) -> String {
    format!("META-INF/{cert_name}.RSA")
}
