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

use std::{collections::HashMap, fs, path::Path};

use repack_common::*;
use rsa::{
    pkcs1::DecodeRsaPrivateKey,
    pkcs8::{DecodePrivateKey, EncodePublicKey},
    Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey
};
use sha1::{Digest, Sha1};

/// Holds the RSA key pair used to sign the archive.
///
/// There is no certificate here: the one embedded in the signature block is
/// issued on the fly from this key, see
/// [issue_carrier_certificate](crate::issue_carrier_certificate).
#[derive(Clone)]
pub struct SigningKey {
    /// RSA Public Key
    pub public_key: RsaPublicKey,
    /// RSA Private Key
    pub private_key: RsaPrivateKey
}

impl SigningKey {
    /// Parses a `.pem` file holding either a PKCS#1 `BEGIN RSA PRIVATE KEY`
    /// or a PKCS#8 `BEGIN PRIVATE KEY` section. Other sections are ignored.
    pub fn from_pem_string(pem: &str) -> Result<SigningKey> {
        let pem_map = parse_pem_map_by_tags(pem)?;
        let private_key = if let Some(der) = pem_map.get("RSA PRIVATE KEY") {
            RsaPrivateKey::from_pkcs1_der(der)?
        } else if let Some(der) = pem_map.get("PRIVATE KEY") {
            RsaPrivateKey::from_pkcs8_der(der)?
        } else {
            return Err(RepackError::NoPrivateKey);
        };
        let public_key = RsaPublicKey::from(&private_key);

        Ok(SigningKey {
            public_key,
            private_key
        })
    }

    pub fn from_pem_file(path: &Path) -> Result<SigningKey> {
        Self::from_pem_string(&fs::read_to_string(path)?)
    }

    /// Returns the RSA Public Key as a DER `SubjectPublicKeyInfo`.
    pub fn pub_key_as_der(&self) -> Result<Vec<u8>> {
        Ok(self.public_key.to_public_key_der()?.as_ref().to_vec())
    }

    /// RSASSA-PKCS1-v1_5 signature over the SHA-1 digest of `message`.
    pub fn sign_sha1(&self, message: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha1::digest(message);
        let padding = Pkcs1v15Sign::new::<Sha1>();
        Ok(self.private_key.sign(padding, &digest)?)
    }
}

/// Parses a .pem file and returns a map of Tag -> Contents
fn parse_pem_map_by_tags(combined_pem: &str) -> Result<HashMap<String, Vec<u8>>> {
    let parsed = pem::parse_many(combined_pem)?;
    let mut map = HashMap::new();
    for pem_part in parsed {
        map.insert(pem_part.tag().into(), pem_part.into_contents());
    }
    Ok(map)
}

/// One throwaway key shared by every test in the crate. Key generation is slow.
#[cfg(test)]
pub(crate) fn test_key() -> SigningKey {
    use std::sync::OnceLock;

    static KEY: OnceLock<SigningKey> = OnceLock::new();
    KEY.get_or_init(|| {
        let private_key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        SigningKey {
            public_key: RsaPublicKey::from(&private_key),
            private_key
        }
    })
    .clone()
}
