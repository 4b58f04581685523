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

//! The `.RSA` signature block: a detached PKCS#7 SignedData (RFC 2315 §9.1)
//! over the `.SF` file.

use chrono::Utc;
use rasn::types::{Integer::Primitive, Oid};
use rasn_cms::{
    algorithms::RSA,
    pkcs7_compat::{EncapsulatedContentInfo, SignedData},
    AlgorithmIdentifier, Certificate, CertificateChoices, ContentInfo, IssuerAndSerialNumber, SignerIdentifier,
    SignerInfo
};
use repack_common::Result;
use tracing::debug;

use crate::{
    certificate::{issue_carrier_certificate, null_parameters},
    crypto_keys::SigningKey
};

pub const OID_PKCS7: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 7]);
pub const OID_PKCS7_DATA: &Oid = Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS7_DATA;
pub const OID_PKCS7_SIGNED_DATA: &Oid = Oid::ISO_MEMBER_BODY_US_RSADSI_PKCS7_SIGNED_DATA;
pub const OID_SHA1: &Oid = Oid::const_new(&[1, 3, 14, 3, 2, 26]);
pub const OID_RSA_ENCRYPTION: &Oid = RSA;

/// Signs a `.SF` file, returning the DER `.RSA` block with a freshly issued
/// carrier certificate.
pub fn sign_signature_file(signature_file: &[u8], key: &SigningKey) -> Result<Vec<u8>> {
    let certificate = issue_carrier_certificate(key, Utc::now())?;
    create_pkcs7_file(signature_file, key, certificate)
}

/// Wraps the signature over `signature_file` in a SignedData carrying
/// `certificate`. The signed content itself is not embedded.
pub fn create_pkcs7_file(signature_file: &[u8], key: &SigningKey, certificate: Certificate) -> Result<Vec<u8>> {
    let signature = key.sign_sha1(signature_file)?;

    let signer_info = SignerInfo {
        version: Primitive(1),
        sid: SignerIdentifier::IssuerAndSerialNumber(IssuerAndSerialNumber {
            issuer: certificate.tbs_certificate.issuer.clone(),
            serial_number: certificate.tbs_certificate.serial_number.clone()
        }),
        digest_algorithm: sha1_algorithm(),
        signed_attrs: None,
        signature_algorithm: AlgorithmIdentifier {
            algorithm: OID_RSA_ENCRYPTION.into(),
            parameters: null_parameters()
        },
        signature: signature.into(),
        unsigned_attrs: None
    };

    let signed_data = SignedData {
        version: Primitive(1),
        digest_algorithms: vec![sha1_algorithm()].into(),
        encap_content_info: EncapsulatedContentInfo {
            content_type: OID_PKCS7_DATA.into(),
            content: None
        },
        certificates: Some(vec![CertificateChoices::Certificate(Box::new(certificate))].into()),
        crls: None,
        signer_infos: vec![signer_info].into()
    };

    let wrapper = ContentInfo {
        content_type: OID_PKCS7_SIGNED_DATA.into(),
        content: rasn::types::Any::new(rasn::der::encode(&signed_data)?)
    };
    let block = rasn::der::encode(&wrapper)?;
    debug!(bytes = block.len(), "Encoded PKCS#7 signature block");
    Ok(block)
}

fn sha1_algorithm() -> AlgorithmIdentifier {
    AlgorithmIdentifier {
        algorithm: OID_SHA1.into(),
        parameters: null_parameters()
    }
}
