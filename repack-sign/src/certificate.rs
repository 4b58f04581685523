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

use chrono::{DateTime, Datelike, Months, Timelike, Utc};
use rasn::types::{Any, BitString, Integer::Primitive, Oid, SetOf};
use rasn_pkix::{
    AlgorithmIdentifier, AttributeTypeAndValue, Certificate, Name, SubjectPublicKeyInfo, TbsCertificate, Time,
    Validity, Version
};
use repack_common::{RepackError, Result};

use crate::crypto_keys::SigningKey;

/// Arbitrary, the certificate is never looked up by it.
pub const CARRIER_SERIAL_NUMBER: isize = 0x5462c4dd;
pub const CARRIER_COMMON_NAME: &str = "repack";
pub const CERT_VALID_YEARS: u32 = 30;

pub(crate) const OID_SHA1_WITH_RSA: &Oid = Oid::const_new(&[1, 2, 840, 113549, 1, 1, 5]);
const OID_COMMON_NAME: &Oid = Oid::const_new(&[2, 5, 4, 3]);

/// DER `NULL`, the parameters of every RSA and SHA-1 algorithm identifier.
pub(crate) fn null_parameters() -> Option<Any> {
    Some(Any::new(vec![0x05, 0x00]))
}

/// `CN=repack`, used as both subject and issuer.
pub fn carrier_name() -> Result<Name> {
    let common_name = AttributeTypeAndValue {
        r#type: OID_COMMON_NAME.into(),
        value: Any::new(rasn::der::encode(&CARRIER_COMMON_NAME.to_string())?)
    };
    Ok(Name::RdnSequence(vec![SetOf::from_vec(vec![common_name]).into()]))
}

/// Self-signs a certificate for `key`, valid from a year before `now` until
/// 30 years after it.
///
/// It only exists to carry the public key inside the signature block.
/// Verifiers check the signature against that key and ignore the rest.
pub fn issue_carrier_certificate(key: &SigningKey, now: DateTime<Utc>) -> Result<Certificate> {
    let signature_algorithm = AlgorithmIdentifier {
        algorithm: OID_SHA1_WITH_RSA.into(),
        parameters: null_parameters()
    };
    let name = carrier_name()?;
    let subject_public_key_info: SubjectPublicKeyInfo = rasn::der::decode(&key.pub_key_as_der()?)?;

    let tbs_certificate = TbsCertificate {
        version: Version::V3,
        serial_number: Primitive(CARRIER_SERIAL_NUMBER),
        signature: signature_algorithm.clone(),
        issuer: name.clone(),
        validity: validity(now)?,
        subject: name,
        subject_public_key_info,
        issuer_unique_id: None,
        subject_unique_id: None,
        extensions: None
    };
    let signature = key.sign_sha1(&rasn::der::encode(&tbs_certificate)?)?;

    Ok(Certificate {
        tbs_certificate,
        signature_algorithm,
        signature_value: BitString::from_vec(signature)
    })
}

fn validity(now: DateTime<Utc>) -> Result<Validity> {
    let issue_error = || RepackError::CertificateIssuanceFailed(format!("validity out of range around {now}"));
    let now = now.with_nanosecond(0).ok_or_else(issue_error)?;
    let not_before = now.checked_sub_months(Months::new(12)).ok_or_else(issue_error)?;
    let not_after = now
        .checked_add_months(Months::new(CERT_VALID_YEARS * 12))
        .ok_or_else(issue_error)?;
    Ok(Validity {
        not_before: asn1_time(not_before),
        not_after: asn1_time(not_after)
    })
}

// UTCTime only covers 1950 to 2049
fn asn1_time(time: DateTime<Utc>) -> Time {
    if time.year() < 2050 {
        Time::Utc(time)
    } else {
        Time::General(time.fixed_offset())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rsa::Pkcs1v15Sign;
    use sha1::{Digest, Sha1};

    use super::*;
    use crate::crypto_keys::test_key;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 15).unwrap()
    }

    #[test]
    fn carrier_name_is_a_single_utf8_common_name() {
        let der = rasn::der::encode(&carrier_name().unwrap()).unwrap();
        let mut expected = vec![
            0x30, 0x11, 0x31, 0x0f, 0x30, 0x0d, 0x06, 0x03, 0x55, 0x04, 0x03, 0x0c, 0x06,
        ];
        expected.extend_from_slice(b"repack");
        assert_eq!(der, expected);
    }

    #[test]
    fn validity_spans_one_year_back_and_thirty_forward() {
        let validity = validity(fixed_now()).unwrap();
        match validity.not_before {
            Time::Utc(time) => assert_eq!(time, Utc.with_ymd_and_hms(2023, 3, 1, 12, 30, 15).unwrap()),
            other => panic!("unexpected {other:?}")
        }
        match validity.not_after {
            Time::General(time) => assert_eq!(time, Utc.with_ymd_and_hms(2054, 3, 1, 12, 30, 15).unwrap()),
            other => panic!("unexpected {other:?}")
        }
    }

    #[test]
    fn sub_second_precision_is_dropped() {
        let now = fixed_now().with_nanosecond(123_456_789).unwrap();
        let validity = validity(now).unwrap();
        let Time::Utc(not_before) = validity.not_before else {
            panic!("expected UTCTime")
        };
        assert_eq!(not_before.nanosecond(), 0);
    }

    #[test]
    fn certificate_carries_the_public_key() {
        let key = test_key();
        let certificate = issue_carrier_certificate(&key, fixed_now()).unwrap();
        let der = rasn::der::encode(&certificate).unwrap();
        let decoded: Certificate = rasn::der::decode(&der).unwrap();

        let tbs = &decoded.tbs_certificate;
        assert_eq!(tbs.version, Version::V3);
        assert_eq!(tbs.serial_number, Primitive(CARRIER_SERIAL_NUMBER));
        assert_eq!(tbs.issuer, tbs.subject);
        assert_eq!(tbs.issuer, carrier_name().unwrap());
        assert_eq!(
            rasn::der::encode(&tbs.subject_public_key_info).unwrap(),
            key.pub_key_as_der().unwrap()
        );
    }

    #[test]
    fn certificate_is_self_signed_with_sha1_rsa() {
        let key = test_key();
        let certificate = issue_carrier_certificate(&key, fixed_now()).unwrap();
        assert_eq!(&*certificate.signature_algorithm.algorithm, OID_SHA1_WITH_RSA);

        let tbs_der = rasn::der::encode(&certificate.tbs_certificate).unwrap();
        let digest = Sha1::digest(&tbs_der);
        key.public_key
            .verify(
                Pkcs1v15Sign::new::<Sha1>(),
                &digest,
                &certificate.signature_value.clone().into_vec()
            )
            .unwrap();
    }
}
