//! Signature messages.
//!
//! [`TekSignatureList`] is stored as `export.sig` next to `export.bin`
//! inside an archive. [`SignedPayload`] wraps a single published file
//! together with its signature and the signing certificate.

use prost::Message;

use crate::export::SignatureInfo;

#[derive(Clone, PartialEq, Message)]
pub struct TekSignatureList {
    #[prost(message, repeated, tag = "1")]
    pub signatures: Vec<TekSignature>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TekSignature {
    #[prost(message, optional, tag = "1")]
    pub signature_info: Option<SignatureInfo>,
    #[prost(int32, optional, tag = "2")]
    pub batch_num: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub batch_size: Option<i32>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub signature: Option<Vec<u8>>,
}

/// Envelope for a signed single file.
#[derive(Clone, PartialEq, Message)]
pub struct SignedPayload {
    /// DER encoded signing certificate.
    #[prost(bytes = "vec", optional, tag = "1")]
    pub certificate_chain: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub signature: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub payload: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_list_carries_batch_numbers() {
        let list = TekSignatureList {
            signatures: vec![TekSignature {
                signature_info: Some(SignatureInfo {
                    verification_key_version: Some("v1".to_string()),
                    verification_key_id: Some("262".to_string()),
                    signature_algorithm: Some("1.2.840.10045.4.3.2".to_string()),
                }),
                batch_num: Some(1),
                batch_size: Some(2),
                signature: Some(vec![0xAB; 8]),
            }],
        };

        let decoded = TekSignatureList::decode(list.encode_to_vec().as_slice()).unwrap();
        let signature = &decoded.signatures[0];
        assert_eq!(signature.batch_num, Some(1));
        assert_eq!(signature.batch_size, Some(2));
        assert_eq!(
            signature.signature_info.as_ref().unwrap().verification_key_version.as_deref(),
            Some("v1")
        );
    }

    #[test]
    fn test_empty_envelope_encodes_to_nothing() {
        assert!(SignedPayload::default().encode_to_vec().is_empty());
    }
}
