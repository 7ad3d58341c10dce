//! Signature verification of delivery bodies against a public certificate.

use std::path::{Path, PathBuf};

use base64::{Engine, engine::general_purpose::STANDARD};
use rustls_pki_types::{CertificateDer, SignatureVerificationAlgorithm, pem::PemObject};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};
use webpki::EndEntityCert;

use crate::delivery::Delivery;

/// Header carrying the base64 encoded signature of the body.
pub const SIGNATURE_HEADER: &str = "signature";

static ALGORITHMS: &[&dyn SignatureVerificationAlgorithm] = &[
    webpki::ring::RSA_PKCS1_2048_8192_SHA512,
    webpki::ring::RSA_PKCS1_2048_8192_SHA384,
    webpki::ring::RSA_PKCS1_2048_8192_SHA256,
    webpki::ring::ECDSA_P256_SHA256,
    webpki::ring::ECDSA_P384_SHA384,
    webpki::ring::ED25519,
];

#[derive(Error, Debug)]
pub enum ErrorVerify {
    #[error("failed to read certificate {}: {source}", path.display())]
    ReadCertificate {
        path: PathBuf,
        #[source]
        source: rustls_pki_types::pem::Error,
    },

    #[error("unusable certificate: {0}")]
    Certificate(webpki::Error),

    #[error("delivery has no {SIGNATURE_HEADER} header")]
    MissingSignature,

    #[error("signature header is not valid base64: {0}")]
    MalformedSignature(#[from] base64::DecodeError),

    #[error("signature does not match the body")]
    BadSignature,
}

pub struct PayloadVerifier {
    certificate: CertificateDer<'static>,
}

impl PayloadVerifier {
    /// Load a PEM certificate and make sure its public key can be used.
    pub fn from_pem_file(path: impl AsRef<Path>) -> Result<Self, ErrorVerify> {
        let path = path.as_ref();
        info!("Loading verification certificate {}", path.display());

        let certificate =
            CertificateDer::from_pem_file(path).map_err(|source| ErrorVerify::ReadCertificate {
                path: path.to_path_buf(),
                source,
            })?;
        EndEntityCert::try_from(&certificate).map_err(ErrorVerify::Certificate)?;

        Ok(Self { certificate })
    }

    pub fn verify(&self, delivery: &Delivery) -> Result<(), ErrorVerify> {
        let signature = match delivery.header(SIGNATURE_HEADER) {
            Some(Value::String(encoded)) => STANDARD.decode(encoded.trim())?,
            _ => return Err(ErrorVerify::MissingSignature),
        };

        let cert = EndEntityCert::try_from(&self.certificate).map_err(ErrorVerify::Certificate)?;
        let verified = ALGORITHMS
            .iter()
            .any(|alg| cert.verify_signature(*alg, &delivery.body, &signature).is_ok());

        if verified {
            debug!("Delivery {} signature verified", delivery.delivery_tag);
            Ok(())
        } else {
            Err(ErrorVerify::BadSignature)
        }
    }
}
