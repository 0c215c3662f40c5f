/*!
 * # TLS Signer
 *
 * The interception engine's external collaborator: given a hostname, return
 * a certificate chain and private key valid for that hostname. The spec
 * treats the certificate authority as out of scope and assumes a signer is
 * provided; [`RcgenSigner`] is the bundled default so the interception path
 * is exercisable without an externally managed CA, but any `CertSigner`
 * implementation may be substituted.
 *
 * Signing is idempotent per hostname for the process lifetime: leaves are
 * cached in memory once minted.
 */

use std::collections::HashMap;
use std::sync::Mutex;

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::error::{Error, Result};

/// A certificate chain plus private key, ready to hand to a
/// `rustls::ServerConfig::with_single_cert`.
pub struct SignedLeaf {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

/// External collaborator contract: mint a leaf certificate for `hostname`.
/// Implementations must be idempotent per hostname for the process lifetime
/// (callers are free to cache, but a fresh signer must also be able to serve
/// repeat requests for the same host without error).
#[async_trait::async_trait]
pub trait CertSigner: Send + Sync {
    async fn sign(&self, hostname: &str) -> Result<SignedLeaf>;
}

/// Self-signed-root default signer. Generates a CA at construction time and
/// caches minted leaves per hostname for reuse across sessions.
pub struct RcgenSigner {
    ca_key: KeyPair,
    ca_cert: Certificate,
    cache: Mutex<HashMap<String, (Vec<CertificateDer<'static>>, Vec<u8>)>>,
}

impl RcgenSigner {
    pub fn new() -> Result<Self> {
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, "sniffproxy interception CA");
        dn.push(DnType::OrganizationName, "sniffproxy");
        params.distinguished_name = dn;

        let ca_key = KeyPair::generate()
            .map_err(|e| Error::Custom(format!("failed to generate CA key: {e}")))?;
        let ca_cert = params
            .self_signed(&ca_key)
            .map_err(|e| Error::Custom(format!("failed to self-sign CA cert: {e}")))?;

        Ok(RcgenSigner {
            ca_key,
            ca_cert,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// PEM encoding of the root certificate, for installing into a client's
    /// trust store out of band.
    pub fn root_cert_pem(&self) -> String {
        self.ca_cert.pem()
    }

    fn mint(&self, hostname: &str) -> Result<(Vec<CertificateDer<'static>>, Vec<u8>)> {
        let mut params = CertificateParams::new(vec![hostname.to_string()])
            .map_err(|e| Error::Custom(format!("invalid hostname for cert SAN: {e}")))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, hostname);
        params.distinguished_name = dn;

        let leaf_key = KeyPair::generate()
            .map_err(|e| Error::Custom(format!("failed to generate leaf key: {e}")))?;
        let leaf_cert = params
            .signed_by(&leaf_key, &self.ca_cert, &self.ca_key)
            .map_err(|e| Error::Custom(format!("failed to sign leaf cert for {hostname}: {e}")))?;

        let cert_der = CertificateDer::from(leaf_cert.der().to_vec());
        Ok((vec![cert_der], leaf_key.serialize_der()))
    }
}

#[async_trait::async_trait]
impl CertSigner for RcgenSigner {
    async fn sign(&self, hostname: &str) -> Result<SignedLeaf> {
        let hostname = hostname.to_string();
        {
            let cache = self.cache.lock().expect("cert cache poisoned");
            if let Some((chain, key_der)) = cache.get(&hostname) {
                return Ok(SignedLeaf {
                    chain: chain.clone(),
                    key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der.clone())),
                });
            }
        }

        let (chain, key_der) = self.mint(&hostname)?;
        {
            let mut cache = self.cache.lock().expect("cert cache poisoned");
            cache
                .entry(hostname)
                .or_insert_with(|| (chain.clone(), key_der.clone()));
        }

        Ok(SignedLeaf {
            chain,
            key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signs_leaf_for_hostname() {
        let signer = RcgenSigner::new().unwrap();
        let leaf = signer.sign("example.test").await.unwrap();
        assert_eq!(leaf.chain.len(), 1);
    }

    #[tokio::test]
    async fn signing_is_idempotent_per_hostname() {
        let signer = RcgenSigner::new().unwrap();
        let first = signer.sign("example.test").await.unwrap();
        let second = signer.sign("example.test").await.unwrap();
        assert_eq!(first.chain[0].as_ref(), second.chain[0].as_ref());
    }

    #[tokio::test]
    async fn different_hosts_get_different_leaves() {
        let signer = RcgenSigner::new().unwrap();
        let a = signer.sign("a.example.test").await.unwrap();
        let b = signer.sign("b.example.test").await.unwrap();
        assert_ne!(a.chain[0].as_ref(), b.chain[0].as_ref());
    }
}
