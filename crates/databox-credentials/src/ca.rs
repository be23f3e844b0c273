//! Root certificate authority.
//!
//! Loads the platform root key and certificate from PEM, or generates an
//! ephemeral pair in development, and mints client certificates for
//! workload identities.

use std::path::Path;

use anyhow::Context;
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CredentialError, CredentialResult};

/// Private key, public key and certificate of one workload, all PEM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateBundle {
    #[serde(rename = "clientprivate")]
    pub private_key_pem: String,
    #[serde(rename = "clientpublic")]
    pub public_key_pem: String,
    #[serde(rename = "clientcert")]
    pub certificate_pem: String,
}

impl CertificateBundle {
    /// Private key, public key and certificate concatenated in that order.
    pub fn to_pem(&self) -> String {
        format!(
            "{}{}{}",
            self.private_key_pem, self.public_key_pem, self.certificate_pem
        )
    }
}

/// Mints client certificates signed by a pre-loaded root.
pub trait CertificateMinter: Send + Sync {
    fn mint(&self, identity: &str) -> CredentialResult<CertificateBundle>;

    /// The root certificate every minted certificate chains to.
    fn root_certificate_pem(&self) -> &str;
}

/// rcgen-backed [`CertificateMinter`].
pub struct RootCa {
    key: KeyPair,
    cert: rcgen::Certificate,
    cert_pem: String,
}

impl std::fmt::Debug for RootCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootCa").finish_non_exhaustive()
    }
}

impl RootCa {
    /// Generate a fresh self-signed root. Development only: nothing outside
    /// this process trusts it.
    pub fn generate(common_name: &str) -> anyhow::Result<Self> {
        let mut params = CertificateParams::default();
        params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, "Databox");
        dn.push(DnType::CommonName, common_name);
        params.distinguished_name = dn;
        params.not_after = rcgen::date_time_ymd(2036, 1, 1);

        let key = KeyPair::generate()?;
        let cert = params.self_signed(&key)?;
        info!(%common_name, "generated ephemeral root CA");

        Ok(Self {
            cert_pem: cert.pem(),
            key,
            cert,
        })
    }

    /// Load a root from its PEM certificate and private key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> anyhow::Result<Self> {
        let key = KeyPair::from_pem(key_pem).context("parsing root CA key")?;
        let params =
            CertificateParams::from_ca_cert_pem(cert_pem).context("parsing root CA certificate")?;
        // Issuing only needs subject and key; the loaded PEM stays the
        // published root.
        let cert = params
            .self_signed(&key)
            .context("re-signing root CA")?;

        Ok(Self {
            key,
            cert,
            cert_pem: cert_pem.to_string(),
        })
    }

    pub fn from_files(cert_path: &Path, key_path: &Path) -> anyhow::Result<Self> {
        let cert_pem = std::fs::read_to_string(cert_path)
            .with_context(|| format!("reading {}", cert_path.display()))?;
        let key_pem = std::fs::read_to_string(key_path)
            .with_context(|| format!("reading {}", key_path.display()))?;
        let ca = Self::from_pem(&cert_pem, &key_pem)?;
        info!(cert = %cert_path.display(), "root CA loaded");
        Ok(ca)
    }

    pub fn key_pem(&self) -> String {
        self.key.serialize_pem()
    }
}

impl CertificateMinter for RootCa {
    fn mint(&self, identity: &str) -> CredentialResult<CertificateBundle> {
        let mint_err = |e: rcgen::Error| CredentialError::Mint {
            identity: identity.to_string(),
            reason: e.to_string(),
        };

        let mut params = CertificateParams::new(vec![identity.to_string(), "localhost".to_string()])
            .map_err(mint_err)?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, identity);
        params.distinguished_name = dn;

        let key = KeyPair::generate().map_err(mint_err)?;
        let cert = params
            .signed_by(&key, &self.cert, &self.key)
            .map_err(mint_err)?;
        debug!(%identity, "client certificate minted");

        Ok(CertificateBundle {
            private_key_pem: key.serialize_pem(),
            public_key_pem: key.public_key_pem(),
            certificate_pem: cert.pem(),
        })
    }

    fn root_certificate_pem(&self) -> &str {
        &self.cert_pem
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::SanType;

    #[test]
    fn minted_bundle_is_pem() {
        let ca = RootCa::generate("Databox Root").unwrap();
        let bundle = ca.mint("weather").unwrap();

        assert!(bundle.private_key_pem.contains("BEGIN PRIVATE KEY"));
        assert!(bundle.public_key_pem.contains("BEGIN PUBLIC KEY"));
        assert!(bundle.certificate_pem.contains("BEGIN CERTIFICATE"));
        assert!(ca.root_certificate_pem().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn minted_certificate_names_identity_and_localhost() {
        let ca = RootCa::generate("Databox Root").unwrap();
        let bundle = ca.mint("weather-store-json").unwrap();

        let parsed = CertificateParams::from_ca_cert_pem(&bundle.certificate_pem).unwrap();
        let names: Vec<&str> = parsed
            .subject_alt_names
            .iter()
            .filter_map(|san| match san {
                SanType::DnsName(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["weather-store-json", "localhost"]);
    }

    #[test]
    fn bundle_serializes_with_client_field_names() {
        let bundle = CertificateBundle {
            private_key_pem: "k".to_string(),
            public_key_pem: "p".to_string(),
            certificate_pem: "c".to_string(),
        };
        let json = serde_json::to_value(&bundle).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "clientprivate": "k", "clientpublic": "p", "clientcert": "c" })
        );
        assert_eq!(bundle.to_pem(), "kpc");
    }

    #[test]
    fn root_round_trips_through_files() {
        let generated = RootCa::generate("Databox Root").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("root.crt");
        let key_path = dir.path().join("root.key");
        std::fs::write(&cert_path, generated.root_certificate_pem()).unwrap();
        std::fs::write(&key_path, generated.key_pem()).unwrap();

        let loaded = RootCa::from_files(&cert_path, &key_path).unwrap();

        assert_eq!(loaded.root_certificate_pem(), generated.root_certificate_pem());
        assert!(loaded.mint("app-a").is_ok());
    }

    #[test]
    fn unparsable_key_is_rejected() {
        let ca = RootCa::generate("Databox Root").unwrap();
        assert!(RootCa::from_pem(ca.root_certificate_pem(), "garbage").is_err());
        assert!(RootCa::from_pem("garbage", &ca.key_pem()).is_err());
    }
}
