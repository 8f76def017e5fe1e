//! Certificate Authority management and on-demand leaf certificate minting.
//!
//! The CA key/cert is a process-wide singleton, loaded once at startup
//! (generated on first run if absent). Leaf certificates are minted
//! in-process with `rcgen` and signed by the CA -- no external signing
//! script is shelled out to, unlike the original implementation's
//! `gen_cert.sh` call. All minted leaves share one private key, written
//! once to the shared leaf-key file; only the certificate (CN/SAN/serial)
//! differs per SNI.

use crate::config::settings::TlsConfig;
use crate::error::{Error, Result};
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType,
    ExtendedKeyUsagePurpose, IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rustls::{Certificate as RustlsCertificate, PrivateKey};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// A certificate and its private key, ready to hand to `rustls`.
#[derive(Debug, Clone)]
pub struct CertificateData {
    pub cert: RustlsCertificate,
    pub key: PrivateKey,
}

impl CertificateData {
    pub fn cert(&self) -> &RustlsCertificate {
        &self.cert
    }

    pub fn key(&self) -> &PrivateKey {
        &self.key
    }
}

/// The CA signing authority plus the one shared leaf key, loaded once at
/// startup and held for the process lifetime.
pub struct CertificateAuthority {
    signer: Certificate,
    leaf_key_pem: String,
}

impl CertificateAuthority {
    /// Load the CA and shared leaf key from `tls_config.cert_dir`,
    /// generating both on first run.
    pub fn load_or_create(tls_config: &TlsConfig) -> Result<Self> {
        fs::create_dir_all(&tls_config.cert_dir)?;

        let ca_key_pem = load_or_generate_ca_key(&tls_config.ca_key_path())?;
        let signer = build_ca_signer(&ca_key_pem, &tls_config.cert_organization)?;

        if !tls_config.ca_cert_path().exists() {
            let ca_der = signer
                .serialize_der()
                .map_err(|e| Error::CertMint(format!("serializing CA certificate: {e}")))?;
            write_pem(&tls_config.ca_cert_path(), "CERTIFICATE", &ca_der)?;
            info!("generated new CA certificate at {}", tls_config.ca_cert_path().display());
        }

        let leaf_key_pem = load_or_generate_leaf_key(&tls_config.leaf_key_path())?;

        Ok(Self { signer, leaf_key_pem })
    }

    /// Mint a leaf certificate for `sni`, signed by this CA, using the
    /// shared leaf private key.
    pub fn mint_leaf(&self, sni: &str, validity_days: u32) -> Result<CertificateData> {
        debug!(sni, "minting leaf certificate");

        let key_pair = KeyPair::from_pem(&self.leaf_key_pem)
            .map_err(|e| Error::CertMint(format!("loading shared leaf key: {e}")))?;
        let key_der = key_pair.serialize_der();

        let mut params = CertificateParams::new(vec![sni.to_string()]);
        params.key_pair = Some(key_pair);

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, sni);
        params.distinguished_name = dn;

        let now = SystemTime::now();
        params.not_before = now.into();
        params.not_after =
            (now + Duration::from_secs(validity_days as u64 * 24 * 60 * 60)).into();

        params.subject_alt_names = vec![
            SanType::DnsName(sni.to_string()),
            SanType::DnsName(format!("www.{sni}")),
        ];

        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.serial_number = Some(SerialNumber::from_slice(uuid::Uuid::now_v7().as_bytes()));

        let leaf = Certificate::from_params(params)
            .map_err(|e| Error::CertMint(format!("building leaf cert params: {e}")))?;
        let leaf_der = leaf
            .serialize_der_with_signer(&self.signer)
            .map_err(|e| Error::CertMint(format!("signing leaf cert: {e}")))?;

        Ok(CertificateData {
            cert: RustlsCertificate(leaf_der),
            key: PrivateKey(key_der),
        })
    }
}

fn load_or_generate_ca_key(path: &Path) -> Result<String> {
    if path.exists() {
        return fs::read_to_string(path).map_err(Error::Io);
    }
    let key_pair = KeyPair::generate(&rcgen::PKCS_RSA_SHA256)
        .or_else(|_| KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256))
        .map_err(|e| Error::CertMint(format!("generating CA key: {e}")))?;
    let pem = key_pair.serialize_pem();
    fs::write(path, &pem)?;
    info!("generated new CA private key at {}", path.display());
    Ok(pem)
}

fn load_or_generate_leaf_key(path: &Path) -> Result<String> {
    if path.exists() {
        return fs::read_to_string(path).map_err(Error::Io);
    }
    let key_pair = KeyPair::generate(&rcgen::PKCS_RSA_SHA256)
        .or_else(|_| KeyPair::generate(&rcgen::PKCS_ECDSA_P256_SHA256))
        .map_err(|e| Error::CertMint(format!("generating shared leaf key: {e}")))?;
    let pem = key_pair.serialize_pem();
    fs::write(path, &pem)?;
    info!("generated shared leaf private key at {}", path.display());
    Ok(pem)
}

/// Build an `rcgen::Certificate` acting as a CA signing authority from a
/// previously persisted (or freshly generated) CA private key.
fn build_ca_signer(ca_key_pem: &str, organization: &str) -> Result<Certificate> {
    let key_pair = KeyPair::from_pem(ca_key_pem)
        .map_err(|e| Error::CertMint(format!("loading CA key: {e}")))?;

    let mut params = CertificateParams::new(vec![]);
    params.key_pair = Some(key_pair);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, organization);
    dn.push(DnType::CommonName, format!("{organization} MITM CA"));
    params.distinguished_name = dn;

    let now = SystemTime::now();
    params.not_before = now.into();
    params.not_after = (now + Duration::from_secs(365 * 10 * 24 * 60 * 60)).into();
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    Certificate::from_params(params)
        .map_err(|e| Error::CertMint(format!("building CA signer: {e}")))
}

fn write_pem(path: &Path, label: &str, der: &[u8]) -> Result<()> {
    use base64::{engine::general_purpose, Engine as _};
    let b64 = general_purpose::STANDARD.encode(der);
    let wrapped: Vec<&str> = b64.as_bytes().chunks(64).map(|c| std::str::from_utf8(c).unwrap_or("")).collect();
    let pem = format!("-----BEGIN {label}-----\n{}\n-----END {label}-----\n", wrapped.join("\n"));
    fs::write(path, pem)?;
    Ok(())
}

/// Load a certificate+key pair from PEM files on disk (used when reading
/// back a previously minted leaf from the on-disk cache level).
pub fn load_cert_from_files(cert_path: &Path, key_pem: &str) -> Result<CertificateData> {
    let cert_pem = fs::read(cert_path)?;
    let mut cert_reader = std::io::BufReader::new(cert_pem.as_slice());
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .map_err(|e| Error::CertMint(format!("parsing leaf cert PEM: {e}")))?;
    let cert_der = certs
        .into_iter()
        .next()
        .ok_or_else(|| Error::CertMint("no certificate in PEM file".into()))?;

    let key_pair = KeyPair::from_pem(key_pem)
        .map_err(|e| Error::CertMint(format!("loading shared leaf key: {e}")))?;

    Ok(CertificateData {
        cert: RustlsCertificate(cert_der),
        key: PrivateKey(key_pair.serialize_der()),
    })
}
