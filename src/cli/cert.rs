//! `mitm-proxy-cli cert` subcommands: generate the CA material a fresh
//! deployment needs, and inspect/validate certificates already on disk.
//!
//! Generation reuses `tls::CertificateAuthority::load_or_create` directly
//! rather than reimplementing key/cert generation here -- the CLI and the
//! running proxy must produce byte-identical CA material for the same
//! `cert_dir`. Inspection parses with `x509-parser`, matching the stack
//! the other example repos reach for this rather than hand-rolling
//! ASN.1 parsing.

use crate::config::settings::TlsConfig;
use crate::tls::CertificateAuthority;
use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::info;
use x509_parser::prelude::*;

#[derive(Debug, Subcommand)]
pub enum CertCommand {
    /// Generate (or reuse, if already present) the CA cert/key pair a
    /// fresh `cert_dir` needs.
    Generate(GenerateCertArgs),

    /// Parse and print a certificate's subject, issuer, validity window,
    /// and serial number.
    Inspect(InspectCertArgs),

    /// Check whether a certificate is currently within its validity
    /// window.
    Validate(ValidateCertArgs),
}

#[derive(Debug, Args)]
pub struct GenerateCertArgs {
    /// Directory to hold the CA cert/key and the shared leaf key.
    #[arg(long, default_value = "./certs")]
    pub cert_dir: PathBuf,

    /// Organization name recorded in the CA certificate's subject.
    #[arg(long, default_value = "mitm-proxy")]
    pub organization: String,
}

#[derive(Debug, Args)]
pub struct InspectCertArgs {
    /// Path to a PEM-encoded certificate file.
    #[arg(long)]
    pub cert_path: PathBuf,
}

#[derive(Debug, Args)]
pub struct ValidateCertArgs {
    /// Path to a PEM-encoded certificate file.
    #[arg(long)]
    pub cert_path: PathBuf,
}

impl CertCommand {
    pub async fn execute(&self) -> Result<()> {
        match self {
            CertCommand::Generate(args) => generate(args),
            CertCommand::Inspect(args) => inspect(args),
            CertCommand::Validate(args) => validate(args),
        }
    }
}

fn generate(args: &GenerateCertArgs) -> Result<()> {
    let tls_config = TlsConfig {
        cert_dir: args.cert_dir.clone(),
        cert_organization: args.organization.clone(),
        ..TlsConfig::default()
    };

    info!(cert_dir = %args.cert_dir.display(), organization = %args.organization, "generating CA material");
    CertificateAuthority::load_or_create(&tls_config).context("generating CA material")?;

    println!("CA certificate: {}", tls_config.ca_cert_path().display());
    println!("CA private key: {}", tls_config.ca_key_path().display());
    println!("shared leaf key: {}", tls_config.leaf_key_path().display());
    println!("\nInstall the CA certificate in your client/OS trust store to intercept TLS traffic.");
    Ok(())
}

fn read_der(cert_path: &std::path::Path) -> Result<Vec<u8>> {
    let pem_bytes = fs::read(cert_path).with_context(|| format!("reading {}", cert_path.display()))?;
    let (_, pem) = parse_x509_pem(&pem_bytes).map_err(|e| anyhow!("parsing PEM from {}: {e}", cert_path.display()))?;
    Ok(pem.contents)
}

fn inspect(args: &InspectCertArgs) -> Result<()> {
    let der = read_der(&args.cert_path)?;
    let (_, cert) = X509Certificate::from_der(&der).map_err(|e| anyhow!("parsing certificate: {e}"))?;

    println!("Subject:      {}", cert.subject());
    println!("Issuer:       {}", cert.issuer());
    println!("Serial:       {}", cert.raw_serial_as_string());
    println!("Not before:   {}", cert.validity().not_before);
    println!("Not after:    {}", cert.validity().not_after);
    println!("Is CA:        {}", cert.is_ca());

    let sans: Vec<String> = cert
        .subject_alternative_name()
        .ok()
        .flatten()
        .map(|ext| ext.value.general_names.iter().map(|gn| gn.to_string()).collect())
        .unwrap_or_default();
    if !sans.is_empty() {
        println!("SAN:          {}", sans.join(", "));
    }

    Ok(())
}

fn validate(args: &ValidateCertArgs) -> Result<()> {
    let der = read_der(&args.cert_path)?;
    let (_, cert) = X509Certificate::from_der(&der).map_err(|e| anyhow!("parsing certificate: {e}"))?;

    if !cert.validity().is_valid() {
        return Err(anyhow!(
            "certificate is outside its validity window ({} .. {})",
            cert.validity().not_before,
            cert.validity().not_after
        ));
    }

    println!("valid: {} .. {}", cert.validity().not_before, cert.validity().not_after);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_then_inspect_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let args = GenerateCertArgs {
            cert_dir: dir.path().to_path_buf(),
            organization: "Test Org".to_string(),
        };
        generate(&args).unwrap();

        let cert_path = dir.path().join("mitm-ca.crt");
        assert!(cert_path.exists());

        let inspect_args = InspectCertArgs { cert_path: cert_path.clone() };
        inspect(&inspect_args).unwrap();

        let validate_args = ValidateCertArgs { cert_path };
        validate(&validate_args).unwrap();
    }

    #[test]
    fn validate_rejects_missing_file() {
        let args = ValidateCertArgs {
            cert_path: PathBuf::from("/nonexistent/cert.pem"),
        };
        assert!(validate(&args).is_err());
    }
}
