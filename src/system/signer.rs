// src/system/signer.rs

//! CMS signing of exported profiles.
//!
//! The engine only knows the [`Signer`] trait. `OpenSslSigner` implements it by running
//! `openssl cms`, with identities resolved to PEM files in a certificates directory.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, Stdio};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SigningError {
    #[error("Signing was requested but no signing identity is selected.")]
    MissingIdentity,
    #[error("Signing was requested but no signer is available.")]
    NoSigner,
    #[error("Could not find signing identity '{identity}': {reason}")]
    IdentityLookup { identity: String, reason: String },
    #[error("Signing operation failed (status {status:?}): {message}")]
    SigningFailed { status: Option<i32>, message: String },
    #[error("Could not read the signed content (status {status:?}): {message}")]
    ExtractFailed { status: Option<i32>, message: String },
    #[error("I/O error during signing: {0}")]
    Io(#[from] std::io::Error),
}

/// Certificate-keyed signing collaborator.
pub trait Signer {
    /// Wraps `content` in a CMS signature made with `identity`.
    fn sign(&self, content: &[u8], identity: &str) -> Result<Vec<u8>, SigningError>;
    /// Returns the content embedded in a CMS signed message.
    fn extract_content(&self, signed: &[u8]) -> Result<Vec<u8>, SigningError>;
}

/// Signs with the `openssl` command line tool.
#[derive(Debug, Clone)]
pub struct OpenSslSigner {
    program: String,
    certificates_dir: PathBuf,
}

impl OpenSslSigner {
    pub fn new(program: impl Into<String>, certificates_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            certificates_dir: certificates_dir.into(),
        }
    }

    /// Maps an identity to (certificate, private key). An identity is either a path to a
    /// PEM file holding both, or the stem of `<name>.pem` / `<name>.crt` + `<name>.key`
    /// inside the certificates directory.
    pub fn resolve_identity(&self, identity: &str) -> Result<(PathBuf, PathBuf), SigningError> {
        let direct = Path::new(identity);
        if direct.is_file() {
            return Ok((direct.to_path_buf(), direct.to_path_buf()));
        }

        let pem = self.certificates_dir.join(format!("{}.pem", identity));
        if pem.is_file() {
            return Ok((pem.clone(), pem));
        }
        let crt = self.certificates_dir.join(format!("{}.crt", identity));
        let key = self.certificates_dir.join(format!("{}.key", identity));
        if crt.is_file() && key.is_file() {
            return Ok((crt, key));
        }

        Err(SigningError::IdentityLookup {
            identity: identity.to_string(),
            reason: format!(
                "no '{0}.pem' or '{0}.crt'/'{0}.key' in '{1}'",
                identity,
                self.certificates_dir.display()
            ),
        })
    }

    fn run(&self, args: &[&str], input: &Path) -> Result<std::process::Output, SigningError> {
        log::debug!("Running {} {}", self.program, args.join(" "));
        let output = StdCommand::new(&self.program)
            .args(args)
            .arg("-in")
            .arg(dunce::simplified(input))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()?;
        Ok(output)
    }
}

fn write_temp(content: &[u8]) -> Result<NamedTempFile, SigningError> {
    let mut file = NamedTempFile::new()?;
    file.write_all(content)?;
    file.flush()?;
    Ok(file)
}

impl Signer for OpenSslSigner {
    fn sign(&self, content: &[u8], identity: &str) -> Result<Vec<u8>, SigningError> {
        let (certificate, key) = self.resolve_identity(identity)?;
        let input = write_temp(content)?;
        let certificate = certificate.to_string_lossy().into_owned();
        let key = key.to_string_lossy().into_owned();

        let output = self.run(
            &[
                "cms", "-sign", "-nodetach", "-binary", "-outform", "DER", "-signer",
                certificate.as_str(), "-inkey", key.as_str(),
            ],
            input.path(),
        )?;
        if !output.status.success() || output.stdout.is_empty() {
            return Err(SigningError::SigningFailed {
                status: output.status.code(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        log::info!("Signed {} bytes with identity '{}'.", content.len(), identity);
        Ok(output.stdout)
    }

    fn extract_content(&self, signed: &[u8]) -> Result<Vec<u8>, SigningError> {
        let input = write_temp(signed)?;
        let output = self.run(
            &["cms", "-verify", "-noverify", "-inform", "DER", "-binary"],
            input.path(),
        )?;
        if !output.status.success() {
            return Err(SigningError::ExtractFailed {
                status: output.status.code(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

/// Whether `bytes` already is a property list (XML or binary) rather than a CMS envelope.
pub fn is_plain_plist(bytes: &[u8]) -> bool {
    let trimmed = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .and_then(|start| bytes.get(start..))
        .unwrap_or_default();
    trimmed.starts_with(b"<?xml") || trimmed.starts_with(b"<plist") || trimmed.starts_with(b"bplist")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_identity_lookup_in_certificates_dir() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("acme.pem"), "PEM").unwrap();
        fs::write(dir.path().join("split.crt"), "CRT").unwrap();
        fs::write(dir.path().join("split.key"), "KEY").unwrap();
        let signer = OpenSslSigner::new("openssl", dir.path());

        let (cert, key) = signer.resolve_identity("acme").unwrap();
        assert_eq!(cert, key);
        let (cert, key) = signer.resolve_identity("split").unwrap();
        assert!(cert.ends_with("split.crt") && key.ends_with("split.key"));
        assert!(matches!(
            signer.resolve_identity("nobody"),
            Err(SigningError::IdentityLookup { .. })
        ));
    }

    #[test]
    fn test_plain_plist_detection() {
        assert!(is_plain_plist(b"  <?xml version=\"1.0\"?><plist/>"));
        assert!(is_plain_plist(b"bplist00..."));
        assert!(!is_plain_plist(&[0x30, 0x82, 0x01, 0x00]));
        assert!(!is_plain_plist(b""));
    }
}
