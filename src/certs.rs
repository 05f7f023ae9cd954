//! Certificate/key parsing boundary and leaf selection
//!
//! Parsing PEM/DER material is an external capability with a pure-function
//! contract ([`CertParser`]); this module owns what the orchestration layer
//! actually decides with the parsed data: which certificate of a multi-cert
//! file gets stored, and how caller-supplied file URLs become paths.

use crate::error::{Error, Result};
use std::path::PathBuf;
use zeroize::Zeroizing;

/// A certificate as reported by the parsing capability: enough identity to
/// select a leaf, plus the raw DER to store.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedCertificate {
    /// Subject distinguished name, in a form comparable with `issuer`.
    pub subject: String,

    /// Issuer distinguished name.
    pub issuer: String,

    /// DER encoding.
    pub der: Vec<u8>,
}

/// A private key as reported by the parsing capability. The DER encoding is
/// zeroized on drop.
#[derive(Clone, Debug)]
pub struct ParsedKey {
    /// DER encoding (PKCS#8).
    pub der: Zeroizing<Vec<u8>>,
}

impl ParsedKey {
    /// Wrap DER-encoded key material.
    pub fn new(der: Vec<u8>) -> Self {
        Self {
            der: Zeroizing::new(der),
        }
    }
}

/// Marker for input the parsing capability could not understand. Both
/// parse entry points failing for the same input maps to
/// [`Error::ParseFailed`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ParseRejected;

/// External certificate/key parsing capability.
pub trait CertParser {
    /// Parse one or more certificates out of PEM or DER input.
    fn parse_certificates(
        &self,
        data: &[u8],
        password: Option<&str>,
    ) -> core::result::Result<Vec<ParsedCertificate>, ParseRejected>;

    /// Parse a private key out of PEM or DER input.
    fn parse_private_key(
        &self,
        data: &[u8],
        password: Option<&str>,
    ) -> core::result::Result<ParsedKey, ParseRejected>;
}

/// Select the certificate to store from a parsed set.
///
/// A single certificate is used directly. Otherwise the first certificate
/// that no other certificate in the set names as its issuer is chosen, so
/// a file carrying a chain imports its leaf. A certificate's own
/// self-signature does not disqualify it.
pub fn select_leaf(certs: &[ParsedCertificate]) -> Option<&ParsedCertificate> {
    if certs.len() == 1 {
        return certs.first();
    }

    certs.iter().find(|cert| {
        !certs
            .iter()
            .any(|other| other.der != cert.der && other.issuer == cert.subject)
    })
}

/// Turn a caller-supplied `file://` URL into a filesystem path.
///
/// Windows URLs carry a leading slash before the drive letter which must be
/// stripped; elsewhere the path is used as-is.
pub fn file_path_from_url(url: &str) -> Result<PathBuf> {
    let path = match url.strip_prefix("file://") {
        Some(rest) => rest,
        None => url,
    };

    #[cfg(windows)]
    let path = path.strip_prefix('/').unwrap_or(path);

    if path.is_empty() {
        return Err(Error::InvalidInput { field: "file_url" });
    }

    Ok(PathBuf::from(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(subject: &str, issuer: &str, der: &[u8]) -> ParsedCertificate {
        ParsedCertificate {
            subject: subject.into(),
            issuer: issuer.into(),
            der: der.to_vec(),
        }
    }

    #[test]
    fn single_certificate_is_used_directly() {
        let certs = vec![cert("CN=leaf", "CN=ca", &[1])];
        assert_eq!(select_leaf(&certs).unwrap().subject, "CN=leaf");
    }

    #[test]
    fn chain_selects_the_leaf() {
        let certs = vec![
            cert("CN=root", "CN=root", &[1]),
            cert("CN=leaf", "CN=root", &[2]),
        ];
        assert_eq!(select_leaf(&certs).unwrap().subject, "CN=leaf");

        // order independent
        let reversed = vec![
            cert("CN=leaf", "CN=root", &[2]),
            cert("CN=root", "CN=root", &[1]),
        ];
        assert_eq!(select_leaf(&reversed).unwrap().subject, "CN=leaf");
    }

    #[test]
    fn three_level_chain_selects_the_leaf() {
        let certs = vec![
            cert("CN=root", "CN=root", &[1]),
            cert("CN=intermediate", "CN=root", &[2]),
            cert("CN=leaf", "CN=intermediate", &[3]),
        ];
        assert_eq!(select_leaf(&certs).unwrap().subject, "CN=leaf");
    }

    #[test]
    fn empty_set_selects_nothing() {
        assert!(select_leaf(&[]).is_none());
    }

    #[test]
    fn file_urls_are_normalized() {
        assert_eq!(
            file_path_from_url("file:///home/user/cert.pem").unwrap(),
            PathBuf::from("/home/user/cert.pem")
        );
        assert_eq!(
            file_path_from_url("/plain/path.pem").unwrap(),
            PathBuf::from("/plain/path.pem")
        );
        assert!(file_path_from_url("file://").is_err());
    }
}
