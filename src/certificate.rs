//! Parsed X.509 certificates.
//!
//! A [`Certificate`] keeps the original DER encoding together with the
//! handful of decoded fields that trust-anchor management and chain
//! verification need. Decoding happens once, at construction, and the
//! result is immutable.

use rustls_pki_types::CertificateDer;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::error::X509Error;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

type X509ParserError = x509_parser::nom::Err<X509Error>;

/// Error returned when bytes cannot be decoded as a single certificate.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The DER structure is not a valid X.509 certificate.
    #[error("{0}")]
    X509(#[from] X509ParserError),
    /// A certificate extension could not be decoded.
    #[error("{0}")]
    Extension(#[from] X509Error),
    /// Bytes remain after the certificate.
    #[error("{0} trailing bytes after certificate")]
    TrailingData(usize),
}

/// An immutable, parsed X.509 certificate.
#[derive(Clone)]
pub struct Certificate {
    der: CertificateDer<'static>,
    fields: Fields,
}

#[derive(Clone)]
struct Fields {
    subject: Vec<u8>,
    subject_display: String,
    issuer: Vec<u8>,
    issuer_display: String,
    serial: Vec<u8>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    spki: Vec<u8>,
    is_ca: bool,
    path_len_constraint: Option<u32>,
    dns_names: Vec<String>,
    ip_addrs: Vec<IpAddr>,
    common_names: Vec<String>,
}

fn ip_from_san(raw: &[u8]) -> Option<IpAddr> {
    match raw.len() {
        4 => <[u8; 4]>::try_from(raw).ok().map(|b| Ipv4Addr::from(b).into()),
        16 => <[u8; 16]>::try_from(raw).ok().map(|b| Ipv6Addr::from(b).into()),
        _ => None,
    }
}

/// Strips the sign padding DER adds to positive serial numbers so that
/// serials compare equal regardless of how they were obtained.
pub(crate) fn normalize_serial(raw: &[u8]) -> &[u8] {
    let first = raw.iter().position(|b| *b != 0).unwrap_or(raw.len());
    &raw[first..]
}

impl Fields {
    fn decode(der: &[u8]) -> Result<Self, ParseError> {
        let (rest, cert) = X509Certificate::from_der(der)?;
        if !rest.is_empty() {
            return Err(ParseError::TrailingData(rest.len()));
        }
        let (is_ca, path_len_constraint) = cert
            .basic_constraints()?
            .map(|bc| (bc.value.ca, bc.value.path_len_constraint))
            .unwrap_or((false, None));
        let mut dns_names = Vec::new();
        let mut ip_addrs = Vec::new();
        if let Some(san) = cert.subject_alternative_name()? {
            for name in &san.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push((*dns).to_owned()),
                    GeneralName::IPAddress(raw) => ip_addrs.extend(ip_from_san(raw)),
                    _ => (),
                }
            }
        }
        let common_names = cert
            .subject()
            .iter_common_name()
            .filter_map(|cn| cn.as_str().ok())
            .map(str::to_owned)
            .collect();
        let validity = cert.validity();
        Ok(Self {
            subject: cert.subject().as_raw().to_vec(),
            subject_display: cert.subject().to_string(),
            issuer: cert.issuer().as_raw().to_vec(),
            issuer_display: cert.issuer().to_string(),
            serial: normalize_serial(cert.raw_serial()).to_vec(),
            not_before: validity.not_before.to_datetime(),
            not_after: validity.not_after.to_datetime(),
            spki: cert.public_key().raw.to_vec(),
            is_ca,
            path_len_constraint,
            dns_names,
            ip_addrs,
            common_names,
        })
    }
}

impl Certificate {
    /// Parse exactly one DER-encoded certificate.
    pub fn from_der(der: impl Into<CertificateDer<'static>>) -> Result<Self, ParseError> {
        let der = der.into();
        let fields = Fields::decode(der.as_ref())?;
        Ok(Self { der, fields })
    }

    /// The original DER encoding.
    pub fn der(&self) -> &CertificateDer<'static> {
        &self.der
    }

    /// DER encoding of the subject name.
    pub fn subject_raw(&self) -> &[u8] {
        &self.fields.subject
    }

    /// Human readable subject name.
    pub fn subject(&self) -> &str {
        &self.fields.subject_display
    }

    /// DER encoding of the issuer name.
    pub fn issuer_raw(&self) -> &[u8] {
        &self.fields.issuer
    }

    /// Human readable issuer name.
    pub fn issuer(&self) -> &str {
        &self.fields.issuer_display
    }

    /// Serial number, big-endian, without leading zero bytes.
    pub fn serial(&self) -> &[u8] {
        &self.fields.serial
    }

    /// Start of the validity window.
    pub fn not_before(&self) -> OffsetDateTime {
        self.fields.not_before
    }

    /// End of the validity window.
    pub fn not_after(&self) -> OffsetDateTime {
        self.fields.not_after
    }

    /// DER encoding of the SubjectPublicKeyInfo.
    pub fn public_key_info(&self) -> &[u8] {
        &self.fields.spki
    }

    /// Whether BasicConstraints marks this certificate as a CA.
    pub fn is_ca(&self) -> bool {
        self.fields.is_ca
    }

    /// BasicConstraints pathLenConstraint, if any.
    pub fn path_len_constraint(&self) -> Option<u32> {
        self.fields.path_len_constraint
    }

    /// dNSName entries of the subjectAltName extension.
    pub fn dns_names(&self) -> &[String] {
        &self.fields.dns_names
    }

    /// iPAddress entries of the subjectAltName extension.
    pub fn ip_addrs(&self) -> &[IpAddr] {
        &self.fields.ip_addrs
    }

    /// Common names in the subject.
    pub fn common_names(&self) -> &[String] {
        &self.fields.common_names
    }

    /// Whether `now` falls inside the validity window, bounds included.
    pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
        self.fields.not_before <= now && now <= self.fields.not_after
    }

    /// Whether subject and issuer are the same name.
    pub fn is_self_issued(&self) -> bool {
        self.fields.subject == self.fields.issuer
    }

    /// Two certificates with the same identity are interchangeable as
    /// trust anchors even if their encodings differ.
    pub fn same_identity(&self, other: &Certificate) -> bool {
        self.fields.subject == other.fields.subject && self.fields.spki == other.fields.spki
    }

    pub(crate) fn identity(&self) -> (&[u8], &[u8]) {
        (&self.fields.subject, &self.fields.spki)
    }

    /// Whether `issuer` names this certificate's issuer and its key
    /// verifies this certificate's signature.
    pub fn is_signed_by(&self, issuer: &Certificate) -> bool {
        if self.fields.issuer != issuer.fields.subject {
            return false;
        }
        let Ok((_, cert)) = X509Certificate::from_der(self.der.as_ref()) else {
            return false;
        };
        let Ok((_, issuer_cert)) = X509Certificate::from_der(issuer.der.as_ref()) else {
            return false;
        };
        cert.verify_signature(Some(issuer_cert.public_key())).is_ok()
    }

    /// Names presented by this certificate, for diagnostics.
    pub fn presented_names(&self) -> Vec<String> {
        if self.fields.dns_names.is_empty() && self.fields.ip_addrs.is_empty() {
            return self.fields.common_names.clone();
        }
        self.fields
            .dns_names
            .iter()
            .cloned()
            .chain(self.fields.ip_addrs.iter().map(IpAddr::to_string))
            .collect()
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        self.der == other.der
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.fields.subject_display)
            .field("issuer", &self.fields.issuer_display)
            .field(
                "serial",
                &self
                    .fields
                    .serial
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<String>(),
            )
            .field("not_before", &self.fields.not_before)
            .field("not_after", &self.fields.not_after)
            .finish()
    }
}
