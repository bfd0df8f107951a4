//! Matching a reference hostname against the names a leaf certificate
//! presents.

use std::net::IpAddr;

use crate::certificate::Certificate;

fn normalize(name: &str) -> String {
    name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase()
}

/// Whether the DNS name pattern from a certificate matches `host`.
/// Both are compared case-insensitively after dropping one trailing dot.
///
/// A wildcard is honoured only when it is the entire left-most label and
/// at least two labels follow it. It then stands for exactly one
/// non-empty label.
pub(crate) fn dns_matches(pattern: &str, host: &str) -> bool {
    let pattern = normalize(pattern);
    let host = normalize(host);
    if pattern.is_empty() || host.is_empty() || host.contains('*') {
        return false;
    }
    let Some(suffix) = pattern.strip_prefix("*.") else {
        return !pattern.contains('*') && pattern == host;
    };
    if suffix.contains('*') || suffix.split('.').filter(|l| !l.is_empty()).count() < 2 {
        return false;
    }
    match host.split_once('.') {
        Some((first, rest)) => !first.is_empty() && rest == suffix,
        None => false,
    }
}

fn ip_reference(host: &str) -> Option<IpAddr> {
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    host.parse().ok()
}

/// Whether `cert` is valid for `hostname`.
///
/// IP address references are compared with iPAddress SAN entries only.
/// DNS names are compared with dNSName SAN entries, or with the subject
/// common names when the certificate has no dNSName entries.
pub(crate) fn matches(cert: &Certificate, hostname: &str) -> bool {
    if let Some(ip) = ip_reference(hostname) {
        return cert.ip_addrs().contains(&ip);
    }
    if cert.dns_names().is_empty() {
        return cert
            .common_names()
            .iter()
            .any(|cn| dns_matches(cn, hostname));
    }
    cert.dns_names().iter().any(|name| dns_matches(name, hostname))
}
