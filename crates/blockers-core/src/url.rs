//! Host helpers used on the request hot path.
//!
//! Registrable-domain (eTLD+1) extraction uses the Public Suffix List
//! compiled into the `psl` crate, private section included, so
//! `alice.github.io` and `bob.github.io` are different sites.

use std::net::IpAddr;

// =============================================================================
// Hosts
// =============================================================================

/// Lowercase a host and drop a trailing dot.
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Host of a URL string, normalized. `None` for unparseable or host-less URLs.
pub fn host_of(url: &str) -> Option<String> {
    let parsed = ::url::Url::parse(url).ok()?;
    parsed.host_str().map(normalize_host)
}

/// Get the parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Get the eTLD+1 (registrable domain) for a hostname.
///
/// IP addresses and hosts that are themselves a public suffix are their
/// own site.
pub fn etld1(host: &str) -> String {
    let host = normalize_host(host);
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return host;
    }

    let domain = psl::domain_str(&host).map(str::to_string);
    domain.unwrap_or(host)
}

/// Check if two hosts share the same eTLD+1.
pub fn is_same_site(host1: &str, host2: &str) -> bool {
    etld1(host1) == etld1(host2)
}

/// Check if a request is third-party.
pub fn is_third_party(site_host: &str, req_host: &str) -> bool {
    !is_same_site(site_host, req_host)
}

/// `host` equals `domain` or is a subdomain of it.
pub fn is_host_or_subdomain(host: &str, domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    host == domain
        || (host.len() > domain.len()
            && host.ends_with(domain)
            && host.as_bytes()[host.len() - domain.len() - 1] == b'.')
}
