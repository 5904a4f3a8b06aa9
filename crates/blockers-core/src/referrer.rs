//! Referrer override decision.
//!
//! Pure functions: no shared state, no locks.

use url::Url;

use crate::types::{origin_url, Referrer, ReferrerPolicy};
use crate::url::{is_host_or_subdomain, is_same_site};

/// First-party origins whose subresources keep the default referrer.
const REFERRER_EXCEPTIONS: &[(&str, &[&str])] = &[
    ("https://www.facebook.com/", &["https://*.fbcdn.net/*"]),
    ("https://www.twitch.tv/", &["https://*.ttvnw.net/*"]),
    ("https://www.reddit.com/", &["https://www.redditmedia.com/*"]),
    ("https://www.redditmedia.com/", &["https://cdn.embedly.com/*"]),
    ("https://cdn.embedly.com/", &["https://imgur.com/*"]),
];

/// Match `url` against a `scheme://host/path` pattern. `*.` in front of the
/// host matches the domain and all its subdomains; a trailing `*` in the
/// path is a prefix match.
fn url_pattern_matches(pattern: &str, url: &Url) -> bool {
    let Some((scheme, rest)) = pattern.split_once("://") else {
        return false;
    };
    if scheme != "*" && scheme != url.scheme() {
        return false;
    }

    let (host_pattern, path_pattern) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/*"),
    };
    let host = url.host_str().unwrap_or_default();
    let host_ok = match host_pattern.strip_prefix("*.") {
        Some(domain) => is_host_or_subdomain(host, domain),
        None => host_pattern == "*" || host == host_pattern,
    };

    let path_ok = match path_pattern.strip_suffix('*') {
        Some(prefix) => url.path().starts_with(prefix),
        None => url.path() == path_pattern,
    };

    host_ok && path_ok
}

/// Is `subresource_url` allowed to receive the full referrer when loaded
/// from `first_party_origin`?
pub fn is_whitelisted_referrer(first_party_origin: &Url, subresource_url: &Url) -> bool {
    let Some(origin) = origin_url(first_party_origin) else {
        return false;
    };
    REFERRER_EXCEPTIONS
        .iter()
        .filter(|(first_party, _)| origin.as_str() == *first_party)
        .flat_map(|(_, patterns)| patterns.iter())
        .any(|pattern| url_pattern_matches(pattern, subresource_url))
}

/// Decide whether the referrer of a request to `target_url` should be
/// replaced by the origin of `new_referrer_url`.
///
/// Returns true and writes the sanitized replacement into `output` when the
/// override applies; otherwise returns false and leaves `output` alone.
#[allow(clippy::too_many_arguments)]
pub fn should_set_referrer(
    allow_referrers: bool,
    shields_up: bool,
    original_referrer: Option<&Url>,
    tab_origin: &Url,
    target_url: &Url,
    new_referrer_url: &Url,
    policy: ReferrerPolicy,
    output: &mut Referrer,
) -> bool {
    if !allow_referrers || !shields_up {
        return false;
    }
    if original_referrer.is_none() {
        return false;
    }

    let tab_host = tab_origin.host_str().unwrap_or_default();
    let target_host = target_url.host_str().unwrap_or_default();
    if !tab_host.is_empty() && is_same_site(tab_host, target_host) {
        return false;
    }
    if is_whitelisted_referrer(tab_origin, target_url) {
        return false;
    }

    *output = Referrer::sanitize_for_request(
        target_url,
        &Referrer::new(origin_url(new_referrer_url), policy),
    );
    true
}
