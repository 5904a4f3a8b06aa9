//! HTTPS rewrite engine.
//!
//! A lookup goes loop guard -> rewrite cache -> rule store. Rule payloads
//! are JSON arrays of rulesets:
//!
//! ```json
//! [{"e": [{"p": "^http://example\\.com/insecure"}],
//!   "r": [{"f": "^http://example\\.com/", "t": "https://www.example.com/"}, {"d": 1}]}]
//! ```
//!
//! `e` holds exclusion patterns, `r` rewrite rules tried in order. A rule
//! with `d` set is the default rule (`http:` -> `https:`).

mod redirects;
mod store;

pub use redirects::RedirectCounter;
pub use store::{HttpsRuleStore, SqliteRuleStore};

use std::sync::{Mutex, MutexGuard};

use log::{debug, error};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;

use crate::cache::RecentlyUsedCache;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::url::{get_parent_domain, normalize_host};

/// The rule store as shared by request threads.
pub type SharedRuleStore = Mutex<Box<dyn HttpsRuleStore>>;

// =============================================================================
// Rule payloads
// =============================================================================

#[derive(Debug, Deserialize)]
struct RuleSet {
    #[serde(rename = "e", default)]
    exclusions: Vec<Exclusion>,
    #[serde(rename = "r", default)]
    rules: Vec<RewriteRule>,
}

#[derive(Debug, Deserialize)]
struct Exclusion {
    #[serde(rename = "p")]
    pattern: String,
}

#[derive(Debug, Deserialize)]
struct RewriteRule {
    #[serde(rename = "f", default)]
    from: Option<String>,
    #[serde(rename = "t", default)]
    to: Option<String>,
    #[serde(rename = "d", default)]
    default: u32,
}

/// `$1` and legacy `\1` group references.
static GROUP_REF: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\\$](\d+)").unwrap());

fn compile(pattern: &str) -> Option<Regex> {
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            debug!("Skipping invalid HTTPS rule pattern '{}': {}", pattern, e);
            None
        }
    }
}

impl RuleSet {
    fn excludes(&self, url: &str) -> bool {
        self.exclusions
            .iter()
            .filter_map(|ex| compile(&ex.pattern))
            .any(|re| re.is_match(url))
    }
}

impl RewriteRule {
    fn apply(&self, url: &str) -> Option<String> {
        if self.default != 0 {
            return url.strip_prefix("http:").map(|rest| format!("https:{}", rest));
        }
        let re = compile(self.from.as_deref()?)?;
        if !re.is_match(url) {
            return None;
        }
        let template = GROUP_REF.replace_all(self.to.as_deref()?, |caps: &Captures<'_>| {
            format!("${{{}}}", &caps[1])
        });
        Some(re.replace(url, template.as_ref()).into_owned())
    }
}

/// Apply a rule payload to `url`. Returns the first rewrite that yields an
/// `https:` URL.
pub fn apply_https_rule(url: &str, payload: &str) -> Option<String> {
    let rulesets: Vec<RuleSet> = match serde_json::from_str(payload) {
        Ok(rulesets) => rulesets,
        Err(e) => {
            debug!("Malformed HTTPS rule payload: {}", e);
            return None;
        }
    };

    rulesets
        .iter()
        .filter(|ruleset| !ruleset.excludes(url))
        .flat_map(|ruleset| ruleset.rules.iter())
        .filter_map(|rule| rule.apply(url))
        .find(|rewritten| rewritten.starts_with("https:"))
}

/// Store keys to try for `host`, most specific first: the host itself,
/// `*.parent` for every parent with at least two labels, then the host with
/// its last label wildcarded.
pub fn candidate_keys(host: &str) -> Vec<String> {
    let mut keys = vec![host.to_string()];

    let mut parent = get_parent_domain(host);
    while let Some(p) = parent {
        if !p.contains('.') {
            break;
        }
        keys.push(format!("*.{}", p));
        parent = get_parent_domain(p);
    }

    if let Some(pos) = host.rfind('.') {
        keys.push(format!("{}.*", &host[..pos]));
    }
    keys
}

/// Host of a plain-`http` URL; `None` for anything else.
fn http_host(url: &str) -> Option<String> {
    let parsed = ::url::Url::parse(url).ok()?;
    if parsed.scheme() != "http" {
        return None;
    }
    parsed.host_str().map(normalize_host)
}

// =============================================================================
// Rewriter
// =============================================================================

/// Rewrite cache plus loop guard, independent of where rules come from.
#[derive(Debug)]
pub struct HttpsRewriter {
    cache: Mutex<RecentlyUsedCache<String, Option<String>>>,
    redirects: RedirectCounter,
    max_redirects: u32,
}

impl HttpsRewriter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            cache: Mutex::new(RecentlyUsedCache::new(config.https_cache_capacity)),
            redirects: RedirectCounter::new(config.redirect_table_capacity),
            max_redirects: config.max_redirects,
        }
    }

    pub fn redirects(&self) -> &RedirectCounter {
        &self.redirects
    }

    pub fn cached_entries(&self) -> usize {
        self.cache().len()
    }

    fn cache(&self) -> MutexGuard<'_, RecentlyUsedCache<String, Option<String>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Full lookup: consults the store on a cache miss and caches the outcome.
    pub fn rewrite(&self, url: &str, request_id: u64, store: &SharedRuleStore) -> Option<String> {
        self.lookup(url, request_id, Some(store))
    }

    /// Cache-only lookup: a cache miss is "no rewrite".
    pub fn rewrite_from_cache(&self, url: &str, request_id: u64) -> Option<String> {
        self.lookup(url, request_id, None)
    }

    fn lookup(&self, url: &str, request_id: u64, store: Option<&SharedRuleStore>) -> Option<String> {
        let host = http_host(url)?;

        if self.redirects.redirects(request_id) >= self.max_redirects {
            debug!("Redirect limit reached for request {}, not rewriting {}", request_id, url);
            return None;
        }

        let cached = self.cache().get(url).cloned();
        match cached {
            Some(Some(target)) => return self.count(request_id, target),
            Some(None) => return None,
            None => {}
        }

        let rewritten = match query_store(store?, &host, url) {
            Ok(rewritten) => rewritten,
            Err(_) => {
                debug!("Not caching the outcome for {} after a store error", url);
                return None;
            }
        };
        self.cache().insert(url.to_string(), rewritten.clone());
        self.count(request_id, rewritten?)
    }

    fn count(&self, request_id: u64, target: String) -> Option<String> {
        if self.redirects.record_if_below(request_id, self.max_redirects) {
            debug!("Rewriting request {} to {}", request_id, target);
            Some(target)
        } else {
            None
        }
    }
}

/// First rewrite found under the candidate keys. A failed key lookup does
/// not stop the walk, but without a rewrite the walk reports the failure.
fn query_store(store: &SharedRuleStore, host: &str, url: &str) -> Result<Option<String>> {
    let store = store.lock().unwrap_or_else(|e| e.into_inner());
    let mut failure = None;
    for key in candidate_keys(host) {
        match store.get(&key) {
            Ok(Some(payload)) => {
                if let Some(rewritten) = apply_https_rule(url, &payload) {
                    return Ok(Some(rewritten));
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!("HTTPS rule lookup for '{}' failed: {}", key, e);
                failure = Some(e);
            }
        }
    }
    match failure {
        Some(e) => Err(e),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BlockersError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const DEFAULT_RULE: &str = r#"[{"r":[{"d":1}]}]"#;

    fn store_with(entries: &[(&str, &str)]) -> SharedRuleStore {
        let store = SqliteRuleStore::in_memory().unwrap();
        for (host, rules) in entries {
            store.insert(host, rules).unwrap();
        }
        Mutex::new(Box::new(store))
    }

    fn rewriter(max_redirects: u32) -> HttpsRewriter {
        let config = EngineConfig {
            max_redirects,
            ..EngineConfig::default()
        };
        HttpsRewriter::new(&config)
    }

    /// Counts lookups. The first `failing` lookups return an error, the
    /// rest return `rule`.
    struct CountingStore {
        lookups: Arc<AtomicUsize>,
        failing: AtomicUsize,
        rule: Option<&'static str>,
    }

    impl HttpsRuleStore for CountingStore {
        fn get(&self, _key: &str) -> Result<Option<String>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let fail = self
                .failing
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(BlockersError::Store(rusqlite::Error::InvalidQuery));
            }
            Ok(self.rule.map(str::to_string))
        }
    }

    fn counting_store(rule: Option<&'static str>, failing: usize) -> (SharedRuleStore, Arc<AtomicUsize>) {
        let lookups = Arc::new(AtomicUsize::new(0));
        let store: SharedRuleStore = Mutex::new(Box::new(CountingStore {
            lookups: Arc::clone(&lookups),
            failing: AtomicUsize::new(failing),
            rule,
        }));
        (store, lookups)
    }

    #[test]
    fn test_candidate_keys() {
        assert_eq!(
            candidate_keys("a.b.example.com"),
            vec!["a.b.example.com", "*.b.example.com", "*.example.com", "a.b.example.*"]
        );
        assert_eq!(candidate_keys("example.com"), vec!["example.com", "example.*"]);
    }

    #[test]
    fn test_default_rule() {
        assert_eq!(
            apply_https_rule("http://example.com/a?b=1", DEFAULT_RULE).as_deref(),
            Some("https://example.com/a?b=1")
        );
    }

    #[test]
    fn test_group_references() {
        let payload = r#"[{"r":[{"f":"^http://(www\\.)?example\\.com/(.*)","t":"https://www.example.com/$2"}]}]"#;
        assert_eq!(
            apply_https_rule("http://example.com/page", payload).as_deref(),
            Some("https://www.example.com/page")
        );

        let legacy = r#"[{"r":[{"f":"^http://([^/]+)/","t":"https://\\1/"}]}]"#;
        assert_eq!(
            apply_https_rule("http://a.example.org/x", legacy).as_deref(),
            Some("https://a.example.org/x")
        );
    }

    #[test]
    fn test_exclusions_skip_ruleset() {
        let payload = r#"[
            {"e":[{"p":"^http://example\\.com/plain"}],"r":[{"d":1}]},
            {"r":[{"f":"^http://example\\.com/plain","t":"https://secure.example.com/plain"}]}
        ]"#;
        assert_eq!(
            apply_https_rule("http://example.com/plain", payload).as_deref(),
            Some("https://secure.example.com/plain")
        );
        assert_eq!(
            apply_https_rule("http://example.com/other", payload).as_deref(),
            Some("https://example.com/other")
        );
    }

    #[test]
    fn test_non_https_result_is_discarded() {
        let payload = r#"[{"r":[{"f":"^http://a\\.com/","t":"http://b.com/"},{"f":"[","t":"x"}]}]"#;
        assert_eq!(apply_https_rule("http://a.com/", payload), None);
        assert_eq!(apply_https_rule("http://a.com/", "not json"), None);
    }

    #[test]
    fn test_rewrite_via_wildcard_key() {
        let store = store_with(&[("*.example.com", DEFAULT_RULE)]);
        let rw = rewriter(5);
        assert_eq!(
            rw.rewrite("http://www.example.com/", 1, &store).as_deref(),
            Some("https://www.example.com/")
        );
        assert_eq!(rw.rewrite("http://other.org/", 2, &store), None);
        assert_eq!(rw.cached_entries(), 2);
    }

    #[test]
    fn test_non_http_urls_are_ignored() {
        let store = store_with(&[("example.com", DEFAULT_RULE)]);
        let rw = rewriter(5);
        assert_eq!(rw.rewrite("https://example.com/", 1, &store), None);
        assert_eq!(rw.rewrite("ftp://example.com/", 1, &store), None);
        assert_eq!(rw.rewrite("not a url", 1, &store), None);
        assert_eq!(rw.cached_entries(), 0);
    }

    #[test]
    fn test_loop_guard() {
        let store = store_with(&[("example.com", DEFAULT_RULE)]);
        let rw = rewriter(3);
        let url = "http://example.com/";
        for _ in 0..3 {
            assert!(rw.rewrite(url, 9, &store).is_some());
        }
        assert_eq!(rw.rewrite(url, 9, &store), None);
        assert_eq!(rw.rewrite(url, 9, &store), None);
        assert_eq!(rw.redirects().redirects(9), 3);

        // other requests are unaffected
        assert!(rw.rewrite(url, 10, &store).is_some());
        rw.redirects().forget(9);
        assert!(rw.rewrite(url, 9, &store).is_some());
    }

    #[test]
    fn test_cache_only_lookup() {
        let store = store_with(&[("example.com", DEFAULT_RULE)]);
        let rw = rewriter(5);
        let url = "http://example.com/";
        assert_eq!(rw.rewrite_from_cache(url, 1), None);
        assert!(rw.rewrite(url, 1, &store).is_some());
        assert_eq!(rw.rewrite_from_cache(url, 2).as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn test_hits_are_cached() {
        let (store, lookups) = counting_store(Some(DEFAULT_RULE), 0);
        let rw = rewriter(100);
        assert!(rw.rewrite("http://a.com/", 1, &store).is_some());
        assert!(rw.rewrite("http://a.com/", 2, &store).is_some());
        assert_eq!(lookups.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_misses_are_cached() {
        let (store, lookups) = counting_store(None, 0);
        let rw = rewriter(100);
        assert_eq!(rw.rewrite("http://www.a.com/", 1, &store), None);
        // one lookup per candidate key
        assert_eq!(lookups.load(Ordering::SeqCst), 3);
        assert_eq!(rw.cached_entries(), 1);

        assert_eq!(rw.rewrite("http://www.a.com/", 2, &store), None);
        assert_eq!(rw.rewrite_from_cache("http://www.a.com/", 3), None);
        assert_eq!(lookups.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_store_errors_are_not_cached() {
        let (store, lookups) = counting_store(Some(DEFAULT_RULE), 3);
        let rw = rewriter(5);
        assert_eq!(rw.rewrite("http://www.a.com/", 1, &store), None);
        assert_eq!(lookups.load(Ordering::SeqCst), 3);
        assert_eq!(rw.cached_entries(), 0);
        assert_eq!(rw.redirects().redirects(1), 0);

        // the store recovers and the next lookup upgrades
        assert_eq!(
            rw.rewrite("http://www.a.com/", 1, &store).as_deref(),
            Some("https://www.a.com/")
        );
        assert_eq!(lookups.load(Ordering::SeqCst), 4);
        assert_eq!(rw.cached_entries(), 1);
    }

    #[test]
    fn test_failed_key_does_not_hide_later_rule() {
        let (store, lookups) = counting_store(Some(DEFAULT_RULE), 1);
        let rw = rewriter(5);
        assert_eq!(
            rw.rewrite("http://www.a.com/", 1, &store).as_deref(),
            Some("https://www.a.com/")
        );
        assert_eq!(lookups.load(Ordering::SeqCst), 2);
        assert_eq!(rw.cached_entries(), 1);
    }
}
