//! The request-time engine.
//!
//! [`BlockersWorker`] owns every rule family and answers the per-request
//! questions: block for tracking protection, block as an ad, rewrite to
//! HTTPS, override the referrer. Queries never fail: anything that goes
//! wrong is logged and answered with "do not block / do not rewrite".

use std::sync::{Mutex, RwLock};

use log::{debug, info, warn};
use url::Url;

use crate::cache::RecentlyUsedCache;
use crate::config::EngineConfig;
use crate::error::{BlockersError, Result, RuleFamily};
use crate::httpse::{HttpsRewriter, HttpsRuleStore, SharedRuleStore, SqliteRuleStore};
use crate::init::LazyFamily;
use crate::loader::RuleSetLoader;
use crate::matcher::{
    any_blocks, FilterListMatcher, MatchRequest, Matcher, MatcherFactory, ParsedRequest,
    TrackerMatcher,
};
use crate::referrer;
use crate::types::{Referrer, ReferrerPolicy, RequestType};
use crate::url::{is_host_or_subdomain, is_third_party, normalize_host};

/// Hosts never blocked by tracking protection.
const DEFAULT_TP_ALLOW_LIST: &[&str] = &[
    "connect.facebook.net",
    "connect.facebook.com",
    "staticxx.facebook.com",
    "www.facebook.com",
    "scontent.xx.fbcdn.net",
    "pbs.twimg.com",
    "platform.twitter.com",
    "syndication.twitter.com",
    "cdn.syndication.twimg.com",
];

/// Per base host, the hosts tracking-protection data attributes to the
/// same entity.
#[derive(Debug)]
struct ThirdPartyHostIndex {
    hosts: RwLock<RecentlyUsedCache<String, Vec<String>>>,
}

impl ThirdPartyHostIndex {
    fn new(capacity: usize) -> Self {
        Self {
            hosts: RwLock::new(RecentlyUsedCache::new(capacity)),
        }
    }

    /// Is `host` one of `base_host`'s same-entity hosts (or below one)?
    fn contains(&self, base_host: &str, host: &str, tp: &TrackerMatcher) -> bool {
        let matches = |hosts: &[String]| hosts.iter().any(|h| is_host_or_subdomain(host, h));

        {
            let index = self.hosts.read().unwrap_or_else(|e| e.into_inner());
            if let Some(hosts) = index.peek(base_host) {
                return matches(hosts.as_slice());
            }
        }

        let hosts = tp.first_party_hosts(base_host);
        let found = matches(hosts.as_slice());
        self.hosts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(base_host.to_string(), hosts);
        found
    }

    fn len(&self) -> usize {
        self.hosts.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct BlockersWorker {
    config: EngineConfig,
    loader: RuleSetLoader,
    ad_block_factory: MatcherFactory,

    tracking_protection: LazyFamily<TrackerMatcher>,
    ad_block: LazyFamily<Box<dyn Matcher>>,
    ad_block_regional: LazyFamily<Vec<Box<dyn Matcher>>>,
    httpse: LazyFamily<SharedRuleStore>,

    https: HttpsRewriter,
    third_party_hosts: ThirdPartyHostIndex,
    tp_allow_list: RwLock<Vec<String>>,
}

impl std::fmt::Debug for BlockersWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockersWorker")
            .field("data_dir", &self.config.data_dir)
            .field("tp", &self.is_tp_initialized())
            .field("ad_block", &self.is_ad_blocker_initialized())
            .field("ad_block_regional", &self.is_ad_blocker_regional_initialized())
            .field("httpse", &self.is_httpse_initialized())
            .finish()
    }
}

impl BlockersWorker {
    /// Create a worker using the built-in filter-list backend for ad blocking.
    /// Nothing is loaded until the first query or `init_*` call.
    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::with_ad_block_factory(config, FilterListMatcher::boxed_from_buffer)
    }

    /// Create a worker with a custom ad-block backend, used for the default
    /// list and every regional list.
    pub fn with_ad_block_factory(config: EngineConfig, factory: MatcherFactory) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            loader: RuleSetLoader::new(&config.data_dir),
            ad_block_factory: factory,
            tracking_protection: LazyFamily::new(RuleFamily::TrackingProtection),
            ad_block: LazyFamily::new(RuleFamily::AdBlock),
            ad_block_regional: LazyFamily::new(RuleFamily::AdBlockRegional),
            httpse: LazyFamily::new(RuleFamily::Httpse),
            https: HttpsRewriter::new(&config),
            third_party_hosts: ThirdPartyHostIndex::new(config.third_party_cache_capacity),
            tp_allow_list: RwLock::new(DEFAULT_TP_ALLOW_LIST.iter().map(|h| h.to_string()).collect()),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Loading
    // =========================================================================

    fn load_tp(&self) -> Result<TrackerMatcher> {
        let buffer = self
            .loader
            .load(RuleFamily::TrackingProtection, &self.config.tracking_protection)?;
        let matcher = TrackerMatcher::from_buffer(&buffer)?;
        info!("Tracking protection initialized with {} trackers", matcher.rule_count());
        Ok(matcher)
    }

    fn load_ad_block(&self) -> Result<Box<dyn Matcher>> {
        let buffer = self.loader.load(RuleFamily::AdBlock, &self.config.ad_block)?;
        let matcher = (self.ad_block_factory)(&buffer)?;
        info!("Ad block initialized with {} rules", matcher.rule_count());
        Ok(matcher)
    }

    fn load_ad_block_regional(&self) -> Result<Vec<Box<dyn Matcher>>> {
        let selected = self.config.selected_regional_lists();
        if selected.is_empty() {
            return Err(BlockersError::NoRegionalList(self.config.locale.clone()));
        }

        let mut matchers = Vec::with_capacity(selected.len());
        for list in &selected {
            let loaded = self
                .loader
                .load(RuleFamily::AdBlockRegional, &list.file)
                .and_then(|buffer| (self.ad_block_factory)(&buffer));
            match loaded {
                Ok(matcher) => {
                    info!("Regional list '{}' loaded with {} rules", list.title, matcher.rule_count());
                    matchers.push(matcher);
                }
                Err(e) => warn!("Skipping regional list '{}': {}", list.title, e),
            }
        }

        if matchers.is_empty() {
            return Err(BlockersError::invalid(
                RuleFamily::AdBlockRegional,
                format!("none of the {} selected lists could be loaded", selected.len()),
            ));
        }
        Ok(matchers)
    }

    fn load_httpse(&self) -> Result<SharedRuleStore> {
        let path = self.loader.resolve(&self.config.httpse)?;
        let store = SqliteRuleStore::open_read_only(&path)?;
        info!("HTTPS rules opened from {}", path.display());
        Ok(Mutex::new(Box::new(store)))
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    pub fn init_tp(&self) -> bool {
        self.tracking_protection.init(|| self.load_tp())
    }

    pub fn init_ad_block(&self) -> bool {
        self.ad_block.init(|| self.load_ad_block())
    }

    pub fn init_ad_block_regional(&self) -> bool {
        self.ad_block_regional.init(|| self.load_ad_block_regional())
    }

    pub fn init_httpse(&self) -> bool {
        self.httpse.init(|| self.load_httpse())
    }

    /// Initialize HTTPS rewriting from an already opened rule store.
    pub fn init_httpse_with(&self, store: Box<dyn HttpsRuleStore>) -> bool {
        self.httpse.init(|| Ok(Mutex::new(store)))
    }

    pub fn is_tp_initialized(&self) -> bool {
        self.tracking_protection.is_initialized()
    }

    pub fn is_ad_blocker_initialized(&self) -> bool {
        self.ad_block.is_initialized()
    }

    pub fn is_ad_blocker_regional_initialized(&self) -> bool {
        self.ad_block_regional.is_initialized()
    }

    pub fn is_httpse_initialized(&self) -> bool {
        self.httpse.is_initialized()
    }

    // =========================================================================
    // Tracking protection
    // =========================================================================

    /// Should a request for `host`, made from a page on `base_host`, be
    /// blocked as a third-party tracker?
    pub fn should_tp_block_url(&self, base_host: &str, host: &str) -> bool {
        let Some(tp) = self.tracking_protection.get_or_attempt(|| self.load_tp()) else {
            return false;
        };

        let base_host = normalize_host(base_host);
        let host = normalize_host(host);
        if base_host.is_empty() || host.is_empty() || !is_third_party(&base_host, &host) {
            return false;
        }

        if !tp.test(&MatchRequest::for_hosts(&base_host, &host)).is_block() {
            return false;
        }
        if self.third_party_hosts.contains(&base_host, &host, tp) {
            debug!("{} belongs to the same entity as {}, not blocking", host, base_host);
            return false;
        }
        if self.is_tp_allowed(&host) {
            debug!("{} is allow-listed for tracking protection", host);
            return false;
        }

        debug!("Tracking protection blocks {} on {}", host, base_host);
        true
    }

    /// Exempt `host` from tracking-protection blocking.
    pub fn add_tp_allow_host(&self, host: &str) {
        let host = normalize_host(host);
        if host.is_empty() {
            return;
        }
        let mut allow_list = self.tp_allow_list.write().unwrap_or_else(|e| e.into_inner());
        if !allow_list.contains(&host) {
            allow_list.push(host);
        }
    }

    fn is_tp_allowed(&self, host: &str) -> bool {
        self.tp_allow_list
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|allowed| allowed == host)
    }

    // =========================================================================
    // Ad block
    // =========================================================================

    /// Should `url`, loaded as `resource_type` by the page at `tab_url`, be
    /// blocked as an ad? Regional lists are consulted only when
    /// `regional_enabled` is set.
    pub fn should_ad_block_url(
        &self,
        tab_url: &str,
        url: &str,
        resource_type: RequestType,
        regional_enabled: bool,
    ) -> bool {
        let Some(parsed) = ParsedRequest::new(url, tab_url, resource_type) else {
            debug!("Not ad blocking unparseable URL '{}'", url);
            return false;
        };
        let request = parsed.as_request();

        if let Some(matcher) = self.ad_block.get_or_attempt(|| self.load_ad_block()) {
            if matcher.test(&request).is_block() {
                debug!("Ad block blocks {}", url);
                return true;
            }
        }

        if regional_enabled {
            if let Some(matchers) = self
                .ad_block_regional
                .get_or_attempt(|| self.load_ad_block_regional())
            {
                if any_blocks(matchers, &request) {
                    debug!("Regional ad block blocks {}", url);
                    return true;
                }
            }
        }

        false
    }

    // =========================================================================
    // HTTPS rewriting
    // =========================================================================

    /// HTTPS form of `url` if a rule applies, consulting the rule store on a
    /// cache miss. May block on disk I/O.
    pub fn get_https_url(&self, url: &str, request_id: u64) -> Option<String> {
        let store = self.httpse.get_or_attempt(|| self.load_httpse())?;
        self.https.rewrite(url, request_id, store)
    }

    /// Like [`get_https_url`](Self::get_https_url) but answers from the
    /// rewrite cache only; never touches the rule store.
    pub fn get_https_url_from_cache_only(&self, url: &str, request_id: u64) -> Option<String> {
        if !self.httpse.is_initialized() {
            return None;
        }
        self.https.rewrite_from_cache(url, request_id)
    }

    /// HTTPS rewrites performed so far for `request_id`.
    pub fn https_redirects(&self, request_id: u64) -> u32 {
        self.https.redirects().redirects(request_id)
    }

    /// Signal that a request finished so its redirect count can be dropped.
    pub fn forget_request(&self, request_id: u64) {
        self.https.redirects().forget(request_id);
    }

    // =========================================================================
    // Referrer
    // =========================================================================

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
        referrer::should_set_referrer(
            allow_referrers,
            shields_up,
            original_referrer,
            tab_origin,
            target_url,
            new_referrer_url,
            policy,
            output,
        )
    }

    pub fn is_whitelisted_referrer(first_party_origin: &Url, subresource_url: &Url) -> bool {
        referrer::is_whitelisted_referrer(first_party_origin, subresource_url)
    }
}
