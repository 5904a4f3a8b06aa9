//! Default ad-block backend: EasyList / Adblock Plus network filters,
//! evaluated by the `adblock` crate's engine.
//!
//! Only network filters take part in decisions. Cosmetic filters in the
//! list are accepted by the parser and never consulted.

use adblock::lists::{FilterSet, ParseOptions};
use adblock::request::Request;
use adblock::Engine;
use log::debug;

use super::{MatchRequest, Matcher};
use crate::error::{BlockersError, Result, RuleFamily};
use crate::types::{Decision, RequestType};

/// Request type names understood by the list engine, most specific first.
const REQUEST_TYPE_NAMES: &[(RequestType, &str)] = &[
    (RequestType::MAIN_FRAME, "main_frame"),
    (RequestType::SUBDOCUMENT, "sub_frame"),
    (RequestType::STYLESHEET, "stylesheet"),
    (RequestType::SCRIPT, "script"),
    (RequestType::IMAGE, "image"),
    (RequestType::FONT, "font"),
    (RequestType::OBJECT, "object"),
    (RequestType::XMLHTTPREQUEST, "xmlhttprequest"),
    (RequestType::FETCH, "xmlhttprequest"),
    (RequestType::PING, "ping"),
    (RequestType::BEACON, "beacon"),
    (RequestType::CSP_REPORT, "csp_report"),
    (RequestType::MEDIA, "media"),
    (RequestType::WEBSOCKET, "websocket"),
];

fn request_type_name(request_type: RequestType) -> &'static str {
    REQUEST_TYPE_NAMES
        .iter()
        .find(|(ty, _)| request_type.contains(*ty))
        .map(|(_, name)| *name)
        .unwrap_or("other")
}

/// Network filter lines, for the rule count reported at load time.
fn is_network_filter_line(line: &str) -> bool {
    let line = line.trim();
    !(line.is_empty()
        || line.starts_with('!')
        || line.starts_with('[')
        || ["##", "#@#", "#?#", "#$#"].iter().any(|marker| line.contains(marker)))
}

/// Matcher over one filter list.
pub struct FilterListMatcher {
    engine: Engine,
    rules: usize,
}

impl std::fmt::Debug for FilterListMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterListMatcher")
            .field("rules", &self.rules)
            .finish()
    }
}

impl FilterListMatcher {
    pub fn parse(text: &str) -> Self {
        let mut filter_set = FilterSet::new(false);
        filter_set.add_filters(text.lines(), ParseOptions::default());
        Self {
            engine: Engine::from_filter_set(filter_set, true),
            rules: text.lines().filter(|line| is_network_filter_line(line)).count(),
        }
    }

    /// Build from raw rule data; the buffer must be UTF-8 text.
    pub fn from_buffer(buffer: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(buffer)
            .map_err(|e| BlockersError::invalid(RuleFamily::AdBlock, e.to_string()))?;
        Ok(Self::parse(text))
    }

    /// [`MatcherFactory`](super::MatcherFactory) for this backend.
    pub fn boxed_from_buffer(buffer: &[u8]) -> Result<Box<dyn Matcher>> {
        Ok(Box::new(Self::from_buffer(buffer)?))
    }
}

impl Matcher for FilterListMatcher {
    fn test(&self, request: &MatchRequest<'_>) -> Decision {
        let synthetic;
        let url = if request.url.is_empty() {
            synthetic = format!("https://{}/", request.host);
            synthetic.as_str()
        } else {
            request.url
        };

        // Hosts and party were already resolved against the PSL by the caller.
        let list_request = Request::preparsed(
            url,
            request.host,
            request.source_host,
            request_type_name(request.request_type),
            request.is_third_party,
        );
        let result = self.engine.check_network_request(&list_request);
        if result.matched {
            debug!("filter {:?} blocks {}", result.filter, url);
            Decision::Block
        } else {
            Decision::Allow
        }
    }

    fn rule_count(&self) -> usize {
        self.rules
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::ParsedRequest;
    use std::time::{Duration, Instant};

    fn check(matcher: &FilterListMatcher, url: &str, source: &str, ty: RequestType) -> Decision {
        let parsed = ParsedRequest::new(url, source, ty).unwrap();
        matcher.test(&parsed.as_request())
    }

    #[test]
    fn test_host_rules() {
        let m = FilterListMatcher::parse("||doubleclick.net^\n");
        assert_eq!(m.rule_count(), 1);
        assert!(check(&m, "https://doubleclick.net/x", "https://a.com", RequestType::SCRIPT).is_block());
        assert!(check(&m, "https://g.doubleclick.net/x", "https://a.com", RequestType::IMAGE).is_block());
        assert!(!check(&m, "https://example.org/", "https://a.com", RequestType::OTHER).is_block());
    }

    #[test]
    fn test_comments_and_cosmetics_do_not_block() {
        let m = FilterListMatcher::parse("! comment\n[Adblock Plus 2.0]\nexample.com##.ad\n\n");
        assert_eq!(m.rule_count(), 0);
        assert!(!check(&m, "https://example.com/ad.js", "https://example.com", RequestType::SCRIPT).is_block());
    }

    #[test]
    fn test_type_scoped_rule() {
        let m = FilterListMatcher::parse("||cdn.example.com^$script\n/banner/*$image,~third-party");
        let src = "https://a.com/";
        assert!(check(&m, "https://cdn.example.com/lib.js", src, RequestType::SCRIPT).is_block());
        assert!(!check(&m, "https://cdn.example.com/pic.png", src, RequestType::IMAGE).is_block());

        assert!(check(&m, "https://a.com/banner/1.png", src, RequestType::IMAGE).is_block());
        // first-party only
        assert!(!check(&m, "https://b.com/banner/1.png", src, RequestType::IMAGE).is_block());
        assert!(!check(&m, "https://a.com/banner/1.js", src, RequestType::SCRIPT).is_block());
    }

    #[test]
    fn test_negated_type() {
        let m = FilterListMatcher::parse("||ads.net^$~image");
        assert!(check(&m, "https://ads.net/a.js", "https://a.com", RequestType::SCRIPT).is_block());
        assert!(!check(&m, "https://ads.net/a.png", "https://a.com", RequestType::IMAGE).is_block());
    }

    #[test]
    fn test_exception_and_important() {
        let m = FilterListMatcher::parse("||ads.net^\n@@||ads.net/allowed^");
        assert!(check(&m, "https://ads.net/x", "https://a.com", RequestType::SCRIPT).is_block());
        assert!(!check(&m, "https://ads.net/allowed/x", "https://a.com", RequestType::SCRIPT).is_block());

        let m = FilterListMatcher::parse("||ads.net^$important\n@@||ads.net/allowed^");
        assert!(check(&m, "https://ads.net/allowed/x", "https://a.com", RequestType::SCRIPT).is_block());
    }

    #[test]
    fn test_third_party_and_domain_options() {
        let m = FilterListMatcher::parse("||widgets.net^$third-party\n/pixel.$domain=news.com|~sports.news.com");
        assert!(check(&m, "https://widgets.net/w.js", "https://a.com", RequestType::SCRIPT).is_block());
        assert!(!check(&m, "https://widgets.net/w.js", "https://www.widgets.net", RequestType::SCRIPT).is_block());

        assert!(check(&m, "https://cdn.io/pixel.gif", "https://www.news.com/", RequestType::IMAGE).is_block());
        assert!(!check(&m, "https://cdn.io/pixel.gif", "https://sports.news.com/", RequestType::IMAGE).is_block());
        assert!(!check(&m, "https://cdn.io/pixel.gif", "https://other.com/", RequestType::IMAGE).is_block());
    }

    #[test]
    fn test_rule_deep_in_long_url() {
        let m = FilterListMatcher::parse("/banner/*$image");
        let segments: String = (0..40).map(|i| format!("seg{}/", i)).collect();
        let url = format!("https://news.com/{}banner/top.png", segments);
        assert!(check(&m, "https://news.com/banner/top.png", "https://news.com/", RequestType::IMAGE).is_block());
        assert!(check(&m, &url, "https://news.com/", RequestType::IMAGE).is_block());
    }

    #[test]
    fn test_wildcards_match_in_bounded_time() {
        let m = FilterListMatcher::parse("/a*a*a*zzq\n/a*a*a*a*a*zzq");
        let url = format!("https://news.com/{}", "a".repeat(600));

        let start = Instant::now();
        assert!(!check(&m, &url, "https://news.com/", RequestType::OTHER).is_block());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_request_type_names() {
        assert_eq!(request_type_name(RequestType::SUBDOCUMENT), "sub_frame");
        assert_eq!(request_type_name(RequestType::FETCH), "xmlhttprequest");
        assert_eq!(request_type_name(RequestType::OTHER), "other");
        assert_eq!(request_type_name(RequestType::empty()), "other");
    }

    #[test]
    fn test_host_only_request() {
        let m = FilterListMatcher::parse("||tracker.net^");
        assert!(m.test(&MatchRequest::for_hosts("a.com", "x.tracker.net")).is_block());
    }

    #[test]
    fn test_non_utf8_buffer_is_invalid() {
        assert!(FilterListMatcher::from_buffer(&[0xff, 0xfe, 0x00]).is_err());
    }
}
