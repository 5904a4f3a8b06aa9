//! Matchers: one per loaded rule set.
//!
//! A matcher is built once from a [`RuleSetBuffer`](crate::loader::RuleSetBuffer)
//! and is immutable afterwards, so it can be shared by every request thread.
//! The worker only sees the [`Matcher`] trait and folds over sequences of
//! them; the rule grammar behind each implementation is its own business.

mod filter_list;
mod tracker;

pub use filter_list::FilterListMatcher;
pub use tracker::TrackerMatcher;

use crate::error::Result;
use crate::types::{Decision, RequestType};
use crate::url::{host_of, is_third_party};

/// A request as seen by a matcher.
#[derive(Debug, Clone)]
pub struct MatchRequest<'a> {
    /// Full request URL (empty for host-only queries)
    pub url: &'a str,
    /// Request hostname
    pub host: &'a str,
    /// Context/initiator hostname
    pub source_host: &'a str,
    /// Is this a third-party request?
    pub is_third_party: bool,
    /// Request type
    pub request_type: RequestType,
}

impl<'a> MatchRequest<'a> {
    /// Host-only request, as issued by tracking protection.
    pub fn for_hosts(source_host: &'a str, host: &'a str) -> Self {
        Self {
            url: "",
            host,
            source_host,
            is_third_party: is_third_party(source_host, host),
            request_type: RequestType::OTHER,
        }
    }
}

/// Owned host data backing a [`MatchRequest`] built from URL strings.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    url: String,
    host: String,
    source_host: String,
    request_type: RequestType,
}

impl ParsedRequest {
    /// Parse `url` in the context of `source_url`. `None` if `url` has no host.
    ///
    /// An unparseable source URL is treated as an unknown (empty) initiator.
    pub fn new(url: &str, source_url: &str, request_type: RequestType) -> Option<Self> {
        let host = host_of(url)?;
        Some(Self {
            url: url.to_string(),
            host,
            source_host: host_of(source_url).unwrap_or_default(),
            request_type,
        })
    }

    pub fn as_request(&self) -> MatchRequest<'_> {
        MatchRequest {
            url: &self.url,
            host: &self.host,
            source_host: &self.source_host,
            is_third_party: !self.source_host.is_empty()
                && is_third_party(&self.source_host, &self.host),
            request_type: self.request_type,
        }
    }
}

/// Block/allow capability of one rule set.
pub trait Matcher: Send + Sync {
    fn test(&self, request: &MatchRequest<'_>) -> Decision;

    /// Number of rules loaded, for logging.
    fn rule_count(&self) -> usize {
        0
    }
}

/// Constructor for ad-block matchers from raw rule data.
pub type MatcherFactory = fn(&[u8]) -> Result<Box<dyn Matcher>>;

/// OR-fold: the first matcher that blocks wins.
pub fn any_blocks(matchers: &[Box<dyn Matcher>], request: &MatchRequest<'_>) -> bool {
    matchers.iter().any(|m| m.test(request).is_block())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Always(Decision);

    impl Matcher for Always {
        fn test(&self, _request: &MatchRequest<'_>) -> Decision {
            self.0
        }
    }

    #[test]
    fn test_parsed_request() {
        let parsed = ParsedRequest::new(
            "https://CDN.Tracker.net/Pixel.gif",
            "https://www.a.com/",
            RequestType::IMAGE,
        )
        .unwrap();
        let request = parsed.as_request();
        assert_eq!(request.host, "cdn.tracker.net");
        assert_eq!(request.source_host, "www.a.com");
        assert_eq!(request.url, "https://CDN.Tracker.net/Pixel.gif");
        assert!(request.is_third_party);

        assert!(ParsedRequest::new("garbage", "https://a.com", RequestType::OTHER).is_none());
    }

    #[test]
    fn test_unknown_source_is_not_third_party() {
        let parsed = ParsedRequest::new("https://b.com/x", "", RequestType::OTHER).unwrap();
        assert!(!parsed.as_request().is_third_party);
    }

    #[test]
    fn test_any_blocks() {
        let request = MatchRequest::for_hosts("a.com", "b.com");

        let allow_only: Vec<Box<dyn Matcher>> = vec![Box::new(Always(Decision::Allow))];
        assert!(!any_blocks(&allow_only, &request));

        let mixed: Vec<Box<dyn Matcher>> = vec![
            Box::new(Always(Decision::Allow)),
            Box::new(Always(Decision::Block)),
        ];
        assert!(any_blocks(&mixed, &request));
        assert!(!any_blocks(&[], &request));
    }
}
