//! Built-in tracking-protection backend.
//!
//! Rule data is a JSON document:
//!
//! ```json
//! {
//!   "trackers": ["tracker.net", "pixel.ads.com"],
//!   "first_party": { "facebook.com": ["fbcdn.net", "facebook.net"] }
//! }
//! ```
//!
//! `trackers` lists hosts blocked together with all their subdomains.
//! `first_party` groups hosts owned by the same entity as a base host; a
//! tracker in the base host's group is not third party in any useful sense.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use super::{MatchRequest, Matcher};
use crate::error::{BlockersError, Result, RuleFamily};
use crate::types::Decision;
use crate::url::{etld1, get_parent_domain, normalize_host};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct TrackerData {
    trackers: Vec<String>,
    first_party: HashMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
pub struct TrackerMatcher {
    trackers: HashSet<String>,
    /// eTLD+1 -> same-entity hosts, in data order
    first_party: HashMap<String, Vec<String>>,
}

impl TrackerMatcher {
    pub fn from_buffer(buffer: &[u8]) -> Result<Self> {
        let data: TrackerData = serde_json::from_slice(buffer)
            .map_err(|e| BlockersError::invalid(RuleFamily::TrackingProtection, e.to_string()))?;

        let trackers = data
            .trackers
            .iter()
            .map(|h| normalize_host(h))
            .filter(|h| !h.is_empty())
            .collect();

        let mut first_party: HashMap<String, Vec<String>> = HashMap::new();
        for (base, hosts) in data.first_party {
            let key = etld1(&normalize_host(&base));
            if key.is_empty() {
                continue;
            }
            first_party
                .entry(key)
                .or_default()
                .extend(hosts.iter().map(|h| normalize_host(h)).filter(|h| !h.is_empty()));
        }

        Ok(Self {
            trackers,
            first_party,
        })
    }

    /// Is `host`, or any domain above it, a listed tracker?
    pub fn is_tracker(&self, host: &str) -> bool {
        let mut current = Some(host);
        while let Some(h) = current {
            if self.trackers.contains(h) {
                return true;
            }
            current = get_parent_domain(h);
        }
        false
    }

    /// Hosts belonging to the same entity as `base_host`.
    pub fn first_party_hosts(&self, base_host: &str) -> Vec<String> {
        self.first_party
            .get(&etld1(base_host))
            .cloned()
            .unwrap_or_default()
    }
}

impl Matcher for TrackerMatcher {
    fn test(&self, request: &MatchRequest<'_>) -> Decision {
        if self.is_tracker(request.host) {
            Decision::Block
        } else {
            Decision::Allow
        }
    }

    fn rule_count(&self) -> usize {
        self.trackers.len()
    }
}
