//! Blockers Core Library
//!
//! Request-time content filtering for a browser: for every outgoing request
//! the engine decides whether to block it (tracking protection, ad block),
//! whether to upgrade it to HTTPS, and whether to override its referrer.
//!
//! # Architecture
//!
//! [`BlockersWorker`] owns one lazily initialized state per rule family.
//! Each family is loaded at most once, from versioned rule files under a
//! data directory, and is shared read-only by every request thread
//! afterwards. Missing or corrupt data never fails a request: the family
//! stays uninitialized and its queries answer "do not block / do not
//! rewrite".
//!
//! # Modules
//!
//! - `types`: Shared type definitions
//! - `error`: Error type for loading and rule-store access
//! - `config`: Engine configuration (JSON)
//! - `url`: Host and eTLD+1 helpers
//! - `cache`: Bounded recently-used cache
//! - `loader`: Rule file loading
//! - `matcher`: Matcher trait plus tracking-protection and filter-list backends
//! - `httpse`: HTTPS rewrite engine, rule store and redirect loop guard
//! - `referrer`: Referrer override decision
//! - `init`: One-shot family initialization
//! - `worker`: The engine facade

pub mod cache;
pub mod config;
pub mod error;
pub mod httpse;
pub mod init;
pub mod loader;
pub mod matcher;
pub mod referrer;
pub mod types;
pub mod url;
pub mod worker;

// Re-export commonly used types
pub use cache::RecentlyUsedCache;
pub use config::{EngineConfig, RegionalListConfig, RuleFileConfig};
pub use error::{BlockersError, Result, RuleFamily};
pub use httpse::{apply_https_rule, HttpsRuleStore, SqliteRuleStore};
pub use matcher::{FilterListMatcher, MatchRequest, Matcher, MatcherFactory, TrackerMatcher};
pub use types::{Decision, Referrer, ReferrerPolicy, RequestType};
pub use worker::BlockersWorker;
