//! Core type definitions shared by the matchers, the HTTPS rewrite engine
//! and the referrer evaluator.

use url::Url;

// =============================================================================
// Request Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Request type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RequestType: u32 {
        const OTHER = 1 << 0;
        const SCRIPT = 1 << 1;
        const IMAGE = 1 << 2;
        const STYLESHEET = 1 << 3;
        const OBJECT = 1 << 4;
        const SUBDOCUMENT = 1 << 5;  // iframe/frame
        const MAIN_FRAME = 1 << 6;   // main document
        const XMLHTTPREQUEST = 1 << 7;
        const WEBSOCKET = 1 << 8;
        const FONT = 1 << 9;
        const MEDIA = 1 << 10;
        const PING = 1 << 11;
        const CSP_REPORT = 1 << 12;
        const BEACON = 1 << 13;
        const FETCH = 1 << 14;

        /// All request types
        const ALL = 0x7FFF;
        /// Document types (main_frame + sub_frame)
        const DOCUMENT = Self::MAIN_FRAME.bits() | Self::SUBDOCUMENT.bits();
    }
}

impl RequestType {
    /// Parse from browser request type string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "main_frame" | "document" => Self::MAIN_FRAME,
            "sub_frame" | "subdocument" => Self::SUBDOCUMENT,
            "stylesheet" => Self::STYLESHEET,
            "script" => Self::SCRIPT,
            "image" => Self::IMAGE,
            "font" => Self::FONT,
            "object" => Self::OBJECT,
            "xmlhttprequest" | "xhr" => Self::XMLHTTPREQUEST,
            "ping" => Self::PING,
            "beacon" => Self::BEACON,
            "fetch" => Self::FETCH,
            "csp_report" => Self::CSP_REPORT,
            "media" => Self::MEDIA,
            "websocket" => Self::WEBSOCKET,
            _ => Self::OTHER,
        }
    }

    /// Map the numeric resource-type discriminant handed over by the
    /// browser's request pipeline.
    pub fn from_chromium_resource_type(resource_type: u32) -> Self {
        match resource_type {
            0 => Self::MAIN_FRAME,
            1 => Self::SUBDOCUMENT,
            2 => Self::STYLESHEET,
            3 => Self::SCRIPT,
            4 | 12 => Self::IMAGE, // image, favicon
            5 => Self::FONT,
            7 | 17 => Self::OBJECT, // object, plugin resource
            8 => Self::MEDIA,
            13 => Self::XMLHTTPREQUEST,
            14 => Self::PING,
            16 => Self::CSP_REPORT,
            _ => Self::OTHER,
        }
    }
}

// =============================================================================
// Match Decision
// =============================================================================

/// Outcome of testing a request against one matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Decision {
    /// No blocking rule applies (or an exception matched)
    #[default]
    Allow,
    /// The request should be cancelled
    Block,
}

impl Decision {
    #[inline]
    pub fn is_block(self) -> bool {
        self == Decision::Block
    }
}

// =============================================================================
// Referrer
// =============================================================================

/// Referrer policy attached to a navigation or subresource request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferrerPolicy {
    Always,
    #[default]
    Default,
    NoReferrerWhenDowngrade,
    Never,
    Origin,
    OriginWhenCrossOrigin,
    NoReferrerWhenDowngradeOriginWhenCrossOrigin,
    SameOrigin,
    StrictOrigin,
}

impl ReferrerPolicy {
    /// Parse a policy name as used in `Referrer-Policy` headers.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unsafe-url" | "always" => Some(Self::Always),
            "" | "default" => Some(Self::Default),
            "no-referrer-when-downgrade" => Some(Self::NoReferrerWhenDowngrade),
            "no-referrer" | "never" => Some(Self::Never),
            "origin" => Some(Self::Origin),
            "origin-when-cross-origin" => Some(Self::OriginWhenCrossOrigin),
            "strict-origin-when-cross-origin" => {
                Some(Self::NoReferrerWhenDowngradeOriginWhenCrossOrigin)
            }
            "same-origin" => Some(Self::SameOrigin),
            "strict-origin" => Some(Self::StrictOrigin),
            _ => None,
        }
    }
}

/// A referrer URL together with the policy it is sent under.
///
/// `url == None` means "send no referrer".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Referrer {
    pub url: Option<Url>,
    pub policy: ReferrerPolicy,
}

impl Referrer {
    pub fn new(url: Option<Url>, policy: ReferrerPolicy) -> Self {
        Self { url, policy }
    }

    /// Apply `policy` to `url` for a request to `request`.
    ///
    /// Credentials and fragments are always stripped; non-HTTP(S) requests
    /// and non-HTTP(S) referrers never carry a referrer.
    pub fn sanitize_for_request(request: &Url, referrer: &Referrer) -> Referrer {
        let policy = referrer.policy;
        let url = match &referrer.url {
            Some(url) => url,
            None => return Referrer::new(None, policy),
        };

        if !is_http_or_https(request) || !is_http_or_https(url) {
            return Referrer::new(None, policy);
        }

        let mut url = url.clone();
        // Infallible for http(s) URLs.
        let _ = url.set_username("");
        let _ = url.set_password(None);
        url.set_fragment(None);

        let is_downgrade = url.scheme() == "https" && request.scheme() != "https";
        let is_cross_origin = url.origin() != request.origin();

        let sanitized = match policy {
            ReferrerPolicy::Always => Some(url),
            ReferrerPolicy::Default | ReferrerPolicy::NoReferrerWhenDowngrade => {
                (!is_downgrade).then_some(url)
            }
            ReferrerPolicy::Never => None,
            ReferrerPolicy::Origin => origin_url(&url),
            ReferrerPolicy::OriginWhenCrossOrigin => {
                if is_cross_origin { origin_url(&url) } else { Some(url) }
            }
            ReferrerPolicy::NoReferrerWhenDowngradeOriginWhenCrossOrigin => {
                if is_downgrade {
                    None
                } else if is_cross_origin {
                    origin_url(&url)
                } else {
                    Some(url)
                }
            }
            ReferrerPolicy::SameOrigin => (!is_cross_origin).then_some(url),
            ReferrerPolicy::StrictOrigin => {
                if is_downgrade { None } else { origin_url(&url) }
            }
        };

        Referrer::new(sanitized, policy)
    }
}

fn is_http_or_https(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// `scheme://host[:port]/` form of a URL, or `None` for opaque origins.
pub fn origin_url(url: &Url) -> Option<Url> {
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    Url::parse(&format!("{}/", origin.ascii_serialization())).ok()
}
