//! Shared configuration constants
//!
//! Default values used across the resolver, extractor and browser launcher so
//! that request fingerprints stay consistent between the plain and rendered tiers.

/// User agent sent while probing redirects
///
/// Identifies the proxy honestly; shorteners answer bots with plain 30x.
pub const RESOLVE_USER_AGENT: &str = "OgProxy/1.0 (+https://github.com/og-proxy/og-proxy)";

/// Mobile Safari user agent for Open Graph fetches and rendered pages
///
/// Social sites serve lighter markup (and fewer login walls) to mobile clients.
pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Mobile/15E148 Safari/604.1";

pub const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9,uk-UA;q=0.8";

pub const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Referer attached to resolver GETs; several share endpoints refuse cold requests
pub const RESOLVE_REFERER: &str = "https://www.facebook.com/";

/// Default TTL for cached resolution results (15 minutes)
pub const RESOLVE_CACHE_TTL_SECS: u64 = 900;

/// Default TTL for cached preview metadata (1 hour)
pub const OG_CACHE_TTL_SECS: u64 = 3600;

/// Upper bound on manual redirect hops
pub const MAX_REDIRECT_HOPS: usize = 10;
