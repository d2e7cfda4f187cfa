//! URL normalization
//!
//! Turns whatever a forum post contained (double-encoded links, bare
//! `facebook.com/...` paths, `l.facebook.com` trampolines, `utm_` noise) into a
//! single canonical absolute URL. Everything after a successful parse is
//! best-effort: a rewrite step that cannot apply leaves the URL untouched, so
//! [`normalize`] only fails on input that never parses.

mod policy;

pub use policy::{is_private_host, is_supported_scheme};

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use thiserror::Error;
use url::Url;

/// Percent-decoding passes attempted before giving up on a candidate
const MAX_DECODE_PASSES: usize = 2;

/// Nested link-wrapper unwrapping depth
const MAX_UNWRAP_DEPTH: usize = 4;

static SCHEME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://").expect("scheme regex"));

static BARE_DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^/*(?:www\.|(?:l|m|lm|mbasic|touch)\.facebook\.com/|facebook\.com/|(?:l\.|m\.)?instagram\.com/|fb\.me/|fb\.watch/|(?:mobile\.)?twitter\.com/|x\.com/|t\.co/|bit\.ly/|tinyurl\.com/)",
    )
    .expect("bare domain regex")
});

static DUP_SLASH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/{2,}").expect("slash regex"));

/// Hosts that wrap an outbound link in a query parameter: (host, parameter)
const LINK_WRAPPERS: &[(&str, &str)] = &[
    ("l.facebook.com", "u"),
    ("lm.facebook.com", "u"),
    ("l.instagram.com", "u"),
    ("l.messenger.com", "u"),
    ("out.reddit.com", "url"),
];

/// Mobile or alternate hosts and their primary counterpart
const HOST_ALIASES: &[(&str, &str)] = &[
    ("m.facebook.com", "www.facebook.com"),
    ("mbasic.facebook.com", "www.facebook.com"),
    ("touch.facebook.com", "www.facebook.com"),
    ("lm.facebook.com", "www.facebook.com"),
    ("l.facebook.com", "www.facebook.com"),
    ("m.instagram.com", "www.instagram.com"),
    ("mobile.twitter.com", "twitter.com"),
    ("mobile.x.com", "x.com"),
    ("m.youtube.com", "www.youtube.com"),
];

/// Share and click identifiers; every `utm_*` key is dropped as well
const TRACKING_PARAMS: &[&str] = &[
    "igshid", "igsh", "_rdr", "mibextid", "fbclid", "gclid", "ref_src", "ref_url", "rdid",
    "sfnsn",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("malformed URL: {0}")]
    Malformed(String),
}

/// An absolute URL after canonicalization
///
/// Only produced by this module. `http` inputs come out as `https`; other
/// schemes are carried through unchanged so policy checks can report them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedUrl(Url);

impl NormalizedUrl {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }

    pub fn host(&self) -> Option<&str> {
        self.0.host_str()
    }

    pub fn path(&self) -> &str {
        self.0.path()
    }
}

impl fmt::Display for NormalizedUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        self.0.as_str()
    }
}

/// Parse and canonicalize a raw URL string
pub fn normalize(raw: &str) -> Result<NormalizedUrl, NormalizeError> {
    coerce(raw).map(canonicalize)
}

/// Tolerant parse: tries the raw string first, then up to two percent-decoded
/// variants, adding `https://` to known bare social domains.
pub fn coerce(raw: &str) -> Result<Url, NormalizeError> {
    let mut candidates = vec![raw.trim().to_string()];
    for _ in 0..MAX_DECODE_PASSES {
        let Some(last) = candidates.last() else { break };
        let next = match urlencoding::decode(last) {
            Ok(decoded) if &*decoded != last.as_str() => decoded.into_owned(),
            // undecodable or already plain: keep the previous candidate
            _ => break,
        };
        candidates.push(next);
    }

    candidates
        .iter()
        .find_map(|candidate| parse_candidate(candidate))
        .ok_or_else(|| NormalizeError::Malformed(raw.to_string()))
}

/// Apply every rewrite step to an already parsed URL. Never fails.
pub fn canonicalize(url: Url) -> NormalizedUrl {
    canonicalize_at(url, 0)
}

fn canonicalize_at(mut url: Url, depth: usize) -> NormalizedUrl {
    if depth < MAX_UNWRAP_DEPTH
        && let Some(target) = wrapped_target(&url)
        && let Ok(inner) = coerce(&target)
    {
        return canonicalize_at(inner, depth + 1);
    }

    canonicalize_host(&mut url);
    strip_tracking_params(&mut url);
    collapse_slashes(&mut url);
    force_https(&mut url);
    NormalizedUrl(url)
}

fn parse_candidate(candidate: &str) -> Option<Url> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }

    let prefixed;
    let candidate = if !SCHEME_RE.is_match(candidate) && BARE_DOMAIN_RE.is_match(candidate) {
        prefixed = format!("https://{}", candidate.trim_start_matches('/'));
        prefixed.as_str()
    } else {
        candidate
    };

    // `mailto:` and `localhost:8080` parse, but carry no host
    Url::parse(candidate).ok().filter(Url::has_host)
}

fn wrapped_target(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let (_, param) = LINK_WRAPPERS
        .iter()
        .find(|(wrapper, _)| host.eq_ignore_ascii_case(wrapper))?;
    url.query_pairs()
        .find(|(key, _)| key == *param)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.trim().is_empty())
}

fn canonicalize_host(url: &mut Url) {
    let Some(host) = url.host_str() else { return };
    if let Some((_, primary)) = HOST_ALIASES
        .iter()
        .find(|(alias, _)| host.eq_ignore_ascii_case(alias))
    {
        let primary = *primary;
        let _ = url.set_host(Some(primary));
    }
}

fn strip_tracking_params(url: &mut Url) {
    let rebuilt = match url.query() {
        Some(query) => {
            let rebuilt = query
                .split('&')
                .filter(|pair| !pair.is_empty() && !is_tracking_param(pair))
                .collect::<Vec<_>>()
                .join("&");
            if rebuilt == query {
                return;
            }
            rebuilt
        }
        None => return,
    };
    url.set_query((!rebuilt.is_empty()).then_some(rebuilt.as_str()));
}

fn is_tracking_param(pair: &str) -> bool {
    let raw_key = pair.split('=').next().unwrap_or_default();
    let key = urlencoding::decode(raw_key)
        .map(|key| key.to_ascii_lowercase())
        .unwrap_or_else(|_| raw_key.to_ascii_lowercase());
    key.starts_with("utm_") || TRACKING_PARAMS.contains(&key.as_str())
}

fn collapse_slashes(url: &mut Url) {
    if !url.path().contains("//") {
        return;
    }
    let collapsed = DUP_SLASH_RE.replace_all(url.path(), "/").into_owned();
    url.set_path(&collapsed);
}

fn force_https(url: &mut Url) {
    if url.scheme() == "http" {
        let _ = url.set_scheme("https");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(raw: &str) -> String {
        normalize(raw).unwrap().to_string()
    }

    #[test]
    fn bare_social_path_gets_https_scheme() {
        assert_eq!(
            norm("facebook.com/watch/?v=123456"),
            "https://facebook.com/watch/?v=123456"
        );
        assert_eq!(norm("www.example.org/a"), "https://www.example.org/a");
    }

    #[test]
    fn strips_tracking_params_and_keeps_the_rest() {
        assert_eq!(
            norm("https://example.com/article?utm_source=x"),
            "https://example.com/article"
        );
        assert_eq!(
            norm("https://example.com/a?id=7&UTM_Medium=y&fbclid=abc&q=a%20b"),
            "https://example.com/a?id=7&q=a%20b"
        );
        assert_eq!(
            norm("https://www.instagram.com/p/Cx1/?igshid=MzRl"),
            "https://www.instagram.com/p/Cx1/"
        );
    }

    #[test]
    fn unwraps_link_wrappers() {
        assert_eq!(
            norm("https://l.facebook.com/l.php?u=https%3A%2F%2Fexample.com%2Fpost%3Futm_campaign%3Dz&h=AT0"),
            "https://example.com/post"
        );
        assert_eq!(
            norm("l.instagram.com/?u=http%3A%2F%2Fnews.example.net%2Fstory"),
            "https://news.example.net/story"
        );
    }

    #[test]
    fn wrapper_without_target_is_canonicalized_in_place() {
        assert_eq!(
            norm("https://l.facebook.com/l.php?h=AT0"),
            "https://www.facebook.com/l.php?h=AT0"
        );
    }

    #[test]
    fn canonicalizes_mobile_hosts_and_slashes() {
        assert_eq!(
            norm("http://m.facebook.com//story.php?story_fbid=1&id=2&_rdr"),
            "https://www.facebook.com/story.php?story_fbid=1&id=2"
        );
        assert_eq!(
            norm("https://mbasic.facebook.com/share/p/1C3w5KvwGu/?mibextid=wwXIfr"),
            "https://www.facebook.com/share/p/1C3w5KvwGu/"
        );
    }

    #[test]
    fn decodes_double_encoded_input() {
        assert_eq!(
            norm("https%253A%252F%252Ffb.me%252Fabc"),
            "https://fb.me/abc"
        );
        assert_eq!(norm("https%3A%2F%2Ft.co%2Fxyz"), "https://t.co/xyz");
    }

    #[test]
    fn non_http_schemes_pass_through() {
        assert_eq!(norm("ftp://files.example.com/a"), "ftp://files.example.com/a");
    }

    #[test]
    fn rejects_unparseable_input() {
        for raw in ["", "   ", "not a url", "example.com/nope", "mailto:a@b.c", "%E0%A4%A"] {
            assert!(
                matches!(normalize(raw), Err(NormalizeError::Malformed(_))),
                "expected {raw:?} to be malformed"
            );
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        let inputs = [
            "facebook.com/watch/?v=123456",
            "http://m.facebook.com//groups//123/?utm_source=x&ref=1",
            "https://l.facebook.com/l.php?u=https%3A%2F%2Fexample.com%2F%3Fa%3D1%26utm_x%3D2",
            "https%253A%252F%252Fbit.ly%252F3abc",
            "https://example.com/a?q=%2541&&b=",
            "https://example.com:8443/x?",
            "HTTP://WWW.Example.COM/Path",
            "ftp://files.example.com/a",
        ];
        for raw in inputs {
            let once = normalize(raw).unwrap();
            let twice = normalize(once.as_str()).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw:?}");
        }
    }
}
