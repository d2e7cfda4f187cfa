//! Redirect resolution
//!
//! Strategies run cheapest first and stop at the first candidate that differs
//! from the input after normalization:
//!
//! 1. automatic redirect follow (GET)
//! 2. manual hop-by-hop traversal (HEAD, GET fallback)
//! 3. canonical URL scraped from page markup, across URL variants
//! 4. canonical URL reported by a rendered navigation
//!
//! [`Resolver::resolve`] never fails. Policy rejections and exhausted
//! strategies are reported through [`ResolutionResult::warning`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::Config;
use crate::extractor::MetadataExtractor;
use crate::fetch::{FetchError, FetchRequest, FetchResponse, HttpFetcher};
use crate::normalizer::{self, NormalizedUrl, is_private_host, is_supported_scheme};
use crate::page_extractor::pick_canonical;

static FACEBOOK_SHARE_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^/share/(?:[a-z]/)?[A-Za-z0-9_-]+/?$").expect("valid share path pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMethod {
    Auto,
    ManualHops,
    HtmlCanonical,
    RenderedCanonical,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionWarning {
    MaxHops,
    PrivateHost,
    UnsupportedScheme,
    NoChange,
    NetworkFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolutionResult {
    pub final_url: String,
    pub method: ResolutionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hops: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<ResolutionWarning>,
}

impl ResolutionResult {
    pub fn unchanged(url: &NormalizedUrl, warning: ResolutionWarning) -> Self {
        Self {
            final_url: url.to_string(),
            method: ResolutionMethod::Unchanged,
            hops: None,
            warning: Some(warning),
        }
    }

    fn found(url: NormalizedUrl, method: ResolutionMethod) -> Self {
        Self {
            final_url: url.to_string(),
            method,
            hops: None,
            warning: None,
        }
    }

    /// Results that did not improve on the input are never cached
    pub fn is_cacheable(&self) -> bool {
        self.method != ResolutionMethod::Unchanged
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverOptions {
    pub max_hops: usize,
    pub timeout: Duration,
    pub html_timeout: Duration,
    pub redirect_hosts: Vec<String>,
    pub allow_private_hosts: bool,
}

impl From<&Config> for ResolverOptions {
    fn from(config: &Config) -> Self {
        let resolver = &config.resolver;
        Self {
            max_hops: resolver.max_hops.max(1),
            timeout: Duration::from_millis(resolver.timeout_ms),
            html_timeout: Duration::from_millis(resolver.html_timeout_ms),
            redirect_hosts: resolver
                .redirect_hosts
                .iter()
                .map(|h| h.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|h| !h.is_empty())
                .collect(),
            allow_private_hosts: resolver.allow_private_hosts,
        }
    }
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Where a manual traversal stopped
struct HopTrail {
    hops: Vec<String>,
    exhausted: bool,
    failed: bool,
}

impl HopTrail {
    fn last(&self) -> &str {
        self.hops.last().map_or("", String::as_str)
    }
}

pub struct Resolver {
    fetcher: Arc<dyn HttpFetcher>,
    extractor: Arc<MetadataExtractor>,
    options: ResolverOptions,
}

impl Resolver {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, extractor: Arc<MetadataExtractor>, options: ResolverOptions) -> Self {
        Self {
            fetcher,
            extractor,
            options,
        }
    }

    /// Known shorteners and wrappers, plus facebook `/share/...` links
    pub fn is_redirect_prone(&self, url: &NormalizedUrl) -> bool {
        let Some(host) = url.host().map(str::to_ascii_lowercase) else {
            return false;
        };
        let listed = self
            .options
            .redirect_hosts
            .iter()
            .any(|known| host_matches(&host, known));
        listed || (host_matches(&host, "facebook.com") && FACEBOOK_SHARE_PATH_RE.is_match(url.path()))
    }

    pub async fn resolve(&self, input: &NormalizedUrl) -> ResolutionResult {
        if !is_supported_scheme(input.as_url()) {
            return ResolutionResult::unchanged(input, ResolutionWarning::UnsupportedScheme);
        }
        if !self.options.allow_private_hosts && is_private_host(input.as_url()) {
            return ResolutionResult::unchanged(input, ResolutionWarning::PrivateHost);
        }
        if !self.is_redirect_prone(input) {
            debug!(url = %input, "Not redirect-prone, skipping network");
            return ResolutionResult::unchanged(input, ResolutionWarning::NoChange);
        }

        let mut network_failed = false;

        match self.auto_follow(input).await {
            Ok(Some(found)) => {
                info!(url = %input, final_url = %found, method = "auto", "Resolved");
                return ResolutionResult::found(found, ResolutionMethod::Auto);
            }
            Ok(None) => {}
            Err(e) => {
                debug!(url = %input, "Auto-follow failed: {}", e);
                network_failed = true;
            }
        }

        let trail = self.manual_hops(input).await;
        network_failed |= trail.failed;
        if let Some(found) = improved(input, trail.last()) {
            info!(url = %input, final_url = %found, hops = trail.hops.len(), method = "manual-hops", "Resolved");
            return ResolutionResult {
                final_url: found.to_string(),
                method: ResolutionMethod::ManualHops,
                warning: trail.exhausted.then_some(ResolutionWarning::MaxHops),
                hops: Some(trail.hops),
            };
        }

        match self.html_canonical(input).await {
            (Some(found), _) => {
                info!(url = %input, final_url = %found, method = "html-canonical", "Resolved");
                return ResolutionResult::found(found, ResolutionMethod::HtmlCanonical);
            }
            (None, failed) => network_failed |= failed,
        }

        match self.extractor.rendered_canonical(input).await {
            Ok(candidate) => {
                if let Some(found) = improved(input, &candidate) {
                    info!(url = %input, final_url = %found, method = "rendered-canonical", "Resolved");
                    return ResolutionResult::found(found, ResolutionMethod::RenderedCanonical);
                }
            }
            Err(e) => {
                debug!(url = %input, "Rendered canonical failed: {}", e);
                network_failed = true;
            }
        }

        let warning = if network_failed {
            ResolutionWarning::NetworkFailed
        } else {
            ResolutionWarning::NoChange
        };
        debug!(url = %input, ?warning, "No strategy improved on input");
        ResolutionResult::unchanged(input, warning)
    }

    async fn auto_follow(&self, input: &NormalizedUrl) -> Result<Option<NormalizedUrl>, FetchError> {
        let response = self
            .fetcher
            .fetch(FetchRequest::get(input.as_str(), self.options.timeout))
            .await?;
        Ok(improved(input, &response.final_url))
    }

    async fn manual_hops(&self, input: &NormalizedUrl) -> HopTrail {
        let mut trail = HopTrail {
            hops: vec![input.to_string()],
            exhausted: false,
            failed: false,
        };
        let mut current = input.as_url().clone();

        for hop in 1..=self.options.max_hops {
            let response = match self.hop_request(&current).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(url = %current, hop, "Hop failed: {}", e);
                    trail.failed = true;
                    return trail;
                }
            };
            let next = response
                .location
                .as_deref()
                .filter(|_| response.is_redirect())
                .and_then(|location| current.join(location).ok());
            let Some(next) = next else {
                return trail;
            };
            debug!(hop, from = %current, to = %next, "Redirect hop");
            trail.hops.push(next.to_string());
            current = next;

            if hop == self.options.max_hops {
                trail.exhausted = true;
            }
        }
        trail
    }

    /// HEAD without following redirects, retried as GET if HEAD is refused
    async fn hop_request(&self, url: &Url) -> Result<FetchResponse, FetchError> {
        let head = FetchRequest::head(url.as_str(), self.options.timeout).manual_redirects();
        match self.fetcher.fetch(head).await {
            Ok(response) if response.status != 405 && response.status != 501 => Ok(response),
            Ok(_) | Err(_) => {
                let get = FetchRequest::get(url.as_str(), self.options.timeout).manual_redirects();
                self.fetcher.fetch(get).await
            }
        }
    }

    /// Returns the improved URL, and whether any variant fetch failed
    async fn html_canonical(&self, input: &NormalizedUrl) -> (Option<NormalizedUrl>, bool) {
        let mut failed = false;
        for variant in page_variants(input.as_url()) {
            let request = FetchRequest::get(variant.as_str(), self.options.html_timeout);
            let response = match self.fetcher.fetch(request).await {
                Ok(response) => response,
                Err(e) => {
                    debug!(url = %variant, "Variant fetch failed: {}", e);
                    failed = true;
                    continue;
                }
            };
            let Some(markup) = response.body.as_deref() else {
                continue;
            };
            let base = Url::parse(&response.final_url).unwrap_or(variant);
            if let Some(canonical) = pick_canonical(markup, &base) {
                debug!(url = %input, rule = canonical.rule, candidate = %canonical.url, "Canonical rule matched");
                if let Some(found) = improved(input, canonical.url.as_str()) {
                    return (Some(found), failed);
                }
            }
        }
        (None, failed)
    }
}

/// Normalized `candidate`, when it is a different URL than `input`
fn improved(input: &NormalizedUrl, candidate: &str) -> Option<NormalizedUrl> {
    let candidate = normalizer::normalize(candidate).ok()?;
    (candidate != *input).then_some(candidate)
}

fn host_matches(host: &str, known: &str) -> bool {
    host == known
        || host
            .strip_suffix(known)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Plain URL, `_fb_noscript=1` variant, then mobile facebook hosts
fn page_variants(url: &Url) -> Vec<Url> {
    let mut variants = vec![url.clone()];

    let mut noscript = url.clone();
    noscript.query_pairs_mut().append_pair("_fb_noscript", "1");
    variants.push(noscript);

    if url.host_str().is_some_and(|h| host_matches(h, "facebook.com")) {
        for host in ["m.facebook.com", "mbasic.facebook.com"] {
            let mut mobile = url.clone();
            if mobile.set_host(Some(host)).is_ok() {
                variants.push(mobile);
            }
        }
    }
    variants
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ExtractorOptions;
    use crate::fetch::{Method, Redirects};
    use crate::pool::{RenderError, RenderedPage, Renderer};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Serves canned responses keyed by (method, redirect mode, url)
    #[derive(Default)]
    struct Routes {
        follow: HashMap<String, Result<FetchResponse, FetchError>>,
        manual: HashMap<String, FetchResponse>,
        head: HashMap<String, Result<FetchResponse, FetchError>>,
        log: Mutex<Vec<(Method, Redirects, String)>>,
    }

    impl Routes {
        fn follow(mut self, url: &str, final_url: &str, body: Option<&str>) -> Self {
            self.follow.insert(
                url.into(),
                Ok(FetchResponse {
                    final_url: final_url.into(),
                    status: 200,
                    location: None,
                    content_type: Some("text/html".into()),
                    body: body.map(str::to_string),
                }),
            );
            self
        }

        fn follow_err(mut self, url: &str, err: FetchError) -> Self {
            self.follow.insert(url.into(), Err(err));
            self
        }

        fn redirect(mut self, from: &str, to: &str) -> Self {
            self.manual.insert(
                from.into(),
                FetchResponse {
                    final_url: from.into(),
                    status: 301,
                    location: Some(to.into()),
                    ..Default::default()
                },
            );
            self
        }

        /// Answer HEAD for `url` differently from GET
        fn head(mut self, url: &str, response: Result<FetchResponse, FetchError>) -> Self {
            self.head.insert(url.into(), response);
            self
        }

        fn logged(&self, method: Method, redirects: Redirects, url: &str) -> bool {
            self.log
                .lock()
                .iter()
                .any(|(m, r, u)| *m == method && *r == redirects && u == url)
        }

        fn calls(&self) -> usize {
            self.log.lock().len()
        }
    }

    #[async_trait]
    impl HttpFetcher for Routes {
        async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
            self.log
                .lock()
                .push((request.method, request.redirects, request.url.clone()));
            if request.method == Method::Head
                && let Some(response) = self.head.get(&request.url)
            {
                return response.clone();
            }
            match request.redirects {
                Redirects::Follow => self
                    .follow
                    .get(&request.url)
                    .cloned()
                    .unwrap_or_else(|| Err(FetchError::Connect(request.url.clone()))),
                Redirects::Manual => Ok(self.manual.get(&request.url).cloned().unwrap_or(FetchResponse {
                    final_url: request.url.clone(),
                    status: 200,
                    ..Default::default()
                })),
            }
        }
    }

    struct Offline;

    #[async_trait]
    impl Renderer for Offline {
        async fn with_page(&self, _url: &str, timeout: Duration) -> Result<RenderedPage, RenderError> {
            Err(RenderError::NavigationTimeout(timeout))
        }
    }

    struct Rendered(&'static str);

    #[async_trait]
    impl Renderer for Rendered {
        async fn with_page(&self, url: &str, _timeout: Duration) -> Result<RenderedPage, RenderError> {
            Ok(RenderedPage {
                final_url: url.into(),
                markup: self.0.into(),
            })
        }
    }

    fn resolver_with(routes: Routes, renderer: Arc<dyn Renderer>) -> (Resolver, Arc<Routes>) {
        let routes = Arc::new(routes);
        let options = ExtractorOptions {
            fetch_timeout: Duration::from_secs(9),
            render_timeout: Duration::from_secs(15),
        };
        let extractor = Arc::new(MetadataExtractor::new(routes.clone(), renderer, options));
        (
            Resolver::new(routes.clone(), extractor, ResolverOptions::default()),
            routes,
        )
    }

    fn url(raw: &str) -> NormalizedUrl {
        normalizer::normalize(raw).unwrap()
    }

    #[tokio::test]
    async fn ordinary_links_never_touch_the_network() {
        let (resolver, routes) = resolver_with(Routes::default(), Arc::new(Offline));

        let result = resolver.resolve(&url("facebook.com/watch/?v=123456")).await;
        assert_eq!(result.final_url, "https://facebook.com/watch/?v=123456");
        assert_eq!(result.method, ResolutionMethod::Unchanged);
        assert_eq!(result.warning, Some(ResolutionWarning::NoChange));
        assert_eq!(routes.calls(), 0);
    }

    #[tokio::test]
    async fn policy_rejections_are_warnings() {
        let (resolver, routes) = resolver_with(Routes::default(), Arc::new(Offline));

        let private = resolver.resolve(&url("http://192.168.1.5/x")).await;
        assert_eq!(private.warning, Some(ResolutionWarning::PrivateHost));
        let ftp = resolver.resolve(&url("ftp://bit.ly/x")).await;
        assert_eq!(ftp.warning, Some(ResolutionWarning::UnsupportedScheme));
        assert!(!private.is_cacheable() && !ftp.is_cacheable());
        assert_eq!(routes.calls(), 0);
    }

    #[tokio::test]
    async fn auto_follow_result_is_renormalized() {
        let routes = Routes::default().follow(
            "https://bit.ly/abc",
            "https://example.com/article?utm_source=x",
            None,
        );
        let (resolver, routes) = resolver_with(routes, Arc::new(Offline));

        let result = resolver.resolve(&url("https://bit.ly/abc")).await;
        assert_eq!(result.final_url, "https://example.com/article");
        assert_eq!(result.method, ResolutionMethod::Auto);
        assert_eq!(result.warning, None);
        assert_eq!(routes.calls(), 1);
    }

    #[tokio::test]
    async fn manual_hops_record_every_step() {
        let routes = Routes::default()
            .follow_err("https://t.co/x", FetchError::TooManyRedirects("loop".into()))
            .redirect("https://t.co/x", "https://bit.ly/y")
            .redirect("https://bit.ly/y", "/landing");
        let (resolver, _) = resolver_with(routes, Arc::new(Offline));

        let result = resolver.resolve(&url("https://t.co/x")).await;
        assert_eq!(result.method, ResolutionMethod::ManualHops);
        assert_eq!(result.final_url, "https://bit.ly/landing");
        assert_eq!(
            result.hops.as_deref(),
            Some(
                &[
                    "https://t.co/x".to_string(),
                    "https://bit.ly/y".to_string(),
                    "https://bit.ly/landing".to_string(),
                ][..]
            )
        );
        assert_eq!(result.warning, None);
    }

    #[tokio::test]
    async fn refused_head_is_retried_as_get() {
        let refused = FetchResponse {
            final_url: "https://t.co/h".into(),
            status: 405,
            ..Default::default()
        };
        let routes = Routes::default()
            .head("https://t.co/h", Ok(refused))
            .redirect("https://t.co/h", "https://example.com/dest");
        let (resolver, routes) = resolver_with(routes, Arc::new(Offline));

        let result = resolver.resolve(&url("https://t.co/h")).await;
        assert_eq!(result.method, ResolutionMethod::ManualHops);
        assert_eq!(result.final_url, "https://example.com/dest");
        assert_eq!(result.hops.map(|h| h.len()), Some(2));
        assert!(routes.logged(Method::Head, Redirects::Manual, "https://t.co/h"));
        assert!(routes.logged(Method::Get, Redirects::Manual, "https://t.co/h"));
    }

    #[tokio::test]
    async fn failed_head_is_retried_as_get() {
        let routes = Routes::default()
            .head("https://bit.ly/h", Err(FetchError::Timeout("head".into())))
            .redirect("https://bit.ly/h", "https://example.com/dest");
        let (resolver, routes) = resolver_with(routes, Arc::new(Offline));

        let result = resolver.resolve(&url("https://bit.ly/h")).await;
        assert_eq!(result.method, ResolutionMethod::ManualHops);
        assert_eq!(result.final_url, "https://example.com/dest");
        assert!(routes.logged(Method::Get, Redirects::Manual, "https://bit.ly/h"));
    }

    #[tokio::test]
    async fn long_chains_stop_at_the_hop_limit() {
        let mut routes = Routes::default().follow_err(
            "https://tinyurl.com/0",
            FetchError::TooManyRedirects("15".into()),
        );
        for i in 0..15 {
            routes = routes.redirect(
                &format!("https://tinyurl.com/{i}"),
                &format!("https://tinyurl.com/{}", i + 1),
            );
        }
        let (resolver, routes) = resolver_with(routes, Arc::new(Offline));

        let result = resolver.resolve(&url("https://tinyurl.com/0")).await;
        assert_eq!(result.warning, Some(ResolutionWarning::MaxHops));
        assert_eq!(result.final_url, "https://tinyurl.com/10");
        assert_eq!(result.hops.map(|h| h.len()), Some(11));
        assert!(routes.calls() <= 11);
    }

    #[tokio::test]
    async fn share_links_fall_back_to_markup_canonical() {
        let share = "https://www.facebook.com/share/p/AbC123/";
        let routes = Routes::default()
            .follow(share, share, Some("<html>login wall</html>"))
            .follow(
                "https://www.facebook.com/share/p/AbC123/?_fb_noscript=1",
                "https://www.facebook.com/share/p/AbC123/?_fb_noscript=1",
                Some(r#"<meta property="og:url" content="https://www.facebook.com/groups/1/posts/2/">"#),
            );
        let (resolver, _) = resolver_with(routes, Arc::new(Offline));

        let result = resolver.resolve(&url(share)).await;
        assert_eq!(result.method, ResolutionMethod::HtmlCanonical);
        assert_eq!(result.final_url, "https://www.facebook.com/groups/1/posts/2/");
    }

    #[tokio::test]
    async fn rendered_canonical_is_the_last_resort() {
        let share = "https://www.facebook.com/share/v/Zz9/";
        let routes = Routes::default().follow(share, share, Some("<html></html>"));
        let renderer = Arc::new(Rendered(
            r#"<meta property="og:url" content="https://m.facebook.com/watch/?v=77">"#,
        ));
        let (resolver, _) = resolver_with(routes, renderer);

        let result = resolver.resolve(&url(share)).await;
        assert_eq!(result.method, ResolutionMethod::RenderedCanonical);
        assert_eq!(result.final_url, "https://www.facebook.com/watch/?v=77");
    }

    #[tokio::test]
    async fn exhausted_strategies_report_why() {
        let share = "https://www.facebook.com/share/r/Qq1/";
        let (resolver, _) = resolver_with(Routes::default().follow(share, share, None), Arc::new(Rendered("")));
        let result = resolver.resolve(&url(share)).await;
        assert_eq!(result.method, ResolutionMethod::Unchanged);
        assert_eq!(result.final_url, share);
        assert_eq!(result.warning, Some(ResolutionWarning::NetworkFailed), "variant fetches failed");

        let (resolver, _) = resolver_with(Routes::default(), Arc::new(Offline));
        let result = resolver.resolve(&url("https://fb.me/e")).await;
        assert_eq!(result.warning, Some(ResolutionWarning::NetworkFailed));
        assert!(!result.is_cacheable());
    }

    #[test]
    fn redirect_prone_detection() {
        let (resolver, _) = resolver_with(Routes::default(), Arc::new(Offline));
        assert!(resolver.is_redirect_prone(&url("https://bit.ly/x")));
        assert!(resolver.is_redirect_prone(&url("https://www.t.co/x")));
        assert!(resolver.is_redirect_prone(&url("https://www.facebook.com/share/p/AbC/")));
        assert!(resolver.is_redirect_prone(&url("https://facebook.com/share/1Ab2/")));
        assert!(!resolver.is_redirect_prone(&url("https://notbit.ly/x")));
        assert!(!resolver.is_redirect_prone(&url("https://www.facebook.com/groups/1/")));
    }

    #[test]
    fn variants_cover_noscript_and_mobile_hosts() {
        let variants: Vec<String> = page_variants(&Url::parse("https://www.facebook.com/share/p/A/").unwrap())
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            variants,
            [
                "https://www.facebook.com/share/p/A/",
                "https://www.facebook.com/share/p/A/?_fb_noscript=1",
                "https://m.facebook.com/share/p/A/",
                "https://mbasic.facebook.com/share/p/A/",
            ]
        );
    }

    #[test]
    fn result_json_shape() {
        let result = ResolutionResult {
            final_url: "https://example.com/".into(),
            method: ResolutionMethod::ManualHops,
            hops: Some(vec!["https://t.co/a".into()]),
            warning: Some(ResolutionWarning::MaxHops),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["finalUrl"], "https://example.com/");
        assert_eq!(json["method"], "manual-hops");
        assert_eq!(json["warning"], "max-hops");
    }
}
