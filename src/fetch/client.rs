use async_trait::async_trait;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, LOCATION, REFERER, USER_AGENT};
use reqwest::redirect::Policy;
use tracing::{debug, trace};

use super::{FetchError, FetchRequest, FetchResponse, HeaderProfile, HttpFetcher, Method, Redirects};
use crate::utils::constants::{
    ACCEPT_HTML, ACCEPT_LANGUAGE as DEFAULT_LANGUAGE, MAX_REDIRECT_HOPS, MOBILE_USER_AGENT,
    RESOLVE_REFERER, RESOLVE_USER_AGENT,
};

/// Bodies beyond this size are truncated before pattern matching
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// [`HttpFetcher`] over two reqwest clients, one per redirect policy
#[derive(Debug, Clone)]
pub struct ReqwestFetcher {
    follow: reqwest::Client,
    manual: reqwest::Client,
    accept_language: String,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, FetchError> {
        Self::with_language(DEFAULT_LANGUAGE)
    }

    pub fn with_language(accept_language: impl Into<String>) -> Result<Self, FetchError> {
        let build = |policy: Policy| {
            reqwest::Client::builder()
                .redirect(policy)
                .build()
                .map_err(|e| FetchError::Other(format!("failed to build HTTP client: {e}")))
        };
        Ok(Self {
            follow: build(Policy::limited(MAX_REDIRECT_HOPS))?,
            manual: build(Policy::none())?,
            accept_language: accept_language.into(),
        })
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let client = match request.redirects {
            Redirects::Follow => &self.follow,
            Redirects::Manual => &self.manual,
        };
        let mut builder = match request.method {
            Method::Head => client.head(&request.url),
            Method::Get => client.get(&request.url),
        }
        .timeout(request.timeout)
        .header(ACCEPT_LANGUAGE, &self.accept_language);

        builder = match (request.profile, request.method) {
            (HeaderProfile::Resolver, Method::Head) => builder
                .header(USER_AGENT, RESOLVE_USER_AGENT)
                .header(ACCEPT, "*/*"),
            (HeaderProfile::Resolver, Method::Get) => builder
                .header(USER_AGENT, RESOLVE_USER_AGENT)
                .header(ACCEPT, ACCEPT_HTML)
                .header("upgrade-insecure-requests", "1")
                .header(REFERER, RESOLVE_REFERER),
            (HeaderProfile::Browser, _) => builder
                .header(USER_AGENT, MOBILE_USER_AGENT)
                .header(ACCEPT, ACCEPT_HTML)
                .header("upgrade-insecure-requests", "1"),
        };

        trace!(url = %request.url, method = ?request.method, redirects = ?request.redirects, "Sending request");
        let response = builder.send().await.map_err(classify)?;

        let final_url = response.url().to_string();
        let status = response.status().as_u16();
        let location = header_string(&response, LOCATION);
        let content_type = header_string(&response, CONTENT_TYPE);

        let wants_body = request.method == Method::Get
            && content_type
                .as_deref()
                .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"));
        let body = if wants_body {
            let bytes = read_capped(response, MAX_BODY_BYTES).await?;
            Some(String::from_utf8_lossy(&bytes).into_owned())
        } else {
            None
        };

        debug!(url = %request.url, %final_url, status, "Response received");
        Ok(FetchResponse {
            final_url,
            status,
            location,
            content_type,
            body,
        })
    }
}

/// Read at most `limit` body bytes, dropping the connection past that
async fn read_capped(mut response: reqwest::Response, limit: usize) -> Result<Vec<u8>, FetchError> {
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(classify)? {
        let room = limit - buf.len();
        if chunk.len() >= room {
            buf.extend_from_slice(&chunk[..room]);
            trace!(limit, "Body truncated at size limit");
            break;
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn classify(e: reqwest::Error) -> FetchError {
    let message = e.to_string();
    if e.is_timeout() {
        FetchError::Timeout(message)
    } else if e.is_redirect() {
        FetchError::TooManyRedirects(message)
    } else if e.is_connect() {
        FetchError::Connect(message)
    } else if e.is_builder() {
        FetchError::InvalidUrl(message)
    } else if e.is_body() || e.is_decode() {
        FetchError::Body(message)
    } else {
        FetchError::Other(message)
    }
}
