//! Preview metadata extraction from page markup
//!
//! Pure functions over a document string. The same rules serve plain
//! fetches and rendered pages.

pub mod html;
pub mod rules;

pub use rules::{CANONICAL_RULES, CanonicalMatch, CanonicalRule, MetaFields, pick_canonical};

use serde::{Deserialize, Serialize};
use url::Url;

/// Link preview served to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviewMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Always absolute when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub url: String,
}

impl PreviewMetadata {
    /// "No preview available" for `url`
    pub fn empty(url: impl Into<String>) -> Self {
        Self {
            title: None,
            description: None,
            image: None,
            url: url.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.description.is_none() && self.image.is_none()
    }

    pub fn has_image(&self) -> bool {
        self.image.as_deref().is_some_and(|img| !img.is_empty())
    }
}

/// Fields scanned from one document, before fallbacks are applied
#[derive(Debug, Clone)]
pub struct ScannedPage {
    pub fields: MetaFields,
    pub page_url: Url,
}

impl ScannedPage {
    /// True when the page declared a title, an image or an `og:url`
    pub fn has_core_fields(&self) -> bool {
        self.fields.title.is_some() || self.fields.image.is_some() || self.fields.url.is_some()
    }

    pub fn into_preview(self) -> PreviewMetadata {
        let ScannedPage { fields, page_url } = self;
        let url = fields
            .url
            .as_deref()
            .and_then(|declared| absolute_http(&page_url, declared))
            .unwrap_or_else(|| page_url.to_string());
        PreviewMetadata {
            title: fields.title,
            description: fields.description,
            image: fields
                .image
                .as_deref()
                .and_then(|img| absolute_http(&page_url, img)),
            url,
        }
    }
}

/// Scan `markup` served from `page_url`
pub fn scan(markup: &str, page_url: &Url) -> ScannedPage {
    ScannedPage {
        fields: rules::meta_fields(markup),
        page_url: page_url.clone(),
    }
}

fn absolute_http(base: &Url, candidate: &str) -> Option<String> {
    let url = base.join(candidate.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page() -> Url {
        Url::parse("https://news.example/story/1").unwrap()
    }

    #[test]
    fn relative_images_become_absolute() {
        let markup = r#"<meta property="og:title" content="T">
                        <meta property="og:image" content="/img/cover.jpg">"#;
        let preview = scan(markup, &page()).into_preview();
        assert_eq!(preview.image.as_deref(), Some("https://news.example/img/cover.jpg"));
        assert_eq!(preview.url, "https://news.example/story/1");
        assert!(preview.has_image());
    }

    #[test]
    fn declared_url_wins_over_page_url() {
        let markup = r#"<meta property="og:url" content="https://news.example/canonical">"#;
        let scanned = scan(markup, &page());
        assert!(scanned.has_core_fields());
        let preview = scanned.into_preview();
        assert_eq!(preview.url, "https://news.example/canonical");
        assert!(preview.is_empty());
    }

    #[test]
    fn data_uri_images_are_dropped() {
        let markup = r#"<meta property="og:image" content="data:image/png;base64,AAAA">"#;
        let preview = scan(markup, &page()).into_preview();
        assert_eq!(preview.image, None);
        assert!(!preview.has_image());
    }

    #[test]
    fn bare_documents_have_no_core_fields() {
        let scanned = scan("<html><body><p>hi</p></body></html>", &page());
        assert!(!scanned.has_core_fields());
        assert!(scanned.into_preview().is_empty());
    }

    #[test]
    fn empty_fields_are_omitted_from_json() {
        let json = serde_json::to_string(&PreviewMetadata::empty("https://a.example/")).unwrap();
        assert_eq!(json, r#"{"url":"https://a.example/"}"#);
    }
}
