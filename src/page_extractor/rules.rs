//! Ordered extraction rules
//!
//! Canonical-URL discovery is a priority list of named rules where the first
//! match wins. Preview fields prefer Open Graph over Twitter card tags.

use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use super::html::{self, TagKind};

/// A single canonical-URL extraction strategy
pub struct CanonicalRule {
    pub name: &'static str,
    find: fn(&str) -> Option<String>,
}

impl CanonicalRule {
    /// Raw candidate as it appears in the markup, before joining against the page URL
    pub fn find(&self, markup: &str) -> Option<String> {
        (self.find)(markup)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalMatch {
    pub rule: &'static str,
    pub url: Url,
}

pub static CANONICAL_RULES: &[CanonicalRule] = &[
    CanonicalRule { name: "og-url", find: og_url },
    CanonicalRule { name: "link-canonical", find: link_canonical },
    CanonicalRule { name: "meta-refresh", find: meta_refresh },
    CanonicalRule { name: "json-canonical", find: json_canonical },
    CanonicalRule { name: "script-location", find: script_location },
    CanonicalRule { name: "facebook-permalink", find: facebook_permalink },
    CanonicalRule { name: "link-shim", find: link_shim },
];

/// First rule whose candidate parses as an http(s) URL relative to `base`
pub fn pick_canonical(markup: &str, base: &Url) -> Option<CanonicalMatch> {
    if markup.is_empty() {
        return None;
    }
    CANONICAL_RULES.iter().find_map(|rule| {
        let raw = rule.find(markup)?;
        let url = base.join(&raw).ok()?;
        matches!(url.scheme(), "http" | "https").then_some(CanonicalMatch {
            rule: rule.name,
            url,
        })
    })
}

fn meta_content(markup: &str, key: &str) -> Option<String> {
    html::tags(markup)
        .find(|tag| tag.meta_key().as_deref() == Some(key) && tag.non_empty("content").is_some())
        .and_then(|tag| tag.non_empty("content").map(str::to_string))
}

fn og_url(markup: &str) -> Option<String> {
    meta_content(markup, "og:url")
}

fn link_canonical(markup: &str) -> Option<String> {
    html::tags(markup)
        .filter(|tag| tag.kind == TagKind::Link)
        .find(|tag| {
            tag.attr("rel").is_some_and(|rel| {
                rel.split_ascii_whitespace()
                    .any(|r| r.eq_ignore_ascii_case("canonical"))
            }) && tag.non_empty("href").is_some()
        })
        .and_then(|tag| tag.non_empty("href").map(str::to_string))
}

static REFRESH_TARGET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)url\s*=\s*['"]?([^'";\s]+)"#).expect("valid refresh pattern")
});

fn meta_refresh(markup: &str) -> Option<String> {
    html::tags(markup)
        .filter(|tag| tag.kind == TagKind::Meta)
        .filter(|tag| {
            tag.attr("http-equiv")
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("refresh"))
        })
        .find_map(|tag| {
            let content = tag.attr("content")?;
            REFRESH_TARGET_RE
                .captures(content)
                .map(|caps| caps[1].to_string())
        })
}

static JSON_CANONICAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)"canonical"\s*:\s*"([^"]+facebook\.com[^"]+)""#).expect("valid json pattern")
});

fn json_canonical(markup: &str) -> Option<String> {
    JSON_CANONICAL_RE
        .captures(markup)
        .map(|caps| unescape_js(&caps[1]))
}

static SCRIPT_LOCATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)location\.(?:href\s*=\s*|replace\(\s*)["'](https?:(?:\\?/){2}[^"']*facebook\.com[^"']*)["']"#,
    )
    .expect("valid script pattern")
});

fn script_location(markup: &str) -> Option<String> {
    SCRIPT_LOCATION_RE
        .captures(markup)
        .map(|caps| unescape_js(&caps[1]))
}

static FACEBOOK_PERMALINK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)https?://(?:www|m|mbasic)\.facebook\.com/(?:watch/?\?v=\d+|videos/\d+|reel/[A-Za-z0-9]+|permalink\.php\?[^"'<\s]+|story\.php\?[^"'<\s]+|photo/?\?fbid=\d+|[A-Za-z0-9.]+/(?:posts|videos)/[A-Za-z0-9]+)"#,
    )
    .expect("valid permalink pattern")
});

fn facebook_permalink(markup: &str) -> Option<String> {
    FACEBOOK_PERMALINK_RE
        .find(markup)
        .map(|m| html::decode_entities(m.as_str()))
}

static LINK_SHIM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)https?://l\.facebook\.com/l\.php\?[^"'<>]*\bu=([^&"'<>]+)"#)
        .expect("valid link shim pattern")
});

fn link_shim(markup: &str) -> Option<String> {
    let caps = LINK_SHIM_RE.captures(markup)?;
    urlencoding::decode(&caps[1]).ok().map(|s| s.into_owned())
}

/// Undo the escaping found in inline JSON and script string literals
fn unescape_js(raw: &str) -> String {
    raw.replace("\\/", "/").replace("\\u0025", "%").replace("\\u0026", "&")
}

/// Raw preview fields found in a document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaFields {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    /// `og:url` as declared by the page, if any
    pub url: Option<String>,
}

/// Collect OG fields, falling back to Twitter card tags, then plain
/// `description` and `<title>`
pub fn meta_fields(markup: &str) -> MetaFields {
    #[derive(Default)]
    struct Slots {
        og_title: Option<String>,
        tw_title: Option<String>,
        og_description: Option<String>,
        tw_description: Option<String>,
        plain_description: Option<String>,
        og_image: Option<String>,
        tw_image: Option<String>,
        og_url: Option<String>,
    }

    let mut slots = Slots::default();
    for tag in html::tags(markup) {
        let Some(key) = tag.meta_key() else { continue };
        let slot = match key.as_str() {
            "og:title" => &mut slots.og_title,
            "twitter:title" => &mut slots.tw_title,
            "og:description" => &mut slots.og_description,
            "twitter:description" => &mut slots.tw_description,
            "description" => &mut slots.plain_description,
            "og:image" | "og:image:url" | "og:image:secure_url" => &mut slots.og_image,
            "twitter:image" | "twitter:image:src" => &mut slots.tw_image,
            "og:url" => &mut slots.og_url,
            _ => continue,
        };
        if slot.is_none() {
            *slot = tag.non_empty("content").map(str::to_string);
        }
    }

    MetaFields {
        title: slots
            .og_title
            .or(slots.tw_title)
            .or_else(|| html::document_title(markup)),
        description: slots
            .og_description
            .or(slots.tw_description)
            .or(slots.plain_description),
        image: slots.og_image.or(slots.tw_image),
        url: slots.og_url,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.facebook.com/share/p/AbC123/").unwrap()
    }

    fn rule_for(markup: &str) -> Option<(&'static str, String)> {
        pick_canonical(markup, &base()).map(|m| (m.rule, m.url.to_string()))
    }

    #[test]
    fn rules_are_tried_in_priority_order() {
        let markup = r#"
            <link rel="canonical" href="https://example.com/from-link">
            <meta property="og:url" content="https://example.com/from-og">
        "#;
        assert_eq!(
            rule_for(markup),
            Some(("og-url", "https://example.com/from-og".into()))
        );
    }

    #[test]
    fn link_canonical_accepts_multi_token_rel() {
        let markup = r#"<link href="/groups/1/posts/2" rel="alternate canonical">"#;
        assert_eq!(
            rule_for(markup),
            Some((
                "link-canonical",
                "https://www.facebook.com/groups/1/posts/2".into()
            ))
        );
    }

    #[test]
    fn meta_refresh_target_is_joined_against_base() {
        let markup = r#"<meta http-equiv="refresh" content="0; URL='/story.php?id=9'">"#;
        assert_eq!(
            rule_for(markup),
            Some(("meta-refresh", "https://www.facebook.com/story.php?id=9".into()))
        );
    }

    #[test]
    fn json_canonical_is_unescaped() {
        let markup = r#"{"canonical":"https:\/\/www.facebook.com\/reel\/42"}"#;
        assert_eq!(
            rule_for(markup),
            Some(("json-canonical", "https://www.facebook.com/reel/42".into()))
        );
    }

    #[test]
    fn script_redirects_are_detected() {
        let markup = r#"<script>window.location.replace("https:\/\/m.facebook.com\/watch\/?v=7");</script>"#;
        assert_eq!(
            rule_for(markup),
            Some(("script-location", "https://m.facebook.com/watch/?v=7".into()))
        );
    }

    #[test]
    fn permalink_heuristic_matches_known_shapes() {
        let markup = r#"<a href="https://www.facebook.com/permalink.php?story_fbid=1&amp;id=2">x</a>"#;
        assert_eq!(
            rule_for(markup),
            Some((
                "facebook-permalink",
                "https://www.facebook.com/permalink.php?story_fbid=1&id=2".into()
            ))
        );
    }

    #[test]
    fn link_shim_target_is_decoded() {
        let markup = r#"<a href="https://l.facebook.com/l.php?u=https%3A%2F%2Fexample.org%2Fpost&h=AT0">"#;
        assert_eq!(
            rule_for(markup),
            Some(("link-shim", "https://example.org/post".into()))
        );
    }

    #[test]
    fn non_http_candidates_are_skipped() {
        let markup = r#"<meta property="og:url" content="javascript:alert(1)">
                        <link rel="canonical" href="https://example.com/ok">"#;
        assert_eq!(
            rule_for(markup),
            Some(("link-canonical", "https://example.com/ok".into()))
        );
        assert_eq!(pick_canonical("", &base()), None);
        assert_eq!(pick_canonical("<p>nothing</p>", &base()), None);
    }

    #[test]
    fn og_fields_win_over_twitter_and_title() {
        let markup = r#"
            <title>Document</title>
            <meta name="twitter:title" content="Tweet title">
            <meta property="og:title" content="OG title">
            <meta name="twitter:description" content="Tweet desc">
            <meta name="twitter:image" content="https://cdn.example/t.png">
            <meta property="og:image" content="">
        "#;
        let fields = meta_fields(markup);
        assert_eq!(fields.title.as_deref(), Some("OG title"));
        assert_eq!(fields.description.as_deref(), Some("Tweet desc"));
        assert_eq!(fields.image.as_deref(), Some("https://cdn.example/t.png"));
        assert_eq!(fields.url, None);
    }

    #[test]
    fn document_title_is_last_resort() {
        let fields = meta_fields("<html><head><title>Only title</title></head></html>");
        assert_eq!(fields.title.as_deref(), Some("Only title"));
        assert_eq!(meta_fields("<html><body>bare</body></html>"), MetaFields::default());
    }
}
