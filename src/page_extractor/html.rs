//! Lightweight `<meta>`/`<link>` scanner
//!
//! Preview extraction only needs head tags and a handful of inline script
//! patterns, so markup is scanned with regexes instead of a DOM parser.

use once_cell::sync::Lazy;
use regex::Regex;

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<(meta|link)\b([^>]*)>").expect("valid tag pattern"));

static ATTR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
        .expect("valid attribute pattern")
});

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title\b[^>]*>(.*?)</title>").expect("valid title pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKind {
    Meta,
    Link,
}

/// A head tag with lowercased attribute names and decoded values
#[derive(Debug, Clone)]
pub struct Tag {
    pub kind: TagKind,
    attrs: Vec<(String, String)>,
}

impl Tag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `property` or `name`, lowercased, for meta tags
    pub fn meta_key(&self) -> Option<String> {
        if self.kind != TagKind::Meta {
            return None;
        }
        self.attr("property")
            .or_else(|| self.attr("name"))
            .map(|key| key.trim().to_ascii_lowercase())
    }

    /// Trimmed, non-empty attribute value
    pub fn non_empty(&self, name: &str) -> Option<&str> {
        self.attr(name).map(str::trim).filter(|v| !v.is_empty())
    }
}

pub fn tags(markup: &str) -> impl Iterator<Item = Tag> + '_ {
    TAG_RE.captures_iter(markup).map(|caps| {
        let kind = if caps[1].eq_ignore_ascii_case("meta") {
            TagKind::Meta
        } else {
            TagKind::Link
        };
        let attrs = ATTR_RE
            .captures_iter(&caps[2])
            .map(|attr| {
                let value = attr
                    .get(2)
                    .or_else(|| attr.get(3))
                    .or_else(|| attr.get(4))
                    .map_or("", |m| m.as_str());
                (attr[1].to_ascii_lowercase(), decode_entities(value))
            })
            .collect();
        Tag { kind, attrs }
    })
}

/// Text of the first `<title>` element, whitespace-collapsed
pub fn document_title(markup: &str) -> Option<String> {
    let raw = TITLE_RE.captures(markup)?.get(1)?.as_str();
    let text = decode_entities(raw)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    (!text.is_empty()).then_some(text)
}

/// Decode character references, leaving unknown ones as written
pub fn decode_entities(input: &str) -> String {
    html_escape::decode_html_entities(input).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scans_meta_and_link_tags_with_any_quoting() {
        let markup = r#"
            <META Property="og:title" content='Hello &amp; welcome'>
            <meta name=twitter:image content=https://cdn.example/x.png />
            <link rel="canonical" href="https://example.com/a">
            <script>var x = "<meta property='og:fake'>";</script>
        "#;
        let found: Vec<Tag> = tags(markup).collect();
        assert_eq!(found.len(), 4);
        assert_eq!(found[0].meta_key().as_deref(), Some("og:title"));
        assert_eq!(found[0].attr("content"), Some("Hello & welcome"));
        assert_eq!(found[1].meta_key().as_deref(), Some("twitter:image"));
        assert_eq!(found[1].attr("content"), Some("https://cdn.example/x.png"));
        assert_eq!(found[2].kind, TagKind::Link);
        assert_eq!(found[2].meta_key(), None);
        assert_eq!(found[2].attr("HREF"), Some("https://example.com/a"));
    }

    #[test]
    fn document_title_collapses_whitespace() {
        let markup = "<head><title>\n  Line one\n   &quot;two&quot; </title></head>";
        assert_eq!(document_title(markup).as_deref(), Some("Line one \"two\""));
        assert_eq!(document_title("<title>   </title>"), None);
        assert_eq!(document_title("<p>no title</p>"), None);
    }

    #[test]
    fn decodes_numeric_and_named_entities() {
        assert_eq!(decode_entities("a&#39;b&#x2F;c&lt;d"), "a'b/c<d");
        assert_eq!(decode_entities("Caf&eacute; &copy; &euro;5"), "Caf\u{e9} \u{a9} \u{20ac}5");
        assert_eq!(decode_entities("&zzq;"), "&zzq;");
        assert_eq!(decode_entities("plain"), "plain");
    }
}
