//! Evasions injected into every page before its own scripts run
//!
//! Covers the automation tells that login walls and bot checks look at first:
//! `navigator.webdriver`, an empty plugin list and languages that disagree
//! with the `Accept-Language` header.

/// Build the init script for pages opened with `accept_language`
pub fn stealth_script(accept_language: &str) -> String {
    let languages = serde_json::to_string(&navigator_languages(accept_language))
        .unwrap_or_else(|_| r#"["en-US"]"#.to_string());
    format!(
        r#"(() => {{
  const define = (target, name, value) =>
    Object.defineProperty(target, name, {{ get: () => value, configurable: true }});
  define(Navigator.prototype, 'webdriver', undefined);
  define(Navigator.prototype, 'languages', Object.freeze({languages}));
  if (navigator.plugins.length === 0) {{
    const plugins = ['PDF Viewer', 'Chrome PDF Viewer', 'Chromium PDF Viewer'].map((name) => ({{
      name,
      filename: 'internal-pdf-viewer',
      description: 'Portable Document Format',
      length: 1,
    }}));
    plugins.item = (i) => plugins[i] || null;
    plugins.namedItem = (n) => plugins.find((p) => p.name === n) || null;
    plugins.refresh = () => {{}};
    define(Navigator.prototype, 'plugins', plugins);
  }}
}})();"#
    )
}

/// `en-US,en;q=0.9` -> `["en-US", "en"]`, in header order
fn navigator_languages(accept_language: &str) -> Vec<&str> {
    let tags: Vec<&str> = accept_language
        .split(',')
        .filter_map(|part| part.split(';').next())
        .map(str::trim)
        .filter(|tag| !tag.is_empty() && *tag != "*")
        .collect();
    if tags.is_empty() { vec!["en-US"] } else { tags }
}
