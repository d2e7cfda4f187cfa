//! Lexical host policy
//!
//! Decided from the URL text alone; no DNS lookups happen here.

use std::net::{Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

pub fn is_supported_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// True for loopback, RFC1918, link-local and unspecified addresses, and `localhost`
pub fn is_private_host(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => is_private_ipv4(ip),
        Some(Host::Ipv6(ip)) => is_private_ipv6(ip),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        None => false,
    }
}

fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00 // unique local fc00::/7
        || (first & 0xffc0) == 0xfe80 // link local fe80::/10
}

#[cfg(test)]
mod tests {
    use super::*;

    fn private(raw: &str) -> bool {
        is_private_host(&Url::parse(raw).unwrap())
    }

    #[test]
    fn flags_private_and_loopback_hosts() {
        for raw in [
            "http://127.0.0.1/x",
            "http://127.8.0.1/",
            "http://192.168.1.5/x",
            "http://10.0.0.8/",
            "http://172.16.4.4/",
            "http://172.31.255.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://0.0.0.0/",
            "http://localhost:3000/",
            "http://api.localhost/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[::ffff:192.168.0.1]/",
            "http://2130706433/",
        ] {
            assert!(private(raw), "{raw} should be private");
        }
    }

    #[test]
    fn allows_public_hosts() {
        for raw in [
            "https://www.facebook.com/",
            "http://172.32.0.1/",
            "http://8.8.8.8/",
            "https://[2001:4860:4860::8888]/",
            "https://localhost.example.com/",
        ] {
            assert!(!private(raw), "{raw} should be public");
        }
    }

    #[test]
    fn only_http_and_https_are_supported() {
        assert!(is_supported_scheme(&Url::parse("https://a.com").unwrap()));
        assert!(is_supported_scheme(&Url::parse("http://a.com").unwrap()));
        assert!(!is_supported_scheme(&Url::parse("ftp://a.com").unwrap()));
        assert!(!is_supported_scheme(&Url::parse("file:///etc/passwd").unwrap()));
    }
}
