use std::net::IpAddr;
use thiserror::Error;
use url::{Host, Url};

/// Errors that can occur during URL validation.
///
/// These errors cover both parsing failures and the host policy that keeps
/// subscriptions from pointing the poller at internal services.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme other than http or https.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validates a URL string for use as a feed subscription.
///
/// Always rejects unparseable URLs, non-HTTP(S) schemes and URLs without a
/// host. Unless `allow_private` is set, also rejects:
/// - Localhost addresses (`localhost`, `127.0.0.1`, `::1`)
/// - Private IP ranges (RFC 1918, link-local, unique local IPv6)
///
/// `allow_private` exists for self-hosted setups (and tests) that poll feeds
/// on the local network.
///
/// # Examples
///
/// ```
/// use gator::util::validate_feed_url;
///
/// let url = validate_feed_url("https://example.com/feed.xml", false).unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_feed_url("http://localhost/feed", false).is_err());
/// assert!(validate_feed_url("http://localhost/feed", true).is_ok());
/// assert!(validate_feed_url("file:///etc/passwd", true).is_err());
/// ```
pub fn validate_feed_url(url_str: &str, allow_private: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => return Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }

    let host = url
        .host()
        .map(|h| h.to_owned())
        .ok_or(UrlValidationError::MissingHost)?;
    if allow_private {
        return Ok(url);
    }

    let ip = match host {
        Host::Domain(name) if name.eq_ignore_ascii_case("localhost") => {
            return Err(UrlValidationError::Localhost)
        }
        Host::Domain(_) => return Ok(url),
        Host::Ipv4(v4) => IpAddr::V4(v4),
        Host::Ipv6(v6) => IpAddr::V6(v6),
    };
    if ip.is_loopback() {
        return Err(UrlValidationError::Localhost);
    }
    if is_internal(ip) {
        return Err(UrlValidationError::PrivateIp(ip.to_string()));
    }

    Ok(url)
}

/// RFC 1918, link-local, unspecified, and IPv6 unique-local (fc00::/7)
/// or link-local (fe80::/10).
fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_unspecified() || first & 0xfe00 == 0xfc00 || first & 0xffc0 == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_urls_accepted() {
        assert!(validate_feed_url("https://example.com/feed.xml", false).is_ok());
        assert!(validate_feed_url("http://news.example.org", false).is_ok());
        assert!(validate_feed_url("https://example.com:443/feed.xml", false).is_ok());
    }

    #[test]
    fn test_surrounding_whitespace_ignored() {
        let url = validate_feed_url("  https://example.com/rss \n", false).unwrap();
        assert_eq!(url.as_str(), "https://example.com/rss");
    }

    #[test]
    fn test_invalid_schemes_rejected_even_when_private_allowed() {
        for allow in [false, true] {
            assert!(matches!(
                validate_feed_url("file:///etc/passwd", allow),
                Err(UrlValidationError::UnsupportedScheme(_))
            ));
            assert!(validate_feed_url("ftp://example.com", allow).is_err());
        }
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            validate_feed_url("not a url", true),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_localhost_rejected() {
        assert!(matches!(
            validate_feed_url("http://localhost/feed", false),
            Err(UrlValidationError::Localhost)
        ));
        assert!(validate_feed_url("http://127.0.0.1/feed", false).is_err());
        assert!(validate_feed_url("http://[::1]/feed", false).is_err());
    }

    #[test]
    fn test_private_ips_rejected() {
        assert!(validate_feed_url("http://192.168.1.1/feed", false).is_err());
        assert!(validate_feed_url("http://10.0.0.1:3000/feed", false).is_err());
        assert!(validate_feed_url("http://172.16.0.1/feed", false).is_err());
        assert!(validate_feed_url("http://169.254.1.1/feed", false).is_err());
        assert!(validate_feed_url("http://[fe80::1]/feed", false).is_err());
        assert!(validate_feed_url("http://0.0.0.0/feed", false).is_err());
    }

    #[test]
    fn test_private_allowed_when_opted_in() {
        assert!(validate_feed_url("http://127.0.0.1:8080/feed", true).is_ok());
        assert!(validate_feed_url("http://192.168.1.1/feed", true).is_ok());
    }
}
