//! Redirect URI resolution.
//!
//! Development builds and some mobile runtimes report a redirect URI bound to
//! the device's current LAN address (`exp://192.168.1.20:8081`). Identity
//! providers cannot be pre-registered for such addresses, so the callback is
//! never delivered. [`resolve_redirect_uri`] swaps those for the configured
//! stable proxy URI.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use url::{Host, Url};

use crate::error::Error;

/// Whether a provider could be registered to redirect to `uri`.
#[must_use]
pub fn is_stable_redirect(uri: &Url) -> bool {
    // Custom schemes (`myapp://redirect`, `com.example.app:/oauth2redirect`) are
    // claimed by the installed app, not resolved over the network.
    if !matches!(uri.scheme(), "http" | "https" | "exp" | "exps") {
        return true;
    }
    match uri.host() {
        None => false,
        Some(Host::Ipv4(ip)) => !is_ephemeral_ip(IpAddr::V4(ip)),
        Some(Host::Ipv6(ip)) => !is_ephemeral_ip(IpAddr::V6(ip)),
        // Non-special schemes such as `exp` report IP literals as opaque domains.
        Some(Host::Domain(domain)) => {
            if let Ok(ip) = domain.parse::<IpAddr>() {
                return !is_ephemeral_ip(ip);
            }
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain != "localhost"
                && !domain.ends_with(".localhost")
                && !domain.ends_with(".local")
                && !domain.ends_with(".lan")
                && domain.contains('.')
        }
    }
}

fn is_ephemeral_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_ephemeral_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_ephemeral_v4(v4),
            None => is_ephemeral_v6(v6),
        },
    }
}

fn is_ephemeral_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0xc0) == 64)
}

fn is_ephemeral_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
}

/// Picks the redirect URI to send to the identity provider.
///
/// Returns `platform_uri` when it is stable, otherwise `proxy`.
///
/// # Errors
///
/// Returns [`Error::Config`] when the platform URI is not routable and no
/// proxy is configured, since the callback could never arrive.
pub fn resolve_redirect_uri(platform_uri: &Url, proxy: Option<&Url>) -> Result<Url, Error> {
    if is_stable_redirect(platform_uri) {
        return Ok(platform_uri.clone());
    }
    match proxy {
        Some(proxy) if is_stable_redirect(proxy) => {
            tracing::debug!(
                platform = %platform_uri,
                proxy = %proxy,
                "Substituting proxy redirect URI for non-routable platform URI"
            );
            Ok(proxy.clone())
        }
        Some(proxy) => Err(Error::Config(format!(
            "proxy redirect URI {proxy} is not publicly routable"
        ))),
        None => Err(Error::Config(format!(
            "redirect URI {platform_uri} is not routable and no proxy redirect URI is configured"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        s.parse().unwrap()
    }

    #[test]
    fn stable_uris_are_kept() {
        for uri in [
            "https://auth.example.com/@me/journal",
            "com.example.journal:/oauth2redirect",
            "myapp://redirect",
        ] {
            let resolved = resolve_redirect_uri(&url(uri), None).unwrap();
            assert_eq!(resolved.as_str(), url(uri).as_str(), "{uri}");
        }
    }

    #[test]
    fn lan_and_loopback_uris_use_proxy() {
        let proxy = url("https://auth.example.com/@me/journal");
        for uri in [
            "exp://192.168.1.20:8081",
            "exp://10.0.0.5:19000",
            "http://localhost:8081/callback",
            "http://127.0.0.1:8081",
            "http://[::1]:8081",
            "http://[fe80::1]:8081",
            "exp://devbox.local:8081",
            "http://100.72.3.4/callback",
        ] {
            let resolved = resolve_redirect_uri(&url(uri), Some(&proxy)).unwrap();
            assert_eq!(resolved, proxy, "{uri}");
        }
    }

    #[test]
    fn missing_proxy_is_a_config_error() {
        let err = resolve_redirect_uri(&url("exp://192.168.1.20:8081"), None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn unroutable_proxy_is_rejected() {
        let err = resolve_redirect_uri(
            &url("exp://192.168.1.20:8081"),
            Some(&url("http://localhost/proxy")),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn public_ip_is_stable() {
        assert!(is_stable_redirect(&url("https://203.0.113.10/callback")));
    }
}
