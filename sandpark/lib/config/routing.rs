//! Host-based routing.
//!
//! Instances are reachable through the playground domain via a URL-encoded
//! host+port scheme: `ip10-0-12-3-8080.play.example.com` routes to port 8080
//! of the instance holding `10.0.12.3` on its session overlay, and
//! `pwdnode1-abcdefgh.play.example.com` routes by instance alias within
//! session `abcdefgh`.

use std::sync::LazyLock;

use regex::Regex;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Matches `ip<A>-<B>-<C>-<D>(-<port>)?` hostnames.
pub static IP_HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*ip([0-9]{1,3}-[0-9]{1,3}-[0-9]{1,3}-[0-9]{1,3})(?:-?([0-9]{1,5}))?(?:\..*)?$")
        .unwrap()
});

/// Matches `pwd<alias>-<sessionId>(-<port>)?` hostnames.
pub static ALIAS_HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.*pwd([0-9a-zA-Z-]*)-([0-9a-z]{8})(?:-?([0-9]{1,5}))?\..*$").unwrap()
});

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A route extracted from an HTTP `Host` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRoute {
    /// How the target instance is addressed.
    pub target: RouteTarget,

    /// The port requested on the instance, when present.
    pub port: Option<u16>,
}

/// The addressing mode of a [`HostRoute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTarget {
    /// Addressed by the instance's overlay IP.
    Ip(String),

    /// Addressed by instance alias within a session.
    Alias {
        /// The instance alias.
        name: String,

        /// The 8-character session id.
        session_id: String,
    },
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Extracts a [`HostRoute`] from a `Host` header value, trying the IP form
/// first and the alias form second. Returns `None` for hosts that address the
/// service itself.
pub fn parse_host(host: &str) -> Option<HostRoute> {
    if let Some(caps) = IP_HOST_PATTERN.captures(host) {
        let ip = caps.get(1)?.as_str().replace('-', ".");
        let port = caps.get(2).and_then(|p| p.as_str().parse().ok());
        return Some(HostRoute {
            target: RouteTarget::Ip(ip),
            port,
        });
    }

    if let Some(caps) = ALIAS_HOST_PATTERN.captures(host) {
        let name = caps.get(1)?.as_str().to_string();
        let session_id = caps.get(2)?.as_str().to_string();
        let port = caps.get(3).and_then(|p| p.as_str().parse().ok());
        return Some(HostRoute {
            target: RouteTarget::Alias { name, session_id },
            port,
        });
    }

    None
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_host_with_port() {
        let route = parse_host("ip10-0-12-3-8080.play.example.com").unwrap();
        assert_eq!(route.target, RouteTarget::Ip("10.0.12.3".to_string()));
        assert_eq!(route.port, Some(8080));
    }

    #[test]
    fn test_ip_host_without_port() {
        let route = parse_host("ip192-168-0-5.localhost").unwrap();
        assert_eq!(route.target, RouteTarget::Ip("192.168.0.5".to_string()));
        assert_eq!(route.port, None);
    }

    #[test]
    fn test_alias_host() {
        let route = parse_host("pwdnode1-abcd1234-9090.play.example.com").unwrap();
        assert_eq!(
            route.target,
            RouteTarget::Alias {
                name: "node1".to_string(),
                session_id: "abcd1234".to_string(),
            }
        );
        assert_eq!(route.port, Some(9090));
    }

    #[test]
    fn test_alias_session_id_is_exactly_eight_lowercase_chars() {
        // Seven and nine character trailers must not match as session ids.
        assert!(parse_host("pwdnode1-abc1234.x.io").is_none());
        match parse_host("pwdnode1-abcd12345.x.io") {
            Some(HostRoute {
                target: RouteTarget::Alias { session_id, .. },
                ..
            }) => {
                assert_eq!(session_id.len(), 8);
                assert!(session_id
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
            }
            other => panic!("unexpected route: {:?}", other),
        }
        assert!(parse_host("pwdnode1-ABCD1234.x.io").is_none());
    }

    #[test]
    fn test_plain_hosts_do_not_route() {
        assert!(parse_host("play.example.com").is_none());
        assert!(parse_host("localhost").is_none());
    }
}
