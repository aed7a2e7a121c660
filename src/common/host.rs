//! Host and address validation for membership changes
//!
//! Everything here is pure: it inspects strings and, for migrations, asks a
//! [`HostResolver`] whether a name resolves. Nothing is mutated.

use crate::common::{Error, Result};
use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr, ToSocketAddrs};

/// Answers whether a host name can be resolved to at least one address.
pub trait HostResolver: Send + Sync {
    fn resolves(&self, host: &str) -> bool;
}

/// Resolver backed by the operating system (`getaddrinfo`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolves(&self, host: &str) -> bool {
        match (host, 0u16).to_socket_addrs() {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                tracing::debug!("lookup of {} failed: {}", host, e);
                false
            }
        }
    }
}

/// Fixed set of resolvable names. IP literals always resolve.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    hosts: HashSet<String>,
}

impl StaticResolver {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }
}

impl HostResolver for StaticResolver {
    fn resolves(&self, host: &str) -> bool {
        self.hosts.contains(host) || is_ip_literal(host)
    }
}

/// True for dotted-quad IPv4 literals such as `10.0.0.1`.
pub fn is_ipv4_literal(host: &str) -> bool {
    host.parse::<Ipv4Addr>().is_ok()
}

fn is_ip_literal(host: &str) -> bool {
    is_ipv4_literal(host) || host.parse::<Ipv6Addr>().is_ok()
}

/// Parse `host:port` into its parts.
///
/// Accepts bracketed IPv6 hosts (`[::1]:9050`). Fails with
/// [`Error::InvalidAddress`] when the separator is missing, the host is
/// empty, or the port is not an integer in 1..=65535.
pub fn validate_host_port(host_port: &str) -> Result<(String, u16)> {
    let trimmed = host_port.trim();
    let invalid = |reason: &str| Error::InvalidAddress(format!("'{}': {}", host_port, reason));

    let (host, port) = if let Some(rest) = trimmed.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| invalid("unterminated '['"))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.parse::<Ipv6Addr>().is_err() {
            return Err(invalid("bracketed host is not an IPv6 address"));
        }
        (host, port)
    } else {
        let (host, port) = trimmed
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.contains(':') {
            return Err(invalid("IPv6 hosts must be bracketed"));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(invalid("host is empty"));
    }
    if host.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(invalid("host contains whitespace"));
    }
    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("port is not a number"));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| invalid("port out of range [1, 65535]"))?;
    if port == 0 {
        return Err(invalid("port out of range [1, 65535]"));
    }

    Ok((host.to_string(), port))
}

/// Check that renaming `src_host` to `dest_host` is a sensible migration.
///
/// Rewriting one raw IPv4 address to another is rejected; every endpoint
/// that is a name must resolve.
pub fn validate_host_migration(
    src_host: &str,
    dest_host: &str,
    resolver: &dyn HostResolver,
) -> Result<()> {
    let src_is_ip = is_ipv4_literal(src_host);
    let dest_is_ip = is_ipv4_literal(dest_host);

    if src_is_ip && dest_is_ip {
        return Err(Error::InvalidMigration(format!(
            "can't change ip to ip ({} -> {})",
            src_host, dest_host
        )));
    }
    if !src_is_ip && !resolver.resolves(src_host) {
        return Err(Error::UnresolvableHost(src_host.to_string()));
    }
    if !dest_is_ip && !resolver.resolves(dest_host) {
        return Err(Error::UnresolvableHost(dest_host.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_host_port() {
        assert_eq!(
            validate_host_port("be-1:9050").unwrap(),
            ("be-1".to_string(), 9050)
        );
        assert_eq!(
            validate_host_port(" 10.0.0.1:1 ").unwrap(),
            ("10.0.0.1".to_string(), 1)
        );
        assert_eq!(
            validate_host_port("host:65535").unwrap(),
            ("host".to_string(), 65535)
        );
        assert_eq!(
            validate_host_port("[::1]:9050").unwrap(),
            ("::1".to_string(), 9050)
        );
    }

    #[test]
    fn test_validate_host_port_round_trip() {
        for (host, port) in [("a", 1u16), ("node-7.example.com", 8040), ("192.168.1.9", 65535)] {
            let input = format!("{}:{}", host, port);
            let (h, p) = validate_host_port(&input).unwrap();
            assert_eq!(h, host);
            assert_eq!(p, port);
        }
    }

    #[test]
    fn test_validate_host_port_invalid() {
        for bad in [
            "",
            "host",
            ":9050",
            "host:",
            "host:0",
            "host:65536",
            "host:-1",
            "host:+80",
            "host:80a",
            "::1:9050",
            "[::1]9050",
            "[nothost]:9050",
            "ho st:80",
        ] {
            match validate_host_port(bad) {
                Err(Error::InvalidAddress(_)) => {}
                other => panic!("{:?} should be InvalidAddress, got {:?}", bad, other),
            }
        }
    }

    #[test]
    fn test_migration_ip_to_ip_rejected() {
        let resolver = StaticResolver::default();
        let err = validate_host_migration("10.0.0.1", "10.0.0.2", &resolver).unwrap_err();
        assert!(matches!(err, Error::InvalidMigration(_)));
    }

    #[test]
    fn test_migration_name_to_ip() {
        let resolver = StaticResolver::new(["node-a"]);
        assert!(validate_host_migration("node-a", "10.0.0.2", &resolver).is_ok());
        assert!(validate_host_migration("10.0.0.2", "node-a", &resolver).is_ok());
    }

    #[test]
    fn test_migration_unresolvable() {
        let resolver = StaticResolver::new(["node-a"]);
        let err = validate_host_migration("bogus.invalid", "10.0.0.2", &resolver).unwrap_err();
        assert!(matches!(err, Error::UnresolvableHost(ref h) if h == "bogus.invalid"));

        let err = validate_host_migration("node-a", "node-b", &resolver).unwrap_err();
        assert!(matches!(err, Error::UnresolvableHost(ref h) if h == "node-b"));
    }

    #[test]
    fn test_system_resolver_rejects_invalid_tld() {
        assert!(!SystemResolver.resolves("bogus.invalid"));
        let err =
            validate_host_migration("bogus.invalid", "10.0.0.2", &SystemResolver).unwrap_err();
        assert!(matches!(err, Error::UnresolvableHost(_)));
    }
}
