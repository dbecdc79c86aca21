use ipnetwork::IpNetwork;
use std::net::IpAddr;

use crate::error::ScanError;

const DEFAULT_IPV4_PREFIX: u8 = 24;
const DEFAULT_IPV6_PREFIX: u8 = 64;
const MAX_HOSTNAME_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub original: String,
    pub target_type: TargetType,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetType {
    IpAddress(IpAddr),
    Network(IpNetwork),
    Hostname(String),
}

impl Target {
    /// Classify a target string. The check is syntactic: hostnames are not resolved.
    pub fn parse(input: &str) -> Result<Self, ScanError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ScanError::InvalidRequest("target is blank".into()));
        }
        if trimmed.len() != input.len() || trimmed.chars().any(char::is_whitespace) {
            return Err(ScanError::InvalidRequest(format!("target contains whitespace: {:?}", input)));
        }
        if trimmed.starts_with('-') {
            return Err(ScanError::InvalidRequest(format!("target may not start with '-': {}", input)));
        }

        if let Ok(ip) = trimmed.parse::<IpAddr>() {
            return Ok(Self {
                original: input.to_string(),
                target_type: TargetType::IpAddress(ip),
            });
        }

        if trimmed.contains('/') {
            let network = trimmed
                .parse::<IpNetwork>()
                .map_err(|e| ScanError::InvalidRequest(format!("invalid CIDR '{}': {}", input, e)))?;
            return Ok(Self {
                original: input.to_string(),
                target_type: TargetType::Network(network),
            });
        }

        if !is_hostname(trimmed) {
            return Err(ScanError::InvalidRequest(format!("invalid hostname: {}", input)));
        }

        Ok(Self {
            original: input.to_string(),
            target_type: TargetType::Hostname(trimmed.to_ascii_lowercase()),
        })
    }
}

/// Normalize a discovery input into a network.
///
/// A bare address becomes its enclosing /24 (IPv4) or /64 (IPv6); an explicit
/// CIDR is kept as given, with host bits cleared.
pub fn discovery_network(input: &str) -> Result<IpNetwork, ScanError> {
    let target = Target::parse(input)?;
    let network = match target.target_type {
        TargetType::Network(net) => net,
        TargetType::IpAddress(ip) => {
            let prefix = if ip.is_ipv4() { DEFAULT_IPV4_PREFIX } else { DEFAULT_IPV6_PREFIX };
            IpNetwork::new(ip, prefix)
                .map_err(|e| ScanError::InvalidRequest(format!("invalid network '{}': {}", input, e)))?
        }
        TargetType::Hostname(_) => {
            return Err(ScanError::InvalidRequest(format!(
                "discovery needs an IP address or CIDR, got hostname: {}",
                input
            )));
        }
    };
    IpNetwork::new(network.network(), network.prefix())
        .map_err(|e| ScanError::InvalidRequest(format!("invalid network '{}': {}", input, e)))
}

fn is_hostname(s: &str) -> bool {
    if s.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_parse_ip_address() {
        let target = Target::parse("192.168.1.1").unwrap();
        assert_eq!(target.target_type, TargetType::IpAddress(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1))));
    }

    #[test]
    fn test_parse_ipv6() {
        let target = Target::parse("2001:db8::1").unwrap();
        assert_eq!(
            target.target_type,
            TargetType::IpAddress(IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1)))
        );
    }

    #[test]
    fn test_parse_cidr() {
        let target = Target::parse("10.0.0.0/16").unwrap();
        assert!(matches!(target.target_type, TargetType::Network(_)));
        assert!(Target::parse("10.0.0.0/40").is_err());
    }

    #[test]
    fn test_parse_hostname() {
        let target = Target::parse("Scan-Me.example.com").unwrap();
        assert_eq!(target.target_type, TargetType::Hostname("scan-me.example.com".into()));
    }

    #[test]
    fn test_parse_rejects_flag_like_and_blank() {
        assert!(Target::parse("").is_err());
        assert!(Target::parse("   ").is_err());
        assert!(Target::parse("-p").is_err());
        assert!(Target::parse("host name").is_err());
        assert!(Target::parse(" 10.0.0.1").is_err());
        assert!(Target::parse("bad..host").is_err());
        assert!(Target::parse("http://example.com").is_err());
    }

    #[test]
    fn test_discovery_network_defaults_to_24() {
        assert_eq!(discovery_network("192.168.42.99").unwrap().to_string(), "192.168.42.0/24");
        assert_eq!(discovery_network("10.1.2.3/16").unwrap().to_string(), "10.1.0.0/16");
        assert_eq!(discovery_network("2001:db8::7").unwrap().to_string(), "2001:db8::/64");
        assert!(discovery_network("example.com").is_err());
    }
}
