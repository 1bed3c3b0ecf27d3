//! Gateway config file loader.
//!
//! The config is a human-edited text file of line records:
//!
//! ```text
//! # comment
//! expiration 300
//! 192.168.1.1
//! 8080 10.0.0.2:9090
//! ```
//!
//! `expiration N` forces every runtime whitelist addition to expire `N`
//! seconds after it is added; a bare IPv4 address is whitelisted
//! permanently at startup (exempt from the expiration clause); and
//! `OUTPORT ADDR:INPORT` defines one relay route. Blank lines, `#`
//! comments, and lines starting with whitespace are skipped.
//!
//! Parsing iterates over complete lines only, so empty and trailing lines
//! never get indexed into or read past.

use crate::relay::RelayRoute;
use ipgate_core::{GateError, GateResult};
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::info;

/// Parsed startup configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayConfig {
    pub routes: Vec<RelayRoute>,
    /// Permanently whitelisted addresses, seeded before any listener starts.
    pub whitelist: Vec<Ipv4Addr>,
    /// Global forced-expiration duration in seconds, if configured.
    pub forced_expiration: Option<u64>,
}

impl GatewayConfig {
    pub fn load(path: &Path) -> GateResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("cannot read {}: {e}", path.display())))?;
        let cfg = Self::parse(&content)?;
        info!(
            path = %path.display(),
            routes = cfg.routes.len(),
            whitelist = cfg.whitelist.len(),
            "configuration loaded"
        );
        Ok(cfg)
    }

    pub fn parse(content: &str) -> GateResult<Self> {
        let mut cfg = Self::default();
        for (idx, raw) in content.lines().enumerate() {
            if raw.is_empty() || raw.starts_with(['#', ' ', '\t', '\r']) {
                continue;
            }
            let line = raw.trim_end();

            if let Some(rest) = line.strip_prefix("expiration") {
                if rest.starts_with([' ', '\t']) {
                    let value = rest.trim();
                    let seconds: u64 = value.parse().map_err(|_| {
                        config_err(idx, &format!("invalid expiration duration '{value}'"))
                    })?;
                    cfg.forced_expiration = Some(seconds);
                    continue;
                }
            }

            match line.split_once([' ', '\t']) {
                None => {
                    let ip: Ipv4Addr = line
                        .parse()
                        .map_err(|_| config_err(idx, &format!("invalid IPv4 address '{line}'")))?;
                    cfg.whitelist.push(ip);
                }
                Some((outbound, upstream)) => {
                    cfg.routes.push(parse_route(idx, outbound, upstream.trim())?);
                }
            }
        }
        Ok(cfg)
    }
}

fn parse_route(idx: usize, outbound: &str, upstream: &str) -> GateResult<RelayRoute> {
    let outbound_port: u16 = outbound
        .parse()
        .map_err(|_| config_err(idx, &format!("invalid outbound port '{outbound}'")))?;
    let (addr, port) = upstream.split_once(':').ok_or_else(|| {
        config_err(idx, &format!("upstream '{upstream}' is not in ADDR:PORT form"))
    })?;
    let upstream_addr: Ipv4Addr = addr
        .parse()
        .map_err(|_| config_err(idx, &format!("invalid upstream address '{addr}'")))?;
    let upstream_port: u16 = port
        .parse()
        .map_err(|_| config_err(idx, &format!("invalid upstream port '{port}'")))?;
    Ok(RelayRoute {
        outbound_port,
        upstream_addr,
        upstream_port,
    })
}

fn config_err(idx: usize, msg: &str) -> GateError {
    GateError::Config(format!("line {}: {msg}", idx + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config() {
        let cfg = GatewayConfig::parse(
            "# gateway config\n\
             expiration 300\n\
             192.168.1.1\n\
             10.20.30.40\n\
             8080 10.0.0.2:9090\n\
             8443 10.0.0.3:443\n",
        )
        .unwrap();
        assert_eq!(cfg.forced_expiration, Some(300));
        assert_eq!(
            cfg.whitelist,
            vec![
                Ipv4Addr::new(192, 168, 1, 1),
                Ipv4Addr::new(10, 20, 30, 40)
            ]
        );
        assert_eq!(
            cfg.routes,
            vec![
                RelayRoute {
                    outbound_port: 8080,
                    upstream_addr: Ipv4Addr::new(10, 0, 0, 2),
                    upstream_port: 9090,
                },
                RelayRoute {
                    outbound_port: 8443,
                    upstream_addr: Ipv4Addr::new(10, 0, 0, 3),
                    upstream_port: 443,
                },
            ]
        );
    }

    #[test]
    fn blank_comment_and_indented_lines_skipped() {
        let cfg = GatewayConfig::parse("\n\n# comment\n  indented noise\n\t\n192.168.1.1\n\n")
            .unwrap();
        assert_eq!(cfg.whitelist, vec![Ipv4Addr::new(192, 168, 1, 1)]);
        assert!(cfg.routes.is_empty());
    }

    #[test]
    fn empty_file_is_empty_config() {
        assert_eq!(GatewayConfig::parse("").unwrap(), GatewayConfig::default());
    }

    #[test]
    fn expiration_requires_a_number() {
        assert!(GatewayConfig::parse("expiration soon\n").is_err());
        assert!(GatewayConfig::parse("expiration\n").is_err());
    }

    #[test]
    fn malformed_ip_rejected() {
        assert!(GatewayConfig::parse("999.1.1.1\n").is_err());
        assert!(GatewayConfig::parse("not-an-ip\n").is_err());
    }

    #[test]
    fn malformed_route_rejected() {
        assert!(GatewayConfig::parse("8080 10.0.0.2\n").is_err());
        assert!(GatewayConfig::parse("70000 10.0.0.2:9090\n").is_err());
        assert!(GatewayConfig::parse("8080 10.0.0.2:notaport\n").is_err());
    }
}
