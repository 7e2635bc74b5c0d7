use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};

use url::Host;

use crate::error::ScanError;

/// Resolves `target` to the single IPv4 address that will be scanned.
///
/// Literals are taken as-is. Domains go through the system resolver and the
/// first IPv4 answer wins, so a name mapping to several hosts only gets one
/// of them scanned.
pub fn lookup(target: &str) -> Result<Ipv4Addr, ScanError> {
    let ip = match Host::parse(target).map_err(ScanError::HostParseFailed)? {
        Host::Domain(domain) => resolve_domain(&domain)?,
        Host::Ipv4(ip) => ip,
        Host::Ipv6(_) => return Err(ScanError::OnlyIpv4TargetSupported),
    };

    log::debug!("Target `{}` resolved to `{}`", target, ip);

    Ok(ip)
}

fn resolve_domain(domain: &str) -> Result<Ipv4Addr, ScanError> {
    (domain, 0 /* dummy port */)
        .to_socket_addrs()
        .map_err(ScanError::ResolverFailed)?
        .find_map(|saddr| match saddr {
            SocketAddr::V4(sip) => Some(*sip.ip()),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| ScanError::DomainLookupFailed(domain.into()))
}
