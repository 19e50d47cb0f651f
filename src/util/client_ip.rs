use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Address reported upstream when no public candidate is available.
pub const FALLBACK_CLIENT_IP: &str = "127.0.0.1";

/// Pick the caller IP reported to the upstream API.
///
/// Candidates are examined in order (for example: a configured address, then
/// forwarded-for headers). A candidate may be a comma-separated forwarding
/// chain, in which case its first hop is used. The first candidate that parses
/// as a public address wins; private, loopback, link-local and reserved
/// ranges are skipped. Returns [`FALLBACK_CLIENT_IP`] when nothing qualifies.
///
/// # Examples
///
/// ```
/// use jobfeeder::util::resolve_client_ip;
///
/// assert_eq!(resolve_client_ip(["10.0.0.4", "203.0.113.9, 10.0.0.1"]), "127.0.0.1");
/// assert_eq!(resolve_client_ip(["8.8.8.8"]), "8.8.8.8");
/// ```
pub fn resolve_client_ip<'a, I>(candidates: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .filter_map(|candidate| candidate.split(',').next())
        .map(str::trim)
        .filter_map(|hop| hop.parse::<IpAddr>().ok())
        .find(is_public_ip)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| FALLBACK_CLIENT_IP.to_string())
}

/// True for globally routable unicast addresses.
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_ipv4(v4),
        IpAddr::V6(v6) => is_public_ipv6(v6),
    }
}

fn is_public_ipv4(ip: &Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    let reserved = a == 0
        || a >= 240 // 240.0.0.0/4 and broadcast
        || (a == 100 && (64..128).contains(&b)) // shared address space
        || (a == 198 && (b == 18 || b == 19)); // benchmarking
    !(reserved
        || ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_multicast()
        || ip.is_documentation())
}

fn is_public_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() || ip.is_multicast() {
        return false;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_public_ipv4(&v4);
    }
    let segments = ip.segments();
    // Unique Local (fc00::/7)
    let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
    // Link-Local (fe80::/10)
    let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
    // Documentation (2001:db8::/32)
    let is_documentation = segments[0] == 0x2001 && segments[1] == 0x0db8;
    !(is_unique_local || is_link_local || is_documentation)
}
