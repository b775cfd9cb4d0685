use std::borrow::Cow;

/// Join a host and port into a `host:port` label.
///
/// IPv6 literals are bracketed (`[::1]:80`) so the result stays unambiguous.
/// Hosts that already carry brackets are left alone.
pub fn join_host_port(host: &str, port: &str) -> String {
    let host = host.trim();
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Strip the brackets from an IPv6 literal so it can be handed to the resolver.
pub fn unbracket_host(host: &str) -> Cow<'_, str> {
    let host = host.trim();
    match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        Some(inner) => Cow::Owned(inner.to_string()),
        None => Cow::Borrowed(host),
    }
}

/// Parse a decimal TCP port. Port 0 is rejected since it cannot be dialed.
pub fn parse_port(port: &str) -> Option<u16> {
    match port.trim().parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(p) => Some(p),
    }
}
