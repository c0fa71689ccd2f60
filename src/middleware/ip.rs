use axum::{
    extract::{connect_info::ConnectInfo, Request},
    http::HeaderMap,
};
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Identifies the principal for rate limiting and per-client nonce scoping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientKey(String);

impl ClientKey {
    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<IpAddr> for ClientKey {
    fn from(ip: IpAddr) -> Self {
        Self(ip.to_string())
    }
}

impl From<&str> for ClientKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extract client IP from proxy headers.
pub fn extract_ip_from_headers(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(h) = headers.get("x-forwarded-for").and_then(|hv| hv.to_str().ok()) {
        if let Some(first) = h.split(',').next() {
            if let Ok(ip) = first.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }
    if let Some(h) = headers.get("x-real-ip").and_then(|hv| hv.to_str().ok()) {
        if let Ok(ip) = h.trim().parse::<IpAddr>() {
            return Some(ip);
        }
    }
    None
}

/// Resolves the client key for a request. Proxy headers are only honoured
/// when `trust_proxy` is set; otherwise they are trivially spoofable.
pub fn client_key(req: &Request, trust_proxy: bool) -> ClientKey {
    if trust_proxy {
        if let Some(ip) = extract_ip_from_headers(req.headers()) {
            return ip.into();
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| ClientKey::from(info.0.ip()))
        .unwrap_or_else(ClientKey::unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(peer: Option<&str>, forwarded: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/");
        if let Some(fwd) = forwarded {
            builder = builder.header("x-forwarded-for", fwd);
        }
        if let Some(peer) = peer {
            builder = builder.extension(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn uses_peer_address_by_default() {
        let req = request_with(Some("10.0.0.7:5555"), Some("1.2.3.4"));
        assert_eq!(client_key(&req, false).as_str(), "10.0.0.7");
    }

    #[test]
    fn honours_forwarded_for_when_trusted() {
        let req = request_with(Some("10.0.0.7:5555"), Some("1.2.3.4, 10.0.0.1"));
        assert_eq!(client_key(&req, true).as_str(), "1.2.3.4");
    }

    #[test]
    fn falls_back_to_unknown() {
        let req = request_with(None, Some("not-an-ip"));
        assert_eq!(client_key(&req, true), ClientKey::unknown());
    }

    #[test]
    fn real_ip_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", " 192.168.1.9 ".parse().unwrap());
        assert_eq!(extract_ip_from_headers(&headers), Some(IpAddr::from([192, 168, 1, 9])));
    }
}
