//! Request sanitization.
//!
//! # Responsibilities
//! - Resolve the request target into an absolute origin URL
//! - Strip hop-by-hop and proxy-only headers
//! - Copy every remaining header, keeping duplicate values in order
//!
//! # Design Decisions
//! - Pure transformation: no network or disk access
//! - Inbound request is consumed; outbound headers are a fresh map
//! - Origin-form targets are only accepted inside an intercepted tunnel,
//!   where the tunnel supplies scheme and authority
//! - The parsed `Url` is for validation and logging; the wire target keeps
//!   the client's path and query byte for byte

use std::time::Instant;

use axum::{
    body::Body,
    http::{uri::PathAndQuery, HeaderMap, HeaderName, Method, Request, Uri, Version},
};
use url::Url;

use crate::error::ProxyError;

/// A request as received from the client.
pub type InboundRequest = Request<Body>;

/// Headers that only apply to a single connection and are never forwarded.
pub const HOP_BY_HOP_HEADERS: [&str; 9] = [
    "proxy-connection",
    "connection",
    "keep-alive",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
    "proxy-authenticate",
    "proxy-authorization",
];

/// Whether `name` belongs to the hop-by-hop set.
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    // HeaderName is always lowercase.
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// A sanitized request ready for dispatch.
pub struct OutboundRequest {
    method: Method,
    url: Url,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Body,
    secure: bool,
}

/// What observers keep about a request once its body has been handed off.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub method: Method,
    pub url: Url,
    pub started: Instant,
}

impl OutboundRequest {
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Absolute origin URL the request is dispatched to.
    pub fn target(&self) -> &Url {
        &self.url
    }

    /// Origin-form target written on the request line: path and query only.
    pub fn request_target(&self) -> &str {
        self.uri.path_and_query().map_or("/", PathAndQuery::as_str)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Whether the client sent this request inside an intercepted TLS session.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            method: self.method.clone(),
            url: self.url.clone(),
            started: Instant::now(),
        }
    }

    /// Convert into an `http::Request` addressed at the absolute origin URI.
    ///
    /// The client transport turns the absolute URI into origin-form on the wire.
    pub fn into_http(self) -> Request<Body> {
        let mut request = Request::new(self.body);
        *request.method_mut() = self.method;
        *request.uri_mut() = self.uri;
        *request.version_mut() = self.version;
        *request.headers_mut() = self.headers;
        request
    }
}

/// Turn an inbound request into an outbound one.
///
/// `base` is the `https://host:port/` of an intercepted tunnel, or `None`
/// for plain forward-proxy traffic where the target must be absolute.
pub fn sanitize(request: InboundRequest, base: Option<&Url>) -> Result<OutboundRequest, ProxyError> {
    let (parts, body) = request.into_parts();

    if parts.method.as_str().is_empty() {
        return Err(ProxyError::malformed("empty method"));
    }

    let url = resolve_target(&parts.uri, base)?;
    let uri = wire_uri(&url, &parts.uri)?;

    let mut headers = HeaderMap::with_capacity(parts.headers.len());
    for (name, value) in parts.headers.iter() {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }

    let version = match parts.version {
        Version::HTTP_10 => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    Ok(OutboundRequest {
        method: parts.method,
        url,
        uri,
        version,
        headers,
        body,
        secure: base.is_some(),
    })
}

fn resolve_target(uri: &Uri, base: Option<&Url>) -> Result<Url, ProxyError> {
    let url = if uri.scheme().is_some() {
        let url = Url::parse(&uri.to_string())
            .map_err(|e| ProxyError::malformed(format!("invalid target {}: {}", uri, e)))?;
        if let Some(base) = base {
            if url.host_str() != base.host_str() || url.port_or_known_default() != base.port_or_known_default() {
                return Err(ProxyError::malformed(format!(
                    "target {} does not match tunnel {}",
                    url, base
                )));
            }
        }
        url
    } else {
        let base = base.ok_or_else(|| {
            ProxyError::malformed(format!("target {} is not an absolute URI", uri))
        })?;
        let path = uri.path();
        if !path.starts_with('/') {
            return Err(ProxyError::malformed(format!("invalid request target {}", uri)));
        }
        // Set the path directly so "//host/x" cannot re-point the authority.
        let mut url = base.clone();
        url.set_path(path);
        url.set_query(uri.query());
        url
    };

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ProxyError::malformed(format!("unsupported scheme {}", other)));
        }
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(ProxyError::malformed(format!("target {} has no host", url)));
    }

    Ok(url)
}

/// Scheme and authority from the resolved target, path and query as the client sent them.
fn wire_uri(url: &Url, inbound: &Uri) -> Result<Uri, ProxyError> {
    let host = url.host_str().unwrap_or_default();
    let authority = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    let path_and_query = inbound
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));

    Uri::builder()
        .scheme(url.scheme())
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| ProxyError::malformed(format!("unusable target {}: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn inbound(uri: &str, headers: &[(&str, &str)]) -> InboundRequest {
        let mut request = Request::builder().method(Method::GET).uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        request.body(Body::empty()).unwrap()
    }

    fn tunnel_base() -> Url {
        Url::parse("https://example.test:8443/").unwrap()
    }

    #[test]
    fn strips_exactly_the_hop_by_hop_set() {
        let request = inbound(
            "http://example.test/a",
            &[
                ("Proxy-Connection", "keep-alive"),
                ("Connection", "keep-alive"),
                ("Keep-Alive", "timeout=5"),
                ("Transfer-Encoding", "chunked"),
                ("TE", "trailers"),
                ("Trailer", "Expires"),
                ("Upgrade", "websocket"),
                ("Proxy-Authenticate", "Basic"),
                ("Proxy-Authorization", "Basic Zm9vOmJhcg=="),
                ("Host", "example.test"),
                ("Accept", "*/*"),
                ("X-Trace", "one"),
                ("X-Trace", "two"),
                ("X-Trace", "three"),
            ],
        );

        let outbound = sanitize(request, None).unwrap();
        let headers = outbound.headers();

        for name in HOP_BY_HOP_HEADERS {
            assert!(!headers.contains_key(name), "{} was forwarded", name);
        }
        assert_eq!(headers.len(), 5);
        assert_eq!(headers["host"], "example.test");
        assert_eq!(headers["accept"], "*/*");
        let traces: Vec<_> = headers.get_all("x-trace").iter().collect();
        assert_eq!(traces, ["one", "two", "three"]);
    }

    #[test]
    fn header_set_is_inbound_minus_hop_by_hop() {
        let candidates = [
            ("connection", "close"),
            ("content-type", "text/plain"),
            ("te", "trailers"),
            ("cookie", "a=1"),
            ("cookie", "b=2"),
            ("upgrade", "h2c"),
            ("x-custom", "v"),
        ];

        // Every subset of the candidate headers.
        for mask in 0u32..(1 << candidates.len()) {
            let chosen: Vec<_> = candidates
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, h)| *h)
                .collect();
            let outbound = sanitize(inbound("http://example.test/", &chosen), None).unwrap();

            let expected: Vec<(String, String)> = chosen
                .iter()
                .filter(|(name, _)| !HOP_BY_HOP_HEADERS.contains(name))
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect();
            let actual: Vec<(String, String)> = outbound
                .headers()
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_str().unwrap().to_string()))
                .collect();
            assert_eq!(actual, expected, "mask {:b}", mask);
        }
    }

    #[test]
    fn absolute_target_becomes_origin_form_on_the_wire() {
        let outbound = sanitize(inbound("http://example.test:8080/path/x?q=1&r=2", &[]), None).unwrap();
        assert_eq!(outbound.request_target(), "/path/x?q=1&r=2");
        assert_eq!(outbound.target().as_str(), "http://example.test:8080/path/x?q=1&r=2");
        assert!(!outbound.is_secure());

        let http = outbound.into_http();
        assert_eq!(http.uri(), "http://example.test:8080/path/x?q=1&r=2");
        assert_eq!(http.method(), Method::GET);
    }

    #[test]
    fn path_and_query_are_forwarded_unnormalized() {
        let outbound = sanitize(inbound("http://example.test/a/../secret?q='x'&r=%7e", &[]), None).unwrap();
        assert_eq!(outbound.request_target(), "/a/../secret?q='x'&r=%7e");

        let http = outbound.into_http();
        assert_eq!(http.uri().path_and_query().unwrap().as_str(), "/a/../secret?q='x'&r=%7e");
        assert_eq!(http.uri().authority().unwrap().as_str(), "example.test");
    }

    #[test]
    fn tunnel_requests_keep_raw_path_and_tunnel_port() {
        let base = tunnel_base();
        let outbound = sanitize(inbound("/./x/%2e%2e/y?a=b+c", &[]), Some(&base)).unwrap();

        let http = outbound.into_http();
        assert_eq!(http.uri().scheme_str(), Some("https"));
        assert_eq!(http.uri().authority().unwrap().as_str(), "example.test:8443");
        assert_eq!(http.uri().path_and_query().unwrap().as_str(), "/./x/%2e%2e/y?a=b+c");
    }

    #[test]
    fn authority_only_target_gets_root_path() {
        let outbound = sanitize(inbound("http://example.test:8080", &[]), None).unwrap();
        assert_eq!(outbound.request_target(), "/");
        assert_eq!(outbound.into_http().uri(), "http://example.test:8080/");
    }

    #[test]
    fn origin_form_resolves_against_tunnel() {
        let base = tunnel_base();
        let outbound = sanitize(inbound("/inner?x=1", &[("Host", "example.test")]), Some(&base)).unwrap();
        assert_eq!(outbound.target().as_str(), "https://example.test:8443/inner?x=1");
        assert_eq!(outbound.request_target(), "/inner?x=1");
        assert!(outbound.is_secure());
    }

    #[test]
    fn double_slash_path_stays_on_tunnel_host() {
        let base = tunnel_base();
        let outbound = sanitize(inbound("//evil.test/x", &[]), Some(&base)).unwrap();
        assert_eq!(outbound.target().host_str(), Some("example.test"));
        assert_eq!(outbound.request_target(), "//evil.test/x");
    }

    #[test]
    fn origin_form_without_tunnel_is_malformed() {
        let err = sanitize(inbound("/relative", &[]), None).err().unwrap();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[test]
    fn absolute_target_must_match_tunnel() {
        let base = tunnel_base();
        let err = sanitize(inbound("https://other.test:8443/", &[]), Some(&base)).err().unwrap();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));

        let same = sanitize(inbound("https://example.test:8443/ok", &[]), Some(&base)).unwrap();
        assert_eq!(same.request_target(), "/ok");
    }

    #[test]
    fn unsupported_scheme_is_malformed() {
        let err = sanitize(inbound("ftp://example.test/file", &[]), None).err().unwrap();
        assert!(matches!(err, ProxyError::MalformedRequest(_)));
    }

    #[test]
    fn outbound_headers_are_independent_copies() {
        let mut original = HeaderMap::new();
        original.insert("x-value", HeaderValue::from_static("before"));

        let mut request = inbound("http://example.test/", &[]);
        *request.headers_mut() = original.clone();
        let outbound = sanitize(request, None).unwrap();

        let mut http = outbound.into_http();
        http.headers_mut().insert("x-value", HeaderValue::from_static("after"));
        assert_eq!(original["x-value"], "before");
    }

    #[tokio::test]
    async fn body_is_carried_through() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("http://example.test/upload")
            .body(Body::from("payload bytes"))
            .unwrap();
        let outbound = sanitize(request, None).unwrap();
        let body = axum::body::to_bytes(outbound.into_http().into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"payload bytes");
    }
}
