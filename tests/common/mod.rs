//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use forward_proxy::ca::IssuedCertificate;
use forward_proxy::error::ProxyError;
use forward_proxy::http::{OutboundRequest, RequestSummary};
use forward_proxy::net::listener::Listener;
use forward_proxy::net::tls::crypto_provider;
use forward_proxy::observability::{Hooks, Observer, TunnelSummary};
use forward_proxy::upstream::{Dispatcher, HyperTransport, Transport, TransportError, UpstreamResponse};
use forward_proxy::{ProxyServer, ProxyState, TunnelMode};

/// A request as seen on the wire by a mock origin.
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub head: String,
    pub body: Vec<u8>,
}

impl CapturedRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or("")
    }

    /// Lower-cased header names in wire order.
    pub fn header_names(&self) -> Vec<String> {
        self.head
            .lines()
            .skip(1)
            .filter_map(|line| line.split_once(':'))
            .map(|(name, _)| name.trim().to_ascii_lowercase())
            .collect()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().skip(1).find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.trim().eq_ignore_ascii_case(name).then(|| v.trim().to_string())
        })
    }
}

/// Read one HTTP/1.1 request head and its Content-Length body.
pub async fn read_request<S: AsyncRead + Unpin>(socket: &mut S) -> Option<CapturedRequest> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        if socket.read(&mut byte).await.ok()? == 0 {
            return None;
        }
        buf.push(byte[0]);
    }
    let head = String::from_utf8(buf).ok()?;

    let mut captured = CapturedRequest { head, body: Vec::new() };
    let length: usize = captured
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    captured.body = vec![0u8; length];
    socket.read_exact(&mut captured.body).await.ok()?;
    Some(captured)
}

/// Whether a canned response asks for the connection to be closed after it.
fn closes_connection(response: &[u8]) -> bool {
    let head_end = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap_or(response.len());
    String::from_utf8_lossy(&response[..head_end]).lines().skip(1).any(|line| {
        line.split_once(':').is_some_and(|(name, value)| {
            name.trim().eq_ignore_ascii_case("connection") && value.trim().eq_ignore_ascii_case("close")
        })
    })
}

/// Start a mock origin that answers every request with `response` verbatim
/// and reports what it received.
///
/// A response carrying `Connection: close` is followed by closing the socket,
/// so a short body really is cut off.
pub async fn start_mock_origin(response: &'static [u8]) -> (SocketAddr, mpsc::UnboundedReceiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let close_after = closes_connection(response);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                while let Some(request) = read_request(&mut socket).await {
                    let _ = tx.send(request);
                    if socket.write_all(response).await.is_err() || close_after {
                        break;
                    }
                }
                let _ = socket.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Start an HTTPS origin presenting `identity`, answering every request with
/// `response` and reporting what it decrypted.
pub async fn start_tls_origin(
    identity: IssuedCertificate,
    response: &'static [u8],
) -> (SocketAddr, mpsc::UnboundedReceiver<CapturedRequest>) {
    let config = rustls::ServerConfig::builder_with_provider(crypto_provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(identity.cert_chain, identity.key)
        .unwrap();
    let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(socket).await else {
                    return;
                };
                while let Some(request) = read_request(&mut tls).await {
                    let _ = tx.send(request);
                    if tls.write_all(response).await.is_err() || tls.flush().await.is_err() {
                        break;
                    }
                }
                let _ = tls.shutdown().await;
            });
        }
    });

    (addr, rx)
}

/// Start a TCP server that echoes every byte back.
pub async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });

    addr
}

/// An address nothing listens on.
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

/// Proxy state backed by the real hyper transport.
pub fn live_state(tunnel_mode: TunnelMode, hooks: Hooks) -> ProxyState {
    let transport = HyperTransport::new(Duration::from_secs(2), None).unwrap();
    let dispatcher = Dispatcher::new(Arc::new(transport), Duration::from_secs(5));
    ProxyState::new(dispatcher, hooks, tunnel_mode, Duration::from_secs(2))
}

/// Run a proxy on an ephemeral port.
pub async fn start_proxy(state: ProxyState) -> (SocketAddr, Arc<ProxyState>) {
    let listener = Listener::from_listener(TcpListener::bind("127.0.0.1:0").await.unwrap(), 64).unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ProxyServer::new(state, None);
    let state = Arc::clone(server.state());

    tokio::spawn(async move {
        let _ = server.run(listener, Duration::from_secs(1)).await;
    });

    (addr, state)
}

/// Read a response head (through the blank line) without consuming the body.
pub async fn read_head(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut byte))
            .await
            .expect("timed out reading response head")
            .unwrap();
        if n == 0 {
            break;
        }
        buf.push(byte[0]);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Send raw bytes to the proxy and read until it closes the connection.
pub async fn raw_exchange(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
    response
}

/// Observer that keeps a log of every callback.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn hooks(self: &Arc<Self>) -> Hooks {
        Hooks::new(vec![Arc::clone(self) as Arc<dyn Observer>])
    }

    /// Poll until an event starting with `prefix` shows up.
    pub async fn wait_for(&self, prefix: &str) -> String {
        for _ in 0..100 {
            if let Some(event) = self.events().into_iter().find(|e| e.starts_with(prefix)) {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("no event starting with {:?} in {:?}", prefix, self.events());
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl Observer for Recorder {
    fn on_request(&self, request: &OutboundRequest) {
        self.push(format!("request {} {}", request.method(), request.target()));
    }

    fn on_response(&self, _request: &RequestSummary, response: &UpstreamResponse) {
        self.push(format!("response {}", response.status().as_u16()));
    }

    fn on_error(&self, _request: Option<&RequestSummary>, error: &ProxyError) {
        self.push(format!("error {}", error.kind()));
    }

    fn on_body_error(&self, _request: &RequestSummary, _error: &axum::Error) {
        self.push("body_error".to_string());
    }

    fn on_tunnel_closed(&self, summary: &TunnelSummary) {
        self.push(format!(
            "tunnel {} {} {} {}",
            summary.mode, summary.target, summary.client_to_origin, summary.origin_to_client
        ));
    }
}

/// Transport that never touches the network; records what it was asked to send.
#[derive(Default)]
pub struct MockTransport {
    pub seen: Mutex<Vec<(String, Vec<(String, String)>)>>,
}

impl MockTransport {
    pub fn seen(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn round_trip(&self, request: Request<Body>) -> Result<UpstreamResponse, TransportError> {
        let headers = request
            .headers()
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_str().unwrap_or("").to_string()))
            .collect();
        self.seen.lock().unwrap().push((request.uri().to_string(), headers));

        let response = Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain")
            .header("x-mock-origin", "yes")
            .body(Body::from(format!("intercepted {}", request.uri().path())))
            .unwrap();
        Ok(UpstreamResponse::from(response))
    }
}
