//! Shared utilities for integration testing.

use std::io::Cursor;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bandwidth_hero_proxy::config::ProxyConfig;
use bandwidth_hero_proxy::http::HttpServer;
use bandwidth_hero_proxy::lifecycle::Shutdown;
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb, RgbImage};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

/// Canned origin response.
#[derive(Clone)]
pub struct OriginReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl OriginReply {
    /// Response with `content-type` and a matching `content-length`.
    pub fn new(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: vec![
                ("Content-Type".into(), content_type.into()),
                ("Content-Length".into(), body.len().to_string()),
            ],
            body,
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Request line and lower-cased headers received by the mock origin.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

pub type Recorded = Arc<Mutex<Vec<RecordedRequest>>>;

/// Start a mock origin that answers every request with `reply`.
pub async fn start_origin(reply: OriginReply) -> (SocketAddr, Recorded) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let log = recorded.clone();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let reply = reply.clone();
                    let log = log.clone();
                    tokio::spawn(async move {
                        let Some(buf) = read_head(&mut socket).await else {
                            return;
                        };
                        log.lock().unwrap().push(parse_request(&buf));

                        let mut head = format!("HTTP/1.1 {} Mock\r\n", reply.status);
                        for (k, v) in &reply.headers {
                            head.push_str(&format!("{}: {}\r\n", k, v));
                        }
                        head.push_str("Connection: close\r\n\r\n");

                        let _ = socket.write_all(head.as_bytes()).await;
                        let _ = socket.write_all(&reply.body).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    (addr, recorded)
}

async fn read_head(socket: &mut TcpStream) -> Option<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    Some(buf)
}

/// Origin that streams a large octet-stream body for a single request.
pub struct StreamingOrigin {
    pub addr: SocketAddr,
    /// Body bytes accepted by the socket so far.
    pub written: Arc<AtomicU64>,
    /// Resolves with the byte count once a write fails or the body is done.
    pub finished: oneshot::Receiver<u64>,
}

impl StreamingOrigin {
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::SeqCst)
    }
}

/// Start an origin that announces `total` bytes and writes them as fast as
/// the connection accepts them.
pub async fn start_streaming_origin(total: u64) -> StreamingOrigin {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let written = Arc::new(AtomicU64::new(0));
    let (done_tx, finished) = oneshot::channel();

    let progress = written.clone();
    tokio::spawn(async move {
        let Ok((mut socket, _)) = listener.accept().await else {
            return;
        };
        if read_head(&mut socket).await.is_none() {
            return;
        }

        let head = format!(
            "HTTP/1.1 200 Mock\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
            total
        );
        let chunk = vec![0x5au8; 64 * 1024];
        let mut sent = 0u64;
        if socket.write_all(head.as_bytes()).await.is_ok() {
            while sent < total {
                let n = chunk.len().min((total - sent) as usize);
                if socket.write_all(&chunk[..n]).await.is_err() {
                    break;
                }
                sent += n as u64;
                progress.store(sent, Ordering::SeqCst);
            }
        }
        let _ = done_tx.send(sent);
    });

    StreamingOrigin {
        addr,
        written,
        finished,
    }
}

fn parse_request(raw: &[u8]) -> RecordedRequest {
    let text = String::from_utf8_lossy(raw);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default().to_string();
    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();
    RecordedRequest {
        request_line,
        headers,
    }
}

/// Start the proxy on an ephemeral port.
pub async fn start_proxy(config: ProxyConfig) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config).unwrap();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, shutdown)
}

/// Client that leaves redirects to the test.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap()
}

/// RGB noise PNG; barely compressible, so 200x200 already clears every threshold.
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img: RgbImage = ImageBuffer::from_fn(width, height, |x, y| {
        let v = (x.wrapping_mul(2_654_435_761) ^ y.wrapping_mul(40_503))
            .wrapping_mul(2_246_822_519);
        Rgb([(v >> 24) as u8, (v >> 16) as u8, (v >> 8) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}
