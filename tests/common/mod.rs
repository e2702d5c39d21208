//! Shared utilities for integration and load testing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use resilient_client::ClientConfig;

/// A request as seen by the mock backend.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub method: String,
    /// Path including any query string.
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[allow(dead_code)]
impl SeenRequest {
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Handle to a running mock backend.
#[derive(Clone)]
pub struct MockBackend {
    pub addr: SocketAddr,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

#[allow(dead_code)]
impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn count_path(&self, method: &str, path: &str) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.method == method && r.path() == path)
            .count()
    }

    /// Client config pointing at this backend with fast retries.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.api.base_url = self.url();
        config.retries.max_attempts = 3;
        config.retries.base_delay_ms = 50;
        config.timeouts.request_secs = 5;
        config
    }
}

/// Start a programmable backend on an ephemeral port.
///
/// The handler sees every parsed request and returns `(status, body)`.
#[allow(dead_code)]
pub async fn start_programmable_backend<F>(handler: F) -> MockBackend
where
    F: Fn(&SeenRequest) -> (u16, String) + Send + Sync + 'static,
{
    start_delayed_backend(handler, Duration::ZERO).await
}

/// Like `start_programmable_backend`, holding each response back by `delay`.
pub async fn start_delayed_backend<F>(handler: F, delay: Duration) -> MockBackend
where
    F: Fn(&SeenRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handler = Arc::new(handler);

    let backend = MockBackend {
        addr,
        seen: seen.clone(),
    };

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    let handler = handler.clone();
                    let seen = seen.clone();
                    tokio::spawn(async move {
                        let _ = serve(socket, handler.as_ref(), &seen, delay).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    backend
}

async fn serve<F>(
    socket: TcpStream,
    handler: &F,
    seen: &Mutex<Vec<SeenRequest>>,
    delay: Duration,
) -> std::io::Result<()>
where
    F: Fn(&SeenRequest) -> (u16, String),
{
    let mut reader = BufReader::new(socket);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }

    let length: usize = headers
        .get("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await?;

    let request = SeenRequest {
        method,
        target,
        headers,
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    seen.lock().unwrap().push(request.clone());

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    let (status, body) = handler(&request);

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        body.len(),
        body
    );
    let mut socket = reader.into_inner();
    socket.write_all(response.as_bytes()).await?;
    socket.shutdown().await
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}
