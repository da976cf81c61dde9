//! Shared helpers for integration tests
//!
//! Includes a tiny HTTP/1.1 fixture server on a local TCP port. Every response
//! carries `Connection: close`, so each request gets its own connection and a
//! truncated body is seen by the client as a dropped connection.

#![allow(dead_code)]

use distrocat_core::{CatalogConfig, CatalogManager, TemplateDescriptor};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Initialize logging for tests (only once per test run)
static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_level(true),
            )
            .with(tracing_subscriber::filter::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Deterministic, non-repeating-looking payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + i / 251) % 251) as u8).collect()
}

pub fn template(name: &str, url: &str) -> TemplateDescriptor {
    TemplateDescriptor::new(name, name.to_uppercase()).with_source_url(url)
}

/// Default settings rooted at `root`, with progress reported on every chunk
pub fn test_config(root: &Path) -> CatalogConfig {
    let mut config = CatalogConfig::with_root(root);
    config.settings.download.progress_interval_ms = 0;
    config
}

pub fn open_manager(root: &Path, defaults: Vec<TemplateDescriptor>) -> CatalogManager {
    CatalogManager::open_with_defaults(test_config(root), defaults).unwrap()
}

/// Names of leftover staging files in the artifact directory
pub fn staging_files(root: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(root.join("distros")) else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|e| e.file_name().into_string().ok())
        .filter(|n| n.ends_with(".partial"))
        .collect()
}

/// How the fixture server answers one path
#[derive(Debug, Clone)]
pub enum Route {
    /// 200 with the whole body
    Full(Vec<u8>),
    /// Advertises the full length, sends `send` bytes, then closes
    Truncated { body: Vec<u8>, send: usize },
    /// Sends the body in `chunk`-sized pieces with `delay` between them
    Slow {
        body: Vec<u8>,
        chunk: usize,
        delay: Duration,
    },
    /// 302 to the given location
    Redirect(String),
    /// Empty response with this status
    Status(u16),
}

#[derive(Default)]
struct ServerState {
    routes: HashMap<String, Route>,
    hits: HashMap<String, usize>,
}

pub struct FixtureServer {
    base: String,
    state: Arc<Mutex<ServerState>>,
    handle: JoinHandle<()>,
}

impl FixtureServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let state = Arc::new(Mutex::new(ServerState::default()));

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = accept_state.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, state).await;
                });
            }
        });

        Self {
            base,
            state,
            handle,
        }
    }

    pub fn route(&self, path: &str, route: Route) {
        self.state
            .lock()
            .unwrap()
            .routes
            .insert(path.to_string(), route);
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .hits
            .get(path)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for FixtureServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<ServerState>>) -> std::io::Result<()> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let read = stream.read(&mut buf).await?;
        if read == 0 || request.len() > 16 * 1024 {
            return Ok(());
        }
        request.extend_from_slice(&buf[..read]);
    }

    let head = String::from_utf8_lossy(&request);
    let path = head
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/")
        .to_string();

    let route = {
        let mut state = state.lock().unwrap();
        *state.hits.entry(path.clone()).or_default() += 1;
        state.routes.get(&path).cloned()
    };

    match route {
        None => write_head(&mut stream, "404 Not Found", 0, &[]).await?,
        Some(Route::Full(body)) => {
            write_head(&mut stream, "200 OK", body.len(), &[]).await?;
            stream.write_all(&body).await?;
        }
        Some(Route::Truncated { body, send }) => {
            write_head(&mut stream, "200 OK", body.len(), &[]).await?;
            stream.write_all(&body[..send.min(body.len())]).await?;
        }
        Some(Route::Slow { body, chunk, delay }) => {
            write_head(&mut stream, "200 OK", body.len(), &[]).await?;
            for piece in body.chunks(chunk.max(1)) {
                stream.write_all(piece).await?;
                stream.flush().await?;
                tokio::time::sleep(delay).await;
            }
        }
        Some(Route::Redirect(location)) => {
            write_head(&mut stream, "302 Found", 0, &[("Location", &location)]).await?
        }
        Some(Route::Status(code)) => {
            let status = format!("{code} Fixture");
            write_head(&mut stream, &status, 0, &[]).await?
        }
    }

    stream.flush().await?;
    stream.shutdown().await
}

async fn write_head(
    stream: &mut TcpStream,
    status: &str,
    content_length: usize,
    headers: &[(&str, &str)],
) -> std::io::Result<()> {
    let mut head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {content_length}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n"
    );
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes()).await
}
