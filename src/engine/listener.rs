//! The mock server's HTTP listener.
//!
//! A tokio accept loop serves the HTTP interactions registered against a
//! contract. The loop runs on a dedicated thread that owns its own runtime,
//! so the public API stays synchronous: the caller's thread starts the
//! server, drives real traffic against it from anywhere, and tears it down
//! with a watch-channel signal.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::errors::{EngineError, Result};

use super::model::InteractionRecord;
use crate::interaction::InteractionKind;

/// A running listener: resolved port, shutdown signal, and the thread
/// driving the accept loop.
#[derive(Debug)]
pub struct RunningListener {
    pub port: u16,
    shutdown_tx: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl RunningListener {
    /// Bind to `host:port` (port 0 lets the OS pick) and start serving the
    /// given interaction snapshot in the background.
    pub fn spawn(host: &str, port: u16, interactions: Vec<InteractionRecord>) -> Result<Self> {
        let addr = format!("{host}:{port}");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(EngineError::Io)?;

        let listener = runtime
            .block_on(TcpListener::bind(&addr))
            .map_err(|source| EngineError::Bind { addr: addr.clone(), source })?;
        let resolved_port = listener
            .local_addr()
            .map_err(EngineError::Io)?
            .port();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interactions = Arc::new(interactions);

        let thread = std::thread::spawn(move || {
            runtime.block_on(accept_loop(listener, interactions, shutdown_rx));
        });

        tracing::debug!(%addr, port = resolved_port, "mock server listening");

        Ok(Self {
            port: resolved_port,
            shutdown_tx,
            thread: Some(thread),
        })
    }

    /// Signal the accept loop to stop and wait for the thread to finish.
    pub fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::debug!("mock server thread panicked during shutdown");
            }
        }
    }
}

/// Background accept loop. Runs until `shutdown_rx` signals true, then
/// drains in-flight connections so no response is truncated when the
/// runtime is torn down.
async fn accept_loop(
    listener: TcpListener,
    interactions: Arc<Vec<InteractionRecord>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _addr)) => {
                        let interactions = Arc::clone(&interactions);
                        connections.spawn(async move {
                            if let Err(e) = handle_connection(stream, interactions).await {
                                tracing::debug!("mock server connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        tracing::debug!("mock server accept error: {}", e);
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    // Bounded drain: an idle client must not hold shutdown hostage.
    let drain = async {
        while connections.join_next().await.is_some() {}
    };
    if tokio::time::timeout(Duration::from_secs(1), drain).await.is_err() {
        tracing::debug!("mock server shut down with connections still open");
    }
}

/// Handle a single HTTP connection: parse the request line, match it
/// against the registered interactions, and write raw HTTP back.
async fn handle_connection(
    mut stream: tokio::net::TcpStream,
    interactions: Arc<Vec<InteractionRecord>>,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; 8192];
    let n = stream.read(&mut buf).await?;
    if n == 0 {
        return Ok(());
    }

    let request = String::from_utf8_lossy(&buf[..n]).into_owned();
    let Some((method, path, query)) = parse_request_line(&request) else {
        write_http_response(&mut stream, 400, &[], b"").await?;
        return Ok(());
    };

    match find_match(&interactions, &method, &path, &query) {
        Some(interaction) => {
            tracing::debug!(
                %method,
                %path,
                description = %interaction.description,
                "mock server matched interaction"
            );
            let mut headers: Vec<(String, String)> = interaction
                .response
                .headers
                .iter()
                .flat_map(|(name, values)| {
                    values.iter().map(move |v| (name.clone(), v.clone()))
                })
                .collect();
            let body = match &interaction.response.body {
                Some(body) => {
                    if !interaction.response.headers.contains_key("content-type") {
                        headers.push(("content-type".to_string(), body.content_type.clone()));
                    }
                    body.bytes()
                }
                None => Vec::new(),
            };
            write_http_response(&mut stream, interaction.status, &headers, &body).await?;
        }
        None => {
            tracing::debug!(%method, %path, "mock server received unmatched request");
            let diagnostic = serde_json::json!({
                "error": "no interaction matched",
                "method": method,
                "path": path,
            })
            .to_string();
            let headers = [("content-type".to_string(), "application/json".to_string())];
            write_http_response(&mut stream, 404, &headers, diagnostic.as_bytes()).await?;
        }
    }

    Ok(())
}

/// Extract (method, path, query map) from the first request line.
fn parse_request_line(request: &str) -> Option<(String, String, BTreeMap<String, Vec<String>>)> {
    let line = request.lines().next()?;
    let mut pieces = line.split_whitespace();
    let method = pieces.next()?.to_string();
    let target = pieces.next()?;

    let (path, query_str) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    };

    let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(query_str) = query_str {
        for pair in query_str.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
            query
                .entry(name.to_string())
                .or_default()
                .push(value.to_string());
        }
    }

    Some((method, path.to_string(), query))
}

/// Match a request against the HTTP interactions: method and path must be
/// equal, and every declared query parameter must appear with exactly its
/// declared values. Matching beyond that (bodies, matching rules) belongs
/// to the engine proper and is out of scope here.
fn find_match<'a>(
    interactions: &'a [InteractionRecord],
    method: &str,
    path: &str,
    query: &BTreeMap<String, Vec<String>>,
) -> Option<&'a InteractionRecord> {
    interactions
        .iter()
        .filter(|i| i.kind == InteractionKind::Http)
        .find(|i| {
            i.method.eq_ignore_ascii_case(method)
                && i.path == path
                && i.query
                    .iter()
                    .all(|(name, values)| query.get(name) == Some(values))
        })
}

/// Write a full HTTP/1.1 response to the stream.
async fn write_http_response(
    stream: &mut tokio::net::TcpStream,
    status: u16,
    headers: &[(String, String)],
    body: &[u8],
) -> std::io::Result<()> {
    let status_text = match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Response",
    };

    let mut response = format!("HTTP/1.1 {} {}\r\n", status, status_text);
    for (name, value) in headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ));

    stream.write_all(response.as_bytes()).await?;
    stream.write_all(body).await
}
