//! HTTP serve mode

use crate::cookies::CookieJar;
use crate::shutdown::ShutdownSignal;
use crate::worker::BridgeHandle;
use crate::RuntimeState;
use bytes::Bytes;
use ember_config::Config;
use ember_core::{Error, RequestDescriptor, ResponseMessage, Result};
use http::{header, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Incoming;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Body type alias
pub type Body = Full<Bytes>;

/// Shared state of every connection task
#[derive(Debug)]
struct ServeContext {
    bridge: BridgeHandle,
    script: PathBuf,
    max_body_size: usize,
    replay_cookies: bool,
    cookies: CookieJar,
    in_flight: AtomicUsize,
}

/// Decrements the in-flight counter when a request finishes
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// HTTP server forwarding every request to one script through the bridge
#[derive(Debug)]
pub struct Server {
    listen: SocketAddr,
    shutdown_timeout: Duration,
    context: Arc<ServeContext>,
    state: Arc<RwLock<RuntimeState>>,
    shutdown: ShutdownSignal,
}

impl Server {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Get the current state
    pub async fn state(&self) -> RuntimeState {
        *self.state.read().await
    }

    /// Get listen address
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen
    }

    /// Cookies collected from script responses (empty unless
    /// `serve.replay_cookies` is set)
    pub fn cookies(&self) -> &CookieJar {
        &self.context.cookies
    }

    /// Get shutdown signal
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Run the server until the shutdown signal fires
    pub async fn run(&self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.listen)
            .await
            .map_err(|e| Error::Runtime(format!("Failed to bind to {}: {}", self.listen, e)))?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(&self, listener: tokio::net::TcpListener) -> Result<()> {
        *self.state.write().await = RuntimeState::Running;

        tracing::info!(
            listen = %listener.local_addr().unwrap_or(self.listen),
            script = %self.context.script.display(),
            "Server listening"
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::trace!("Accepted connection from {}", addr);
                            let context = Arc::clone(&self.context);

                            tokio::spawn(async move {
                                let service = hyper::service::service_fn(move |req| {
                                    let context = Arc::clone(&context);
                                    async move { Ok::<_, Infallible>(handle(&context, req).await) }
                                });

                                let io = hyper_util::rt::TokioIo::new(stream);
                                if let Err(e) = hyper::server::conn::http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    tracing::error!("HTTP connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                _ = self.shutdown.wait() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        *self.state.write().await = RuntimeState::ShuttingDown;
        self.drain().await;

        if let Err(e) = self.context.bridge.shutdown().await {
            tracing::warn!(error = %e, "Bridge shutdown failed");
        }

        *self.state.write().await = RuntimeState::Stopped;
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Wait for in-flight requests until the shutdown timeout
    async fn drain(&self) {
        let start = std::time::Instant::now();

        loop {
            let active = self.context.in_flight.load(Ordering::Relaxed);

            if active == 0 {
                tracing::info!("All requests completed, shutting down cleanly");
                break;
            }

            if start.elapsed() >= self.shutdown_timeout {
                tracing::warn!(
                    active_requests = active,
                    "Shutdown timeout reached, forcing shutdown"
                );
                break;
            }

            tracing::debug!(
                active_requests = active,
                elapsed_ms = start.elapsed().as_millis(),
                "Waiting for active requests to complete"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

async fn handle(context: &ServeContext, req: Request<Incoming>) -> Response<Body> {
    let _guard = InFlight::enter(&context.in_flight);
    match forward(context, req).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("Request handler error: {}", e);
            error_response(e.to_status_code(), &format!("Error: {}", e))
        }
    }
}

async fn forward(context: &ServeContext, req: Request<Incoming>) -> Result<Response<Body>> {
    let (parts, body) = req.into_parts();

    let uri = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let body = Limited::new(body, context.max_body_size)
        .collect()
        .await
        .map_err(|e| Error::InvalidRequest(format!("Failed to read request body: {e}")))?
        .to_bytes();

    let mut request = RequestDescriptor::new(parts.method.as_str(), uri);
    if let Some(content_type) = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
    {
        request = request.with_content_type(content_type);
    }
    if !body.is_empty() || parts.headers.contains_key(header::CONTENT_LENGTH) {
        request = request.with_body(body.to_vec());
    }

    let mut headers: Vec<(String, String)> = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect();
    if context.replay_cookies && !parts.headers.contains_key(header::COOKIE) {
        if let Some(cookie) = context.cookies.header() {
            headers.push(("cookie".to_string(), cookie));
        }
    }

    tracing::debug!(method = %request.method, uri = %request.uri, "Forwarding request");

    let raw = context
        .bridge
        .run_once(request, context.script.clone(), headers)
        .await?;

    let message = ResponseMessage::parse(&raw)?;
    if context.replay_cookies {
        context.cookies.store_all(message.header_values("Set-Cookie"));
    }
    message.into_http_response()
}

fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let mut response = Response::new(Full::new(Bytes::from(message.to_string())));
    *response.status_mut() = status;
    response
}

/// Server builder
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: Option<Config>,
    bridge: Option<BridgeHandle>,
    shutdown: Option<ShutdownSignal>,
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the bridge requests are forwarded to
    pub fn bridge(mut self, bridge: BridgeHandle) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Use an existing shutdown signal
    pub fn shutdown_signal(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    /// Build the server
    pub fn build(self) -> Result<Server> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("config is required".to_string()))?;
        let bridge = self
            .bridge
            .ok_or_else(|| Error::Config("bridge is required".to_string()))?;

        let serve = config.serve;
        Ok(Server {
            listen: serve.listen,
            shutdown_timeout: serve.shutdown_timeout,
            context: Arc::new(ServeContext {
                bridge,
                script: serve.script,
                max_body_size: serve.max_body_size,
                replay_cookies: serve.replay_cookies,
                cookies: CookieJar::new(),
                in_flight: AtomicUsize::new(0),
            }),
            state: Arc::new(RwLock::new(RuntimeState::Initializing)),
            shutdown: self.shutdown.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_config() {
        assert!(ServerBuilder::new().build().is_err());
    }

    #[test]
    fn test_error_response() {
        let response = error_response(StatusCode::BAD_GATEWAY, "Error: bad");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_in_flight_guard() {
        let counter = AtomicUsize::new(0);
        {
            let _a = InFlight::enter(&counter);
            let _b = InFlight::enter(&counter);
            assert_eq!(counter.load(Ordering::Relaxed), 2);
        }
        assert_eq!(counter.load(Ordering::Relaxed), 0);
    }
}
