mod admin;
pub mod bootstrap;
mod state;

pub use state::GatewayState;

use crate::proxy;
use crate::proxy::context::ConnectionContext;
use anyhow::Result;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, info};

/// How long in-flight connections get after shutdown is signalled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Run the rate-limited listener until `shutdown` is notified, then drain.
///
/// Every accepted connection gets its own `ConnectionContext`, which owns
/// per-connection rate limit buckets when those are configured.
pub async fn run_proxy_server(
    listen: &str,
    state: GatewayState,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: proxy listening, addr={}", addr);

    let mut connections = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            result = listener.accept() => result,
            // Reap finished connections so the set does not grow unbounded.
            Some(_) = connections.join_next(), if !connections.is_empty() => continue,
            _ = shutdown.notified() => break,
        };

        let (stream, peer_addr) = match accepted {
            Ok(v) => v,
            Err(e) => {
                error!("server: proxy: accept failed, error={}", e);
                metrics::counter!("gateway_connections_total", "status" => "error").increment(1);
                continue;
            }
        };
        metrics::counter!("gateway_connections_total", "status" => "accepted").increment(1);

        let state = state.clone();
        let connection = Arc::new(ConnectionContext::new(peer_addr));
        connections.spawn(async move {
            metrics::gauge!("gateway_connections_active").increment(1.0);
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                let connection = connection.clone();
                async move { proxy::handle_request(req, state, connection).await }
            });
            let builder = http_builder();
            if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                log_connection_error("proxy", peer_addr, &*e);
            }
            metrics::gauge!("gateway_connections_active").decrement(1.0);
        });
    }

    drain(connections).await;
    Ok(())
}

/// Wait up to `DRAIN_TIMEOUT` for `connections`, then drop what is left.
async fn drain(mut connections: JoinSet<()>) {
    if connections.is_empty() {
        return;
    }
    info!(
        "server: proxy: stopped accepting, draining {} connections",
        connections.len()
    );
    let wait_all = async { while connections.join_next().await.is_some() {} };
    if tokio::time::timeout(DRAIN_TIMEOUT, wait_all).await.is_ok() {
        info!("server: proxy: all connections drained");
    } else {
        info!(
            "server: proxy: drain timeout ({}s), aborting {} connections",
            DRAIN_TIMEOUT.as_secs(),
            connections.len()
        );
        connections.abort_all();
    }
}

/// HTTP/1.1 + HTTP/2 connection builder shared by both listeners.
fn http_builder() -> auto::Builder<TokioExecutor> {
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder.http1().keep_alive(true);
    builder
        .http2()
        .keep_alive_interval(Some(Duration::from_secs(20)));
    builder
}

fn log_connection_error(listener: &str, peer: SocketAddr, e: &(dyn std::error::Error + Send + Sync)) {
    if !e.to_string().contains("connection closed") {
        error!(
            "server: {}: connection error, peer={}, error={}",
            listener, peer, e
        );
    }
}

/// Admin listener: health checks, metrics, and config dump.
pub async fn run_admin_server(listen: &str, state: GatewayState) -> Result<()> {
    let addr: SocketAddr = listen.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!("server: admin listening, addr={}", addr);

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            let svc = service_fn(move |req: Request<Incoming>| {
                let state = state.clone();
                async move { admin::handle_admin(req, state) }
            });
            let builder = http_builder();
            if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                log_connection_error("admin", peer_addr, &*e);
            }
        });
    }
}
