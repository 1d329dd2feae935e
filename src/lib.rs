use std::{net::SocketAddr, sync::Arc, time::Duration};

use http::{Method, Request, Response, StatusCode};
use hyper::{
    Body, body,
    server::conn::{AddrStream, Http},
    service::{make_service_fn, service_fn},
};
use rustls::ServerConfig;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

pub mod config;
pub mod decode;
pub mod dom;
pub mod error;
pub mod fetch;
pub mod modify;
pub mod respond;
pub mod tls;

pub use config::{Config, Modification, ModificationMode, RuleSet, load_config};
pub use error::{ConfigError, ErrorTier, PipelineError, RuleError, TranscodeError};

use crate::{
    fetch::{HttpClient, fetch, normalize_target, upstream_client},
    respond::{is_html, passthrough, text_response, transform_body, transformed_response},
};

#[derive(Clone)]
pub struct ProxyConfig {
    pub bind_addr: SocketAddr,
    pub rules: RuleSet,
    /// Serve HTTPS with this config instead of plain HTTP.
    pub tls: Option<Arc<ServerConfig>>,
    pub upstream_timeout: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], config::DEFAULT_PORT)),
            rules: RuleSet::default(),
            tls: None,
            upstream_timeout: Some(Duration::from_secs(config::DEFAULT_UPSTREAM_TIMEOUT_SECS)),
        }
    }
}

impl ProxyConfig {
    /// Builds the runtime config from the file contents, loading TLS material
    /// when both certificate and key are configured.
    pub fn from_config(config: &Config, bind_addr: SocketAddr) -> Result<Self, ConfigError> {
        let tls = config
            .tls_files()
            .map(|(cert, key)| tls::load_server_config(cert, key))
            .transpose()?;
        Ok(Self {
            bind_addr,
            rules: RuleSet::from_config(config),
            tls,
            upstream_timeout: config.upstream_timeout(),
        })
    }
}

pub struct ProxyHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ProxyHandle {
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.task.await;
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ProxyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),
}

struct AppState {
    client: HttpClient,
    rules: RuleSet,
    upstream_timeout: Option<Duration>,
}

pub async fn spawn_proxy(config: ProxyConfig) -> Result<ProxyHandle, ProxyError> {
    let listener = std::net::TcpListener::bind(config.bind_addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let state = Arc::new(AppState {
        client: upstream_client(),
        rules: config.rules,
        upstream_timeout: config.upstream_timeout,
    });
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let task = match config.tls {
        Some(tls) => {
            let listener = TcpListener::from_std(listener)?;
            tokio::spawn(serve_tls(
                listener,
                TlsAcceptor::from(tls),
                state,
                shutdown_rx,
            ))
        }
        None => {
            let make_svc = make_service_fn(move |_conn: &AddrStream| {
                let state = state.clone();
                async move {
                    Ok::<_, hyper::Error>(service_fn(move |req| {
                        let state = state.clone();
                        async move { Ok::<_, hyper::Error>(handle_request(state, req).await) }
                    }))
                }
            });

            let server = hyper::Server::from_tcp(listener)?.serve(make_svc);
            let graceful = server.with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            tokio::spawn(async move {
                if let Err(err) = graceful.await {
                    error!(%err, "proxy server error");
                }
            })
        }
    };

    Ok(ProxyHandle {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task,
    })
}

async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    state: Arc<AppState>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(err) => {
                    warn!(%err, "accept failed");
                    continue;
                }
            },
        };

        let acceptor = acceptor.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(%err, %peer, "tls handshake failed");
                    return;
                }
            };
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, hyper::Error>(handle_request(state, req).await) }
            });
            if let Err(err) = Http::new().serve_connection(stream, service).await {
                debug!(%err, %peer, "connection error");
            }
        });
    }
}

async fn handle_request(state: Arc<AppState>, req: Request<Body>) -> Response<Body> {
    let target = match normalize_target(req.uri(), req.headers()) {
        Ok(target) => target,
        Err(err) => {
            warn!(%err, uri = %req.uri(), "cannot resolve upstream");
            return relay(None, &req.uri().to_string());
        }
    };
    let url = target.to_string();
    info!(%url, method = %req.method(), "processing");

    let is_head = req.method() == Method::HEAD;
    let response = match fetch(&state.client, req, target, state.upstream_timeout).await {
        Ok(response) => response,
        Err(err) => {
            warn!(%err, %url, "upstream request failed");
            return relay(None, &url);
        }
    };

    if is_head || !has_body(response.status()) || !is_html(response.headers()) {
        return relay(Some(response), &url);
    }

    let (parts, upstream_body) = response.into_parts();
    let raw = match body::to_bytes(upstream_body).await {
        Ok(raw) => raw,
        Err(err) => {
            warn!(%err, %url, "cannot read upstream body");
            return text_response(StatusCode::BAD_GATEWAY, "Failed to read upstream body");
        }
    };

    match transform_body(&parts.headers, &raw, &url, &state.rules) {
        Ok(rewritten) => transformed_response(parts, rewritten),
        Err(err) => {
            warn!(%err, %url, "cannot transform body; passing through");
            relay(Some(Response::from_parts(parts, Body::from(raw))), &url)
        }
    }
}

/// Passthrough, or a bare 502 when there is no upstream response to relay.
fn relay(response: Option<Response<Body>>, url: &str) -> Response<Body> {
    match passthrough(response) {
        Ok(response) => response,
        Err(err) => {
            error!(%err, url, "cannot passthrough");
            text_response(StatusCode::BAD_GATEWAY, "Upstream fetch failed")
        }
    }
}

fn has_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}
