use std::{net::SocketAddr, thread};

use hyper::{
    Request, Response, body::Incoming, header::CONTENT_TYPE, server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, TextEncoder};
use tracing::{debug, info};

use crate::{collector::PrometheusCollector, manager::ViewManager};

/// A builder for the Prometheus HTTP exporter.
#[derive(Debug)]
pub struct ExporterBuilder {
    registry: Option<prometheus::Registry>,
    views: Option<ViewManager>,
    address: String,
    path: String,
    global_prefix: Option<String>,
}

impl Default for ExporterBuilder {
    fn default() -> Self {
        Self {
            registry: None,
            views: None,
            address: "0.0.0.0:9090".to_owned(),
            path: "/metrics".to_owned(),
            global_prefix: None,
        }
    }
}

impl ExporterBuilder {
    /// Create a new exporter with a fresh registry and the default socket address.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the socket address for the exporter.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the path for the exporter.
    ///
    /// If no path is provided, the default path is `/metrics`.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set the global namespace for the exported metrics. This will be prepended to all metric
    /// names.
    pub fn with_namespace(mut self, global_prefix: impl Into<String>) -> Self {
        self.global_prefix = Some(global_prefix.into());
        self
    }

    /// Set the registry for the exporter. Other collectors registered there are served alongside
    /// the views.
    pub fn with_registry(mut self, registry: prometheus::Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Serve the views of `views`. A [`PrometheusCollector`] is registered in the exporter's
    /// registry on install.
    pub fn with_views(mut self, views: &ViewManager) -> Self {
        self.views = Some(views.clone());
        self
    }

    fn path(&self) -> Result<String, ExporterError> {
        if self.path.is_empty() {
            return Err(ExporterError::InvalidPath(self.path.clone()));
        }

        if !self.path.starts_with('/') {
            return Err(ExporterError::InvalidPath(self.path.clone()));
        }

        // Remove trailing slash from path
        let path = if self.path.eq("/") {
            "/".to_owned()
        } else {
            self.path.trim_end_matches('/').to_owned()
        };

        Ok(path)
    }

    fn address(&self) -> Result<SocketAddr, ExporterError> {
        self.address.parse().map_err(|e| ExporterError::InvalidAddress(self.address.clone(), e))
    }

    /// Install the HTTP exporter with the given configuration and start serving metrics.
    /// Uses [hyper] for the HTTP server and [tokio] for the runtime.
    ///
    /// The listening socket is bound before this returns, so an address that is already in use
    /// fails with [`ExporterError::BindError`].
    ///
    /// # Behavior
    /// - If a Tokio runtime is available, use it to spawn the listener.
    /// - Otherwise, spawn a new single-threaded Tokio runtime on a thread, and spawn the listener
    ///   there.
    pub fn install(self) -> Result<(), ExporterError> {
        let path = self.path()?;
        let address = self.address()?;
        let registry = self.registry.unwrap_or_default();

        let listener = std::net::TcpListener::bind(address)?;
        listener.set_nonblocking(true)?;

        if let Some(views) = &self.views {
            registry.register(Box::new(PrometheusCollector::new(views)))?;
        }

        let fut = serve(listener, registry, path, self.global_prefix);

        // If a Tokio runtime is available, use it to spawn the listener. Otherwise,
        // create a new single-threaded runtime and spawn the listener there.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(e) = fut.await {
                    tracing::error!(error = %e, "Exporter stopped");
                }
            });
        } else {
            let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

            thread::spawn(move || {
                if let Err(e) = runtime.block_on(fut) {
                    tracing::error!(error = %e, "Exporter stopped");
                }
            });
        }

        Ok(())
    }
}

async fn serve(
    listener: std::net::TcpListener,
    registry: prometheus::Registry,
    path: String,
    global_prefix: Option<String>,
) -> Result<(), ExporterError> {
    let listener = tokio::net::TcpListener::from_std(listener)?;
    let addr = listener.local_addr()?;
    info!(%addr, %path, "Serving metrics");

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let registry = registry.clone();
        let path = path.clone();
        let global_prefix = global_prefix.clone();

        let service = service_fn(move |req| {
            serve_req(req, registry.clone(), path.clone(), global_prefix.clone())
        });

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!(%peer, error = %e, "Metrics connection closed with error");
            }
        });
    }
}

async fn serve_req(
    req: Request<Incoming>,
    registry: prometheus::Registry,
    path: String,
    global_prefix: Option<String>,
) -> Result<Response<String>, Box<dyn std::error::Error + Send + Sync>> {
    if req.uri().path() != path {
        return Ok(Response::builder().status(404).body("Not Found".to_string())?);
    }

    let encoder = TextEncoder::new();
    let body = render(&registry, global_prefix.as_deref())?;

    let response =
        Response::builder().status(200).header(CONTENT_TYPE, encoder.format_type()).body(body)?;

    Ok(response)
}

/// Gather the registry and encode it in the Prometheus text format, prefixing every metric name
/// with `global_prefix` if set.
pub(crate) fn render(
    registry: &prometheus::Registry,
    global_prefix: Option<&str>,
) -> prometheus::Result<String> {
    let mut metrics = registry.gather();

    // Set the global prefix for the metrics
    if let Some(prefix) = global_prefix {
        metrics.iter_mut().for_each(|metric| {
            if let Some(name) = metric.name.as_mut() {
                name.insert(0, '_');
                name.insert_str(0, prefix);
            };
        });
    }

    TextEncoder::new().encode_to_string(&metrics)
}

/// An error that can occur when building or installing the Prometheus HTTP exporter.
#[derive(Debug, thiserror::Error)]
pub enum ExporterError {
    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("Invalid address: {0}: {1}")]
    InvalidAddress(String, std::net::AddrParseError),
    #[error("Failed to register view collector: {0}")]
    Registration(#[from] prometheus::Error),
}
