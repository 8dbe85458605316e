//! HTTP server for Modelboard.
//!
//! Serves the JSON API and the training progress stream over HTTP/1.1.

pub mod logging;
pub mod routes;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use http::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use modelboard_training::{ArchitectureRegistry, ArtifactStore, DatasetStore};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::leaderboard::LeaderboardStore;
use crate::monitoring::ResourceProbe;
use crate::orchestration::{ProgressStreamer, SessionSettings, TrainingSession};
use logging::RequestLoggerLayer;
pub use routes::{AppState, BoxBody};

/// A bound, not yet serving, HTTP server.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl Server {
    /// Create storage directories, load persisted state and bind the configured address.
    pub async fn bind(config: &Config) -> Result<Self> {
        let state = Arc::new(build_state(config)?);
        let listener = TcpListener::bind(config.server.address).await?;
        Ok(Self { listener, state })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    #[must_use]
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Serve until the process is stopped.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves. In-flight connections are left to finish on their own.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let addr = self.listener.local_addr()?;
        info!(%addr, "modelboard server listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "error accepting connection");
                            continue;
                        }
                    };
                    debug!(%peer, "new connection");
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let service = ServiceBuilder::new().layer(RequestLoggerLayer).service(tower::service_fn(
                            move |request: Request<Incoming>| routes::handle(Arc::clone(&state), request),
                        ));
                        let io = TokioIo::new(stream);
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(io, TowerToHyperService::new(service))
                            .await
                        {
                            debug!(%peer, error = %e, "connection closed with error");
                        }
                    });
                }
                () = &mut shutdown => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }
            }
        }
        Ok(())
    }
}

fn build_state(config: &Config) -> Result<AppState> {
    let layout = config.storage.layout();
    layout.ensure_dirs()?;

    let dataset = Arc::new(DatasetStore::new(layout.dataset_path()));
    let artifacts = ArtifactStore::new(layout.models_dir().to_path_buf());
    let leaderboard = Arc::new(LeaderboardStore::open(layout.leaderboard_path(), artifacts));
    let probe = Arc::new(ResourceProbe::from_config(&config.probe, &config.training));
    let registry = ArchitectureRegistry::with_defaults();
    info!(
        architectures = ?registry.keys(),
        data_dir = %layout.data_dir().display(),
        models_dir = %layout.models_dir().display(),
        "training session ready"
    );

    let session = TrainingSession::new(
        registry,
        dataset.clone(),
        leaderboard,
        probe,
        SessionSettings {
            defaults: config.training.default_hyperparams(),
            validation_split: config.training.validation_split,
        },
    );
    Ok(AppState { session, dataset, streamer: ProgressStreamer::new(config.training.idle_timeout()) })
}

/// Bind and serve until Ctrl-C.
pub async fn run(config: &Config) -> Result<()> {
    let server = Server::bind(config).await?;
    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        })
        .await
}
