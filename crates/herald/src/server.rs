//! WebSocket listener and process-wide broker state.

use crate::catalog::Catalog;
use crate::config::BrokerConfig;
use crate::error::HeraldResult;
use crate::registry::ConnectionRegistry;
use crate::session::{run_session, SessionContext};
use crate::supervisor::TaskSupervisor;
use crate::sweeper::ExpirySweeper;
use crate::transport;
use herald_store::SharedStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// The broker: shared state plus the accept loop.
pub struct Broker {
    config: Arc<BrokerConfig>,
    catalog: Catalog,
    registry: ConnectionRegistry,
}

impl Broker {
    pub fn new(config: BrokerConfig, store: SharedStore) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Catalog::new(store),
            registry: ConnectionRegistry::new(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// State handed to every session.
    pub fn context(&self) -> SessionContext {
        SessionContext {
            catalog: self.catalog.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
        }
    }

    /// Bind the configured address and serve until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> HeraldResult<()> {
        let listener = TcpListener::bind(&self.config.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Accept WebSocket clients on `listener` until `shutdown` fires, then
    /// wind down open sessions and the expiry sweeper.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> HeraldResult<()> {
        let mut background = TaskSupervisor::with_token("broker", shutdown.child_token());
        let sweeper = ExpirySweeper::new(self.catalog.clone(), self.config.sweep_interval);
        background.spawn("expiry-sweeper", sweeper.run(background.token().clone()));

        info!(
            addr = %listener.local_addr()?,
            path = %self.config.ws_path,
            "herald listening"
        );

        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let ctx = self.context();
                        let token = shutdown.child_token();
                        sessions.spawn(handle_socket(ctx, stream, peer, token));
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                },
                Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                    if let Err(e) = finished {
                        if e.is_panic() {
                            error!(error = %e, "session task panicked");
                        }
                    }
                }
            }
        }

        info!(open_sessions = sessions.len(), "herald shutting down");
        let drain = async { while sessions.join_next().await.is_some() {} };
        if tokio::time::timeout(self.config.shutdown_timeout, drain)
            .await
            .is_err()
        {
            warn!(
                remaining = sessions.len(),
                "sessions did not finish in time, aborting"
            );
            sessions.abort_all();
        }

        background.shutdown(self.config.close_grace).await;
        info!("herald stopped");
        Ok(())
    }
}

async fn handle_socket(ctx: SessionContext, stream: TcpStream, peer: SocketAddr, shutdown: CancellationToken) {
    let ws_path = ctx.config.ws_path.clone();
    let check_path = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() == ws_path {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            debug!(peer = %peer, error = %e, "websocket handshake rejected");
            return;
        }
    };

    debug!(peer = %peer, "client connected");
    let (sink, stream) = transport::websocket(ws);
    run_session(ctx, sink, stream, shutdown).await;
}
