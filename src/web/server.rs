use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{NodeError, Result};
use crate::network::GossipEngine;
use crate::node::Node;
use crate::web::routes::create_routes;

/// Everything the handlers need: the node facade for state and the gossip
/// engine for peer management.
#[derive(Clone)]
pub struct AppState {
    pub node: Node,
    pub engine: GossipEngine,
}

/// Serves the operator HTTP API until ctrl-c. A failure to bind the port is
/// fatal.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let app = create_routes()
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| NodeError::Transport(format!("web bind failed on port {}: {}", port, e)))?;
    info!("web server listening on port {}", port);

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("shutdown signal received");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| NodeError::Transport(e.to_string()))
}
