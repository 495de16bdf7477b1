// SPDX-License-Identifier: GPL-3.0-only
use axum::{
    extract::{Path, Query},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::api::handlers::{ApiHandlers, ApiResponse, HistoryQuery};
use crate::api::websocket::WebSocketServer;
use crate::crx::ItemDetails;
use crate::engine::Status;
use crate::history::UpdateRecord;

pub struct HttpServer {
    handlers: ApiHandlers,
    addr: SocketAddr,
}

impl HttpServer {
    pub fn new(handlers: ApiHandlers, addr: SocketAddr) -> Self {
        Self { handlers, addr }
    }

    pub async fn serve(self) -> anyhow::Result<()> {
        let handlers = Arc::new(self.handlers);

        let app = Router::new()
            .route("/api/health", get(ApiHandlers::health))
            .route("/api/components", get(list_components_handler))
            .route("/api/components/:id", get(get_component_handler))
            .route("/api/components/:id/update", post(update_component_handler))
            .route("/api/components/:id/unregister", post(unregister_component_handler))
            .route("/api/history", get(history_handler))
            .with_state(handlers.clone())
            .merge(WebSocketServer::new(handlers).router());

        info!(addr = %self.addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn list_components_handler(
    axum::extract::State(handlers): axum::extract::State<Arc<ApiHandlers>>,
) -> Json<ApiResponse<Vec<ItemDetails>>> {
    handlers.list_components().await
}

async fn get_component_handler(
    axum::extract::State(handlers): axum::extract::State<Arc<ApiHandlers>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ItemDetails>>, StatusCode> {
    handlers.get_component(Path(id)).await
}

async fn update_component_handler(
    axum::extract::State(handlers): axum::extract::State<Arc<ApiHandlers>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Status>>, StatusCode> {
    handlers.update_component(Path(id)).await
}

async fn unregister_component_handler(
    axum::extract::State(handlers): axum::extract::State<Arc<ApiHandlers>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Status>>, StatusCode> {
    handlers.unregister_component(Path(id)).await
}

async fn history_handler(
    axum::extract::State(handlers): axum::extract::State<Arc<ApiHandlers>>,
    query: Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<UpdateRecord>>>, StatusCode> {
    handlers.history(query).await
}
