// SPDX-License-Identifier: GPL-3.0-only
use axum::extract::{Path, Query};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::crx::ItemDetails;
use crate::engine::{ComponentUpdateService, Status};
use crate::history::{History, UpdateRecord};

const DEFAULT_HISTORY_LIMIT: u32 = 50;
const MAX_HISTORY_LIMIT: u32 = 500;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

pub struct ApiHandlers {
    service: ComponentUpdateService,
    history: Arc<dyn History>,
}

impl ApiHandlers {
    pub fn new(service: ComponentUpdateService, history: Arc<dyn History>) -> Self {
        Self { service, history }
    }

    pub fn service(&self) -> &ComponentUpdateService {
        &self.service
    }
}

impl ApiHandlers {
    pub async fn health() -> Json<ApiResponse<&'static str>> {
        Json(ApiResponse::success("ok"))
    }

    pub async fn list_components(&self) -> Json<ApiResponse<Vec<ItemDetails>>> {
        let mut components = Vec::new();
        for id in self.service.component_ids().await {
            // Skip items reaped between the two requests.
            if let Some(details) = self.service.component_details(&id).await {
                components.push(details);
            }
        }
        Json(ApiResponse::success(components))
    }

    pub async fn get_component(
        &self,
        Path(id): Path<String>,
    ) -> Result<Json<ApiResponse<ItemDetails>>, StatusCode> {
        match self.service.component_details(&id).await {
            Some(details) => Ok(Json(ApiResponse::success(details))),
            None => Err(StatusCode::NOT_FOUND),
        }
    }

    pub async fn update_component(
        &self,
        Path(id): Path<String>,
    ) -> Result<Json<ApiResponse<Status>>, StatusCode> {
        info!(id = %id, "On-demand update requested over API");

        match self.service.on_demand_update(&id).await {
            Status::Error => Err(StatusCode::NOT_FOUND),
            status => Ok(Json(ApiResponse::success(status))),
        }
    }

    pub async fn unregister_component(
        &self,
        Path(id): Path<String>,
    ) -> Result<Json<ApiResponse<Status>>, StatusCode> {
        match self.service.unregister_component(&id).await {
            Status::Error => Err(StatusCode::NOT_FOUND),
            status => {
                info!(id = %id, "Component unregistered over API");
                Ok(Json(ApiResponse::success(status)))
            }
        }
    }

    pub async fn history(
        &self,
        Query(query): Query<HistoryQuery>,
    ) -> Result<Json<ApiResponse<Vec<UpdateRecord>>>, StatusCode> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .min(MAX_HISTORY_LIMIT);

        match self.history.list_recent(limit).await {
            Ok(records) => Ok(Json(ApiResponse::success(records))),
            Err(e) => {
                error!(error = %e, "Failed to list update history");
                Err(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}
