//! HTTP surface: a single axum router exposing the snapshot endpoint.
//! Grounded in `cowprotocol-services`' axum wiring style -- typed query
//! extractors, a shared `Arc` app state, `tower_http::trace` for request
//! logging.

use crate::snapshot::SnapshotService;
use crate::types::Chain;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const DEFAULT_LIMIT: usize = 25;
const MAX_LIMIT: usize = 100;

pub fn router(service: Arc<SnapshotService>) -> Router {
    Router::new()
        .route("/api/snapshots/:chain", get(get_snapshot))
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    offset: Option<usize>,
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ErrorBody {
    message: &'static str,
}

fn chain_not_supported() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(ErrorBody { message: "Chain not supported" }))
}

async fn get_snapshot(
    State(service): State<Arc<SnapshotService>>,
    Path(chain_name): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> axum::response::Response {
    let Ok(chain) = Chain::from_str(&chain_name) else {
        return chain_not_supported().into_response();
    };

    let offset = query.offset.unwrap_or(0);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);

    match service.get_snapshot(chain, offset, limit).await {
        Some(snapshot) => {
            crate::metrics::record_snapshot_request(chain.name(), snapshot.entries.len());
            Json(snapshot).into_response()
        }
        None => chain_not_supported().into_response(),
    }
}
