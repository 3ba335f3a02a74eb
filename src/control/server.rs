//! HTTP/JSON control API served by the running daemon.
//!
//! CLI commands talk to this instead of the orders file whenever a daemon
//! holds the orders lock, so the daemon's store stays the only writer.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::execution::TriggerStore;
use crate::models::{ConditionalOrder, OrderDraft, OrderPatch};

/// Shared state for the control server
#[derive(Clone)]
pub struct ControlState {
    store: Arc<TriggerStore>,
}

/// Build the router over `store`
pub fn create_router(store: Arc<TriggerStore>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/v1/orders", get(list_orders).post(create_order))
        .route(
            "/v1/orders/{id}",
            get(get_order).patch(update_order).delete(delete_order),
        )
        .route("/v1/orders/{id}/cancel", post(cancel_order))
        .with_state(ControlState { store })
}

/// Serve the control API until `shutdown` is cancelled
pub async fn serve(
    listener: TcpListener,
    store: Arc<TriggerStore>,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Control API listening");
    }

    axum::serve(listener, create_router(store))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Control(format!("server stopped: {}", e)))
}

async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreatedOrder {
    pub id: u64,
}

async fn list_orders(
    State(state): State<ControlState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<ConditionalOrder>> {
    let orders = if query.active {
        state.store.active()
    } else {
        state.store.list()
    };
    Json(orders)
}

async fn get_order(
    State(state): State<ControlState>,
    Path(id): Path<u64>,
) -> Result<Json<ConditionalOrder>, ApiError> {
    state
        .store
        .get(id)
        .map(Json)
        .ok_or(ApiError(Error::NotFound(id)))
}

async fn create_order(
    State(state): State<ControlState>,
    Json(draft): Json<OrderDraft>,
) -> Result<(StatusCode, Json<CreatedOrder>), ApiError> {
    let id = state.store.create(draft)?;
    Ok((StatusCode::CREATED, Json(CreatedOrder { id })))
}

async fn update_order(
    State(state): State<ControlState>,
    Path(id): Path<u64>,
    Json(patch): Json<OrderPatch>,
) -> Result<Json<ConditionalOrder>, ApiError> {
    found(id, state.store.update_fields(id, patch)?)?;
    get_order(State(state), Path(id)).await
}

async fn cancel_order(
    State(state): State<ControlState>,
    Path(id): Path<u64>,
) -> Result<Json<ConditionalOrder>, ApiError> {
    found(id, state.store.cancel(id)?)?;
    get_order(State(state), Path(id)).await
}

async fn delete_order(
    State(state): State<ControlState>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    found(id, state.store.delete(id)?)?;
    Ok(StatusCode::NO_CONTENT)
}

fn found(id: u64, exists: bool) -> Result<(), ApiError> {
    if exists {
        Ok(())
    } else {
        Err(ApiError(Error::NotFound(id)))
    }
}

/// Error body returned by every failing route
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// Store error rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, kind) = match &self.0 {
            Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };

        if status.is_server_error() {
            tracing::error!("Control request failed: {}", self.0);
        }

        let message = match self.0 {
            Error::Validation(msg) => msg,
            other => other.to_string(),
        };
        let body = ErrorBody {
            kind: kind.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderStatus, OrderType};
    use crate::persistence::InMemoryRepository;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn make_store() -> Arc<TriggerStore> {
        Arc::new(TriggerStore::open(Arc::new(InMemoryRepository::new())))
    }

    fn stop_loss() -> OrderDraft {
        OrderDraft::new("BTCUSDT", OrderSide::Sell, OrderType::StopLoss, 0.01, 60000.0)
    }

    fn json_request(method: &str, uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn empty_request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_router(make_store());

        let response = app.oneshot(empty_request("GET", "/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_goes_through_store() {
        let store = make_store();
        let app = create_router(store.clone());

        let body = serde_json::to_string(&stop_loss().with_remark("hedge")).unwrap();
        let response = app
            .oneshot(json_request("POST", "/v1/orders", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let created: CreatedOrder = body_json(response).await;
        let stored = store.get(created.id).unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
        assert_eq!(stored.remark, "hedge");
    }

    #[tokio::test]
    async fn test_invalid_draft_is_bad_request() {
        let app = create_router(make_store());

        let mut draft = stop_loss();
        draft.quantity = -1.0;
        let response = app
            .oneshot(json_request(
                "POST",
                "/v1/orders",
                serde_json::to_string(&draft).unwrap(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.kind, "validation");
    }

    #[tokio::test]
    async fn test_cancel_and_list_active() {
        let store = make_store();
        let keep = store.create(stop_loss()).unwrap();
        let gone = store.create(stop_loss()).unwrap();

        let response = create_router(store.clone())
            .oneshot(empty_request("POST", &format!("/v1/orders/{}/cancel", gone)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cancelled: ConditionalOrder = body_json(response).await;
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let response = create_router(store.clone())
            .oneshot(empty_request("GET", "/v1/orders?active=true"))
            .await
            .unwrap();
        let active: Vec<ConditionalOrder> = body_json(response).await;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, keep);

        let response = create_router(store)
            .oneshot(empty_request("GET", "/v1/orders"))
            .await
            .unwrap();
        let all: Vec<ConditionalOrder> = body_json(response).await;
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_patch_updates_pending_order() {
        let store = make_store();
        let id = store.create(stop_loss()).unwrap();

        let patch = OrderPatch {
            trigger_price: Some(58000.0),
            ..Default::default()
        };
        let response = create_router(store.clone())
            .oneshot(json_request(
                "PATCH",
                &format!("/v1/orders/{}", id),
                serde_json::to_string(&patch).unwrap(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(store.get(id).unwrap().trigger_price, 58000.0);
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let store = make_store();
        let id = store.create(stop_loss()).unwrap();

        let response = create_router(store.clone())
            .oneshot(empty_request("POST", "/v1/orders/99/cancel"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // active records cannot be deleted
        let response = create_router(store.clone())
            .oneshot(empty_request("DELETE", &format!("/v1/orders/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body: ErrorBody = body_json(response).await;
        assert_eq!(body.kind, "invalid_state");

        store.cancel(id).unwrap();
        let response = create_router(store.clone())
            .oneshot(empty_request("DELETE", &format!("/v1/orders/{}", id)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(store.get(id).is_none());
    }
}
