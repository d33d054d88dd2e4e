pub mod apps;
pub mod pair;
pub mod serverinfo;
pub mod stream;

use std::sync::Arc;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use axum::{Extension, Router};
use tower_http::trace::TraceLayer;

use crate::listener::ConnInfo;
use crate::state::AppState;
use crate::xml::XmlDoc;

/// Router for the plaintext endpoint: pairing bootstrap and the reduced
/// serverinfo only.
pub fn http_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/serverinfo", get(serverinfo::serverinfo))
        .route("/pair", get(pair::pair))
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Router for the mutual-TLS endpoint: the full catalog, gated on the
/// peer certificate matched during the handshake.
pub fn https_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/serverinfo", get(serverinfo::serverinfo))
        .route("/pair", get(pair::pair))
        .route("/applist", get(apps::applist))
        .route("/appasset", get(apps::appasset))
        .route("/launch", get(stream::launch))
        .route("/resume", get(stream::resume))
        .route("/cancel", get(stream::cancel))
        .fallback(not_found)
        .layer(middleware::from_fn(require_verified))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> Response {
    XmlDoc::status(404).into_response()
}

/// Reject every request on a connection whose peer certificate didn't
/// match the authorized store. The body echoes the request path so
/// clients can tell which call was refused.
async fn require_verified(
    Extension(conn): Extension<ConnInfo>,
    req: Request,
    next: Next,
) -> Response {
    if conn.client.is_none() {
        return XmlDoc::status(401)
            .message("The client is not authorized. Certificate verification failed.")
            .query(req.uri().path())
            .into_response();
    }
    next.run(req).await
}
