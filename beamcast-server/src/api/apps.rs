//! `/applist` and `/appasset`: the app catalog and its box art.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::Response;

use beamcast_core::parse;

use crate::state::AppState;
use crate::xml::XmlDoc;

pub async fn applist(State(state): State<Arc<AppState>>) -> Response {
    let caps = state.video.caps();
    let hdr = if caps.hdr_supported() { "1" } else { "0" };

    let mut doc = XmlDoc::ok();
    for app in state.proc.apps() {
        doc = doc.parent(
            "App",
            vec![
                ("IsHdrSupported".to_string(), hdr.to_string()),
                ("AppTitle".to_string(), app.title.clone()),
                ("ID".to_string(), app.id.to_string()),
            ],
        );
    }
    doc.into_response()
}

pub async fn appasset(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let app_id = parse::lossy_u32(params.get("appid").map(String::as_str).unwrap_or(""));

    let Some(path) = state.proc.app_image(app_id) else {
        return XmlDoc::status(404)
            .message("Cannot find requested application")
            .into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "image/png")
            .header(header::CONNECTION, "close")
            .body(bytes.into())
            .expect("static response parts are valid"),
        Err(e) => {
            tracing::error!(app_id, path = %path.display(), error = %e, "couldn't read app image");
            XmlDoc::status(404)
                .message("Cannot find requested application")
                .into_response()
        }
    }
}
