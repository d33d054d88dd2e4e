//! `/serverinfo`: host identity, capability report, and stream state.
//!
//! Served on both endpoints, but the plaintext form is reduced: no MAC
//! address, no server commands, and `PairStatus` is always 0.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Extension;

use beamcast_core::constants::{GFE_VERSION, MAX_LUMA_PIXELS_HEVC};

use crate::listener::{ConnInfo, Transport};
use crate::net;
use crate::state::AppState;
use crate::xml::XmlDoc;

pub async fn serverinfo(
    State(state): State<Arc<AppState>>,
    Extension(conn): Extension<ConnInfo>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let https = conn.transport == Transport::Https;
    if let Some(client) = &conn.client {
        tracing::debug!(device = %client.name, "serving server info");
    }

    let pair_status = i32::from(https && params.contains_key("uniqueid"));
    let caps = state.video.caps();
    let unique_id = state.clients.read().await.unique_id.clone();
    let current_app = state.proc.running();

    let mut doc = XmlDoc::ok()
        .text("hostname", &state.config.name)
        .text("appversion", env!("CARGO_PKG_VERSION"))
        .text("GfeVersion", GFE_VERSION)
        .text("uniqueid", unique_id)
        .text("HttpsPort", state.config.https_port)
        .text("ExternalPort", state.config.http_port)
        .text(
            "MaxLumaPixelsHEVC",
            if caps.hevc_enabled() {
                MAX_LUMA_PIXELS_HEVC
            } else {
                "0"
            },
        )
        .text(
            "mac",
            if https {
                net::local_mac_address()
            } else {
                // Plaintext requests get the placeholder clients ignore.
                net::placeholder_mac()
            },
        )
        .text("LocalIP", net::local_ip_string(conn.local_addr))
        .text("ServerCodecModeSupport", caps.mode_flags())
        .text("PairStatus", pair_status)
        .text("currentgame", current_app)
        .text(
            "state",
            // Clients key feature detection off this exact state-string
            // prefix; it cannot be rebranded.
            if current_app > 0 {
                "SUNSHINE_SERVER_BUSY"
            } else {
                "SUNSHINE_SERVER_FREE"
            },
        );

    if https {
        for cmd in &state.config.server_cmds {
            doc = doc.text("ServerCommand", cmd);
        }
    }

    doc.into_response()
}
