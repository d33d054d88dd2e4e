//! `/launch`, `/resume`, and `/cancel`: session control.
//!
//! These endpoints translate the client's query parameters into a launch
//! descriptor for the streaming subsystem, enforcing the concurrent
//! stream limit and the per-address encryption policy on the way.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Response;
use axum::Extension;

use beamcast_core::constants::SURROUND_INFO_DEFAULT;
use beamcast_core::crypto::gcm::SessionCipher;
use beamcast_core::crypto::{hex_decode_loose, random};
use beamcast_core::parse;

use crate::config::EncryptionMode;
use crate::listener::ConnInfo;
use crate::net;
use crate::state::AppState;
use crate::streaming::LaunchSession;
use crate::xml::XmlDoc;

const STREAM_LIMIT_MSG: &str = "The host's concurrent stream limit has been reached. \
     Stop an existing stream or increase the channel limit in the host configuration.";
const CAPTURE_INIT_MSG: &str =
    "Failed to initialize video capture/encoding. Is a display connected and turned on?";
const ENCRYPTION_MSG: &str =
    "Encryption is mandatory for this host but unsupported by the client";

fn arg<'a>(params: &'a HashMap<String, String>, key: &str, default: &'a str) -> &'a str {
    params.get(key).map(String::as_str).unwrap_or(default)
}

/// Build the descriptor handed to the streaming subsystem.
fn make_launch_session(
    state: &AppState,
    host_audio: bool,
    params: &HashMap<String, String>,
    client_uuid: &str,
) -> Result<LaunchSession, XmlDoc> {
    let gcm_key = hex_decode_loose(arg(params, "rikey", ""))
        .map_err(|_| XmlDoc::status(400).message("Invalid rikey parameter"))?;

    let (width, height, fps) = parse::display_mode(arg(params, "mode", "0x0x0"));

    // Encrypted RTSP is enabled when the client reports corever >= 1.
    let corever = parse::lossy_u32(arg(params, "corever", "0"));
    let rtsp_cipher = if corever >= 1 {
        let cipher = SessionCipher::new(&gcm_key)
            .map_err(|_| XmlDoc::status(400).message("Invalid rikey parameter"))?;
        Some(cipher)
    } else {
        None
    };

    let rikeyid = parse::lossy_u32(arg(params, "rikeyid", "0"));
    let mut iv = [0u8; 16];
    iv[..4].copy_from_slice(&rikeyid.to_be_bytes());

    let internal = |e: beamcast_core::crypto::CryptoError| XmlDoc::status(500).message(e.to_string());
    let av_ping_payload = hex::encode(random::rand_bytes(8).map_err(internal)?);
    let control_bytes = random::rand_bytes(4).map_err(internal)?;
    let control_connect_data =
        u32::from_le_bytes([control_bytes[0], control_bytes[1], control_bytes[2], control_bytes[3]]);

    let rtsp_url_scheme = if rtsp_cipher.is_some() {
        "rtspenc://"
    } else {
        "rtsp://"
    };

    Ok(LaunchSession {
        id: state.hub.next_session_id(),
        gcm_key,
        width,
        height,
        fps,
        device_name: arg(params, "devicename", "unknown").to_string(),
        client_uuid: client_uuid.to_string(),
        app_id: parse::lossy_u32(arg(params, "appid", "0")),
        enable_sops: parse::lossy_bool(arg(params, "sops", "0")),
        surround_info: parse::lossy_i64(arg(params, "surroundAudioInfo", SURROUND_INFO_DEFAULT)),
        surround_params: arg(params, "surroundParams", "").to_string(),
        gcmap: parse::lossy_u32(arg(params, "gcmap", "0")),
        enable_hdr: parse::lossy_bool(arg(params, "hdrMode", "0")),
        virtual_display: parse::lossy_bool(arg(params, "virtualDisplay", "0")),
        scale_factor: parse::lossy_u32(arg(params, "scaleFactor", "100")),
        host_audio,
        rtsp_cipher,
        iv,
        rtsp_url_scheme,
        av_ping_payload,
        control_connect_data,
    })
}

fn session_url(session: &LaunchSession, conn: &ConnInfo, state: &AppState) -> String {
    format!(
        "{}{}:{}",
        session.rtsp_url_scheme,
        net::url_host(conn.local_addr),
        state.config.rtsp_port
    )
}

fn encryption_rejected(session: &LaunchSession, conn: &ConnInfo, state: &AppState) -> bool {
    let mode = net::encryption_mode_for_address(conn.remote_addr.ip(), &state.config);
    session.rtsp_cipher.is_none() && mode == EncryptionMode::Mandatory
}

pub async fn launch(
    State(state): State<Arc<AppState>>,
    Extension(conn): Extension<ConnInfo>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(client) = conn.client.clone() else {
        return XmlDoc::status(401).into_response();
    };

    if state.hub.session_count() >= state.config.channels {
        return XmlDoc::status(503)
            .message(STREAM_LIMIT_MSG)
            .text("resume", 0)
            .into_response();
    }

    let required = ["rikey", "rikeyid", "localAudioPlayMode", "appid"];
    if required.iter().any(|key| !params.contains_key(*key)) {
        return XmlDoc::status(400)
            .message("Missing a required launch parameter")
            .text("resume", 0)
            .into_response();
    }

    if state.proc.running() > 0 {
        return XmlDoc::status(400)
            .message("An app is already running on this host")
            .text("resume", 0)
            .into_response();
    }

    let host_audio = parse::lossy_bool(arg(&params, "localAudioPlayMode", "0"));
    state.hub.set_host_audio(host_audio);

    let session = match make_launch_session(&state, host_audio, &params, &client.uuid) {
        Ok(session) => session,
        Err(doc) => return doc.text("gamesession", 0).into_response(),
    };

    if encryption_rejected(&session, &conn, &state) {
        tracing::error!(peer = %conn.remote_addr, "rejecting client that cannot comply with mandatory encryption");
        return XmlDoc::status(403)
            .message(ENCRYPTION_MSG)
            .text("gamesession", 0)
            .into_response();
    }

    let app_id = session.app_id;
    if app_id > 0 {
        let apps = state.proc.apps();
        let Some(app) = apps.iter().find(|app| app.id == app_id) else {
            tracing::error!(app_id, "couldn't find requested app");
            return XmlDoc::status(404)
                .message("Cannot find requested application")
                .text("gamesession", 0)
                .into_response();
        };

        if let Err(code) = state.proc.execute(app, &session) {
            let message = if code == 503 {
                CAPTURE_INIT_MSG
            } else {
                "Failed to start the specified application"
            };
            return XmlDoc::status(code)
                .message(message)
                .text("gamesession", 0)
                .into_response();
        }
    }

    let doc = XmlDoc::ok()
        .text("sessionUrl0", session_url(&session, &conn, &state))
        .text("gamesession", 1);
    state.hub.raise(session);
    doc.into_response()
}

pub async fn resume(
    State(state): State<Arc<AppState>>,
    Extension(conn): Extension<ConnInfo>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(client) = conn.client.clone() else {
        return XmlDoc::status(401).into_response();
    };

    if state.hub.session_count() >= state.config.channels {
        return XmlDoc::status(503)
            .message(STREAM_LIMIT_MSG)
            .text("resume", 0)
            .into_response();
    }

    if state.proc.running() == 0 {
        return XmlDoc::status(503)
            .message("No running app to resume")
            .text("resume", 0)
            .into_response();
    }

    if !params.contains_key("rikey") || !params.contains_key("rikeyid") {
        return XmlDoc::status(400)
            .message("Missing a required resume parameter")
            .text("resume", 0)
            .into_response();
    }

    if state.hub.session_count() == 0 {
        // Between sessions the active GPU may have changed (hotplug,
        // driver crash, monitor change), so probe the encoders again.
        if let Err(e) = state.video.probe() {
            tracing::error!(error = %e, "encoder probe failed");
            return XmlDoc::status(503)
                .message(CAPTURE_INIT_MSG)
                .text("resume", 0)
                .into_response();
        }

        // Newer clients send localAudioPlayMode on resume too; honor it
        // only when no active session could be disturbed.
        if let Some(mode) = params.get("localAudioPlayMode") {
            state.hub.set_host_audio(parse::lossy_bool(mode));
        }
    }

    let host_audio = state.hub.host_audio();
    let session = match make_launch_session(&state, host_audio, &params, &client.uuid) {
        Ok(session) => session,
        Err(doc) => return doc.text("resume", 0).into_response(),
    };

    if encryption_rejected(&session, &conn, &state) {
        tracing::error!(peer = %conn.remote_addr, "rejecting client that cannot comply with mandatory encryption");
        return XmlDoc::status(403)
            .message(ENCRYPTION_MSG)
            .text("gamesession", 0)
            .into_response();
    }

    let doc = XmlDoc::ok()
        .text("sessionUrl0", session_url(&session, &conn, &state))
        .text("resume", 1);
    state.hub.raise(session);
    doc.into_response()
}

pub async fn cancel(State(state): State<Arc<AppState>>) -> Response {
    if state.hub.session_count() != 0 {
        return XmlDoc::status(503)
            .message("All sessions must be disconnected before quitting")
            .text("resume", 0)
            .into_response();
    }

    let doc = XmlDoc::ok().text("cancel", 1);
    if state.proc.running() > 0 {
        state.proc.terminate();
    }
    doc.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::Transport;
    use crate::state::test_support::test_state;
    use crate::streaming::ActiveSession;

    async fn body_of(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn verified_conn() -> ConnInfo {
        ConnInfo {
            transport: Transport::Https,
            local_addr: "192.168.1.2:47984".parse().unwrap(),
            remote_addr: "192.168.1.50:50000".parse().unwrap(),
            client: Some(Arc::new(crate::clients::NamedCertificate {
                name: "Phone".into(),
                cert: String::new(),
                uuid: "client-uuid".into(),
            })),
        }
    }

    fn query(pairs: &[(&str, &str)]) -> Query<HashMap<String, String>> {
        Query(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn launch_params<'a>() -> Vec<(&'a str, &'a str)> {
        vec![
            ("rikey", "00112233445566778899aabbccddeeff"),
            ("rikeyid", "12345"),
            ("localAudioPlayMode", "1"),
            ("appid", "1"),
            ("mode", "1920x1080x60"),
        ]
    }

    #[tokio::test]
    async fn test_launch_success() {
        let (state, _dir) = test_state();
        let body = body_of(
            launch(State(state.clone()), Extension(verified_conn()), query(&launch_params())).await,
        )
        .await;

        assert!(body.contains("status_code=\"200\""));
        assert!(body.contains("<gamesession>1</gamesession>"));
        assert!(body.contains("<sessionUrl0>rtsp://192.168.1.2:48010</sessionUrl0>"));

        // The descriptor reached the streaming subsystem and the app started.
        let session = state.hub.take_pending().expect("descriptor raised");
        assert_eq!(session.app_id, 1);
        assert_eq!(session.width, 1920);
        assert_eq!(session.fps, 60);
        assert_eq!(session.client_uuid, "client-uuid");
        assert!(session.host_audio);
        assert!(session.rtsp_cipher.is_none());
        assert_eq!(&session.iv[..4], &12345u32.to_be_bytes());
        assert_eq!(&session.iv[4..], &[0u8; 12]);
        assert_eq!(session.av_ping_payload.len(), 16);
        assert_eq!(state.proc.running(), 1);
    }

    #[tokio::test]
    async fn test_launch_with_corever_enables_encryption() {
        let (state, _dir) = test_state();
        let mut params = launch_params();
        params.push(("corever", "1"));

        let body = body_of(
            launch(State(state.clone()), Extension(verified_conn()), query(&params)).await,
        )
        .await;

        assert!(body.contains("<sessionUrl0>rtspenc://192.168.1.2:48010</sessionUrl0>"));
        let session = state.hub.take_pending().unwrap();
        assert!(session.rtsp_cipher.is_some());
    }

    #[tokio::test]
    async fn test_launch_missing_parameter() {
        let (state, _dir) = test_state();
        let body = body_of(
            launch(
                State(state),
                Extension(verified_conn()),
                query(&[("rikey", "00"), ("rikeyid", "1"), ("appid", "1")]),
            )
            .await,
        )
        .await;

        assert!(body.contains("status_code=\"400\""));
        assert!(body.contains("Missing a required launch parameter"));
    }

    #[tokio::test]
    async fn test_launch_stream_limit() {
        let (state, _dir) = test_state();
        state.hub.begin_session(
            7,
            ActiveSession {
                client_uuid: "other".into(),
                app_id: 1,
            },
        );

        let body = body_of(
            launch(State(state.clone()), Extension(verified_conn()), query(&launch_params())).await,
        )
        .await;

        assert!(body.contains("status_code=\"503\""));
        assert!(body.contains("concurrent stream limit"));
        // Nothing was raised or started.
        assert!(state.hub.take_pending().is_none());
        assert_eq!(state.proc.running(), 0);
    }

    #[tokio::test]
    async fn test_launch_while_app_running() {
        let (state, _dir) = test_state();

        // First launch starts app 1.
        launch(State(state.clone()), Extension(verified_conn()), query(&launch_params())).await;
        assert_eq!(state.proc.running(), 1);

        let body = body_of(
            launch(State(state.clone()), Extension(verified_conn()), query(&launch_params())).await,
        )
        .await;
        assert!(body.contains("status_code=\"400\""));
        assert!(body.contains("An app is already running on this host"));
    }

    #[tokio::test]
    async fn test_launch_unknown_app() {
        let (state, _dir) = test_state();
        let mut params = launch_params();
        params.retain(|(k, _)| *k != "appid");
        params.push(("appid", "42"));

        let body = body_of(
            launch(State(state), Extension(verified_conn()), query(&params)).await,
        )
        .await;

        assert!(body.contains("status_code=\"404\""));
        assert!(body.contains("Cannot find requested application"));
        assert!(body.contains("<gamesession>0</gamesession>"));
    }

    #[tokio::test]
    async fn test_launch_mandatory_encryption_rejects_corever_zero() {
        let (state, _dir) = test_state();
        let mut config = state.config.clone();
        config.lan_encryption = EncryptionMode::Mandatory;
        let state = AppState::with_subsystems(
            config,
            state.identity.clone(),
            crate::clients::ClientStore::new(),
            state.proc.clone(),
            state.video.clone(),
        );

        let body = body_of(
            launch(State(state.clone()), Extension(verified_conn()), query(&launch_params())).await,
        )
        .await;

        assert!(body.contains("status_code=\"403\""));
        assert!(body.contains("Encryption is mandatory"));
        assert!(body.contains("<gamesession>0</gamesession>"));
        assert!(state.hub.take_pending().is_none());
    }

    #[tokio::test]
    async fn test_resume_without_running_app() {
        let (state, _dir) = test_state();
        let body = body_of(
            resume(State(state), Extension(verified_conn()), query(&launch_params())).await,
        )
        .await;

        assert!(body.contains("status_code=\"503\""));
        assert!(body.contains("No running app to resume"));
    }

    #[tokio::test]
    async fn test_resume_after_launch() {
        let (state, _dir) = test_state();
        launch(State(state.clone()), Extension(verified_conn()), query(&launch_params())).await;
        state.hub.take_pending();

        let body = body_of(
            resume(
                State(state.clone()),
                Extension(verified_conn()),
                query(&[
                    ("rikey", "00112233445566778899aabbccddeeff"),
                    ("rikeyid", "1"),
                ]),
            )
            .await,
        )
        .await;

        assert!(body.contains("status_code=\"200\""));
        assert!(body.contains("<resume>1</resume>"));
        let session = state.hub.take_pending().unwrap();
        // No localAudioPlayMode on resume: the launch-time value sticks.
        assert!(session.host_audio);
    }

    #[tokio::test]
    async fn test_cancel_idle_and_with_running_app() {
        let (state, _dir) = test_state();

        let body = body_of(cancel(State(state.clone())).await).await;
        assert!(body.contains("<cancel>1</cancel>"));

        launch(State(state.clone()), Extension(verified_conn()), query(&launch_params())).await;
        assert_eq!(state.proc.running(), 1);

        let body = body_of(cancel(State(state.clone())).await).await;
        assert!(body.contains("<cancel>1</cancel>"));
        assert_eq!(state.proc.running(), 0);
    }

    #[tokio::test]
    async fn test_cancel_with_active_stream() {
        let (state, _dir) = test_state();
        state.hub.begin_session(
            3,
            ActiveSession {
                client_uuid: "c".into(),
                app_id: 1,
            },
        );

        let body = body_of(cancel(State(state)).await).await;
        assert!(body.contains("status_code=\"503\""));
        assert!(body.contains("All sessions must be disconnected before quitting"));
    }
}
