//! The `/pair` endpoint and the out-of-band PIN entry channel.
//!
//! A single endpoint dispatches the four handshake phases on query
//! parameters. Phase 1 (`getservercert`) has three sub-paths for how the
//! PIN reaches the server: a pre-registered one-time PIN, an interactive
//! stdin prompt, or the default asynchronous path where the response is
//! suspended until `submit_pin` is called from another task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Query, State};
use axum::response::Response;
use tokio::sync::oneshot;
use uuid::Uuid;

use beamcast_core::constants::PIN_LENGTH;
use beamcast_core::crypto::{hex_decode_loose, keys, random};
use beamcast_core::pairing::{PairingClient, PairingError, PairingSession};

use crate::clients::NamedCertificate;
use crate::state::{AppState, OtpState, PairingState, PendingPair};
use crate::xml::XmlDoc;

pub async fn pair(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if !state.config.enable_pairing {
        return XmlDoc::status(403)
            .message("Pairing is disabled for this instance")
            .into_response();
    }

    let Some(unique_id) = params.get("uniqueid").cloned() else {
        return XmlDoc::status(400)
            .message("Missing uniqueid parameter")
            .into_response();
    };

    if let Some(phrase) = params.get("phrase") {
        match phrase.as_str() {
            "getservercert" => get_server_cert(&state, &params, &unique_id).await,
            // Probe from an already-paired client.
            "pairchallenge" => XmlDoc::ok().text("paired", 1).into_response(),
            _ => XmlDoc::status(404)
                .message("Invalid pairing request")
                .into_response(),
        }
    } else if let Some(value) = params.get("clientchallenge") {
        client_challenge(&state, &unique_id, value).await
    } else if let Some(value) = params.get("serverchallengeresp") {
        server_challenge_response(&state, &unique_id, value).await
    } else if let Some(value) = params.get("clientpairingsecret") {
        client_pairing_secret(&state, &unique_id, value).await
    } else {
        XmlDoc::status(404)
            .message("Invalid pairing request")
            .into_response()
    }
}

/// Phase 1: register a fresh session and answer with the server
/// certificate once a PIN is available.
async fn get_server_cert(
    state: &Arc<AppState>,
    params: &HashMap<String, String>,
    unique_id: &str,
) -> Response {
    let Some(device_name) = params.get("devicename") else {
        return XmlDoc::status(400)
            .message("Missing devicename parameter")
            .into_response();
    };
    let Some(client_cert_hex) = params.get("clientcert") else {
        return XmlDoc::status(400)
            .message("Missing clientcert parameter")
            .into_response();
    };
    let Some(salt) = params.get("salt") else {
        return XmlDoc::status(400)
            .message("Missing salt parameter")
            .into_response();
    };

    let cert_pem = match hex_decode_loose(client_cert_hex).map(String::from_utf8) {
        Ok(Ok(pem)) => pem,
        _ => {
            return XmlDoc::status(400)
                .message("Invalid clientcert parameter")
                .into_response();
        }
    };

    let name = if device_name == "roth" {
        // Ancient Moonlight builds identify themselves by their codename.
        "Legacy Moonlight Client".to_string()
    } else {
        device_name.clone()
    };

    tracing::debug!(uniqueid = %unique_id, device = %name, "pairing initiated");

    let session = PairingSession::new(
        PairingClient {
            unique_id: unique_id.to_string(),
            name,
            cert_pem,
        },
        salt.clone(),
    );

    // The stdin prompt blocks, so read it before taking the pairing lock.
    let stdin_pin = if state.config.pin_stdin && !params.contains_key("otpauth") {
        Some(read_stdin_pin().await)
    } else {
        None
    };

    let ttl = Duration::from_secs(state.config.pairing_ttl_secs);
    let mut pairing = state.pairing.lock().await;
    pairing.prune_expired(ttl);
    // Replaces any prior handshake for this uniqueid; a replaced entry
    // drops its suspended responder, waking the parked request.
    pairing.sessions.insert(
        unique_id.to_string(),
        PendingPair {
            session,
            responder: None,
            created: Instant::now(),
        },
    );

    let PairingState { sessions, otp } = &mut *pairing;
    let entry = sessions
        .get_mut(unique_id)
        .expect("session inserted under this lock");

    if let Some(otpauth) = params.get("otpauth") {
        let otp_ttl = Duration::from_secs(state.config.otp_expire_secs);
        let usable = otp.as_ref().is_some_and(|o| !o.expired(otp_ttl));
        if !usable {
            *otp = None;
            return XmlDoc::status(503)
                .message("OTP auth not available.")
                .into_response();
        }

        let registered = otp.as_ref().expect("checked above");
        let expected = keys::otp_auth_hash(
            &registered.pin,
            entry.session.salt(),
            &registered.passphrase,
        );
        if expected.eq_ignore_ascii_case(otpauth) {
            let taken = otp.take().expect("checked above");
            if !taken.device_name.is_empty() {
                entry.session.client.name = taken.device_name;
            }
            tracing::info!(device = %entry.session.client.name, "OTP pairing accepted");
            return server_cert_reply(&mut entry.session, taken.pin.as_bytes(), state)
                .into_response();
        }

        // Deliberately positive on mismatch: the attacker derives a key
        // from random bytes and fails in phase 4 with no distinguishing
        // signal or timing difference.
        let bogus = match random::rand_bytes(16) {
            Ok(bytes) => bytes,
            Err(e) => {
                return XmlDoc::status(500).message(e.to_string()).into_response();
            }
        };
        return server_cert_reply(&mut entry.session, &bogus, state).into_response();
    }

    if let Some(pin) = stdin_pin {
        return server_cert_reply(&mut entry.session, pin.as_bytes(), state).into_response();
    }

    // Asynchronous path: suspend the response until the PIN arrives.
    let (tx, rx) = oneshot::channel();
    entry.responder = Some(tx);
    drop(pairing);

    match rx.await {
        Ok(doc) => doc.into_response(),
        Err(_) => XmlDoc::status(410)
            .message("Pairing session superseded")
            .into_response(),
    }
}

async fn read_stdin_pin() -> String {
    tokio::task::spawn_blocking(|| {
        use std::io::{BufRead, Write};

        print!("Please insert pin: ");
        let _ = std::io::stdout().flush();

        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
        line.trim().to_string()
    })
    .await
    .unwrap_or_default()
}

/// Derive the session key and build the phase-1 reply.
fn server_cert_reply(session: &mut PairingSession, pin: &[u8], state: &AppState) -> XmlDoc {
    match session.derive_key(pin) {
        Ok(()) => XmlDoc::ok()
            .text("paired", 1)
            .text("plaincert", hex::encode(state.identity.cert_pem.as_bytes())),
        Err(PairingError::SaltTooShort) => XmlDoc::status(400)
            .message("Salt too short")
            .text("paired", 0),
        Err(e) => XmlDoc::status(400).message(e.to_string()).text("paired", 0),
    }
}

/// Phase 2.
async fn client_challenge(state: &Arc<AppState>, unique_id: &str, value: &str) -> Response {
    let Ok(challenge) = hex_decode_loose(value) else {
        return XmlDoc::status(400)
            .message("Invalid clientchallenge parameter")
            .text("paired", 0)
            .into_response();
    };

    let mut pairing = state.pairing.lock().await;
    let Some(entry) = pairing.sessions.get_mut(unique_id) else {
        return no_session();
    };

    match entry
        .session
        .client_challenge(&challenge, &state.identity.cert_pem)
    {
        Ok(encrypted) => XmlDoc::ok()
            .text("paired", 1)
            .text("challengeresponse", hex::encode(encrypted))
            .into_response(),
        Err(e) => phase_error(e),
    }
}

/// Phase 3.
async fn server_challenge_response(
    state: &Arc<AppState>,
    unique_id: &str,
    value: &str,
) -> Response {
    let Ok(encrypted) = hex_decode_loose(value) else {
        return XmlDoc::status(400)
            .message("Invalid serverchallengeresp parameter")
            .text("paired", 0)
            .into_response();
    };

    let mut pairing = state.pairing.lock().await;
    let Some(entry) = pairing.sessions.get_mut(unique_id) else {
        return no_session();
    };

    match entry
        .session
        .server_challenge_response(&encrypted, &state.identity.key_pem)
    {
        Ok(pairing_secret) => XmlDoc::ok()
            .text("paired", 1)
            .text("pairingsecret", hex::encode(pairing_secret))
            .into_response(),
        Err(e) => phase_error(e),
    }
}

/// Phase 4: authenticate and, on success, persist the client.
async fn client_pairing_secret(state: &Arc<AppState>, unique_id: &str, value: &str) -> Response {
    let Ok(payload) = hex_decode_loose(value) else {
        return XmlDoc::status(400)
            .message("Invalid clientpairingsecret parameter")
            .text("paired", 0)
            .into_response();
    };

    let mut pairing = state.pairing.lock().await;
    let (verdict, client) = {
        let Some(entry) = pairing.sessions.get_mut(unique_id) else {
            return no_session();
        };
        let verdict = entry.session.client_pairing_secret(&payload);
        (verdict, entry.session.client.clone())
    };

    match verdict {
        Ok(true) => {
            pairing.sessions.remove(unique_id);
            drop(pairing);

            let name = client.name.replace('(', "[").replace(')', "]");
            tracing::info!(device = %name, "pairing complete");
            state
                .add_authorized_client(NamedCertificate {
                    name,
                    cert: client.cert_pem,
                    uuid: Uuid::new_v4().to_string(),
                })
                .await;

            XmlDoc::ok().text("paired", 1).into_response()
        }
        Ok(false) => {
            // Wrong PIN or tampered exchange; likely an attacker, drop it.
            pairing.sessions.remove(unique_id);
            tracing::warn!(uniqueid = %unique_id, "pairing rejected: challenge mismatch");
            XmlDoc::ok().text("paired", 0).into_response()
        }
        Err(PairingError::SecretTooShort) => XmlDoc::status(400)
            .message("Clientpairingsecret too short")
            .text("paired", 0)
            .into_response(),
        Err(e) => phase_error(e),
    }
}

fn no_session() -> Response {
    XmlDoc::status(400)
        .message("No active pairing session")
        .text("paired", 0)
        .into_response()
}

fn phase_error(e: PairingError) -> Response {
    tracing::warn!(error = %e, "pairing phase failed");
    XmlDoc::status(400)
        .message(e.to_string())
        .text("paired", 0)
        .into_response()
}

/// Complete one in-flight asynchronous pairing with the given PIN.
///
/// Acts on the first session in the map; the host UI shows a single
/// pending pairing at a time and the protocol assumes one active pairing
/// per host. Returns whether a suspended response was actually written.
pub async fn submit_pin(state: &AppState, pin: &str, name: &str) -> bool {
    let mut pairing = state.pairing.lock().await;
    if pairing.sessions.is_empty() {
        return false;
    }

    if pin.len() != PIN_LENGTH {
        tracing::warn!(provided = pin.len(), "pin must be {PIN_LENGTH} digits");
        return false;
    }
    if !pin.chars().all(|c| c.is_ascii_digit()) {
        tracing::warn!("pin must be numeric");
        return false;
    }

    let Some(entry) = pairing.sessions.values_mut().next() else {
        return false;
    };

    let doc = server_cert_reply(&mut entry.session, pin.as_bytes(), state);
    if !name.is_empty() {
        entry.session.client.name = name.to_string();
    }

    match entry.responder.take() {
        Some(tx) => tx.send(doc).is_ok(),
        None => false,
    }
}

/// Register a one-time PIN for a single upcoming pairing.
///
/// For trusted out-of-band callers (a web UI authenticated by some other
/// mechanism). The caller relays the returned PIN to the pairing client.
pub async fn request_otp(state: &AppState, passphrase: &str, device_name: &str) -> Option<String> {
    if passphrase.len() < 4 {
        return None;
    }

    let pin = random::rand_digits(PIN_LENGTH).ok()?;
    let mut pairing = state.pairing.lock().await;
    pairing.otp = Some(OtpState {
        pin: pin.clone(),
        passphrase: passphrase.to_string(),
        device_name: device_name.to_string(),
        created: Instant::now(),
    });

    Some(pin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::test_state;
    use beamcast_core::crypto::{aes_ecb, x509};

    async fn body_of(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn field(body: &str, name: &str) -> Option<String> {
        let open = format!("<{name}>");
        let close = format!("</{name}>");
        let start = body.find(&open)? + open.len();
        let end = body[start..].find(&close)? + start;
        Some(body[start..end].to_string())
    }

    fn query(pairs: &[(&str, &str)]) -> Query<HashMap<String, String>> {
        Query(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    async fn send(state: &Arc<AppState>, pairs: &[(&str, &str)]) -> String {
        body_of(pair(State(state.clone()), query(pairs)).await).await
    }

    struct TestClient {
        cert_pem: String,
        key_pem: String,
        salt_hex: String,
        aes_key: [u8; 16],
    }

    fn test_client(pin: &str) -> TestClient {
        let identity = crate::certs::generate().unwrap();
        let salt_hex = hex::encode(random::rand_bytes(16).unwrap());
        let aes_key = keys::derive_pairing_key(&salt_hex, pin.as_bytes()).unwrap();
        TestClient {
            cert_pem: identity.cert_pem,
            key_pem: identity.key_pem,
            salt_hex,
            aes_key,
        }
    }

    /// Run phases 2-4 the way a Moonlight client would, returning the
    /// final `paired` value.
    async fn run_client_phases(state: &Arc<AppState>, client: &TestClient, uid: &str) -> String {
        // Phase 2.
        let challenge = random::rand_bytes(16).unwrap();
        let enc_challenge = aes_ecb::ecb_encrypt(&client.aes_key, &challenge).unwrap();
        let body = send(
            state,
            &[
                ("uniqueid", uid),
                ("clientchallenge", &hex::encode(enc_challenge)),
            ],
        )
        .await;
        let reply = hex::decode(field(&body, "challengeresponse").unwrap()).unwrap();
        let reply = aes_ecb::ecb_decrypt(&client.aes_key, &reply).unwrap();
        let server_challenge = &reply[32..48];

        // Phase 3.
        let client_der = x509::pem_to_der(&client.cert_pem).unwrap();
        let client_sig = x509::signature_bytes(&client_der).unwrap();
        let client_secret = random::rand_bytes(16).unwrap();

        let mut hashed = server_challenge.to_vec();
        hashed.extend_from_slice(&client_sig);
        hashed.extend_from_slice(&client_secret);
        let response_hash = keys::sha256(&hashed);
        let enc_response = aes_ecb::ecb_encrypt(&client.aes_key, &response_hash).unwrap();
        let body = send(
            state,
            &[
                ("uniqueid", uid),
                ("serverchallengeresp", &hex::encode(enc_response)),
            ],
        )
        .await;
        assert!(field(&body, "pairingsecret").is_some());

        // Phase 4.
        let secret_sig =
            beamcast_core::crypto::rsa::sign_sha256(&client.key_pem, &client_secret).unwrap();
        let mut payload = client_secret.clone();
        payload.extend_from_slice(&secret_sig);
        let body = send(
            state,
            &[
                ("uniqueid", uid),
                ("clientpairingsecret", &hex::encode(payload)),
            ],
        )
        .await;
        field(&body, "paired").unwrap()
    }

    #[tokio::test]
    async fn test_full_pairing_via_submit_pin() {
        let (state, _dir) = test_state();
        let client = test_client("1234");
        let uid = "aaaabbbbccccdddd";

        // Phase 1 parks until the operator provides the PIN.
        let phase1 = {
            let state = state.clone();
            let params = query(&[
                ("uniqueid", uid),
                ("devicename", "Test"),
                ("phrase", "getservercert"),
                ("clientcert", &hex::encode(client.cert_pem.as_bytes())),
                ("salt", &client.salt_hex),
            ]);
            tokio::spawn(async move { body_of(pair(State(state), params).await).await })
        };

        // Wait until the session is registered, then feed the PIN.
        let mut accepted = false;
        for _ in 0..100 {
            if submit_pin(&state, "1234", "").await {
                accepted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(accepted, "submit_pin never found a suspended response");

        let body = phase1.await.unwrap();
        assert_eq!(field(&body, "paired").as_deref(), Some("1"));
        let plaincert = field(&body, "plaincert").unwrap();
        assert_eq!(
            String::from_utf8(hex::decode(plaincert).unwrap()).unwrap(),
            state.identity.cert_pem
        );

        assert_eq!(run_client_phases(&state, &client, uid).await, "1");

        // Exactly one entry in the store, session gone from the map.
        assert_eq!(state.clients.read().await.entries().len(), 1);
        assert!(state.pairing.lock().await.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_pin_fails_in_phase_four() {
        let (state, _dir) = test_state();
        // Client derives from 1234, the operator will type 9999.
        let client = test_client("1234");
        let uid = "badpin";

        let phase1 = {
            let state = state.clone();
            let params = query(&[
                ("uniqueid", uid),
                ("devicename", "Test"),
                ("phrase", "getservercert"),
                ("clientcert", &hex::encode(client.cert_pem.as_bytes())),
                ("salt", &client.salt_hex),
            ]);
            tokio::spawn(async move { body_of(pair(State(state), params).await).await })
        };

        let mut accepted = false;
        for _ in 0..100 {
            if submit_pin(&state, "9999", "").await {
                accepted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(accepted);

        // Deliberately positive phase-1 response.
        let body = phase1.await.unwrap();
        assert_eq!(field(&body, "paired").as_deref(), Some("1"));

        // Phase 2 succeeds mechanically but yields garbage; the client
        // pushes on and the handshake collapses in phase 4.
        let challenge = random::rand_bytes(16).unwrap();
        let enc = aes_ecb::ecb_encrypt(&client.aes_key, &challenge).unwrap();
        let body = send(
            &state,
            &[("uniqueid", uid), ("clientchallenge", &hex::encode(enc))],
        )
        .await;
        assert_eq!(field(&body, "paired").as_deref(), Some("1"));

        let response_hash = keys::sha256(b"not the real response hash xxxx");
        let enc = aes_ecb::ecb_encrypt(&client.aes_key, &response_hash).unwrap();
        send(
            &state,
            &[("uniqueid", uid), ("serverchallengeresp", &hex::encode(enc))],
        )
        .await;

        let secret = random::rand_bytes(16).unwrap();
        let sig = beamcast_core::crypto::rsa::sign_sha256(&client.key_pem, &secret).unwrap();
        let mut payload = secret;
        payload.extend_from_slice(&sig);
        let body = send(
            &state,
            &[
                ("uniqueid", uid),
                ("clientpairingsecret", &hex::encode(payload)),
            ],
        )
        .await;

        assert_eq!(field(&body, "paired").as_deref(), Some("0"));
        assert!(body.contains("status_code=\"200\""));
        assert!(state.clients.read().await.is_empty());
        assert!(state.pairing.lock().await.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_otp_pairing_and_single_use() {
        let (state, _dir) = test_state();
        let client = test_client("0000"); // derived key replaced below
        let uid = "otp-client";

        let pin = request_otp(&state, "hunter2-passphrase", "Phone")
            .await
            .unwrap();
        assert_eq!(pin.len(), 4);

        let otpauth = keys::otp_auth_hash(&pin, &client.salt_hex, "hunter2-passphrase");
        let body = send(
            &state,
            &[
                ("uniqueid", uid),
                ("devicename", "Test"),
                ("phrase", "getservercert"),
                ("clientcert", &hex::encode(client.cert_pem.as_bytes())),
                ("salt", &client.salt_hex),
                ("otpauth", &otpauth),
            ],
        )
        .await;
        assert_eq!(field(&body, "paired").as_deref(), Some("1"));

        // The OTP names the device.
        assert_eq!(
            state
                .pairing
                .lock()
                .await
                .sessions
                .get(uid)
                .unwrap()
                .session
                .client
                .name,
            "Phone"
        );

        // Finish the handshake with the OTP PIN as the pairing PIN.
        let client = TestClient {
            aes_key: keys::derive_pairing_key(&client.salt_hex, pin.as_bytes()).unwrap(),
            ..client
        };
        assert_eq!(run_client_phases(&state, &client, uid).await, "1");

        // The OTP was consumed; replaying it is refused.
        let body = send(
            &state,
            &[
                ("uniqueid", "second"),
                ("devicename", "Test"),
                ("phrase", "getservercert"),
                ("clientcert", &hex::encode(client.cert_pem.as_bytes())),
                ("salt", &client.salt_hex),
                ("otpauth", &otpauth),
            ],
        )
        .await;
        assert!(body.contains("status_code=\"503\""));
        assert!(body.contains("OTP auth not available."));
    }

    #[tokio::test]
    async fn test_otp_mismatch_is_deliberately_positive() {
        let (state, _dir) = test_state();
        let client = test_client("0000");

        request_otp(&state, "correct-passphrase", "").await.unwrap();

        let bogus = keys::otp_auth_hash("0000", &client.salt_hex, "wrong-passphrase");
        let body = send(
            &state,
            &[
                ("uniqueid", "attacker"),
                ("devicename", "Evil"),
                ("phrase", "getservercert"),
                ("clientcert", &hex::encode(client.cert_pem.as_bytes())),
                ("salt", &client.salt_hex),
                ("otpauth", &bogus),
            ],
        )
        .await;

        // Positive response, but the derived key is garbage and the OTP
        // registration survives for the legitimate client.
        assert_eq!(field(&body, "paired").as_deref(), Some("1"));
        assert!(state.pairing.lock().await.otp.is_some());
    }

    #[tokio::test]
    async fn test_pairchallenge_probe() {
        let (state, _dir) = test_state();
        let body = send(
            &state,
            &[("uniqueid", "probe"), ("phrase", "pairchallenge")],
        )
        .await;
        assert_eq!(field(&body, "paired").as_deref(), Some("1"));
        assert!(body.contains("status_code=\"200\""));
    }

    #[tokio::test]
    async fn test_pairing_disabled() {
        let (state, _dir) = test_state();
        let mut config = state.config.clone();
        config.enable_pairing = false;
        let state = AppState::with_subsystems(
            config,
            state.identity.clone(),
            crate::clients::ClientStore::new(),
            state.proc.clone(),
            state.video.clone(),
        );

        let body = send(&state, &[("uniqueid", "x"), ("phrase", "pairchallenge")]).await;
        assert!(body.contains("status_code=\"403\""));
        assert!(body.contains("Pairing is disabled"));
    }

    #[tokio::test]
    async fn test_missing_uniqueid() {
        let (state, _dir) = test_state();
        let body = send(&state, &[("phrase", "getservercert")]).await;
        assert!(body.contains("status_code=\"400\""));
        assert!(body.contains("Missing uniqueid parameter"));
    }

    #[tokio::test]
    async fn test_unknown_dispatch_is_404() {
        let (state, _dir) = test_state();
        let body = send(&state, &[("uniqueid", "x")]).await;
        assert!(body.contains("status_code=\"404\""));
        assert!(body.contains("Invalid pairing request"));
    }

    #[tokio::test]
    async fn test_phase_without_session() {
        let (state, _dir) = test_state();
        let body = send(
            &state,
            &[("uniqueid", "ghost"), ("clientchallenge", "00112233")],
        )
        .await;
        assert!(body.contains("status_code=\"400\""));
        assert_eq!(field(&body, "paired").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_short_salt_rejected() {
        let (state, _dir) = test_state();
        let client = test_client("1234");

        let phase1 = {
            let state = state.clone();
            let params = query(&[
                ("uniqueid", "shortsalt"),
                ("devicename", "Test"),
                ("phrase", "getservercert"),
                ("clientcert", &hex::encode(client.cert_pem.as_bytes())),
                ("salt", "00112233"),
            ]);
            tokio::spawn(async move { body_of(pair(State(state), params).await).await })
        };

        for _ in 0..100 {
            if submit_pin(&state, "1234", "").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let body = phase1.await.unwrap();
        assert!(body.contains("status_code=\"400\""));
        assert!(body.contains("Salt too short"));
        assert_eq!(field(&body, "paired").as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_short_pairing_secret_is_400() {
        let (state, _dir) = test_state();
        let client = test_client("1234");
        let uid = "shortsecret";

        let phase1 = {
            let state = state.clone();
            let params = query(&[
                ("uniqueid", uid),
                ("devicename", "Test"),
                ("phrase", "getservercert"),
                ("clientcert", &hex::encode(client.cert_pem.as_bytes())),
                ("salt", &client.salt_hex),
            ]);
            tokio::spawn(async move { body_of(pair(State(state), params).await).await })
        };
        for _ in 0..100 {
            if submit_pin(&state, "1234", "").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        phase1.await.unwrap();

        let body = send(
            &state,
            &[
                ("uniqueid", uid),
                ("clientpairingsecret", &hex::encode([0u8; 16])),
            ],
        )
        .await;
        assert!(body.contains("status_code=\"400\""));
        assert!(body.contains("Clientpairingsecret too short"));
    }

    #[tokio::test]
    async fn test_replacement_supersedes_parked_request() {
        let (state, _dir) = test_state();
        let client = test_client("1234");
        let uid = "replaced";

        let parked = {
            let state = state.clone();
            let params = query(&[
                ("uniqueid", uid),
                ("devicename", "Test"),
                ("phrase", "getservercert"),
                ("clientcert", &hex::encode(client.cert_pem.as_bytes())),
                ("salt", &client.salt_hex),
            ]);
            tokio::spawn(async move {
                let resp = pair(State(state), params).await;
                (resp.status().as_u16(), body_of(resp).await)
            })
        };

        // Wait for the first request to park.
        for _ in 0..100 {
            if state
                .pairing
                .lock()
                .await
                .sessions
                .get(uid)
                .is_some_and(|p| p.responder.is_some())
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        // A second getservercert for the same uniqueid replaces the first.
        let second = {
            let state = state.clone();
            let params = query(&[
                ("uniqueid", uid),
                ("devicename", "Test"),
                ("phrase", "getservercert"),
                ("clientcert", &hex::encode(client.cert_pem.as_bytes())),
                ("salt", &client.salt_hex),
            ]);
            tokio::spawn(async move { body_of(pair(State(state), params).await).await })
        };

        let (status, body) = parked.await.unwrap();
        assert_eq!(status, 410);
        assert!(body.contains("Pairing session superseded"));

        // The replacement still completes normally.
        for _ in 0..100 {
            if submit_pin(&state, "1234", "").await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let body = second.await.unwrap();
        assert_eq!(field(&body, "paired").as_deref(), Some("1"));

        // At most one session per uniqueid.
        assert_eq!(state.pairing.lock().await.sessions.len(), 1);
    }

    #[tokio::test]
    async fn test_submit_pin_validation() {
        let (state, _dir) = test_state();

        // Empty map refuses outright.
        assert!(!submit_pin(&state, "1234", "").await);

        // Park a session.
        let client = test_client("1234");
        let _phase1 = {
            let state = state.clone();
            let params = query(&[
                ("uniqueid", "v"),
                ("devicename", "Test"),
                ("phrase", "getservercert"),
                ("clientcert", &hex::encode(client.cert_pem.as_bytes())),
                ("salt", &client.salt_hex),
            ]);
            tokio::spawn(async move { pair(State(state), params).await })
        };
        for _ in 0..100 {
            if !state.pairing.lock().await.sessions.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!submit_pin(&state, "123", "").await);
        assert!(!submit_pin(&state, "12345", "").await);
        assert!(!submit_pin(&state, "12a4", "").await);
    }

    #[tokio::test]
    async fn test_request_otp_rejects_short_passphrase() {
        let (state, _dir) = test_state();
        assert!(request_otp(&state, "abc", "Phone").await.is_none());
        assert!(request_otp(&state, "abcd", "Phone").await.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_cert_pairings_collapse_in_store() {
        let (state, _dir) = test_state();
        let client = test_client("1234");

        for uid in ["dup-one", "dup-two"] {
            let phase1 = {
                let state = state.clone();
                let params = query(&[
                    ("uniqueid", uid),
                    ("devicename", "Twin"),
                    ("phrase", "getservercert"),
                    ("clientcert", &hex::encode(client.cert_pem.as_bytes())),
                    ("salt", &client.salt_hex),
                ]);
                tokio::spawn(async move { body_of(pair(State(state), params).await).await })
            };
            for _ in 0..100 {
                if submit_pin(&state, "1234", "").await {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            phase1.await.unwrap();
            assert_eq!(run_client_phases(&state, &client, uid).await, "1");
        }

        // Same certificate twice: the persisted store keeps one entry.
        assert_eq!(state.clients.read().await.entries().len(), 1);
        assert_eq!(state.clients.read().await.entries()[0].name, "Twin");
    }
}
