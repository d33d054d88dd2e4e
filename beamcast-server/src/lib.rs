//! GameStream-compatible pairing and session-control server.
//!
//! The daemon exposes two endpoints: plaintext HTTP for the pairing
//! bootstrap and mutual-TLS HTTPS for the session catalog. Host UIs embed
//! this crate to drive the out-of-band pieces: [`api::pair::submit_pin`]
//! completes a suspended pairing, [`api::pair::request_otp`] registers a
//! one-time PIN, and [`state::AppState::unpair_client`] /
//! [`state::AppState::erase_all_clients`] manage the authorized set.

pub mod api;
pub mod certs;
pub mod clients;
pub mod config;
pub mod error;
pub mod listener;
pub mod net;
pub mod state;
pub mod streaming;
pub mod xml;
