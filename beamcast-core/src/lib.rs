//! Protocol and crypto logic for the Beamcast game-streaming host.
//!
//! Everything that does not touch the network or the filesystem lives here
//! so the server crate and the tests share identical byte-level behavior:
//! the pairing handshake, the AES/RSA primitives it is built on, and the
//! forgiving query-parameter parsing the GameStream wire format requires.

pub mod constants;
pub mod crypto;
pub mod pairing;
pub mod parse;
