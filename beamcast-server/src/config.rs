use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use beamcast_core::constants::{PORT_HTTP, PORT_HTTPS, PORT_RTSP_SETUP};

/// Encryption requirement for a network segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    Disabled,
    Enabled,
    Mandatory,
}

impl EncryptionMode {
    fn from_level(level: u8) -> Self {
        match level {
            0 => EncryptionMode::Disabled,
            1 => EncryptionMode::Enabled,
            _ => EncryptionMode::Mandatory,
        }
    }
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address for both listeners.
    pub bind_address: String,
    /// Port for the mutual-TLS HTTPS catalog.
    pub https_port: u16,
    /// Port for the plaintext pairing bootstrap.
    pub http_port: u16,
    /// Port advertised in `sessionUrl0` for the RTSP handshake.
    pub rtsp_port: u16,
    /// Host name reported in `serverinfo`.
    pub name: String,
    /// Path of the persisted client store.
    pub state_file: PathBuf,
    /// Server certificate / private key PEM paths.
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// Whether `/pair` is served at all.
    pub enable_pairing: bool,
    /// Skip loading and persisting the client store.
    pub fresh_state: bool,
    /// Read pairing PINs from stdin instead of suspending the response.
    pub pin_stdin: bool,
    /// Concurrent stream limit.
    pub channels: usize,
    /// Encryption requirements by network segment.
    pub lan_encryption: EncryptionMode,
    pub wan_encryption: EncryptionMode,
    /// One-time-PIN lifetime in seconds.
    pub otp_expire_secs: u64,
    /// Pending pairing-session lifetime in seconds.
    pub pairing_ttl_secs: u64,
    /// TLS handshake deadline in seconds.
    pub tls_handshake_timeout_secs: u64,
    /// Optional JSON file describing the app catalog.
    pub apps_file: Option<PathBuf>,
    /// Server commands broadcast to paired clients.
    pub server_cmds: Vec<String>,
    /// Static video capability report: 0 = off, 2 = 8-bit, 3 = 10-bit.
    pub hevc_mode: u8,
    pub av1_mode: u8,
    /// YUV 4:4:4 support per codec family.
    pub h264_yuv444: bool,
    pub hevc_yuv444: bool,
    pub av1_yuv444: bool,
}

impl Config {
    /// Load configuration from `BEAMCAST_*` environment variables, with
    /// defaults suitable for a LAN host.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("BEAMCAST_BIND", "0.0.0.0"),
            https_port: env_parse("BEAMCAST_HTTPS_PORT", PORT_HTTPS),
            http_port: env_parse("BEAMCAST_HTTP_PORT", PORT_HTTP),
            rtsp_port: env_parse("BEAMCAST_RTSP_PORT", PORT_RTSP_SETUP),
            name: env_or("BEAMCAST_NAME", "Beamcast"),
            state_file: PathBuf::from(env_or("BEAMCAST_STATE_FILE", "beamcast_state.json")),
            cert_file: PathBuf::from(env_or("BEAMCAST_CERT_FILE", "credentials/beamcast.crt")),
            key_file: PathBuf::from(env_or("BEAMCAST_KEY_FILE", "credentials/beamcast.key")),
            enable_pairing: env_parse("BEAMCAST_ENABLE_PAIRING", true),
            fresh_state: env_flag("BEAMCAST_FRESH_STATE"),
            pin_stdin: env_flag("BEAMCAST_PIN_STDIN"),
            channels: env_parse("BEAMCAST_CHANNELS", 1),
            lan_encryption: EncryptionMode::from_level(env_parse("BEAMCAST_LAN_ENCRYPTION", 0u8)),
            wan_encryption: EncryptionMode::from_level(env_parse("BEAMCAST_WAN_ENCRYPTION", 0u8)),
            otp_expire_secs: env_parse("BEAMCAST_OTP_EXPIRE_SECS", 180),
            pairing_ttl_secs: env_parse("BEAMCAST_PAIRING_TTL_SECS", 300),
            tls_handshake_timeout_secs: env_parse("BEAMCAST_TLS_HANDSHAKE_TIMEOUT_SECS", 5),
            apps_file: env::var("BEAMCAST_APPS_FILE").ok().map(PathBuf::from),
            server_cmds: env::var("BEAMCAST_SERVER_CMDS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            hevc_mode: env_parse("BEAMCAST_HEVC_MODE", 0u8),
            av1_mode: env_parse("BEAMCAST_AV1_MODE", 0u8),
            h264_yuv444: env_flag("BEAMCAST_H264_YUV444"),
            hevc_yuv444: env_flag("BEAMCAST_HEVC_YUV444"),
            av1_yuv444: env_flag("BEAMCAST_AV1_YUV444"),
        }
    }

    #[cfg(test)]
    pub fn for_tests(state_file: PathBuf) -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            https_port: 0,
            http_port: 0,
            rtsp_port: PORT_RTSP_SETUP,
            name: "Beamcast Test".into(),
            state_file,
            cert_file: PathBuf::from("unused.crt"),
            key_file: PathBuf::from("unused.key"),
            enable_pairing: true,
            fresh_state: false,
            pin_stdin: false,
            channels: 1,
            lan_encryption: EncryptionMode::Disabled,
            wan_encryption: EncryptionMode::Disabled,
            otp_expire_secs: 180,
            pairing_ttl_secs: 300,
            tls_handshake_timeout_secs: 5,
            apps_file: None,
            server_cmds: Vec::new(),
            hevc_mode: 0,
            av1_mode: 0,
            h264_yuv444: false,
            hevc_yuv444: false,
            av1_yuv444: false,
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    env_parse(key, false)
}
