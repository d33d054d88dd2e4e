//! Interfaces to the external streaming subsystems.
//!
//! The RTSP transport, the encoder pipeline, and real process management
//! live outside this server; the endpoints only need the seams below. The
//! default implementations are deliberately small: a static capability
//! report, an app catalog read from config, and an in-memory session
//! registry, enough to run the control plane end to end.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use serde::Deserialize;

use beamcast_core::constants::{
    SCM_AV1_HIGH10_444, SCM_AV1_HIGH8_444, SCM_AV1_MAIN10, SCM_AV1_MAIN8, SCM_H264,
    SCM_H264_HIGH8_444, SCM_HEVC, SCM_HEVC_MAIN10, SCM_HEVC_REXT10_444, SCM_HEVC_REXT8_444,
};
use beamcast_core::crypto::gcm::SessionCipher;

use crate::config::Config;

/// One entry in the app catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct AppEntry {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub image: Option<PathBuf>,
}

/// Probed encoder capabilities: mode 0 disables a codec, 2 enables the
/// 8-bit profile, 3 adds the 10-bit profile.
#[derive(Debug, Clone, Copy)]
pub struct CodecCaps {
    pub hevc_mode: u8,
    pub av1_mode: u8,
    pub h264_yuv444: bool,
    pub hevc_yuv444: bool,
    pub av1_yuv444: bool,
}

impl CodecCaps {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hevc_mode: config.hevc_mode,
            av1_mode: config.av1_mode,
            h264_yuv444: config.h264_yuv444,
            hevc_yuv444: config.hevc_yuv444,
            av1_yuv444: config.av1_yuv444,
        }
    }

    /// The `ServerCodecModeSupport` bitmask.
    pub fn mode_flags(&self) -> u32 {
        let mut flags = SCM_H264;
        if self.h264_yuv444 {
            flags |= SCM_H264_HIGH8_444;
        }
        if self.hevc_mode >= 2 {
            flags |= SCM_HEVC;
            if self.hevc_yuv444 {
                flags |= SCM_HEVC_REXT8_444;
            }
        }
        if self.hevc_mode >= 3 {
            flags |= SCM_HEVC_MAIN10;
            if self.hevc_yuv444 {
                flags |= SCM_HEVC_REXT10_444;
            }
        }
        if self.av1_mode >= 2 {
            flags |= SCM_AV1_MAIN8;
            if self.av1_yuv444 {
                flags |= SCM_AV1_HIGH8_444;
            }
        }
        if self.av1_mode >= 3 {
            flags |= SCM_AV1_MAIN10;
            if self.av1_yuv444 {
                flags |= SCM_AV1_HIGH10_444;
            }
        }
        flags
    }

    pub fn hevc_enabled(&self) -> bool {
        self.hevc_mode >= 2
    }

    pub fn hdr_supported(&self) -> bool {
        self.hevc_mode >= 3
    }
}

/// Everything the streaming subsystem needs to start or resume a stream.
pub struct LaunchSession {
    pub id: u32,
    /// Client-supplied remote-input key, also the RTSP GCM key.
    pub gcm_key: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub device_name: String,
    pub client_uuid: String,
    pub app_id: u32,
    pub enable_sops: bool,
    pub surround_info: i64,
    pub surround_params: String,
    pub gcmap: u32,
    pub enable_hdr: bool,
    pub virtual_display: bool,
    pub scale_factor: u32,
    pub host_audio: bool,
    /// Present iff the client reported `corever >= 1`.
    pub rtsp_cipher: Option<SessionCipher>,
    /// First four bytes are the big-endian `rikeyid`; the rest stay zero.
    pub iv: [u8; 16],
    pub rtsp_url_scheme: &'static str,
    /// Hex-encoded payload echoed over the AV ping channel.
    pub av_ping_payload: String,
    pub control_connect_data: u32,
}

/// Process management seam: whatever launches and tears down apps.
pub trait ProcessHost: Send + Sync {
    /// Id of the currently running app, 0 when idle.
    fn running(&self) -> u32;

    /// Start an app. An error is the HTTP-like status code to surface.
    fn execute(&self, app: &AppEntry, session: &LaunchSession) -> Result<(), u16>;

    fn terminate(&self);

    fn apps(&self) -> Vec<AppEntry>;

    fn app_image(&self, app_id: u32) -> Option<PathBuf>;
}

/// Encoder probing seam.
pub trait VideoSubsystem: Send + Sync {
    /// Re-probe the encoders, refreshing the capability report.
    fn probe(&self) -> Result<CodecCaps, String>;

    fn caps(&self) -> CodecCaps;
}

/// Registry of active streaming sessions plus the descriptors waiting for
/// the RTSP layer to pick them up.
pub struct StreamHub {
    active: DashMap<u32, ActiveSession>,
    pending: Mutex<Vec<LaunchSession>>,
    session_counter: AtomicU32,
    host_audio: AtomicBool,
}

/// Connection-level record of a stream the RTSP layer is serving.
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub client_uuid: String,
    pub app_id: u32,
}

impl StreamHub {
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
            pending: Mutex::new(Vec::new()),
            session_counter: AtomicU32::new(0),
            host_audio: AtomicBool::new(false),
        }
    }

    pub fn next_session_id(&self) -> u32 {
        self.session_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Number of streams currently being served.
    pub fn session_count(&self) -> usize {
        self.active.len()
    }

    /// Hand a descriptor to the RTSP layer.
    pub fn raise(&self, session: LaunchSession) {
        tracing::info!(
            session_id = session.id,
            app_id = session.app_id,
            device = %session.device_name,
            encrypted = session.rtsp_cipher.is_some(),
            "raising launch session"
        );
        self.pending
            .lock()
            .expect("pending sessions lock poisoned")
            .push(session);
    }

    /// Take the oldest raised descriptor (called by the RTSP layer).
    pub fn take_pending(&self) -> Option<LaunchSession> {
        let mut pending = self.pending.lock().expect("pending sessions lock poisoned");
        if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        }
    }

    /// Called by the RTSP layer when a stream starts.
    pub fn begin_session(&self, id: u32, session: ActiveSession) {
        self.active.insert(id, session);
    }

    /// Called by the RTSP layer when a stream ends.
    pub fn end_session(&self, id: u32) {
        self.active.remove(&id);
    }

    pub fn host_audio(&self) -> bool {
        self.host_audio.load(Ordering::Relaxed)
    }

    pub fn set_host_audio(&self, value: bool) {
        self.host_audio.store(value, Ordering::Relaxed);
    }
}

impl Default for StreamHub {
    fn default() -> Self {
        Self::new()
    }
}

/// App catalog and process control backed by configuration.
pub struct LocalProcessHost {
    apps: Vec<AppEntry>,
    running: AtomicU32,
}

impl LocalProcessHost {
    pub fn from_config(config: &Config) -> Self {
        let apps = config
            .apps_file
            .as_deref()
            .map(Self::load_apps)
            .unwrap_or_default();

        let apps = if apps.is_empty() {
            vec![AppEntry {
                id: 1,
                title: "Desktop".to_string(),
                image: None,
            }]
        } else {
            apps
        };

        Self {
            apps,
            running: AtomicU32::new(0),
        }
    }

    fn load_apps(path: &Path) -> Vec<AppEntry> {
        match std::fs::read(path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(apps) => apps,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "couldn't parse app catalog");
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "couldn't read app catalog");
                Vec::new()
            }
        }
    }
}

impl ProcessHost for LocalProcessHost {
    fn running(&self) -> u32 {
        self.running.load(Ordering::Relaxed)
    }

    fn execute(&self, app: &AppEntry, session: &LaunchSession) -> Result<(), u16> {
        tracing::info!(app_id = app.id, title = %app.title, session_id = session.id, "starting app");
        self.running.store(app.id, Ordering::Relaxed);
        Ok(())
    }

    fn terminate(&self) {
        let app_id = self.running.swap(0, Ordering::Relaxed);
        if app_id > 0 {
            tracing::info!(app_id, "terminating app");
        }
    }

    fn apps(&self) -> Vec<AppEntry> {
        self.apps.clone()
    }

    fn app_image(&self, app_id: u32) -> Option<PathBuf> {
        self.apps
            .iter()
            .find(|app| app.id == app_id)
            .and_then(|app| app.image.clone())
    }
}

/// Capability report frozen from configuration; probing re-reads it.
pub struct StaticVideo {
    caps: CodecCaps,
}

impl StaticVideo {
    pub fn from_config(config: &Config) -> Self {
        Self {
            caps: CodecCaps::from_config(config),
        }
    }
}

impl VideoSubsystem for StaticVideo {
    fn probe(&self) -> Result<CodecCaps, String> {
        Ok(self.caps)
    }

    fn caps(&self) -> CodecCaps {
        self.caps
    }
}
