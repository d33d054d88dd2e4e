/// Default HTTPS (mutual-TLS) port of the GameStream catalog.
pub const PORT_HTTPS: u16 = 47984;

/// Default plaintext HTTP port (pairing bootstrap and reduced serverinfo).
pub const PORT_HTTP: u16 = 47989;

/// Port the RTSP handshake is reachable on, advertised in `sessionUrl0`.
pub const PORT_RTSP_SETUP: u16 = 48010;

/// AES-128 pairing key length in bytes.
pub const PAIRING_KEY_LEN: usize = 16;

/// Minimum length of the transmitted pairing salt, in hex characters.
pub const SALT_HEX_MIN: usize = 32;

/// Number of decimal digits in a pairing PIN.
pub const PIN_LENGTH: usize = 4;

/// GFE version reported to clients. Moonlight gates feature detection on
/// this string, so it must stay at a value shipped by GFE.
pub const GFE_VERSION: &str = "3.23.0.74";

/// `MaxLumaPixelsHEVC` advertised when HEVC encoding is available.
pub const MAX_LUMA_PIXELS_HEVC: &str = "1869449984";

/// Surround-audio info default (stereo).
pub const SURROUND_INFO_DEFAULT: &str = "196610";

/// Server codec mode flags, reported as a bitmask in `serverinfo`.
pub const SCM_H264: u32 = 0x0000_0001;
pub const SCM_H264_HIGH8_444: u32 = 0x0000_0002;
pub const SCM_HEVC: u32 = 0x0000_0004;
pub const SCM_HEVC_MAIN10: u32 = 0x0000_0008;
pub const SCM_HEVC_REXT8_444: u32 = 0x0000_0010;
pub const SCM_HEVC_REXT10_444: u32 = 0x0000_0020;
pub const SCM_AV1_MAIN8: u32 = 0x0001_0000;
pub const SCM_AV1_MAIN10: u32 = 0x0002_0000;
pub const SCM_AV1_HIGH8_444: u32 = 0x0004_0000;
pub const SCM_AV1_HIGH10_444: u32 = 0x0008_0000;
