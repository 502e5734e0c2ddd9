//! HTTP/2 fingerprint configuration (SETTINGS frame).
//!
//! A spoofed ClientHello followed by default-library SETTINGS is itself a
//! classifier signal, so the connection preface is shaped to the same
//! browser as the TLS layer.

/// HTTP/2 SETTINGS for fingerprinting.
#[derive(Debug, Clone)]
pub struct Http2Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: u32,
    /// Connection-level window. Browsers enlarge it with an immediate
    /// WINDOW_UPDATE after the preface; h2 expresses the same total directly.
    pub connection_window_size: u32,
}

impl Http2Settings {
    /// Chrome sends initial 65535 + WINDOW_UPDATE of 15663105 = ~15 MiB total.
    pub fn chrome() -> Self {
        Self {
            header_table_size: 65536,
            enable_push: false,
            max_concurrent_streams: 1000,
            initial_window_size: 6_291_456,
            max_frame_size: 16384,
            max_header_list_size: 262_144,
            connection_window_size: 15_728_640,
        }
    }

    pub fn firefox() -> Self {
        Self {
            header_table_size: 65536,
            enable_push: false,
            max_concurrent_streams: 100,
            initial_window_size: 131_072,
            max_frame_size: 16384,
            max_header_list_size: 393_216,
            connection_window_size: 12_582_912,
        }
    }

    pub fn safari() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: false,
            max_concurrent_streams: 100,
            initial_window_size: 2_097_152,
            max_frame_size: 16384,
            max_header_list_size: 262_144,
            connection_window_size: 10_485_760,
        }
    }
}

impl Default for Http2Settings {
    fn default() -> Self {
        Self::chrome()
    }
}
