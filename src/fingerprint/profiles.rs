//! Browser fingerprint profiles.

use rand::seq::SliceRandom;

use super::http2::Http2Settings;
use super::tls::TlsFingerprint;

/// Browser fingerprint profile for impersonation.
///
/// `Random` is resolved to a concrete browser once per connection via
/// [`FingerprintProfile::sample`]; combined with BoringSSL's extension
/// permutation this yields a fresh handshake shape on every connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintProfile {
    /// Chrome 142 on macOS.
    Chrome,
    /// Firefox 135 on macOS.
    Firefox,
    /// Safari 18 on macOS.
    Safari,
    /// A fresh browser profile per connection.
    Random,
}

const BROWSERS: &[FingerprintProfile] = &[
    FingerprintProfile::Chrome,
    FingerprintProfile::Firefox,
    FingerprintProfile::Safari,
];

impl FingerprintProfile {
    /// Map a configuration string to a profile. Empty means no spoofing;
    /// unrecognized values fall back to Chrome.
    pub fn from_config(value: &str) -> Option<Self> {
        match value {
            "" => None,
            "firefox" => Some(Self::Firefox),
            "safari" => Some(Self::Safari),
            "random" => Some(Self::Random),
            _ => Some(Self::Chrome),
        }
    }

    /// Resolve to a concrete browser, sampling when `Random`.
    pub fn sample(self) -> Self {
        match self {
            Self::Random => *BROWSERS
                .choose(&mut rand::thread_rng())
                .expect("browser set is non-empty"),
            concrete => concrete,
        }
    }

    /// Get the TLS fingerprint for this profile.
    pub fn tls_fingerprint(&self) -> TlsFingerprint {
        match self {
            Self::Firefox => TlsFingerprint::firefox(),
            Self::Safari => TlsFingerprint::safari(),
            Self::Chrome | Self::Random => TlsFingerprint::chrome(),
        }
    }

    /// Get the HTTP/2 SETTINGS for this profile.
    pub fn http2_settings(&self) -> Http2Settings {
        match self {
            Self::Firefox => Http2Settings::firefox(),
            Self::Safari => Http2Settings::safari(),
            Self::Chrome | Self::Random => Http2Settings::chrome(),
        }
    }

    /// Short name for log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Firefox => "firefox",
            Self::Safari => "safari",
            Self::Random => "random",
        }
    }
}
