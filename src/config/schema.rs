use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::video::format::Resolution;
use crate::webrtc::config::WebRtcConfig;

/// Top-level teleoperator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TeleopConfig {
    /// HTTPS / signaling listener
    pub server: ServerConfig,
    /// Outbound camera tracks
    pub video: VideoConfig,
    /// Calibration and action mapping
    pub control: ControlConfig,
    /// Peer transport settings
    pub webrtc: WebRtcConfig,
}

/// HTTPS server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address
    pub host: String,
    /// Listener port
    pub port: u16,
    /// Serve HTTPS. WebXR refuses plain HTTP except on localhost.
    pub tls: bool,
    /// Certificate PEM; generated when unset or invalid
    pub ssl_cert_path: Option<PathBuf>,
    /// Private key PEM
    pub ssl_key_path: Option<PathBuf>,
    /// Directory served under /static (the headset web client)
    pub static_dir: Option<PathBuf>,
    /// Upper bound for closing sessions and stopping the listener
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8443,
            tls: true,
            ssl_cert_path: None,
            ssl_key_path: None,
            static_dir: None,
            shutdown_timeout_ms: 3000,
        }
    }
}

/// Camera streaming configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VideoConfig {
    /// One outbound track per name, in this order
    pub camera_names: Vec<String>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            camera_names: vec![
                "left_wrist".to_string(),
                "right_wrist".to_string(),
                "left_exo".to_string(),
            ],
            width: 640,
            height: 480,
            fps: 30,
        }
    }
}

impl VideoConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Which arms receive actions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmMode {
    /// Both hands, keys prefixed `left_` / `right_`
    #[default]
    Bimanual,
    /// Right hand only, unprefixed keys
    Single,
}

impl std::fmt::Display for ArmMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArmMode::Bimanual => write!(f, "bimanual"),
            ArmMode::Single => write!(f, "single"),
        }
    }
}

impl std::str::FromStr for ArmMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bimanual" | "dual" | "both" => Ok(ArmMode::Bimanual),
            "single" | "right" => Ok(ArmMode::Single),
            _ => Err(format!("Unknown arm mode: {}", s)),
        }
    }
}

/// Calibration and action mapping configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControlConfig {
    /// Multiplier applied to calibrated controller displacement
    pub position_scale: f64,
    pub arm_mode: ArmMode,
    /// Snapshot polling interval while waiting for both grips
    pub calibration_poll_ms: u64,
    /// Control loop rate of the bundled binary
    pub control_rate_hz: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            position_scale: 1.0,
            arm_mode: ArmMode::Bimanual,
            calibration_poll_ms: 10,
            control_rate_hz: 30,
        }
    }
}
