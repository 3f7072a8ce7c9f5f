//! Configuration: serde schema plus TOML load/save

mod schema;

pub use schema::{ArmMode, ControlConfig, ServerConfig, TeleopConfig, VideoConfig};

use std::fs;
use std::path::Path;

use crate::error::{AppError, Result};

impl TeleopConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Write as pretty TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        let video = &self.video;
        if video.fps == 0 {
            return Err(AppError::Config("video.fps must be at least 1".to_string()));
        }
        if video.width == 0 || video.height == 0 {
            return Err(AppError::Config(format!(
                "video resolution {}x{} has a zero dimension",
                video.width, video.height
            )));
        }
        if !video.resolution().is_valid() {
            return Err(AppError::Config(format!(
                "video resolution {}x{} must have even dimensions for H.264",
                video.width, video.height
            )));
        }
        if let Some(name) = video.camera_names.iter().find(|n| n.trim().is_empty()) {
            return Err(AppError::Config(format!("invalid camera name {:?}", name)));
        }
        let mut names = video.camera_names.clone();
        names.sort();
        names.dedup();
        if names.len() != video.camera_names.len() {
            return Err(AppError::Config("duplicate camera names".to_string()));
        }

        let scale = self.control.position_scale;
        if !scale.is_finite() || scale <= 0.0 {
            return Err(AppError::Config(format!(
                "control.position_scale must be positive, got {}",
                scale
            )));
        }
        if self.control.control_rate_hz == 0 {
            return Err(AppError::Config(
                "control.control_rate_hz must be at least 1".to_string(),
            ));
        }
        if self.server.ssl_cert_path.is_some() != self.server.ssl_key_path.is_some() {
            return Err(AppError::Config(
                "ssl_cert_path and ssl_key_path must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TeleopConfig::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8443);
        assert_eq!(
            config.video.camera_names,
            vec!["left_wrist", "right_wrist", "left_exo"]
        );
        assert_eq!((config.video.width, config.video.height, config.video.fps), (640, 480, 30));
        assert_eq!(config.control.position_scale, 1.0);
        assert_eq!(config.control.arm_mode, ArmMode::Bimanual);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = TeleopConfig::from_toml(
            r#"
            [server]
            port = 9443

            [control]
            arm_mode = "single"
            position_scale = 1.5
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.control.arm_mode, ArmMode::Single);
        assert_eq!(config.control.position_scale, 1.5);
        assert_eq!(config.video.fps, 30);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = TeleopConfig::default();
        config.video.fps = 0;
        assert!(config.validate().is_err());

        let mut config = TeleopConfig::default();
        config.video.width = 0;
        assert!(config.validate().is_err());

        let mut config = TeleopConfig::default();
        config.control.position_scale = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = TeleopConfig::default();
        config.control.position_scale = -1.0;
        assert!(config.validate().is_err());

        let mut config = TeleopConfig::default();
        config.video.camera_names.push(" ".to_string());
        assert!(config.validate().is_err());

        let mut config = TeleopConfig::default();
        config.server.ssl_cert_path = Some("cert.pem".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("teleop.toml");

        let mut config = TeleopConfig::default();
        config.video.camera_names = vec!["front".to_string()];
        config.save(&path).unwrap();

        let loaded = TeleopConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = TeleopConfig::load(Path::new("/nonexistent/teleop.toml")).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
