//! Synchronous teleoperator facade used by the robot control loop
//!
//! The network side (HTTPS listener, sessions, ICE, video pacing) runs on a
//! tokio runtime owned by the teleoperator. The control loop calls
//! [`VrTeleoperator::get_action`] from its own thread; the two sides only meet
//! in the shared state bus and the camera frame buffer.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::action::{ActionKind, ActionMapper, RobotAction};
use super::calibration::Calibrator;
use crate::config::TeleopConfig;
use crate::error::{AppError, Result};
use crate::server::TeleopServer;
use crate::telemetry::SharedStateBus;
use crate::tls;
use crate::utils::{primary_ipv4_address, LogThrottler};
use crate::video::{CameraFrameBuffer, CameraSource, EncoderFactory, OpenH264Factory, VideoFrame};
use crate::webrtc::{SessionContext, ShutdownReport};

struct Connection {
    runtime: Runtime,
    server: TeleopServer,
}

/// VR headset teleoperator
pub struct VrTeleoperator {
    config: TeleopConfig,
    bus: Arc<SharedStateBus>,
    frames: Arc<CameraFrameBuffer>,
    encoders: Arc<dyn EncoderFactory>,
    cameras: Vec<(String, Box<dyn CameraSource>)>,
    calibrator: Calibrator,
    mapper: ActionMapper,
    connection: Option<Connection>,
    camera_warns: LogThrottler,
}

impl VrTeleoperator {
    pub fn new(config: TeleopConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            calibrator: Calibrator::new(config.control.position_scale),
            mapper: ActionMapper::new(config.control.arm_mode),
            config,
            bus: Arc::new(SharedStateBus::new()),
            frames: Arc::new(CameraFrameBuffer::new()),
            encoders: Arc::new(OpenH264Factory),
            cameras: Vec::new(),
            connection: None,
            camera_warns: LogThrottler::default(),
        })
    }

    /// Replace the video encoder used by new sessions
    pub fn with_encoder_factory(mut self, encoders: Arc<dyn EncoderFactory>) -> Self {
        self.encoders = encoders;
        self
    }

    pub fn config(&self) -> &TeleopConfig {
        &self.config
    }

    /// Telemetry bus fed by the data channels
    pub fn bus(&self) -> &Arc<SharedStateBus> {
        &self.bus
    }

    /// Frame buffer read by the outbound video tracks
    pub fn frames(&self) -> &Arc<CameraFrameBuffer> {
        &self.frames
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibrator.is_calibrated()
    }

    /// Address the listener is bound to while connected
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connection.as_ref().map(|c| c.server.local_addr())
    }

    pub fn action_features(&self) -> Vec<(String, ActionKind)> {
        self.mapper.features()
    }

    /// Start the server and, if `calibrate`, block until calibrated.
    ///
    /// Certificate failures are fatal.
    pub fn connect(&mut self, calibrate: bool) -> Result<()> {
        if self.is_connected() {
            return Err(AppError::AlreadyConnected);
        }
        tls::install_crypto_provider();

        let server_config = &self.config.server;
        let certs = if server_config.tls {
            Some(tls::resolve_certificate(
                server_config.ssl_cert_path.as_deref(),
                server_config.ssl_key_path.as_deref(),
            )?)
        } else {
            None
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("vr-teleop-net")
            .build()?;

        let ctx = SessionContext {
            bus: self.bus.clone(),
            frames: self.frames.clone(),
            encoders: self.encoders.clone(),
            camera_names: self.config.video.camera_names.clone(),
            resolution: self.config.video.resolution(),
            fps: self.config.video.fps,
            webrtc: self.config.webrtc.clone(),
        };
        let server = runtime.block_on(TeleopServer::start(server_config, ctx, certs.as_ref()))?;

        self.log_headset_url(server.local_addr(), server.is_tls());
        self.connection = Some(Connection { runtime, server });

        if calibrate {
            self.calibrate()?;
        }
        Ok(())
    }

    fn log_headset_url(&self, addr: SocketAddr, tls: bool) {
        let scheme = if tls { "https" } else { "http" };
        let host = if addr.ip().is_unspecified() {
            primary_ipv4_address()
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "localhost".to_string())
        } else {
            addr.ip().to_string()
        };
        let path = if self.config.server.static_dir.is_some() {
            "/static/index.html"
        } else {
            "/"
        };
        info!(
            "Open {}://{}:{}{} on the headset",
            scheme,
            host,
            addr.port(),
            path
        );
    }

    /// Block until both grips are held, then capture the reference pose
    pub fn calibrate(&mut self) -> Result<()> {
        self.calibrate_with(&CancellationToken::new(), None)
    }

    /// [`calibrate`](Self::calibrate) with a cancellation hook and optional timeout
    pub fn calibrate_with(
        &mut self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<()> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }
        let poll = Duration::from_millis(self.config.control.calibration_poll_ms.max(1));
        let deadline = timeout.map(|t| Instant::now() + t);
        self.calibrator
            .calibrate_blocking(&self.bus, poll, cancel, deadline)
    }

    /// Attach cameras polled on every [`get_action`](Self::get_action).
    ///
    /// Names outside the configured camera list are accepted but never streamed.
    pub fn set_cameras(&mut self, cameras: Vec<(String, Box<dyn CameraSource>)>) {
        for (name, _) in &cameras {
            if !self.config.video.camera_names.contains(name) {
                warn!("Camera {} has no outbound track", name);
            }
        }
        self.cameras = cameras;
    }

    fn pump_cameras(&mut self) {
        for (name, camera) in self.cameras.iter_mut() {
            match camera.read_latest() {
                Ok(Some(frame)) => self.frames.put(name.clone(), frame),
                Ok(None) => {}
                Err(e) => {
                    crate::warn_throttled!(self.camera_warns, name, "Camera {} read failed: {}", name, e);
                }
            }
        }
    }

    /// Produce the action for this control tick
    pub fn get_action(&mut self) -> Result<RobotAction> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }
        self.pump_cameras();
        let snapshot = self.bus.snapshot();
        let frame = self.calibrator.tick(&snapshot);
        Ok(self.mapper.map(frame.as_ref()))
    }

    /// Push observation images to the headset.
    ///
    /// Used when no cameras are attached. Only configured camera names are
    /// written; the rest are ignored.
    pub fn send_feedback(&self, images: HashMap<String, VideoFrame>) -> Result<()> {
        if !self.is_connected() {
            return Err(AppError::NotConnected);
        }
        for (name, frame) in images {
            if self.config.video.camera_names.contains(&name) {
                self.frames.put(name, frame);
            } else {
                debug!("Ignoring feedback image for unknown camera {}", name);
            }
        }
        Ok(())
    }

    /// Close every session and stop the server, bounded by the shutdown timeout
    pub fn disconnect(&mut self) -> Result<ShutdownReport> {
        let Some(Connection { runtime, server }) = self.connection.take() else {
            return Err(AppError::NotConnected);
        };

        let timeout = Duration::from_millis(self.config.server.shutdown_timeout_ms);
        let report = runtime.block_on(server.shutdown(timeout));
        runtime.shutdown_timeout(Duration::from_millis(500));

        self.calibrator.reset();
        self.bus.clear();
        self.camera_warns.clear_all();
        info!("Teleoperator disconnected");
        Ok(report)
    }
}

impl Drop for VrTeleoperator {
    fn drop(&mut self) {
        if self.is_connected() {
            if let Err(e) = self.disconnect() {
                warn!("Disconnect on drop failed: {}", e);
            }
        }
    }
}
