//! HTTPS + signaling server lifecycle

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::tls::{self, CertificatePaths};
use crate::utils::bind_tcp_listener;
use crate::web;
use crate::webrtc::{SessionContext, SessionManager, ShutdownReport};

/// A running signaling server
pub struct TeleopServer {
    local_addr: SocketAddr,
    tls: bool,
    handle: Handle,
    shutdown: CancellationToken,
    sessions: Arc<SessionManager>,
    task: JoinHandle<()>,
}

impl TeleopServer {
    /// Bind and start serving. Must be called inside a tokio runtime.
    ///
    /// `certs` selects HTTPS; without it the server speaks plain HTTP, which
    /// browsers only accept for WebXR on localhost.
    pub async fn start(
        config: &ServerConfig,
        ctx: SessionContext,
        certs: Option<&CertificatePaths>,
    ) -> Result<Self> {
        tls::install_crypto_provider();

        let bus = ctx.bus.clone();
        let sessions = SessionManager::new(ctx);
        let shutdown = CancellationToken::new();
        let state = AppState::new(sessions.clone(), bus, shutdown.clone());
        let app = web::create_router(state, config.static_dir.as_deref());

        let ip = config
            .host
            .parse()
            .map_err(|e| AppError::Config(format!("Invalid host {:?}: {}", config.host, e)))?;
        let listener = bind_tcp_listener(SocketAddr::new(ip, config.port))?;
        let local_addr = listener.local_addr()?;

        let handle = Handle::new();
        let task = match certs {
            Some(certs) => {
                let tls_config = RustlsConfig::from_pem_file(&certs.cert, &certs.key)
                    .await
                    .map_err(|e| AppError::Tls(format!("Failed to load certificate: {}", e)))?;
                info!("Starting HTTPS server on {}", local_addr);
                let server = axum_server::from_tcp_rustls(listener, tls_config)
                    .handle(handle.clone())
                    .serve(app.into_make_service());
                tokio::spawn(async move {
                    if let Err(e) = server.await {
                        error!("HTTPS server error: {}", e);
                    }
                })
            }
            None => {
                info!("Starting HTTP server on {}", local_addr);
                let server = axum_server::from_tcp(listener)
                    .handle(handle.clone())
                    .serve(app.into_make_service());
                tokio::spawn(async move {
                    if let Err(e) = server.await {
                        error!("HTTP server error: {}", e);
                    }
                })
            }
        };

        Ok(Self {
            local_addr,
            tls: certs.is_some(),
            handle,
            shutdown,
            sessions,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Close every session, then stop the listener, all within `timeout`
    pub async fn shutdown(self, timeout: Duration) -> ShutdownReport {
        let deadline = tokio::time::Instant::now() + timeout;

        let report = self.sessions.shutdown(timeout).await;
        // Sockets still open end once their session is gone
        self.shutdown.cancel();

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        self.handle.graceful_shutdown(Some(remaining));
        let mut task = self.task;
        if tokio::time::timeout(remaining, &mut task).await.is_err() {
            warn!("Listener did not stop within {:?}, aborting", timeout);
            task.abort();
        }

        info!(
            "Server stopped: {} session(s) closed, {} failed{}",
            report.closed,
            report.failed.len(),
            if report.timed_out { ", timed out" } else { "" }
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::SharedStateBus;
    use crate::video::{CameraFrameBuffer, OpenH264Factory, Resolution};
    use crate::webrtc::WebRtcConfig;
    use futures::SinkExt;
    use tokio_tungstenite::tungstenite::Message;

    fn context(bus: Arc<SharedStateBus>) -> SessionContext {
        SessionContext {
            bus,
            frames: Arc::new(CameraFrameBuffer::new()),
            encoders: Arc::new(OpenH264Factory),
            camera_names: vec!["left_wrist".to_string()],
            resolution: Resolution::new(64, 48),
            fps: 30,
            webrtc: WebRtcConfig::default(),
        }
    }

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        }
    }

    async fn wait_for_sessions(server: &TeleopServer, expected: usize) {
        for _ in 0..200 {
            if server.sessions().session_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session count never reached {}", expected);
    }

    #[tokio::test]
    async fn test_signaling_socket_lifecycle() {
        let bus = Arc::new(SharedStateBus::new());
        let server = TeleopServer::start(&local_config(), context(bus), None)
            .await
            .unwrap();
        let url = format!("ws://{}/ws/signaling", server.local_addr());

        let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        wait_for_sessions(&server, 1).await;

        // Garbage and unknown types keep the socket and session alive
        ws.send(Message::Text("{oops".into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":"ping"}"#.into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.sessions().session_count().await, 1);

        ws.close(None).await.unwrap();
        wait_for_sessions(&server, 0).await;

        let report = server.shutdown(Duration::from_secs(3)).await;
        assert!(!report.timed_out);
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_sessions() {
        let bus = Arc::new(SharedStateBus::new());
        let server = TeleopServer::start(&local_config(), context(bus), None)
            .await
            .unwrap();
        let url = format!("ws://{}/ws/signaling", server.local_addr());

        let (_ws1, _) = tokio_tungstenite::connect_async(url.clone()).await.unwrap();
        let (_ws2, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        wait_for_sessions(&server, 2).await;

        let sessions = server.sessions().clone();
        let started = std::time::Instant::now();
        let report = server.shutdown(Duration::from_secs(3)).await;
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(report.closed, 2);
        assert_eq!(sessions.session_count().await, 0);
        assert!(!sessions.is_accepting());
    }

    #[tokio::test]
    async fn test_starts_with_generated_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let certs = CertificatePaths {
            cert: dir.path().join("cert.pem"),
            key: dir.path().join("key.pem"),
        };
        crate::tls::ensure_certificate(&certs, &["localhost".to_string()]).unwrap();

        let bus = Arc::new(SharedStateBus::new());
        let server = TeleopServer::start(&local_config(), context(bus), Some(&certs))
            .await
            .unwrap();
        assert!(server.is_tls());
        assert_ne!(server.local_addr().port(), 0);
        server.shutdown(Duration::from_secs(3)).await;
    }
}
