//! Active session registry
//!
//! Owns every live session, removes sessions whose transport fails or
//! closes, and tears all of them down on shutdown within a bounded wait.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::session::{ManagedSession, SessionContext, TeleopSession};
use crate::error::{AppError, Result};

/// Outcome of [`SessionManager::shutdown`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions closed cleanly
    pub closed: usize,
    /// Sessions whose close returned an error: (session id, error)
    pub failed: Vec<(String, String)>,
    /// The bound elapsed before every close finished
    pub timed_out: bool,
}

/// Registry of active sessions
pub struct SessionManager {
    ctx: SessionContext,
    sessions: RwLock<HashMap<String, Arc<dyn ManagedSession>>>,
    accepting: AtomicBool,
    /// Handle to ourselves for the per-session state watchers
    this: Weak<SessionManager>,
}

impl SessionManager {
    pub fn new(ctx: SessionContext) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            ctx,
            sessions: RwLock::new(HashMap::new()),
            accepting: AtomicBool::new(true),
            this: this.clone(),
        })
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Create, register and start a session for a newly connected headset
    pub async fn create_session(&self) -> Result<Arc<TeleopSession>> {
        if !self.is_accepting() {
            return Err(AppError::ServiceUnavailable(
                "server is shutting down".to_string(),
            ));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let session = Arc::new(TeleopSession::new(self.ctx.clone(), session_id).await?);
        session.start_video();

        self.register(session.clone()).await?;
        Ok(session)
    }

    /// Track a session and close it once its transport fails or closes
    pub async fn register(&self, session: Arc<dyn ManagedSession>) -> Result<()> {
        let session_id = session.session_id().to_string();
        {
            let mut sessions = self.sessions.write().await;
            // Re-checked under the lock so shutdown never misses a session
            if !self.is_accepting() {
                drop(sessions);
                let _ = session.close().await;
                return Err(AppError::ServiceUnavailable(
                    "server is shutting down".to_string(),
                ));
            }
            sessions.insert(session_id.clone(), session.clone());
            info!("Session registered: {} ({} total)", session_id, sessions.len());
        }

        let mut state_rx = session.state_watch();
        let manager = self.this.clone();
        tokio::spawn(async move {
            loop {
                if state_rx.borrow().is_terminal() {
                    break;
                }
                if state_rx.changed().await.is_err() {
                    break;
                }
            }
            let state = *state_rx.borrow();
            debug!("Session {} reached {}, removing", session_id, state);
            if let Some(manager) = manager.upgrade() {
                if let Err(e) = manager.close_session(&session_id).await {
                    warn!("Error closing session {}: {}", session_id, e);
                }
            }
        });

        Ok(())
    }

    /// Close and remove one session. Returns false if it was not registered.
    pub async fn close_session(&self, session_id: &str) -> Result<bool> {
        let session = self.sessions.write().await.remove(session_id);
        match session {
            Some(session) => {
                session.close().await?;
                info!(
                    "Session removed: {} ({} remaining)",
                    session_id,
                    self.session_count().await
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop accepting sessions and close every active one concurrently.
    ///
    /// Close failures are collected, never propagated. Returns after all
    /// closes finish or after `timeout`, whichever comes first.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.accepting.store(false, Ordering::SeqCst);

        let sessions: Vec<(String, Arc<dyn ManagedSession>)> =
            self.sessions.write().await.drain().collect();
        if sessions.is_empty() {
            return ShutdownReport::default();
        }
        info!("Closing {} session(s)", sessions.len());

        let mut closes: FuturesUnordered<_> = sessions
            .into_iter()
            .map(|(id, session)| async move {
                let result = session.close().await;
                (id, result)
            })
            .collect();

        // Closes that finish before the deadline are counted even if others hang
        let deadline = tokio::time::Instant::now() + timeout;
        let mut report = ShutdownReport::default();
        loop {
            match tokio::time::timeout_at(deadline, closes.next()).await {
                Ok(Some((_, Ok(())))) => report.closed += 1,
                Ok(Some((id, Err(e)))) => {
                    warn!("Error closing session {}: {}", id, e);
                    report.failed.push((id, e.to_string()));
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Session shutdown exceeded {:?}, abandoning {} close(s)",
                        timeout,
                        closes.len()
                    );
                    report.timed_out = true;
                    break;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::SharedStateBus;
    use crate::video::{CameraFrameBuffer, OpenH264Factory, Resolution};
    use crate::webrtc::config::WebRtcConfig;
    use crate::webrtc::signaling::ConnectionState;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::watch;

    enum CloseBehaviour {
        Ok,
        Fail,
        Hang,
    }

    struct FakeSession {
        id: String,
        state: watch::Sender<ConnectionState>,
        behaviour: CloseBehaviour,
        closes: Arc<AtomicUsize>,
    }

    impl FakeSession {
        fn new(id: &str, behaviour: CloseBehaviour, closes: Arc<AtomicUsize>) -> Arc<Self> {
            let (state, _) = watch::channel(ConnectionState::New);
            Arc::new(Self {
                id: id.to_string(),
                state,
                behaviour,
                closes,
            })
        }
    }

    #[async_trait]
    impl ManagedSession for FakeSession {
        fn session_id(&self) -> &str {
            &self.id
        }

        fn state_watch(&self) -> watch::Receiver<ConnectionState> {
            self.state.subscribe()
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                CloseBehaviour::Ok => Ok(()),
                CloseBehaviour::Fail => Err(AppError::WebRtcError("boom".to_string())),
                CloseBehaviour::Hang => {
                    futures::future::pending::<()>().await;
                    Ok(())
                }
            }
        }
    }

    fn manager() -> Arc<SessionManager> {
        SessionManager::new(SessionContext {
            bus: Arc::new(SharedStateBus::new()),
            frames: Arc::new(CameraFrameBuffer::new()),
            encoders: Arc::new(OpenH264Factory),
            camera_names: vec!["cam".to_string()],
            resolution: Resolution::new(64, 48),
            fps: 30,
            webrtc: WebRtcConfig::default(),
        })
    }

    async fn wait_for_count(manager: &SessionManager, expected: usize) {
        for _ in 0..100 {
            if manager.session_count().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session count never reached {}", expected);
    }

    #[tokio::test]
    async fn test_failed_session_is_closed_and_removed() {
        let manager = manager();
        let closes = Arc::new(AtomicUsize::new(0));
        let a = FakeSession::new("a", CloseBehaviour::Ok, closes.clone());
        let b = FakeSession::new("b", CloseBehaviour::Ok, closes.clone());
        manager.register(a.clone()).await.unwrap();
        manager.register(b.clone()).await.unwrap();
        assert_eq!(manager.session_count().await, 2);

        // Transient disconnect keeps the session
        a.state.send(ConnectionState::Disconnected).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.session_count().await, 2);

        a.state.send(ConnectionState::Failed).unwrap();
        wait_for_count(&manager, 1).await;
        assert_eq!(manager.session_ids().await, vec!["b"]);
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        b.state.send(ConnectionState::Closed).unwrap();
        wait_for_count(&manager, 0).await;
    }

    #[tokio::test]
    async fn test_close_session_only_touches_one() {
        let manager = manager();
        let closes = Arc::new(AtomicUsize::new(0));
        manager
            .register(FakeSession::new("a", CloseBehaviour::Ok, closes.clone()))
            .await
            .unwrap();
        manager
            .register(FakeSession::new("b", CloseBehaviour::Ok, closes.clone()))
            .await
            .unwrap();

        assert!(manager.close_session("a").await.unwrap());
        assert!(!manager.close_session("a").await.unwrap());
        assert_eq!(manager.session_ids().await, vec!["b"]);
    }

    #[tokio::test]
    async fn test_shutdown_collects_failures() {
        let manager = manager();
        let closes = Arc::new(AtomicUsize::new(0));
        manager
            .register(FakeSession::new("ok", CloseBehaviour::Ok, closes.clone()))
            .await
            .unwrap();
        manager
            .register(FakeSession::new("bad", CloseBehaviour::Fail, closes.clone()))
            .await
            .unwrap();

        let report = manager.shutdown(Duration::from_secs(3)).await;
        assert_eq!(report.closed, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");
        assert!(!report.timed_out);
        assert_eq!(manager.session_count().await, 0);
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_is_bounded_when_close_hangs() {
        let manager = manager();
        let closes = Arc::new(AtomicUsize::new(0));
        manager
            .register(FakeSession::new("stuck", CloseBehaviour::Hang, closes.clone()))
            .await
            .unwrap();
        manager
            .register(FakeSession::new("ok", CloseBehaviour::Ok, closes.clone()))
            .await
            .unwrap();
        manager
            .register(FakeSession::new("bad", CloseBehaviour::Fail, closes.clone()))
            .await
            .unwrap();

        let started = tokio::time::Instant::now();
        let report = manager.shutdown(Duration::from_secs(3)).await;
        assert!(report.timed_out);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
        // Closes that finished before the bound are still reported
        assert_eq!(report.closed, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "bad");
        // All closes were started concurrently
        assert_eq!(closes.load(Ordering::SeqCst), 3);
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_no_sessions_after_shutdown() {
        let manager = manager();
        manager.shutdown(Duration::from_secs(1)).await;
        assert!(!manager.is_accepting());
        assert!(matches!(
            manager.create_session().await,
            Err(AppError::ServiceUnavailable(_))
        ));

        let closes = Arc::new(AtomicUsize::new(0));
        let late = FakeSession::new("late", CloseBehaviour::Ok, closes.clone());
        assert!(manager.register(late).await.is_err());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_real_session() {
        let manager = manager();
        let session = manager.create_session().await.unwrap();
        assert_eq!(manager.session_count().await, 1);
        assert_eq!(session.track_names(), vec!["cam"]);

        let report = manager.shutdown(Duration::from_secs(3)).await;
        assert_eq!(report.closed, 1);
        assert!(session.is_closed());
    }
}
