//! Per-headset WebRTC session
//!
//! A session owns one peer connection, one outbound H.264 track per camera
//! and whatever data channel the headset opens. Each track runs its own
//! sender task (pace, encode, write) started once ICE connects.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_H264};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::full_intra_request::FullIntraRequest;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use super::config::WebRtcConfig;
use super::signaling::{ConnectionState, IceCandidate, SdpAnswer, SdpOffer};
use crate::error::{AppError, Result};
use crate::telemetry::{handle_channel_message, SharedStateBus};
use crate::utils::LogThrottler;
use crate::video::{
    CameraFrameBuffer, EncodedFrame, EncoderConfig, EncoderFactory, FrameEncoder, Resolution,
    VideoFrame, VideoTrackSource,
};

/// H.264 constrained baseline, packetization mode 1 (what Quest browsers decode in hardware)
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f";

/// Everything a session needs from the server, shared by all sessions
#[derive(Clone)]
pub struct SessionContext {
    pub bus: Arc<SharedStateBus>,
    pub frames: Arc<CameraFrameBuffer>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub camera_names: Vec<String>,
    pub resolution: Resolution,
    pub fps: u32,
    pub webrtc: WebRtcConfig,
}

/// What the session manager needs from a session
#[async_trait]
pub trait ManagedSession: Send + Sync {
    fn session_id(&self) -> &str;

    /// Subscribe to connection state changes
    fn state_watch(&self) -> watch::Receiver<ConnectionState>;

    /// Tear down tracks, data channel and transport. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// One outbound camera track
struct CameraTrack {
    camera_name: String,
    track: Arc<TrackLocalStaticSample>,
    sender: Arc<RTCRtpSender>,
    /// Set by RTCP PLI/FIR, consumed by the sender task
    keyframe_requested: Arc<AtomicBool>,
}

/// WebRTC session for one connected headset
pub struct TeleopSession {
    pub session_id: String,
    pc: Arc<RTCPeerConnection>,
    tracks: Vec<CameraTrack>,
    /// Data channel opened by the headset
    data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    state: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    /// Sender and RTCP reader tasks
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    ctx: SessionContext,
}

impl TeleopSession {
    /// Create the peer connection and attach one track per configured camera
    pub async fn new(ctx: SessionContext, session_id: String) -> Result<Self> {
        // DTLS goes through rustls
        crate::tls::install_crypto_provider();

        info!(
            "Creating session {}: {} camera track(s) @ {} {}fps",
            session_id,
            ctx.camera_names.len(),
            ctx.resolution,
            ctx.fps
        );

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let mut setting_engine = SettingEngine::default();
        let mode = ctx.webrtc.mdns_mode();
        setting_engine.set_ice_multicast_dns_mode(mode);
        if mode == MulticastDnsMode::QueryAndGather {
            setting_engine.set_multicast_dns_host_name(format!("{session_id}.local"));
        }
        setting_engine.set_include_loopback_candidate(ctx.webrtc.loopback_candidates);

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ctx.webrtc.ice_servers(),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;
        let pc = Arc::new(pc);

        let mut tracks = Vec::with_capacity(ctx.camera_names.len());
        for camera_name in &ctx.camera_names {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_owned(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: H264_FMTP.to_owned(),
                    rtcp_feedback: vec![],
                },
                camera_name.clone(),
                camera_name.clone(),
            ));

            let sender = pc
                .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(|e| {
                    AppError::WebRtcError(format!(
                        "Failed to add track {}: {}",
                        camera_name, e
                    ))
                })?;

            tracks.push(CameraTrack {
                camera_name: camera_name.clone(),
                track,
                sender,
                keyframe_requested: Arc::new(AtomicBool::new(false)),
            });
        }

        let (state_tx, state_rx) = watch::channel(ConnectionState::New);

        let session = Self {
            session_id,
            pc,
            tracks,
            data_channel: Arc::new(RwLock::new(None)),
            state: Arc::new(state_tx),
            state_rx,
            tasks: parking_lot::Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            ctx,
        };

        session.setup_event_handlers();
        session.start_rtcp_readers();

        Ok(session)
    }

    fn setup_event_handlers(&self) {
        let state = self.state.clone();
        let session_id = self.session_id.clone();

        self.pc
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let state = state.clone();
                let session_id = session_id.clone();

                Box::pin(async move {
                    let new_state = match s {
                        RTCPeerConnectionState::New => ConnectionState::New,
                        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                        RTCPeerConnectionState::Connected => ConnectionState::Connected,
                        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                        RTCPeerConnectionState::Failed => ConnectionState::Failed,
                        RTCPeerConnectionState::Closed => ConnectionState::Closed,
                        _ => return,
                    };

                    info!("Session {} connection state: {}", session_id, new_state);
                    let _ = state.send(new_state);
                })
            }));

        let data_channel = self.data_channel.clone();
        let bus = self.ctx.bus.clone();
        let session_id = self.session_id.clone();
        let throttler = Arc::new(LogThrottler::with_secs(5));

        self.pc
            .on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let data_channel = data_channel.clone();
                let bus = bus.clone();
                let session_id = session_id.clone();
                let throttler = throttler.clone();

                Box::pin(async move {
                    info!("Session {} data channel opened: {}", session_id, dc.label());
                    adopt_data_channel(&data_channel, dc.clone(), &session_id).await;

                    dc.on_message(Box::new(move |msg: DataChannelMessage| {
                        if let Err(reason) = handle_channel_message(&bus, &msg.data) {
                            if throttler.should_log("invalid_payload") {
                                warn!(
                                    "Session {} dropped data channel message: {}",
                                    session_id, reason
                                );
                            } else {
                                debug!("Dropped data channel message: {}", reason);
                            }
                        }
                        Box::pin(async {})
                    }));
                })
            }));
    }

    /// Drain RTCP per sender so interceptors run; PLI/FIR requests a keyframe
    fn start_rtcp_readers(&self) {
        let mut tasks = self.tasks.lock();
        for track in &self.tracks {
            let sender = track.sender.clone();
            let keyframe_requested = track.keyframe_requested.clone();

            tasks.push(tokio::spawn(async move {
                while let Ok((packets, _)) = sender.read_rtcp().await {
                    let wants_keyframe = packets.iter().any(|p| {
                        let any = p.as_any();
                        any.downcast_ref::<PictureLossIndication>().is_some()
                            || any.downcast_ref::<FullIntraRequest>().is_some()
                    });
                    if wants_keyframe {
                        keyframe_requested.store(true, Ordering::Relaxed);
                    }
                }
            }));
        }
    }

    /// Spawn one sender task per camera track.
    ///
    /// Each task waits for the Connected state, then paces, encodes and writes
    /// frames until the session reaches a terminal state.
    pub fn start_video(&self) {
        let mut tasks = self.tasks.lock();
        for track in &self.tracks {
            let mut source = VideoTrackSource::new(
                track.camera_name.clone(),
                self.ctx.frames.clone(),
                self.ctx.resolution,
                self.ctx.fps,
            );
            let encoder_config = EncoderConfig::new(self.ctx.resolution, self.ctx.fps);
            let encoders = self.ctx.encoders.clone();
            let rtp_track = track.track.clone();
            let keyframe_requested = track.keyframe_requested.clone();
            let mut state_rx = self.state_rx.clone();
            let session_id = self.session_id.clone();

            tasks.push(tokio::spawn(async move {
                let camera = source.camera_name().to_string();

                loop {
                    let current = *state_rx.borrow();
                    if current == ConnectionState::Connected {
                        break;
                    }
                    if current.is_terminal() {
                        debug!("Session {} ended before track {} started", session_id, camera);
                        return;
                    }
                    if state_rx.changed().await.is_err() {
                        return;
                    }
                }

                let mut encoder = match encoders.create(encoder_config) {
                    Ok(encoder) => encoder,
                    Err(e) => {
                        warn!("Session {} track {}: {}", session_id, camera, e);
                        return;
                    }
                };
                info!(
                    "Session {} track {} streaming ({})",
                    session_id,
                    camera,
                    encoder.name()
                );

                let duration = source.frame_duration();
                let throttler = LogThrottler::with_secs(5);
                let mut frames_sent: u64 = 0;

                loop {
                    tokio::select! {
                        biased;

                        changed = state_rx.changed() => {
                            if changed.is_err() || state_rx.borrow().is_terminal() {
                                break;
                            }
                        }

                        frame = source.next_frame() => {
                            if keyframe_requested.swap(false, Ordering::Relaxed) {
                                encoder.request_keyframe();
                            }

                            let (returned, result) = match encode_blocking(encoder, frame).await {
                                Ok(done) => done,
                                Err(e) => {
                                    warn!("Track {} encoder lost: {}", camera, e);
                                    break;
                                }
                            };
                            encoder = returned;

                            let encoded = match result {
                                Ok(encoded) if encoded.is_empty() => continue,
                                Ok(encoded) => encoded,
                                Err(e) => {
                                    if throttler.should_log("encode") {
                                        warn!("Track {} encode failed: {}", camera, e);
                                    }
                                    continue;
                                }
                            };

                            let sample = Sample {
                                data: encoded.data,
                                duration,
                                ..Default::default()
                            };
                            if let Err(e) = rtp_track.write_sample(&sample).await {
                                if throttler.should_log("write") {
                                    debug!("Track {} write_sample failed: {}", camera, e);
                                }
                            } else {
                                frames_sent += 1;
                            }
                        }
                    }
                }

                info!(
                    "Session {} track {} stopped ({} frames sent)",
                    session_id, camera, frames_sent
                );
            }));
        }
    }

    /// Apply the headset's offer and return a complete (non-trickle) answer.
    ///
    /// Waits for ICE gathering, bounded by the configured timeout, so the
    /// answer SDP carries the host candidates.
    pub async fn handle_offer(&self, offer: SdpOffer) -> Result<SdpAnswer> {
        let sdp = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| AppError::BadRequest(format!("Invalid SDP offer: {}", e)))?;

        self.pc.set_remote_description(sdp).await.map_err(|e| {
            AppError::BadRequest(format!("Failed to set remote description: {}", e))
        })?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create answer: {}", e)))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;

        self.pc.set_local_description(answer).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to set local description: {}", e))
        })?;

        let timeout = self.ctx.webrtc.gathering_timeout();
        if tokio::time::timeout(timeout, gather_complete.recv())
            .await
            .is_err()
        {
            warn!(
                "Session {} ICE gathering not complete after {:?}, answering with partial candidates",
                self.session_id, timeout
            );
        }

        let local = self.pc.local_description().await.ok_or_else(|| {
            AppError::WebRtcError("No local description after negotiation".to_string())
        })?;

        Ok(SdpAnswer::new(local.sdp))
    }

    /// Add a trickled remote candidate. The empty end-of-candidates marker is a no-op.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        if candidate.is_end_of_candidates() {
            return Ok(());
        }

        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to add ICE candidate: {}", e)))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Camera names, one per outbound track, in SDP order
    pub fn track_names(&self) -> Vec<String> {
        self.tracks.iter().map(|t| t.camera_name.clone()).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Label of the data channel currently feeding the bus
    pub async fn data_channel_label(&self) -> Option<String> {
        self.data_channel
            .read()
            .await
            .as_ref()
            .map(|dc| dc.label().to_string())
    }
}

/// Make `dc` the session's data channel, closing any channel it replaces
async fn adopt_data_channel(
    slot: &RwLock<Option<Arc<RTCDataChannel>>>,
    dc: Arc<RTCDataChannel>,
    session_id: &str,
) {
    let previous = slot.write().await.replace(dc);
    if let Some(previous) = previous {
        debug!(
            "Session {} replacing data channel {}",
            session_id,
            previous.label()
        );
        if let Err(e) = previous.close().await {
            debug!("Session {} data channel close: {}", session_id, e);
        }
    }
}

/// Encode one frame on the blocking pool, handing the encoder back
async fn encode_blocking(
    mut encoder: Box<dyn FrameEncoder>,
    frame: VideoFrame,
) -> Result<(Box<dyn FrameEncoder>, Result<EncodedFrame>)> {
    tokio::task::spawn_blocking(move || {
        let result = encoder.encode(&frame);
        (encoder, result)
    })
    .await
    .map_err(|e| AppError::VideoError(format!("Encoder task failed: {}", e)))
}

#[async_trait]
impl ManagedSession for TeleopSession {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }

        if let Some(dc) = self.data_channel.write().await.take() {
            if let Err(e) = dc.close().await {
                debug!("Session {} data channel close: {}", self.session_id, e);
            }
        }

        let result = self
            .pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)));

        let _ = self.state.send(ConnectionState::Closed);
        info!("Session {} closed", self.session_id);
        result
    }
}
