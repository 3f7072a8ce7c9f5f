//! WebRTC transport: configuration, signaling messages, per-headset sessions
//! and the session registry.

pub mod config;
pub mod manager;
pub mod session;
pub mod signaling;

pub use config::{TurnServer, WebRtcConfig};
pub use manager::{SessionManager, ShutdownReport};
pub use session::{ManagedSession, SessionContext, TeleopSession};
pub use signaling::{ClientSignal, ConnectionState, IceCandidate, SdpAnswer, SdpOffer, ServerSignal};
