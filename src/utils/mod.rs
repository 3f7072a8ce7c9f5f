//! Shared helpers: log throttling and socket/address utilities

pub mod net;
pub mod throttle;

pub use net::{bind_tcp_listener, local_ipv4_addresses, primary_ipv4_address};
pub use throttle::LogThrottler;
