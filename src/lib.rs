//! pulse-link - real-time event delivery for the learning platform client
//!
//! Keeps one authenticated WebSocket open to the realtime server and fans
//! every pushed event out to local listeners:
//! - Connection lifecycle as an explicit state machine
//! - Bounded exponential backoff on abnormal closes
//! - Auth handshake read from the current session on every open
//! - Listener registry that tolerates add/remove during dispatch

pub mod backoff;
pub mod config;
pub mod core;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod handshake;
pub mod machine;
pub mod manager;
pub mod registry;
pub mod stats;
pub mod transport;
pub mod ws_state;

pub use backoff::BackoffPolicy;
pub use config::LinkConfig;
pub use crate::core::{InboundEvent, OutboundFrame};
pub use credentials::{Credential, CredentialSource, SessionCredentials};
pub use error::{LinkError, Result};
pub use manager::RealtimeLink;
pub use registry::{listener, Listener};
pub use stats::StatsSnapshot;
pub use ws_state::ConnectionState;
