//! KeelVPN Control-Channel Protocol Stack
//!
//! This crate implements the reliable SSL-over-datagram protocol stack that
//! underlies a KeelVPN tunnel: a sliding-window reliability layer, a
//! pluggable SSL engine contract (with a rustls adapter), and the engine
//! that orchestrates app, SSL, reliability, and network traffic in both
//! directions.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod error;
pub mod packet;
pub mod frame;
pub mod reliable;
pub mod ssl;
pub mod stack;
pub mod stats;
pub mod tls;

pub use error::{ProtocolError, Result};
pub use packet::{Packet, PacketId};
pub use frame::{BufferSpec, Frame, FrameContext};
pub use reliable::{AckTracker, RecvWindow, ReliableConfig, SendMessage, SendWindow};
pub use ssl::{SslEngine, SslStatus};
pub use stack::{ProtocolStack, StackHooks};
pub use stats::{SessionCounters, StatEvent, StatsSink};
pub use tls::{TlsSession, create_client_config, create_server_config, load_certs_from_pem, load_key_from_pem};
