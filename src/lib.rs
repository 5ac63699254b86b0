//! # sharenet - peer-to-peer agent coordination
//!
//! Every running agent keeps a directory of known devices and users, talks
//! to them over a persistent socket with an HTTP fallback, announces itself
//! with heartbeats, joins peers through a four-stage invitation and copies
//! or moves files between shares with per-file digest verification.
//!
//! ## Running an agent
//!
//! ```rust,ignore
//! use sharenet::{config::Config, node::Node, transport::Network};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load(None)?;
//!     let network = Network::new(config.identity(), config.http_timeout())?;
//!     let node = Node::start(&config, network.clone()).await?;
//!     network.attach(Arc::downgrade(&node) as _);
//!     network.serve(config.bind_address, config.http_port, config.ws_port).await?;
//!     Arc::clone(node.heartbeat()).spawn().await?;
//!     Ok(())
//! }
//! ```

pub mod agents;
pub mod config;
pub mod copy;
pub mod error;
pub mod heartbeat;
pub mod invite;
pub mod logging;
pub mod mask;
pub mod message;
pub mod node;
pub mod protocol;
pub mod sender;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use agents::{Agent, AgentType, Directory, Identity};
pub use config::Config;
pub use error::{
	ConfigError, CopyError, InviteError, PermissionError, SendError, StoreError, TransportError,
};
pub use node::Node;
pub use protocol::Envelope;

// vim: ts=4
