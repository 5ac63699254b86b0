//! Error types for sharenet operations

use std::error::Error;
use std::fmt;
use std::io;

use crate::agents::AgentType;

/// Transport-level failures (connection refused/reset/timeout)
///
/// These are reported to the calling protocol and never retried here.
#[derive(Debug)]
pub enum TransportError {
	/// Request or connect did not finish within the request timeout
	Timeout,

	/// Peer reset or dropped the connection mid-exchange
	ConnectionReset,

	/// Nothing listening at the advertised address
	ConnectionRefused,

	/// No open socket for the requested key
	NotConnected { key: String },

	/// Peer answered with a non-success HTTP status
	Http { status: u16 },

	/// Unparseable or unexpected data on the wire
	Protocol { message: String },

	/// I/O error
	Io(io::Error),
}

impl TransportError {
	/// Whether this failure means the remote agent should be considered offline
	pub fn marks_offline(&self) -> bool {
		matches!(self, TransportError::Timeout | TransportError::ConnectionReset)
	}

	fn from_io_kind(e: io::Error) -> Self {
		match e.kind() {
			io::ErrorKind::TimedOut => TransportError::Timeout,
			io::ErrorKind::ConnectionReset
			| io::ErrorKind::ConnectionAborted
			| io::ErrorKind::BrokenPipe
			| io::ErrorKind::UnexpectedEof => TransportError::ConnectionReset,
			io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
			_ => TransportError::Io(e),
		}
	}
}

impl fmt::Display for TransportError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			TransportError::Timeout => write!(f, "Request timed out"),
			TransportError::ConnectionReset => write!(f, "Connection reset by peer"),
			TransportError::ConnectionRefused => write!(f, "Connection refused"),
			TransportError::NotConnected { key } => write!(f, "No open socket for {}", key),
			TransportError::Http { status } => write!(f, "Peer responded with HTTP {}", status),
			TransportError::Protocol { message } => write!(f, "Protocol error: {}", message),
			TransportError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for TransportError {}

impl From<io::Error> for TransportError {
	fn from(e: io::Error) -> Self {
		TransportError::from_io_kind(e)
	}
}

impl From<serde_json::Error> for TransportError {
	fn from(e: serde_json::Error) -> Self {
		TransportError::Protocol { message: e.to_string() }
	}
}

impl From<reqwest::Error> for TransportError {
	fn from(e: reqwest::Error) -> Self {
		if e.is_timeout() {
			return TransportError::Timeout;
		}
		if let Some(status) = e.status() {
			return TransportError::Http { status: status.as_u16() };
		}
		// Dig the io::Error out of hyper's chain to tell refused from reset
		let mut source = e.source();
		while let Some(inner) = source {
			if let Some(io_err) = inner.downcast_ref::<io::Error>() {
				return TransportError::from_io_kind(io::Error::new(io_err.kind(), e.to_string()));
			}
			source = inner.source();
		}
		if e.is_connect() {
			TransportError::ConnectionRefused
		} else {
			TransportError::Protocol { message: e.to_string() }
		}
	}
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
	fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
		use tokio_tungstenite::tungstenite::Error as WsError;
		match e {
			WsError::Io(io_err) => TransportError::from_io_kind(io_err),
			WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ConnectionReset,
			WsError::Http(response) => TransportError::Http { status: response.status().as_u16() },
			other => TransportError::Protocol { message: other.to_string() },
		}
	}
}

/// Errors from the sender/router
#[derive(Debug)]
pub enum SendError {
	/// The chosen transport failed
	Transport(TransportError),

	/// Destination is not in the agent directory
	UnknownAgent { agent_type: AgentType, hash: String },

	/// Mask token matched no live entry
	InvalidMask,

	/// Payload carries no copy agents to route by
	NotRoutable { service: String },
}

impl fmt::Display for SendError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SendError::Transport(e) => write!(f, "Transport error: {}", e),
			SendError::UnknownAgent { agent_type, hash } => {
				write!(f, "Unknown {} agent {}", agent_type, hash)
			}
			SendError::InvalidMask => write!(f, "Device mask token is not valid"),
			SendError::NotRoutable { service } => {
				write!(f, "Service {} does not carry routing agents", service)
			}
		}
	}
}

impl Error for SendError {}

impl From<TransportError> for SendError {
	fn from(e: TransportError) -> Self {
		SendError::Transport(e)
	}
}

/// Share permission failures, reported as structured status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionError {
	/// No share covers the requested location
	NoShare,

	/// Location is in a read-only share and the action mutates
	ReadOnly,

	/// The device owning the location is not known
	Missing,
}

impl fmt::Display for PermissionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			PermissionError::NoShare => write!(f, "location is not shared"),
			PermissionError::ReadOnly => write!(f, "location is in a read only share"),
			PermissionError::Missing => write!(f, "device is missing"),
		}
	}
}

impl Error for PermissionError {}

/// Invitation protocol sequence violations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteError {
	/// Stage arrived out of order for this invitation
	OutOfOrder { id: String, from: Option<String>, to: String },

	/// Completion arrived for an invitation nobody started
	UnknownInvitation { id: String },

	/// Completion arrived without an accept/decline decision
	Undecided { id: String },
}

impl fmt::Display for InviteError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			InviteError::OutOfOrder { id, from, to } => write!(
				f,
				"Invitation {} cannot move from {} to {}",
				id,
				from.as_deref().unwrap_or("nothing"),
				to
			),
			InviteError::UnknownInvitation { id } => write!(f, "Unknown invitation {}", id),
			InviteError::Undecided { id } => {
				write!(f, "Invitation {} completed without a decision", id)
			}
		}
	}
}

impl Error for InviteError {}

/// Copy engine failures that abort the whole operation
#[derive(Debug)]
pub enum CopyError {
	/// Destination could not be reached to open the transfer session
	Unreachable { address: String, source: TransportError },

	/// Transfer failed after the session was open
	Transport(TransportError),

	/// Routing the manifest or status failed
	Send(SendError),

	/// Request referenced an unknown transfer session
	UnknownSession { token: String },

	/// The write destination lies inside one of the source locations
	IntoItself { location: String },

	/// I/O error
	Io(io::Error),
}

impl fmt::Display for CopyError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CopyError::Unreachable { address, source } => {
				write!(f, "Cannot open file copy socket to {}: {}", address, source)
			}
			CopyError::Transport(e) => write!(f, "Transfer error: {}", e),
			CopyError::Send(e) => write!(f, "Routing error: {}", e),
			CopyError::UnknownSession { token } => write!(f, "Unknown transfer session {}", token),
			CopyError::IntoItself { location } => {
				write!(f, "Cannot copy {} into itself", location)
			}
			CopyError::Io(e) => write!(f, "I/O error: {}", e),
		}
	}
}

impl Error for CopyError {}

impl From<io::Error> for CopyError {
	fn from(e: io::Error) -> Self {
		CopyError::Io(e)
	}
}

impl From<TransportError> for CopyError {
	fn from(e: TransportError) -> Self {
		CopyError::Transport(e)
	}
}

impl From<SendError> for CopyError {
	fn from(e: SendError) -> Self {
		CopyError::Send(e)
	}
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
	/// Failed to read config file
	Read { path: String, source: io::Error },

	/// Failed to write config file
	Write { path: String, source: io::Error },

	/// Config file content is invalid
	Parse { path: String, message: String },

	/// Environment variable holds an invalid value
	InvalidEnv { name: String, value: String },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Read { path, source } => {
				write!(f, "Cannot read config {}: {}", path, source)
			}
			ConfigError::Write { path, source } => {
				write!(f, "Cannot write config {}: {}", path, source)
			}
			ConfigError::Parse { path, message } => {
				write!(f, "Invalid config {}: {}", path, message)
			}
			ConfigError::InvalidEnv { name, value } => {
				write!(f, "Invalid value for {}: {}", name, value)
			}
		}
	}
}

impl Error for ConfigError {}

/// Agent store persistence errors
#[derive(Debug)]
pub enum StoreError {
	/// Failed to load snapshot
	LoadFailed { source: Box<dyn Error + Send + Sync> },

	/// Failed to save snapshot
	SaveFailed { source: Box<dyn Error + Send + Sync> },

	/// Snapshot file is corrupted
	Corrupted { message: String },
}

impl fmt::Display for StoreError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StoreError::LoadFailed { source } => write!(f, "Failed to load agents: {}", source),
			StoreError::SaveFailed { source } => write!(f, "Failed to save agents: {}", source),
			StoreError::Corrupted { message } => write!(f, "Agent store corrupted: {}", message),
		}
	}
}

impl Error for StoreError {}


// vim: ts=4
