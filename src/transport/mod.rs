//! Transport layer
//!
//! Two independent channels per remote agent: a persistent socket keyed by
//! agent type and hash, and a one-shot HTTP request. Failures are reported
//! to the caller and never retried here.

pub mod file_channel;
pub mod http;
pub mod socket;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::agents::{Agent, AgentType, Identity};
use crate::error::TransportError;
use crate::logging::*;
use crate::protocol::{Envelope, FileTrailer, SendFileRequest};

// ============================================================================
// ADDRESSING
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
	Browser,
	Device,
	User,
}

impl From<AgentType> for SocketKind {
	fn from(agent_type: AgentType) -> Self {
		match agent_type {
			AgentType::Device => SocketKind::Device,
			AgentType::User => SocketKind::User,
		}
	}
}

impl fmt::Display for SocketKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SocketKind::Browser => write!(f, "browser"),
			SocketKind::Device => write!(f, "device"),
			SocketKind::User => write!(f, "user"),
		}
	}
}

/// Key of one live primary socket
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SocketKey {
	pub kind: SocketKind,
	pub hash: String,
}

impl SocketKey {
	pub fn new(kind: SocketKind, hash: impl Into<String>) -> Self {
		SocketKey { kind, hash: hash.into() }
	}

	pub fn agent(agent_type: AgentType, hash: impl Into<String>) -> Self {
		SocketKey::new(agent_type.into(), hash)
	}
}

impl fmt::Display for SocketKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}-{}", self.kind, self.hash)
	}
}

/// Where an inbound envelope came from
#[derive(Debug, Clone, PartialEq)]
pub enum Origin {
	Http { agent_hash: String, agent_type: Option<AgentType> },
	Socket(SocketKey),
	/// Generated inside this process
	Local,
}

/// One outbound HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpRequest {
	pub agent_type: AgentType,
	pub agent: String,
	pub ip: IpAddr,
	pub port: u16,
	pub envelope: Envelope,
}

impl HttpRequest {
	/// Request addressed to a directory record; `None` without an address
	pub fn to_agent(agent_type: AgentType, agent: &Agent, envelope: Envelope) -> Option<Self> {
		Some(HttpRequest {
			agent_type,
			agent: agent.hash.clone(),
			ip: agent.address()?,
			port: agent.ports.http,
			envelope,
		})
	}

	pub fn address(&self) -> SocketAddr {
		SocketAddr::new(self.ip, self.port)
	}
}

// ============================================================================
// FILE TRANSFER FRAMES
// ============================================================================

/// One unit on a file transfer channel
#[derive(Debug, Clone, PartialEq)]
pub enum FileFrame {
	/// Raw or compressed file bytes
	Chunk(Vec<u8>),
	/// End of one file
	End(FileTrailer),
}

/// Destination side of a file transfer session
#[async_trait]
pub trait FileChannel: Send {
	async fn request(&mut self, request: &SendFileRequest) -> Result<(), TransportError>;
	async fn next_frame(&mut self) -> Result<FileFrame, TransportError>;
	async fn close(&mut self) -> Result<(), TransportError>;
}

/// Source side of a file transfer session
#[async_trait]
pub trait FrameSink: Send {
	async fn chunk(&mut self, bytes: Vec<u8>) -> Result<(), TransportError>;
	async fn end(&mut self, trailer: FileTrailer) -> Result<(), TransportError>;
}

// ============================================================================
// TRAITS
// ============================================================================

/// Uniform send-one-message and open-connection operations
#[async_trait]
pub trait Transport: Send + Sync {
	/// Whether a primary socket is open for this key
	fn is_open(&self, key: &SocketKey) -> bool;

	/// Enqueue on an open socket; delivery is FIFO per socket
	fn queue(&self, key: &SocketKey, envelope: &Envelope) -> Result<(), TransportError>;

	/// Deliver to every locally attached browser socket
	fn browsers(&self, envelope: &Envelope);

	/// POST one envelope and await the peer's answer
	async fn request(&self, request: HttpRequest) -> Result<Option<Envelope>, TransportError>;

	/// Open the primary socket to an agent
	async fn open(&self, agent_type: AgentType, agent: &Agent) -> Result<(), TransportError>;

	/// Open an auxiliary socket for one transfer session
	async fn open_file_channel(
		&self,
		ip: IpAddr,
		port: u16,
		session: &str,
	) -> Result<Box<dyn FileChannel>, TransportError>;
}

/// Receiving side: dispatches envelopes by tag
#[async_trait]
pub trait Inbound: Send + Sync {
	/// Handle one envelope; the answer goes back on the same channel
	async fn receive(&self, envelope: Envelope, origin: Origin) -> Option<Envelope>;

	/// Stream one requested file onto a transfer channel
	async fn serve_file(
		&self,
		request: SendFileRequest,
		sink: &mut dyn FrameSink,
	) -> Result<(), TransportError>;

	/// A primary socket errored or closed
	fn socket_closed(&self, key: &SocketKey);
}

// ============================================================================
// NETWORK
// ============================================================================

struct SocketHandle {
	id: u64,
	tx: mpsc::UnboundedSender<Message>,
}

/// Live primary sockets
#[derive(Default)]
pub(crate) struct ClientList {
	sockets: Mutex<HashMap<SocketKey, SocketHandle>>,
	next_id: AtomicU64,
}

impl ClientList {
	fn insert(&self, key: SocketKey, tx: mpsc::UnboundedSender<Message>) -> u64 {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let mut sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
		sockets.insert(key, SocketHandle { id, tx });
		id
	}

	/// Remove only if the key still maps to this socket
	fn remove(&self, key: &SocketKey, id: u64) -> bool {
		let mut sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
		if sockets.get(key).map(|h| h.id) == Some(id) {
			sockets.remove(key);
			true
		} else {
			false
		}
	}

	fn contains(&self, key: &SocketKey) -> bool {
		let sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
		sockets.get(key).map(|h| !h.tx.is_closed()).unwrap_or(false)
	}

	fn send(&self, key: &SocketKey, message: Message) -> Result<(), TransportError> {
		let sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
		let handle =
			sockets.get(key).ok_or_else(|| TransportError::NotConnected { key: key.to_string() })?;
		handle.tx.send(message).map_err(|_| TransportError::NotConnected { key: key.to_string() })
	}

	fn of_kind(&self, kind: SocketKind) -> Vec<SocketKey> {
		let sockets = self.sockets.lock().unwrap_or_else(|e| e.into_inner());
		sockets.keys().filter(|k| k.kind == kind).cloned().collect()
	}
}

/// HTTP plus persistent socket transport
pub struct Network {
	identity: Identity,
	client: reqwest::Client,
	clients: Arc<ClientList>,
	inbound: OnceLock<Weak<dyn Inbound>>,
}

impl Network {
	pub fn new(identity: Identity, timeout: Duration) -> Result<Arc<Network>, TransportError> {
		let client = http::client(timeout)?;
		Ok(Arc::new(Network {
			identity,
			client,
			clients: Arc::new(ClientList::default()),
			inbound: OnceLock::new(),
		}))
	}

	/// Attach the dispatcher; only the first call takes effect
	pub fn attach(&self, inbound: Weak<dyn Inbound>) {
		let _ = self.inbound.set(inbound);
	}

	pub(crate) fn inbound(&self) -> Option<Arc<dyn Inbound>> {
		self.inbound.get().and_then(Weak::upgrade)
	}

	/// Bind both listeners and serve them in background tasks
	pub async fn serve(
		self: &Arc<Self>,
		bind: IpAddr,
		http_port: u16,
		ws_port: u16,
	) -> Result<(SocketAddr, SocketAddr), TransportError> {
		let inbound = self.inbound().ok_or_else(|| TransportError::Protocol {
			message: "no dispatcher attached".to_string(),
		})?;

		let http_listener = tokio::net::TcpListener::bind(SocketAddr::new(bind, http_port)).await?;
		let ws_listener = tokio::net::TcpListener::bind(SocketAddr::new(bind, ws_port)).await?;
		let http_addr = http_listener.local_addr()?;
		let ws_addr = ws_listener.local_addr()?;

		let app = http::router(inbound);
		tokio::spawn(async move {
			if let Err(e) = axum::serve(http_listener, app).await {
				error!("HTTP service stopped: {}", e);
			}
		});
		info!("HTTP service listening on {}", http_addr);

		let network = Arc::clone(self);
		tokio::spawn(socket::accept_loop(network, ws_listener));
		info!("Socket service listening on {}", ws_addr);

		Ok((http_addr, ws_addr))
	}
}

#[async_trait]
impl Transport for Network {
	fn is_open(&self, key: &SocketKey) -> bool {
		self.clients.contains(key)
	}

	fn queue(&self, key: &SocketKey, envelope: &Envelope) -> Result<(), TransportError> {
		let json = envelope.to_json()?;
		self.clients.send(key, Message::Text(json.into()))
	}

	fn browsers(&self, envelope: &Envelope) {
		for key in self.clients.of_kind(SocketKind::Browser) {
			if let Err(e) = self.queue(&key, envelope) {
				debug!("Browser socket {} dropped {}: {}", key, envelope.service(), e);
			}
		}
	}

	async fn request(&self, request: HttpRequest) -> Result<Option<Envelope>, TransportError> {
		http::send(&self.client, &self.identity, &request).await
	}

	async fn open(&self, agent_type: AgentType, agent: &Agent) -> Result<(), TransportError> {
		let key = SocketKey::agent(agent_type, agent.hash.clone());
		if self.clients.contains(&key) {
			return Ok(());
		}
		let ip = agent.address().ok_or_else(|| TransportError::NotConnected { key: key.to_string() })?;
		let own_hash = match agent_type {
			AgentType::Device => &self.identity.hash_device,
			AgentType::User => &self.identity.hash_user,
		};
		let purpose = SocketKey::agent(agent_type, own_hash.clone()).to_string();
		let ws = socket::connect(SocketAddr::new(ip, agent.ports.ws), &purpose).await?;
		let inbound = self.inbound.get().cloned();
		socket::spawn_primary(Arc::clone(&self.clients), inbound, key, ws);
		Ok(())
	}

	async fn open_file_channel(
		&self,
		ip: IpAddr,
		port: u16,
		session: &str,
	) -> Result<Box<dyn FileChannel>, TransportError> {
		let purpose = format!("{}{}", socket::SEND_FILE_PREFIX, session);
		let ws = socket::connect(SocketAddr::new(ip, port), &purpose).await?;
		Ok(Box::new(file_channel::WsFileChannel::new(ws)))
	}
}


// vim: ts=4
