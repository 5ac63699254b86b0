//! In-memory network connecting several nodes in one process
//!
//! HTTP requests call the target node's `receive` directly. File channels
//! are a pair of tokio mpsc queues served by a task on the source node.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

use sharenet::agents::{Agent, AgentStatus, AgentType, Ports, Registry, Share};
use sharenet::config::{Config, ShareConfig};
use sharenet::error::TransportError;
use sharenet::node::Node;
use sharenet::protocol::{Envelope, FileTrailer, SendFileRequest};
use sharenet::transport::{
	FileChannel, FileFrame, FrameSink, HttpRequest, Inbound, Origin, SocketKey, Transport,
};

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Connects nodes by address
#[derive(Default)]
pub struct Hub {
	http: Mutex<HashMap<SocketAddr, Weak<Node>>>,
	ws: Mutex<HashMap<SocketAddr, Weak<Node>>>,
	timeouts: Mutex<HashSet<SocketAddr>>,
	/// Flip the first byte sent for any path containing this text
	corrupt: Mutex<Option<String>>,
}

impl Hub {
	pub fn new() -> Arc<Hub> {
		Arc::new(Hub::default())
	}

	pub fn time_out(&self, addr: SocketAddr) {
		self.timeouts.lock().unwrap().insert(addr);
	}

	pub fn corrupt(&self, path_fragment: &str) {
		*self.corrupt.lock().unwrap() = Some(path_fragment.to_string());
	}

	fn node(&self, table: &Mutex<HashMap<SocketAddr, Weak<Node>>>, addr: SocketAddr) -> Result<Arc<Node>, TransportError> {
		if self.timeouts.lock().unwrap().contains(&addr) {
			return Err(TransportError::Timeout);
		}
		table
			.lock()
			.unwrap()
			.get(&addr)
			.and_then(Weak::upgrade)
			.ok_or(TransportError::ConnectionRefused)
	}
}

/// Transport of one node on the hub
pub struct MemoryTransport {
	hub: Arc<Hub>,
	own: String,
	own_user: String,
	browser: Mutex<Vec<Envelope>>,
}

impl MemoryTransport {
	pub fn browser_envelopes(&self) -> Vec<Envelope> {
		self.browser.lock().unwrap().clone()
	}
}

#[async_trait]
impl Transport for MemoryTransport {
	fn is_open(&self, _key: &SocketKey) -> bool {
		false
	}

	fn queue(&self, key: &SocketKey, _envelope: &Envelope) -> Result<(), TransportError> {
		Err(TransportError::NotConnected { key: key.to_string() })
	}

	fn browsers(&self, envelope: &Envelope) {
		self.browser.lock().unwrap().push(envelope.clone());
	}

	async fn request(&self, request: HttpRequest) -> Result<Option<Envelope>, TransportError> {
		let node = self.hub.node(&self.hub.http, request.address())?;
		let agent_hash = match request.agent_type {
			AgentType::Device => self.own.clone(),
			AgentType::User => self.own_user.clone(),
		};
		let origin = Origin::Http { agent_hash, agent_type: Some(request.agent_type) };
		Ok(node.receive(request.envelope, origin).await)
	}

	async fn open(&self, _agent_type: AgentType, _agent: &Agent) -> Result<(), TransportError> {
		Ok(())
	}

	async fn open_file_channel(
		&self,
		ip: IpAddr,
		port: u16,
		_session: &str,
	) -> Result<Box<dyn FileChannel>, TransportError> {
		let node = self.hub.node(&self.hub.ws, SocketAddr::new(ip, port))?;
		let corrupt = self.hub.corrupt.lock().unwrap().clone();
		let (request_tx, mut request_rx) = mpsc::unbounded_channel::<SendFileRequest>();
		let (frame_tx, frame_rx) = mpsc::unbounded_channel();

		tokio::spawn(async move {
			while let Some(request) = request_rx.recv().await {
				let damage = corrupt.as_deref().map(|c| request.path.contains(c)).unwrap_or(false);
				let mut sink = MemorySink { frames: frame_tx.clone(), damage };
				if node.serve_file(request, &mut sink).await.is_err() {
					break;
				}
			}
		});
		Ok(Box::new(MemoryChannel { requests: Some(request_tx), frames: frame_rx }))
	}
}

struct MemorySink {
	frames: mpsc::UnboundedSender<FileFrame>,
	damage: bool,
}

#[async_trait]
impl FrameSink for MemorySink {
	async fn chunk(&mut self, mut bytes: Vec<u8>) -> Result<(), TransportError> {
		if self.damage && !bytes.is_empty() {
			bytes[0] ^= 0xff;
			self.damage = false;
		}
		self.frames.send(FileFrame::Chunk(bytes)).map_err(|_| TransportError::ConnectionReset)
	}

	async fn end(&mut self, trailer: FileTrailer) -> Result<(), TransportError> {
		self.frames.send(FileFrame::End(trailer)).map_err(|_| TransportError::ConnectionReset)
	}
}

struct MemoryChannel {
	requests: Option<mpsc::UnboundedSender<SendFileRequest>>,
	frames: mpsc::UnboundedReceiver<FileFrame>,
}

#[async_trait]
impl FileChannel for MemoryChannel {
	async fn request(&mut self, request: &SendFileRequest) -> Result<(), TransportError> {
		let requests = self.requests.as_ref().ok_or(TransportError::ConnectionReset)?;
		requests.send(request.clone()).map_err(|_| TransportError::ConnectionReset)
	}

	async fn next_frame(&mut self) -> Result<FileFrame, TransportError> {
		self.frames.recv().await.ok_or(TransportError::ConnectionReset)
	}

	async fn close(&mut self) -> Result<(), TransportError> {
		self.requests = None;
		Ok(())
	}
}

/// One node plus its transport and scratch storage
pub struct TestNode {
	pub node: Arc<Node>,
	pub transport: Arc<MemoryTransport>,
	pub config: Config,
}

impl TestNode {
	pub fn record(&self) -> Agent {
		self.node.directory().this_device().expect("own record")
	}

	pub fn browser_envelopes(&self) -> Vec<Envelope> {
		self.transport.browser_envelopes()
	}

	pub async fn local(&self, envelope: Envelope) {
		self.node.receive(envelope, Origin::Local).await;
	}
}

pub fn config(user: &str, device: &str, port: u16, storage: &Path, shares: &[(&str, bool)]) -> Config {
	Config {
		hash_user: user.to_string(),
		hash_device: device.to_string(),
		name_user: format!("{} user", user),
		name_device: format!("{} device", device),
		storage_dir: storage.to_path_buf(),
		addresses: vec![LOCALHOST],
		http_port: port,
		ws_port: port + 1,
		shares: shares
			.iter()
			.map(|(name, read_only)| ShareConfig { name: name.to_string(), read_only: *read_only })
			.collect(),
		..Config::default()
	}
}

pub fn spawn(hub: &Arc<Hub>, config: Config, registry: Registry) -> TestNode {
	let transport = Arc::new(MemoryTransport {
		hub: Arc::clone(hub),
		own: config.hash_device.clone(),
		own_user: config.hash_user.clone(),
		browser: Mutex::new(vec![]),
	});
	let node = Node::with_registry(&config, registry, transport.clone());
	hub.http.lock().unwrap().insert(SocketAddr::new(LOCALHOST, config.http_port), Arc::downgrade(&node));
	hub.ws.lock().unwrap().insert(SocketAddr::new(LOCALHOST, config.ws_port), Arc::downgrade(&node));
	TestNode { node, transport, config }
}

/// Registry record for a node as another agent sees it
pub fn agent_record(config: &Config, hash: &str) -> Agent {
	let shares: BTreeMap<String, Share> = config
		.shares
		.iter()
		.map(|share| {
			let key = Share::key(&config.hash_device, &share.name);
			let record = Share {
				name: share.name.clone(),
				read_only: share.read_only,
				device: config.hash_device.clone(),
			};
			(key, record)
		})
		.collect();
	Agent {
		hash: hash.to_string(),
		name: hash.to_string(),
		ip_all: config.addresses.clone(),
		ports: Ports { http: config.http_port, ws: config.ws_port },
		status: AgentStatus::Online,
		shares,
	}
}

/// Poll until the condition holds or two seconds pass
pub async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
	for _ in 0..200 {
		if condition() {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	condition()
}

// vim: ts=4
