//! A running agent
//!
//! Owns one instance of every service, wired to a shared directory, mask
//! table and transport, and dispatches each inbound envelope by its tag.
//! Copy work runs in spawned tasks so a transport handler never waits for a
//! whole transfer.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::agents::{Agent, AgentStatus, AgentType, Directory, FsAction, Ports, Registry, Share};
use crate::config::Config;
use crate::copy::{placement, CopyEngine};
use crate::error::{PermissionError, StoreError, TransportError};
use crate::heartbeat::HeartbeatService;
use crate::invite::InviteService;
use crate::logging::*;
use crate::mask::MaskTable;
use crate::message::MessageService;
use crate::protocol::{
	CopyAgents, CopyList, CopyRequest, CopyRole, Envelope, Invitation, SendFileRequest,
};
use crate::sender::{Group, Routed, Sender};
use crate::store::AgentStore;
use crate::transport::{FrameSink, Inbound, Origin, SocketKey, SocketKind, Transport};

pub struct Node {
	sender: Arc<Sender>,
	heartbeat: Arc<HeartbeatService>,
	invite: Arc<InviteService>,
	copy: Arc<CopyEngine>,
	messages: MessageService,
	store: AgentStore,
}

impl Node {
	/// Restore the saved directory and build every service
	pub async fn start(config: &Config, transport: Arc<dyn Transport>) -> Result<Arc<Node>, StoreError> {
		let store = AgentStore::new(config.storage_dir.clone());
		let registry = store.load().await?;
		info!(
			"Loaded {} device(s) and {} user(s) from {}",
			registry.device.len(),
			registry.user.len(),
			store.path().display()
		);
		Ok(Node::with_registry(config, registry, transport))
	}

	pub fn with_registry(config: &Config, registry: Registry, transport: Arc<dyn Transport>) -> Arc<Node> {
		let identity = config.identity();
		let directory = Arc::new(Directory::from_registry(identity, registry, this_device(config)));
		let masks = Arc::new(MaskTable::new(config.mask_ttl()));
		let sender = Arc::new(Sender::new(directory, transport, masks));

		Arc::new(Node {
			heartbeat: Arc::new(HeartbeatService::new(Arc::clone(&sender), config.heartbeat_interval())),
			invite: Arc::new(InviteService::new(Arc::clone(&sender), config.invite_ttl())),
			copy: Arc::new(CopyEngine::new(Arc::clone(&sender), config.compress_level, config.buffer_size)),
			messages: MessageService::new(Arc::clone(&sender), config.message_history),
			store: AgentStore::new(config.storage_dir.clone()),
			sender,
		})
	}

	pub fn directory(&self) -> &Arc<Directory> {
		self.sender.directory()
	}

	pub fn sender(&self) -> &Arc<Sender> {
		&self.sender
	}

	pub fn heartbeat(&self) -> &Arc<HeartbeatService> {
		&self.heartbeat
	}

	pub fn copy_engine(&self) -> &Arc<CopyEngine> {
		&self.copy
	}

	pub fn messages(&self) -> &MessageService {
		&self.messages
	}

	/// Replace this device's shares, announce and persist them
	pub async fn update_shares(&self, shares: BTreeMap<String, Share>) {
		for (hash, result) in self.heartbeat.share_update(shares).await {
			if let Err(e) = result {
				debug!("Share update to {} failed: {}", hash, e);
			}
		}
		self.save().await;
	}

	async fn save(&self) {
		if let Err(e) = self.store.save(&self.directory().snapshot()).await {
			error!("{}", e);
		}
	}

	/// Whether copy traffic must pass the share checks
	///
	/// Only the local UI and devices in this directory count as this user,
	/// and only when the payload names this user as requester too.
	fn is_external(&self, agents: &CopyAgents, origin: &Origin) -> bool {
		let directory = self.directory();
		if agents.agent_request.user != directory.identity().hash_user {
			return true;
		}
		let own_device = |hash: &str| directory.agent(AgentType::Device, hash).is_some();
		match origin {
			Origin::Local => false,
			Origin::Socket(key) => match key.kind {
				SocketKind::Browser => false,
				SocketKind::Device => !own_device(&key.hash),
				SocketKind::User => true,
			},
			Origin::Http { agent_hash, agent_type } => {
				!(*agent_type == Some(AgentType::Device) && own_device(agent_hash))
			}
		}
	}

	async fn on_invite(&self, invitation: Invitation) {
		let reported = invitation.clone();
		match self.invite.receive(invitation).await {
			Ok(outcome) if outcome.merged => self.save().await,
			Ok(_) => {}
			Err(e) => {
				warn!("Invitation step rejected: {}", e);
				let failed = Invitation { message: e.to_string(), ..reported };
				self.sender.transport().browsers(&Envelope::InviteError(failed));
			}
		}
	}

	async fn on_copy(&self, envelope: Envelope, origin: &Origin) {
		let routed = match self.sender.route(CopyRole::AgentSource, envelope).await {
			Ok(routed) => routed,
			Err(e) => {
				warn!("Copy request not routed: {}", e);
				return;
			}
		};
		let Routed::Local(Envelope::Copy(request)) = routed else {
			return;
		};

		if self.is_external(&request.agents, origin) {
			if let Err(e) = self.check_copy(&request) {
				warn!("Copy from {} denied: {}", request.agents.agent_request.user, e);
				self.copy.deny(&request.agents, e).await;
				return;
			}
		}

		let engine = Arc::clone(&self.copy);
		tokio::spawn(async move {
			if let Err(e) = engine.copy(request).await {
				warn!("Copy failed: {}", e);
			}
		});
	}

	/// Source side of an external copy: every location must be readable
	/// (or removable for a cut) through one of this device's shares
	fn check_copy(&self, request: &CopyRequest) -> Result<(), PermissionError> {
		let directory = self.directory();
		let device = &directory.identity().hash_device;
		let action = if request.cut { FsAction::Cut } else { FsAction::FsRead };
		for location in &request.location {
			directory.check_access(device, location, action)?;
		}
		let write = &request.agents.agent_write;
		if write.user == directory.identity().hash_user {
			if let Some(target) = self.sender.masks().resolve(&write.device) {
				directory.check_access(&target, &write.modal_address, FsAction::FsWrite)?;
			}
		}
		Ok(())
	}

	async fn on_copy_list(&self, envelope: Envelope, origin: &Origin) {
		let routed = match self.sender.route(CopyRole::AgentWrite, envelope).await {
			Ok(routed) => routed,
			Err(e) => {
				warn!("Copy list not routed: {}", e);
				return;
			}
		};
		let Routed::Local(Envelope::CopyList(list)) = routed else {
			return;
		};

		if self.is_external(&list.agents, origin) {
			if let Err(e) = self.check_write(&list) {
				warn!("Write from {} denied: {}", list.agents.agent_request.user, e);
				self.copy.deny(&list.agents, e).await;
				return;
			}
		}

		let engine = Arc::clone(&self.copy);
		tokio::spawn(async move {
			if let Err(e) = engine.receive_list(list).await {
				warn!("Transfer failed: {}", e);
			}
		});
	}

	/// Write side of an external copy: the root and every placed entry
	/// must be writable through one of this device's shares
	fn check_write(&self, list: &CopyList) -> Result<(), PermissionError> {
		let directory = self.directory();
		let device = &directory.identity().hash_device;
		let root = &list.agents.agent_write.modal_address;
		directory.check_access(device, root, FsAction::FsWrite)?;
		for entry in &list.list {
			let target = placement::join(Path::new(root), &entry.destination)
				.ok_or(PermissionError::NoShare)?;
			directory.check_access(device, &target.to_string_lossy(), FsAction::FsWrite)?;
		}
		Ok(())
	}

	/// Route a status to its role; one that came from another user is also
	/// shown on every other device of this user
	async fn on_status(&self, envelope: Envelope, origin: &Origin) {
		let Envelope::FileSystemStatus(status) = &envelope else {
			return;
		};
		let target = status.target;
		let relay = from_user(origin).then(|| Envelope::FileStatusDevice(status.clone()));

		match self.sender.route(target, envelope).await {
			Ok(Routed::Local(Envelope::FileSystemStatus(status))) => self.copy.receive_status(status).await,
			Ok(_) => {}
			Err(e) => warn!("Status for {} not routed: {}", target, e),
		}

		if let Some(relay) = relay {
			for (hash, result) in self.sender.broadcast(&relay, Group::Device).await {
				if let Err(e) = result {
					debug!("Status relay to device {} failed: {}", hash, e);
				}
			}
		}
	}
}

/// This device's record, built from configuration
fn this_device(config: &Config) -> Agent {
	let shares = config
		.shares
		.iter()
		.map(|share| {
			let key = Share::key(&config.hash_device, &share.name);
			let name = share.name.clone();
			(key, Share { name, read_only: share.read_only, device: config.hash_device.clone() })
		})
		.collect();
	Agent {
		hash: config.hash_device.clone(),
		name: config.name_device.clone(),
		ip_all: config.addresses.clone(),
		ports: Ports { http: config.http_port, ws: config.ws_port },
		status: AgentStatus::Online,
		shares,
	}
}

fn from_user(origin: &Origin) -> bool {
	match origin {
		Origin::Http { agent_type, .. } => *agent_type == Some(AgentType::User),
		Origin::Socket(key) => key.kind == SocketKind::User,
		Origin::Local => false,
	}
}

fn from_browser(origin: &Origin) -> bool {
	match origin {
		Origin::Local => true,
		Origin::Socket(key) => key.kind == SocketKind::Browser,
		Origin::Http { .. } => false,
	}
}

#[async_trait]
impl Inbound for Node {
	async fn receive(&self, envelope: Envelope, origin: Origin) -> Option<Envelope> {
		debug!("Received {} from {:?}", envelope.service(), origin);
		match envelope {
			Envelope::Invite(invitation) => self.on_invite(invitation).await,
			Envelope::InviteError(invitation) => {
				self.sender.transport().browsers(&Envelope::InviteError(invitation));
			}
			Envelope::Heartbeat(beat) => {
				self.heartbeat.receive(beat);
			}
			Envelope::HeartbeatUpdate(update) => {
				if self.heartbeat.receive_update(update) > 0 {
					self.save().await;
				}
			}
			envelope @ Envelope::Copy(_) => self.on_copy(envelope, &origin).await,
			envelope @ Envelope::CopyList(_) => self.on_copy_list(envelope, &origin).await,
			Envelope::CopySendFile(request) => {
				warn!("Ignored {} outside a transfer channel", request.path);
			}
			envelope @ Envelope::FileSystemStatus(_) => self.on_status(envelope, &origin).await,
			envelope @ Envelope::FileStatusDevice(_) => self.sender.transport().browsers(&envelope),
			Envelope::Message(items) => {
				if from_browser(&origin) {
					self.messages.send(items).await;
				} else {
					self.messages.receive(items);
				}
			}
		}
		None
	}

	async fn serve_file(
		&self,
		request: SendFileRequest,
		sink: &mut dyn FrameSink,
	) -> Result<(), TransportError> {
		self.copy.serve_file(request, sink).await
	}

	fn socket_closed(&self, key: &SocketKey) {
		let agent_type = match key.kind {
			SocketKind::Device => AgentType::Device,
			SocketKind::User => AgentType::User,
			SocketKind::Browser => return,
		};
		self.heartbeat.mark_offline(agent_type, &key.hash);
	}
}

// vim: ts=4
