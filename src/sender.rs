//! Sender / router
//!
//! Picks the agents a message must reach and the transport for each: the
//! persistent socket when the client list shows it open, otherwise HTTP to
//! the agent's first address.

use futures::future::join_all;
use std::sync::Arc;

use crate::agents::{AgentType, Directory};
use crate::error::SendError;
use crate::logging::*;
use crate::mask::MaskTable;
use crate::protocol::{CopyAgents, CopyRole, DeviceRef, Envelope};
use crate::transport::{HttpRequest, SocketKey, Transport};

/// Broadcast group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
	Browser,
	Device,
	User,
}

/// Outcome of `route`
#[derive(Debug)]
pub enum Routed {
	/// The role resolved to this device; handle the envelope here
	Local(Envelope),
	/// Sent on; holds the HTTP answer if there was one
	Forwarded(Option<Envelope>),
}

/// Per-agent result of a broadcast
pub type Delivery = (String, Result<Option<Envelope>, SendError>);

pub struct Sender {
	directory: Arc<Directory>,
	transport: Arc<dyn Transport>,
	masks: Arc<MaskTable>,
}

impl Sender {
	pub fn new(directory: Arc<Directory>, transport: Arc<dyn Transport>, masks: Arc<MaskTable>) -> Self {
		Sender { directory, transport, masks }
	}

	pub fn directory(&self) -> &Arc<Directory> {
		&self.directory
	}

	pub fn transport(&self) -> &Arc<dyn Transport> {
		&self.transport
	}

	pub fn masks(&self) -> &Arc<MaskTable> {
		&self.masks
	}

	/// Send to one user/device pair
	///
	/// This device means the local UI. Masked devices are unmasked first; a
	/// token that matches no live entry fails with `InvalidMask`.
	pub async fn send(
		&self,
		envelope: Envelope,
		user: &str,
		device: &DeviceRef,
	) -> Result<Option<Envelope>, SendError> {
		let identity = self.directory.identity();
		if !user.is_empty() && user != identity.hash_user {
			return self.deliver(AgentType::User, user, envelope).await;
		}
		let device = self.masks.resolve(device).ok_or(SendError::InvalidMask)?;
		if self.directory.is_self(&device) {
			self.transport.browsers(&envelope);
			return Ok(None);
		}
		self.deliver(AgentType::Device, &device, envelope).await
	}

	/// Reach one directory record by socket, else by HTTP
	pub async fn deliver(
		&self,
		agent_type: AgentType,
		hash: &str,
		envelope: Envelope,
	) -> Result<Option<Envelope>, SendError> {
		let key = SocketKey::agent(agent_type, hash);
		if self.transport.is_open(&key) {
			debug!("Queue {} on socket {}", envelope.service(), key);
			match self.transport.queue(&key, &envelope) {
				Ok(()) => return Ok(None),
				Err(e) => debug!("Socket {} unusable, falling back to HTTP: {}", key, e),
			}
		}

		let agent = self.directory.agent(agent_type, hash).ok_or_else(|| SendError::UnknownAgent {
			agent_type,
			hash: hash.to_string(),
		})?;
		let request = HttpRequest::to_agent(agent_type, &agent, envelope)
			.ok_or_else(|| SendError::UnknownAgent { agent_type, hash: hash.to_string() })?;
		Ok(self.transport.request(request).await?)
	}

	/// Deliver to every member of a group except this agent
	pub async fn broadcast(&self, envelope: &Envelope, group: Group) -> Vec<Delivery> {
		let identity = self.directory.identity();
		let (agent_type, own) = match group {
			Group::Browser => {
				self.transport.browsers(envelope);
				return vec![];
			}
			Group::Device => (AgentType::Device, &identity.hash_device),
			Group::User => (AgentType::User, &identity.hash_user),
		};

		let targets: Vec<String> = self
			.directory
			.agents(agent_type)
			.into_iter()
			.map(|agent| agent.hash)
			.filter(|hash| hash != own)
			.collect();

		let sends = targets.into_iter().map(|hash| async move {
			let result = self.deliver(agent_type, &hash, envelope.clone()).await;
			(hash, result)
		});
		join_all(sends).await
	}

	/// Resolve a copy role inside the envelope and handle locally or forward
	///
	/// A role owned by another user is reached through that user's record
	/// and its device reference is left for that user to resolve.
	pub async fn route(&self, role: CopyRole, mut envelope: Envelope) -> Result<Routed, SendError> {
		let service = envelope.service();
		let agents =
			envelope.copy_agents().ok_or(SendError::NotRoutable { service: service.to_string() })?;
		let target = agents.role(role).clone();
		let identity = self.directory.identity();

		if !target.user.is_empty() && target.user != identity.hash_user {
			if let Some(agents) = envelope.copy_agents_mut() {
				self.mask_own(agents);
			}
			debug!("Route {} to {} of user {}", service, role, target.user);
			let reply = self.deliver(AgentType::User, &target.user, envelope).await?;
			return Ok(Routed::Forwarded(reply));
		}

		let device = self.masks.resolve(&target.device).ok_or(SendError::InvalidMask)?;
		if self.directory.is_self(&device) {
			return Ok(Routed::Local(envelope));
		}
		if let Some(agents) = envelope.copy_agents_mut() {
			self.unmask_own(agents);
		}
		debug!("Route {} to {} {}", service, role, device);
		let reply = self.deliver(AgentType::Device, &device, envelope).await?;
		Ok(Routed::Forwarded(reply))
	}

	/// Hide this user's real device hashes before they leave the user
	fn mask_own(&self, agents: &mut CopyAgents) {
		let own_user = &self.directory.identity().hash_user;
		for role in [CopyRole::AgentRequest, CopyRole::AgentSource, CopyRole::AgentWrite] {
			let agent = agents.role_mut(role);
			if &agent.user != own_user {
				continue;
			}
			if let DeviceRef::Device(hash) = &agent.device {
				agent.device = DeviceRef::Mask(self.masks.mask(hash));
			}
		}
	}

	/// Replace tokens this device issued with real hashes for own devices
	fn unmask_own(&self, agents: &mut CopyAgents) {
		for role in [CopyRole::AgentRequest, CopyRole::AgentSource, CopyRole::AgentWrite] {
			let agent = agents.role_mut(role);
			if let DeviceRef::Mask(token) = &agent.device {
				if let Some(hash) = self.masks.unmask(token) {
					agent.device = DeviceRef::Device(hash);
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::agents::tests::{device, identity};
	use crate::protocol::{CopyRequest, FileAgent, MessageItem};
	use crate::transport::testing::RecordingTransport;
	use crate::transport::SocketKind;
	use std::time::Duration;

	fn setup() -> (Sender, Arc<RecordingTransport>) {
		let directory = Arc::new(Directory::new(identity("u1", "d1"), device("d1", &[])));
		directory.insert_agent(AgentType::Device, device("d2", &[]));
		directory.insert_agent(AgentType::Device, device("d3", &[]));
		directory.insert_agent(AgentType::User, device("u2", &[]));
		let transport = Arc::new(RecordingTransport::default());
		let masks = Arc::new(MaskTable::new(Duration::from_secs(60)));
		(Sender::new(directory, transport.clone(), masks), transport)
	}

	fn message() -> Envelope {
		Envelope::Message(vec![MessageItem {
			agent_from: "d1".into(),
			agent_to: "d2".into(),
			agent_type: AgentType::Device,
			date: 0,
			message: "hi".into(),
			offline: false,
		}])
	}

	fn file_agent(user: &str, device: &str) -> FileAgent {
		FileAgent {
			user: user.into(),
			device: DeviceRef::Device(device.into()),
			share: String::new(),
			modal_address: "/tmp".into(),
		}
	}

	fn copy(source: FileAgent, write: FileAgent) -> Envelope {
		Envelope::Copy(CopyRequest {
			agents: CopyAgents { agent_request: source.clone(), agent_source: source, agent_write: write },
			location: vec!["/tmp/a".into()],
			cut: false,
		})
	}

	#[tokio::test]
	async fn test_send_to_self_goes_to_browser() {
		let (sender, transport) = setup();
		sender.send(message(), "u1", &DeviceRef::Device("d1".into())).await.unwrap();
		assert_eq!(transport.browser_envelopes().len(), 1);
		assert!(transport.request_targets().is_empty());
	}

	#[tokio::test]
	async fn test_socket_preferred_over_http() {
		let (sender, transport) = setup();
		transport.mark_open(SocketKey::new(SocketKind::Device, "d2"));
		sender.send(message(), "u1", &DeviceRef::Device("d2".into())).await.unwrap();
		assert_eq!(transport.queued.lock().unwrap().len(), 1);
		assert!(transport.request_targets().is_empty());

		sender.send(message(), "u1", &DeviceRef::Device("d3".into())).await.unwrap();
		assert_eq!(transport.request_targets(), vec!["d3".to_string()]);
	}

	#[tokio::test]
	async fn test_send_masked_device() {
		let (sender, transport) = setup();
		let token = sender.masks().mask("d2");
		sender.send(message(), "u1", &DeviceRef::Mask(token)).await.unwrap();
		assert_eq!(transport.request_targets(), vec!["d2".to_string()]);

		let result = sender.send(message(), "u1", &DeviceRef::Mask("bogus".into())).await;
		assert!(matches!(result, Err(SendError::InvalidMask)));
	}

	#[tokio::test]
	async fn test_broadcast_excludes_self() {
		let (sender, transport) = setup();
		let results = sender.broadcast(&message(), Group::Device).await;
		let mut hashes: Vec<String> = results.into_iter().map(|(h, _)| h).collect();
		hashes.sort();
		assert_eq!(hashes, vec!["d2".to_string(), "d3".to_string()]);
		assert_eq!(transport.request_targets().len(), 2);
	}

	#[tokio::test]
	async fn test_route_local() {
		let (sender, _transport) = setup();
		let envelope = copy(file_agent("u1", "d1"), file_agent("u1", "d2"));
		let routed = sender.route(CopyRole::AgentSource, envelope).await.unwrap();
		assert!(matches!(routed, Routed::Local(_)));
	}

	#[tokio::test]
	async fn test_route_across_users_masks_own_devices() {
		let (sender, transport) = setup();
		let envelope = copy(file_agent("u1", "d1"), file_agent("u2", "remote-device"));
		sender.route(CopyRole::AgentWrite, envelope).await.unwrap();

		let requests = transport.requests.lock().unwrap();
		assert_eq!(requests[0].agent, "u2");
		let Envelope::Copy(sent) = &requests[0].envelope else { panic!("wrong envelope") };
		let DeviceRef::Mask(token) = &sent.agents.agent_source.device else {
			panic!("source device not masked")
		};
		assert_eq!(sender.masks().unmask(token).as_deref(), Some("d1"));
		assert_eq!(sent.agents.agent_write.device, DeviceRef::Device("remote-device".into()));
	}

	#[tokio::test]
	async fn test_route_unknown_mask_rejected() {
		let (sender, transport) = setup();
		let mut write = file_agent("u1", "x");
		write.device = DeviceRef::Mask("stale".into());
		let result = sender.route(CopyRole::AgentWrite, copy(file_agent("u1", "d1"), write)).await;
		assert!(matches!(result, Err(SendError::InvalidMask)));
		assert!(transport.request_targets().is_empty());
	}
}

// vim: ts=4
