//! Heartbeat service
//!
//! Broadcasts this agent's addresses, ports and refresh interval on a fixed
//! interval and whenever the share list changes. A timeout or connection
//! reset while heartbeating marks the target offline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::agents::{AgentStatus, AgentType, Share};
use crate::error::SendError;
use crate::logging::*;
use crate::protocol::{AgentUpdate, Envelope, Heartbeat};
use crate::sender::{Delivery, Group, Sender};

pub struct HeartbeatService {
	sender: Arc<Sender>,
	interval: Duration,
}

impl HeartbeatService {
	pub fn new(sender: Arc<Sender>, interval: Duration) -> Self {
		HeartbeatService { sender, interval }
	}

	/// Run the periodic loop in a background task
	pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(self.interval);
			ticker.tick().await;
			loop {
				ticker.tick().await;
				self.beat(false).await;
			}
		})
	}

	/// Heartbeat every other device and user once
	pub async fn beat(&self, shares_changed: bool) -> Vec<Delivery> {
		let Some(device) = self.sender.directory().this_device() else {
			return vec![];
		};
		let identity = self.sender.directory().identity().clone();

		let device_beat = Envelope::Heartbeat(Heartbeat {
			agent_from: identity.hash_device.clone(),
			agent_type: AgentType::Device,
			ip_all: device.ip_all.clone(),
			ports: device.ports,
			refresh: self.interval.as_secs(),
			status: AgentStatus::Online,
			shares: shares_changed.then(|| device.shares.clone()),
		});
		let user_beat = Envelope::Heartbeat(Heartbeat {
			agent_from: identity.hash_user.clone(),
			agent_type: AgentType::User,
			ip_all: device.ip_all.clone(),
			ports: device.ports,
			refresh: self.interval.as_secs(),
			status: AgentStatus::Online,
			shares: shares_changed.then(|| self.user_shares()),
		});

		let (devices, users) = futures::join!(
			self.sender.broadcast(&device_beat, Group::Device),
			self.sender.broadcast(&user_beat, Group::User)
		);
		for (hash, result) in &devices {
			if let Err(e) = result {
				self.failed(AgentType::Device, hash, e);
			}
		}
		for (hash, result) in &users {
			if let Err(e) = result {
				self.failed(AgentType::User, hash, e);
			}
		}
		devices.into_iter().chain(users).collect()
	}

	/// Shares of every own device, as other users see them
	fn user_shares(&self) -> BTreeMap<String, Share> {
		self.sender
			.directory()
			.agents(AgentType::Device)
			.into_iter()
			.flat_map(|agent| agent.shares.into_iter())
			.collect()
	}

	fn failed(&self, agent_type: AgentType, hash: &str, error: &SendError) {
		match error {
			SendError::Transport(e) if e.marks_offline() => {
				warn!("Heartbeat to {} {} failed: {}", agent_type, hash, e);
				self.mark_offline(agent_type, hash);
			}
			other => warn!("Heartbeat to {} {} not delivered: {}", agent_type, hash, other),
		}
	}

	/// Set an agent offline and tell the local UI on its behalf
	pub fn mark_offline(&self, agent_type: AgentType, hash: &str) {
		let directory = self.sender.directory();
		if !directory.set_status(agent_type, hash, AgentStatus::Offline) {
			return;
		}
		let Some(agent) = directory.agent(agent_type, hash) else {
			return;
		};
		info!("{} {} is offline", agent_type, hash);
		self.sender.transport().browsers(&Envelope::Heartbeat(Heartbeat {
			agent_from: agent.hash,
			agent_type,
			ip_all: agent.ip_all,
			ports: agent.ports,
			refresh: 0,
			status: AgentStatus::Offline,
			shares: None,
		}));
	}

	/// Apply a received heartbeat; unknown senders are ignored
	pub fn receive(&self, beat: Heartbeat) -> bool {
		let changed = self.sender.directory().apply_heartbeat(
			beat.agent_type,
			&beat.agent_from,
			beat.ip_all.clone(),
			beat.ports,
			beat.status,
			beat.shares.clone(),
		);
		if changed {
			debug!("Heartbeat from {} {}", beat.agent_type, beat.agent_from);
			self.sender.transport().browsers(&Envelope::Heartbeat(beat));
		} else {
			debug!("Ignored heartbeat from unknown {} {}", beat.agent_type, beat.agent_from);
		}
		changed
	}

	/// Apply a whole-record agent update
	pub fn receive_update(&self, update: AgentUpdate) -> usize {
		let merged =
			self.sender.directory().merge_agents(update.agent_type, update.agents.clone());
		debug!("Agent update from {} replaced {} {} records", update.agent_from, merged, update.agent_type);
		self.sender.transport().browsers(&Envelope::HeartbeatUpdate(update));
		merged
	}

	/// Replace this device's shares and announce them
	pub async fn share_update(&self, shares: BTreeMap<String, Share>) -> Vec<Delivery> {
		self.sender.directory().set_own_shares(shares);
		self.beat(true).await
	}
}


// vim: ts=4
