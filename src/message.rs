//! Text message service
//!
//! A batch of message items is addressed by the first item: `device` reaches
//! the local UI and every own device, `user` every known user, `all` both
//! groups, and anything else names one agent of the item's type.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::agents::{AgentStatus, AgentType};
use crate::logging::*;
use crate::protocol::{Envelope, MessageItem};
use crate::sender::{Delivery, Group, Sender};

pub struct MessageService {
	sender: Arc<Sender>,
	history: Mutex<VecDeque<MessageItem>>,
	limit: usize,
}

impl MessageService {
	pub fn new(sender: Arc<Sender>, limit: usize) -> Self {
		MessageService { sender, history: Mutex::new(VecDeque::new()), limit }
	}

	/// Send a batch written on this device
	pub async fn send(&self, mut items: Vec<MessageItem>) -> Vec<Delivery> {
		let Some(first) = items.first() else {
			return vec![];
		};
		let directory = self.sender.directory();
		let target = first.agent_to.clone();
		let agent_type = first.agent_type;

		let deliveries = match target.as_str() {
			"device" => {
				self.sender.transport().browsers(&Envelope::Message(items.clone()));
				self.sender.broadcast(&Envelope::Message(items.clone()), Group::Device).await
			}
			"user" => self.sender.broadcast(&Envelope::Message(items.clone()), Group::User).await,
			"all" => {
				let envelope = Envelope::Message(items.clone());
				let mut deliveries = self.sender.broadcast(&envelope, Group::Device).await;
				deliveries.extend(self.sender.broadcast(&envelope, Group::User).await);
				deliveries
			}
			hash if agent_type == AgentType::Device && directory.is_self(hash) => {
				self.sender.transport().browsers(&Envelope::Message(items.clone()));
				vec![]
			}
			hash => {
				let offline = directory
					.agent(agent_type, hash)
					.map(|agent| agent.status == AgentStatus::Offline)
					.unwrap_or(true);
				if offline {
					info!("Message to offline {} {} held", agent_type, hash);
					for item in items.iter_mut() {
						item.offline = true;
					}
					self.sender.transport().browsers(&Envelope::Message(items.clone()));
					vec![]
				} else {
					let result =
						self.sender.deliver(agent_type, hash, Envelope::Message(items.clone())).await;
					vec![(hash.to_string(), result)]
				}
			}
		};

		for (hash, result) in &deliveries {
			if let Err(e) = result {
				warn!("Message to {} not delivered: {}", hash, e);
			}
		}
		self.record(items);
		deliveries
	}

	/// A batch arriving from another agent goes to the local UI
	pub fn receive(&self, items: Vec<MessageItem>) {
		debug!("Received {} message item(s)", items.len());
		self.sender.transport().browsers(&Envelope::Message(items.clone()));
		self.record(items);
	}

	/// Oldest first
	pub fn history(&self) -> Vec<MessageItem> {
		let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
		history.iter().cloned().collect()
	}

	fn record(&self, items: Vec<MessageItem>) {
		let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
		history.extend(items);
		while history.len() > self.limit {
			history.pop_front();
		}
	}
}


// vim: ts=4
