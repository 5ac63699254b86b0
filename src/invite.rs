//! Invitation handshake
//!
//! Four stages, each carried over HTTP:
//!
//! | Stage | Runs at | Effect |
//! |---|---|---|
//! | `invite-start` | requester, from its UI | fill own public info, send `invite-request` |
//! | `invite-request` | responder | ask the UI, or auto-accept a known agent |
//! | `invite-response` | responder, from its UI | record decision, send `invite-complete` |
//! | `invite-complete` | requester | merge shares if accepted, tell the UI |
//!
//! Every invitation id has one ledger entry per side and may only move along
//! that side's transition table.

use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::agents::{Agent, AgentStatus, AgentType};
use crate::error::{InviteError, SendError, TransportError};
use crate::logging::*;
use crate::protocol::{AgentUpdate, Envelope, InviteAction, InviteAgent, InviteStatus, Invitation};
use crate::sender::{Group, Sender};
use crate::transport::HttpRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Side {
	Requester,
	Responder,
}

/// Legal (from, to) stage pairs per side
const REQUESTER: [(Option<InviteAction>, InviteAction); 2] = [
	(None, InviteAction::InviteRequest),
	(Some(InviteAction::InviteRequest), InviteAction::InviteComplete),
];

const RESPONDER: [(Option<InviteAction>, InviteAction); 3] = [
	(None, InviteAction::InviteRequest),
	(Some(InviteAction::InviteRequest), InviteAction::InviteResponse),
	(Some(InviteAction::InviteResponse), InviteAction::InviteComplete),
];

fn allowed(side: Side, from: Option<InviteAction>, to: InviteAction) -> bool {
	let table: &[(Option<InviteAction>, InviteAction)] = match side {
		Side::Requester => &REQUESTER,
		Side::Responder => &RESPONDER,
	};
	table.iter().any(|&(f, t)| f == from && t == to)
}

/// What a handled stage did to the directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outcome {
	pub merged: bool,
}

/// Last stage reached by one side of an invitation
struct Stage {
	action: InviteAction,
	at: Instant,
}

pub struct InviteService {
	sender: Arc<Sender>,
	ttl: Duration,
	ledger: Mutex<HashMap<(String, Side), Stage>>,
}

impl InviteService {
	/// Ledger entries older than `ttl` are dropped, so an invitation that
	/// never completes cannot be finished later
	pub fn new(sender: Arc<Sender>, ttl: Duration) -> Self {
		InviteService { sender, ttl, ledger: Mutex::new(HashMap::new()) }
	}

	/// Dispatch one invitation by its action
	pub async fn receive(self: &Arc<Self>, invitation: Invitation) -> Result<Outcome, InviteError> {
		match invitation.action {
			InviteAction::InviteStart => self.start(invitation).await,
			InviteAction::InviteRequest => self.request(invitation),
			InviteAction::InviteResponse => self.respond(invitation).await,
			InviteAction::InviteComplete => self.complete(invitation).await,
		}
	}

	fn advance(&self, id: &str, side: Side, to: InviteAction) -> Result<(), InviteError> {
		let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
		let now = Instant::now();
		ledger.retain(|_, stage| now.duration_since(stage.at) < self.ttl);
		let key = (id.to_string(), side);
		let from = ledger.get(&key).map(|stage| stage.action);
		if !allowed(side, from, to) {
			return Err(InviteError::OutOfOrder {
				id: id.to_string(),
				from: from.map(|a| a.to_string()),
				to: to.to_string(),
			});
		}
		ledger.insert(key, Stage { action: to, at: now });
		Ok(())
	}

	/// Whether this side has a live entry for the invitation
	fn pending(&self, id: &str, side: Side) -> bool {
		let ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
		ledger.get(&(id.to_string(), side)).is_some_and(|stage| stage.at.elapsed() < self.ttl)
	}

	fn forget(&self, id: &str, side: Side) {
		let mut ledger = self.ledger.lock().unwrap_or_else(|e| e.into_inner());
		ledger.remove(&(id.to_string(), side));
	}

	/// Stage 1: send `invite-request` to the address the UI entered
	async fn start(&self, mut invitation: Invitation) -> Result<Outcome, InviteError> {
		let peer = invitation.agent_response.ip_selected;
		let port = invitation.agent_response.ports.http;
		invitation.agent_request = self.public_info(invitation.agent_type, peer);
		invitation.action = InviteAction::InviteRequest;
		invitation.status = InviteStatus::Pending;
		self.advance(&invitation.id, Side::Requester, InviteAction::InviteRequest)?;

		info!("Sending invitation {} to {:?}:{}", invitation.id, peer, port);
		if let Err(e) = self.post(peer, port, &invitation).await {
			self.forget(&invitation.id, Side::Requester);
			invitation.message = failure_message("Remote user", peer, port, &e, "Invitation not sent");
			warn!("{}", invitation.message);
			self.sender.transport().browsers(&Envelope::InviteError(invitation));
		}
		Ok(Outcome::default())
	}

	/// Stage 2: surface to the UI, or auto-accept an agent already known
	fn request(self: &Arc<Self>, mut invitation: Invitation) -> Result<Outcome, InviteError> {
		self.advance(&invitation.id, Side::Responder, InviteAction::InviteRequest)?;
		invitation.agent_response = self.public_info(invitation.agent_type, invitation.agent_request.ip_selected);

		let directory = self.sender.directory();
		let known = match invitation.agent_type {
			AgentType::Device => directory.agent(AgentType::Device, &invitation.agent_request.hash_device),
			AgentType::User => directory.agent(AgentType::User, &invitation.agent_request.hash_user),
		};
		if known.is_none() {
			self.sender.transport().browsers(&Envelope::Invite(invitation));
			return Ok(Outcome::default());
		}

		let local = invitation.agent_response.ip_selected.map(|ip| ip.to_string()).unwrap_or_default();
		invitation.message = format!(
			"Accepted invitation. Request processed at responding terminal {} for type {}. Agent already present, so auto accepted and returned to requesting terminal.",
			local, invitation.agent_type
		);
		invitation.status = InviteStatus::Accepted;
		self.advance(&invitation.id, Side::Responder, InviteAction::InviteResponse)?;

		// The request's HTTP exchange must finish before the answer goes back
		let service = Arc::clone(self);
		tokio::spawn(async move {
			if let Err(e) = service.send_complete(invitation).await {
				warn!("Auto accepted invitation not completed: {}", e);
			}
		});
		Ok(Outcome::default())
	}

	/// Stage 3: the responder's UI decided
	async fn respond(&self, mut invitation: Invitation) -> Result<Outcome, InviteError> {
		if invitation.status == InviteStatus::Pending {
			return Err(InviteError::Undecided { id: invitation.id });
		}
		self.advance(&invitation.id, Side::Responder, InviteAction::InviteResponse)?;

		let local = invitation.agent_response.ip_selected.map(|ip| ip.to_string()).unwrap_or_default();
		let remote = invitation.agent_request.ip_selected.map(|ip| ip.to_string()).unwrap_or_default();
		invitation.message = format!(
			"{} invitation response processed at responding terminal {} and sent to requesting terminal {}.",
			capitalize(&invitation.status.to_string()),
			local,
			remote
		);

		let mut outcome = Outcome::default();
		if invitation.status == InviteStatus::Accepted {
			let agents = invitation.agent_request.agents.values().cloned().collect();
			outcome.merged = self.merge(invitation.agent_type, agents).await > 0;
		}
		self.send_complete(invitation).await?;
		Ok(outcome)
	}

	async fn send_complete(&self, mut invitation: Invitation) -> Result<(), InviteError> {
		self.advance(&invitation.id, Side::Responder, InviteAction::InviteComplete)?;
		self.forget(&invitation.id, Side::Responder);
		invitation.action = InviteAction::InviteComplete;

		let peer = invitation.agent_request.ip_selected;
		let port = invitation.agent_request.ports.http;
		if let Err(e) = self.post(peer, port, &invitation).await {
			invitation.message = failure_message("Originator", peer, port, &e, "Invitation incomplete");
			warn!("{}", invitation.message);
			self.sender.transport().browsers(&Envelope::InviteError(invitation));
		}
		Ok(())
	}

	/// Stage 4: the answer is back at the requester
	async fn complete(&self, mut invitation: Invitation) -> Result<Outcome, InviteError> {
		if !self.pending(&invitation.id, Side::Requester) {
			return Err(InviteError::UnknownInvitation { id: invitation.id });
		}
		if invitation.status == InviteStatus::Pending {
			return Err(InviteError::Undecided { id: invitation.id });
		}
		self.advance(&invitation.id, Side::Requester, InviteAction::InviteComplete)?;
		self.forget(&invitation.id, Side::Requester);

		let name = match invitation.agent_type {
			AgentType::Device => &invitation.agent_response.name_device,
			AgentType::User => &invitation.agent_response.name_user,
		};
		invitation.message = format!(
			"{} invitation returned from {} '{}'.",
			capitalize(&invitation.status.to_string()),
			invitation.agent_type,
			name
		);

		let mut outcome = Outcome::default();
		if invitation.status == InviteStatus::Accepted {
			let agents: Vec<Agent> = invitation.agent_response.agents.values().cloned().collect();
			outcome.merged = self.merge(invitation.agent_type, agents.clone()).await > 0;

			let directory = self.sender.directory();
			if directory.agents(AgentType::Device).len() > 1 {
				let payload = match invitation.agent_type {
					AgentType::Device => directory.agents(AgentType::Device),
					AgentType::User => agents,
				};
				let update = Envelope::HeartbeatUpdate(AgentUpdate {
					agent_from: directory.identity().hash_device.clone(),
					agent_type: invitation.agent_type,
					agents: payload,
				});
				for (hash, result) in self.sender.broadcast(&update, Group::Device).await {
					if let Err(e) = result {
						warn!("Agent update to device {} failed: {}", hash, e);
					}
				}
			}
		}
		info!("{}", invitation.message);
		self.sender.transport().browsers(&Envelope::Invite(invitation));
		Ok(outcome)
	}

	/// Whole-record merge, then open a primary socket to each new agent
	async fn merge(&self, agent_type: AgentType, agents: Vec<Agent>) -> usize {
		let agents: Vec<Agent> =
			agents.into_iter().map(|agent| Agent { status: AgentStatus::Online, ..agent }).collect();
		let merged = self.sender.directory().merge_agents(agent_type, agents.clone());
		for agent in agents.iter().filter(|a| !self.is_self(agent_type, &a.hash)) {
			if let Err(e) = self.sender.transport().open(agent_type, agent).await {
				debug!("Socket to {} {} not opened: {}", agent_type, agent.hash, e);
			}
		}
		merged
	}

	fn is_self(&self, agent_type: AgentType, hash: &str) -> bool {
		let identity = self.sender.directory().identity();
		match agent_type {
			AgentType::Device => hash == identity.hash_device,
			AgentType::User => hash == identity.hash_user,
		}
	}

	/// This agent's public side of an invitation
	fn public_info(&self, agent_type: AgentType, peer: Option<IpAddr>) -> InviteAgent {
		let directory = self.sender.directory();
		let identity = directory.identity().clone();
		let own = directory.this_device();
		let ip_all = own.as_ref().map(|d| d.ip_all.clone()).unwrap_or_default();
		let ports = own.as_ref().map(|d| d.ports).unwrap_or_default();

		let agents: BTreeMap<String, Agent> = match agent_type {
			AgentType::Device => directory
				.agents(AgentType::Device)
				.into_iter()
				.map(|agent| (agent.hash.clone(), agent))
				.collect(),
			AgentType::User => {
				let shares = directory
					.agents(AgentType::Device)
					.into_iter()
					.flat_map(|agent| agent.shares.into_iter())
					.collect();
				let user = Agent {
					hash: identity.hash_user.clone(),
					name: identity.name_user.clone(),
					ip_all: ip_all.clone(),
					ports,
					status: AgentStatus::Online,
					shares,
				};
				BTreeMap::from([(identity.hash_user.clone(), user)])
			}
		};

		InviteAgent {
			hash_user: identity.hash_user,
			hash_device: match agent_type {
				AgentType::Device => identity.hash_device,
				AgentType::User => String::new(),
			},
			name_user: identity.name_user,
			name_device: match agent_type {
				AgentType::Device => identity.name_device,
				AgentType::User => String::new(),
			},
			ip_selected: select_address(&ip_all, peer),
			ip_all,
			ports,
			agents,
		}
	}

	async fn post(
		&self,
		ip: Option<IpAddr>,
		port: u16,
		invitation: &Invitation,
	) -> Result<(), SendError> {
		let ip = ip.ok_or(SendError::Transport(TransportError::ConnectionRefused))?;
		let request = HttpRequest {
			agent_type: invitation.agent_type,
			agent: String::new(),
			ip,
			port,
			envelope: Envelope::Invite(invitation.clone()),
		};
		self.sender.transport().request(request).await?;
		Ok(())
	}
}

/// Own address in the peer's family, else the first one
fn select_address(own: &[IpAddr], peer: Option<IpAddr>) -> Option<IpAddr> {
	let same_family = |ip: &&IpAddr| match peer {
		Some(peer) => ip.is_ipv6() == peer.is_ipv6(),
		None => true,
	};
	own.iter().find(same_family).or_else(|| own.first()).copied()
}

fn failure_message(
	who: &str,
	ip: Option<IpAddr>,
	port: u16,
	error: &SendError,
	consequence: &str,
) -> String {
	let ip = ip.map(|ip| ip.to_string()).unwrap_or_else(|| "none".to_string());
	let reason = match error {
		SendError::Transport(TransportError::Timeout) => "timed out".to_string(),
		SendError::Transport(TransportError::ConnectionRefused) => "refused the connection".to_string(),
		SendError::Transport(TransportError::ConnectionReset) => "reset the connection".to_string(),
		other => format!("failed ({})", other),
	};
	format!("{}, ip - {} and port - {}, {}. {}.", who, ip, port, reason, consequence)
}

fn capitalize(word: &str) -> String {
	let mut chars = word.chars();
	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}


// vim: ts=4
