//! Agent directory: known devices and users, their addresses and shares
//!
//! Readers take cloned records. Only the heartbeat and invitation
//! components write, and every write replaces a whole record.

pub mod permission;

pub use permission::FsAction;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::RwLock;

use crate::error::PermissionError;

/// Which registry an agent lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
	Device,
	User,
}

impl fmt::Display for AgentType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AgentType::Device => write!(f, "device"),
			AgentType::User => write!(f, "user"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
	#[default]
	Online,
	Offline,
}

/// Advertised listener ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Ports {
	pub http: u16,
	pub ws: u16,
}

/// A directory exposed by a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
	/// Path root of the share
	pub name: String,
	pub read_only: bool,
	/// Hash of the device exposing it
	pub device: String,
}

impl Share {
	/// Stable share key: BLAKE3 of owning device and path root
	pub fn key(device: &str, name: &str) -> String {
		let mut hasher = blake3::Hasher::new();
		hasher.update(device.as_bytes());
		hasher.update(name.as_bytes());
		hasher.finalize().to_hex().to_string()
	}
}

/// One device or user record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
	pub hash: String,
	pub name: String,
	/// Most recently successful first
	pub ip_all: Vec<IpAddr>,
	pub ports: Ports,
	#[serde(default)]
	pub status: AgentStatus,
	/// Shares keyed by share key
	#[serde(default)]
	pub shares: BTreeMap<String, Share>,
}

impl Agent {
	/// The address transports dial
	pub fn address(&self) -> Option<IpAddr> {
		self.ip_all.first().copied()
	}
}

/// This process's own identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
	pub hash_user: String,
	pub hash_device: String,
	pub name_user: String,
	pub name_device: String,
}

/// Serializable content of the directory
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Registry {
	#[serde(default)]
	pub device: BTreeMap<String, Agent>,
	#[serde(default)]
	pub user: BTreeMap<String, Agent>,
}

impl Registry {
	fn of(&self, agent_type: AgentType) -> &BTreeMap<String, Agent> {
		match agent_type {
			AgentType::Device => &self.device,
			AgentType::User => &self.user,
		}
	}

	fn of_mut(&mut self, agent_type: AgentType) -> &mut BTreeMap<String, Agent> {
		match agent_type {
			AgentType::Device => &mut self.device,
			AgentType::User => &mut self.user,
		}
	}
}

/// Injected directory service shared by every component
pub struct Directory {
	identity: Identity,
	registry: RwLock<Registry>,
}

impl Directory {
	/// Create a directory holding only this device
	pub fn new(identity: Identity, this_device: Agent) -> Self {
		Self::from_registry(identity, Registry::default(), this_device)
	}

	/// Restore a saved registry; the record of this device always wins
	pub fn from_registry(identity: Identity, mut registry: Registry, this_device: Agent) -> Self {
		registry.device.insert(identity.hash_device.clone(), this_device);
		registry.user.remove(&identity.hash_user);
		Directory { identity, registry: RwLock::new(registry) }
	}

	pub fn identity(&self) -> &Identity {
		&self.identity
	}

	pub fn is_self(&self, device: &str) -> bool {
		device == self.identity.hash_device
	}

	pub fn agent(&self, agent_type: AgentType, hash: &str) -> Option<Agent> {
		self.read().of(agent_type).get(hash).cloned()
	}

	/// All agents of a type, this device included
	pub fn agents(&self, agent_type: AgentType) -> Vec<Agent> {
		self.read().of(agent_type).values().cloned().collect()
	}

	/// This device's own record
	pub fn this_device(&self) -> Option<Agent> {
		self.agent(AgentType::Device, &self.identity.hash_device)
	}

	pub fn shares_of(&self, device: &str) -> Vec<Share> {
		self.read()
			.device
			.get(device)
			.map(|agent| agent.shares.values().cloned().collect())
			.unwrap_or_default()
	}

	/// User owning a device, or an empty string
	///
	/// Own devices belong to this user; foreign devices are found by
	/// scanning the users' share lists for a share exposed by that device.
	pub fn owner_of(&self, device: &str) -> String {
		let registry = self.read();
		if registry.device.contains_key(device) {
			return self.identity.hash_user.clone();
		}
		registry
			.user
			.values()
			.find(|user| user.shares.values().any(|share| share.device == device))
			.map(|user| user.hash.clone())
			.unwrap_or_default()
	}

	/// Device exposing the share with this key
	pub fn device_of_share(&self, share_key: &str) -> Option<String> {
		let registry = self.read();
		registry
			.device
			.values()
			.chain(registry.user.values())
			.find_map(|agent| agent.shares.get(share_key).map(|share| share.device.clone()))
	}

	/// Share permission check for an external request
	///
	/// Looks in the device registry first and falls back to shares a user
	/// agent advertises on behalf of that device.
	pub fn check_access(
		&self,
		device: &str,
		path: &str,
		action: FsAction,
	) -> Result<Share, PermissionError> {
		let registry = self.read();
		let shares: Vec<&Share> = match registry.device.get(device) {
			Some(agent) => agent.shares.values().collect(),
			None => {
				let owned: Vec<&Share> = registry
					.user
					.values()
					.flat_map(|user| user.shares.values())
					.filter(|share| share.device == device)
					.collect();
				if owned.is_empty() {
					return Err(PermissionError::Missing);
				}
				owned
			}
		};
		permission::check(shares, path, action).cloned()
	}

	pub fn is_read_only(&self, device: &str, path: &str, action: FsAction) -> bool {
		matches!(self.check_access(device, path, action), Err(PermissionError::ReadOnly))
	}

	pub fn snapshot(&self) -> Registry {
		self.read().clone()
	}

	// ------------------------------------------------------------------------
	// Writers (heartbeat and invitation only)
	// ------------------------------------------------------------------------

	pub(crate) fn insert_agent(&self, agent_type: AgentType, agent: Agent) {
		if agent_type == AgentType::User && agent.hash == self.identity.hash_user {
			return;
		}
		self.write().of_mut(agent_type).insert(agent.hash.clone(), agent);
	}

	/// Returns false when the agent is unknown or already in that status
	pub(crate) fn set_status(&self, agent_type: AgentType, hash: &str, status: AgentStatus) -> bool {
		let mut registry = self.write();
		let Some(current) = registry.of(agent_type).get(hash) else {
			return false;
		};
		if current.status == status {
			return false;
		}
		let updated = Agent { status, ..current.clone() };
		registry.of_mut(agent_type).insert(hash.to_string(), updated);
		true
	}

	/// Overwrite address, port and status fields from a received heartbeat
	///
	/// Unknown agents are ignored; returns whether a record changed.
	pub(crate) fn apply_heartbeat(
		&self,
		agent_type: AgentType,
		hash: &str,
		ip_all: Vec<IpAddr>,
		ports: Ports,
		status: AgentStatus,
		shares: Option<BTreeMap<String, Share>>,
	) -> bool {
		let mut registry = self.write();
		let Some(current) = registry.of(agent_type).get(hash) else {
			return false;
		};
		let updated = Agent {
			hash: current.hash.clone(),
			name: current.name.clone(),
			ip_all: if ip_all.is_empty() { current.ip_all.clone() } else { ip_all },
			ports,
			status,
			shares: shares.unwrap_or_else(|| current.shares.clone()),
		};
		registry.of_mut(agent_type).insert(hash.to_string(), updated);
		true
	}

	/// Replace the shares of this device
	pub(crate) fn set_own_shares(&self, shares: BTreeMap<String, Share>) {
		let mut registry = self.write();
		if let Some(current) = registry.device.get(&self.identity.hash_device) {
			let updated = Agent { shares, ..current.clone() };
			registry.device.insert(self.identity.hash_device.clone(), updated);
		}
	}

	/// Whole-record replacement of a batch of agents; this device is skipped
	pub(crate) fn merge_agents(&self, agent_type: AgentType, agents: Vec<Agent>) -> usize {
		let mut registry = self.write();
		let mut merged = 0;
		for agent in agents {
			let is_self = match agent_type {
				AgentType::Device => agent.hash == self.identity.hash_device,
				AgentType::User => agent.hash == self.identity.hash_user,
			};
			if is_self {
				continue;
			}
			registry.of_mut(agent_type).insert(agent.hash.clone(), agent);
			merged += 1;
		}
		merged
	}

	fn read(&self) -> std::sync::RwLockReadGuard<'_, Registry> {
		self.registry.read().unwrap_or_else(|e| e.into_inner())
	}

	fn write(&self) -> std::sync::RwLockWriteGuard<'_, Registry> {
		self.registry.write().unwrap_or_else(|e| e.into_inner())
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;

	pub(crate) fn identity(user: &str, device: &str) -> Identity {
		Identity {
			hash_user: user.to_string(),
			hash_device: device.to_string(),
			name_user: format!("{} user", user),
			name_device: format!("{} device", device),
		}
	}

	pub(crate) fn device(hash: &str, shares: &[(&str, bool)]) -> Agent {
		Agent {
			hash: hash.to_string(),
			name: hash.to_string(),
			ip_all: vec!["127.0.0.1".parse().unwrap()],
			ports: Ports { http: 8000, ws: 8001 },
			status: AgentStatus::Online,
			shares: shares
				.iter()
				.map(|(name, read_only)| {
					(
						Share::key(hash, name),
						Share { name: name.to_string(), read_only: *read_only, device: hash.to_string() },
					)
				})
				.collect(),
		}
	}

	#[test]
	fn test_self_device_present() {
		let dir = Directory::new(identity("u1", "d1"), device("d1", &[]));
		assert!(dir.agent(AgentType::Device, "d1").is_some());
		assert_eq!(dir.owner_of("d1"), "u1");
	}

	#[test]
	fn test_owner_of_foreign_device() {
		let dir = Directory::new(identity("u1", "d1"), device("d1", &[]));
		let mut user = device("u2", &[]);
		user.shares = device("d9", &[("/srv", false)]).shares;
		dir.insert_agent(AgentType::User, user);
		assert_eq!(dir.owner_of("d9"), "u2");
		assert_eq!(dir.owner_of("nobody"), "");
	}

	#[test]
	fn test_check_access_outcomes() {
		let dir = Directory::new(identity("u1", "d1"), device("d1", &[("/data", false), ("/data/ro", true)]));
		assert!(dir.check_access("d1", "/data/file", FsAction::FsWrite).is_ok());
		assert_eq!(
			dir.check_access("d1", "/data/ro/file", FsAction::FsWrite),
			Err(PermissionError::ReadOnly)
		);
		assert!(dir.check_access("d1", "/data/ro/file", FsAction::FsRead).is_ok());
		assert_eq!(dir.check_access("d1", "/etc/passwd", FsAction::FsRead), Err(PermissionError::NoShare));
		assert_eq!(dir.check_access("d7", "/data", FsAction::FsRead), Err(PermissionError::Missing));
		assert!(dir.is_read_only("d1", "/data/ro", FsAction::Cut));
	}

	#[test]
	fn test_set_status_replaces_record() {
		let dir = Directory::new(identity("u1", "d1"), device("d1", &[]));
		dir.insert_agent(AgentType::Device, device("d2", &[]));
		assert!(dir.set_status(AgentType::Device, "d2", AgentStatus::Offline));
		assert!(!dir.set_status(AgentType::Device, "d2", AgentStatus::Offline));
		assert_eq!(dir.agent(AgentType::Device, "d2").unwrap().status, AgentStatus::Offline);
		assert!(!dir.set_status(AgentType::User, "ghost", AgentStatus::Offline));
	}

	#[test]
	fn test_apply_heartbeat_ignores_unknown() {
		let dir = Directory::new(identity("u1", "d1"), device("d1", &[]));
		let changed = dir.apply_heartbeat(
			AgentType::Device,
			"stranger",
			vec![],
			Ports::default(),
			AgentStatus::Online,
			None,
		);
		assert!(!changed);
		assert!(dir.agent(AgentType::Device, "stranger").is_none());
	}

	#[test]
	fn test_merge_skips_self() {
		let dir = Directory::new(identity("u1", "d1"), device("d1", &[("/keep", false)]));
		let merged = dir.merge_agents(AgentType::Device, vec![device("d1", &[]), device("d2", &[])]);
		assert_eq!(merged, 1);
		assert_eq!(dir.shares_of("d1").len(), 1);
	}
}

// vim: ts=4
