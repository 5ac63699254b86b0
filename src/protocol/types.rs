//! Payload types, one per envelope tag

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

use crate::agents::{Agent, AgentStatus, AgentType, Ports, Share};
use crate::error::PermissionError;

// ============================================================================
// HEARTBEAT
// ============================================================================

/// Liveness and address announcement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
	/// Hash of the announcing agent as the receiver knows it
	pub agent_from: String,
	pub agent_type: AgentType,
	pub ip_all: Vec<IpAddr>,
	pub ports: Ports,
	/// Seconds until the next heartbeat
	pub refresh: u64,
	pub status: AgentStatus,
	/// Present only when the share list changed
	#[serde(default)]
	pub shares: Option<BTreeMap<String, Share>>,
}

/// Whole-record replacement of a set of agents
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentUpdate {
	pub agent_from: String,
	pub agent_type: AgentType,
	pub agents: Vec<Agent>,
}

// ============================================================================
// INVITATION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InviteAction {
	InviteStart,
	InviteRequest,
	InviteResponse,
	InviteComplete,
}

impl fmt::Display for InviteAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			InviteAction::InviteStart => "invite-start",
			InviteAction::InviteRequest => "invite-request",
			InviteAction::InviteResponse => "invite-response",
			InviteAction::InviteComplete => "invite-complete",
		};
		write!(f, "{}", name)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
	#[default]
	Pending,
	Accepted,
	Declined,
}

impl fmt::Display for InviteStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			InviteStatus::Pending => write!(f, "pending"),
			InviteStatus::Accepted => write!(f, "accepted"),
			InviteStatus::Declined => write!(f, "declined"),
		}
	}
}

/// Public information one side of an invitation exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct InviteAgent {
	pub hash_user: String,
	pub hash_device: String,
	pub name_user: String,
	pub name_device: String,
	pub ip_all: Vec<IpAddr>,
	/// Address the other side dials
	pub ip_selected: Option<IpAddr>,
	pub ports: Ports,
	/// Device records for device invitations, the single user record otherwise
	pub agents: BTreeMap<String, Agent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invitation {
	pub id: String,
	pub action: InviteAction,
	pub agent_type: AgentType,
	pub agent_request: InviteAgent,
	pub agent_response: InviteAgent,
	#[serde(default)]
	pub status: InviteStatus,
	#[serde(default)]
	pub message: String,
}

// ============================================================================
// FILE COPY
// ============================================================================

/// Real device hash or an opaque mask token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceRef {
	Device(String),
	Mask(String),
}

/// One party of a copy operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileAgent {
	pub user: String,
	pub device: DeviceRef,
	/// Share key granting access, or the transfer session token
	#[serde(default)]
	pub share: String,
	/// Directory the agent is looking at (the destination for agentWrite)
	pub modal_address: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CopyRole {
	AgentRequest,
	AgentSource,
	AgentWrite,
}

impl fmt::Display for CopyRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CopyRole::AgentRequest => write!(f, "agentRequest"),
			CopyRole::AgentSource => write!(f, "agentSource"),
			CopyRole::AgentWrite => write!(f, "agentWrite"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyAgents {
	pub agent_request: FileAgent,
	pub agent_source: FileAgent,
	pub agent_write: FileAgent,
}

impl CopyAgents {
	pub fn role(&self, role: CopyRole) -> &FileAgent {
		match role {
			CopyRole::AgentRequest => &self.agent_request,
			CopyRole::AgentSource => &self.agent_source,
			CopyRole::AgentWrite => &self.agent_write,
		}
	}

	pub fn role_mut(&mut self, role: CopyRole) -> &mut FileAgent {
		match role {
			CopyRole::AgentRequest => &mut self.agent_request,
			CopyRole::AgentSource => &mut self.agent_source,
			CopyRole::AgentWrite => &mut self.agent_write,
		}
	}
}

/// `copy` payload: a request to copy or cut locations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyRequest {
	#[serde(flatten)]
	pub agents: CopyAgents,
	pub location: Vec<String>,
	#[serde(default)]
	pub cut: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
	File,
	Directory,
	Link,
	Error,
}

/// One file-system object queued for transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
	pub source: String,
	pub kind: EntryKind,
	#[serde(default)]
	pub size: u64,
	#[serde(default)]
	pub children: usize,
	/// Path relative to the write destination
	pub destination: String,
	/// Target of a symbolic link
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub link: Option<String>,
}

/// Tallies gathered during the manifest walk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ListData {
	pub directories: usize,
	pub files: usize,
	pub links: usize,
	pub errors: usize,
	pub size: u64,
}

/// `copy-list` payload: manifest sent to the write agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopyList {
	#[serde(flatten)]
	pub agents: CopyAgents,
	pub list: Vec<ManifestEntry>,
	pub list_data: ListData,
	pub session: String,
	/// Source address for the file transfer channel
	pub ip: IpAddr,
	pub port: u16,
	#[serde(default)]
	pub cut: bool,
}

/// `copy-send-file` payload: one file request on the transfer channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendFileRequest {
	pub path: String,
	/// Deflate level, 0 for raw bytes
	pub compression: u32,
	pub session: String,
}

/// Sent by the source after the bytes of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTrailer {
	/// BLAKE3 hex digest of the file as read
	pub hash: String,
	pub size: u64,
	#[serde(default)]
	pub error: Option<String>,
}

/// Structured permission denial
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Denial {
	Missing,
	NoShare,
	ReadOnly,
}

impl From<PermissionError> for Denial {
	fn from(e: PermissionError) -> Self {
		match e {
			PermissionError::Missing => Denial::Missing,
			PermissionError::NoShare => Denial::NoShare,
			PermissionError::ReadOnly => Denial::ReadOnly,
		}
	}
}

/// `file-system-status` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSystemStatus {
	#[serde(flatten)]
	pub agents: CopyAgents,
	/// Role that should act on this status
	pub target: CopyRole,
	pub message: String,
	#[serde(default)]
	pub denied: Option<Denial>,
	/// Transfer session, set on the final status of a cross-device transfer
	#[serde(default)]
	pub session: Option<String>,
	#[serde(default)]
	pub cut: bool,
	#[serde(default)]
	pub failures: usize,
	/// Set on the terminal status of an operation
	#[serde(default)]
	pub complete: bool,
}

// ============================================================================
// MESSAGES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageItem {
	pub agent_from: String,
	/// Agent hash, or one of `device`, `user`, `all`
	pub agent_to: String,
	pub agent_type: AgentType,
	/// Milliseconds since the Unix epoch
	pub date: u64,
	pub message: String,
	#[serde(default)]
	pub offline: bool,
}

// vim: ts=4
