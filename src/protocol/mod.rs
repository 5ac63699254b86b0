//! Socket data envelope
//!
//! Every message on either transport is `{ "service": <tag>, "data": <payload> }`.
//! The tag selects exactly one payload shape, decoded exhaustively at the
//! transport boundary.
//!
//! ```ignore
//! use sharenet::protocol::Envelope;
//!
//! let envelope: Envelope = serde_json::from_slice(&body)?;
//! match envelope {
//!     Envelope::Heartbeat(beat) => heartbeat.receive(beat),
//!     Envelope::CopyList(list) => engine.receive_list(list).await,
//!     // ...
//! }
//! ```

pub mod types;

use serde::{Deserialize, Serialize};

pub use types::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "service", content = "data", rename_all = "kebab-case")]
pub enum Envelope {
	Invite(Invitation),
	InviteError(Invitation),
	Heartbeat(Heartbeat),
	HeartbeatUpdate(AgentUpdate),
	Copy(CopyRequest),
	CopyList(CopyList),
	CopySendFile(SendFileRequest),
	FileSystemStatus(FileSystemStatus),
	/// A status relayed from another user, shown on every own device
	FileStatusDevice(FileSystemStatus),
	Message(Vec<MessageItem>),
}

impl Envelope {
	/// Wire tag of this envelope
	pub fn service(&self) -> &'static str {
		match self {
			Envelope::Invite(_) => "invite",
			Envelope::InviteError(_) => "invite-error",
			Envelope::Heartbeat(_) => "heartbeat",
			Envelope::HeartbeatUpdate(_) => "heartbeat-update",
			Envelope::Copy(_) => "copy",
			Envelope::CopyList(_) => "copy-list",
			Envelope::CopySendFile(_) => "copy-send-file",
			Envelope::FileSystemStatus(_) => "file-system-status",
			Envelope::FileStatusDevice(_) => "file-status-device",
			Envelope::Message(_) => "message",
		}
	}

	/// Invitation stage, mirrored into the HTTP `invite` header
	pub fn invite_stage(&self) -> Option<InviteAction> {
		match self {
			Envelope::Invite(invitation) => Some(invitation.action),
			_ => None,
		}
	}

	/// Copy roles carried by copy traffic
	pub fn copy_agents(&self) -> Option<&CopyAgents> {
		match self {
			Envelope::Copy(request) => Some(&request.agents),
			Envelope::CopyList(list) => Some(&list.agents),
			Envelope::FileSystemStatus(status) => Some(&status.agents),
			_ => None,
		}
	}

	pub fn copy_agents_mut(&mut self) -> Option<&mut CopyAgents> {
		match self {
			Envelope::Copy(request) => Some(&mut request.agents),
			Envelope::CopyList(list) => Some(&mut list.agents),
			Envelope::FileSystemStatus(status) => Some(&mut status.agents),
			_ => None,
		}
	}

	pub fn to_json(&self) -> Result<String, serde_json::Error> {
		serde_json::to_string(self)
	}

	pub fn from_json(json: &str) -> Result<Envelope, serde_json::Error> {
		serde_json::from_str(json)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn agent(device: DeviceRef) -> FileAgent {
		FileAgent {
			user: "u1".into(),
			device,
			share: String::new(),
			modal_address: "/data".into(),
		}
	}

	#[test]
	fn test_envelope_wire_shape() {
		let envelope = Envelope::CopySendFile(SendFileRequest {
			path: "/data/a.txt".into(),
			compression: 0,
			session: "tok".into(),
		});
		let value: serde_json::Value = serde_json::to_value(&envelope).unwrap();
		assert_eq!(value["service"], "copy-send-file");
		assert_eq!(value["data"]["path"], "/data/a.txt");
		assert_eq!(envelope.service(), "copy-send-file");
	}

	#[test]
	fn test_unknown_service_rejected() {
		let result = Envelope::from_json(r#"{"service":"settings","data":{}}"#);
		assert!(result.is_err());
	}

	#[test]
	fn test_device_ref_is_self_describing() {
		let masked = serde_json::to_string(&DeviceRef::Mask("abc".into())).unwrap();
		let real = serde_json::to_string(&DeviceRef::Device("abc".into())).unwrap();
		assert_eq!(masked, r#"{"mask":"abc"}"#);
		assert_eq!(real, r#"{"device":"abc"}"#);
	}

	#[test]
	fn test_copy_agents_flattened() {
		let envelope = Envelope::Copy(CopyRequest {
			agents: CopyAgents {
				agent_request: agent(DeviceRef::Device("d1".into())),
				agent_source: agent(DeviceRef::Device("d1".into())),
				agent_write: agent(DeviceRef::Mask("m".into())),
			},
			location: vec!["/data/a".into()],
			cut: false,
		});
		let value: serde_json::Value = serde_json::to_value(&envelope).unwrap();
		assert_eq!(value["data"]["agentWrite"]["device"]["mask"], "m");
		assert!(envelope.copy_agents().is_some());
		assert_eq!(envelope.invite_stage(), None);
	}
}

// vim: ts=4
