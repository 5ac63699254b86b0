//! Recording transport for unit tests

use async_trait::async_trait;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Mutex;

use super::{FileChannel, HttpRequest, SocketKey, Transport};
use crate::agents::{Agent, AgentType};
use crate::error::TransportError;
use crate::protocol::Envelope;

/// How a failing agent fails
#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
	Timeout,
	Refused,
}

#[derive(Default)]
pub(crate) struct RecordingTransport {
	pub open: Mutex<HashSet<SocketKey>>,
	pub queued: Mutex<Vec<(SocketKey, Envelope)>>,
	pub browser: Mutex<Vec<Envelope>>,
	pub requests: Mutex<Vec<HttpRequest>>,
	pub failing: Mutex<Vec<(String, Failure)>>,
	pub opened: Mutex<Vec<SocketKey>>,
}

impl RecordingTransport {
	pub fn fail(&self, hash: &str, failure: Failure) {
		self.failing.lock().unwrap().push((hash.to_string(), failure));
	}

	pub fn mark_open(&self, key: SocketKey) {
		self.open.lock().unwrap().insert(key);
	}

	pub fn browser_envelopes(&self) -> Vec<Envelope> {
		self.browser.lock().unwrap().clone()
	}

	pub fn request_targets(&self) -> Vec<String> {
		self.requests.lock().unwrap().iter().map(|r| r.agent.clone()).collect()
	}
}

#[async_trait]
impl Transport for RecordingTransport {
	fn is_open(&self, key: &SocketKey) -> bool {
		self.open.lock().unwrap().contains(key)
	}

	fn queue(&self, key: &SocketKey, envelope: &Envelope) -> Result<(), TransportError> {
		self.queued.lock().unwrap().push((key.clone(), envelope.clone()));
		Ok(())
	}

	fn browsers(&self, envelope: &Envelope) {
		self.browser.lock().unwrap().push(envelope.clone());
	}

	async fn request(&self, request: HttpRequest) -> Result<Option<Envelope>, TransportError> {
		let failure =
			self.failing.lock().unwrap().iter().find(|(h, _)| *h == request.agent).map(|(_, f)| *f);
		self.requests.lock().unwrap().push(request);
		match failure {
			Some(Failure::Timeout) => Err(TransportError::Timeout),
			Some(Failure::Refused) => Err(TransportError::ConnectionRefused),
			None => Ok(None),
		}
	}

	async fn open(&self, agent_type: AgentType, agent: &Agent) -> Result<(), TransportError> {
		let key = SocketKey::agent(agent_type, agent.hash.clone());
		self.opened.lock().unwrap().push(key.clone());
		self.open.lock().unwrap().insert(key);
		Ok(())
	}

	async fn open_file_channel(
		&self,
		_ip: IpAddr,
		_port: u16,
		_session: &str,
	) -> Result<Box<dyn FileChannel>, TransportError> {
		Err(TransportError::ConnectionRefused)
	}
}

// vim: ts=4
