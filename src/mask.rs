//! Device masking
//!
//! A mask token stands in for a real device hash when a file operation
//! crosses a user-ownership boundary. Tokens are BLAKE3 digests of a
//! per-process nonce, the issue time and the device hash; only this process
//! can resolve them, and only until they expire.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::protocol::DeviceRef;

struct Issued {
	device: String,
	at: Instant,
}

pub struct MaskTable {
	nonce: String,
	ttl: Duration,
	issued: Mutex<HashMap<String, Issued>>,
}

impl MaskTable {
	pub fn new(ttl: Duration) -> Self {
		MaskTable {
			nonce: uuid::Uuid::new_v4().to_string(),
			ttl,
			issued: Mutex::new(HashMap::new()),
		}
	}

	/// Issue a token hiding `device`
	pub fn mask(&self, device: &str) -> String {
		let nanos = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
		let mut hasher = blake3::Hasher::new();
		hasher.update(self.nonce.as_bytes());
		hasher.update(nanos.to_string().as_bytes());
		hasher.update(device.as_bytes());
		let token = hasher.finalize().to_hex().to_string();

		let mut issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
		let now = Instant::now();
		issued.retain(|_, entry| now.duration_since(entry.at) < self.ttl);
		issued.insert(token.clone(), Issued { device: device.to_string(), at: now });
		token
	}

	/// Resolve a token; unknown or expired tokens resolve to nothing
	pub fn unmask(&self, token: &str) -> Option<String> {
		let issued = self.issued.lock().unwrap_or_else(|e| e.into_inner());
		issued
			.get(token)
			.filter(|entry| entry.at.elapsed() < self.ttl)
			.map(|entry| entry.device.clone())
	}

	/// Real device hash behind a device reference
	pub fn resolve(&self, device: &DeviceRef) -> Option<String> {
		match device {
			DeviceRef::Device(hash) => Some(hash.clone()),
			DeviceRef::Mask(token) => self.unmask(token),
		}
	}

	#[cfg(test)]
	pub(crate) fn len(&self) -> usize {
		self.issued.lock().unwrap_or_else(|e| e.into_inner()).len()
	}
}


// vim: ts=4
