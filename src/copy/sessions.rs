//! Transfer sessions issued by the source of a cross-device copy
//!
//! The session token is the only credential a destination needs to fetch
//! files: `copy-send-file` requests are served only for files recorded in a
//! live session. A final status carrying the token closes the session.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::agents::Identity;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
	/// Locations the copy was asked for, removed on a successful cut
	pub locations: Vec<String>,
	pub files: HashSet<String>,
	pub cut: bool,
}

#[derive(Default)]
pub struct TransferSessions {
	live: Mutex<HashMap<String, Session>>,
}

impl TransferSessions {
	pub fn new() -> Self {
		Self::default()
	}

	/// Token: issue time followed by BLAKE3 of time, user and device
	pub fn token(identity: &Identity) -> String {
		let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or(0);
		let mut hasher = blake3::Hasher::new();
		hasher.update(now.to_string().as_bytes());
		hasher.update(identity.hash_user.as_bytes());
		hasher.update(identity.hash_device.as_bytes());
		format!("{}{}", now, hasher.finalize().to_hex())
	}

	pub fn open(&self, token: &str, session: Session) {
		let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
		live.insert(token.to_string(), session);
	}

	pub fn allows(&self, token: &str, path: &str) -> bool {
		let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
		live.get(token).map(|s| s.files.contains(path)).unwrap_or(false)
	}

	/// Close a session; only the first call gets it back
	pub fn close(&self, token: &str) -> Option<Session> {
		let mut live = self.live.lock().unwrap_or_else(|e| e.into_inner());
		live.remove(token)
	}

	pub fn is_live(&self, token: &str) -> bool {
		let live = self.live.lock().unwrap_or_else(|e| e.into_inner());
		live.contains_key(token)
	}
}


// vim: ts=4
