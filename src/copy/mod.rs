//! File copy engine
//!
//! `copy` runs at the source agent. When source and destination are the
//! same device the paths are copied locally. Otherwise the source walks the
//! locations into a manifest, opens a transfer session and routes the
//! manifest to the write agent, which recreates the directories, pulls each
//! file over a dedicated channel and verifies its digest. A cut deletes
//! the source only after a final status with zero failures.

pub mod manifest;
pub mod placement;
pub mod sessions;
pub mod status;
pub mod stream;

pub use manifest::Manifest;
pub use sessions::{Session, TransferSessions};
pub use status::CopyStatus;

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use crate::error::{CopyError, PermissionError, TransportError};
use crate::logging::*;
use crate::protocol::{
	CopyAgents, CopyList, CopyRequest, CopyRole, Denial, EntryKind, Envelope, FileAgent,
	FileSystemStatus, FileTrailer, ManifestEntry, SendFileRequest,
};
use crate::sender::{Routed, Sender};
use crate::transport::{FileChannel, FileFrame, FrameSink};
use stream::FileWriter;

pub struct CopyEngine {
	sender: Arc<Sender>,
	sessions: TransferSessions,
	compression: u32,
	buffer_size: usize,
}

impl CopyEngine {
	pub fn new(sender: Arc<Sender>, compression: u32, buffer_size: usize) -> Self {
		CopyEngine { sender, sessions: TransferSessions::new(), compression, buffer_size }
	}

	pub fn sessions(&self) -> &TransferSessions {
		&self.sessions
	}

	/// Entry point at the source agent
	pub async fn copy(&self, request: CopyRequest) -> Result<CopyStatus, CopyError> {
		let agents = &request.agents;
		let masks = self.sender.masks();
		let source = masks.resolve(&agents.agent_source.device);
		let write = masks.resolve(&agents.agent_write.device);
		if source.is_some() && source == write && agents.agent_source.user == agents.agent_write.user {
			self.copy_local(request).await
		} else {
			self.send_list(request).await
		}
	}

	/// Same-device copy: stream each path locally, then the final status
	///
	/// A destination inside one of the locations is refused before anything
	/// is written.
	pub async fn copy_local(&self, request: CopyRequest) -> Result<CopyStatus, CopyError> {
		let root = PathBuf::from(&request.agents.agent_write.modal_address);
		if let Some(location) = enclosing_location(&request.location, &root).await {
			let error = CopyError::IntoItself { location };
			self.abort(&request.agents, &error).await;
			return Err(error);
		}

		let mut manifest = manifest::walk(&request.location).await;
		placement::rename(&mut manifest.entries, &root).await;
		let mut status = CopyStatus::new(manifest.list_data.size, request.cut);
		status.failures += manifest.list_data.errors;

		for entry in manifest.entries.iter().filter(|e| e.kind != EntryKind::Error) {
			let Some(target) = placement::join(&root, &entry.destination) else {
				warn!("No destination for {}", entry.source);
				status.failed();
				continue;
			};
			let result = match entry.kind {
				EntryKind::Directory => ensure_dir(&target).await,
				EntryKind::File => match self.copy_file(Path::new(&entry.source), &target).await {
					Ok(size) => {
						status.file_written(size);
						Ok(())
					}
					Err(e) => Err(e),
				},
				EntryKind::Link => make_link(entry, &target).await,
				EntryKind::Error => Ok(()),
			};
			if let Err(e) = result {
				warn!("Cannot copy {} to {}: {}", entry.source, target.display(), e);
				status.failed();
			}
		}

		if request.cut && status.failures == 0 {
			remove_locations(&request.location).await;
		}
		self.send_final(&request.agents, &status, None).await;
		Ok(status)
	}

	async fn copy_file(&self, source: &Path, target: &Path) -> io::Result<u64> {
		if fs::symlink_metadata(target).await.is_ok() {
			return Err(io::Error::new(io::ErrorKind::AlreadyExists, "destination exists"));
		}
		let size = fs::copy(source, target).await?;
		let expected = stream::hash_file(source, self.buffer_size).await?;
		let written = stream::hash_file(target, self.buffer_size).await?;
		if expected != written {
			return Err(io::Error::new(io::ErrorKind::InvalidData, "digest mismatch after copy"));
		}
		Ok(size)
	}

	/// Cross-device copy, source side: manifest, session, status, route
	async fn send_list(&self, request: CopyRequest) -> Result<CopyStatus, CopyError> {
		let directory = self.sender.directory();
		let manifest = manifest::walk(&request.location).await;
		let token = TransferSessions::token(directory.identity());

		let mut agents = request.agents.clone();
		if agents.agent_write.user != agents.agent_request.user {
			agents.agent_request.share = token.clone();
		}
		self.sessions.open(
			&token,
			Session {
				locations: request.location.clone(),
				files: manifest.files().map(|e| e.source.clone()).collect(),
				cut: request.cut,
			},
		);

		let preparing = status::preparing_message(&manifest.list_data);
		info!("{}", preparing);
		let notice = self.status(&agents, CopyRole::AgentRequest, preparing.clone());
		self.send_status(CopyRole::AgentRequest, notice).await;
		if !same_agent(&agents.agent_request, &agents.agent_write) {
			let notice = self.status(&agents, CopyRole::AgentWrite, preparing);
			self.send_status(CopyRole::AgentWrite, notice).await;
		}

		let own = directory.this_device();
		let ip = own.as_ref().and_then(|d| d.address()).unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
		let port = own.map(|d| d.ports.ws).unwrap_or_default();
		let total = manifest.list_data.size;
		let list = CopyList {
			agents: agents.clone(),
			list: manifest.entries,
			list_data: manifest.list_data,
			session: token.clone(),
			ip,
			port,
			cut: request.cut,
		};

		match self.sender.route(CopyRole::AgentWrite, Envelope::CopyList(list)).await {
			Ok(Routed::Forwarded(_)) => Ok(CopyStatus::new(total, request.cut)),
			Ok(Routed::Local(_)) => {
				// write agent is this device under another reference
				self.sessions.close(&token);
				self.copy_local(request).await
			}
			Err(e) => {
				self.sessions.close(&token);
				let mut failed = self.status(&agents, CopyRole::AgentRequest, format!("Copy failed: {}", e));
				failed.complete = true;
				self.send_status(CopyRole::AgentRequest, failed).await;
				Err(CopyError::Send(e))
			}
		}
	}

	/// Cross-device copy, write side: directories, every file in order, then
	/// links
	///
	/// Each destination is placed under this agent's write root; one that
	/// would leave it counts as a failure and is skipped.
	pub async fn receive_list(&self, list: CopyList) -> Result<CopyStatus, CopyError> {
		let mut entries = list.list;
		manifest::sort(&mut entries);
		let root = PathBuf::from(&list.agents.agent_write.modal_address);
		placement::rename(&mut entries, &root).await;
		let mut status = CopyStatus::new(list.list_data.size, list.cut);
		status.failures += list.list_data.errors;

		let mut placed: Vec<(&ManifestEntry, PathBuf)> = Vec::with_capacity(entries.len());
		for entry in entries.iter().filter(|e| e.kind != EntryKind::Error) {
			match placement::join(&root, &entry.destination) {
				Some(target) => placed.push((entry, target)),
				None => {
					warn!("Refused destination {:?} for {}", entry.destination, entry.source);
					status.failed();
				}
			}
		}
		let of_kind = |kind: EntryKind| placed.iter().filter(move |(entry, _)| entry.kind == kind);

		for (_, target) in of_kind(EntryKind::Directory) {
			if let Err(e) = ensure_dir(target).await {
				warn!("Cannot create {}: {}", target.display(), e);
				status.failed();
			}
		}

		let files: Vec<&(&ManifestEntry, PathBuf)> = of_kind(EntryKind::File).collect();
		if !files.is_empty() {
			let mut channel =
				match self.sender.transport().open_file_channel(list.ip, list.port, &list.session).await {
					Ok(channel) => channel,
					Err(source) => {
						let address = SocketAddr::new(list.ip, list.port).to_string();
						let error = CopyError::Unreachable { address, source };
						self.abort(&list.agents, &error).await;
						return Err(error);
					}
				};

			for (entry, target) in files {
				match self.fetch(channel.as_mut(), entry, &list.session, target).await {
					Ok(Some(size)) => status.file_written(size),
					Ok(None) => status.failed(),
					Err(e) => {
						let error = CopyError::Transport(e);
						self.abort(&list.agents, &error).await;
						return Err(error);
					}
				}
			}
			if let Err(e) = channel.close().await {
				debug!("Transfer channel close: {}", e);
			}
		}

		for (entry, target) in of_kind(EntryKind::Link) {
			if let Err(e) = make_link(entry, target).await {
				warn!("Cannot link {}: {}", target.display(), e);
				status.failed();
			}
		}

		info!("{}", status.message());
		self.send_final(&list.agents, &status, Some(list.session)).await;
		Ok(status)
	}

	/// Request one file; `None` counts as a failure, `Err` aborts
	async fn fetch(
		&self,
		channel: &mut dyn FileChannel,
		entry: &ManifestEntry,
		session: &str,
		target: &Path,
	) -> Result<Option<u64>, TransportError> {
		let request = SendFileRequest {
			path: entry.source.clone(),
			compression: self.compression,
			session: session.to_string(),
		};
		channel.request(&request).await?;

		let mut writer = match FileWriter::create(target, self.compression).await {
			Ok(writer) => Some(writer),
			Err(e) => {
				warn!("Cannot create {}: {}", target.display(), e);
				None
			}
		};

		loop {
			match channel.next_frame().await? {
				FileFrame::Chunk(bytes) => {
					let Some(active) = writer.as_mut() else {
						continue;
					};
					if let Err(e) = active.write(&bytes).await {
						warn!("Write to {} failed: {}", target.display(), e);
						writer = None;
					}
				}
				FileFrame::End(trailer) => {
					let written = match writer {
						Some(writer) => writer.finish().await.ok(),
						None => None,
					};
					return Ok(verify(&entry.source, written, &trailer));
				}
			}
		}
	}

	/// Source side of `copy-send-file`
	pub async fn serve_file(
		&self,
		request: SendFileRequest,
		sink: &mut dyn FrameSink,
	) -> Result<(), TransportError> {
		if !self.sessions.allows(&request.session, &request.path) {
			let error = if self.sessions.is_live(&request.session) {
				format!("{} is not part of this transfer session", request.path)
			} else {
				CopyError::UnknownSession { token: request.session.clone() }.to_string()
			};
			warn!("Refused {}: {}", request.path, error);
			let trailer = FileTrailer { hash: String::new(), size: 0, error: Some(error) };
			return sink.end(trailer).await;
		}
		let trailer =
			stream::send_file(Path::new(&request.path), request.compression, self.buffer_size, sink)
				.await?;
		debug!("Sent {} ({} bytes, {})", request.path, trailer.size, trailer.hash);
		Ok(())
	}

	/// A status addressed to a role on this device
	///
	/// The source of a cut removes the locations recorded for the session
	/// once, and only when the final count of failures is zero.
	pub async fn receive_status(&self, status: FileSystemStatus) {
		if status.target == CopyRole::AgentSource && status.complete {
			if let Some(session) = status.session.as_deref().and_then(|t| self.sessions.close(t)) {
				if session.cut && status.failures == 0 {
					remove_locations(&session.locations).await;
				} else if session.cut {
					info!("Cut kept its source after {} failures", status.failures);
				}
			}
		}
		self.sender.transport().browsers(&Envelope::FileSystemStatus(status));
	}

	/// Report a permission denial to the requester
	pub async fn deny(&self, agents: &CopyAgents, error: PermissionError) {
		let mut status = self.status(agents, CopyRole::AgentRequest, format!("Access denied: {}", error));
		status.denied = Some(Denial::from(error));
		status.complete = true;
		self.send_status(CopyRole::AgentRequest, status).await;
	}

	async fn abort(&self, agents: &CopyAgents, error: &CopyError) {
		warn!("Copy aborted: {}", error);
		let mut status = self.status(agents, CopyRole::AgentRequest, error.to_string());
		status.complete = true;
		self.send_status(CopyRole::AgentRequest, status).await;
	}

	async fn send_final(&self, agents: &CopyAgents, copy: &CopyStatus, session: Option<String>) {
		let final_status = |target| {
			let mut status = self.status(agents, target, copy.message());
			status.session = session.clone();
			status.cut = copy.cut;
			status.failures = copy.failures;
			status.complete = true;
			status
		};
		if !same_agent(&agents.agent_request, &agents.agent_source) {
			self.send_status(CopyRole::AgentRequest, final_status(CopyRole::AgentRequest)).await;
		}
		self.send_status(CopyRole::AgentSource, final_status(CopyRole::AgentSource)).await;
	}

	fn status(&self, agents: &CopyAgents, target: CopyRole, message: String) -> FileSystemStatus {
		FileSystemStatus {
			agents: agents.clone(),
			target,
			message,
			denied: None,
			session: None,
			cut: false,
			failures: 0,
			complete: false,
		}
	}

	async fn send_status(&self, target: CopyRole, status: FileSystemStatus) {
		match self.sender.route(target, Envelope::FileSystemStatus(status)).await {
			Ok(Routed::Local(Envelope::FileSystemStatus(status))) => self.receive_status(status).await,
			Ok(_) => {}
			Err(e) => warn!("Status for {} not delivered: {}", target, e),
		}
	}
}

fn same_agent(a: &FileAgent, b: &FileAgent) -> bool {
	a.user == b.user && a.device == b.device
}

/// Compare the destination digest with the source trailer
fn verify(source: &str, written: Option<(String, u64)>, trailer: &FileTrailer) -> Option<u64> {
	if let Some(error) = &trailer.error {
		warn!("Source could not send {}: {}", source, error);
		return None;
	}
	match written {
		Some((hash, size)) if hash == trailer.hash => Some(size),
		Some((hash, _)) => {
			warn!("Integrity failure for {}: expected {}, wrote {}", source, trailer.hash, hash);
			None
		}
		None => None,
	}
}

/// A source location the write destination lies inside
async fn enclosing_location(locations: &[String], destination: &Path) -> Option<String> {
	let destination = fs::canonicalize(destination).await.unwrap_or_else(|_| destination.to_path_buf());
	for location in locations {
		let path = fs::canonicalize(location).await.unwrap_or_else(|_| PathBuf::from(location));
		if destination.starts_with(&path) {
			return Some(location.clone());
		}
	}
	None
}

/// Recreate a symbolic link entry at `target`
async fn make_link(entry: &ManifestEntry, target: &Path) -> io::Result<()> {
	let link = entry
		.link
		.as_deref()
		.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "link entry without a target"))?;
	#[cfg(unix)]
	{
		fs::symlink(link, target).await
	}
	#[cfg(not(unix))]
	{
		let _ = (link, target);
		Err(io::Error::new(io::ErrorKind::Unsupported, "symbolic links need a unix host"))
	}
}

/// Create one directory; an existing directory is success
pub async fn ensure_dir(path: &Path) -> io::Result<()> {
	match fs::create_dir(path).await {
		Ok(()) => Ok(()),
		Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
		Err(e) => Err(e),
	}
}

async fn remove_locations(locations: &[String]) {
	for location in locations {
		let path = Path::new(location);
		let result = match fs::symlink_metadata(path).await {
			Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).await,
			Ok(_) => fs::remove_file(path).await,
			Err(e) => Err(e),
		};
		match result {
			Ok(()) => debug!("Removed {}", location),
			Err(e) => warn!("Cannot remove {}: {}", location, e),
		}
	}
}


// vim: ts=4
