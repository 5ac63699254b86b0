//! Agent directory persistence

use crate::agents::Registry;
use crate::error::StoreError;
use std::path::{Path, PathBuf};

const FILE_NAME: &str = "agents.json";

/// Saves and restores the device and user registries
pub struct AgentStore {
	dir: PathBuf,
}

impl AgentStore {
	pub fn new(dir: PathBuf) -> Self {
		AgentStore { dir }
	}

	/// Load the saved registry; a missing file is an empty registry
	pub async fn load(&self) -> Result<Registry, StoreError> {
		let path = self.path();
		if !path.exists() {
			return Ok(Registry::default());
		}

		let contents = tokio::fs::read_to_string(&path)
			.await
			.map_err(|e| StoreError::LoadFailed { source: Box::new(e) })?;

		serde_json::from_str(&contents).map_err(|e| StoreError::Corrupted {
			message: format!("Failed to parse {}: {}", path.display(), e),
		})
	}

	/// Write the registry through a temporary file and rename
	pub async fn save(&self, registry: &Registry) -> Result<(), StoreError> {
		let path = self.path();
		let parent = path.parent().unwrap_or(Path::new("."));
		if !parent.exists() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|e| StoreError::SaveFailed { source: Box::new(e) })?;
		}

		let json = serde_json::to_string_pretty(registry)
			.map_err(|e| StoreError::SaveFailed { source: Box::new(e) })?;

		let temp = path.with_extension("json.tmp");
		tokio::fs::write(&temp, json)
			.await
			.map_err(|e| StoreError::SaveFailed { source: Box::new(e) })?;
		tokio::fs::rename(&temp, &path)
			.await
			.map_err(|e| StoreError::SaveFailed { source: Box::new(e) })
	}

	pub fn path(&self) -> PathBuf {
		self.dir.join(FILE_NAME)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::agents::tests::device;
	use tempfile::TempDir;

	#[tokio::test]
	async fn test_missing_file_is_empty() {
		let dir = TempDir::new().unwrap();
		let store = AgentStore::new(dir.path().to_path_buf());
		assert_eq!(store.load().await.unwrap(), Registry::default());
	}

	#[tokio::test]
	async fn test_save_then_load() {
		let dir = TempDir::new().unwrap();
		let store = AgentStore::new(dir.path().join("nested"));
		let mut registry = Registry::default();
		registry.device.insert("d2".into(), device("d2", &[("/srv", true)]));
		registry.user.insert("u2".into(), device("u2", &[]));
		store.save(&registry).await.unwrap();
		assert_eq!(store.load().await.unwrap(), registry);
	}

	#[tokio::test]
	async fn test_corrupted_file() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join(FILE_NAME), "{ not json").unwrap();
		let store = AgentStore::new(dir.path().to_path_buf());
		assert!(matches!(store.load().await, Err(StoreError::Corrupted { .. })));
	}
}

// vim: ts=4
