//! Unified configuration for sharenet
//!
//! The configuration follows a priority chain:
//! 1. Built-in defaults (Config::default())
//! 2. Config file (~/.sharenet/config.toml or config.json, or --config)
//! 3. Environment variables (SHARENET_* prefix)
//! 4. CLI flags (highest priority, applied by the binary)

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv6Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agents::Identity;
use crate::error::ConfigError;

// ============================================================================
// MAIN CONFIGURATION STRUCT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
	// ========================================================================
	// IDENTITY
	// ========================================================================
	/// Display name of this device
	pub name_device: String,

	/// Display name of the owning user
	pub name_user: String,

	/// Stable device hash (generated on first start when empty)
	pub hash_device: String,

	/// Stable user hash (generated on first start when empty)
	pub hash_user: String,

	// ========================================================================
	// STORAGE
	// ========================================================================
	/// Directory for config and the agent store (~/.sharenet)
	pub storage_dir: PathBuf,

	// ========================================================================
	// NETWORK
	// ========================================================================
	/// Address the HTTP and socket listeners bind to
	pub bind_address: IpAddr,

	/// Advertised addresses (detected from interfaces when empty)
	pub addresses: Vec<IpAddr>,

	/// HTTP service port
	pub http_port: u16,

	/// Persistent socket port
	pub ws_port: u16,

	/// One-shot HTTP request timeout in milliseconds
	pub http_timeout_ms: u64,

	// ========================================================================
	// HEARTBEAT
	// ========================================================================
	/// Seconds between heartbeat broadcasts
	pub heartbeat_interval_secs: u64,

	// ========================================================================
	// FILE TRANSFER
	// ========================================================================
	/// Deflate level for file transfers (0 = no compression, 1-9)
	pub compress_level: u32,

	/// Read buffer size for file streaming
	pub buffer_size: usize,

	// ========================================================================
	// DEVICE MASKING
	// ========================================================================
	/// Seconds an issued device mask token stays valid
	pub mask_ttl_secs: u64,

	/// Seconds an unfinished invitation stays answerable
	pub invite_ttl_secs: u64,

	// ========================================================================
	// MESSAGES
	// ========================================================================
	/// Number of text messages kept in memory
	pub message_history: usize,

	// ========================================================================
	// SHARES
	// ========================================================================
	/// Directories this device exposes
	pub shares: Vec<ShareConfig>,

	// ========================================================================
	// OUTPUT & LOGGING
	// ========================================================================
	/// Log level (trace, debug, info, warn, error)
	pub log_level: String,

	/// Log format (JSON, Pretty, Compact)
	pub log_format: LogFormat,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			// Identity
			name_device: sysinfo::System::host_name().unwrap_or_else(|| "device".to_string()),
			name_user: std::env::var("USER").unwrap_or_else(|_| "user".to_string()),
			hash_device: String::new(),
			hash_user: String::new(),

			// Storage
			storage_dir: std::env::var("HOME")
				.ok()
				.map(|h| PathBuf::from(h).join(".sharenet"))
				.unwrap_or_else(|| PathBuf::from(".sharenet")),

			// Network
			bind_address: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
			addresses: vec![],
			http_port: 8314,
			ws_port: 8315,
			http_timeout_ms: 1000,

			// Heartbeat
			heartbeat_interval_secs: 60,

			// File transfer
			compress_level: 0,
			buffer_size: 65536,

			// Masking
			mask_ttl_secs: 3600,
			invite_ttl_secs: 900,

			// Messages
			message_history: 500,

			// Shares
			shares: vec![],

			// Output
			log_level: "info".to_string(),
			log_format: LogFormat::Pretty,
		}
	}
}

impl Config {
	/// Resolve defaults, config file and environment into one config
	///
	/// An explicit path must exist; the default locations are optional.
	pub fn load(explicit: Option<&Path>) -> Result<Config, ConfigError> {
		let defaults = Config::default();
		let mut config = match explicit {
			Some(path) => Config::from_file(path)?,
			None => {
				let toml_path = defaults.storage_dir.join("config.toml");
				let json_path = defaults.storage_dir.join("config.json");
				if toml_path.exists() {
					Config::from_file(&toml_path)?
				} else if json_path.exists() {
					Config::from_file(&json_path)?
				} else {
					defaults
				}
			}
		};
		config.apply_env(|name| std::env::var(name).ok())?;
		config.resolve_identity();
		Ok(config)
	}

	/// Parse a config file, TOML or JSON by extension
	pub fn from_file(path: &Path) -> Result<Config, ConfigError> {
		let display = path.display().to_string();
		let contents = std::fs::read_to_string(path)
			.map_err(|e| ConfigError::Read { path: display.clone(), source: e })?;

		let is_toml = path.extension().map(|ext| ext == "toml").unwrap_or(false);
		if is_toml {
			toml::from_str(&contents)
				.map_err(|e| ConfigError::Parse { path: display, message: e.to_string() })
		} else {
			json5::from_str(&contents)
				.map_err(|e| ConfigError::Parse { path: display, message: e.to_string() })
		}
	}

	/// Apply SHARENET_* overrides from the given lookup
	pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		fn parsed<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
			value.parse().map_err(|_| ConfigError::InvalidEnv { name: name.to_string(), value })
		}

		if let Some(v) = lookup("SHARENET_NAME_DEVICE") {
			self.name_device = v;
		}
		if let Some(v) = lookup("SHARENET_NAME_USER") {
			self.name_user = v;
		}
		if let Some(v) = lookup("SHARENET_STORAGE") {
			self.storage_dir = PathBuf::from(v);
		}
		if let Some(v) = lookup("SHARENET_HTTP_PORT") {
			self.http_port = parsed("SHARENET_HTTP_PORT", v)?;
		}
		if let Some(v) = lookup("SHARENET_WS_PORT") {
			self.ws_port = parsed("SHARENET_WS_PORT", v)?;
		}
		if let Some(v) = lookup("SHARENET_COMPRESS") {
			self.compress_level = parsed("SHARENET_COMPRESS", v)?;
		}
		if let Some(v) = lookup("SHARENET_LOG") {
			self.log_level = v;
		}
		Ok(())
	}

	/// Generate missing identity hashes
	pub fn resolve_identity(&mut self) {
		if self.hash_user.is_empty() {
			self.hash_user = generate_hash(&self.name_user);
		}
		if self.hash_device.is_empty() {
			self.hash_device = generate_hash(&self.name_device);
		}
		self.compress_level = self.compress_level.min(9);
	}

	/// Identity as advertised to other agents
	pub fn identity(&self) -> Identity {
		Identity {
			hash_user: self.hash_user.clone(),
			hash_device: self.hash_device.clone(),
			name_user: self.name_user.clone(),
			name_device: self.name_device.clone(),
		}
	}

	/// Write as JSON, so generated hashes survive a restart
	pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
		let display = path.display().to_string();
		let json = serde_json::to_string_pretty(self)
			.map_err(|e| ConfigError::Parse { path: display.clone(), message: e.to_string() })?;
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)
				.map_err(|e| ConfigError::Write { path: display.clone(), source: e })?;
		}
		std::fs::write(path, json).map_err(|e| ConfigError::Write { path: display, source: e })
	}

	pub fn http_timeout(&self) -> Duration {
		Duration::from_millis(self.http_timeout_ms)
	}

	pub fn heartbeat_interval(&self) -> Duration {
		Duration::from_secs(self.heartbeat_interval_secs.max(1))
	}

	pub fn mask_ttl(&self) -> Duration {
		Duration::from_secs(self.mask_ttl_secs)
	}

	pub fn invite_ttl(&self) -> Duration {
		Duration::from_secs(self.invite_ttl_secs)
	}
}

fn generate_hash(name: &str) -> String {
	let seed = format!("{}{}", name, uuid::Uuid::new_v4());
	blake3::hash(seed.as_bytes()).to_hex().to_string()
}

// ============================================================================
// NESTED CONFIGURATION STRUCTS
// ============================================================================

/// One exposed directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ShareConfig {
	/// Absolute path of the shared directory
	pub name: String,

	/// Reject mutating actions under this share
	pub read_only: bool,
}

impl Default for ShareConfig {
	fn default() -> Self {
		ShareConfig { name: String::new(), read_only: false }
	}
}

// ============================================================================
// ENUMERATIONS
// ============================================================================

/// Log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
	Json,
	#[default]
	Pretty,
	Compact,
}


// vim: ts=4
