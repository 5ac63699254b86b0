//! Logging prelude module for convenient access to tracing macros.
//!
//! ```ignore
//! use crate::logging::*;
//!
//! info!("Heartbeat sent");
//! warn!("Device went offline");
//! ```

pub use tracing::{debug, error, info, warn};

use crate::config::LogFormat;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level:
///
/// ```bash
/// RUST_LOG=debug sharenet serve
/// RUST_LOG=sharenet::copy=trace,sharenet::transport=debug sharenet serve
/// ```
pub fn init_tracing(level: &str, format: LogFormat) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
	let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);

	// try_init: tests and embedders may have installed a subscriber already
	let _ = match format {
		LogFormat::Json => builder.json().try_init(),
		LogFormat::Compact => builder.compact().try_init(),
		LogFormat::Pretty => builder.try_init(),
	};
}

// vim: ts=4
