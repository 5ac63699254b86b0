use clap::{value_parser, Arg, ArgMatches, Command};
use std::error::Error;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use sharenet::config::Config;
use sharenet::logging::*;
use sharenet::node::Node;
use sharenet::transport::{Inbound, Network};

///////////////////////
// Utility functions //
///////////////////////

/// Interface addresses, IPv6 first, loopback and link-local left out
fn detect_addresses() -> Vec<IpAddr> {
	let networks = sysinfo::Networks::new_with_refreshed_list();
	let mut addresses: Vec<IpAddr> = networks
		.iter()
		.flat_map(|(_, data)| data.ip_networks().iter().map(|net| net.addr))
		.filter(|ip| !ip.is_loopback() && !ip.is_unspecified())
		.filter(|ip| match ip {
			IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) != 0xfe80,
			IpAddr::V4(v4) => !v4.is_link_local(),
		})
		.collect();
	addresses.sort_by_key(|ip| ip.is_ipv4());
	addresses.dedup();
	addresses
}

fn load_config(matches: &ArgMatches) -> Result<Config, Box<dyn Error>> {
	let explicit = matches.get_one::<PathBuf>("config");
	let mut config = Config::load(explicit.map(|p| p.as_path()))?;
	let generated = explicit.is_none()
		&& !config.storage_dir.join("config.toml").exists()
		&& !config.storage_dir.join("config.json").exists();

	if let Some(port) = matches.get_one::<u16>("http-port") {
		config.http_port = *port;
	}
	if let Some(port) = matches.get_one::<u16>("ws-port") {
		config.ws_port = *port;
	}
	if let Some(name) = matches.get_one::<String>("name-device") {
		config.name_device = name.clone();
	}
	if let Some(name) = matches.get_one::<String>("name-user") {
		config.name_user = name.clone();
	}
	if config.addresses.is_empty() {
		config.addresses = detect_addresses();
	}

	// keep generated hashes stable across restarts
	if generated {
		config.save(&config.storage_dir.join("config.json"))?;
	}
	Ok(config)
}

async fn serve(config: Config) -> Result<(), Box<dyn Error>> {
	let network = Network::new(config.identity(), config.http_timeout())?;
	let node = Node::start(&config, network.clone()).await?;
	let inbound: Arc<dyn Inbound> = node.clone();
	network.attach(Arc::downgrade(&inbound));

	let (http, ws) = network.serve(config.bind_address, config.http_port, config.ws_port).await?;
	info!(
		"Agent {} ({}) up, http {} socket {}",
		config.name_device, config.hash_device, http, ws
	);

	// announce the current addresses before the first interval elapses
	node.heartbeat().beat(true).await;
	let beats = Arc::clone(node.heartbeat()).spawn();

	tokio::select! {
		_ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
		result = beats => {
			if let Err(e) = result {
				error!("Heartbeat task stopped: {}", e);
			}
		}
	}
	Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
	let common = [
		Arg::new("config")
			.short('c')
			.long("config")
			.value_name("FILE")
			.value_parser(value_parser!(PathBuf))
			.help("Config file (TOML or JSON)"),
		Arg::new("http-port")
			.long("http-port")
			.value_name("PORT")
			.value_parser(value_parser!(u16))
			.help("HTTP service port"),
		Arg::new("ws-port")
			.long("ws-port")
			.value_name("PORT")
			.value_parser(value_parser!(u16))
			.help("Socket service port"),
		Arg::new("name-device").long("name-device").value_name("NAME").help("Device name"),
		Arg::new("name-user").long("name-user").value_name("NAME").help("User name"),
	];

	let matches = Command::new("sharenet")
		.version(env!("CARGO_PKG_VERSION"))
		.about("Peer-to-peer file sharing agent")
		.subcommand_required(true)
		.subcommand(Command::new("serve").about("Run the agent").args(common.clone()))
		.subcommand(
			Command::new("identity").about("Print the resolved identity and addresses").args(common),
		)
		.get_matches();

	if let Some(sub_matches) = matches.subcommand_matches("serve") {
		let config = load_config(sub_matches)?;
		init_tracing(&config.log_level, config.log_format);
		serve(config).await?;
	} else if let Some(sub_matches) = matches.subcommand_matches("identity") {
		let config = load_config(sub_matches)?;
		println!("device  {} ({})", config.name_device, config.hash_device);
		println!("user    {} ({})", config.name_user, config.hash_user);
		for ip in &config.addresses {
			println!("address {}", ip);
		}
		println!("ports   http {} socket {}", config.http_port, config.ws_port);
	}

	Ok(())
}

// vim: ts=4
