//! Two nodes on real loopback listeners: HTTP, primary sockets and a
//! transfer channel

mod support;

use futures::StreamExt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use sharenet::agents::{AgentStatus, AgentType, Registry};
use sharenet::config::Config;
use sharenet::node::Node;
use sharenet::protocol::{CopyAgents, CopyRequest, DeviceRef, Envelope, FileAgent, MessageItem};
use sharenet::transport::{Inbound, Network, Origin, SocketKey, SocketKind, Transport};
use support::{agent_record, config, wait_for, LOCALHOST};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Peer {
	node: Arc<Node>,
	network: Arc<Network>,
	config: Config,
}

fn free_port() -> u16 {
	std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

fn peer_config(device: &str, storage: &Path, shares: &[(&str, bool)]) -> Config {
	let mut config = config("u1", device, 0, storage, shares);
	config.bind_address = LOCALHOST;
	config.http_port = free_port();
	config.ws_port = free_port();
	config.compress_level = 6;
	config
}

async fn start(config: Config, registry: Registry) -> Peer {
	let network = Network::new(config.identity(), config.http_timeout()).unwrap();
	let node = Node::with_registry(&config, registry, network.clone());
	let inbound: Arc<dyn Inbound> = node.clone();
	network.attach(Arc::downgrade(&inbound));
	network.serve(config.bind_address, config.http_port, config.ws_port).await.unwrap();
	Peer { node, network, config }
}

/// Two devices of one user, each knowing the other
async fn pair(scratch: &Path, shares: [&str; 2]) -> (Peer, Peer) {
	let c1 = peer_config("d1", &scratch.join("s1"), &[(shares[0], false)]);
	let c2 = peer_config("d2", &scratch.join("s2"), &[(shares[1], false)]);
	let mut r1 = Registry::default();
	r1.device.insert("d2".into(), agent_record(&c2, "d2"));
	let mut r2 = Registry::default();
	let mut d1 = agent_record(&c1, "d1");
	d1.status = AgentStatus::Offline;
	r2.device.insert("d1".into(), d1);
	(start(c1, r1).await, start(c2, r2).await)
}

/// Connect to a socket service announcing `purpose`
async fn dial(port: u16, purpose: &'static str) -> Socket {
	let mut request = format!("ws://127.0.0.1:{}/", port).into_client_request().unwrap();
	request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(purpose));
	let (ws, _) = tokio_tungstenite::connect_async(request).await.unwrap();
	ws
}

/// Attach a UI socket and wait until the service lists it
async fn browser(peer: &Peer) -> Socket {
	let ws = dial(peer.config.ws_port, "browser-test").await;
	let key = SocketKey::new(SocketKind::Browser, "test");
	assert!(wait_for(|| peer.network.is_open(&key)).await);
	ws
}

async fn next_envelope(ws: &mut Socket, keep: impl Fn(&Envelope) -> bool) -> Envelope {
	let read = async {
		loop {
			match ws.next().await {
				Some(Ok(Message::Text(text))) => {
					let envelope = Envelope::from_json(text.as_str()).unwrap();
					if keep(&envelope) {
						return envelope;
					}
				}
				Some(Ok(_)) => continue,
				other => panic!("browser socket ended: {:?}", other),
			}
		}
	};
	tokio::time::timeout(Duration::from_secs(5), read).await.expect("no matching envelope")
}

fn item(text: &str) -> MessageItem {
	MessageItem {
		agent_from: "d1".into(),
		agent_to: "d2".into(),
		agent_type: AgentType::Device,
		date: 1,
		message: text.into(),
		offline: false,
	}
}

fn file_agent(device: &str, dir: &Path) -> FileAgent {
	FileAgent {
		user: "u1".into(),
		device: DeviceRef::Device(device.into()),
		share: String::new(),
		modal_address: dir.to_string_lossy().into_owned(),
	}
}

#[tokio::test]
async fn test_heartbeat_over_http() {
	let scratch = TempDir::new().unwrap();
	let (one, two) = pair(scratch.path(), ["/srv/one", "/srv/two"]).await;
	let mut ui = browser(&two).await;

	let deliveries = one.node.heartbeat().beat(false).await;
	assert_eq!(deliveries.len(), 1);
	assert!(deliveries[0].1.is_ok());

	let Envelope::Heartbeat(beat) =
		next_envelope(&mut ui, |e| matches!(e, Envelope::Heartbeat(_))).await
	else {
		unreachable!()
	};
	assert_eq!(beat.agent_from, "d1");
	assert_eq!(beat.ports.ws, one.config.ws_port);
	let d1 = two.node.directory().agent(AgentType::Device, "d1").unwrap();
	assert_eq!(d1.status, AgentStatus::Online);
}

#[tokio::test]
async fn test_socket_messages_keep_order() {
	let scratch = TempDir::new().unwrap();
	let (one, two) = pair(scratch.path(), ["/srv/one", "/srv/two"]).await;
	let mut ui = browser(&two).await;

	let record = one.node.directory().agent(AgentType::Device, "d2").unwrap();
	one.network.open(AgentType::Device, &record).await.unwrap();
	assert!(one.network.is_open(&SocketKey::agent(AgentType::Device, "d2")));

	for text in ["first", "second"] {
		let deliveries = one.node.messages().send(vec![item(text)]).await;
		assert!(matches!(deliveries[0].1, Ok(None)), "not queued on the socket");
	}

	let mut seen = vec![];
	for _ in 0..2 {
		if let Envelope::Message(items) =
			next_envelope(&mut ui, |e| matches!(e, Envelope::Message(_))).await
		{
			seen.push(items[0].message.clone());
		}
	}
	assert_eq!(seen, ["first", "second"]);
	let history: Vec<String> = two.node.messages().history().into_iter().map(|i| i.message).collect();
	assert_eq!(history, ["first", "second"]);
}

#[tokio::test]
async fn test_closed_socket_marks_offline() {
	let scratch = TempDir::new().unwrap();
	let (one, _two) = pair(scratch.path(), ["/srv/one", "/srv/two"]).await;

	let mut socket = dial(one.config.ws_port, "device-d2").await;
	let key = SocketKey::agent(AgentType::Device, "d2");
	assert!(wait_for(|| one.network.is_open(&key)).await);
	socket.close(None).await.unwrap();

	let directory = one.node.directory();
	let offline = || directory.agent(AgentType::Device, "d2").unwrap().status == AgentStatus::Offline;
	assert!(wait_for(offline).await);
	assert!(!one.network.is_open(&key));
}

#[tokio::test]
async fn test_cut_over_transfer_channel() {
	let scratch = TempDir::new().unwrap();
	let source = scratch.path().join("a");
	let dest = scratch.path().join("b");
	fs::create_dir_all(source.join("tree/sub")).unwrap();
	fs::create_dir_all(&dest).unwrap();
	let body: Vec<u8> = (0..200_000u32).map(|i| (i % 253) as u8).collect();
	fs::write(source.join("tree/big.bin"), &body).unwrap();
	fs::write(source.join("tree/sub/small.txt"), b"small").unwrap();

	let shares = [source.to_str().unwrap(), dest.to_str().unwrap()];
	let (one, _two) = pair(scratch.path(), shares).await;

	let request = Envelope::Copy(CopyRequest {
		agents: CopyAgents {
			agent_request: file_agent("d1", &source),
			agent_source: file_agent("d1", &source),
			agent_write: file_agent("d2", &dest),
		},
		location: vec![source.join("tree").to_string_lossy().into_owned()],
		cut: true,
	});
	one.node.receive(request, Origin::Local).await;

	let tree = source.join("tree");
	assert!(wait_for(|| !tree.exists()).await, "source kept after the transfer");
	assert_eq!(fs::read(dest.join("tree/big.bin")).unwrap(), body);
	assert_eq!(fs::read(dest.join("tree/sub/small.txt")).unwrap(), b"small");
}

// vim: ts=4
