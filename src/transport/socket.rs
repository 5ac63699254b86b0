//! Persistent socket transport
//!
//! A connecting agent names itself in the subprotocol header as
//! `<purpose>-<hash>`: `browser-`, `device-` or `user-` for a primary
//! channel, `send-file-<session>` for a file transfer channel.

use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::file_channel::WsFrameSink;
use super::{ClientList, Inbound, Network, Origin, SocketKey, SocketKind};
use crate::error::TransportError;
use crate::logging::*;
use crate::protocol::Envelope;

pub const SEND_FILE_PREFIX: &str = "send-file-";

/// What a connection announced itself as
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Purpose {
	Primary(SocketKey),
	SendFile(String),
}

pub fn parse_purpose(protocol: &str) -> Option<Purpose> {
	if let Some(session) = protocol.strip_prefix(SEND_FILE_PREFIX) {
		return (!session.is_empty()).then(|| Purpose::SendFile(session.to_string()));
	}
	let (kind, hash) = protocol.split_once('-')?;
	if hash.is_empty() {
		return None;
	}
	let kind = match kind {
		"browser" => SocketKind::Browser,
		"device" => SocketKind::Device,
		"user" => SocketKind::User,
		_ => return None,
	};
	Some(Purpose::Primary(SocketKey::new(kind, hash)))
}

pub(crate) type ClientSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Dial a socket service announcing `purpose`
pub(crate) async fn connect(addr: SocketAddr, purpose: &str) -> Result<ClientSocket, TransportError> {
	let mut request = format!("ws://{}/", addr).into_client_request()?;
	let value = HeaderValue::from_str(purpose)
		.map_err(|e| TransportError::Protocol { message: e.to_string() })?;
	request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
	let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
	Ok(ws)
}

pub(crate) async fn accept_loop(network: Arc<Network>, listener: TcpListener) {
	loop {
		let (stream, peer) = match listener.accept().await {
			Ok(accepted) => accepted,
			Err(e) => {
				warn!("Socket accept failed: {}", e);
				continue;
			}
		};
		let network = Arc::clone(&network);
		tokio::spawn(async move {
			if let Err(e) = handle_connection(network, stream).await {
				debug!("Socket connection from {} failed: {}", peer, e);
			}
		});
	}
}

async fn handle_connection(network: Arc<Network>, stream: TcpStream) -> Result<(), TransportError> {
	let mut announced: Option<String> = None;
	let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
		if let Some(value) = request.headers().get(SEC_WEBSOCKET_PROTOCOL) {
			announced = value.to_str().ok().map(str::to_string);
			response.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value.clone());
		}
		Ok(response)
	};
	let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;

	let purpose = announced.as_deref().and_then(parse_purpose).ok_or_else(|| {
		TransportError::Protocol { message: format!("unrecognized subprotocol {:?}", announced) }
	})?;
	match purpose {
		Purpose::Primary(key) => {
			debug!("Socket opened by {}", key);
			let inbound = network.inbound.get().cloned();
			spawn_primary(Arc::clone(&network.clients), inbound, key, ws);
			Ok(())
		}
		Purpose::SendFile(session) => {
			let inbound = network.inbound().ok_or_else(|| TransportError::Protocol {
				message: "no dispatcher attached".to_string(),
			})?;
			serve_transfer(inbound, session, ws).await
		}
	}
}

/// Register a primary socket and run its writer and reader tasks
pub(crate) fn spawn_primary<S>(
	clients: Arc<ClientList>,
	inbound: Option<Weak<dyn Inbound>>,
	key: SocketKey,
	ws: WebSocketStream<S>,
) where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	let (mut sink, mut stream) = ws.split();
	let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
	let id = clients.insert(key.clone(), tx.clone());

	tokio::spawn(async move {
		while let Some(message) = rx.recv().await {
			if sink.send(message).await.is_err() {
				break;
			}
		}
		let _ = sink.close().await;
	});

	tokio::spawn(async move {
		while let Some(frame) = stream.next().await {
			let text = match frame {
				Ok(Message::Text(text)) => text,
				Ok(Message::Close(_)) => break,
				Ok(_) => continue,
				Err(e) => {
					debug!("Socket {} errored: {}", key, e);
					break;
				}
			};
			let envelope = match Envelope::from_json(text.as_str()) {
				Ok(envelope) => envelope,
				Err(e) => {
					warn!("Socket {} sent an invalid envelope: {}", key, e);
					continue;
				}
			};
			let Some(dispatch) = inbound.as_ref().and_then(Weak::upgrade) else {
				break;
			};
			if let Some(reply) = dispatch.receive(envelope, Origin::Socket(key.clone())).await {
				if let Ok(json) = reply.to_json() {
					let _ = tx.send(Message::Text(json.into()));
				}
			}
		}

		if clients.remove(&key, id) {
			debug!("Socket {} closed", key);
			if let Some(dispatch) = inbound.as_ref().and_then(Weak::upgrade) {
				dispatch.socket_closed(&key);
			}
		}
	});
}

/// Answer `copy-send-file` requests until the destination closes the channel
async fn serve_transfer<S>(
	inbound: Arc<dyn Inbound>,
	session: String,
	mut ws: WebSocketStream<S>,
) -> Result<(), TransportError>
where
	S: AsyncRead + AsyncWrite + Unpin + Send,
{
	debug!("Transfer channel opened for session {}", session);
	while let Some(frame) = ws.next().await {
		let text = match frame? {
			Message::Text(text) => text,
			Message::Close(_) => break,
			_ => continue,
		};
		match Envelope::from_json(text.as_str())? {
			Envelope::CopySendFile(request) if request.session == session => {
				let mut sink = WsFrameSink::new(&mut ws);
				inbound.serve_file(request, &mut sink).await?;
			}
			other => {
				return Err(TransportError::Protocol {
					message: format!("unexpected {} on transfer channel", other.service()),
				});
			}
		}
	}
	debug!("Transfer channel closed for session {}", session);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_primary_purpose() {
		assert_eq!(
			parse_purpose("device-abc123"),
			Some(Purpose::Primary(SocketKey::new(SocketKind::Device, "abc123")))
		);
		assert_eq!(
			parse_purpose("browser-x"),
			Some(Purpose::Primary(SocketKey::new(SocketKind::Browser, "x")))
		);
	}

	#[test]
	fn test_parse_send_file_purpose() {
		assert_eq!(parse_purpose("send-file-tok"), Some(Purpose::SendFile("tok".into())));
		assert_eq!(parse_purpose("send-file-"), None);
	}

	#[test]
	fn test_parse_rejects_unknown() {
		assert_eq!(parse_purpose("mystery-abc"), None);
		assert_eq!(parse_purpose("device-"), None);
		assert_eq!(parse_purpose("device"), None);
	}
}

// vim: ts=4
