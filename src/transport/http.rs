//! One-shot HTTP transport: `POST /` with one envelope as the body

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing;
use axum::{Json, Router};
use std::sync::Arc;
use std::time::Duration;

use super::{HttpRequest, Inbound, Origin};
use crate::agents::{AgentType, Identity};
use crate::error::TransportError;
use crate::logging::*;
use crate::protocol::Envelope;

pub const HEADER_AGENT_HASH: &str = "agent-hash";
pub const HEADER_AGENT_NAME: &str = "agent-name";
pub const HEADER_AGENT_TYPE: &str = "agent-type";
pub const HEADER_REMOTE_USER: &str = "remote-user";
pub const HEADER_REQUEST_TYPE: &str = "request-type";
pub const HEADER_INVITE: &str = "invite";

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client, TransportError> {
	reqwest::Client::builder()
		.timeout(timeout)
		.connect_timeout(timeout)
		.build()
		.map_err(TransportError::from)
}

/// POST one envelope; an empty answer body yields `None`
pub(crate) async fn send(
	client: &reqwest::Client,
	identity: &Identity,
	request: &HttpRequest,
) -> Result<Option<Envelope>, TransportError> {
	let (agent_hash, agent_name) = match request.agent_type {
		AgentType::Device => (&identity.hash_device, &identity.name_device),
		AgentType::User => (&identity.hash_user, &identity.name_user),
	};
	let body = request.envelope.to_json()?;
	let url = format!("http://{}/", request.address());
	debug!("POST {} to {} {}", request.envelope.service(), request.agent_type, request.address());

	let mut builder = client
		.post(url)
		.header(reqwest::header::CONTENT_TYPE, "application/json")
		.header(HEADER_AGENT_HASH, agent_hash.as_str())
		.header(HEADER_AGENT_NAME, agent_name.as_str())
		.header(HEADER_AGENT_TYPE, request.agent_type.to_string())
		.header(HEADER_REMOTE_USER, identity.hash_user.as_str())
		.header(HEADER_REQUEST_TYPE, request.envelope.service());
	if let Some(stage) = request.envelope.invite_stage() {
		builder = builder.header(HEADER_INVITE, stage.to_string());
	}

	let response = builder.body(body).send().await?.error_for_status()?;
	let bytes = response.bytes().await?;
	if bytes.is_empty() {
		return Ok(None);
	}
	Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Router serving `POST /`
pub fn router(inbound: Arc<dyn Inbound>) -> Router {
	Router::new().route("/", routing::post(receive)).with_state(inbound)
}

async fn receive(
	State(inbound): State<Arc<dyn Inbound>>,
	headers: HeaderMap,
	body: Bytes,
) -> Response {
	let envelope: Envelope = match serde_json::from_slice(&body) {
		Ok(envelope) => envelope,
		Err(e) => {
			warn!("Rejected HTTP body: {}", e);
			return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
		}
	};

	let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("");
	let agent_type = match header(HEADER_AGENT_TYPE) {
		"device" => Some(AgentType::Device),
		"user" => Some(AgentType::User),
		_ => None,
	};
	let origin = Origin::Http { agent_hash: header(HEADER_AGENT_HASH).to_string(), agent_type };

	match inbound.receive(envelope, origin).await {
		Some(reply) => Json(reply).into_response(),
		None => StatusCode::OK.into_response(),
	}
}

// vim: ts=4
