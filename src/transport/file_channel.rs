//! File transfer channel over a dedicated socket
//!
//! The destination sends one `copy-send-file` text frame per file; the source
//! answers with binary frames carrying the bytes and one text frame holding
//! the JSON trailer.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::{FileChannel, FileFrame, FrameSink};
use crate::error::TransportError;
use crate::protocol::{Envelope, FileTrailer, SendFileRequest};

pub struct WsFileChannel<S> {
	ws: WebSocketStream<S>,
}

impl<S> WsFileChannel<S> {
	pub fn new(ws: WebSocketStream<S>) -> Self {
		WsFileChannel { ws }
	}
}

#[async_trait]
impl<S> FileChannel for WsFileChannel<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send,
{
	async fn request(&mut self, request: &SendFileRequest) -> Result<(), TransportError> {
		let json = Envelope::CopySendFile(request.clone()).to_json()?;
		self.ws.send(Message::Text(json.into())).await?;
		Ok(())
	}

	async fn next_frame(&mut self) -> Result<FileFrame, TransportError> {
		loop {
			match self.ws.next().await {
				Some(Ok(Message::Binary(bytes))) => return Ok(FileFrame::Chunk(bytes.to_vec())),
				Some(Ok(Message::Text(text))) => {
					let trailer: FileTrailer = serde_json::from_str(text.as_str())?;
					return Ok(FileFrame::End(trailer));
				}
				Some(Ok(Message::Close(_))) | None => return Err(TransportError::ConnectionReset),
				Some(Ok(_)) => continue,
				Some(Err(e)) => return Err(e.into()),
			}
		}
	}

	async fn close(&mut self) -> Result<(), TransportError> {
		self.ws.close(None).await?;
		Ok(())
	}
}

/// Source side writer for one file
pub struct WsFrameSink<'a, S> {
	ws: &'a mut WebSocketStream<S>,
}

impl<'a, S> WsFrameSink<'a, S> {
	pub fn new(ws: &'a mut WebSocketStream<S>) -> Self {
		WsFrameSink { ws }
	}
}

#[async_trait]
impl<S> FrameSink for WsFrameSink<'_, S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send,
{
	async fn chunk(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
		self.ws.send(Message::Binary(bytes.into())).await?;
		Ok(())
	}

	async fn end(&mut self, trailer: FileTrailer) -> Result<(), TransportError> {
		let json = serde_json::to_string(&trailer)?;
		self.ws.send(Message::Text(json.into())).await?;
		Ok(())
	}
}

// vim: ts=4
