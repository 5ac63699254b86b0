//! Hash and compression pipeline for file transfers
//!
//! The source hashes bytes as they are read, before compression. The
//! destination decompresses, then hashes what it writes. Both digests are
//! BLAKE3.

use flate2::write::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::{self, Write};
use std::path::Path;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::TransportError;
use crate::protocol::FileTrailer;
use crate::transport::FrameSink;

/// Stream one file onto a sink and finish with its trailer
///
/// Read failures end the file early with the error in the trailer, so the
/// destination can count it and go on with the next file.
pub async fn send_file(
	path: &Path,
	compression: u32,
	buffer_size: usize,
	sink: &mut dyn FrameSink,
) -> Result<FileTrailer, TransportError> {
	let mut file = match File::open(path).await {
		Ok(file) => file,
		Err(e) => return finish(sink, FileTrailer { hash: String::new(), size: 0, error: Some(e.to_string()) }).await,
	};

	let mut hasher = blake3::Hasher::new();
	let mut encoder = (compression > 0)
		.then(|| GzEncoder::new(Vec::new(), Compression::new(compression.min(9))));
	let mut buffer = vec![0u8; buffer_size.max(1)];
	let mut size = 0u64;

	loop {
		let read = match file.read(&mut buffer).await {
			Ok(0) => break,
			Ok(n) => n,
			Err(e) => {
				let trailer = FileTrailer { hash: String::new(), size, error: Some(e.to_string()) };
				return finish(sink, trailer).await;
			}
		};
		let chunk = &buffer[..read];
		hasher.update(chunk);
		size += read as u64;

		match encoder.as_mut() {
			Some(encoder) => {
				encoder.write_all(chunk)?;
				let compressed = std::mem::take(encoder.get_mut());
				if !compressed.is_empty() {
					sink.chunk(compressed).await?;
				}
			}
			None => sink.chunk(chunk.to_vec()).await?,
		}
	}

	if let Some(encoder) = encoder {
		let tail = encoder.finish()?;
		if !tail.is_empty() {
			sink.chunk(tail).await?;
		}
	}

	let trailer = FileTrailer { hash: hasher.finalize().to_hex().to_string(), size, error: None };
	finish(sink, trailer).await
}

async fn finish(sink: &mut dyn FrameSink, trailer: FileTrailer) -> Result<FileTrailer, TransportError> {
	sink.end(trailer.clone()).await?;
	Ok(trailer)
}

/// Destination writer: decompress, hash and write incoming chunks
pub struct FileWriter {
	file: File,
	hasher: blake3::Hasher,
	decoder: Option<GzDecoder<Vec<u8>>>,
	written: u64,
}

impl FileWriter {
	/// Fails if `path` already exists
	pub async fn create(path: &Path, compression: u32) -> io::Result<FileWriter> {
		Ok(FileWriter {
			file: OpenOptions::new().write(true).create_new(true).open(path).await?,
			hasher: blake3::Hasher::new(),
			decoder: (compression > 0).then(|| GzDecoder::new(Vec::new())),
			written: 0,
		})
	}

	pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
		match self.decoder.as_mut() {
			Some(decoder) => {
				decoder.write_all(chunk)?;
				let plain = std::mem::take(decoder.get_mut());
				self.write_plain(&plain).await
			}
			None => self.write_plain(chunk).await,
		}
	}

	async fn write_plain(&mut self, bytes: &[u8]) -> io::Result<()> {
		if bytes.is_empty() {
			return Ok(());
		}
		self.hasher.update(bytes);
		self.written += bytes.len() as u64;
		self.file.write_all(bytes).await
	}

	/// Flush to disk; returns the digest and size of what was written
	pub async fn finish(mut self) -> io::Result<(String, u64)> {
		if let Some(decoder) = self.decoder.take() {
			let tail = decoder.finish()?;
			self.write_plain(&tail).await?;
		}
		self.file.flush().await?;
		self.file.sync_all().await?;
		Ok((self.hasher.finalize().to_hex().to_string(), self.written))
	}
}

/// BLAKE3 digest of a file on disk
pub async fn hash_file(path: &Path, buffer_size: usize) -> io::Result<String> {
	let mut file = File::open(path).await?;
	let mut hasher = blake3::Hasher::new();
	let mut buffer = vec![0u8; buffer_size.max(1)];
	loop {
		let read = file.read(&mut buffer).await?;
		if read == 0 {
			break;
		}
		hasher.update(&buffer[..read]);
	}
	Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use tempfile::TempDir;

	#[derive(Default)]
	struct Collect {
		chunks: Vec<Vec<u8>>,
		trailer: Option<FileTrailer>,
	}

	#[async_trait]
	impl FrameSink for Collect {
		async fn chunk(&mut self, bytes: Vec<u8>) -> Result<(), TransportError> {
			self.chunks.push(bytes);
			Ok(())
		}

		async fn end(&mut self, trailer: FileTrailer) -> Result<(), TransportError> {
			self.trailer = Some(trailer);
			Ok(())
		}
	}

	async fn transfer(compression: u32) {
		let dir = TempDir::new().unwrap();
		let source = dir.path().join("source.bin");
		let target = dir.path().join("target.bin");
		let content: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
		std::fs::write(&source, &content).unwrap();

		let mut sink = Collect::default();
		let trailer = send_file(&source, compression, 4096, &mut sink).await.unwrap();
		assert_eq!(trailer.size, content.len() as u64);

		let mut writer = FileWriter::create(&target, compression).await.unwrap();
		for chunk in &sink.chunks {
			writer.write(chunk).await.unwrap();
		}
		let (hash, size) = writer.finish().await.unwrap();
		assert_eq!(hash, trailer.hash);
		assert_eq!(size, content.len() as u64);
		assert_eq!(std::fs::read(&target).unwrap(), content);
	}

	#[tokio::test]
	async fn test_raw_transfer_digest_matches() {
		transfer(0).await;
	}

	#[tokio::test]
	async fn test_compressed_transfer_digest_matches() {
		transfer(6).await;
	}

	#[tokio::test]
	async fn test_missing_source_reports_error_trailer() {
		let dir = TempDir::new().unwrap();
		let mut sink = Collect::default();
		let trailer = send_file(&dir.path().join("absent"), 0, 1024, &mut sink).await.unwrap();
		assert!(trailer.error.is_some());
		assert!(sink.chunks.is_empty());
		assert_eq!(sink.trailer, Some(trailer));
	}

	#[tokio::test]
	async fn test_writer_keeps_existing_file() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("x.txt");
		std::fs::write(&path, b"old").unwrap();
		assert!(FileWriter::create(&path, 0).await.is_err());
		assert_eq!(std::fs::read(&path).unwrap(), b"old");
	}

	#[tokio::test]
	async fn test_hash_file_matches_trailer() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("f");
		std::fs::write(&path, b"0123456789").unwrap();
		let mut sink = Collect::default();
		let trailer = send_file(&path, 0, 3, &mut sink).await.unwrap();
		assert_eq!(hash_file(&path, 7).await.unwrap(), trailer.hash);
		assert_eq!(sink.chunks.len(), 4);
	}
}

// vim: ts=4
