//! Copy manifest: directory walk and ordering

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use tokio::fs;

use crate::logging::*;
use crate::protocol::{EntryKind, ListData, ManifestEntry};

/// Walk result for a set of locations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
	pub entries: Vec<ManifestEntry>,
	pub list_data: ListData,
}

impl Manifest {
	pub fn files(&self) -> impl Iterator<Item = &ManifestEntry> {
		self.entries.iter().filter(|e| e.kind == EntryKind::File)
	}
}

/// Walk every location depth-first, directories before their contents
///
/// Destinations are relative to each location's parent, so copying
/// `/a/dir` yields `dir`, `dir/file`, and so on. A failing path is recorded
/// as an `error` entry and the walk goes on with its siblings.
pub async fn walk(locations: &[String]) -> Manifest {
	let mut manifest = Manifest::default();
	for location in locations {
		let path = Path::new(location);
		let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
		visit(path, name, &mut manifest).await;
	}
	sort(&mut manifest.entries);
	manifest
}

fn visit<'a>(
	path: &'a Path,
	destination: String,
	manifest: &'a mut Manifest,
) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
	Box::pin(async move {
		let source = path.to_string_lossy().into_owned();
		let meta = match fs::symlink_metadata(path).await {
			Ok(m) => m,
			Err(e) => {
				warn!("Cannot access {}: {}", path.display(), e);
				manifest.record_error(source, destination);
				return;
			}
		};

		if meta.is_symlink() {
			let target = match fs::read_link(path).await {
				Ok(target) => target.to_string_lossy().into_owned(),
				Err(e) => {
					warn!("Cannot read link {}: {}", path.display(), e);
					manifest.record_error(source, destination);
					return;
				}
			};
			manifest.list_data.links += 1;
			manifest.entries.push(ManifestEntry {
				source,
				kind: EntryKind::Link,
				size: 0,
				children: 0,
				destination,
				link: Some(target),
			});
		} else if meta.is_file() {
			manifest.list_data.files += 1;
			manifest.list_data.size += meta.len();
			manifest.entries.push(ManifestEntry {
				source,
				kind: EntryKind::File,
				size: meta.len(),
				children: 0,
				destination,
				link: None,
			});
		} else if meta.is_dir() {
			let mut children = Vec::new();
			match fs::read_dir(path).await {
				Ok(mut dir) => loop {
					match dir.next_entry().await {
						Ok(Some(entry)) => children.push(entry.path()),
						Ok(None) => break,
						Err(e) => {
							warn!("Error reading directory {}: {}", path.display(), e);
							manifest.record_error(source.clone(), destination.clone());
							break;
						}
					}
				},
				Err(e) => {
					warn!("Cannot read directory {}: {}", path.display(), e);
					manifest.record_error(source, destination);
					return;
				}
			}
			children.sort();

			manifest.list_data.directories += 1;
			manifest.entries.push(ManifestEntry {
				source,
				kind: EntryKind::Directory,
				size: 0,
				children: children.len(),
				destination: destination.clone(),
				link: None,
			});
			for child in &children {
				let name = child.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
				visit(child, format!("{}/{}", destination, name), manifest).await;
			}
		}
	})
}

impl Manifest {
	fn record_error(&mut self, source: String, destination: String) {
		self.list_data.errors += 1;
		self.entries.push(ManifestEntry {
			source,
			kind: EntryKind::Error,
			size: 0,
			children: 0,
			destination,
			link: None,
		});
	}
}

/// Directories first, then shorter paths before longer ones
///
/// A parent's path is always shorter than its children's, so creating
/// directories in this order never needs a missing parent.
pub fn sort(entries: &mut [ManifestEntry]) {
	entries.sort_by_key(|e| (e.kind != EntryKind::Directory, e.source.len()));
}


// vim: ts=4
