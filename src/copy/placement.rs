//! Where manifest entries land at the write destination
//!
//! Destinations arrive from the source agent, so the write side only joins
//! plain relative names onto its own root and never overwrites an existing
//! name: a colliding top-level item is renamed before anything is written.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use crate::protocol::{EntryKind, ManifestEntry};

/// Join a destination onto the write root
///
/// `None` unless every component is a plain name, so `..`, `.` and absolute
/// destinations never resolve.
pub fn join(root: &Path, destination: &str) -> Option<PathBuf> {
	let relative = Path::new(destination);
	let plain = relative.components().all(|c| matches!(c, Component::Normal(_)));
	(plain && !destination.is_empty()).then(|| root.join(relative))
}

/// Rename each top-level item whose name is already taken under `root`
///
/// `report.txt` becomes `report_copy.txt`, then `report_copy_2.txt` and so
/// on. Entries below a renamed directory follow it.
pub async fn rename(entries: &mut [ManifestEntry], root: &Path) {
	let tops: Vec<(String, String, EntryKind)> = entries
		.iter()
		.filter(|e| !e.destination.is_empty() && !e.destination.contains('/'))
		.map(|e| (e.source.clone(), e.destination.clone(), e.kind))
		.collect();

	let mut taken: HashSet<String> = HashSet::new();
	for (source, name, kind) in tops {
		let mut candidate = name.clone();
		let mut attempt = 1;
		while taken.contains(&candidate) || fs::symlink_metadata(root.join(&candidate)).await.is_ok() {
			candidate = copy_name(&name, kind, attempt);
			attempt += 1;
		}
		taken.insert(candidate.clone());
		if candidate == name {
			continue;
		}

		let prefix = format!("{}/", name);
		for entry in entries.iter_mut() {
			let below = Path::new(&entry.source).starts_with(&source);
			if entry.source == source && entry.destination == name {
				entry.destination = candidate.clone();
			} else if below && entry.destination.starts_with(&prefix) {
				entry.destination = format!("{}/{}", candidate, &entry.destination[prefix.len()..]);
			}
		}
	}
}

/// `name_copy`, `name_copy_2`, ... keeping a file's extension last
fn copy_name(name: &str, kind: EntryKind, attempt: usize) -> String {
	let suffix = if attempt == 1 { "_copy".to_string() } else { format!("_copy_{}", attempt) };
	let split = match kind {
		EntryKind::Directory => None,
		_ => name.rfind('.').filter(|&dot| dot > 0),
	};
	match split {
		Some(dot) => format!("{}{}{}", &name[..dot], suffix, &name[dot..]),
		None => format!("{}{}", name, suffix),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn entry(source: &str, kind: EntryKind, destination: &str) -> ManifestEntry {
		ManifestEntry {
			source: source.into(),
			kind,
			size: 0,
			children: 0,
			destination: destination.into(),
			link: None,
		}
	}

	#[test]
	fn test_join_rejects_escapes() {
		let root = Path::new("/srv/share");
		assert_eq!(join(root, "docs/a.txt"), Some(PathBuf::from("/srv/share/docs/a.txt")));
		assert_eq!(join(root, "../escaped.txt"), None);
		assert_eq!(join(root, "docs/../../x"), None);
		assert_eq!(join(root, "/etc/passwd"), None);
		assert_eq!(join(root, "./a"), None);
		assert_eq!(join(root, ""), None);
	}

	#[test]
	fn test_copy_names() {
		assert_eq!(copy_name("x.txt", EntryKind::File, 1), "x_copy.txt");
		assert_eq!(copy_name("x.txt", EntryKind::File, 3), "x_copy_3.txt");
		assert_eq!(copy_name(".bashrc", EntryKind::File, 1), ".bashrc_copy");
		assert_eq!(copy_name("v1.2", EntryKind::Directory, 1), "v1.2_copy");
	}

	#[tokio::test]
	async fn test_existing_names_renamed_with_children() {
		let dir = TempDir::new().unwrap();
		std::fs::write(dir.path().join("x.txt"), b"old").unwrap();
		std::fs::create_dir(dir.path().join("tree")).unwrap();
		std::fs::create_dir(dir.path().join("tree_copy")).unwrap();

		let mut entries = vec![
			entry("/a/tree", EntryKind::Directory, "tree"),
			entry("/a/tree/one", EntryKind::File, "tree/one"),
			entry("/a/x.txt", EntryKind::File, "x.txt"),
			entry("/a/new", EntryKind::File, "new"),
		];
		rename(&mut entries, dir.path()).await;

		let destinations: Vec<&str> = entries.iter().map(|e| e.destination.as_str()).collect();
		assert_eq!(destinations, ["tree_copy_2", "tree_copy_2/one", "x_copy.txt", "new"]);
	}

	#[tokio::test]
	async fn test_same_name_from_two_locations() {
		let dir = TempDir::new().unwrap();
		let mut entries = vec![
			entry("/a/notes", EntryKind::File, "notes"),
			entry("/b/notes", EntryKind::File, "notes"),
		];
		rename(&mut entries, dir.path()).await;
		assert_eq!(entries[0].destination, "notes");
		assert_eq!(entries[1].destination, "notes_copy");
	}
}

// vim: ts=4
