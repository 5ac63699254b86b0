//! Share permission check

use serde::{Deserialize, Serialize};
use std::path::{Component, Path};

use super::Share;
use crate::error::PermissionError;

/// File-system actions an external agent may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FsAction {
	Copy,
	Cut,
	FsDestroy,
	FsNew,
	FsRename,
	FsWrite,
	FsRead,
	FsDirectory,
	FsDetails,
	FsHash,
}

impl FsAction {
	/// Actions a read-only share rejects
	pub fn is_mutating(self) -> bool {
		matches!(
			self,
			FsAction::Copy
				| FsAction::Cut | FsAction::FsDestroy
				| FsAction::FsNew | FsAction::FsRename
				| FsAction::FsWrite
		)
	}
}

/// Paths with parent references never match a share
pub fn is_path_safe(path: &Path) -> bool {
	!path.components().any(|c| matches!(c, Component::ParentDir))
}

/// Pick the longest share covering `path` and apply the read-only rule
pub fn check<'a, I>(shares: I, path: &str, action: FsAction) -> Result<&'a Share, PermissionError>
where
	I: IntoIterator<Item = &'a Share>,
{
	let path = Path::new(path);
	if !is_path_safe(path) {
		return Err(PermissionError::NoShare);
	}

	let share = shares
		.into_iter()
		.filter(|share| path.starts_with(Path::new(&share.name)))
		.max_by_key(|share| share.name.len())
		.ok_or(PermissionError::NoShare)?;

	if share.read_only && action.is_mutating() {
		return Err(PermissionError::ReadOnly);
	}
	Ok(share)
}


// vim: ts=4
