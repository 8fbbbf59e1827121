//! Implements POSIX path handling and resolution over the directory tree.

use crate::device::Device;
use crate::Filesystem;
use crate::Result;
use crate::ROOT_INODE;

/// A POSIX path split into segments.
///
/// Empty segments are dropped, so `"/a//b/"` and `"/a/b"` parse the same.
/// `"/"` and `"///"` parse to the empty segment list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Path {
	/// The raw path string.
	pub raw: String,
	/// The path's segments.
	pub segments: Vec<String>,
	/// Tells whether the path is absolute.
	pub absolute: bool,
}

impl Path {
	/// Tells whether the path is relative.
	pub fn is_relative(&self) -> bool {
		!self.absolute
	}
}

impl From<&str> for Path {
	fn from(s: &str) -> Self {
		let segments = s
			.split('/')
			.filter(|seg| !seg.is_empty())
			.map(str::to_owned)
			.collect();
		Self {
			raw: s.to_owned(),
			segments,
			absolute: s.starts_with('/'),
		}
	}
}

/// Resolves `path` starting from the directory with inode `start_id`.
///
/// `.` and `..` are ordinary entries of every directory and resolve
/// naturally. When a symbolic link is crossed in the middle of the path, its
/// target is resolved from the current directory if relative, or from the
/// filesystem's root if absolute, with the remaining segments appended. A
/// symbolic link in the last segment is only followed when
/// `follow_symlinks` is set.
///
/// The function returns the matched inode id, or 0 on any failure. There is
/// no distinction between a missing name and a non-directory in the middle
/// of the path.
pub fn find_inode<D: Device>(
	fs: &mut Filesystem<D>,
	start_id: u32,
	path: &str,
	follow_symlinks: bool,
) -> Result<u32> {
	find_inode_path(fs, start_id, &Path::from(path), follow_symlinks)
}

/// Same as [`find_inode`], with an already parsed path.
pub fn find_inode_path<D: Device>(
	fs: &mut Filesystem<D>,
	start_id: u32,
	path: &Path,
	follow_symlinks: bool,
) -> Result<u32> {
	descend(fs, start_id, &path.segments, follow_symlinks)
}

/// One level of the recursive descent.
fn descend<D: Device>(
	fs: &mut Filesystem<D>,
	dir_id: u32,
	segments: &[String],
	follow_symlinks: bool,
) -> Result<u32> {
	let Some(segment) = segments.first() else {
		return Ok(dir_id);
	};
	let Some(dir) = fs.get_inode(dir_id)?.to_directory() else {
		return Ok(0);
	};
	let entries = dir.read_entries(fs)?;
	let Some(entry) = entries.iter().find(|e| &e.name == segment) else {
		return Ok(0);
	};
	let node = fs.get_inode(entry.inode_id)?;
	let last = segments.len() == 1;
	if follow_symlinks || !last {
		if let Some(link) = node.to_symbolic_link() {
			let mut target = link.get_target(fs)?;
			for segment in &segments[1..] {
				target.push('/');
				target.push_str(segment);
			}
			let target = Path::from(target.as_str());
			let base = if target.is_relative() { dir_id } else { ROOT_INODE };
			return descend(fs, base, &target.segments, follow_symlinks);
		}
	}
	if last {
		Ok(entry.inode_id)
	} else {
		descend(fs, entry.inode_id, &segments[1..], follow_symlinks)
	}
}
