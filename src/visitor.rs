//! Implements the depth-first listing of a directory tree.

use crate::device::Device;
use crate::inode::Inode;
use crate::Filesystem;
use crate::Result;
use std::io::Write;

/// Prints the tree under the given inode, one line per entry.
///
/// Each entry is emitted as its full path from the starting inode, with
/// ` -> target` appended for symbolic links. `.` and `..` entries are
/// skipped.
pub fn print<D: Device, W: Write>(
	fs: &mut Filesystem<D>,
	inode: &Inode,
	out: &mut W,
) -> Result<()> {
	let mut path = String::new();
	visit(fs, inode.id, &mut path, out)
}

/// Visits the entries of the directory with the given inode id, pre-order.
fn visit<D: Device, W: Write>(
	fs: &mut Filesystem<D>,
	inode_id: u32,
	path: &mut String,
	out: &mut W,
) -> Result<()> {
	let Some(dir) = fs.get_inode(inode_id)?.to_directory() else {
		return Ok(());
	};
	for entry in dir.read_entries(fs)? {
		if entry.name == "." || entry.name == ".." {
			continue;
		}
		let parent_len = path.len();
		path.push('/');
		path.push_str(&entry.name);
		out.write_all(path.as_bytes())?;

		let node = fs.get_inode(entry.inode_id)?;
		let is_dir = node.is_directory();
		if let Some(link) = node.to_symbolic_link() {
			let target = link.get_target(fs)?;
			out.write_all(b" -> ")?;
			out.write_all(target.as_bytes())?;
			writeln!(out)?;
		} else {
			writeln!(out)?;
			if is_dir {
				visit(fs, entry.inode_id, path, out)?;
			}
		}
		path.truncate(parent_len);
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::testing;

	#[test]
	fn print_reference_tree() {
		let mut fs = testing::reference_filesystem();
		testing::build_reference_tree(&mut fs);

		let root = fs.get_root().unwrap();
		let mut out = Vec::new();
		print(&mut fs, &root, &mut out).unwrap();

		let expected = format!(
			"/lost+found\n\
			 /tmp\n\
			 /tmp/testdir\n\
			 /tmp/testdir/largefile2\n\
			 /tmp/testdir/largefile\n\
			 /tmp2\n\
			 /tmp2/testdir\n\
			 /tmp2/testdir/largefile2\n\
			 /tmp2/testdir/largefile\n\
			 /tmp2/testdir/link -> ../../testfile\n\
			 /tmp2/testdir/tmp -> ../../tmp\n\
			 /tmp2/testdir/tmp2_loop -> ../../tmp2\n\
			 /tmp2/testdir/{} -> largefile\n\
			 /testfile\n",
			testing::LONG_SYMLINK_NAME
		);
		assert_eq!(String::from_utf8(out).unwrap(), expected);
	}

	#[test]
	fn print_plain_file_is_empty() {
		let mut fs = testing::reference_filesystem();
		let tree = testing::build_reference_tree(&mut fs);

		let inode = fs.get_inode(tree.testfile).unwrap();
		let mut out = Vec::new();
		print(&mut fs, &inode, &mut out).unwrap();
		assert!(out.is_empty());
	}
}
