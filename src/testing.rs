//! Helpers shared by the test modules: a scratch filesystem with the
//! reference geometry and builders for the tree the end-to-end tests walk.

use crate::device::Device;
use crate::device::MemDevice;
use crate::dirent;
use crate::format::Ext2Factory;
use crate::Filesystem;
use crate::ROOT_INODE;

/// The name of the long symbolic link of the reference tree, longer than an
/// entry name can be stored inline.
pub const LONG_SYMLINK_NAME: &str = "largefile_with_more_than_60_chars_01234567890123456789012345678901234567890123456789012345678901234567890123456789";

/// The inode ids of the reference tree.
pub struct ReferenceTree {
	pub tmp: u32,
	pub tmp_testdir: u32,
	pub tmp_largefile: u32,
	pub tmp2: u32,
	pub testdir: u32,
	pub largefile: u32,
	pub link: u32,
	pub long_link: u32,
	pub testfile: u32,
}

/// Formats a fresh 10 MiB filesystem with the reference geometry: 1 KiB
/// blocks, two block groups, 2560 inodes.
pub fn reference_filesystem() -> Filesystem<MemDevice> {
	let mut dev = MemDevice::new(10 * 1024 * 1024);
	Ext2Factory {
		block_size: Some(1024),
		inodes_per_group: Some(1280),
		blocks_per_group: Some(8192),
		..Default::default()
	}
	.create(&mut dev)
	.unwrap();
	Filesystem::load(dev).unwrap()
}

/// Attaches the inode `id` to the directory `dir_id` under the given name.
pub fn attach<D: Device>(fs: &mut Filesystem<D>, dir_id: u32, name: &str, id: u32) {
	let mut inode = fs.get_inode(id).unwrap();
	let entry = dirent::create_directory_entry(fs, name, id, &mut inode).unwrap();
	let mut dir = fs.get_inode(dir_id).unwrap().to_directory().unwrap();
	dir.append(fs, entry).unwrap();
}

/// Creates a regular file holding `content` under the directory `dir_id`.
pub fn add_file<D: Device>(
	fs: &mut Filesystem<D>,
	dir_id: u32,
	name: &str,
	content: &[u8],
) -> u32 {
	let (id, mut inode) = fs.create_file(0o644, 1000, 1000, 0).unwrap();
	if !content.is_empty() {
		inode.write(fs, 0, content).unwrap();
	}
	attach(fs, dir_id, name, id);
	id
}

/// Creates a symbolic link under the directory `dir_id`.
pub fn add_symlink<D: Device>(
	fs: &mut Filesystem<D>,
	dir_id: u32,
	name: &str,
	target: &str,
) -> u32 {
	let (id, _) = fs.create_symbolic_link(target, 0o777, 1000, 1000, 0).unwrap();
	attach(fs, dir_id, name, id);
	id
}

/// Creates a directory under the directory `dir_id`.
pub fn add_dir<D: Device>(fs: &mut Filesystem<D>, dir_id: u32, name: &str) -> u32 {
	let (id, _) = fs.create_directory(dir_id, 0o755, 1000, 1000, 0).unwrap();
	attach(fs, dir_id, name, id);
	id
}

/// Builds the tree the end-to-end scenarios run against, mirroring the shape
/// of the reference image:
///
/// ```text
/// /lost+found
/// /tmp/testdir/{largefile2,largefile}
/// /tmp2/testdir/{largefile2,largefile,link,tmp,tmp2_loop,<long symlink>}
/// /testfile
/// ```
pub fn build_reference_tree<D: Device>(fs: &mut Filesystem<D>) -> ReferenceTree {
	let largefile_content = "a bit more content.\n".repeat(672);

	let tmp = add_dir(fs, ROOT_INODE, "tmp");
	let tmp_testdir = add_dir(fs, tmp, "testdir");
	add_file(fs, tmp_testdir, "largefile2", largefile_content.as_bytes());
	let tmp_largefile = add_file(fs, tmp_testdir, "largefile", largefile_content.as_bytes());

	let tmp2 = add_dir(fs, ROOT_INODE, "tmp2");
	let testdir = add_dir(fs, tmp2, "testdir");
	add_file(fs, testdir, "largefile2", largefile_content.as_bytes());
	let largefile = add_file(fs, testdir, "largefile", largefile_content.as_bytes());
	let link = add_symlink(fs, testdir, "link", "../../testfile");
	add_symlink(fs, testdir, "tmp", "../../tmp");
	add_symlink(fs, testdir, "tmp2_loop", "../../tmp2");
	let long_link = add_symlink(fs, testdir, LONG_SYMLINK_NAME, "largefile");

	let testfile = add_file(fs, ROOT_INODE, "testfile", b"This is a test file.\n");

	ReferenceTree {
		tmp,
		tmp_testdir,
		tmp_largefile,
		tmp2,
		testdir,
		largefile,
		link,
		long_link,
		testfile,
	}
}
