//! Implements directory entries, stored in the content of directory inodes.
//!
//! Entries are laid out back to back inside the directory's data blocks: an
//! 8-byte head, the name, then padding up to the entry's recorded size. A
//! zero inode id terminates the stream. The last entry of a directory spans
//! to the end of the directory's content so appends only need to shrink its
//! padding.

use crate::device::Device;
use crate::inode::Inode;
use crate::inode::INODE_TYPE_BLOCK_DEVICE;
use crate::inode::INODE_TYPE_CHAR_DEVICE;
use crate::inode::INODE_TYPE_DIRECTORY;
use crate::inode::INODE_TYPE_FIFO;
use crate::inode::INODE_TYPE_REGULAR;
use crate::inode::INODE_TYPE_SOCKET;
use crate::inode::INODE_TYPE_SYMLINK;
use crate::inode::SYMLINK_INLINE_SIZE;
use crate::Error;
use crate::Filesystem;
use crate::Result;
use crate::REQUIRED_FEATURE_DIRECTORY_TYPE;
use std::cmp::max;
use std::ops::Deref;
use std::ops::DerefMut;

/// The size of a directory entry's head in bytes.
pub const ENTRY_HEAD_SIZE: u16 = 8;

/// Directory entry type indicator: Unknown
pub const DIRENT_TYPE_UNKNOWN: u8 = 0;
/// Directory entry type indicator: Regular file
pub const DIRENT_TYPE_REGULAR: u8 = 1;
/// Directory entry type indicator: Directory
pub const DIRENT_TYPE_DIRECTORY: u8 = 2;
/// Directory entry type indicator: Char device
pub const DIRENT_TYPE_CHAR_DEVICE: u8 = 3;
/// Directory entry type indicator: Block device
pub const DIRENT_TYPE_BLOCK_DEVICE: u8 = 4;
/// Directory entry type indicator: FIFO
pub const DIRENT_TYPE_FIFO: u8 = 5;
/// Directory entry type indicator: Socket
pub const DIRENT_TYPE_SOCKET: u8 = 6;
/// Directory entry type indicator: Symbolic link
pub const DIRENT_TYPE_SYMLINK: u8 = 7;

/// Returns the type indicator matching the given inode mode.
fn type_indicator(mode: u16) -> u8 {
	match mode & 0xf000 {
		INODE_TYPE_FIFO => DIRENT_TYPE_FIFO,
		INODE_TYPE_CHAR_DEVICE => DIRENT_TYPE_CHAR_DEVICE,
		INODE_TYPE_DIRECTORY => DIRENT_TYPE_DIRECTORY,
		INODE_TYPE_BLOCK_DEVICE => DIRENT_TYPE_BLOCK_DEVICE,
		INODE_TYPE_REGULAR => DIRENT_TYPE_REGULAR,
		INODE_TYPE_SYMLINK => DIRENT_TYPE_SYMLINK,
		INODE_TYPE_SOCKET => DIRENT_TYPE_SOCKET,
		_ => DIRENT_TYPE_UNKNOWN,
	}
}

/// An entry of a directory, read in memory.
#[derive(Clone, Debug)]
pub struct DirectoryEntry {
	/// The entry's target inode.
	pub inode_id: u32,
	/// The total size of the entry on disk, padding included.
	pub size: u16,
	/// The length of the entry's name.
	pub name_size: u8,
	/// The entry's type indicator.
	pub file_type: u8,
	/// The entry's name.
	pub name: String,
}

/// Returns the entry with the given name, if any.
pub fn find_entry_by_name<'e>(
	entries: &'e [DirectoryEntry],
	name: &str,
) -> Option<&'e DirectoryEntry> {
	entries.iter().find(|e| e.name == name)
}

/// Builds a directory entry named `name` pointing at the given inode, and
/// increments the inode's hard link count.
///
/// The count is saved right away: a freshly created inode starts with zero
/// hard links and only becomes live once its first entry is built.
pub fn create_directory_entry<D: Device>(
	fs: &mut Filesystem<D>,
	name: &str,
	inode_id: u32,
	inode: &mut Inode,
) -> Result<DirectoryEntry> {
	let features = fs.superblock().required_features;
	let file_type = if features & REQUIRED_FEATURE_DIRECTORY_TYPE != 0 {
		type_indicator(inode.record.mode)
	} else {
		DIRENT_TYPE_UNKNOWN
	};
	inode.record.hard_links_count += 1;
	inode.save(fs)?;
	Ok(DirectoryEntry {
		inode_id,
		size: ENTRY_HEAD_SIZE + name.len() as u16,
		name_size: name.len() as u8,
		file_type,
		name: name.to_owned(),
	})
}

/// A directory view over an inode.
pub struct Directory(pub Inode);

impl Directory {
	/// Reads the directory's entry list.
	///
	/// The walk stops at the first zero inode id or at the end of the
	/// directory's content.
	pub fn read_entries<D: Device>(&self, fs: &mut Filesystem<D>) -> Result<Vec<DirectoryEntry>> {
		let size = self.0.size(fs);
		let mut entries = Vec::with_capacity(8);
		let mut offset = 0u64;
		while offset < size {
			let mut head = [0u8; ENTRY_HEAD_SIZE as usize];
			self.0.read(fs, offset, &mut head)?;
			let inode_id = u32::from_le_bytes(head[0..4].try_into().unwrap());
			if inode_id == 0 {
				break;
			}
			let entry_size = u16::from_le_bytes(head[4..6].try_into().unwrap());
			if entry_size < ENTRY_HEAD_SIZE {
				return Err(Error::InvalidImage("directory entry too small"));
			}
			let name_size = head[6];
			let file_type = head[7];
			let mut name = vec![0u8; name_size as usize];
			self.0.read(fs, offset + ENTRY_HEAD_SIZE as u64, &mut name)?;
			entries.push(DirectoryEntry {
				inode_id,
				size: entry_size,
				name_size,
				file_type,
				name: String::from_utf8_lossy(&name).into_owned(),
			});
			offset += entry_size as u64;
		}
		Ok(entries)
	}

	/// Serializes the given entries at the beginning of the directory's
	/// content, updating their sizes in place.
	///
	/// Every entry is written with its tight size, except the last one which
	/// is inflated to span the remaining directory content, leaving room for
	/// future appends without changing the directory's size.
	pub fn write_entries<D: Device>(
		&mut self,
		fs: &mut Filesystem<D>,
		entries: &mut [DirectoryEntry],
	) -> Result<()> {
		let count = entries.len();
		let mut offset = 0u64;
		for (i, e) in entries.iter_mut().enumerate() {
			e.name_size = e.name.len() as u8;
			let tight_size = ENTRY_HEAD_SIZE as u64 + e.name_size as u64;
			e.size = if i + 1 == count {
				max(tight_size, self.0.size(fs).saturating_sub(offset)) as u16
			} else {
				tight_size as u16
			};
			let mut head = [0u8; ENTRY_HEAD_SIZE as usize];
			head[0..4].copy_from_slice(&e.inode_id.to_le_bytes());
			head[4..6].copy_from_slice(&e.size.to_le_bytes());
			head[6] = e.name_size;
			head[7] = e.file_type;
			self.0.write(fs, offset, &head)?;
			self.0
				.write(fs, offset + ENTRY_HEAD_SIZE as u64, e.name.as_bytes())?;
			offset += e.size as u64;
		}
		Ok(())
	}

	/// Appends an entry to the directory.
	pub fn append<D: Device>(&mut self, fs: &mut Filesystem<D>, entry: DirectoryEntry) -> Result<()> {
		let mut entries = self.read_entries(fs)?;
		entries.push(entry);
		self.write_entries(fs, &mut entries)
	}

	/// Removes the entry with the given name.
	///
	/// The function returns `false` if the name is `.` or `..`, or if the
	/// entry points at a non-empty directory. A missing name is a no-op
	/// reported as success.
	///
	/// When the target's hard link count drops to zero, its data blocks are
	/// freed (their pointers are left in place in the record, leaving
	/// recovery possible) and the inode is returned to the allocator. An
	/// inline symbolic link holds no data block, so only its inode is freed.
	pub fn remove<D: Device>(&mut self, fs: &mut Filesystem<D>, name: &str) -> Result<bool> {
		if name == "." || name == ".." {
			return Ok(false);
		}
		let mut entries = self.read_entries(fs)?;
		let Some(pos) = entries.iter().position(|e| e.name == name) else {
			return Ok(true);
		};
		let inode_id = entries[pos].inode_id;
		let mut inode = fs.get_inode(inode_id)?;
		if inode.is_directory() {
			let sub = Directory(inode.clone());
			if sub.read_entries(fs)?.len() > 2 {
				return Ok(false);
			}
		}

		inode.record.hard_links_count = inode.record.hard_links_count.saturating_sub(1);
		inode.save(fs)?;
		if inode.record.hard_links_count == 0 {
			let inline_symlink =
				inode.is_symbolic_link() && inode.size(fs) < SYMLINK_INLINE_SIZE;
			if !inline_symlink {
				let mut i = 0u32;
				loop {
					let blk = inode.get_block_id(fs, i)?;
					if blk == 0 {
						break;
					}
					fs.free_block(blk)?;
					i += 1;
				}
			}
			if inode.is_directory() {
				fs.update_directory_count(inode_id, -1)?;
			}
			fs.free_inode(inode_id)?;
		}

		entries.remove(pos);
		self.write_entries(fs, &mut entries)?;
		Ok(true)
	}
}

impl Deref for Directory {
	type Target = Inode;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl DerefMut for Directory {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.0
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::testing;
	use crate::ROOT_INODE;

	#[test]
	fn entry_roundtrip() {
		let mut fs = testing::reference_filesystem();
		testing::build_reference_tree(&mut fs);

		let mut root = fs.get_root().unwrap().to_directory().unwrap();
		let before = root.read_entries(&mut fs).unwrap();
		let mut rewritten = before.clone();
		root.write_entries(&mut fs, &mut rewritten).unwrap();
		let after = root.read_entries(&mut fs).unwrap();

		let project =
			|e: &DirectoryEntry| (e.inode_id, e.file_type, e.name.clone());
		assert_eq!(
			before.iter().map(project).collect::<Vec<_>>(),
			after.iter().map(project).collect::<Vec<_>>()
		);
	}

	#[test]
	fn last_entry_fills_directory() {
		let mut fs = testing::reference_filesystem();
		testing::build_reference_tree(&mut fs);

		let root = fs.get_root().unwrap().to_directory().unwrap();
		let entries = root.read_entries(&mut fs).unwrap();
		let total: u64 = entries.iter().map(|e| e.size as u64).sum();
		assert_eq!(total, root.size(&fs));
		let last = entries.last().unwrap();
		assert!(last.size as u64 >= ENTRY_HEAD_SIZE as u64 + last.name_size as u64);
	}

	#[test]
	fn append_and_find() {
		let mut fs = testing::reference_filesystem();
		let (id, mut inode) = fs.create_file(0o644, 0, 0, 0).unwrap();
		let entry = create_directory_entry(&mut fs, "new_file", id, &mut inode).unwrap();
		assert_eq!(entry.file_type, DIRENT_TYPE_REGULAR);

		let mut root = fs.get_root().unwrap().to_directory().unwrap();
		root.append(&mut fs, entry).unwrap();
		let entries = root.read_entries(&mut fs).unwrap();
		let found = find_entry_by_name(&entries, "new_file").unwrap();
		assert_eq!(found.inode_id, id);
		assert!(find_entry_by_name(&entries, "no_such_name").is_none());
	}

	#[test]
	fn remove_guards() {
		let mut fs = testing::reference_filesystem();
		let tree = testing::build_reference_tree(&mut fs);

		let mut tmp2 = fs.get_inode(tree.tmp2).unwrap().to_directory().unwrap();
		// testdir is not empty
		assert!(!tmp2.remove(&mut fs, "testdir").unwrap());

		let mut testdir = fs.get_inode(tree.testdir).unwrap().to_directory().unwrap();
		assert!(!testdir.remove(&mut fs, ".").unwrap());
		assert!(!testdir.remove(&mut fs, "..").unwrap());

		assert!(testdir.remove(&mut fs, "largefile2").unwrap());
		assert!(testdir.remove(&mut fs, "largefile").unwrap());
		assert!(testdir.remove(&mut fs, "link").unwrap());
		assert!(testdir.remove(&mut fs, "tmp").unwrap());
		assert!(testdir.remove(&mut fs, "tmp2_loop").unwrap());
		assert!(testdir.remove(&mut fs, testing::LONG_SYMLINK_NAME).unwrap());

		// testdir is empty now
		let mut tmp2 = fs.get_inode(tree.tmp2).unwrap().to_directory().unwrap();
		assert!(tmp2.remove(&mut fs, "testdir").unwrap());
		assert_eq!(
			crate::path::find_inode(&mut fs, ROOT_INODE, "/tmp2/testdir", true).unwrap(),
			0
		);
	}

	#[test]
	fn remove_missing_is_noop() {
		let mut fs = testing::reference_filesystem();
		let mut root = fs.get_root().unwrap().to_directory().unwrap();
		let before = root.read_entries(&mut fs).unwrap().len();
		assert!(root.remove(&mut fs, "no_such_name").unwrap());
		assert_eq!(root.read_entries(&mut fs).unwrap().len(), before);
	}

	#[test]
	fn remove_frees_file_blocks() {
		let mut fs = testing::reference_filesystem();
		let free_blocks = { fs.superblock().total_unallocated_blocks };
		let free_inodes = { fs.superblock().total_unallocated_inodes };

		let id = testing::add_file(&mut fs, ROOT_INODE, "doomed", &[0x55; 5 * 1024]);
		assert!({ fs.superblock().total_unallocated_blocks } < free_blocks);

		let mut root = fs.get_root().unwrap().to_directory().unwrap();
		assert!(root.remove(&mut fs, "doomed").unwrap());
		assert_eq!({ fs.superblock().total_unallocated_blocks }, free_blocks);
		assert_eq!({ fs.superblock().total_unallocated_inodes }, free_inodes);

		// the entry is gone
		let entries = root.read_entries(&mut fs).unwrap();
		assert!(find_entry_by_name(&entries, "doomed").is_none());
		// the inode can be allocated again
		assert_eq!(fs.alloc_inode().unwrap(), id);
	}

	#[test]
	fn remove_inline_symlink_frees_no_block() {
		let mut fs = testing::reference_filesystem();
		testing::add_symlink(&mut fs, ROOT_INODE, "shortcut", "testfile");
		let free_blocks = { fs.superblock().total_unallocated_blocks };
		let free_inodes = { fs.superblock().total_unallocated_inodes };

		let mut root = fs.get_root().unwrap().to_directory().unwrap();
		assert!(root.remove(&mut fs, "shortcut").unwrap());
		// the link stored its target inline, so only the inode is released
		assert_eq!({ fs.superblock().total_unallocated_blocks }, free_blocks);
		assert_eq!(
			{ fs.superblock().total_unallocated_inodes },
			free_inodes + 1
		);
	}

	#[test]
	fn remove_keeps_hard_linked_inode() {
		let mut fs = testing::reference_filesystem();
		let id = testing::add_file(&mut fs, ROOT_INODE, "original", b"content");
		testing::attach(&mut fs, ROOT_INODE, "alias", id);
		let free_inodes = { fs.superblock().total_unallocated_inodes };

		let mut root = fs.get_root().unwrap().to_directory().unwrap();
		assert!(root.remove(&mut fs, "original").unwrap());
		// one hard link remains, the inode stays allocated
		assert_eq!({ fs.superblock().total_unallocated_inodes }, free_inodes);
		let inode = fs.get_inode(id).unwrap();
		assert_eq!({ inode.record.hard_links_count }, 1);

		assert!(root.remove(&mut fs, "alias").unwrap());
		assert_eq!(
			{ fs.superblock().total_unallocated_inodes },
			free_inodes + 1
		);
	}
}
