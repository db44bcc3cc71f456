//! A read-only zip archive back-end for virtual filesystems.
//!
//! Opens an archive over any random-access byte source, indexes its central
//! directory into a case-insensitively searchable tree, and streams the
//! decompressed — and, where needed, decrypted — contents of any entry on
//! demand. Supported on the way in: Zip64 archives, self-extracting archives
//! with arbitrary prefix data, stored and deflated entries, symlinks,
//! traditional PKWARE encryption and WinZip AES.
//!
//! Archives are never written, only read; every mutating operation of the
//! mount contract fails with [`ErrorKind::ReadOnly`].
//!
//! ```no_run
//! use zipfs::ZipArchive;
//!
//! # fn main() -> Result<(), zipfs::Error> {
//! let file = std::fs::File::open("assets.zip").expect("archive exists");
//! let mut archive = ZipArchive::from_file(file)?;
//!
//! for child in archive.read_dir("")? {
//!     println!("{} ({:?})", child.name(), child.file_type());
//! }
//!
//! let mut reader = archive.open_read("textures/grass.png")?;
//! let mut data = vec![0u8; reader.len() as usize];
//! reader.read(&mut data)?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

mod archive;
mod crc;
mod crypto;
mod entry;
mod errors;
mod locator;
mod path;
mod read;
mod source;
mod time;
mod vfs;

pub use archive::{DirEntry, ReadDir, ZipArchive};
pub use crc::crc32;
pub use crypto::BUILT_IN_AES_PASSWORD;
pub use errors::{Error, ErrorKind};
pub use read::ZipReader;
pub use source::{FileReader, MutexReader, ReaderAt};
pub use vfs::{BackendInfo, FileType, Metadata, BACKEND_INFO};
