//! Types for the virtual-filesystem contract the archive back-end satisfies.

/// What a path inside an archive names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
}

/// The result of statting a path inside an archive.
///
/// Zip archives carry a single DOS modification time per entry, so the
/// creation time mirrors it and the access time is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub file_type: FileType,
    /// Decoded size in bytes; 0 for directories and symlinks.
    pub file_size: u64,
    /// Modification time in seconds since the Unix epoch.
    pub mod_time: i64,
    pub create_time: i64,
    pub access_time: i64,
    pub read_only: bool,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.file_type == FileType::Directory
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type == FileType::Symlink
    }
}

/// Identity the back-end advertises to a mounting virtual filesystem.
#[derive(Debug, Clone, Copy)]
pub struct BackendInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub supports_symlinks: bool,
}

/// The zip back-end's identity record.
pub const BACKEND_INFO: BackendInfo = BackendInfo {
    name: "ZIP",
    description: "PkZip/WinZip/Info-Zip compatible",
    supports_symlinks: true,
};
