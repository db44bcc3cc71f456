//! The archive facade: opening, lookup, enumeration, and lazy entry
//! resolution.
//!
//! Opening parses only the central directory. Local file headers are not
//! touched until an entry is first opened, at which point the header is
//! validated, the data offset fixed to the first payload byte, and symlinks
//! are followed to their final target. The directory tree is held as one
//! entry table with index links: every entry sits in exactly one hash bucket
//! and on its parent's child list, and lookups splice their hit to the front
//! of the bucket so hot paths stay cheap.

use crate::crypto::{AesCtrCipher, TraditionalCipher, BUILT_IN_AES_PASSWORD};
use crate::crypto::{AES_AUTH_CODE_LEN, AES_VERIFIER_LEN, TRADITIONAL_HEADER_LEN};
use crate::entry::{
    CentralRecordFixed, EntryKind, LocalHeaderFixed, ZipEntry, LOCAL_HEADER_SIGNATURE,
    METHOD_DEFLATE, METHOD_STORE,
};
use crate::errors::{Error, ErrorKind};
use crate::locator::{self, DirectoryBounds};
use crate::path;
use crate::read::{CryptoState, ZipReader};
use crate::source::{le_u32, ReaderAt};
use crate::vfs::{FileType, Metadata};
use flate2::{Decompress, FlushDecompress, Status};
use log::{debug, warn};
use std::io::{Seek, SeekFrom};
use std::sync::Arc;

/// Index of the synthetic root directory in the entry table.
const ROOT: usize = 0;

/// Upper bound on a symlink target; anything longer is taken for corruption
/// rather than a path.
const MAX_LINK_TARGET_LEN: u64 = 4096;

/// A read-only zip archive over a random-access byte source.
///
/// Lookup paths are slash-separated UTF-8 without a leading slash, compared
/// case-insensitively; the empty path names the archive root. Operations
/// take `&mut self` because lookups reorder hash buckets and first opens
/// resolve entries in place; readers returned by [`open_read`] are
/// independent of the archive handle afterwards.
///
/// Dropping the archive releases the entry tree; the byte source is freed
/// once the archive and every reader holding a view of it are gone.
///
/// [`open_read`]: ZipArchive::open_read
pub struct ZipArchive<R> {
    source: Arc<R>,
    entries: Vec<ZipEntry>,
    buckets: Vec<Option<usize>>,
    data_start: u64,
    zip64: bool,
    has_encrypted: bool,
}

impl<R> std::fmt::Debug for ZipArchive<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZipArchive")
            .field("entries", &self.entries.len())
            .field("data_start", &self.data_start)
            .field("zip64", &self.zip64)
            .field("has_encrypted", &self.has_encrypted)
            .finish()
    }
}

impl ZipArchive<crate::FileReader> {
    /// Opens an archive backed by a file.
    pub fn from_file(file: std::fs::File) -> Result<Self, Error> {
        ZipArchive::open(crate::FileReader::from(file), false)
    }
}

impl<R: ReaderAt + Seek> ZipArchive<R> {
    /// Opens an archive, reading and indexing its central directory.
    ///
    /// `for_writing` exists for the mount contract and always fails: this
    /// back-end is read-only. A stream that does not start with a local file
    /// header is still acceptable as long as an end-of-central-directory
    /// record is found near EOF, which is what makes self-extracting
    /// archives with arbitrary prefix data work.
    pub fn open(mut source: R, for_writing: bool) -> Result<ZipArchive<R>, Error> {
        if for_writing {
            return Err(ErrorKind::ReadOnly.into());
        }

        let stream_len = source.seek(SeekFrom::End(0)).map_err(Error::io)?;

        let mut sig = [0u8; 4];
        let starts_with_local_header = source.read_exact_at(&mut sig, 0).is_ok()
            && le_u32(&sig) == LOCAL_HEADER_SIGNATURE;
        if !starts_with_local_header {
            debug!("no local file header at start of stream, relying on trailer scan");
        }

        let bounds = locator::locate(&source, stream_len)?;
        debug!(
            "central directory: {} entries at {:#x}, data start {:#x}, zip64 {}",
            bounds.entry_count, bounds.dir_offset, bounds.data_start, bounds.zip64
        );

        // every central record takes at least its fixed size, so a count
        // beyond this cannot be honest; checked before it sizes allocations
        if bounds.entry_count > stream_len / CentralRecordFixed::SIZE as u64 {
            return Err(Error::corrupt("entry count exceeds archive size"));
        }

        let bucket_count = (bounds.entry_count / 5).max(1) as usize;
        let mut archive = ZipArchive {
            source: Arc::new(source),
            entries: Vec::with_capacity(bounds.entry_count as usize + 1),
            buckets: vec![None; bucket_count],
            data_start: bounds.data_start,
            zip64: bounds.zip64,
            has_encrypted: false,
        };
        archive.entries.push(ZipEntry::directory(String::new()));

        archive.load_entries(&bounds)?;
        Ok(archive)
    }
}

impl<R: ReaderAt> ZipArchive<R> {
    /// Whether the central directory used Zip64 records.
    pub fn is_zip64(&self) -> bool {
        self.zip64
    }

    /// Bytes of non-archive data preceding the archive, as found with a
    /// self-extractor stub. Every entry offset is biased by this.
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Number of entries, counting fabricated parent directories but not the
    /// root.
    pub fn entry_count(&self) -> usize {
        self.entries.len() - 1
    }

    fn load_entries(&mut self, bounds: &DirectoryBounds) -> Result<(), Error> {
        let mut cursor = bounds.dir_offset;
        let mut fixed = [0u8; CentralRecordFixed::SIZE];
        let mut variable = Vec::new();

        for _ in 0..bounds.entry_count {
            self.source
                .read_exact_at(&mut fixed, cursor)
                .map_err(Error::io)?;
            let record = CentralRecordFixed::parse(&fixed)?;

            variable.resize(record.variable_length(), 0);
            self.source
                .read_exact_at(&mut variable, cursor + CentralRecordFixed::SIZE as u64)
                .map_err(Error::io)?;
            cursor += (CentralRecordFixed::SIZE + record.variable_length()) as u64;

            let entry = ZipEntry::from_central(&record, &variable, bounds.data_start)?;
            if entry.is_encrypted() {
                self.has_encrypted = true;
            }

            match self.lookup(&entry.name) {
                // A name can legitimately appear twice when a parent
                // directory was fabricated before its own record showed up;
                // fabricated entries are recognizable by their zero mod time.
                Some(existing) => {
                    if self.entries[existing].last_mod_time != 0 {
                        return Err(Error::corrupt("duplicate entry name"));
                    }
                    self.entries[existing].absorb_record(&entry);
                }
                None => {
                    self.insert(entry)?;
                }
            }
        }

        Ok(())
    }

    /// Hashes an entry into its bucket and links it under its parent,
    /// fabricating any missing ancestor directories first.
    fn insert(&mut self, entry: ZipEntry) -> Result<usize, Error> {
        let parent = self.ensure_parent(&entry.name)?;

        let index = self.entries.len();
        let bucket = path::hash_ci(&entry.name) as usize % self.buckets.len();
        self.entries.push(entry);

        self.entries[index].hash_next = self.buckets[bucket];
        self.buckets[bucket] = Some(index);

        self.entries[index].sibling = self.entries[parent].children;
        self.entries[parent].children = Some(index);

        Ok(index)
    }

    fn ensure_parent(&mut self, name: &str) -> Result<usize, Error> {
        let Some(slash) = name.rfind('/') else {
            return Ok(ROOT);
        };

        let dir = &name[..slash];
        match self.lookup(dir) {
            Some(existing) => {
                if self.entries[existing].kind != EntryKind::Directory {
                    return Err(Error::corrupt("entry nested under a non-directory"));
                }
                Ok(existing)
            }
            None => {
                let placeholder = ZipEntry::directory(dir.to_string());
                self.insert(placeholder)
            }
        }
    }

    /// Finds the entry for a path, reordering its bucket chain so the hit is
    /// found first next time.
    fn lookup(&mut self, path: &str) -> Option<usize> {
        if path.is_empty() {
            return Some(ROOT);
        }

        let bucket = path::hash_ci(path) as usize % self.buckets.len();
        let mut prev: Option<usize> = None;
        let mut cursor = self.buckets[bucket];

        while let Some(index) = cursor {
            if path::eq_ci(&self.entries[index].name, path) {
                if let Some(prev) = prev {
                    self.entries[prev].hash_next = self.entries[index].hash_next;
                    self.entries[index].hash_next = self.buckets[bucket];
                    self.buckets[bucket] = Some(index);
                }
                return Some(index);
            }
            prev = cursor;
            cursor = self.entries[index].hash_next;
        }

        None
    }

    /// Parses the entry's local file header, cross-checks it against the
    /// central directory, and moves the entry's offset to the first payload
    /// byte. Resolves symlinks through to their final target; safe to call
    /// repeatedly, and a cycle of symlinks is caught by re-entering an entry
    /// that is still mid-resolution.
    fn resolve(&mut self, index: usize) -> Result<(), Error> {
        match self.entries[index].kind {
            EntryKind::Directory | EntryKind::Resolved => return Ok(()),
            EntryKind::BrokenFile => return Err(Error::corrupt("entry failed to resolve")),
            EntryKind::BrokenSymlink => return Err(Error::corrupt("symlink failed to resolve")),
            EntryKind::Resolving => return Err(ErrorKind::SymlinkLoop.into()),
            EntryKind::UnresolvedFile | EntryKind::UnresolvedSymlink => {}
        }

        let is_symlink = self.entries[index].kind == EntryKind::UnresolvedSymlink;
        self.entries[index].kind = EntryKind::Resolving;

        let result = self.parse_local(index).and_then(|()| {
            if is_symlink {
                self.follow_symlink(index)
            } else {
                Ok(())
            }
        });

        match &result {
            Ok(()) => self.entries[index].kind = EntryKind::Resolved,
            Err(e) => {
                warn!("entry {:?} is broken: {}", self.entries[index].name, e);
                self.entries[index].kind = if is_symlink {
                    EntryKind::BrokenSymlink
                } else {
                    EntryKind::BrokenFile
                };
            }
        }

        result
    }

    fn parse_local(&mut self, index: usize) -> Result<(), Error> {
        let offset = self.entries[index].offset;
        let mut buf = [0u8; LocalHeaderFixed::SIZE];
        self.source
            .read_exact_at(&mut buf, offset)
            .map_err(Error::io)?;
        let local = LocalHeaderFixed::parse(&buf)?;

        // The central directory is the source of truth; the local header is
        // only cross-checked. Zeroed values (general bit 3 producers, Jar
        // tools) and the 0xFFFFFFFF Zip64 sentinel are tolerated.
        let entry = &self.entries[index];
        if local.version_needed != entry.version_needed {
            return Err(Error::corrupt("local header version disagrees"));
        }
        if local.crc32 != 0 && local.crc32 != entry.crc {
            return Err(Error::corrupt("local header checksum disagrees"));
        }
        if local.compressed_size != 0
            && local.compressed_size != u32::MAX
            && u64::from(local.compressed_size) != entry.compressed_size
        {
            return Err(Error::corrupt("local header compressed size disagrees"));
        }
        if local.uncompressed_size != 0
            && local.uncompressed_size != u32::MAX
            && u64::from(local.uncompressed_size) != entry.uncompressed_size
        {
            return Err(Error::corrupt("local header uncompressed size disagrees"));
        }

        let mut data_offset =
            offset + (LocalHeaderFixed::SIZE + local.variable_length()) as u64;

        // An AES payload is prefixed by the salt and the 2-byte password
        // verification value; consume both so the offset lands on the first
        // encrypted byte.
        let strength = self.entries[index].aes.as_ref().map(|aes| aes.strength);
        if let Some(strength) = strength {
            let salt_len = strength.salt_len();
            let mut prefix = [0u8; 16 + 2];
            self.source
                .read_exact_at(&mut prefix[..salt_len + 2], data_offset)
                .map_err(Error::io)?;

            if let Some(aes) = self.entries[index].aes.as_mut() {
                aes.salt[..salt_len].copy_from_slice(&prefix[..salt_len]);
                aes.verifier = [prefix[salt_len], prefix[salt_len + 1]];
            }
            data_offset += (salt_len + 2) as u64;
        }

        self.entries[index].offset = data_offset;
        Ok(())
    }

    fn follow_symlink(&mut self, index: usize) -> Result<(), Error> {
        let entry = &self.entries[index];
        if entry.uncompressed_size > MAX_LINK_TARGET_LEN
            || entry.compressed_size > MAX_LINK_TARGET_LEN + 64
        {
            return Err(Error::corrupt("symlink target too long"));
        }

        let size = entry.uncompressed_size as usize;
        let offset = entry.offset;
        let mut text = vec![0u8; size];

        if entry.compression_method == METHOD_STORE {
            self.source
                .read_exact_at(&mut text, offset)
                .map_err(Error::io)?;
        } else {
            let mut compressed = vec![0u8; entry.compressed_size as usize];
            self.source
                .read_exact_at(&mut compressed, offset)
                .map_err(Error::io)?;

            let mut inflater = Decompress::new(false);
            let status = inflater
                .decompress(&compressed, &mut text, FlushDecompress::Finish)
                .map_err(|_| Error::corrupt("symlink target failed to inflate"))?;
            if !matches!(status, Status::Ok | Status::StreamEnd)
                || inflater.total_out() != size as u64
            {
                return Err(Error::corrupt("symlink target failed to inflate"));
            }
        }

        let target = std::str::from_utf8(&text).map_err(Error::utf8)?;
        let dos_separators = self.entries[index].version_made_by >> 8 == 0;
        let resolved =
            path::resolve_link_target(&self.entries[index].name, target, dos_separators)
                .ok_or_else(|| Error::corrupt("symlink escapes the archive"))?;

        let target_index = self
            .lookup(&resolved)
            .ok_or_else(|| Error::from(ErrorKind::NotFound))?;
        self.resolve(target_index)?;

        // If the target was itself a symlink, adopt its final destination so
        // every redirect is a single hop.
        let final_index = self.entries[target_index].symlink.unwrap_or(target_index);
        self.entries[index].symlink = Some(final_index);
        Ok(())
    }

    /// Looks up a path and reports what it names.
    pub fn stat(&mut self, path: &str) -> Result<Metadata, Error> {
        let index = self.lookup(path).ok_or(ErrorKind::NotFound)?;
        Ok(metadata_of(&self.entries[index]))
    }

    /// Iterates the immediate children of a directory.
    pub fn read_dir(&mut self, path: &str) -> Result<ReadDir<'_>, Error> {
        let index = self.lookup(path).ok_or(ErrorKind::NotFound)?;
        if self.entries[index].kind != EntryKind::Directory {
            return Err(ErrorKind::NotFound.into());
        }

        Ok(ReadDir {
            entries: &self.entries,
            cursor: self.entries[index].children,
        })
    }

    /// Opens an entry for reading, resolving it on first use.
    ///
    /// When `path` has no entry but the archive contains encrypted data, the
    /// portion after the last `$` is peeled off and used as the password for
    /// the prefix; traditionally encrypted entries cannot be opened any
    /// other way. WinZip-AES entries ignore a supplied password in favor of
    /// [`BUILT_IN_AES_PASSWORD`]. Supplying a password for an unencrypted
    /// entry fails.
    pub fn open_read(&mut self, path: &str) -> Result<ZipReader<R>, Error> {
        let mut password: Option<&str> = None;
        let index = match self.lookup(path) {
            Some(index) => index,
            None => {
                if !self.has_encrypted {
                    return Err(ErrorKind::NotFound.into());
                }
                let (prefix, suffix) = path.rsplit_once('$').ok_or(ErrorKind::NotFound)?;
                let index = self.lookup(prefix).ok_or(ErrorKind::NotFound)?;
                password = Some(suffix);
                index
            }
        };

        self.resolve(index)?;
        let target = self.entries[index].symlink.unwrap_or(index);
        let entry = &self.entries[target];

        if entry.compression_method != METHOD_STORE && entry.compression_method != METHOD_DEFLATE {
            return Err(Error::corrupt("unsupported compression method"));
        }

        let (crypto, payload_offset, payload_len) = match (&entry.aes, entry.is_encrypted()) {
            (Some(aes), true) => {
                let overhead =
                    aes.strength.salt_len() as u64 + AES_VERIFIER_LEN + AES_AUTH_CODE_LEN;
                let payload_len = entry
                    .compressed_size
                    .checked_sub(overhead)
                    .ok_or_else(|| Error::corrupt("AES entry shorter than its overhead"))?;
                let cipher = AesCtrCipher::new(
                    BUILT_IN_AES_PASSWORD.as_bytes(),
                    aes.strength,
                    &aes.salt[..aes.strength.salt_len()],
                    &aes.verifier,
                )?;
                (CryptoState::Aes(cipher), entry.offset, payload_len)
            }
            (None, true) => {
                let password = password.ok_or(ErrorKind::BadPassword)?;
                let payload_len = entry
                    .compressed_size
                    .checked_sub(TRADITIONAL_HEADER_LEN)
                    .ok_or_else(|| Error::corrupt("encrypted entry shorter than its header"))?;

                let mut header = [0u8; TRADITIONAL_HEADER_LEN as usize];
                self.source
                    .read_exact_at(&mut header, entry.offset)
                    .map_err(Error::io)?;
                let cipher = TraditionalCipher::new(
                    password.as_bytes(),
                    &header,
                    entry.traditional_verifier(),
                )?;

                (
                    CryptoState::Traditional(cipher),
                    entry.offset + TRADITIONAL_HEADER_LEN,
                    payload_len,
                )
            }
            (_, false) => {
                if password.is_some() {
                    return Err(ErrorKind::BadPassword.into());
                }
                (CryptoState::Plain, entry.offset, entry.compressed_size)
            }
        };

        Ok(ZipReader::new(
            Arc::clone(&self.source),
            entry.compression_method,
            entry.uncompressed_size,
            payload_offset,
            payload_len,
            crypto,
        ))
    }

    /// Part of the mount contract; archives are read-only.
    pub fn open_write(&mut self, _path: &str) -> Result<ZipReader<R>, Error> {
        Err(ErrorKind::ReadOnly.into())
    }

    /// Part of the mount contract; archives are read-only.
    pub fn open_append(&mut self, _path: &str) -> Result<ZipReader<R>, Error> {
        Err(ErrorKind::ReadOnly.into())
    }

    /// Part of the mount contract; archives are read-only.
    pub fn remove(&mut self, _path: &str) -> Result<(), Error> {
        Err(ErrorKind::ReadOnly.into())
    }

    /// Part of the mount contract; archives are read-only.
    pub fn mkdir(&mut self, _path: &str) -> Result<(), Error> {
        Err(ErrorKind::ReadOnly.into())
    }
}

fn metadata_of(entry: &ZipEntry) -> Metadata {
    let (file_type, file_size) = if entry.kind == EntryKind::Directory {
        (FileType::Directory, 0)
    } else if entry.is_symlink() {
        (FileType::Symlink, 0)
    } else {
        (FileType::Regular, entry.uncompressed_size)
    };

    Metadata {
        file_type,
        file_size,
        mod_time: entry.last_mod_time,
        create_time: entry.last_mod_time,
        access_time: 0,
        read_only: true,
    }
}

/// Iterator over the immediate children of a directory.
pub struct ReadDir<'archive> {
    entries: &'archive [ZipEntry],
    cursor: Option<usize>,
}

impl<'archive> Iterator for ReadDir<'archive> {
    type Item = DirEntry<'archive>;

    fn next(&mut self) -> Option<Self::Item> {
        let index = self.cursor?;
        let entry = &self.entries[index];
        self.cursor = entry.sibling;

        Some(DirEntry {
            name: path::basename(&entry.name),
            metadata: metadata_of(entry),
        })
    }
}

/// One directory child: its basename and what stat would say about it.
pub struct DirEntry<'archive> {
    name: &'archive str,
    metadata: Metadata,
}

impl<'archive> DirEntry<'archive> {
    pub fn name(&self) -> &'archive str {
        self.name
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn file_type(&self) -> FileType {
        self.metadata.file_type
    }
}
