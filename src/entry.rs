//! One entry per name in the archive, plus the record parsing that produces
//! them from central-directory and local-file headers.

use crate::crypto::AesStrength;
use crate::errors::{Error, ErrorKind};
use crate::source::{le_u16, le_u32, le_u64};
use crate::time;

pub(crate) const CENTRAL_HEADER_SIGNATURE: u32 = 0x02014b50;
pub(crate) const LOCAL_HEADER_SIGNATURE: u32 = 0x04034b50;

const ZIP64_EXTRA_FIELD: u16 = 0x0001;
const AES_EXTRA_FIELD: u16 = 0x9901;
const AES_VENDOR_ID: u16 = 0x4541; // 'AE'

pub(crate) const METHOD_STORE: u16 = 0;
pub(crate) const METHOD_DEFLATE: u16 = 8;
/// Not a real compression method; marks the entry as AES-wrapped until the
/// 0x9901 extra field supplies the actual one.
pub(crate) const METHOD_AES: u16 = 99;

pub(crate) const GENERAL_BIT_ENCRYPTED: u16 = 1 << 0;
pub(crate) const GENERAL_BIT_IGNORE_LOCAL_HEADER: u16 = 1 << 3;

const UNIX_FILETYPE_MASK: u32 = 0o170000;
const UNIX_FILETYPE_SYMLINK: u32 = 0o120000;

/// Resolution state of an entry.
///
/// Entries are unresolved until first opened: only then is the local file
/// header parsed, the data offset fixed up, and any symlink followed. The
/// transient `Resolving` state is what catches symlink cycles, and broken
/// entries stay broken so repeat opens fail fast.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    UnresolvedFile,
    UnresolvedSymlink,
    Resolving,
    Resolved,
    Directory,
    BrokenFile,
    BrokenSymlink,
}

#[derive(Debug, Clone)]
pub(crate) struct AesParams {
    pub strength: AesStrength,
    /// Salt read from the payload prefix during resolution.
    pub salt: [u8; 16],
    /// Password verification value following the salt.
    pub verifier: [u8; 2],
}

#[derive(Debug)]
pub(crate) struct ZipEntry {
    /// Slash-separated UTF-8 path, no leading or trailing slash.
    pub name: String,
    pub kind: EntryKind,
    /// Final non-symlink target, populated by resolution.
    pub symlink: Option<usize>,
    /// Offset of the local file header until resolution fixes it up to the
    /// first payload byte. Already biased by the archive's data start.
    pub offset: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub general_bits: u16,
    pub compression_method: u16,
    pub crc: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// Seconds since the Unix epoch; 0 marks a fabricated placeholder.
    pub last_mod_time: i64,
    pub dos_mod_time: u32,
    pub aes: Option<AesParams>,
    // Bucket chain and directory-tree links, indices into the archive's
    // entry table.
    pub hash_next: Option<usize>,
    pub children: Option<usize>,
    pub sibling: Option<usize>,
}

impl ZipEntry {
    /// A synthetic directory: the archive root or a fabricated ancestor of a
    /// file whose parent has no record of its own.
    pub fn directory(name: String) -> ZipEntry {
        ZipEntry {
            name,
            kind: EntryKind::Directory,
            symlink: None,
            offset: 0,
            version_made_by: 0,
            version_needed: 0,
            general_bits: 0,
            compression_method: METHOD_STORE,
            crc: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            last_mod_time: 0,
            dos_mod_time: 0,
            aes: None,
            hash_next: None,
            children: None,
            sibling: None,
        }
    }

    /// Builds an entry from a central-directory record: the fixed portion and
    /// the variable data (name, extra fields, comment) that follows it.
    /// Offsets come out biased by `data_start` so they address the physical
    /// stream even when the archive has a self-extractor prefix.
    pub fn from_central(
        fixed: &CentralRecordFixed,
        variable: &[u8],
        data_start: u64,
    ) -> Result<ZipEntry, Error> {
        let name_len = fixed.file_name_len as usize;
        let extra_len = fixed.extra_field_len as usize;
        if variable.len() < name_len + extra_len {
            return Err(Error::from(ErrorKind::Eof));
        }

        let name = std::str::from_utf8(&variable[..name_len]).map_err(Error::utf8)?;
        let mut name = if fixed.version_made_by >> 8 == 0 {
            // FAT-hosted zippers of old wrote backslash separators
            name.replace('\\', "/")
        } else {
            name.to_string()
        };

        let mut compressed_size = u64::from(fixed.compressed_size);
        let mut uncompressed_size = u64::from(fixed.uncompressed_size);
        let mut offset = u64::from(fixed.local_header_offset);
        let mut starting_disk = u32::from(fixed.disk_number_start);
        let mut compression_method = fixed.compression_method;
        let mut aes = None;

        let mut extra = &variable[name_len..name_len + extra_len];
        while extra.len() >= 4 {
            let id = le_u16(&extra[0..2]);
            let len = le_u16(&extra[2..4]) as usize;
            extra = &extra[4..];
            if extra.len() < len {
                return Err(Error::corrupt("extra field overruns its container"));
            }
            let (mut field, rest) = extra.split_at(len);
            extra = rest;

            match id {
                ZIP64_EXTRA_FIELD => {
                    // Widened values appear in this fixed order, each present
                    // only when its 32-bit field holds the sentinel (4.5.3).
                    if fixed.uncompressed_size == u32::MAX {
                        uncompressed_size = take_u64(&mut field)?;
                    }
                    if fixed.compressed_size == u32::MAX {
                        compressed_size = take_u64(&mut field)?;
                    }
                    if fixed.local_header_offset == u32::MAX {
                        offset = take_u64(&mut field)?;
                    }
                    if fixed.disk_number_start == u16::MAX {
                        starting_disk = take_u32(&mut field)?;
                    }
                    if !field.is_empty() {
                        return Err(Error::corrupt("trailing bytes in zip64 extra field"));
                    }
                }
                AES_EXTRA_FIELD if compression_method == METHOD_AES => {
                    if field.len() != 7 {
                        return Err(Error::corrupt("AES extra field size"));
                    }
                    let vendor_version = le_u16(&field[0..2]);
                    if vendor_version != 1 && vendor_version != 2 {
                        return Err(Error::corrupt("unknown AES vendor version"));
                    }
                    if le_u16(&field[2..4]) != AES_VENDOR_ID {
                        return Err(Error::corrupt("unknown AES vendor id"));
                    }
                    let strength = AesStrength::from_tag(field[4])
                        .ok_or_else(|| Error::corrupt("unknown AES key strength"))?;
                    let actual_method = le_u16(&field[5..7]);
                    if actual_method != METHOD_STORE {
                        return Err(Error::corrupt("unsupported compression under AES"));
                    }
                    compression_method = actual_method;
                    aes = Some(AesParams {
                        strength,
                        salt: [0; 16],
                        verifier: [0; 2],
                    });
                }
                _ => {}
            }
        }

        if compression_method == METHOD_AES {
            return Err(Error::corrupt("AES entry without 0x9901 extra field"));
        }
        if starting_disk != 0 {
            return Err(Error::corrupt("entry starts on a nonzero disk"));
        }
        if name.is_empty() {
            return Err(Error::corrupt("entry with empty name"));
        }

        let kind = if name.ends_with('/') {
            name.pop();
            if name.is_empty() {
                return Err(Error::corrupt("entry with empty name"));
            }
            EntryKind::Directory
        } else if host_does_symlinks(fixed.version_made_by)
            && uncompressed_size > 0
            && (fixed.external_file_attrs >> 16) & UNIX_FILETYPE_MASK == UNIX_FILETYPE_SYMLINK
        {
            EntryKind::UnresolvedSymlink
        } else {
            EntryKind::UnresolvedFile
        };

        let dos_mod_time = fixed.dos_mod_time();

        Ok(ZipEntry {
            name,
            kind,
            symlink: None,
            offset: offset + data_start,
            version_made_by: fixed.version_made_by,
            version_needed: fixed.version_needed,
            general_bits: fixed.flags,
            compression_method,
            crc: fixed.crc32,
            compressed_size,
            uncompressed_size,
            last_mod_time: time::dos_to_epoch(dos_mod_time),
            dos_mod_time,
            aes,
            hash_next: None,
            children: None,
            sibling: None,
        })
    }

    /// Overwrites this (placeholder) entry's metadata from a real record for
    /// the same name. Tree and bucket links, and the directory kind, are
    /// deliberately left alone.
    pub fn absorb_record(&mut self, record: &ZipEntry) {
        self.offset = record.offset;
        self.version_made_by = record.version_made_by;
        self.version_needed = record.version_needed;
        self.general_bits = record.general_bits;
        self.compression_method = record.compression_method;
        self.crc = record.crc;
        self.compressed_size = record.compressed_size;
        self.uncompressed_size = record.uncompressed_size;
        self.last_mod_time = record.last_mod_time;
        self.dos_mod_time = record.dos_mod_time;
        self.aes = record.aes.clone();
    }

    pub fn is_encrypted(&self) -> bool {
        self.general_bits & GENERAL_BIT_ENCRYPTED != 0
    }

    /// Symlink-ness is visible before resolution through the unresolved and
    /// broken states, and after it through the redirect.
    pub fn is_symlink(&self) -> bool {
        matches!(
            self.kind,
            EntryKind::UnresolvedSymlink | EntryKind::BrokenSymlink
        ) || self.symlink.is_some()
    }

    /// The byte the decrypted traditional header must end with. Producers
    /// that set general bit 3 wrote zeros for the CRC, so the check falls
    /// back to the high byte of the DOS timestamp (an Info-ZIP discovery;
    /// APPNOTE never mentions it).
    pub fn traditional_verifier(&self) -> u8 {
        if self.general_bits & GENERAL_BIT_IGNORE_LOCAL_HEADER != 0 {
            (self.dos_mod_time >> 8) as u8
        } else {
            (self.crc >> 24) as u8
        }
    }
}

fn take_u64(field: &mut &[u8]) -> Result<u64, Error> {
    if field.len() < 8 {
        return Err(Error::corrupt("zip64 extra field too short"));
    }
    let value = le_u64(&field[..8]);
    *field = &field[8..];
    Ok(value)
}

fn take_u32(field: &mut &[u8]) -> Result<u32, Error> {
    if field.len() < 4 {
        return Err(Error::corrupt("zip64 extra field too short"));
    }
    let value = le_u32(&field[..4]);
    *field = &field[4..];
    Ok(value)
}

/// Whether the creating host stores symlinks, per the Info-ZIP project's
/// list of platforms that cannot (4.4.2.1 names the host codes).
fn host_does_symlinks(version_made_by: u16) -> bool {
    !matches!(
        version_made_by >> 8,
        0 |  // FAT
        1 |  // Amiga
        2 |  // VMS
        4 |  // VM/CMS
        6 |  // HPFS
        11 | // NTFS
        13 | // Acorn
        14 | // VFAT
        15 | // MVS
        18 // THEOS
    )
}

/// The fixed 46-byte portion of a central directory record (4.3.12).
#[derive(Debug)]
#[allow(dead_code)]
pub(crate) struct CentralRecordFixed {
    pub signature: u32,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_len: u16,
    pub extra_field_len: u16,
    pub file_comment_len: u16,
    pub disk_number_start: u16,
    pub internal_file_attrs: u16,
    pub external_file_attrs: u32,
    pub local_header_offset: u32,
}

impl CentralRecordFixed {
    pub(crate) const SIZE: usize = 46;

    pub fn parse(data: &[u8]) -> Result<CentralRecordFixed, Error> {
        if data.len() < Self::SIZE {
            return Err(Error::from(ErrorKind::Eof));
        }

        let result = CentralRecordFixed {
            signature: le_u32(&data[0..4]),
            version_made_by: le_u16(&data[4..6]),
            version_needed: le_u16(&data[6..8]),
            flags: le_u16(&data[8..10]),
            compression_method: le_u16(&data[10..12]),
            last_mod_time: le_u16(&data[12..14]),
            last_mod_date: le_u16(&data[14..16]),
            crc32: le_u32(&data[16..20]),
            compressed_size: le_u32(&data[20..24]),
            uncompressed_size: le_u32(&data[24..28]),
            file_name_len: le_u16(&data[28..30]),
            extra_field_len: le_u16(&data[30..32]),
            file_comment_len: le_u16(&data[32..34]),
            disk_number_start: le_u16(&data[34..36]),
            internal_file_attrs: le_u16(&data[36..38]),
            external_file_attrs: le_u32(&data[38..42]),
            local_header_offset: le_u32(&data[42..46]),
        };

        if result.signature != CENTRAL_HEADER_SIGNATURE {
            return Err(Error::corrupt("central directory signature mismatch"));
        }

        Ok(result)
    }

    pub fn variable_length(&self) -> usize {
        self.file_name_len as usize + self.extra_field_len as usize + self.file_comment_len as usize
    }

    fn dos_mod_time(&self) -> u32 {
        (u32::from(self.last_mod_date) << 16) | u32::from(self.last_mod_time)
    }
}

/// The fixed 30-byte portion of a local file header (4.3.7).
#[derive(Debug)]
#[allow(dead_code)]
pub(crate) struct LocalHeaderFixed {
    pub signature: u32,
    pub version_needed: u16,
    pub flags: u16,
    pub compression_method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name_len: u16,
    pub extra_field_len: u16,
}

impl LocalHeaderFixed {
    pub(crate) const SIZE: usize = 30;

    pub fn parse(data: &[u8]) -> Result<LocalHeaderFixed, Error> {
        if data.len() < Self::SIZE {
            return Err(Error::from(ErrorKind::Eof));
        }

        let result = LocalHeaderFixed {
            signature: le_u32(&data[0..4]),
            version_needed: le_u16(&data[4..6]),
            flags: le_u16(&data[6..8]),
            compression_method: le_u16(&data[8..10]),
            last_mod_time: le_u16(&data[10..12]),
            last_mod_date: le_u16(&data[12..14]),
            crc32: le_u32(&data[14..18]),
            compressed_size: le_u32(&data[18..22]),
            uncompressed_size: le_u32(&data[22..26]),
            file_name_len: le_u16(&data[26..28]),
            extra_field_len: le_u16(&data[28..30]),
        };

        if result.signature != LOCAL_HEADER_SIGNATURE {
            return Err(Error::corrupt("local file header signature mismatch"));
        }

        Ok(result)
    }

    pub fn variable_length(&self) -> usize {
        self.file_name_len as usize + self.extra_field_len as usize
    }
}
