//! In-memory zip archive construction for the integration suite.
//!
//! The writer here is deliberately independent of the crate under test: it
//! carries its own implementations of the traditional keystream and the
//! WinZip AES derivation, so the decryption paths are checked against a
//! second encoding of the algorithms rather than against themselves.

use aes::cipher::{BlockEncrypt, KeyInit};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use sha1::Sha1;
use std::io::Write;
use zipfs::crc32;

const LOCAL_SIG: u32 = 0x04034b50;
const CENTRAL_SIG: u32 = 0x02014b50;
const EOCD_SIG: u32 = 0x06054b50;
const EOCD64_SIG: u32 = 0x06064b50;
const EOCD64_LOCATOR_SIG: u32 = 0x07064b50;

// 2024-06-15 12:30:20, midday local time so every zone can represent it
const DOS_DATE: u16 = (44 << 9) | (6 << 5) | 15;
const DOS_TIME: u16 = (12 << 11) | (30 << 5) | 10;

const VERSION_UNIX: u16 = (3 << 8) | 20;

struct PendingEntry {
    name: Vec<u8>,
    version_made_by: u16,
    version_needed: u16,
    flags: u16,
    method: u16,
    crc: u32,
    uncompressed_size: u64,
    external_attrs: u32,
    central_extra: Vec<u8>,
    /// Archive-relative offset of the local header.
    local_offset: u64,
    payload_len: u64,
    force_zip64_sizes: bool,
}

pub struct ZipBuilder {
    out: Vec<u8>,
    prefix_len: u64,
    entries: Vec<PendingEntry>,
    comment: Vec<u8>,
    zip64_trailer: bool,
}

impl ZipBuilder {
    pub fn new() -> ZipBuilder {
        ZipBuilder::with_prefix(&[])
    }

    /// Starts an archive preceded by arbitrary non-archive bytes, the way a
    /// self-extracting executable carries its stub.
    pub fn with_prefix(prefix: &[u8]) -> ZipBuilder {
        ZipBuilder {
            out: prefix.to_vec(),
            prefix_len: prefix.len() as u64,
            entries: Vec::new(),
            comment: Vec::new(),
            zip64_trailer: false,
        }
    }

    pub fn comment(mut self, comment: &[u8]) -> ZipBuilder {
        self.comment = comment.to_vec();
        self
    }

    pub fn zip64_trailer(mut self) -> ZipBuilder {
        self.zip64_trailer = true;
        self
    }

    pub fn stored(self, name: &str, data: &[u8]) -> ZipBuilder {
        self.add(EntrySpec {
            name,
            method: 0,
            crc: crc32(data),
            payload: data.to_vec(),
            uncompressed_size: data.len() as u64,
            ..EntrySpec::default()
        })
    }

    pub fn deflated(self, name: &str, data: &[u8]) -> ZipBuilder {
        self.add(EntrySpec {
            name,
            method: 8,
            crc: crc32(data),
            payload: deflate(data),
            uncompressed_size: data.len() as u64,
            ..EntrySpec::default()
        })
    }

    pub fn dir(self, name: &str) -> ZipBuilder {
        assert!(name.ends_with('/'), "directory names carry their slash");
        self.add(EntrySpec {
            name,
            method: 0,
            crc: 0,
            payload: Vec::new(),
            uncompressed_size: 0,
            external_attrs: 0o040755 << 16,
            ..EntrySpec::default()
        })
    }

    pub fn symlink(self, name: &str, target: &str) -> ZipBuilder {
        self.add(EntrySpec {
            name,
            method: 0,
            crc: crc32(target.as_bytes()),
            payload: target.as_bytes().to_vec(),
            uncompressed_size: target.len() as u64,
            version_made_by: VERSION_UNIX,
            external_attrs: 0o120777 << 16,
            ..EntrySpec::default()
        })
    }

    /// A traditionally encrypted entry: 12-byte header, keystream over
    /// header and payload, password verifier in the header's last byte.
    pub fn traditional(self, name: &str, data: &[u8], password: &str, deflated: bool) -> ZipBuilder {
        let crc = crc32(data);
        let inner = if deflated { deflate(data) } else { data.to_vec() };

        let mut keys = ZipCryptoKeys::new();
        for &b in password.as_bytes() {
            keys.update(b);
        }

        let mut header = [0x5Au8; 12];
        header[11] = (crc >> 24) as u8;

        let mut payload = Vec::with_capacity(12 + inner.len());
        for p in header.into_iter().chain(inner) {
            payload.push(p ^ keys.stream_byte());
            keys.update(p);
        }

        self.add(EntrySpec {
            name,
            method: if deflated { 8 } else { 0 },
            flags: 1,
            crc,
            payload,
            uncompressed_size: data.len() as u64,
            ..EntrySpec::default()
        })
    }

    /// A WinZip AES entry (AE-2): salt, 2-byte verifier, CTR ciphertext and
    /// a placeholder authentication code, wrapped in the 0x9901 extra field.
    pub fn aes(self, name: &str, data: &[u8], strength_tag: u8, password: &str) -> ZipBuilder {
        let (salt_len, key_len) = match strength_tag {
            1 => (8, 16),
            2 => (12, 24),
            3 => (16, 32),
            _ => panic!("unknown strength tag {strength_tag}"),
        };
        let salt: Vec<u8> = (1..=salt_len as u8).collect();

        let mut derived = vec![0u8; 2 * key_len + 2];
        pbkdf2::pbkdf2_hmac::<Sha1>(password.as_bytes(), &salt, 1000, &mut derived);

        let mut ciphertext = data.to_vec();
        aes_ctr_apply(&derived[..key_len], &mut ciphertext);

        let mut payload = salt;
        payload.extend_from_slice(&derived[2 * key_len..]);
        payload.extend_from_slice(&ciphertext);
        payload.extend_from_slice(&[0u8; 10]); // authentication code, unchecked

        let mut extra = Vec::new();
        extra.extend_from_slice(&0x9901u16.to_le_bytes());
        extra.extend_from_slice(&7u16.to_le_bytes());
        extra.extend_from_slice(&2u16.to_le_bytes()); // AE-2
        extra.extend_from_slice(&0x4541u16.to_le_bytes());
        extra.push(strength_tag);
        extra.extend_from_slice(&0u16.to_le_bytes()); // stored underneath

        self.add(EntrySpec {
            name,
            method: 99,
            flags: 1,
            crc: 0, // AE-2 zeroes the checksum
            payload,
            uncompressed_size: data.len() as u64,
            central_extra: extra,
            ..EntrySpec::default()
        })
    }

    /// A stored entry whose sizes and offset ride in a zip64 extended
    /// information extra field behind 0xFFFFFFFF sentinels.
    pub fn zip64_stored(self, name: &str, data: &[u8]) -> ZipBuilder {
        self.add(EntrySpec {
            name,
            method: 0,
            crc: crc32(data),
            payload: data.to_vec(),
            uncompressed_size: data.len() as u64,
            force_zip64_sizes: true,
            ..EntrySpec::default()
        })
    }

    fn add(mut self, spec: EntrySpec) -> ZipBuilder {
        let local_offset = self.out.len() as u64 - self.prefix_len;
        let (local_compressed, local_uncompressed) = if spec.force_zip64_sizes {
            (u32::MAX, u32::MAX)
        } else {
            (spec.payload.len() as u32, spec.uncompressed_size as u32)
        };

        self.out.extend_from_slice(&LOCAL_SIG.to_le_bytes());
        self.out.extend_from_slice(&spec.version_needed.to_le_bytes());
        self.out.extend_from_slice(&spec.flags.to_le_bytes());
        self.out.extend_from_slice(&spec.method.to_le_bytes());
        self.out.extend_from_slice(&DOS_TIME.to_le_bytes());
        self.out.extend_from_slice(&DOS_DATE.to_le_bytes());
        self.out.extend_from_slice(&spec.crc.to_le_bytes());
        self.out.extend_from_slice(&local_compressed.to_le_bytes());
        self.out.extend_from_slice(&local_uncompressed.to_le_bytes());
        self.out
            .extend_from_slice(&(spec.name.len() as u16).to_le_bytes());
        self.out.extend_from_slice(&0u16.to_le_bytes());
        self.out.extend_from_slice(spec.name.as_bytes());
        self.out.extend_from_slice(&spec.payload);

        self.entries.push(PendingEntry {
            name: spec.name.as_bytes().to_vec(),
            version_made_by: spec.version_made_by,
            version_needed: spec.version_needed,
            flags: spec.flags,
            method: spec.method,
            crc: spec.crc,
            uncompressed_size: spec.uncompressed_size,
            external_attrs: spec.external_attrs,
            central_extra: spec.central_extra,
            local_offset,
            payload_len: spec.payload.len() as u64,
            force_zip64_sizes: spec.force_zip64_sizes,
        });
        self
    }

    pub fn build(mut self) -> Vec<u8> {
        let central_offset = self.out.len() as u64 - self.prefix_len;
        let mut central = Vec::new();

        for entry in &self.entries {
            let mut extra = entry.central_extra.clone();
            let (compressed, uncompressed, offset) = if entry.force_zip64_sizes {
                extra.extend_from_slice(&0x0001u16.to_le_bytes());
                extra.extend_from_slice(&24u16.to_le_bytes());
                extra.extend_from_slice(&entry.uncompressed_size.to_le_bytes());
                extra.extend_from_slice(&entry.payload_len.to_le_bytes());
                extra.extend_from_slice(&entry.local_offset.to_le_bytes());
                (u32::MAX, u32::MAX, u32::MAX)
            } else {
                (
                    entry.payload_len as u32,
                    entry.uncompressed_size as u32,
                    entry.local_offset as u32,
                )
            };

            central.extend_from_slice(&CENTRAL_SIG.to_le_bytes());
            central.extend_from_slice(&entry.version_made_by.to_le_bytes());
            central.extend_from_slice(&entry.version_needed.to_le_bytes());
            central.extend_from_slice(&entry.flags.to_le_bytes());
            central.extend_from_slice(&entry.method.to_le_bytes());
            central.extend_from_slice(&DOS_TIME.to_le_bytes());
            central.extend_from_slice(&DOS_DATE.to_le_bytes());
            central.extend_from_slice(&entry.crc.to_le_bytes());
            central.extend_from_slice(&compressed.to_le_bytes());
            central.extend_from_slice(&uncompressed.to_le_bytes());
            central.extend_from_slice(&(entry.name.len() as u16).to_le_bytes());
            central.extend_from_slice(&(extra.len() as u16).to_le_bytes());
            central.extend_from_slice(&0u16.to_le_bytes()); // comment
            central.extend_from_slice(&0u16.to_le_bytes()); // disk start
            central.extend_from_slice(&0u16.to_le_bytes()); // internal attrs
            central.extend_from_slice(&entry.external_attrs.to_le_bytes());
            central.extend_from_slice(&offset.to_le_bytes());
            central.extend_from_slice(&entry.name);
            central.extend_from_slice(&extra);
        }

        let central_len = central.len() as u64;
        let count = self.entries.len() as u64;
        self.out.extend_from_slice(&central);

        if self.zip64_trailer {
            let record_offset = self.out.len() as u64 - self.prefix_len;

            self.out.extend_from_slice(&EOCD64_SIG.to_le_bytes());
            self.out.extend_from_slice(&44u64.to_le_bytes());
            self.out.extend_from_slice(&45u16.to_le_bytes()); // version made by
            self.out.extend_from_slice(&45u16.to_le_bytes()); // version needed
            self.out.extend_from_slice(&0u32.to_le_bytes());
            self.out.extend_from_slice(&0u32.to_le_bytes());
            self.out.extend_from_slice(&count.to_le_bytes());
            self.out.extend_from_slice(&count.to_le_bytes());
            self.out.extend_from_slice(&central_len.to_le_bytes());
            self.out.extend_from_slice(&central_offset.to_le_bytes());

            self.out
                .extend_from_slice(&EOCD64_LOCATOR_SIG.to_le_bytes());
            self.out.extend_from_slice(&0u32.to_le_bytes());
            self.out.extend_from_slice(&record_offset.to_le_bytes());
            self.out.extend_from_slice(&1u32.to_le_bytes());

            self.out.extend_from_slice(&EOCD_SIG.to_le_bytes());
            self.out.extend_from_slice(&[0; 4]);
            self.out.extend_from_slice(&u16::MAX.to_le_bytes());
            self.out.extend_from_slice(&u16::MAX.to_le_bytes());
            self.out.extend_from_slice(&u32::MAX.to_le_bytes());
            self.out.extend_from_slice(&u32::MAX.to_le_bytes());
            self.out
                .extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        } else {
            self.out.extend_from_slice(&EOCD_SIG.to_le_bytes());
            self.out.extend_from_slice(&[0; 4]);
            self.out
                .extend_from_slice(&(count as u16).to_le_bytes());
            self.out
                .extend_from_slice(&(count as u16).to_le_bytes());
            self.out
                .extend_from_slice(&(central_len as u32).to_le_bytes());
            self.out
                .extend_from_slice(&(central_offset as u32).to_le_bytes());
            self.out
                .extend_from_slice(&(self.comment.len() as u16).to_le_bytes());
        }
        self.out.extend_from_slice(&self.comment);

        self.out
    }
}

struct EntrySpec<'a> {
    name: &'a str,
    version_made_by: u16,
    version_needed: u16,
    flags: u16,
    method: u16,
    crc: u32,
    payload: Vec<u8>,
    uncompressed_size: u64,
    external_attrs: u32,
    central_extra: Vec<u8>,
    force_zip64_sizes: bool,
}

impl Default for EntrySpec<'_> {
    fn default() -> Self {
        EntrySpec {
            name: "",
            version_made_by: 0,
            version_needed: 20,
            flags: 0,
            method: 0,
            crc: 0,
            payload: Vec::new(),
            uncompressed_size: 0,
            external_attrs: 0,
            central_extra: Vec::new(),
            force_zip64_sizes: false,
        }
    }
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

struct ZipCryptoKeys([u32; 3]);

impl ZipCryptoKeys {
    fn new() -> ZipCryptoKeys {
        ZipCryptoKeys([0x12345678, 0x23456789, 0x34567890])
    }

    fn crc_step(crc: u32, val: u8) -> u32 {
        let mut x = (crc ^ u32::from(val)) & 0xFF;
        for _ in 0..8 {
            x = if x & 1 != 0 { 0xEDB88320 ^ (x >> 1) } else { x >> 1 };
        }
        x ^ (crc >> 8)
    }

    fn update(&mut self, plain: u8) {
        self.0[0] = Self::crc_step(self.0[0], plain);
        self.0[1] = self.0[1]
            .wrapping_add(self.0[0] & 0xFF)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        self.0[2] = Self::crc_step(self.0[2], (self.0[1] >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let tmp = (self.0[2] | 2) & 0xFFFF;
        (tmp.wrapping_mul(tmp ^ 1) >> 8) as u8
    }
}

/// CTR keystream with a little-endian 64-bit block counter starting at 1,
/// as WinZip AES specifies.
fn aes_ctr_apply(key: &[u8], data: &mut [u8]) {
    enum AnyAes {
        A128(aes::Aes128),
        A192(aes::Aes192),
        A256(aes::Aes256),
    }

    let cipher = match key.len() {
        16 => AnyAes::A128(aes::Aes128::new_from_slice(key).unwrap()),
        24 => AnyAes::A192(aes::Aes192::new_from_slice(key).unwrap()),
        32 => AnyAes::A256(aes::Aes256::new_from_slice(key).unwrap()),
        n => panic!("bad key length {n}"),
    };

    for (block_index, chunk) in data.chunks_mut(16).enumerate() {
        let mut block = [0u8; 16];
        block[..8].copy_from_slice(&(block_index as u64 + 1).to_le_bytes());
        let ga = aes::cipher::generic_array::GenericArray::from_mut_slice(&mut block[..]);
        match &cipher {
            AnyAes::A128(c) => c.encrypt_block(ga),
            AnyAes::A192(c) => c.encrypt_block(ga),
            AnyAes::A256(c) => c.encrypt_block(ga),
        }
        for (b, k) in chunk.iter_mut().zip(block.iter()) {
            *b ^= k;
        }
    }
}
