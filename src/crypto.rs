//! Decryption support for the two encryption schemes found in zip archives.
//!
//! Both sit *below* decompression: bytes coming off the archive are decrypted
//! first and only then handed to the inflater.
//!
//! The traditional PKWARE stream cipher (APPNOTE 6.1) keys three 32-bit
//! registers from the password and a 12-byte header preceding the payload.
//! The keystream depends on every plaintext byte produced so far, which is
//! why backward seeks in traditionally-encrypted entries have to replay from
//! the start; the initial key state is snapshotted for that purpose.
//!
//! WinZip AES (compression method 99, extra field 0x9901) is AES in CTR mode
//! with keys derived by PBKDF2-HMAC-SHA1 over a per-entry salt. The counter
//! is a little-endian 64-bit block index starting at 1, so the keystream for
//! any payload offset can be reconstructed directly and seeks are cheap.

use crate::crc::crc32_step;
use crate::errors::{Error, ErrorKind};
use aes::cipher::{BlockEncrypt, KeyInit};
use constant_time_eq::constant_time_eq;
use sha1::Sha1;

/// Bytes of encrypted header preceding a traditionally-encrypted payload.
pub(crate) const TRADITIONAL_HEADER_LEN: u64 = 12;

/// Bytes of authentication code trailing a WinZip AES payload. Stored but
/// not verified, like the CRC.
pub(crate) const AES_AUTH_CODE_LEN: u64 = 10;

/// Bytes of password-verification value between the salt and the payload.
pub(crate) const AES_VERIFIER_LEN: u64 = 2;

const AES_BLOCK_LEN: usize = 16;
const PBKDF2_ROUNDS: u32 = 1000;

/// Password for WinZip AES entries.
///
/// Archives consumed by this back-end are produced by a packaging step that
/// encrypts with this fixed password; there is no per-archive configuration.
pub const BUILT_IN_AES_PASSWORD: &str =
    "t7#Vd0qRw!xK5n)fYhB2eZ9uLc8*Gm3pJaS6%iTqD4kHybN1oEwRzPl0MvXfCg7A";

#[derive(Debug, Clone, Copy)]
struct TraditionalKeys([u32; 3]);

impl TraditionalKeys {
    fn new() -> Self {
        TraditionalKeys([0x12345678, 0x23456789, 0x34567890])
    }

    fn update(&mut self, plain: u8) {
        let [k0, k1, k2] = &mut self.0;
        *k0 = crc32_step(*k0, plain);
        *k1 = k1
            .wrapping_add(*k0 & 0xFF)
            .wrapping_mul(134775813)
            .wrapping_add(1);
        *k2 = crc32_step(*k2, (*k1 >> 24) as u8);
    }

    fn stream_byte(&self) -> u8 {
        let tmp = (self.0[2] | 2) & 0xFFFF;
        (tmp.wrapping_mul(tmp ^ 1) >> 8) as u8
    }

    fn decrypt(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            let plain = *b ^ self.stream_byte();
            self.update(plain);
            *b = plain;
        }
    }
}

/// Per-reader state for the traditional PKWARE cipher.
#[derive(Debug, Clone)]
pub(crate) struct TraditionalCipher {
    keys: TraditionalKeys,
    initial: TraditionalKeys,
}

impl TraditionalCipher {
    /// Feeds the password and the entry's 12-byte encryption header through
    /// the key schedule. The final decrypted header byte must match
    /// `verifier`; a mismatch means the password is wrong, modulo the 1/256
    /// collision chance the format allows.
    pub fn new(password: &[u8], header: &[u8; 12], verifier: u8) -> Result<Self, Error> {
        let mut keys = TraditionalKeys::new();
        for &b in password {
            keys.update(b);
        }

        let mut last = 0u8;
        for &b in header {
            let plain = b ^ keys.stream_byte();
            keys.update(plain);
            last = plain;
        }

        if last != verifier {
            return Err(ErrorKind::BadPassword.into());
        }

        Ok(TraditionalCipher {
            keys,
            initial: keys,
        })
    }

    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.keys.decrypt(buf);
    }

    /// Restores the key state captured right after header verification, for
    /// replaying the payload from byte 0.
    pub fn rewind(&mut self) {
        self.keys = self.initial;
    }

    /// An independent cipher positioned at the start of the payload.
    pub fn duplicate(&self) -> TraditionalCipher {
        TraditionalCipher {
            keys: self.initial,
            initial: self.initial,
        }
    }
}

/// AES key strength from the 0x9901 extra field's mode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AesStrength {
    Aes128,
    Aes192,
    Aes256,
}

impl AesStrength {
    pub fn from_tag(tag: u8) -> Option<AesStrength> {
        match tag {
            1 => Some(AesStrength::Aes128),
            2 => Some(AesStrength::Aes192),
            3 => Some(AesStrength::Aes256),
            _ => None,
        }
    }

    pub fn salt_len(self) -> usize {
        match self {
            AesStrength::Aes128 => 8,
            AesStrength::Aes192 => 12,
            AesStrength::Aes256 => 16,
        }
    }

    fn key_len(self) -> usize {
        match self {
            AesStrength::Aes128 => 16,
            AesStrength::Aes192 => 24,
            AesStrength::Aes256 => 32,
        }
    }
}

#[derive(Clone)]
enum BlockCipher {
    Aes128(aes::Aes128),
    Aes192(aes::Aes192),
    Aes256(aes::Aes256),
}

impl BlockCipher {
    fn new(strength: AesStrength, key: &[u8]) -> Result<BlockCipher, Error> {
        let invalid = |_| Error::corrupt("AES key length mismatch");
        match strength {
            AesStrength::Aes128 => aes::Aes128::new_from_slice(key)
                .map(BlockCipher::Aes128)
                .map_err(invalid),
            AesStrength::Aes192 => aes::Aes192::new_from_slice(key)
                .map(BlockCipher::Aes192)
                .map_err(invalid),
            AesStrength::Aes256 => aes::Aes256::new_from_slice(key)
                .map(BlockCipher::Aes256)
                .map_err(invalid),
        }
    }

    fn encrypt_block(&self, block: &mut [u8; AES_BLOCK_LEN]) {
        let block = aes::cipher::generic_array::GenericArray::from_mut_slice(&mut block[..]);
        match self {
            BlockCipher::Aes128(c) => c.encrypt_block(block),
            BlockCipher::Aes192(c) => c.encrypt_block(block),
            BlockCipher::Aes256(c) => c.encrypt_block(block),
        }
    }
}

impl std::fmt::Debug for BlockCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockCipher").finish_non_exhaustive()
    }
}

/// Per-reader state for WinZip AES-CTR decryption.
#[derive(Debug, Clone)]
pub(crate) struct AesCtrCipher {
    cipher: BlockCipher,
    /// Counter of the block currently in `keystream`; block n of the payload
    /// is encrypted against counter n + 1.
    counter: u64,
    keystream: [u8; AES_BLOCK_LEN],
    /// Position within `keystream`; `AES_BLOCK_LEN` means exhausted.
    pos: usize,
}

impl AesCtrCipher {
    /// Derives the encryption key and the 2-byte password-verification value
    /// from `password` and the entry's salt, per the WinZip AE spec:
    /// PBKDF2-HMAC-SHA1, 1000 rounds, yielding encryption key, authentication
    /// key, and verifier back to back.
    ///
    /// The authentication key goes unused; the trailing authentication code
    /// is not checked.
    pub fn new(
        password: &[u8],
        strength: AesStrength,
        salt: &[u8],
        stored_verifier: &[u8; 2],
    ) -> Result<Self, Error> {
        let key_len = strength.key_len();
        let mut derived = [0u8; 2 * 32 + 2];
        let derived = &mut derived[..2 * key_len + 2];
        pbkdf2::pbkdf2_hmac::<Sha1>(password, salt, PBKDF2_ROUNDS, derived);

        if !constant_time_eq(&derived[2 * key_len..], stored_verifier) {
            return Err(Error::corrupt("AES password verification value mismatch"));
        }

        Ok(AesCtrCipher {
            cipher: BlockCipher::new(strength, &derived[..key_len])?,
            counter: 0,
            keystream: [0; AES_BLOCK_LEN],
            pos: AES_BLOCK_LEN,
        })
    }

    fn next_block(&mut self) {
        self.counter += 1;
        let mut block = [0u8; AES_BLOCK_LEN];
        block[..8].copy_from_slice(&self.counter.to_le_bytes());
        self.cipher.encrypt_block(&mut block);
        self.keystream = block;
    }

    /// Decrypts sequential payload bytes in place.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        for b in buf.iter_mut() {
            if self.pos == AES_BLOCK_LEN {
                self.next_block();
                self.pos = 0;
            }
            *b ^= self.keystream[self.pos];
            self.pos += 1;
        }
    }

    /// Repositions the keystream at an absolute payload offset.
    ///
    /// The counter for any offset is just the block index, so this produces
    /// the same keystream a byte-by-byte replay from offset 0 would.
    pub fn seek_to(&mut self, offset: u64) {
        self.counter = offset / AES_BLOCK_LEN as u64;
        self.pos = AES_BLOCK_LEN;
        let within = (offset % AES_BLOCK_LEN as u64) as usize;
        if within != 0 {
            self.next_block();
            self.pos = within;
        }
    }

    /// An independent cipher positioned at the start of the payload.
    pub fn duplicate(&self) -> AesCtrCipher {
        let mut dup = self.clone();
        dup.seek_to(0);
        dup
    }
}
