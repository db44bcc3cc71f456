const fn gen_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let poly = 0xEDB88320; // Polynomial used in CRC-32

    let mut i = 0;
    while i < 256 {
        let mut crc = i as u32;
        let mut j = 0;
        while j < 8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ poly;
            } else {
                crc >>= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

// Prefer static over const so the table is materialized once
// ref: https://github.com/srijs/rust-crc32fast/commit/e61ce6a39bbe9da495198a4037292ec299e8970f
static CRC_TABLE: [u32; 256] = gen_crc_table();

/// One table step without the pre/post inversion.
///
/// The traditional PKWARE cipher keys the schedule with raw CRC-32 steps
/// (APPNOTE 6.1.5 calls it `crc32(key, char)`), so the inversion applied by
/// [`crc32`] must not happen here.
#[inline]
pub(crate) fn crc32_step(crc: u32, val: u8) -> u32 {
    (crc >> 8) ^ CRC_TABLE[((crc ^ u32::from(val)) & 0xFF) as usize]
}

/// Compute the CRC32 (IEEE) of a byte slice
///
/// Entry checksums are stored in the central directory but never verified
/// against decompressed data; this function exists for producers of test
/// archives and for callers that want to check integrity themselves.
pub fn crc32(data: &[u8]) -> u32 {
    !data.iter().fold(!0u32, |crc, &b| crc32_step(crc, b))
}
