//! Finding the central directory.
//!
//! Zip archives are read from the back: the end-of-central-directory record
//! sits at EOF behind a variable-length comment, the optional Zip64 locator
//! sits 20 bytes before it, and nothing about the stored offsets can be
//! trusted when the archive rides behind a self-extractor stub. Everything in
//! here exists to pin down two numbers: where the central directory really
//! starts, and how many bytes of foreign data precede the archive.

use crate::errors::{Error, ErrorKind};
use crate::source::{le_u16, le_u32, le_u64, ReaderAt};

const END_OF_CENTRAL_DIR_SIGNATURE: u32 = 0x06054b50;
const END_OF_CENTRAL_DIR_SIGNATURE64: u32 = 0x06064b50;
const END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE: u32 = 0x07064b50;

/// The record is 22 bytes and the comment length field is 16 bits, so the
/// signature must appear within this many bytes of EOF.
const EOCD_SCAN_BUDGET: u64 = 22 + 65535;

const EOCD_SCAN_WINDOW: usize = 256;

/// How far back from the Zip64 locator the brute-force record search goes
/// when the stored offset and the fixed-size guesses all miss.
const ZIP64_BRUTE_FORCE_LIMIT: u64 = 256 * 1024;

/// Where the central directory lives, after correcting for any prepended
/// data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DirectoryBounds {
    /// Bytes of non-archive data before the first archive byte. Every stored
    /// offset is biased by this.
    pub data_start: u64,
    /// Physical offset of the first central directory record.
    pub dir_offset: u64,
    pub entry_count: u64,
    pub zip64: bool,
}

pub(crate) fn locate<R: ReaderAt>(source: &R, stream_len: u64) -> Result<DirectoryBounds, Error> {
    let eocd_pos = find_end_of_central_dir(source, stream_len)?;

    let mut record = [0u8; EOCD_FIXED_SIZE];
    source
        .read_exact_at(&mut record, eocd_pos)
        .map_err(Error::io)?;
    let eocd = EocdFixed::parse(&record)?;

    // A Zip64 locator, when present, always immediately precedes the record
    // we just found (4.3.15).
    if eocd_pos >= ZIP64_LOCATOR_SIZE as u64 {
        if let Some(bounds) = try_zip64(source, eocd_pos)? {
            return Ok(bounds);
        }
    }

    if eocd.disk_number != 0 || eocd.eocd_disk != 0 {
        return Err(Error::corrupt("multi-disk archives are not supported"));
    }
    if eocd.num_entries != eocd.total_entries {
        return Err(Error::corrupt("per-disk and total entry counts disagree"));
    }

    let dir_extent = u64::from(eocd.central_dir_offset) + u64::from(eocd.central_dir_size);
    if eocd_pos < dir_extent {
        return Err(Error::corrupt("central directory overlaps its own trailer"));
    }

    // Whatever lies between where the central directory claims to end and
    // where the trailer actually sits is prepended foreign data.
    let data_start = eocd_pos - dir_extent;

    if eocd_pos + EOCD_FIXED_SIZE as u64 + u64::from(eocd.comment_len) != stream_len {
        return Err(Error::corrupt("comment does not run to end of stream"));
    }

    Ok(DirectoryBounds {
        data_start,
        dir_offset: u64::from(eocd.central_dir_offset) + data_start,
        entry_count: u64::from(eocd.total_entries),
        zip64: false,
    })
}

/// Scans backward from EOF for the end-of-central-directory signature.
///
/// Reads slide back through the trailer in fixed windows; the first 4 bytes
/// of each window are carried over to the end of the next so a signature
/// straddling two reads is still seen. The match closest to EOF wins.
pub(crate) fn find_end_of_central_dir<R: ReaderAt>(
    source: &R,
    stream_len: u64,
) -> Result<u64, Error> {
    let signature = END_OF_CENTRAL_DIR_SIGNATURE.to_le_bytes();
    let mut buf = [0u8; EOCD_SCAN_WINDOW + 4];
    let mut carry: Option<[u8; 4]> = None;
    let mut scanned = 0u64;
    let budget = stream_len.min(EOCD_SCAN_BUDGET);

    while scanned < budget {
        let fresh = (budget - scanned).min(EOCD_SCAN_WINDOW as u64) as usize;
        let pos = stream_len - scanned - fresh as u64;
        source
            .read_exact_at(&mut buf[..fresh], pos)
            .map_err(Error::io)?;

        let haystack = match carry {
            Some(bytes) => {
                buf[fresh..fresh + 4].copy_from_slice(&bytes);
                &buf[..fresh + 4]
            }
            None => &buf[..fresh],
        };

        if let Some(i) = haystack
            .windows(4)
            .rposition(|window| window == signature)
        {
            return Ok(pos + i as u64);
        }

        if fresh >= 4 {
            carry = Some([buf[0], buf[1], buf[2], buf[3]]);
        }
        scanned += fresh as u64;
    }

    Err(ErrorKind::Unsupported.into())
}

fn try_zip64<R: ReaderAt>(source: &R, eocd_pos: u64) -> Result<Option<DirectoryBounds>, Error> {
    let locator_pos = eocd_pos - ZIP64_LOCATOR_SIZE as u64;
    let mut buf = [0u8; ZIP64_LOCATOR_SIZE];
    source
        .read_exact_at(&mut buf, locator_pos)
        .map_err(Error::io)?;

    if le_u32(&buf[0..4]) != END_OF_CENTRAL_DIR_LOCATOR_SIGNATURE {
        // Not an error: the archive is simply not Zip64.
        return Ok(None);
    }

    if le_u32(&buf[4..8]) != 0 {
        return Err(Error::corrupt("zip64 central directory on a nonzero disk"));
    }
    let stored_offset = le_u64(&buf[8..16]);
    if le_u32(&buf[16..20]) != 1 {
        return Err(Error::corrupt("multi-disk archives are not supported"));
    }

    let record_pos = find_zip64_record(source, locator_pos, stored_offset)?;

    // The stored offset is relative to the archive proper; the distance to
    // where the record physically sits is the prepended-data bias.
    let data_start = record_pos
        .checked_sub(stored_offset)
        .ok_or_else(|| Error::corrupt("zip64 record precedes its stored offset"))?;

    let mut record = [0u8; ZIP64_EOCD_FIXED_SIZE];
    source
        .read_exact_at(&mut record, record_pos)
        .map_err(Error::io)?;
    let eocd64 = Zip64EocdFixed::parse(&record)?;

    if eocd64.disk_number != 0 || eocd64.central_dir_disk != 0 {
        return Err(Error::corrupt("multi-disk archives are not supported"));
    }
    if eocd64.num_entries != eocd64.total_entries {
        return Err(Error::corrupt("per-disk and total entry counts disagree"));
    }

    Ok(Some(DirectoryBounds {
        data_start,
        dir_offset: eocd64.central_dir_offset + data_start,
        entry_count: eocd64.total_entries,
        zip64: true,
    }))
}

/// Pins down the Zip64 end-of-central-directory record.
///
/// The offset stored in the locator predates any self-extractor stub, so it
/// only holds for pristine archives. When it misses, the record usually sits
/// directly before the locator: 56 bytes back for a version-1 record with an
/// empty extensible data sector, 84 for version 2. Failing those, a bounded
/// backward scan between the stored offset and the locator settles it.
fn find_zip64_record<R: ReaderAt>(
    source: &R,
    locator_pos: u64,
    stored_offset: u64,
) -> Result<u64, Error> {
    let mut sig = [0u8; 4];

    for candidate in [
        Some(stored_offset),
        locator_pos.checked_sub(56),
        locator_pos.checked_sub(84),
    ]
    .into_iter()
    .flatten()
    {
        if candidate < locator_pos
            && source.read_exact_at(&mut sig, candidate).is_ok()
            && le_u32(&sig) == END_OF_CENTRAL_DIR_SIGNATURE64
        {
            return Ok(candidate);
        }
    }

    if stored_offset < locator_pos && locator_pos > 4 {
        let len = (locator_pos - stored_offset).min(ZIP64_BRUTE_FORCE_LIMIT) as usize;
        let mut buf = vec![0u8; len];
        source
            .read_exact_at(&mut buf, locator_pos - len as u64)
            .map_err(Error::io)?;

        let signature = END_OF_CENTRAL_DIR_SIGNATURE64.to_le_bytes();
        if let Some(i) = buf.windows(4).rposition(|window| window == signature) {
            return Ok(locator_pos - (len - i) as u64);
        }
    }

    Err(Error::corrupt("zip64 end of central directory not found"))
}

const EOCD_FIXED_SIZE: usize = 22;

/// 4.3.16
#[derive(Debug)]
struct EocdFixed {
    disk_number: u16,
    eocd_disk: u16,
    num_entries: u16,
    total_entries: u16,
    central_dir_size: u32,
    central_dir_offset: u32,
    comment_len: u16,
}

impl EocdFixed {
    fn parse(data: &[u8]) -> Result<EocdFixed, Error> {
        if data.len() < EOCD_FIXED_SIZE {
            return Err(Error::from(ErrorKind::Eof));
        }

        if le_u32(&data[0..4]) != END_OF_CENTRAL_DIR_SIGNATURE {
            return Err(Error::corrupt("end of central directory signature mismatch"));
        }

        Ok(EocdFixed {
            disk_number: le_u16(&data[4..6]),
            eocd_disk: le_u16(&data[6..8]),
            num_entries: le_u16(&data[8..10]),
            total_entries: le_u16(&data[10..12]),
            central_dir_size: le_u32(&data[12..16]),
            central_dir_offset: le_u32(&data[16..20]),
            comment_len: le_u16(&data[20..22]),
        })
    }
}

const ZIP64_LOCATOR_SIZE: usize = 20;
const ZIP64_EOCD_FIXED_SIZE: usize = 56;

/// 4.3.14
#[derive(Debug)]
struct Zip64EocdFixed {
    disk_number: u32,
    central_dir_disk: u32,
    num_entries: u64,
    total_entries: u64,
    central_dir_offset: u64,
}

impl Zip64EocdFixed {
    fn parse(data: &[u8]) -> Result<Zip64EocdFixed, Error> {
        if data.len() < ZIP64_EOCD_FIXED_SIZE {
            return Err(Error::from(ErrorKind::Eof));
        }

        if le_u32(&data[0..4]) != END_OF_CENTRAL_DIR_SIGNATURE64 {
            return Err(Error::corrupt(
                "zip64 end of central directory signature mismatch",
            ));
        }

        // record size (8), version made by (2) and version needed (2) are
        // skipped; nothing here depends on them
        Ok(Zip64EocdFixed {
            disk_number: le_u32(&data[16..20]),
            central_dir_disk: le_u32(&data[20..24]),
            num_entries: le_u64(&data[24..32]),
            total_entries: le_u64(&data[32..40]),
            central_dir_offset: le_u64(&data[48..56]),
        })
    }
}
