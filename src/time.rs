//! MS-DOS timestamp handling.
//!
//! The central directory stores modification times in the two 16-bit DOS
//! fields (APPNOTE 4.4.6): date in the high half, time in the low half. DOS
//! times are zone-unaware, so conversion to an epoch value goes through the
//! host's local time zone, which also decides daylight saving.

use chrono::{LocalResult, TimeZone};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DosDateTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
}

pub(crate) fn unpack_dos_datetime(dos: u32) -> DosDateTime {
    let date = (dos >> 16) & 0xFFFF;
    let time = dos & 0xFFFF;

    DosDateTime {
        year: 1980 + ((date >> 9) & 0x7F) as i32,
        month: (date >> 5) & 0x0F,
        day: date & 0x1F,
        hour: (time >> 11) & 0x1F,
        minute: (time >> 5) & 0x3F,
        second: (time & 0x1F) * 2,
    }
}

/// Seconds since the Unix epoch for a DOS timestamp, or 0 when the packed
/// fields do not name a representable local time.
pub(crate) fn dos_to_epoch(dos: u32) -> i64 {
    let d = unpack_dos_datetime(dos);
    match chrono::Local.with_ymd_and_hms(d.year, d.month, d.day, d.hour, d.minute, d.second) {
        LocalResult::Single(t) => t.timestamp(),
        // A DST fold names two instants; take the earlier one.
        LocalResult::Ambiguous(t, _) => t.timestamp(),
        LocalResult::None => 0,
    }
}
